//! File-transfer session table and piece/block state machines (C7, §4.8),
//! grounded on `file_transfer.h`/`file_transfer.c` and the L2 wrapper in
//! `umesh_l2_file_transfer.c`.
//!
//! One session drives exactly one role (sender or receiver) for one file
//! transfer with one peer. A fixed-capacity table of sessions (mirroring
//! [`umesh_keymgr::session::KeyManager`]'s slot table) is driven by
//! [`FileTransferTable::step`] at the 50 ms cadence §4.8 specifies.

use tracing::{debug, trace, warn};

use umesh_core::frame::SecurityClass;
use umesh_core::mac::{Mac, Rng};
use umesh_core::registry::{L3Handler, L3Message, PROTO_FILE_TRANSFER};
use umesh_core::routing::NeighbourKeys;
use umesh_core::send::send_frame;

use crate::error::FileTransferError;
use crate::messages::{self, FtContent, FtMessage, MAX_PIECE_BITMAP_SIZE, NOMINAL_SESSION_ID_SIZE};

/// Tick cadence this table is designed to be driven at.
pub const STEP_INTERVAL_MS: u32 = 50;

/// How long a session may sit without reaching SENDING/RECEIVING before it
/// is abandoned.
pub const SESSION_INIT_TIMEOUT_MS: u32 = 5_000;
/// How long a SENDING/RECEIVING session may go without peer activity before
/// it is considered lost.
pub const SESSION_RUNNING_TIMEOUT_MS: u32 = 10_000;
/// Throttle for the backend's progress notification.
pub const PROGRESS_UPDATE_INTERVAL_MS: u32 = 500;
/// Cadence of the sender's periodic `FileMetadata` advertisement.
pub const FILE_METADATA_MSG_INTERVAL_MS: u32 = 500;
/// Cadence of the receiver's periodic `FileRequest`.
pub const FILE_REQUEST_MSG_INTERVAL_MS: u32 = 500;
/// How long a sender keeps a piece cached without a fresh block request.
pub const SENDER_PIECE_IDLE_MAX_MS: u32 = 2_000;
/// How long a receiver waits idle before re-requesting a piece's missing blocks.
pub const RECEIVER_PIECE_IDLE_MAX_MS: u32 = 500;
/// Number of pieces that may be in flight simultaneously (§3: "≥ 2, recommended 8").
pub const PIECE_CACHE_COUNT: usize = 8;
/// Blocks served per sender tick for one piece (original: fixed at session init).
pub const DEFAULT_BLOCKS_PER_CYCLE: u8 = 5;

/// File-transfer session lifecycle state (§3, §4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FtState {
    /// Slot unused.
    Empty,
    /// Remote-initiated; file identity not yet known.
    Peer,
    /// Locally allocated; role and file not yet chosen.
    Prepared,
    /// Sender advertising file metadata, waiting for a `FileRequest`.
    FileMetadata,
    /// Receiver advertising a `FileRequest`, waiting for metadata.
    FileRequest,
    /// Actively sending pieces.
    Sending,
    /// Actively receiving pieces.
    Receiving,
    /// Transfer completed successfully.
    Finished,
    /// Transfer abandoned.
    Failed,
}

/// File access the engine never performs directly (§4.8): injected per
/// session by whichever side opens it (`send_file`/`receive_file` locally,
/// or [`FileBackendFactory`] for a peer-initiated transfer).
pub trait FileBackend {
    /// Total size of the file in bytes (only meaningful for a send backend;
    /// a receive backend reports the size declared by the peer instead).
    fn size(&mut self) -> u32;

    /// Read `buf.len()` bytes starting at `pos`.
    fn read(&mut self, pos: u32, buf: &mut [u8]) -> Result<(), FileTransferError>;

    /// Write `buf` starting at `pos`.
    fn write(&mut self, pos: u32, buf: &[u8]) -> Result<(), FileTransferError>;

    /// Called once when the session reaches FINISHED or FAILED.
    fn close(&mut self) {}

    /// Called periodically (throttled by [`PROGRESS_UPDATE_INTERVAL_MS`])
    /// with progress so far.
    fn progress(&mut self, _transferred_pieces: u32, _total_pieces: u32) {}
}

/// Resolves a file name to a backend for a peer-initiated transfer (§4.8;
/// grounded on `umesh_l2_file_transfer.c`'s `file_open_callback`).
pub trait FileBackendFactory {
    /// A peer asked to download `file_name` from us. `None` if we don't
    /// have it (the session fails).
    fn open_for_send(&mut self, file_name: &str) -> Option<Box<dyn FileBackend>>;

    /// A peer is about to push `file_name` to us. `None` rejects it.
    fn open_for_receive(&mut self, file_name: &str) -> Option<Box<dyn FileBackend>>;
}

fn bit_set(bitmap: &mut [u8], index: u32) {
    let (byte, bit) = (index as usize / 8, index % 8);
    if let Some(b) = bitmap.get_mut(byte) {
        *b |= 1 << bit;
    }
}

fn bit_clear(bitmap: &mut [u8], index: u32) {
    let (byte, bit) = (index as usize / 8, index % 8);
    if let Some(b) = bitmap.get_mut(byte) {
        *b &= !(1 << bit);
    }
}

fn bit_is_set(bitmap: &[u8], index: u32) -> bool {
    let (byte, bit) = (index as usize / 8, index % 8);
    bitmap.get(byte).is_some_and(|b| b & (1 << bit) != 0)
}

fn bitmap_is_empty(bitmap: &[u8], used_bytes: usize) -> bool {
    bitmap[..used_bytes].iter().all(|b| *b == 0)
}

fn bitmap_bytes_for(blocks: u32) -> usize {
    ((blocks as usize) + 7) / 8
}

struct PieceSlot {
    used: bool,
    id: u32,
    bitmap: [u8; MAX_PIECE_BITMAP_SIZE],
    bitmap_bytes: usize,
    idle_ms: u32,
}

impl PieceSlot {
    fn empty() -> Self {
        Self {
            used: false,
            id: 0,
            bitmap: [0u8; MAX_PIECE_BITMAP_SIZE],
            bitmap_bytes: 0,
            idle_ms: 0,
        }
    }
}

/// A single file-transfer session (C7).
pub struct FtSession {
    state: FtState,
    peer_tid: u32,
    session_id: Vec<u8>,
    file_name: String,
    file_size: u32,
    piece_size_blocks: u32,
    block_size_bytes: u32,
    transferred_pieces: u32,
    pieces: Vec<PieceSlot>,
    next_piece_index: u32,
    bits_lost: u32,
    blocks_per_cycle: u8,
    message_ms: u32,
    idle_ms: u32,
    last_progress_ms: u32,
    bytes_transferred: u32,
    backend: Option<Box<dyn FileBackend>>,
}

impl FtSession {
    fn empty() -> Self {
        Self {
            state: FtState::Empty,
            peer_tid: 0,
            session_id: Vec::new(),
            file_name: String::new(),
            file_size: 0,
            piece_size_blocks: 0,
            block_size_bytes: 0,
            transferred_pieces: 0,
            pieces: (0..PIECE_CACHE_COUNT).map(|_| PieceSlot::empty()).collect(),
            next_piece_index: 0,
            bits_lost: 0,
            blocks_per_cycle: DEFAULT_BLOCKS_PER_CYCLE,
            message_ms: 0,
            idle_ms: 0,
            last_progress_ms: 0,
            bytes_transferred: 0,
            backend: None,
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> FtState {
        self.state
    }

    /// Peer this session is transferring with.
    #[must_use]
    pub fn peer_tid(&self) -> u32 {
        self.peer_tid
    }

    /// Name of the file being transferred.
    #[must_use]
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Number of whole pieces transferred so far.
    #[must_use]
    pub fn transferred_pieces(&self) -> u32 {
        self.transferred_pieces
    }

    /// Total pieces the transfer consists of, once geometry is known (0
    /// before that).
    #[must_use]
    pub fn total_pieces(&self) -> u32 {
        self.num_pieces()
    }

    /// Bytes moved across the wire so far (CLI progress reporting).
    #[must_use]
    pub fn bytes_transferred(&self) -> u32 {
        self.bytes_transferred
    }

    /// Bits requested by a peer this session had no spare piece-cache slot
    /// for (sender-side overload signal).
    #[must_use]
    pub fn bits_lost(&self) -> u32 {
        self.bits_lost
    }

    fn piece_size_bytes(&self) -> u32 {
        self.piece_size_blocks * self.block_size_bytes
    }

    fn num_pieces(&self) -> u32 {
        if self.piece_size_bytes() == 0 {
            return 0;
        }
        self.file_size.div_ceil(self.piece_size_bytes())
    }

    fn blocks_in_piece(&self, piece_id: u32) -> u32 {
        let piece_bytes = self.piece_size_bytes();
        let start = piece_id * piece_bytes;
        let remaining = self.file_size.saturating_sub(start).min(piece_bytes);
        remaining.div_ceil(self.block_size_bytes)
    }

    fn block_len(&self, piece_id: u32, block_index: u32) -> u32 {
        let piece_bytes = self.piece_size_bytes();
        let piece_start = piece_id * piece_bytes;
        let block_start = piece_start + block_index * self.block_size_bytes;
        self.file_size
            .saturating_sub(block_start)
            .min(self.block_size_bytes)
    }

    fn set_state(&mut self, state: FtState) {
        self.state = state;
        self.message_ms = 0;
        self.idle_ms = 0;
    }

    fn fail(&mut self, reason: &str) {
        warn!(peer = self.peer_tid, file = %self.file_name, reason, "file-transfer: session failed");
        if let Some(backend) = self.backend.as_mut() {
            backend.progress(self.transferred_pieces, self.num_pieces());
            backend.close();
        }
        self.set_state(FtState::Failed);
    }

    fn finish(&mut self) {
        debug!(peer = self.peer_tid, file = %self.file_name, "file-transfer: finished");
        if let Some(backend) = self.backend.as_mut() {
            backend.progress(self.transferred_pieces, self.num_pieces());
            backend.close();
        }
        self.set_state(FtState::Finished);
    }

    fn notify_progress(&mut self, dt_ms: u32) {
        self.last_progress_ms += dt_ms;
        if self.last_progress_ms < PROGRESS_UPDATE_INTERVAL_MS {
            return;
        }
        self.last_progress_ms = 0;
        let total = self.num_pieces();
        if let Some(backend) = self.backend.as_mut() {
            backend.progress(self.transferred_pieces, total);
        }
    }

    fn free_piece_slot(&mut self) -> Option<usize> {
        self.pieces.iter().position(|p| !p.used)
    }

    fn find_piece_slot(&self, id: u32) -> Option<usize> {
        self.pieces.iter().position(|p| p.used && p.id == id)
    }

    // ---- receiver side ----

    fn fill_receive_cache(&mut self) {
        loop {
            let in_flight = self.pieces.iter().filter(|p| p.used).count();
            if in_flight >= PIECE_CACHE_COUNT || self.next_piece_index >= self.num_pieces() {
                break;
            }
            let Some(idx) = self.free_piece_slot() else {
                break;
            };
            let piece_id = self.next_piece_index;
            let blocks = self.blocks_in_piece(piece_id);
            let bytes = bitmap_bytes_for(blocks);
            let slot = &mut self.pieces[idx];
            slot.used = true;
            slot.id = piece_id;
            slot.bitmap = [0u8; MAX_PIECE_BITMAP_SIZE];
            for b in 0..blocks {
                bit_set(&mut slot.bitmap, b);
            }
            slot.bitmap_bytes = bytes;
            slot.idle_ms = RECEIVER_PIECE_IDLE_MAX_MS;
            self.next_piece_index += 1;
        }
    }

    fn step_receiving<M: Mac, K: NeighbourKeys>(
        &mut self,
        dt_ms: u32,
        mac: &mut M,
        keys: &mut K,
        local_tid: u32,
    ) {
        self.fill_receive_cache();
        self.idle_ms += dt_ms;

        for idx in 0..self.pieces.len() {
            if !self.pieces[idx].used {
                continue;
            }
            self.pieces[idx].idle_ms += dt_ms;
            if self.pieces[idx].idle_ms < RECEIVER_PIECE_IDLE_MAX_MS {
                continue;
            }
            self.pieces[idx].idle_ms = 0;
            let piece_id = self.pieces[idx].id;
            let bitmap = self.pieces[idx].bitmap[..self.pieces[idx].bitmap_bytes].to_vec();
            self.send_message(
                mac,
                keys,
                local_tid,
                FtContent::BlockRequest { piece_id, bitmap },
            );
        }

        if self.transferred_pieces >= self.num_pieces() && self.num_pieces() > 0 {
            self.finish();
            return;
        }

        if self.idle_ms >= SESSION_RUNNING_TIMEOUT_MS {
            self.fail("receiver: peer loss timeout");
            return;
        }

        self.notify_progress(dt_ms);
    }

    fn handle_block_response(&mut self, piece_id: u32, block_index: u32, data: &[u8]) {
        self.idle_ms = 0;
        let Some(idx) = self.find_piece_slot(piece_id) else {
            return;
        };
        if !bit_is_set(&self.pieces[idx].bitmap, block_index) {
            return;
        }
        let pos = piece_id * self.piece_size_bytes() + block_index * self.block_size_bytes;
        let write_result = self
            .backend
            .as_mut()
            .ok_or(FileTransferError::BackendFailed)
            .and_then(|b| b.write(pos, data));
        if let Err(e) = write_result {
            warn!(piece_id, block_index, error = %e, "file-transfer: block write failed");
            return;
        }
        bit_clear(&mut self.pieces[idx].bitmap, block_index);
        self.bytes_transferred += data.len() as u32;
        self.pieces[idx].idle_ms = 0;

        if bitmap_is_empty(&self.pieces[idx].bitmap, self.pieces[idx].bitmap_bytes) {
            self.pieces[idx] = PieceSlot::empty();
            self.transferred_pieces += 1;
            trace!(piece_id, "file-transfer: piece committed");
        }
    }

    // ---- sender side ----

    fn step_sending<M: Mac, K: NeighbourKeys>(
        &mut self,
        dt_ms: u32,
        mac: &mut M,
        keys: &mut K,
        local_tid: u32,
    ) {
        self.idle_ms += dt_ms;

        for idx in 0..self.pieces.len() {
            if !self.pieces[idx].used {
                continue;
            }
            self.pieces[idx].idle_ms += dt_ms;
            if self.pieces[idx].idle_ms >= SENDER_PIECE_IDLE_MAX_MS {
                self.pieces[idx] = PieceSlot::empty();
                continue;
            }

            let piece_id = self.pieces[idx].id;
            let blocks = self.blocks_in_piece(piece_id);
            let mut sent = 0u8;
            for block_index in 0..blocks {
                if sent >= self.blocks_per_cycle {
                    break;
                }
                if !bit_is_set(&self.pieces[idx].bitmap, block_index) {
                    continue;
                }
                let len = self.block_len(piece_id, block_index) as usize;
                let pos = piece_id * self.piece_size_bytes() + block_index * self.block_size_bytes;
                let mut buf = vec![0u8; len];
                let read_result = self
                    .backend
                    .as_mut()
                    .ok_or(FileTransferError::BackendFailed)
                    .and_then(|b| b.read(pos, &mut buf));
                if let Err(e) = read_result {
                    warn!(piece_id, block_index, error = %e, "file-transfer: block read failed");
                    continue;
                }
                self.send_message(
                    mac,
                    keys,
                    local_tid,
                    FtContent::BlockResponse {
                        piece_id,
                        block_index,
                        data: buf,
                    },
                );
                bit_clear(&mut self.pieces[idx].bitmap, block_index);
                self.bytes_transferred += len as u32;
                sent += 1;
            }

            if bitmap_is_empty(&self.pieces[idx].bitmap, self.pieces[idx].bitmap_bytes) {
                self.pieces[idx] = PieceSlot::empty();
                self.transferred_pieces += 1;
            }
        }

        if self.transferred_pieces >= self.num_pieces() && self.num_pieces() > 0 {
            self.finish();
            return;
        }

        if self.idle_ms >= SESSION_RUNNING_TIMEOUT_MS {
            self.fail("sender: peer loss timeout");
            return;
        }

        self.notify_progress(dt_ms);
    }

    fn handle_block_request(&mut self, piece_id: u32, bitmap: &[u8]) {
        self.idle_ms = 0;
        let idx = match self.find_piece_slot(piece_id) {
            Some(idx) => idx,
            None => match self.free_piece_slot() {
                Some(idx) => idx,
                None => {
                    self.bits_lost += bitmap.iter().map(|b| b.count_ones()).sum::<u32>();
                    return;
                }
            },
        };
        let slot = &mut self.pieces[idx];
        slot.used = true;
        slot.id = piece_id;
        slot.bitmap = [0u8; MAX_PIECE_BITMAP_SIZE];
        let bytes = bitmap.len().min(MAX_PIECE_BITMAP_SIZE);
        slot.bitmap[..bytes].copy_from_slice(&bitmap[..bytes]);
        slot.bitmap_bytes = bytes;
        slot.idle_ms = 0;
    }

    fn send_message<M: Mac, K: NeighbourKeys>(
        &self,
        mac: &mut M,
        keys: &mut K,
        local_tid: u32,
        content: FtContent,
    ) {
        let msg = FtMessage {
            session_id: self.session_id.clone(),
            content,
        };
        let payload = messages::encode(&msg);
        let result = send_frame(
            mac,
            keys,
            local_tid,
            SecurityClass::Verify,
            false,
            Some(self.peer_tid),
            PROTO_FILE_TRANSFER,
            false,
            &payload,
        );
        if let Err(e) = result {
            warn!(peer = self.peer_tid, error = %e, "file-transfer: send failed");
        }
    }
}

/// A fixed-capacity table of file-transfer sessions.
pub struct FileTransferTable {
    slots: Vec<FtSession>,
}

impl FileTransferTable {
    /// A table with `capacity` empty slots.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| FtSession::empty()).collect(),
        }
    }

    fn find_free(&self) -> Option<usize> {
        self.slots.iter().position(|s| s.state == FtState::Empty)
    }

    fn find_by_session_id(&self, session_id: &[u8]) -> Option<usize> {
        self.slots
            .iter()
            .position(|s| s.state != FtState::Empty && s.session_id == session_id)
    }

    /// Snapshot every non-empty session, for introspection (CLI dump).
    pub fn sessions(&self) -> impl Iterator<Item = &FtSession> {
        self.slots.iter().filter(|s| s.state != FtState::Empty)
    }

    /// Start sending `file_name` to `peer_tid`. Fails if no slot is free.
    pub fn send_file<R: Rng>(
        &mut self,
        peer_tid: u32,
        file_name: &str,
        file_size: u32,
        piece_size_blocks: u32,
        block_size_bytes: u32,
        backend: Box<dyn FileBackend>,
        rng: &mut R,
    ) -> Result<(), FileTransferError> {
        let idx = self.find_free().ok_or(FileTransferError::TableFull)?;
        let mut session_id = vec![0u8; NOMINAL_SESSION_ID_SIZE];
        rng.fill(&mut session_id);
        self.slots[idx] = FtSession::empty();
        let slot = &mut self.slots[idx];
        slot.peer_tid = peer_tid;
        slot.session_id = session_id;
        slot.file_name = file_name.to_string();
        slot.file_size = file_size;
        slot.piece_size_blocks = piece_size_blocks;
        slot.block_size_bytes = block_size_bytes;
        slot.backend = Some(backend);
        slot.set_state(FtState::FileMetadata);
        debug!(peer = peer_tid, file = file_name, "file-transfer: send_file started");
        Ok(())
    }

    /// Start requesting `file_name` from `peer_tid`. Fails if no slot is free.
    pub fn receive_file<R: Rng>(
        &mut self,
        peer_tid: u32,
        file_name: &str,
        backend: Box<dyn FileBackend>,
        rng: &mut R,
    ) -> Result<(), FileTransferError> {
        let idx = self.find_free().ok_or(FileTransferError::TableFull)?;
        let mut session_id = vec![0u8; NOMINAL_SESSION_ID_SIZE];
        rng.fill(&mut session_id);
        self.slots[idx] = FtSession::empty();
        let slot = &mut self.slots[idx];
        slot.peer_tid = peer_tid;
        slot.session_id = session_id;
        slot.file_name = file_name.to_string();
        slot.backend = Some(backend);
        slot.set_state(FtState::FileRequest);
        debug!(peer = peer_tid, file = file_name, "file-transfer: receive_file started");
        Ok(())
    }

    /// Advance every slot by `dt_ms`.
    pub fn step<M: Mac, K: NeighbourKeys, R: Rng>(
        &mut self,
        dt_ms: u32,
        mac: &mut M,
        keys: &mut K,
        rng: &mut R,
        local_tid: u32,
    ) {
        for idx in 0..self.slots.len() {
            self.step_slot(idx, dt_ms, mac, keys, rng, local_tid);
        }
    }

    fn step_slot<M: Mac, K: NeighbourKeys, R: Rng>(
        &mut self,
        idx: usize,
        dt_ms: u32,
        mac: &mut M,
        keys: &mut K,
        _rng: &mut R,
        local_tid: u32,
    ) {
        let session = &mut self.slots[idx];
        match session.state {
            FtState::Empty => {}
            FtState::Peer | FtState::Prepared => {
                session.idle_ms += dt_ms;
                if session.idle_ms >= SESSION_INIT_TIMEOUT_MS {
                    session.fail("no peer activity before a role was chosen");
                }
            }
            FtState::FileMetadata => {
                session.message_ms += dt_ms;
                session.idle_ms += dt_ms;
                if session.idle_ms >= SESSION_INIT_TIMEOUT_MS {
                    session.fail("no FileRequest received");
                    return;
                }
                if session.message_ms >= FILE_METADATA_MSG_INTERVAL_MS {
                    session.message_ms = 0;
                    let content = FtContent::FileMetadata {
                        file_name: session.file_name.clone(),
                        file_size: session.file_size,
                        piece_size_blocks: session.piece_size_blocks,
                        block_size_bytes: session.block_size_bytes,
                    };
                    session.send_message(mac, keys, local_tid, content);
                }
            }
            FtState::FileRequest => {
                session.message_ms += dt_ms;
                session.idle_ms += dt_ms;
                if session.idle_ms >= SESSION_INIT_TIMEOUT_MS {
                    session.fail("no FileMetadata received");
                    return;
                }
                if session.message_ms >= FILE_REQUEST_MSG_INTERVAL_MS {
                    session.message_ms = 0;
                    let content = FtContent::FileRequest {
                        file_name: session.file_name.clone(),
                    };
                    session.send_message(mac, keys, local_tid, content);
                }
            }
            FtState::Sending => session.step_sending(dt_ms, mac, keys, local_tid),
            FtState::Receiving => session.step_receiving(dt_ms, mac, keys, local_tid),
            FtState::Finished | FtState::Failed => {
                self.slots[idx] = FtSession::empty();
            }
        }
    }

    /// Handle an inbound file-transfer L3 message, allocating a PEER session
    /// and resolving its backend via `factory` if the session id matches
    /// nothing yet (§4.8: "EMPTY → PEER on first unmatched inbound message").
    pub fn receive(
        &mut self,
        src_tid: u32,
        payload: &[u8],
        factory: &mut dyn FileBackendFactory,
    ) -> Result<(), FileTransferError> {
        let msg = messages::decode(payload)?;

        let idx = match self.find_by_session_id(&msg.session_id) {
            Some(idx) => idx,
            None => {
                let idx = self.find_free().ok_or(FileTransferError::TableFull)?;
                self.slots[idx] = FtSession::empty();
                self.slots[idx].peer_tid = src_tid;
                self.slots[idx].session_id = msg.session_id.clone();
                self.slots[idx].set_state(FtState::Peer);
                trace!(peer = src_tid, "file-transfer: new PEER session seeded");
                idx
            }
        };

        let session = &mut self.slots[idx];
        session.idle_ms = 0;

        match (session.state, msg.content) {
            (FtState::Peer, FtContent::FileRequest { file_name }) => {
                match factory.open_for_send(&file_name) {
                    Some(backend) => {
                        let size = {
                            let mut b = backend;
                            let size = b.size();
                            session.backend = Some(b);
                            size
                        };
                        session.file_name = file_name;
                        session.file_size = size;
                        session.piece_size_blocks = 32;
                        session.block_size_bytes = 32;
                        session.set_state(FtState::Sending);
                    }
                    None => session.fail("peer requested an unknown file"),
                }
            }
            (FtState::Peer, FtContent::FileMetadata {
                file_name,
                file_size,
                piece_size_blocks,
                block_size_bytes,
            }) => match factory.open_for_receive(&file_name) {
                Some(backend) => {
                    session.backend = Some(backend);
                    session.file_name = file_name;
                    session.file_size = file_size;
                    session.piece_size_blocks = piece_size_blocks;
                    session.block_size_bytes = block_size_bytes;
                    session.set_state(FtState::Receiving);
                }
                None => session.fail("local policy rejected inbound file"),
            },
            (FtState::FileMetadata, FtContent::FileRequest { .. }) => {
                session.set_state(FtState::Sending);
            }
            (FtState::FileMetadata, FtContent::BlockRequest { piece_id, bitmap }) => {
                // A receiver that already had our metadata skips the explicit
                // FileRequest and goes straight to asking for blocks.
                session.set_state(FtState::Sending);
                session.handle_block_request(piece_id, &bitmap);
            }
            (FtState::FileRequest, FtContent::FileMetadata {
                file_size,
                piece_size_blocks,
                block_size_bytes,
                ..
            }) => {
                session.file_size = file_size;
                session.piece_size_blocks = piece_size_blocks;
                session.block_size_bytes = block_size_bytes;
                session.set_state(FtState::Receiving);
            }
            (FtState::Sending, FtContent::BlockRequest { piece_id, bitmap }) => {
                session.handle_block_request(piece_id, &bitmap);
            }
            (FtState::Receiving, FtContent::BlockResponse {
                piece_id,
                block_index,
                data,
            }) => {
                session.handle_block_response(piece_id, block_index, &data);
            }
            (state, _) => {
                trace!(?state, peer = src_tid, "file-transfer: message ignored in current state");
            }
        }

        Ok(())
    }
}

/// `L3Handler` adapter dispatching received file-transfer frames into a
/// [`FileTransferTable`] shared with the composition layer.
pub struct FileTransferHandler<'a> {
    table: &'a std::cell::RefCell<FileTransferTable>,
    factory: &'a std::cell::RefCell<dyn FileBackendFactory>,
}

impl<'a> FileTransferHandler<'a> {
    /// Build a handler over a shared table and backend factory.
    #[must_use]
    pub fn new(
        table: &'a std::cell::RefCell<FileTransferTable>,
        factory: &'a std::cell::RefCell<dyn FileBackendFactory>,
    ) -> Self {
        Self { table, factory }
    }
}

impl L3Handler for FileTransferHandler<'_> {
    fn on_receive(&mut self, msg: L3Message) {
        let result = self
            .table
            .borrow_mut()
            .receive(msg.src_tid, &msg.payload, &mut *self.factory.borrow_mut());
        if let Err(e) = result {
            trace!(src = msg.src_tid, error = %e, "file-transfer: receive failed");
        }
    }
}
