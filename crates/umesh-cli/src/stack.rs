//! Composition layer wiring the protocol crates into one runnable node
//! (§9: "one root value owning the session tables").
//!
//! Nothing here implements protocol logic; it only owns the tables, drives
//! their `step()`s at the configured cadences, and bridges `umesh-core`'s
//! generic send/receive paths to the concrete `NeighbourTable`/`KeyManager`
//! via [`CombinedKeys`].

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use tracing::trace;

use umesh_core::frame::SecurityMode;
use umesh_core::mac::{Mac, MacRecv, PacketInfo, Rng};
use umesh_core::registry::{L3Handler, L3Message, ProtocolRegistry, PROTO_DISCOVERY, PROTO_FILE_TRANSFER, PROTO_KEYMGR, PROTO_STATUS};
use umesh_core::routing::NeighbourKeys;
use umesh_core::status::{StatusBroadcaster, StatusReceiver};
use umesh_discovery::discovery::DiscoveryTask;
use umesh_discovery::nbtable::NeighbourTable;
use umesh_files::session::{FileBackend, FileBackendFactory, FileTransferTable};
use umesh_keymgr::session::{Identity, KeyManager};

use crate::config::Config;
use crate::mac_udp::UdpMac;

/// [`umesh_core::mac::Rng`] backed by the OS CSPRNG.
#[derive(Default)]
pub struct OsRng;

impl Rng for OsRng {
    fn fill(&mut self, buf: &mut [u8]) {
        umesh_crypto::random::fill_random(buf).expect("OS RNG unavailable");
    }
}

/// Bridges [`NeighbourTable`] and [`KeyManager`] into the single
/// [`NeighbourKeys`] seam the send/receive paths depend on.
struct CombinedKeys {
    nbtable: Rc<RefCell<NeighbourTable>>,
    keymgr: Rc<RefCell<KeyManager>>,
}

impl NeighbourKeys for CombinedKeys {
    fn is_known(&self, tid: u32) -> bool {
        self.nbtable.borrow().is_known(tid)
    }

    fn rx_key(&self, tid: u32) -> Option<[u8; 32]> {
        self.keymgr.borrow().rx_key(tid)
    }

    fn take_tx_key_and_nonce(&mut self, tid: u32) -> Option<([u8; 32], u16)> {
        let key = self.keymgr.borrow().tx_key(tid)?;
        let counter = self.nbtable.borrow_mut().next_tx_counter(tid)?;
        Some((key, counter as u16))
    }

    fn note_reception(&mut self, tid: u32, info: PacketInfo) {
        self.nbtable.borrow_mut().note_reception(tid, info);
    }

    fn record_drop(&mut self, tid: u32) {
        self.nbtable.borrow_mut().record_drop(tid);
    }
}

/// Dispatches routed `ADV_BASIC` frames into the neighbour table. Mirrors
/// `umesh_discovery::discovery::AdvBasicHandler`, just holding an owned
/// `Rc` instead of a borrow so it satisfies the registry's `'static` bound.
struct DiscoveryDispatch(Rc<RefCell<NeighbourTable>>);

impl L3Handler for DiscoveryDispatch {
    fn on_receive(&mut self, msg: L3Message) {
        if msg.security_mode == SecurityMode::None || msg.security_mode.is_encrypted() {
            trace!(src = msg.src_tid, "discovery: ADV_BASIC must be verify-only, dropping");
            return;
        }
        self.0.borrow_mut().note_reception(msg.src_tid, msg.info);
    }
}

/// Dispatches routed key-manager frames. Mirrors
/// `umesh_keymgr::session::KeyMgrHandler`, but reads `local_tid` fresh on
/// every message instead of baking it in at construction, since a
/// long-running node's TID does rotate (§4.3, once per hour).
struct KeyMgrDispatch {
    manager: Rc<RefCell<KeyManager>>,
    mac: Rc<RefCell<UdpMac>>,
    keys: Rc<RefCell<CombinedKeys>>,
    rng: Rc<RefCell<OsRng>>,
    local_tid: Rc<Cell<u32>>,
}

impl L3Handler for KeyMgrDispatch {
    fn on_receive(&mut self, msg: L3Message) {
        let result = self.manager.borrow_mut().receive(
            msg.src_tid,
            &msg.payload,
            &mut *self.mac.borrow_mut(),
            &mut *self.keys.borrow_mut(),
            &mut *self.rng.borrow_mut(),
            self.local_tid.get(),
        );
        if let Err(e) = result {
            trace!(src = msg.src_tid, error = %e, "keymgr: receive failed");
        }
    }
}

/// Dispatches routed file-transfer frames. Mirrors
/// `umesh_files::session::FileTransferHandler`.
struct FileTransferDispatch {
    table: Rc<RefCell<FileTransferTable>>,
    factory: Rc<RefCell<dyn FileBackendFactory>>,
}

impl L3Handler for FileTransferDispatch {
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

/// A snapshot of one file-transfer session's progress, for introspection.
pub struct FileSessionProgress {
    /// Peer TID this transfer is with.
    pub peer_tid: u32,
    /// File name being transferred.
    pub file_name: String,
    /// Pieces fully transferred so far.
    pub transferred_pieces: u32,
    /// Total pieces in the transfer.
    pub total_pieces: u32,
    /// Bytes transferred so far.
    pub bytes_transferred: u32,
}

/// One running uMeshFw node: the MAC, every protocol's session table, and
/// the registry wiring inbound frames to them.
pub struct Stack {
    mac: Rc<RefCell<UdpMac>>,
    rng: Rc<RefCell<OsRng>>,
    keys: Rc<RefCell<CombinedKeys>>,
    nbtable: Rc<RefCell<NeighbourTable>>,
    discovery: DiscoveryTask,
    keymgr: Rc<RefCell<KeyManager>>,
    files: Rc<RefCell<FileTransferTable>>,
    status: StatusBroadcaster,
    registry: ProtocolRegistry,
    local_tid: Rc<Cell<u32>>,
    cadence: crate::config::CadenceConfig,
    since_discovery_ms: u32,
    since_keymgr_ms: u32,
    since_files_ms: u32,
    since_status_ms: u32,
}

impl Stack {
    /// Build a node from `config`, its identity keypair, and a file backend
    /// factory for peer-initiated transfers.
    pub fn new(
        config: &Config,
        identity: Identity,
        mac: UdpMac,
        factory: Rc<RefCell<dyn FileBackendFactory>>,
    ) -> Self {
        let mac = Rc::new(RefCell::new(mac));
        let rng = Rc::new(RefCell::new(OsRng));
        let nbtable = Rc::new(RefCell::new(NeighbourTable::new(config.capacity.neighbours)));
        let keymgr = Rc::new(RefCell::new(KeyManager::new(config.capacity.key_sessions, identity)));
        let keys = Rc::new(RefCell::new(CombinedKeys {
            nbtable: nbtable.clone(),
            keymgr: keymgr.clone(),
        }));
        let files = Rc::new(RefCell::new(FileTransferTable::new(config.capacity.file_sessions)));
        let local_tid = Rc::new(Cell::new(0));

        let mut registry = ProtocolRegistry::new();
        registry.register(PROTO_DISCOVERY, Box::new(DiscoveryDispatch(nbtable.clone())));
        registry.register(
            PROTO_KEYMGR,
            Box::new(KeyMgrDispatch {
                manager: keymgr.clone(),
                mac: mac.clone(),
                keys: keys.clone(),
                rng: rng.clone(),
                local_tid: local_tid.clone(),
            }),
        );
        registry.register(
            PROTO_FILE_TRANSFER,
            Box::new(FileTransferDispatch {
                table: files.clone(),
                factory,
            }),
        );
        registry.register(PROTO_STATUS, Box::new(StatusReceiver));

        Self {
            mac,
            rng,
            keys,
            nbtable,
            discovery: DiscoveryTask::new(),
            keymgr,
            files,
            status: StatusBroadcaster::new(),
            registry,
            local_tid,
            cadence: config.cadence,
            since_discovery_ms: 0,
            since_keymgr_ms: 0,
            since_files_ms: 0,
            since_status_ms: 0,
        }
    }

    /// This node's current TID, or 0 if none has been allocated yet.
    #[must_use]
    pub fn local_tid(&self) -> u32 {
        self.local_tid.get()
    }

    /// Register a sensor/power-device reading source to broadcast (C11).
    pub fn add_sensor(&mut self, source: Box<dyn umesh_core::status::ReadingSource>) -> bool {
        self.status.add_sensor(source)
    }

    /// Start sending `file_name` to `peer_tid`.
    pub fn send_file(
        &self,
        peer_tid: u32,
        file_name: &str,
        file_size: u32,
        backend: Box<dyn FileBackend>,
    ) -> Result<(), umesh_files::FileTransferError> {
        self.files.borrow_mut().send_file(
            peer_tid,
            file_name,
            file_size,
            32,
            32,
            backend,
            &mut *self.rng.borrow_mut(),
        )
    }

    /// Start requesting `file_name` from `peer_tid`.
    pub fn receive_file(
        &self,
        peer_tid: u32,
        file_name: &str,
        backend: Box<dyn FileBackend>,
    ) -> Result<(), umesh_files::FileTransferError> {
        self.files
            .borrow_mut()
            .receive_file(peer_tid, file_name, backend, &mut *self.rng.borrow_mut())
    }

    /// Snapshot the neighbour table, for introspection.
    pub fn neighbours(&self) -> Vec<umesh_discovery::NeighbourRecord> {
        self.nbtable.borrow().records().cloned().collect()
    }

    /// Snapshot the key-manager session table, for introspection.
    pub fn key_sessions(&self) -> Vec<umesh_keymgr::SessionSnapshot> {
        self.keymgr.borrow().sessions().collect()
    }

    /// The active file-transfer sessions' progress, for introspection.
    pub fn file_sessions(&self) -> Vec<FileSessionProgress> {
        self.files
            .borrow()
            .sessions()
            .map(|s| FileSessionProgress {
                peer_tid: s.peer_tid(),
                file_name: s.file_name().to_string(),
                transferred_pieces: s.transferred_pieces(),
                total_pieces: s.total_pieces(),
                bytes_transferred: s.bytes_transferred(),
            })
            .collect()
    }

    /// Advance every subsystem by `dt_ms`, draining the MAC's receive queue
    /// along the way.
    pub fn step(&mut self, dt_ms: u32) {
        loop {
            let before = self.mac.borrow_mut().recv();
            match before {
                MacRecv::NotReady => break,
                MacRecv::Frame(buf, info) => {
                    let previous_tid = self.discovery.previous_tid();
                    let local_tid = self.local_tid.get();
                    let mut keys = self.keys.borrow_mut();
                    let _ = umesh_core::receive::route_frame(
                        buf,
                        info,
                        &mut *keys,
                        &mut self.registry,
                        local_tid,
                        previous_tid,
                    );
                }
            }
        }

        self.since_discovery_ms += dt_ms;
        if self.since_discovery_ms >= self.cadence.discovery_ms {
            let dt = self.since_discovery_ms;
            self.since_discovery_ms = 0;
            self.nbtable.borrow_mut().step(dt);
            let mut mac = self.mac.borrow_mut();
            let mut rng = self.rng.borrow_mut();
            let mut keys = self.keys.borrow_mut();
            self.discovery.step(dt, &mut *mac, &mut *rng, &mut *keys);
            drop(mac);
            drop(rng);
            drop(keys);
            self.local_tid.set(self.discovery.current_tid());
            self.promote_new_neighbours();
        }

        self.since_keymgr_ms += dt_ms;
        if self.since_keymgr_ms >= self.cadence.keymgr_ms {
            let dt = self.since_keymgr_ms;
            self.since_keymgr_ms = 0;
            let mut mac = self.mac.borrow_mut();
            let mut rng = self.rng.borrow_mut();
            let mut keys = self.keys.borrow_mut();
            self.keymgr
                .borrow_mut()
                .step(dt, &mut *mac, &mut *keys, &mut *rng, self.local_tid.get());
        }

        self.since_files_ms += dt_ms;
        if self.since_files_ms >= self.cadence.files_ms {
            let dt = self.since_files_ms;
            self.since_files_ms = 0;
            let mut mac = self.mac.borrow_mut();
            let mut rng = self.rng.borrow_mut();
            let mut keys = self.keys.borrow_mut();
            self.files
                .borrow_mut()
                .step(dt, &mut *mac, &mut *keys, &mut *rng, self.local_tid.get());
        }

        self.since_status_ms += dt_ms;
        if self.since_status_ms >= self.cadence.status_ms {
            let dt = self.since_status_ms;
            self.since_status_ms = 0;
            let mut mac = self.mac.borrow_mut();
            let mut keys = self.keys.borrow_mut();
            self.status.step(dt, &mut *mac, &mut *keys, self.local_tid.get());
        }
    }

    /// Ask the key manager to manage every NEW neighbour, promoting it to
    /// VALID (§4.2: driven externally by whoever owns the key manager).
    fn promote_new_neighbours(&mut self) {
        let new_tids: Vec<u32> = self
            .nbtable
            .borrow()
            .records()
            .filter(|r| r.state == umesh_discovery::NeighbourState::New)
            .map(|r| r.tid)
            .collect();

        for tid in new_tids {
            if self.keymgr.borrow_mut().manage(tid).is_ok() {
                self.nbtable.borrow_mut().mark_valid(tid);
            }
        }
    }
}
