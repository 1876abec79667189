//! Key-manager session table (C5), grounded on `umesh_l2_keymgr.c`/`.h`.
//!
//! One fixed-size table of sessions keyed by peer TID, each driving its own
//! [`Ake3dhSession`] through the handshake and, once it succeeds, holding
//! the derived TX/RX keys. Only [`KeyMgrState::Managed`] sessions are
//! usable for encryption.

use tracing::{debug, trace, warn};

use umesh_core::frame::SecurityClass;
use umesh_core::mac::{Mac, Rng};
use umesh_core::registry::{L3Handler, L3Message, PROTO_KEYMGR};
use umesh_core::routing::NeighbourKeys;
use umesh_core::send::send_frame;

use crate::ake3dh::{AkeResult, Ake3dhSession};
use crate::error::KeyMgrError;
use crate::messages::{self, AkeMessage, SESSION_ID_SIZE};

/// Tick cadence this table is designed to be driven at.
pub const STEP_INTERVAL_MS: u32 = 100;

const NEW_TIMEOUT_MS: u32 = 5_000;
const INITIAL_AKE_TIMEOUT_MS: u32 = 20_000;
const AUTH_NAUTH_TIMEOUT_MS: u32 = 5_000;
const MANAGED_TIMEOUT_MS: u32 = 600_000;
const EXPIRED_TIMEOUT_MS: u32 = 5_000;
const OLD_TIMEOUT_MS: u32 = 5_000;

/// Key-manager session lifecycle state.
///
/// `Autz`/`Nautz` exist in the original design as placeholders for an
/// authorization step that is never reached by this engine (policy always
/// grants AUTH straight through to MANAGED, per §4.6); they are kept as
/// unreachable variants so the state space documented by the original
/// matches this one, not because anything here can produce them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyMgrState {
    /// Slot unused.
    Empty,
    /// Allocated, waiting to start a 3DH session.
    New,
    /// 3DH exchange in progress.
    InitialAke,
    /// 3DH succeeded; about to be promoted to MANAGED.
    Auth,
    /// 3DH failed.
    Nauth,
    /// Unreachable: modelled for state-space parity only (see above).
    Autz,
    /// Unreachable: modelled for state-space parity only (see above).
    Nautz,
    /// Usable for encryption.
    Managed,
    /// MANAGED lifetime elapsed; awaiting reclaim.
    Expired,
    /// Terminal failure/expiry state; reclaimed to EMPTY next tick.
    Old,
}

fn state_timeout_ms(state: KeyMgrState) -> u32 {
    match state {
        KeyMgrState::Empty => 0,
        KeyMgrState::New => NEW_TIMEOUT_MS,
        KeyMgrState::InitialAke => INITIAL_AKE_TIMEOUT_MS,
        KeyMgrState::Auth | KeyMgrState::Nauth | KeyMgrState::Autz | KeyMgrState::Nautz => {
            AUTH_NAUTH_TIMEOUT_MS
        }
        KeyMgrState::Managed => MANAGED_TIMEOUT_MS,
        KeyMgrState::Expired => EXPIRED_TIMEOUT_MS,
        KeyMgrState::Old => OLD_TIMEOUT_MS,
    }
}

struct KeySession {
    peer_tid: u32,
    state: KeyMgrState,
    state_timeout_ms: u32,
    ake: Option<Ake3dhSession>,
    master_tx_key: Option<[u8; 32]>,
    master_rx_key: Option<[u8; 32]>,
}

impl KeySession {
    fn empty() -> Self {
        Self {
            peer_tid: 0,
            state: KeyMgrState::Empty,
            state_timeout_ms: 0,
            ake: None,
            master_tx_key: None,
            master_rx_key: None,
        }
    }

    fn set_state(&mut self, state: KeyMgrState) {
        self.state = state;
        self.state_timeout_ms = state_timeout_ms(state);
    }
}

/// Identity keypair the manager uses to start every new 3DH session.
#[derive(Clone, Copy)]
pub struct Identity {
    /// Our X25519 identity secret key.
    pub isk: [u8; 32],
    /// Our X25519 identity public key.
    pub ipk: [u8; 32],
}

/// One neighbour's usable key material, for introspection.
#[derive(Debug, Clone, Copy)]
pub struct SessionSnapshot {
    /// Peer TID.
    pub peer_tid: u32,
    /// Current lifecycle state.
    pub state: KeyMgrState,
    /// Milliseconds remaining before the current state times out.
    pub state_timeout_ms: u32,
}

/// A fixed-capacity table of key-manager sessions.
pub struct KeyManager {
    identity: Identity,
    slots: Vec<KeySession>,
}

impl KeyManager {
    /// A table with `capacity` empty slots, using `identity` for every
    /// 3DH session this manager starts.
    #[must_use]
    pub fn new(capacity: usize, identity: Identity) -> Self {
        Self {
            identity,
            slots: (0..capacity).map(|_| KeySession::empty()).collect(),
        }
    }

    fn find(&self, peer_tid: u32) -> Option<usize> {
        self.slots
            .iter()
            .position(|s| s.state != KeyMgrState::Empty && s.peer_tid == peer_tid)
    }

    fn find_by_session_id(&self, session_id: [u8; SESSION_ID_SIZE]) -> Option<usize> {
        self.slots.iter().position(|s| {
            s.ake
                .as_ref()
                .and_then(Ake3dhSession::session_id)
                .is_some_and(|id| id == session_id)
        })
    }

    fn find_free(&self) -> Option<usize> {
        self.slots.iter().position(|s| s.state == KeyMgrState::Empty)
    }

    /// Ask the manager to start managing `peer_tid` (called once the
    /// neighbour table moves that peer from NEW to VALID).
    pub fn manage(&mut self, peer_tid: u32) -> Result<(), KeyMgrError> {
        if self.find(peer_tid).is_some() {
            return Ok(());
        }
        let idx = self.find_free().ok_or(KeyMgrError::TableFull)?;
        self.slots[idx] = KeySession::empty();
        self.slots[idx].peer_tid = peer_tid;
        self.slots[idx].set_state(KeyMgrState::New);
        Ok(())
    }

    /// Find the MANAGED session for `peer_tid` with the greatest remaining
    /// lifetime (there is normally at most one).
    fn find_managed(&self, peer_tid: u32) -> Option<&KeySession> {
        self.slots
            .iter()
            .filter(|s| s.state == KeyMgrState::Managed && s.peer_tid == peer_tid)
            .max_by_key(|s| s.state_timeout_ms)
    }

    /// RX key for `peer_tid`, if a MANAGED session exists.
    #[must_use]
    pub fn rx_key(&self, peer_tid: u32) -> Option<[u8; 32]> {
        self.find_managed(peer_tid).and_then(|s| s.master_rx_key)
    }

    /// TX key for `peer_tid`, if a MANAGED session exists.
    #[must_use]
    pub fn tx_key(&self, peer_tid: u32) -> Option<[u8; 32]> {
        self.find_managed(peer_tid).and_then(|s| s.master_tx_key)
    }

    /// Snapshot every non-empty slot, for introspection.
    pub fn sessions(&self) -> impl Iterator<Item = SessionSnapshot> + '_ {
        self.slots.iter().filter(|s| s.state != KeyMgrState::Empty).map(|s| SessionSnapshot {
            peer_tid: s.peer_tid,
            state: s.state,
            state_timeout_ms: s.state_timeout_ms,
        })
    }

    /// Advance every slot by `dt_ms`: apply state-timeout transitions, start
    /// 3DH sessions for NEW slots, tick in-progress 3DH sessions, and
    /// promote AUTH straight to MANAGED (§4.6's policy-placeholder skip of
    /// identity-hash recording).
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
        rng: &mut R,
        local_tid: u32,
    ) {
        if self.slots[idx].state == KeyMgrState::Empty {
            return;
        }

        self.apply_timeout(idx, dt_ms);

        if self.slots[idx].state == KeyMgrState::New {
            self.start_ake(idx, rng);
        }

        if self.slots[idx].state == KeyMgrState::InitialAke {
            self.tick_ake(idx, dt_ms, mac, keys, rng, local_tid);
        }

        if self.slots[idx].state == KeyMgrState::Auth {
            self.promote_to_managed(idx);
        }
    }

    fn apply_timeout(&mut self, idx: usize, dt_ms: u32) {
        let slot = &mut self.slots[idx];
        if slot.state_timeout_ms > dt_ms {
            slot.state_timeout_ms -= dt_ms;
            return;
        }
        slot.state_timeout_ms = 0;
        match slot.state {
            KeyMgrState::New
            | KeyMgrState::Auth
            | KeyMgrState::Nauth
            | KeyMgrState::Autz
            | KeyMgrState::Nautz
            | KeyMgrState::Expired => slot.set_state(KeyMgrState::Old),
            KeyMgrState::InitialAke => {
                slot.ake = None;
                slot.set_state(KeyMgrState::Nauth);
            }
            KeyMgrState::Managed => slot.set_state(KeyMgrState::Expired),
            KeyMgrState::Old => *slot = KeySession::empty(),
            KeyMgrState::Empty => {}
        }
    }

    /// Start a 3DH session for a NEW slot, "if allocatable" (§4.6) — i.e. if
    /// the RNG has entropy to seed it with; otherwise the slot stays NEW and
    /// falls to OLD on its own state-timeout (spec.md §8 scenario 5).
    fn start_ake<R: Rng>(&mut self, idx: usize, rng: &R) {
        if !rng.available() {
            return;
        }
        let slot = &mut self.slots[idx];
        slot.ake = Some(Ake3dhSession::new(self.identity.isk, self.identity.ipk, None));
        slot.set_state(KeyMgrState::InitialAke);
    }

    fn tick_ake<M: Mac, K: NeighbourKeys, R: Rng>(
        &mut self,
        idx: usize,
        dt_ms: u32,
        mac: &mut M,
        keys: &mut K,
        rng: &mut R,
        local_tid: u32,
    ) {
        let peer_tid = self.slots[idx].peer_tid;
        let Some(ake) = self.slots[idx].ake.as_mut() else {
            self.slots[idx].set_state(KeyMgrState::Nauth);
            return;
        };

        let step_result = ake.step(dt_ms, rng);
        let output = match step_result {
            Ok(output) => output,
            Err(e) => {
                warn!(peer = peer_tid, error = %e, "keymgr: 3DH step failed");
                self.slots[idx].set_state(KeyMgrState::Nauth);
                return;
            }
        };

        for msg in output.send {
            send_ake_message(mac, keys, local_tid, peer_tid, &msg);
        }

        let ake = self.slots[idx].ake.as_ref().expect("checked above");
        match ake.result {
            AkeResult::Ok => {
                self.slots[idx].master_tx_key = ake.master_tx_key();
                self.slots[idx].master_rx_key = ake.master_rx_key();
                self.slots[idx].set_state(KeyMgrState::Auth);
            }
            AkeResult::Failed => self.slots[idx].set_state(KeyMgrState::Nauth),
            AkeResult::None => {}
        }
    }

    fn promote_to_managed(&mut self, idx: usize) {
        let slot = &mut self.slots[idx];
        slot.ake = None;
        slot.set_state(KeyMgrState::Managed);
        debug!(peer = slot.peer_tid, "keymgr: session MANAGED");
    }

    /// Handle an inbound keymgr L3 message: route by embedded session id,
    /// allocating and seeding a new session if none matches (§4.6).
    pub fn receive<M: Mac, K: NeighbourKeys, R: Rng>(
        &mut self,
        src_tid: u32,
        payload: &[u8],
        mac: &mut M,
        keys: &mut K,
        rng: &mut R,
        local_tid: u32,
    ) -> Result<(), KeyMgrError> {
        let msg = messages::decode(payload)?;

        let idx = match self.find_by_session_id(msg.session_id) {
            Some(idx) => idx,
            None => {
                let idx = self.find_free().ok_or(KeyMgrError::TableFull)?;
                self.slots[idx] = KeySession::empty();
                self.slots[idx].peer_tid = src_tid;
                self.slots[idx].ake = Some(Ake3dhSession::new(
                    self.identity.isk,
                    self.identity.ipk,
                    Some(msg.session_id),
                ));
                self.slots[idx].set_state(KeyMgrState::InitialAke);
                trace!(peer = src_tid, "keymgr: new session seeded from peer");
                idx
            }
        };

        if let Some(ake) = self.slots[idx].ake.as_mut() {
            ake.receive(&msg.content)?;
        }

        self.tick_ake(idx, 0, mac, keys, rng, local_tid);
        Ok(())
    }
}

fn send_ake_message<M: Mac, K: NeighbourKeys>(
    mac: &mut M,
    keys: &mut K,
    local_tid: u32,
    peer_tid: u32,
    msg: &AkeMessage,
) {
    let payload = messages::encode(msg);
    let result = send_frame(
        mac,
        keys,
        local_tid,
        SecurityClass::Verify,
        false,
        Some(peer_tid),
        PROTO_KEYMGR,
        false,
        &payload,
    );
    if let Err(e) = result {
        warn!(peer = peer_tid, error = %e, "keymgr: send failed");
    }
}

/// `L3Handler` adapter dispatching received keymgr frames into a
/// [`KeyManager`] shared with the composition layer.
pub struct KeyMgrHandler<'a, M, K, R> {
    manager: &'a std::cell::RefCell<KeyManager>,
    mac: &'a std::cell::RefCell<M>,
    keys: &'a std::cell::RefCell<K>,
    rng: &'a std::cell::RefCell<R>,
    local_tid: u32,
}

impl<'a, M: Mac, K: NeighbourKeys, R: Rng> KeyMgrHandler<'a, M, K, R> {
    /// Build a handler over shared manager/MAC/keys/RNG state.
    #[must_use]
    pub fn new(
        manager: &'a std::cell::RefCell<KeyManager>,
        mac: &'a std::cell::RefCell<M>,
        keys: &'a std::cell::RefCell<K>,
        rng: &'a std::cell::RefCell<R>,
        local_tid: u32,
    ) -> Self {
        Self {
            manager,
            mac,
            keys,
            rng,
            local_tid,
        }
    }
}

impl<M: Mac, K: NeighbourKeys, R: Rng> L3Handler for KeyMgrHandler<'_, M, K, R> {
    fn on_receive(&mut self, msg: L3Message) {
        let result = self.manager.borrow_mut().receive(
            msg.src_tid,
            &msg.payload,
            &mut *self.mac.borrow_mut(),
            &mut *self.keys.borrow_mut(),
            &mut *self.rng.borrow_mut(),
            self.local_tid,
        );
        if let Err(e) = result {
            trace!(src = msg.src_tid, error = %e, "keymgr: receive failed");
        }
    }
}
