//! Single-hop TID discovery task (C4), grounded on the advertisement and
//! TID-rotation logic described for the neighbour table's driving task.

use tracing::{debug, trace, warn};

use umesh_core::frame::SecurityClass;
use umesh_core::mac::{Mac, Rng};
use umesh_core::registry::{L3Handler, L3Message, PROTO_DISCOVERY};
use umesh_core::routing::NeighbourKeys;
use umesh_core::send::send_frame;
use umesh_core::frame::SecurityMode;

use crate::nbtable::NeighbourTable;

/// Tick cadence this task is designed to be driven at.
pub const STEP_INTERVAL_MS: u32 = 100;

/// How often an `ADV_BASIC` broadcast is sent.
pub const ADV_BASIC_INTERVAL_MS: u32 = 1_000;

/// How long a TID is used before it is rotated out.
pub const TID_ROTATION_MS: u32 = 3_600_000;

/// A single marker byte; `ADV_BASIC` carries no information beyond the
/// frame's own source TID, but the receive path drops empty payloads.
const ADV_BASIC_PAYLOAD: [u8; 1] = [0x01];

/// Drives local TID allocation/rotation and periodic advertisement.
pub struct DiscoveryTask {
    current_tid: u32,
    previous_tid: u32,
    tid_age_ms: u32,
    last_adv_basic_ms: u32,
}

impl Default for DiscoveryTask {
    fn default() -> Self {
        Self::new()
    }
}

impl DiscoveryTask {
    /// A task with no TID allocated yet; one will be drawn from the RNG on
    /// the first step.
    #[must_use]
    pub fn new() -> Self {
        Self {
            current_tid: 0,
            previous_tid: 0,
            tid_age_ms: 0,
            last_adv_basic_ms: 0,
        }
    }

    /// The TID this node currently identifies itself as.
    #[must_use]
    pub fn current_tid(&self) -> u32 {
        self.current_tid
    }

    /// The TID this node identified as before the last rotation; frames
    /// addressed to either are accepted (§4.4 routing check).
    #[must_use]
    pub fn previous_tid(&self) -> u32 {
        self.previous_tid
    }

    /// Advance TID allocation/rotation and advertisement timers by `dt_ms`,
    /// broadcasting `ADV_BASIC` when the advertisement cadence elapses.
    pub fn step<M: Mac, R: Rng, K: NeighbourKeys>(
        &mut self,
        dt_ms: u32,
        mac: &mut M,
        rng: &mut R,
        keys: &mut K,
    ) {
        if self.current_tid == 0 {
            self.current_tid = rng.random_nonzero_u32();
            debug!(tid = self.current_tid, "discovery: allocated local TID");
        }

        self.tid_age_ms += dt_ms;
        if self.tid_age_ms >= TID_ROTATION_MS {
            self.previous_tid = self.current_tid;
            self.current_tid = 0;
            self.tid_age_ms = 0;
            debug!(previous = self.previous_tid, "discovery: rotating local TID");
        }

        self.last_adv_basic_ms += dt_ms;
        if self.last_adv_basic_ms >= ADV_BASIC_INTERVAL_MS && self.current_tid != 0 {
            self.last_adv_basic_ms = 0;
            let result = send_frame(
                mac,
                keys,
                self.current_tid,
                SecurityClass::Verify,
                true,
                None,
                PROTO_DISCOVERY,
                false,
                &ADV_BASIC_PAYLOAD,
            );
            if let Err(e) = result {
                warn!(error = %e, "discovery: ADV_BASIC send failed");
            } else {
                trace!(tid = self.current_tid, "discovery: ADV_BASIC sent");
            }
        }
    }
}

/// `L3Handler` adapter dispatching received `ADV_BASIC` frames into a
/// [`NeighbourTable`]. Held by the composition layer that owns the table,
/// since the table is also consulted outside the receive path (by the key
/// manager's `manage()` entry point and by introspection).
pub struct AdvBasicHandler<'a> {
    table: &'a std::cell::RefCell<NeighbourTable>,
}

impl<'a> AdvBasicHandler<'a> {
    /// Build a handler over a shared neighbour table.
    #[must_use]
    pub fn new(table: &'a std::cell::RefCell<NeighbourTable>) -> Self {
        Self { table }
    }
}

impl L3Handler for AdvBasicHandler<'_> {
    fn on_receive(&mut self, msg: L3Message) {
        if msg.security_mode == SecurityMode::None || msg.security_mode.is_encrypted() {
            trace!(
                src = msg.src_tid,
                "discovery: ADV_BASIC must be verify-only, dropping"
            );
            return;
        }
        self.table.borrow_mut().note_reception(msg.src_tid, msg.info);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use umesh_core::mac::test_support::LoopbackMac;
    use umesh_core::mac::PacketInfo;

    #[derive(Default)]
    struct FixedRng(u32);
    impl Rng for FixedRng {
        fn fill(&mut self, buf: &mut [u8]) {
            buf.copy_from_slice(&self.0.to_be_bytes()[..buf.len().min(4)]);
        }
        fn random_nonzero_u32(&mut self) -> u32 {
            self.0
        }
    }

    #[derive(Default)]
    struct FakeKeys;
    impl NeighbourKeys for FakeKeys {
        fn is_known(&self, _tid: u32) -> bool {
            false
        }
        fn rx_key(&self, _tid: u32) -> Option<[u8; 32]> {
            None
        }
        fn take_tx_key_and_nonce(&mut self, _tid: u32) -> Option<([u8; 32], u16)> {
            None
        }
        fn note_reception(&mut self, _tid: u32, _info: PacketInfo) {}
        fn record_drop(&mut self, _tid: u32) {}
    }

    #[test]
    fn allocates_tid_on_first_step() {
        let mut task = DiscoveryTask::new();
        let mut mac = LoopbackMac::default();
        let mut rng = FixedRng(42);
        let mut keys = FakeKeys;
        task.step(10, &mut mac, &mut rng, &mut keys);
        assert_eq!(task.current_tid(), 42);
    }

    #[test]
    fn broadcasts_adv_basic_at_cadence() {
        let mut task = DiscoveryTask::new();
        let mut mac = LoopbackMac::default();
        let mut rng = FixedRng(42);
        let mut keys = FakeKeys;
        task.step(500, &mut mac, &mut rng, &mut keys);
        assert!(mac.sent.is_empty());
        task.step(600, &mut mac, &mut rng, &mut keys);
        assert_eq!(mac.sent.len(), 1);
    }

    #[test]
    fn rotates_tid_after_rotation_interval() {
        let mut task = DiscoveryTask::new();
        let mut mac = LoopbackMac::default();
        let mut rng = FixedRng(42);
        let mut keys = FakeKeys;
        task.step(1, &mut mac, &mut rng, &mut keys);
        assert_eq!(task.current_tid(), 42);
        task.step(TID_ROTATION_MS, &mut mac, &mut rng, &mut keys);
        assert_eq!(task.previous_tid(), 42);
        assert_eq!(task.current_tid(), 0);
    }

    #[test]
    fn adv_basic_updates_neighbour_table() {
        let table = RefCell::new(NeighbourTable::new(4));
        let mut handler = AdvBasicHandler::new(&table);
        handler.on_receive(L3Message {
            src_tid: 99,
            known_neighbour: false,
            info: PacketInfo::default(),
            security_mode: SecurityMode::Crc16Ccitt,
            payload: vec![0x01],
        });
        assert!(table.borrow().is_known(99));
    }

    #[test]
    fn plain_mode_adv_basic_is_rejected() {
        let table = RefCell::new(NeighbourTable::new(4));
        let mut handler = AdvBasicHandler::new(&table);
        handler.on_receive(L3Message {
            src_tid: 99,
            known_neighbour: false,
            info: PacketInfo::default(),
            security_mode: SecurityMode::None,
            payload: vec![0x01],
        });
        assert!(!table.borrow().is_known(99));
    }
}
