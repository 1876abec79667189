//! L2 receive path (C8, §4.4).

use tracing::{debug, trace};

use crate::error::RoutingError;
use crate::frame::{self, FrameHeader, MAX_PAYLOAD};
use crate::mac::{Mac, MacRecv};
use crate::registry::{L3Message, ProtocolRegistry};
use crate::routing::NeighbourKeys;

/// Minimum frame length the receive path will attempt to parse (§4.4 step 2).
pub const MIN_FRAME_LEN: usize = 2;

/// Poll the MAC once and, if a frame was ready, run it through the full
/// receive pipeline: parse, authenticate/decrypt, route, dispatch.
///
/// Returns `None` if nothing was ready. A `Some(Err(_))` result means the
/// frame was dropped; per §7 this is never signalled to the peer, so callers
/// typically just log it (this function already does, at `debug`/`trace`).
pub fn receive_once<M: Mac, K: NeighbourKeys>(
    mac: &mut M,
    keys: &mut K,
    registry: &mut ProtocolRegistry,
    local_tid: u32,
    previous_tid: u32,
) -> Option<Result<(), RoutingError>> {
    let (buf, info) = match mac.recv() {
        MacRecv::Frame(buf, info) => (buf, info),
        MacRecv::NotReady => return None,
    };

    Some(route_frame(buf, info, keys, registry, local_tid, previous_tid))
}

/// The parse/authenticate/route/dispatch half of [`receive_once`], taking an
/// already-polled frame instead of owning the `Mac` poll itself.
///
/// Split out so a composition layer whose `L3Handler`s hold their own
/// `RefCell` reference to the same `Mac` (to send replies, e.g. the key
/// manager's AKE responses) can drop its own borrow of the `Mac` right after
/// polling it, before dispatch re-borrows it from inside a handler — holding
/// both across one call would deadlock the `RefCell` at runtime.
pub fn route_frame<K: NeighbourKeys>(
    buf: Vec<u8>,
    info: crate::mac::PacketInfo,
    keys: &mut K,
    registry: &mut ProtocolRegistry,
    local_tid: u32,
    previous_tid: u32,
) -> Result<(), RoutingError> {
    if buf.len() < MIN_FRAME_LEN || buf.len() > MAX_PAYLOAD {
        trace!(len = buf.len(), "receive: dropping out-of-range frame");
        return Err(RoutingError::NotForUs);
    }

    let header = match FrameHeader::parse(&buf) {
        Ok(h) => h,
        Err(e) => {
            debug!(error = %e, "receive: header parse failed");
            return Err(RoutingError::NotForUs);
        }
    };

    let known = keys.is_known(header.src_tid);
    if known {
        keys.note_reception(header.src_tid, info);
    }

    let key = if header.security_mode.is_encrypted() {
        keys.rx_key(header.src_tid)
    } else {
        None
    };

    let decoded = match frame::decode(&buf, key.as_ref().map(|k| k.as_slice())) {
        Ok(d) => d,
        Err(e) => {
            debug!(error = %e, src_tid = header.src_tid, "receive: decode failed, dropping");
            keys.record_drop(header.src_tid);
            return Err(RoutingError::NotForUs);
        }
    };

    let addressed_to_us =
        decoded.broadcast || decoded.dest_tid == Some(local_tid) || decoded.dest_tid == Some(previous_tid);
    if !addressed_to_us {
        trace!(dest = ?decoded.dest_tid, "receive: not addressed to us, dropping");
        keys.record_drop(header.src_tid);
        return Err(RoutingError::NotForUs);
    }

    if decoded.payload.is_empty() {
        return Err(RoutingError::EmptyPayload);
    }

    let msg = L3Message {
        src_tid: decoded.src_tid,
        known_neighbour: known,
        info,
        security_mode: header.security_mode,
        payload: decoded.payload,
    };

    registry.dispatch(decoded.l3_protocol, msg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::SecurityMode;
    use crate::mac::test_support::LoopbackMac;
    use crate::mac::PacketInfo;
    use crate::registry::{L3Handler, PROTO_STATUS};
    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::rc::Rc;

    #[derive(Default)]
    struct FakeKeys {
        known: HashMap<u32, bool>,
        rx_keys: HashMap<u32, [u8; 32]>,
        drops: HashMap<u32, u32>,
    }

    impl NeighbourKeys for FakeKeys {
        fn is_known(&self, tid: u32) -> bool {
            *self.known.get(&tid).unwrap_or(&false)
        }
        fn rx_key(&self, tid: u32) -> Option<[u8; 32]> {
            self.rx_keys.get(&tid).copied()
        }
        fn take_tx_key_and_nonce(&mut self, _tid: u32) -> Option<([u8; 32], u16)> {
            None
        }
        fn note_reception(&mut self, tid: u32, _info: PacketInfo) {
            self.known.insert(tid, true);
        }
        fn record_drop(&mut self, tid: u32) {
            *self.drops.entry(tid).or_insert(0) += 1;
        }
    }

    struct RecordingHandler(Rc<RefCell<Vec<L3Message>>>);
    impl L3Handler for RecordingHandler {
        fn on_receive(&mut self, msg: L3Message) {
            self.0.borrow_mut().push(msg);
        }
    }

    #[test]
    fn broadcast_frame_dispatches_without_neighbour_lookup() {
        let mut mac = LoopbackMac::default();
        let frame = frame::encode(
            true,
            None,
            77,
            SecurityMode::Crc16Ccitt,
            PROTO_STATUS,
            0,
            None,
            b"battery=91",
        )
        .unwrap();
        mac.inbox.push_back((frame, PacketInfo::default()));

        let mut keys = FakeKeys::default();
        let mut registry = ProtocolRegistry::new();
        let received = Rc::new(RefCell::new(Vec::new()));
        registry.register(PROTO_STATUS, Box::new(RecordingHandler(received.clone())));

        let outcome = receive_once(&mut mac, &mut keys, &mut registry, 1, 0);
        assert!(matches!(outcome, Some(Ok(()))));
        assert_eq!(received.borrow().len(), 1);
        assert_eq!(received.borrow()[0].src_tid, 77);
    }

    #[test]
    fn frame_not_addressed_to_us_is_dropped() {
        let mut mac = LoopbackMac::default();
        let frame = frame::encode(
            false,
            Some(999),
            5,
            SecurityMode::Crc16Ccitt,
            PROTO_STATUS,
            0,
            None,
            b"hi",
        )
        .unwrap();
        mac.inbox.push_back((frame, PacketInfo::default()));

        let mut keys = FakeKeys::default();
        let mut registry = ProtocolRegistry::new();
        let outcome = receive_once(&mut mac, &mut keys, &mut registry, 1, 0);
        assert!(matches!(outcome, Some(Err(RoutingError::NotForUs))));
    }

    #[test]
    fn unregistered_protocol_is_dropped() {
        let mut mac = LoopbackMac::default();
        let frame = frame::encode(true, None, 5, SecurityMode::None, 9, 0, None, b"x").unwrap();
        mac.inbox.push_back((frame, PacketInfo::default()));

        let mut keys = FakeKeys::default();
        let mut registry = ProtocolRegistry::new();
        let outcome = receive_once(&mut mac, &mut keys, &mut registry, 1, 0);
        assert!(matches!(
            outcome,
            Some(Err(RoutingError::UnknownProtocol(9)))
        ));
    }

    #[test]
    fn nothing_ready_returns_none() {
        let mut mac = LoopbackMac::default();
        let mut keys = FakeKeys::default();
        let mut registry = ProtocolRegistry::new();
        assert!(receive_once(&mut mac, &mut keys, &mut registry, 1, 0).is_none());
    }
}
