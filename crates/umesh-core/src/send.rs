//! L2 send path (C9, §4.5).

use tracing::trace;

use crate::error::SendError;
use crate::frame::{self, SecurityClass, SecurityMode, MAX_PAYLOAD};
use crate::mac::Mac;
use crate::routing::NeighbourKeys;

/// Pick the concrete security mode for a requested class, given the
/// concrete tag-length family in use (§4.5: "class picks integrity vs.
/// confidentiality, the session's cipher suite picks the family").
fn mode_for_class(class: SecurityClass, prefer_aes: bool, short_tag: bool) -> SecurityMode {
    match class {
        SecurityClass::None => SecurityMode::None,
        SecurityClass::Verify => {
            if short_tag {
                SecurityMode::Crc16Ccitt
            } else {
                SecurityMode::Crc32
            }
        }
        SecurityClass::AuthenticatedEncrypted => match (prefer_aes, short_tag) {
            (false, true) => SecurityMode::ChaCha20Poly1305Tag2,
            (false, false) => SecurityMode::ChaCha20Poly1305Tag4,
            (true, true) => SecurityMode::Aes128HmacSha256Tag2,
            (true, false) => SecurityMode::Aes128HmacSha256Tag4,
        },
    }
}

/// Encode and hand a frame to the MAC, per §4.5's 5-step algorithm:
///
/// 1. reject payloads over [`MAX_PAYLOAD`]
/// 2. unicast frames need a destination
/// 3. `local_tid` must already be allocated
/// 4. broadcast always downgrades a requested authenticated-encrypted class
///    to verify-only (no per-neighbour key exists to encrypt a broadcast)
/// 5. encode, then hand to the MAC; a busy MAC is reported, not retried
#[allow(clippy::too_many_arguments)]
pub fn send_frame<M: Mac, K: NeighbourKeys>(
    mac: &mut M,
    keys: &mut K,
    local_tid: u32,
    class: SecurityClass,
    broadcast: bool,
    dest_tid: Option<u32>,
    l3_protocol: u8,
    prefer_aes: bool,
    payload: &[u8],
) -> Result<(), SendError> {
    if payload.len() > MAX_PAYLOAD {
        return Err(SendError::PayloadTooBig(payload.len()));
    }

    if local_tid == 0 {
        return Err(SendError::NoLocalTid);
    }

    if !broadcast && dest_tid.is_none() {
        return Err(SendError::NoDestination);
    }

    let effective_class = if broadcast {
        match class {
            SecurityClass::AuthenticatedEncrypted => SecurityClass::Verify,
            other => other,
        }
    } else {
        class
    };

    let (mode, key, nonce) = if broadcast {
        let short_tag = true;
        (mode_for_class(effective_class, prefer_aes, short_tag), None, 0)
    } else {
        let dest = dest_tid.expect("checked above");
        match effective_class {
            SecurityClass::AuthenticatedEncrypted => {
                let (key, nonce) = keys
                    .take_tx_key_and_nonce(dest)
                    .ok_or(SendError::NoManagedSession(dest))?;
                (
                    mode_for_class(effective_class, prefer_aes, false),
                    Some(key),
                    nonce,
                )
            }
            _ => (mode_for_class(effective_class, prefer_aes, true), None, 0),
        }
    };

    let frame = frame::encode(
        broadcast,
        dest_tid,
        local_tid,
        mode,
        l3_protocol,
        nonce,
        key.as_ref().map(|k| k.as_slice()),
        payload,
    )?;

    if !mac.send(&frame) {
        trace!(dest = ?dest_tid, "send: mac busy");
        return Err(SendError::MacBusy);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mac::test_support::LoopbackMac;
    use crate::mac::PacketInfo;
    use crate::registry::PROTO_STATUS;
    use std::collections::HashMap;

    #[derive(Default)]
    struct FakeKeys {
        tx: HashMap<u32, ([u8; 32], u16)>,
    }

    impl NeighbourKeys for FakeKeys {
        fn is_known(&self, _tid: u32) -> bool {
            false
        }
        fn rx_key(&self, _tid: u32) -> Option<[u8; 32]> {
            None
        }
        fn take_tx_key_and_nonce(&mut self, tid: u32) -> Option<([u8; 32], u16)> {
            self.tx.get_mut(&tid).map(|(key, nonce)| {
                let current = *nonce;
                *nonce += 1;
                (*key, current)
            })
        }
        fn note_reception(&mut self, _tid: u32, _info: PacketInfo) {}
        fn record_drop(&mut self, _tid: u32) {}
    }

    #[test]
    fn broadcast_downgrades_ae_to_verify() {
        let mut mac = LoopbackMac::default();
        let mut keys = FakeKeys::default();
        send_frame(
            &mut mac,
            &mut keys,
            1,
            SecurityClass::AuthenticatedEncrypted,
            true,
            None,
            PROTO_STATUS,
            false,
            b"battery=91",
        )
        .unwrap();
        assert_eq!(mac.sent.len(), 1);
        let decoded = frame::decode(&mac.sent[0], None).unwrap();
        assert_eq!(decoded.security_mode, SecurityMode::Crc16Ccitt);
    }

    #[test]
    fn unicast_ae_without_session_is_rejected() {
        let mut mac = LoopbackMac::default();
        let mut keys = FakeKeys::default();
        let result = send_frame(
            &mut mac,
            &mut keys,
            1,
            SecurityClass::AuthenticatedEncrypted,
            false,
            Some(5),
            PROTO_STATUS,
            false,
            b"x",
        );
        assert!(matches!(result, Err(SendError::NoManagedSession(5))));
    }

    #[test]
    fn unicast_ae_with_session_encrypts_and_advances_nonce() {
        let mut mac = LoopbackMac::default();
        let mut keys = FakeKeys::default();
        keys.tx.insert(5, ([0x42u8; 32], 100));

        send_frame(
            &mut mac,
            &mut keys,
            1,
            SecurityClass::AuthenticatedEncrypted,
            false,
            Some(5),
            PROTO_STATUS,
            false,
            b"hello",
        )
        .unwrap();

        let decoded = frame::decode(&mac.sent[0], Some(&[0x42u8; 32])).unwrap();
        assert_eq!(decoded.payload, b"hello");
        assert_eq!(decoded.nonce, 100);
        assert_eq!(keys.tx[&5].1, 101);
    }

    #[test]
    fn oversized_payload_rejected_before_touching_mac() {
        let mut mac = LoopbackMac::default();
        let mut keys = FakeKeys::default();
        let payload = vec![0u8; MAX_PAYLOAD + 1];
        let result = send_frame(
            &mut mac,
            &mut keys,
            1,
            SecurityClass::None,
            true,
            None,
            PROTO_STATUS,
            false,
            &payload,
        );
        assert!(matches!(result, Err(SendError::PayloadTooBig(_))));
        assert!(mac.sent.is_empty());
    }

    #[test]
    fn unicast_without_destination_rejected() {
        let mut mac = LoopbackMac::default();
        let mut keys = FakeKeys::default();
        let result = send_frame(
            &mut mac,
            &mut keys,
            1,
            SecurityClass::None,
            false,
            None,
            PROTO_STATUS,
            false,
            b"x",
        );
        assert!(matches!(result, Err(SendError::NoDestination)));
    }

    #[test]
    fn busy_mac_is_reported_not_retried() {
        let mut mac = LoopbackMac {
            busy: true,
            ..Default::default()
        };
        let mut keys = FakeKeys::default();
        let result = send_frame(
            &mut mac,
            &mut keys,
            1,
            SecurityClass::None,
            true,
            None,
            PROTO_STATUS,
            false,
            b"x",
        );
        assert!(matches!(result, Err(SendError::MacBusy)));
    }
}
