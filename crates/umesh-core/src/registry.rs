//! Fixed 16-slot L3 protocol registry (C10).
//!
//! Protocol numbers are fixed by §6: 0 = neighbour discovery, 1 = key
//! manager, 2 = file transfer, 3 = status. The remaining slots are reserved
//! for extension but never grown dynamically (§5 resource policy).

use crate::error::RoutingError;
use crate::frame::SecurityMode;
use crate::mac::PacketInfo;

/// Protocol number for neighbour discovery (C4).
pub const PROTO_DISCOVERY: u8 = 0;
/// Protocol number for the key manager / 3DH AKE (C5, C6).
pub const PROTO_KEYMGR: u8 = 1;
/// Protocol number for the file-transfer engine (C7).
pub const PROTO_FILE_TRANSFER: u8 = 2;
/// Protocol number for the status broadcaster (C11).
pub const PROTO_STATUS: u8 = 3;

/// Total registry capacity (§6).
pub const MAX_PROTOCOLS: usize = 16;

/// A decoded, routed inbound message handed to an L3 protocol handler.
#[derive(Debug, Clone)]
pub struct L3Message {
    /// Source TID of the frame.
    pub src_tid: u32,
    /// Whether `src_tid` is a known neighbour.
    pub known_neighbour: bool,
    /// Receive-side metadata.
    pub info: PacketInfo,
    /// The security mode the frame was received under, so handlers that
    /// require a minimum guarantee (e.g. discovery rejecting plain-mode
    /// advertisements) can check it.
    pub security_mode: SecurityMode,
    /// Decrypted/verified payload.
    pub payload: Vec<u8>,
}

/// Implemented by each L3 protocol's receive side.
pub trait L3Handler {
    /// Handle one routed, decoded message.
    fn on_receive(&mut self, msg: L3Message);
}

/// Fixed-capacity table mapping protocol ids to handlers.
pub struct ProtocolRegistry {
    handlers: [Option<Box<dyn L3Handler>>; MAX_PROTOCOLS],
}

impl Default for ProtocolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ProtocolRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            handlers: std::array::from_fn(|_| None),
        }
    }

    /// Register a handler for `proto_id` (0-15), replacing any previous one.
    ///
    /// # Panics
    ///
    /// Panics if `proto_id >= 16`; callers only ever pass the fixed
    /// constants above or values already validated by frame decoding.
    pub fn register(&mut self, proto_id: u8, handler: Box<dyn L3Handler>) {
        self.handlers[proto_id as usize] = Some(handler);
    }

    /// Dispatch `msg` to the handler registered for `proto_id`.
    pub fn dispatch(&mut self, proto_id: u8, msg: L3Message) -> Result<(), RoutingError> {
        match self.handlers.get_mut(proto_id as usize) {
            Some(Some(handler)) => {
                handler.on_receive(msg);
                Ok(())
            }
            _ => Err(RoutingError::UnknownProtocol(proto_id)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Counter(usize);
    impl L3Handler for Counter {
        fn on_receive(&mut self, _msg: L3Message) {
            self.0 += 1;
        }
    }

    #[test]
    fn dispatch_routes_to_registered_handler() {
        let mut registry = ProtocolRegistry::new();
        registry.register(PROTO_STATUS, Box::new(Counter(0)));
        let msg = L3Message {
            src_tid: 1,
            known_neighbour: true,
            info: PacketInfo::default(),
            security_mode: SecurityMode::Crc16Ccitt,
            payload: vec![1, 2, 3],
        };
        assert!(registry.dispatch(PROTO_STATUS, msg).is_ok());
    }

    #[test]
    fn dispatch_unknown_protocol_is_an_error() {
        let mut registry = ProtocolRegistry::new();
        let msg = L3Message {
            src_tid: 1,
            known_neighbour: false,
            info: PacketInfo::default(),
            security_mode: SecurityMode::None,
            payload: vec![],
        };
        assert!(matches!(
            registry.dispatch(9, msg),
            Err(RoutingError::UnknownProtocol(9))
        ));
    }

    #[test]
    fn registry_has_sixteen_slots() {
        let registry = ProtocolRegistry::new();
        assert_eq!(registry.handlers.len(), MAX_PROTOCOLS);
    }
}
