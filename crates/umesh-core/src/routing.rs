//! The seam between L2 send/receive (C8, C9) and the neighbour/key-manager
//! state the discovery and key-manager crates own (§9: "replace cyclic
//! references... with an arena + index scheme" — from the core's point of
//! view that arena is reached only through this trait, never directly).

use crate::mac::PacketInfo;

/// Per-neighbour key and counter state the send/receive paths need, without
/// the core depending on `umesh-discovery`'s concrete `NeighbourTable`.
pub trait NeighbourKeys {
    /// Whether `tid` has a neighbour-table entry (sets the receive path's
    /// "known neighbour" bit, §3).
    fn is_known(&self, tid: u32) -> bool;

    /// The RX key for decrypting frames from `tid`, if a MANAGED key-manager
    /// session exists for it.
    fn rx_key(&self, tid: u32) -> Option<[u8; 32]>;

    /// The TX key for `tid` plus the nonce to use for this send, advancing
    /// the neighbour's per-key TX counter (§4.5, §5: "strictly monotone
    /// across successful sends").
    fn take_tx_key_and_nonce(&mut self, tid: u32) -> Option<([u8; 32], u16)>;

    /// Update RSSI/FEI and clear unreachable-time for a known neighbour
    /// (§4.3 receive handling), inserting a new NEW-state record if unknown.
    fn note_reception(&mut self, tid: u32, info: PacketInfo);

    /// Increment the drop counter for `tid` if it is a known neighbour
    /// (§4.4: "statistics are updated on both success and drop paths").
    fn record_drop(&mut self, tid: u32);
}
