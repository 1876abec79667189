//! Layer-2/layer-3 protocol core for uMeshFw, a packet-oriented mesh
//! networking stack for resource-constrained wireless nodes.
//!
//! This crate owns the parts shared by every higher-level protocol:
//!
//! - [`tid`]: variable-length temporary-identifier wire encoding (C1)
//! - [`frame`]: the L2 wire frame, its selectable integrity/encryption
//!   modes, and encode/decode (C2)
//! - [`mac`] / [`routing`]: the capability traits the send/receive paths
//!   are generic over, so the core never depends on a concrete radio
//!   driver or on the discovery/key-manager crates directly
//! - [`send`] / [`receive`]: the L2 send and receive pipelines (C8, C9)
//! - [`registry`]: the fixed 16-slot L3 protocol dispatch table (C10)
//! - [`status`]: the sensor/power status broadcaster (C11)
//! - [`error`]: error types shared across the above
//!
//! Neighbour discovery, the key manager, and file transfer live in their
//! own crates and plug into the receive path through [`registry`] and
//! into [`routing::NeighbourKeys`]; nothing in this crate reaches into
//! their concrete tables.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod error;
pub mod frame;
pub mod mac;
pub mod receive;
pub mod registry;
pub mod routing;
pub mod send;
pub mod status;
pub mod tid;

pub use error::{FrameError, RoutingError, SendError};
pub use frame::{DecodedFrame, FrameHeader, SecurityClass, SecurityMode, MAX_PAYLOAD};
pub use mac::{Mac, MacRecv, MacStatistics, PacketInfo, Rng};
pub use receive::receive_once;
pub use registry::{L3Handler, L3Message, ProtocolRegistry, MAX_PROTOCOLS};
pub use routing::NeighbourKeys;
pub use send::send_frame;
pub use tid::{decode_tid, encode_tid};
