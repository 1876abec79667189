//! Neighbour table and single-hop TID discovery for uMeshFw.
//!
//! Owns the peer-facing half of neighbour tracking: the fixed-capacity
//! [`nbtable::NeighbourTable`] (C3) and the [`discovery::DiscoveryTask`]
//! that allocates/rotates this node's own TID and keeps the table fed from
//! `ADV_BASIC` broadcasts (C4). Key material for a neighbour lives in
//! `umesh-keymgr`; this crate never computes or stores key bytes.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod discovery;
pub mod nbtable;

pub use discovery::DiscoveryTask;
pub use nbtable::{NeighbourRecord, NeighbourState, NeighbourTable};
