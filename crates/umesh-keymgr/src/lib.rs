//! Key manager session table and Triple Diffie-Hellman AKE for uMeshFw.
//!
//! [`session::KeyManager`] (C5) owns a fixed table of per-peer sessions,
//! each driving an [`ake3dh::Ake3dhSession`] (C6) through the handshake
//! before promoting it to MANAGED, the only state usable for encryption.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod ake3dh;
pub mod error;
pub mod messages;
pub mod session;

pub use ake3dh::{Ake3dhSession, AkeResult, Role};
pub use error::KeyMgrError;
pub use session::{Identity, KeyMgrHandler, KeyMgrState, KeyManager, SessionSnapshot};
