//! Chunked, reliable file transfer for uMeshFw (C7).
//!
//! A transfer moves one file between two nodes as a sequence of pieces, each
//! split into fixed-size blocks tracked with a sparse missing-block bitmap.
//! Nothing here touches a filesystem directly: file access is injected
//! through [`session::FileBackend`] (locally-initiated transfers) or
//! [`session::FileBackendFactory`] (peer-initiated ones), and transport goes
//! through [`umesh_core::send::send_frame`] like every other L3 protocol.
//!
//! - [`messages`]: the wire encoding for `FileRequest`/`FileMetadata`/
//!   `BlockRequest`/`BlockResponse`
//! - [`session`]: the session-table state machine and its `L3Handler`
//!   adapter, driven at a 50 ms cadence
//! - [`error`]: error types shared across the above

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod messages;
pub mod session;

pub use error::FileTransferError;
pub use messages::{FtContent, FtMessage};
pub use session::{
    FileBackend, FileBackendFactory, FileTransferHandler, FileTransferTable, FtSession, FtState,
    PIECE_CACHE_COUNT, STEP_INTERVAL_MS,
};
