//! Errors surfaced by the file-transfer engine (C7, §7).

use thiserror::Error;

/// Failures the file-transfer engine can report upward.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FileTransferError {
    /// Every session-table slot is occupied.
    #[error("no free file-transfer session slot")]
    TableFull,

    /// Every piece-cache slot in a session is occupied.
    #[error("no free piece-cache slot")]
    NoFreePieceSlot,

    /// `send_file`/`receive_file` was called on a session not in PREPARED.
    #[error("session is not in PREPARED state")]
    NotPrepared,

    /// A wire message was too short, carried an oversized field, or used an
    /// unknown tag.
    #[error("malformed file-transfer message")]
    MalformedMessage,

    /// The file backend reported a failure opening, reading, writing, or
    /// closing the transfer's file.
    #[error("file backend callback failed")]
    BackendFailed,

    /// A piece or block index referenced by a peer message is out of range
    /// for the session's file geometry.
    #[error("piece or block index out of range")]
    IndexOutOfRange,
}
