//! Core error types (§4.1, §4.5, §7).
//!
//! Parse and routing failures are never surfaced to the peer (§7): the
//! receive path logs and drops. Only resource exhaustion and MAC-busy
//! conditions propagate upward as a `Result` the caller must act on.

use thiserror::Error;

/// Failures decoding or encoding a wire frame (C1).
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    /// The control byte(s) could not be read: zero-length input.
    #[error("control field: no data")]
    ParseControlNoData,

    /// The second control byte has its `ext` bit set, which is malformed.
    #[error("control field: unfinished (ext bit set on second byte)")]
    ParseControlUnfinished,

    /// A variable-length TID exceeded the 5-byte maximum.
    #[error("TID field: encoding too big")]
    ParseTidTooBig,

    /// A variable-length TID was truncated before its terminating byte.
    #[error("TID field: no data")]
    ParseTidNoData,

    /// Declared payload size exceeds the 120-byte limit.
    #[error("payload: too big ({0} bytes, max 120)")]
    ParseDataTooBig(usize),

    /// The security algorithm id named in the control field is not implemented.
    #[error("payload: unsupported security mode {0}")]
    ParseDataUnsupported(u8),

    /// Integrity check (CRC) or authenticated decryption (Poly1305/HMAC) failed.
    #[error("payload: authentication/integrity check failed")]
    ParseDataAeFailed,

    /// The frame was too short to even contain a header.
    #[error("frame shorter than minimum header")]
    TooShort,

    /// A cryptographic primitive failed unexpectedly.
    #[error(transparent)]
    Crypto(#[from] umesh_crypto::CryptoError),
}

/// Failures routing or dispatching a decoded frame (C8, C10).
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RoutingError {
    /// Destination TID matched neither the local current nor previous TID,
    /// and the frame was not broadcast.
    #[error("frame not addressed to this node")]
    NotForUs,

    /// L3 protocol id has no registered handler.
    #[error("no handler registered for L3 protocol {0}")]
    UnknownProtocol(u8),

    /// Decoded payload was empty; valid but uninteresting per §4.4 step 6.
    #[error("empty payload after successful decode")]
    EmptyPayload,
}

/// Failures preparing or handing off an outbound frame (C9).
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SendError {
    /// Neither an explicit destination nor the broadcast flag was set.
    #[error("no destination: not broadcast and no DTID")]
    NoDestination,

    /// The local TID is still zero; nothing to use as the source.
    #[error("local TID not yet allocated")]
    NoLocalTid,

    /// Payload exceeds the 120-byte limit.
    #[error("payload too big ({0} bytes, max 120)")]
    PayloadTooBig(usize),

    /// No key-manager session is MANAGED for this destination, so
    /// authenticated encryption cannot be used.
    #[error("no managed session for destination TID {0}")]
    NoManagedSession(u32),

    /// The MAC rejected the frame (saturated / not ready).
    #[error("MAC busy")]
    MacBusy,

    /// Framing error while assembling the outbound buffer.
    #[error(transparent)]
    Frame(#[from] FrameError),
}
