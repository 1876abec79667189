//! Cryptographic error types.

use thiserror::Error;

/// Errors surfaced by the primitive crypto operations.
///
/// Every variant here corresponds to a check the L2 framing layer (C1) needs
/// to perform before it can trust a frame; none of them carry enough detail
/// to build a reply to the peer, since the wire format never acknowledges
/// integrity failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CryptoError {
    /// CRC16/CRC32 trailer did not match the computed checksum.
    #[error("checksum mismatch")]
    ChecksumMismatch,

    /// Poly1305 or HMAC-SHA256 tag did not match.
    #[error("authentication tag mismatch")]
    AuthenticationFailed,

    /// A key, nonce, or tag buffer had the wrong length for the requested algorithm.
    #[error("invalid length: expected {expected}, got {actual}")]
    InvalidLength {
        /// Expected length in bytes.
        expected: usize,
        /// Actual length in bytes.
        actual: usize,
    },

    /// X25519 Diffie-Hellman produced a low-order (all-zero) shared secret.
    #[error("low-order point rejected")]
    LowOrderPoint,

    /// The system RNG could not supply random bytes.
    #[error("random number generation failed")]
    RandomFailed,
}
