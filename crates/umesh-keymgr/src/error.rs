//! Errors surfaced by the key manager and 3DH engine.

use thiserror::Error;

/// Failures the key manager or 3DH engine can report upward.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyMgrError {
    /// Every session-table slot is occupied.
    #[error("no free key-manager session slot")]
    TableFull,

    /// A 3DH session was requested but no slot was free for it.
    #[error("no free 3DH session slot")]
    NoFreeAkeSlot,

    /// Two peers' ephemeral public keys compared equal; role assignment is
    /// undefined (§4.7 role rule explicitly calls this an error).
    #[error("peer ephemeral public key equals ours")]
    EphemeralKeysEqual,

    /// An `IPKResponse` carried an encrypted identity public key. The wire
    /// format allows this, but nothing in this engine can decrypt it.
    #[error("encrypted identity public key is not supported")]
    EncryptedIdentityKeyUnsupported,

    /// The RNG could not supply random bytes for a session id or ephemeral key.
    #[error("random number generation failed")]
    RandomFailed,

    /// X25519 or SHA-256 primitive failed (e.g. a rejected low-order point).
    #[error("crypto primitive failed: {0}")]
    Crypto(#[from] umesh_crypto::CryptoError),

    /// A wire message was too short or otherwise malformed.
    #[error("malformed key-manager message")]
    MalformedMessage,
}
