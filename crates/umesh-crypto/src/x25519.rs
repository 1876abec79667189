//! X25519 Diffie-Hellman key exchange (RFC 7748).
//!
//! Provides curve25519-based key exchange with:
//! - Low-order point rejection
//! - Automatic key clamping (RFC 7748)
//! - Zeroization of sensitive data

use rand_core::{CryptoRng, RngCore};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// X25519 private key (32 bytes).
#[derive(Clone, ZeroizeOnDrop, Zeroize)]
pub struct PrivateKey(x25519_dalek::StaticSecret);

/// X25519 public key (32 bytes).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PublicKey(x25519_dalek::PublicKey);

/// X25519 shared secret (32 bytes).
#[derive(ZeroizeOnDrop, Zeroize)]
pub struct SharedSecret(x25519_dalek::SharedSecret);

impl PrivateKey {
    /// Generate a new random private key with RFC 7748 clamping.
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        Self(x25519_dalek::StaticSecret::random_from_rng(rng))
    }

    /// Derive the public key from this private key.
    #[must_use]
    pub fn public_key(&self) -> PublicKey {
        PublicKey(x25519_dalek::PublicKey::from(&self.0))
    }

    /// Perform Diffie-Hellman key exchange.
    ///
    /// Returns `None` if the peer's public key is a low-order point (security check).
    #[must_use]
    pub fn exchange(&self, peer_public: &PublicKey) -> Option<SharedSecret> {
        let shared = self.0.diffie_hellman(&peer_public.0);

        // Check for low-order points
        if shared.as_bytes() == &[0u8; 32] {
            return None;
        }

        Some(SharedSecret(shared))
    }

    /// Export as bytes (for serialization).
    ///
    /// # Security
    ///
    /// The returned bytes contain the raw private key. Handle with care.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; 32] {
        self.0.to_bytes()
    }

    /// Import from bytes.
    #[must_use]
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(x25519_dalek::StaticSecret::from(bytes))
    }
}

impl PublicKey {
    /// Export public key as bytes.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; 32] {
        *self.0.as_bytes()
    }

    /// Import public key from bytes.
    #[must_use]
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(x25519_dalek::PublicKey::from(bytes))
    }

    /// Get bytes as a slice.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        self.0.as_bytes()
    }
}

impl SharedSecret {
    /// Get shared secret as bytes.
    ///
    /// # Security
    ///
    /// The shared secret is raw ECDH output. 3DH (§4.7) hashes three of
    /// these together with SHA-256 before using the result as a key.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        self.0.as_bytes()
    }
}

/// Curve25519 scalar multiplication: `out = sk * bp` (§4.2's `x25519(out, sk, bp)`).
///
/// Returns [`CryptoError::LowOrderPoint`] if the result is the all-zero
/// low-order point, per the same check `PrivateKey::exchange` performs.
pub fn x25519(sk: &[u8; 32], bp: &[u8; 32]) -> Result<[u8; 32], crate::CryptoError> {
    let private = PrivateKey::from_bytes(*sk);
    let public = PublicKey::from_bytes(*bp);
    private
        .exchange(&public)
        .map(|shared| *shared.as_bytes())
        .ok_or(crate::CryptoError::LowOrderPoint)
}
