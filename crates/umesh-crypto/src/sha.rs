//! SHA-256 / SHA-512 streaming hashes (C2) and the 3DH key-schedule helpers
//! built on top of them (C6 steps 9-10).

use sha2::{Digest, Sha256, Sha512};

/// SHA-256 digest output.
pub type Sha256Output = [u8; 32];

/// SHA-512 digest output.
pub type Sha512Output = [u8; 64];

/// One-shot SHA-256.
#[must_use]
pub fn sha256(data: &[u8]) -> Sha256Output {
    Sha256::digest(data).into()
}

/// One-shot SHA-512.
#[must_use]
pub fn sha512(data: &[u8]) -> Sha512Output {
    Sha512::digest(data).into()
}

/// Incremental SHA-256 hasher, for callers that assemble input across several
/// buffers (e.g. header + nonce + ciphertext for HMAC tag verification).
#[derive(Default, Clone)]
pub struct Sha256Hasher(Sha256);

impl Sha256Hasher {
    /// Start a new hasher.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed more bytes in.
    pub fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    /// Consume the hasher and return the digest.
    #[must_use]
    pub fn finalize(self) -> Sha256Output {
        self.0.finalize().into()
    }
}

/// Derive the 3DH master key from the three shared secrets (§4.7 step 9):
/// `master_key = SHA-256(sh1 ∥ sh2 ∥ sh3)`.
#[must_use]
pub fn derive_master_key(sh1: &[u8; 32], sh2: &[u8; 32], sh3: &[u8; 32]) -> Sha256Output {
    let mut hasher = Sha256Hasher::new();
    hasher.update(sh1);
    hasher.update(sh2);
    hasher.update(sh3);
    hasher.finalize()
}

/// Derive a session key from the master key with a fixed label (§4.7 step 10):
/// `k = SHA-256(master_key ∥ label)`, where `label` is `"first"` or `"second"`.
#[must_use]
pub fn derive_session_key(master_key: &[u8; 32], label: &[u8]) -> Sha256Output {
    let mut hasher = Sha256Hasher::new();
    hasher.update(master_key);
    hasher.update(label);
    hasher.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_empty_string_known_vector() {
        let expected = [
            0xe3, 0xb0, 0xc4, 0x42, 0x98, 0xfc, 0x1c, 0x14, 0x9a, 0xfb, 0xf4, 0xc8, 0x99, 0x6f,
            0xb9, 0x24, 0x27, 0xae, 0x41, 0xe4, 0x64, 0x9b, 0x93, 0x4c, 0xa4, 0x95, 0x99, 0x1b,
            0x78, 0x52, 0xb8, 0x55,
        ];
        assert_eq!(sha256(b""), expected);
    }

    #[test]
    fn incremental_hasher_matches_one_shot() {
        let mut hasher = Sha256Hasher::new();
        hasher.update(b"hello ");
        hasher.update(b"world");
        assert_eq!(hasher.finalize(), sha256(b"hello world"));
    }

    #[test]
    fn master_key_derivation_is_order_sensitive() {
        let sh1 = [1u8; 32];
        let sh2 = [2u8; 32];
        let sh3 = [3u8; 32];
        let mk = derive_master_key(&sh1, &sh2, &sh3);
        let swapped = derive_master_key(&sh2, &sh1, &sh3);
        assert_ne!(mk, swapped);
        assert_eq!(mk, sha256(&[sh1, sh2, sh3].concat()));
    }

    #[test]
    fn session_keys_differ_by_label() {
        let master = [0x42u8; 32];
        let k1 = derive_session_key(&master, b"first");
        let k2 = derive_session_key(&master, b"second");
        assert_ne!(k1, k2);
    }
}
