//! Keystream generation and authentication primitives backing security modes
//! 1-6 (§4.1, §4.2): raw ChaCha20 / AES-128-CTR keystreams, and Poly1305 /
//! HMAC-SHA256 tags truncated to the length the wire mode requests.
//!
//! These are pure functions over byte slices, no session state: C1 decides
//! which algorithm and tag length a given security mode needs and calls
//! straight through.

use aes::Aes128;
use chacha20::ChaCha20;
use chacha20::cipher::{KeyIvInit, StreamCipher, StreamCipherSeek};
use ctr::Ctr64BE;
use hmac::{Hmac, Mac as HmacMac};
use poly1305::Poly1305;
use poly1305::universal_hash::{KeyInit as UhKeyInit, UniversalHash};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::CryptoError;

/// Block cipher used to generate the keystream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamAlgo {
    /// ChaCha20, IETF variant (32-byte key, 12-byte nonce, 32-bit block counter).
    ChaCha20,
    /// AES-128 in CTR mode (16-byte key).
    Aes128Ctr,
}

/// MAC used to authenticate a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MacAlgo {
    /// Poly1305, one-time-keyed from block 0 of the matching ChaCha20 keystream.
    Poly1305,
    /// HMAC-SHA256.
    HmacSha256,
}

const CHACHA_BLOCK_LEN: usize = 64;

/// Build the 12-byte ChaCha20 nonce from the wire-level 16-bit frame nonce:
/// 10 zero bytes followed by the big-endian nonce.
fn chacha_nonce(nonce16: u16) -> [u8; 12] {
    let mut nonce = [0u8; 12];
    nonce[10..12].copy_from_slice(&nonce16.to_be_bytes());
    nonce
}

/// Build the 16-byte AES-CTR IV from the wire-level 16-bit frame nonce: 14
/// zero bytes followed by the big-endian nonce, counter in the low bytes.
fn aes_ctr_iv(nonce16: u16) -> [u8; 16] {
    let mut iv = [0u8; 16];
    iv[14..16].copy_from_slice(&nonce16.to_be_bytes());
    iv
}

/// Generate `out.len()` bytes of keystream starting at `block_counter` (in
/// 64-byte ChaCha20 blocks, or 16-byte AES blocks for the CTR algorithm).
pub fn ctr_keystream(
    out: &mut [u8],
    key: &[u8],
    nonce16: u16,
    block_counter: u32,
    algo: StreamAlgo,
) -> Result<(), CryptoError> {
    out.fill(0);
    match algo {
        StreamAlgo::ChaCha20 => {
            let key: &[u8; 32] = key.try_into().map_err(|_| CryptoError::InvalidLength {
                expected: 32,
                actual: key.len(),
            })?;
            let nonce = chacha_nonce(nonce16);
            let mut cipher = ChaCha20::new(key.into(), &nonce.into());
            cipher.seek(u64::from(block_counter) * CHACHA_BLOCK_LEN as u64);
            cipher.apply_keystream(out);
        }
        StreamAlgo::Aes128Ctr => {
            let key: &[u8; 16] = key.try_into().map_err(|_| CryptoError::InvalidLength {
                expected: 16,
                actual: key.len(),
            })?;
            let iv = aes_ctr_iv(nonce16);
            let mut cipher = Ctr64BE::<Aes128>::new(key.into(), &iv.into());
            cipher.seek(u64::from(block_counter) * 16);
            cipher.apply_keystream(out);
        }
    }
    Ok(())
}

/// XOR `src` with the keystream for (`key`, `nonce16`) into `dst`. The
/// keystream always starts at block 1 per §4.1 (block 0 is reserved for the
/// Poly1305 one-time key when `algo` is ChaCha20).
pub fn decrypt(
    dst: &mut [u8],
    src: &[u8],
    key: &[u8],
    nonce16: u16,
    algo: StreamAlgo,
) -> Result<(), CryptoError> {
    if dst.len() != src.len() {
        return Err(CryptoError::InvalidLength {
            expected: src.len(),
            actual: dst.len(),
        });
    }
    let mut keystream = vec![0u8; src.len()];
    ctr_keystream(&mut keystream, key, nonce16, 1, algo)?;
    for ((d, s), k) in dst.iter_mut().zip(src).zip(keystream.iter()) {
        *d = s ^ k;
    }
    Ok(())
}

/// Derive the 32-byte Poly1305 one-time key from block 0 of the ChaCha20
/// keystream under (`key`, `nonce16`) (§4.1 mode 2/5).
fn poly1305_key(key: &[u8; 32], nonce16: u16) -> Result<[u8; 32], CryptoError> {
    let mut block0 = [0u8; 32];
    ctr_keystream(&mut block0, key, nonce16, 0, StreamAlgo::ChaCha20)?;
    Ok(block0)
}

/// Compute the authentication tag over `data`, truncated to `tag_len` bytes
/// (2 or 4 per §4.1). For `MacAlgo::Poly1305`, `nonce16` selects the one-time
/// key derived from block 0 of the matching ChaCha20 keystream.
pub fn authenticate(
    data: &[u8],
    key: &[u8],
    nonce16: u16,
    algo: MacAlgo,
    tag_len: usize,
) -> Result<Vec<u8>, CryptoError> {
    let full_tag = match algo {
        MacAlgo::Poly1305 => {
            let key: &[u8; 32] = key.try_into().map_err(|_| CryptoError::InvalidLength {
                expected: 32,
                actual: key.len(),
            })?;
            let one_time_key = poly1305_key(key, nonce16)?;
            let mac = Poly1305::new(one_time_key.as_slice().into());
            mac.compute_unpadded(data).to_vec()
        }
        MacAlgo::HmacSha256 => {
            let mut mac = Hmac::<Sha256>::new_from_slice(key)
                .map_err(|_| CryptoError::InvalidLength {
                    expected: 32,
                    actual: key.len(),
                })?;
            mac.update(data);
            mac.finalize().into_bytes().to_vec()
        }
    };
    if tag_len > full_tag.len() {
        return Err(CryptoError::InvalidLength {
            expected: full_tag.len(),
            actual: tag_len,
        });
    }
    Ok(full_tag[..tag_len].to_vec())
}

/// Verify `tag` against `data` in constant time. Returns
/// [`CryptoError::AuthenticationFailed`] on mismatch.
pub fn verify(
    data: &[u8],
    key: &[u8],
    nonce16: u16,
    tag: &[u8],
    algo: MacAlgo,
) -> Result<(), CryptoError> {
    let expected = authenticate(data, key, nonce16, algo, tag.len())?;
    if expected.ct_eq(tag).into() {
        Ok(())
    } else {
        Err(CryptoError::AuthenticationFailed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chacha20_keystream_is_deterministic() {
        let key = [0x11u8; 32];
        let mut a = [0u8; 64];
        let mut b = [0u8; 64];
        ctr_keystream(&mut a, &key, 7, 1, StreamAlgo::ChaCha20).unwrap();
        ctr_keystream(&mut b, &key, 7, 1, StreamAlgo::ChaCha20).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, [0u8; 64]);
    }

    #[test]
    fn aes_ctr_keystream_changes_with_nonce() {
        let key = [0x22u8; 16];
        let mut a = [0u8; 32];
        let mut b = [0u8; 32];
        ctr_keystream(&mut a, &key, 1, 1, StreamAlgo::Aes128Ctr).unwrap();
        ctr_keystream(&mut b, &key, 2, 1, StreamAlgo::Aes128Ctr).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn decrypt_roundtrip_chacha20() {
        let key = [0x33u8; 32];
        let plaintext = b"uMeshFw piece payload over the radio link";
        let mut ciphertext = vec![0u8; plaintext.len()];
        decrypt(&mut ciphertext, plaintext, &key, 42, StreamAlgo::ChaCha20).unwrap();
        let mut roundtrip = vec![0u8; plaintext.len()];
        decrypt(&mut roundtrip, &ciphertext, &key, 42, StreamAlgo::ChaCha20).unwrap();
        assert_eq!(roundtrip, plaintext);
    }

    #[test]
    fn poly1305_tag_truncation_lengths_differ() {
        let key = [0x44u8; 32];
        let data = b"header+nonce+ciphertext";
        let tag2 = authenticate(data, &key, 5, MacAlgo::Poly1305, 2).unwrap();
        let tag4 = authenticate(data, &key, 5, MacAlgo::Poly1305, 4).unwrap();
        assert_eq!(tag2.len(), 2);
        assert_eq!(tag4.len(), 4);
        assert_eq!(&tag4[..2], &tag2[..]);
    }

    #[test]
    fn hmac_tag_detects_tamper() {
        let key = [0x55u8; 32];
        let data = b"frame contents";
        let tag = authenticate(data, &key, 0, MacAlgo::HmacSha256, 4).unwrap();
        assert!(verify(data, &key, 0, &tag, MacAlgo::HmacSha256).is_ok());
        let mut tampered = *data;
        tampered[0] ^= 1;
        assert!(verify(&tampered, &key, 0, &tag, MacAlgo::HmacSha256).is_err());
    }

    #[test]
    fn poly1305_verify_rejects_wrong_tag() {
        let key = [0x66u8; 32];
        let data = b"payload";
        let tag = authenticate(data, &key, 9, MacAlgo::Poly1305, 4).unwrap();
        let mut wrong = tag.clone();
        wrong[0] ^= 0xFF;
        assert!(verify(data, &key, 9, &wrong, MacAlgo::Poly1305).is_err());
    }
}
