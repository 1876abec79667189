//! Wire frame encoding and decoding (C1, §4.1).
//!
//! ```text
//! control(1-2B)  [dest-TID(1-5B)]  src-TID(1-5B)  [nonce(2B)]  payload(0-N)  [trailer(0/2/4B)]
//! ```
//!
//! Control and TID codecs never touch keyed crypto; [`encode`] and [`decode`]
//! call into [`umesh_crypto`] for the CRC/keystream/authentication envelope
//! once the header has been read.

use crate::error::FrameError;
use crate::tid::{decode_tid, encode_tid};
use umesh_crypto::cipher::{self, MacAlgo, StreamAlgo};
use umesh_crypto::crc;

/// Maximum payload size (§3, §4.1).
pub const MAX_PAYLOAD: usize = 120;

/// Size of the per-send/receive sandbox buffer (§4.1, §5).
pub const SANDBOX_BUFFER_SIZE: usize = 140;

/// Concrete security algorithm identifier carried in the control field.
///
/// Modes 2 and 5 share an identical ChaCha20-Poly1305 construction with a
/// 4-byte tag (§4.1: mode 5 is "same as mode 2 in current code"); the enum
/// keeps both values distinct only for wire compatibility with the
/// `CHACHA20_POLY1305_2`/`_4` algorithm ids, not because they differ.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityMode {
    /// No trailer, no confidentiality.
    None = 0,
    /// 2-byte CRC-16/CCITT trailer.
    Crc16Ccitt = 1,
    /// ChaCha20 keystream + 4-byte Poly1305 tag.
    ChaCha20Poly1305Tag2 = 2,
    /// AES-128-CTR keystream + 2-byte HMAC-SHA256 tag.
    Aes128HmacSha256Tag2 = 3,
    /// 4-byte CRC-32 trailer.
    Crc32 = 4,
    /// ChaCha20 keystream + 4-byte Poly1305 tag.
    ChaCha20Poly1305Tag4 = 5,
    /// AES-128-CTR keystream + 4-byte HMAC-SHA256 tag.
    Aes128HmacSha256Tag4 = 6,
}

impl SecurityMode {
    /// Whether this mode prepends a 2-byte nonce before the payload.
    #[must_use]
    pub fn has_nonce(self) -> bool {
        matches!(
            self,
            Self::ChaCha20Poly1305Tag2
                | Self::Aes128HmacSha256Tag2
                | Self::ChaCha20Poly1305Tag4
                | Self::Aes128HmacSha256Tag4
        )
    }

    /// Trailer length in bytes.
    #[must_use]
    pub fn trailer_len(self) -> usize {
        match self {
            Self::None => 0,
            Self::Crc16Ccitt | Self::Aes128HmacSha256Tag2 => 2,
            Self::Crc32
            | Self::ChaCha20Poly1305Tag2
            | Self::ChaCha20Poly1305Tag4
            | Self::Aes128HmacSha256Tag4 => 4,
        }
    }

    /// Whether this mode provides confidentiality (vs. integrity only).
    #[must_use]
    pub fn is_encrypted(self) -> bool {
        matches!(
            self,
            Self::ChaCha20Poly1305Tag2
                | Self::Aes128HmacSha256Tag2
                | Self::ChaCha20Poly1305Tag4
                | Self::Aes128HmacSha256Tag4
        )
    }
}

impl TryFrom<u8> for SecurityMode {
    type Error = FrameError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::None),
            1 => Ok(Self::Crc16Ccitt),
            2 => Ok(Self::ChaCha20Poly1305Tag2),
            3 => Ok(Self::Aes128HmacSha256Tag2),
            4 => Ok(Self::Crc32),
            5 => Ok(Self::ChaCha20Poly1305Tag4),
            6 => Ok(Self::Aes128HmacSha256Tag4),
            other => Err(FrameError::ParseDataUnsupported(other)),
        }
    }
}

/// Security class a sender requests; the send path (C9) picks a concrete
/// [`SecurityMode`] for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityClass {
    /// No integrity or confidentiality.
    None,
    /// Integrity only (CRC).
    Verify,
    /// Authenticated encryption.
    AuthenticatedEncrypted,
}

/// Decoded control field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Control {
    broadcast: bool,
    security_algo: u8,
    l3_protocol: u8,
}

fn encode_control(control: Control) -> Result<Vec<u8>, FrameError> {
    if control.security_algo > 7 {
        return Err(FrameError::ParseDataUnsupported(control.security_algo));
    }
    if control.l3_protocol > 15 {
        return Err(FrameError::ParseDataUnsupported(control.l3_protocol));
    }
    let algo_lo = control.security_algo & 0b11;
    let proto_lo = control.l3_protocol & 0b11;
    let needs_ext = control.security_algo > 0b11 || control.l3_protocol > 0b11;

    let mut byte0 = (algo_lo << 4) | (proto_lo << 2);
    if control.broadcast {
        byte0 |= 0b0100_0000;
    }
    if needs_ext {
        byte0 |= 0b1000_0000;
        let algo_hi = (control.security_algo >> 2) & 0b1;
        let proto_hi = (control.l3_protocol >> 2) & 0b11;
        let byte1 = (algo_hi << 6) | proto_hi;
        Ok(vec![byte0, byte1])
    } else {
        Ok(vec![byte0])
    }
}

fn decode_control(buf: &[u8]) -> Result<(Control, usize), FrameError> {
    let &byte0 = buf.first().ok_or(FrameError::ParseControlNoData)?;
    let ext = byte0 & 0b1000_0000 != 0;
    let broadcast = byte0 & 0b0100_0000 != 0;
    let algo_lo = (byte0 >> 4) & 0b11;
    let proto_lo = (byte0 >> 2) & 0b11;

    if !ext {
        return Ok((
            Control {
                broadcast,
                security_algo: algo_lo,
                l3_protocol: proto_lo,
            },
            1,
        ));
    }

    let &byte1 = buf.get(1).ok_or(FrameError::ParseControlNoData)?;
    if byte1 & 0b1000_0000 != 0 {
        return Err(FrameError::ParseControlUnfinished);
    }
    let algo_hi = (byte1 >> 6) & 0b1;
    let proto_hi = byte1 & 0b11;
    Ok((
        Control {
            broadcast,
            security_algo: algo_lo | (algo_hi << 2),
            l3_protocol: proto_lo | (proto_hi << 2),
        },
        2,
    ))
}

/// The fixed parts of a frame, parsed without needing any key material.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameHeader {
    /// Broadcast flag; when set, `dest_tid` is `None` and no neighbour
    /// lookup is performed by the routing layer.
    pub broadcast: bool,
    /// Destination TID, `None` iff broadcast.
    pub dest_tid: Option<u32>,
    /// Source TID.
    pub src_tid: u32,
    /// Concrete security mode.
    pub security_mode: SecurityMode,
    /// L3 protocol id (0-15).
    pub l3_protocol: u8,
    header_len: usize,
}

impl FrameHeader {
    /// Parse the control field and TID(s) from the start of `buf`.
    pub fn parse(buf: &[u8]) -> Result<Self, FrameError> {
        let (control, mut offset) = decode_control(buf)?;
        let security_mode = SecurityMode::try_from(control.security_algo)?;

        let dest_tid = if control.broadcast {
            None
        } else {
            let (tid, len) = decode_tid(&buf[offset..])?;
            offset += len;
            Some(tid)
        };

        let (src_tid, len) = decode_tid(&buf[offset..])?;
        offset += len;

        Ok(Self {
            broadcast: control.broadcast,
            dest_tid,
            src_tid,
            security_mode,
            l3_protocol: control.l3_protocol,
            header_len: offset,
        })
    }

    /// Number of bytes the header occupied (control + TIDs, not the nonce).
    #[must_use]
    pub fn header_len(&self) -> usize {
        self.header_len
    }
}

/// A fully decoded frame, body already authenticated and decrypted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedFrame {
    /// See [`FrameHeader::broadcast`].
    pub broadcast: bool,
    /// See [`FrameHeader::dest_tid`].
    pub dest_tid: Option<u32>,
    /// See [`FrameHeader::src_tid`].
    pub src_tid: u32,
    /// See [`FrameHeader::security_mode`].
    pub security_mode: SecurityMode,
    /// See [`FrameHeader::l3_protocol`].
    pub l3_protocol: u8,
    /// Nonce carried on the wire (0 for modes without one).
    pub nonce: u16,
    /// Decrypted (or verified plaintext) payload.
    pub payload: Vec<u8>,
}

fn stream_algo_for(mode: SecurityMode) -> Option<StreamAlgo> {
    match mode {
        SecurityMode::ChaCha20Poly1305Tag2 | SecurityMode::ChaCha20Poly1305Tag4 => {
            Some(StreamAlgo::ChaCha20)
        }
        SecurityMode::Aes128HmacSha256Tag2 | SecurityMode::Aes128HmacSha256Tag4 => {
            Some(StreamAlgo::Aes128Ctr)
        }
        _ => None,
    }
}

fn mac_algo_for(mode: SecurityMode) -> Option<MacAlgo> {
    match mode {
        SecurityMode::ChaCha20Poly1305Tag2 | SecurityMode::ChaCha20Poly1305Tag4 => {
            Some(MacAlgo::Poly1305)
        }
        SecurityMode::Aes128HmacSha256Tag2 | SecurityMode::Aes128HmacSha256Tag4 => {
            Some(MacAlgo::HmacSha256)
        }
        _ => None,
    }
}

/// Encode a frame. `nonce` is ignored for modes that don't carry one.
/// `key` must be `Some` for modes 2/3/5/6.
#[allow(clippy::too_many_arguments)]
pub fn encode(
    broadcast: bool,
    dest_tid: Option<u32>,
    src_tid: u32,
    security_mode: SecurityMode,
    l3_protocol: u8,
    nonce: u16,
    key: Option<&[u8]>,
    payload: &[u8],
) -> Result<Vec<u8>, FrameError> {
    if payload.len() > MAX_PAYLOAD {
        return Err(FrameError::ParseDataTooBig(payload.len()));
    }

    let mut out = encode_control(Control {
        broadcast,
        security_algo: security_mode as u8,
        l3_protocol,
    })?;

    if !broadcast {
        let dest = dest_tid.ok_or(FrameError::ParseControlNoData)?;
        out.extend(encode_tid(dest));
    }
    out.extend(encode_tid(src_tid));

    if security_mode.has_nonce() {
        out.extend(nonce.to_be_bytes());
    }

    if security_mode.is_encrypted() {
        let key = key.ok_or(FrameError::ParseDataAeFailed)?;
        let algo = stream_algo_for(security_mode).expect("encrypted mode has a stream algo");
        let mac_algo = mac_algo_for(security_mode).expect("encrypted mode has a mac algo");
        let mut ciphertext = vec![0u8; payload.len()];
        cipher::decrypt(&mut ciphertext, payload, key, nonce, algo)?;
        out.extend_from_slice(&ciphertext);
        let tag_len = security_mode.trailer_len();
        let tag = cipher::authenticate(&out, key, nonce, mac_algo, tag_len)?;
        out.extend(tag);
    } else {
        out.extend_from_slice(payload);
        match security_mode {
            SecurityMode::Crc16Ccitt => out.extend(crc::crc16_ccitt(&out)),
            SecurityMode::Crc32 => out.extend(crc::crc32(&out)),
            SecurityMode::None => {}
            _ => unreachable!("handled by is_encrypted branch"),
        }
    }

    if out.len() > SANDBOX_BUFFER_SIZE {
        return Err(FrameError::ParseDataTooBig(out.len()));
    }
    Ok(out)
}

/// Decode a full frame. `key` must be `Some` for modes 2/3/5/6; for the
/// unkeyed modes it is ignored.
pub fn decode(buf: &[u8], key: Option<&[u8]>) -> Result<DecodedFrame, FrameError> {
    if buf.len() > SANDBOX_BUFFER_SIZE {
        return Err(FrameError::ParseDataTooBig(buf.len()));
    }
    let header = FrameHeader::parse(buf)?;
    let mut offset = header.header_len();

    let trailer_len = header.security_mode.trailer_len();
    if buf.len() < offset + trailer_len {
        return Err(FrameError::TooShort);
    }

    let nonce = if header.security_mode.has_nonce() {
        let nonce_bytes: [u8; 2] = buf
            .get(offset..offset + 2)
            .and_then(|s| s.try_into().ok())
            .ok_or(FrameError::TooShort)?;
        offset += 2;
        u16::from_be_bytes(nonce_bytes)
    } else {
        0
    };

    if buf.len() < offset + trailer_len {
        return Err(FrameError::TooShort);
    }
    let body_end = buf.len() - trailer_len;
    let body = &buf[offset..body_end];
    let trailer = &buf[body_end..];

    let payload = if header.security_mode.is_encrypted() {
        let key = key.ok_or(FrameError::ParseDataAeFailed)?;
        let mac_algo = mac_algo_for(header.security_mode).expect("encrypted mode has a mac algo");
        let algo =
            stream_algo_for(header.security_mode).expect("encrypted mode has a stream algo");
        let authenticated = &buf[..body_end];
        cipher::verify(authenticated, key, nonce, trailer, mac_algo)
            .map_err(|_| FrameError::ParseDataAeFailed)?;
        let mut plaintext = vec![0u8; body.len()];
        cipher::decrypt(&mut plaintext, body, key, nonce, algo)?;
        plaintext
    } else {
        match header.security_mode {
            SecurityMode::Crc16Ccitt => {
                let computed = crc::crc16_ccitt(&buf[..body_end]);
                if computed.as_slice() != trailer {
                    return Err(FrameError::ParseDataAeFailed);
                }
            }
            SecurityMode::Crc32 => {
                let computed = crc::crc32(&buf[..body_end]);
                if computed.as_slice() != trailer {
                    return Err(FrameError::ParseDataAeFailed);
                }
            }
            SecurityMode::None => {}
            _ => unreachable!("handled by is_encrypted branch"),
        }
        body.to_vec()
    };

    Ok(DecodedFrame {
        broadcast: header.broadcast,
        dest_tid: header.dest_tid,
        src_tid: header.src_tid,
        security_mode: header.security_mode,
        l3_protocol: header.l3_protocol,
        nonce,
        payload,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_decode_known_vectors() {
        // spec.md §8 scenario 3
        let (c, len) = decode_control(&[0x68]).unwrap();
        assert_eq!(len, 1);
        assert!(c.broadcast);
        assert_eq!(c.l3_protocol, 2);
        assert_eq!(c.security_algo, 2);

        let (c, len) = decode_control(&[0xff, 0x7f]).unwrap();
        assert_eq!(len, 2);
        assert!(c.broadcast);
        assert_eq!(c.l3_protocol, 15);
        assert_eq!(c.security_algo, 7);

        assert!(matches!(
            decode_control(&[0xff, 0xff]),
            Err(FrameError::ParseControlUnfinished)
        ));
    }

    #[test]
    fn control_roundtrip_smallest_encoding() {
        for algo in 0u8..=7 {
            for proto in 0u8..=15 {
                let bytes = encode_control(Control {
                    broadcast: proto % 2 == 0,
                    security_algo: algo,
                    l3_protocol: proto,
                })
                .unwrap();
                if algo <= 3 && proto <= 3 {
                    assert_eq!(bytes.len(), 1);
                } else {
                    assert_eq!(bytes.len(), 2);
                }
                let (decoded, len) = decode_control(&bytes).unwrap();
                assert_eq!(len, bytes.len());
                assert_eq!(decoded.security_algo, algo);
                assert_eq!(decoded.l3_protocol, proto);
            }
        }
    }

    #[test]
    fn frame_roundtrip_crc16() {
        let payload = [0x12, 0x34, 0x56, 0x78, 0x90];
        let encoded = encode(
            true,
            None,
            0x7f,
            SecurityMode::Crc16Ccitt,
            15,
            0,
            None,
            &payload,
        )
        .unwrap();
        // spec.md §8 scenario 2: control [0xff,0x7f], trailer 6d08
        assert_eq!(&encoded[encoded.len() - 2..], &[0x6d, 0x08]);

        let decoded = decode(&encoded, None).unwrap();
        assert_eq!(decoded.payload, payload);
        assert!(decoded.broadcast);
    }

    #[test]
    fn frame_crc_rejects_single_byte_corruption() {
        let payload = [1, 2, 3, 4];
        let encoded = encode(
            false,
            Some(99),
            42,
            SecurityMode::Crc32,
            3,
            0,
            None,
            &payload,
        )
        .unwrap();
        for i in 0..encoded.len() {
            let mut corrupted = encoded.clone();
            corrupted[i] ^= 0x01;
            assert!(decode(&corrupted, None).is_err(), "byte {i} undetected");
        }
    }

    #[test]
    fn frame_roundtrip_chacha20_poly1305() {
        let key = [0x77u8; 32];
        let payload = b"status: battery 78%";
        let encoded = encode(
            false,
            Some(500),
            12,
            SecurityMode::ChaCha20Poly1305Tag4,
            3,
            9,
            Some(&key),
            payload,
        )
        .unwrap();
        let decoded = decode(&encoded, Some(&key)).unwrap();
        assert_eq!(decoded.payload, payload);
        assert_eq!(decoded.nonce, 9);
    }

    #[test]
    fn frame_aead_rejects_tamper() {
        let key = [0x88u8; 16];
        let payload = b"file piece 3";
        let mut encoded = encode(
            false,
            Some(7),
            8,
            SecurityMode::Aes128HmacSha256Tag2,
            2,
            3,
            Some(&key),
            payload,
        )
        .unwrap();
        let last = encoded.len() - 1;
        encoded[last] ^= 0xFF;
        assert!(decode(&encoded, Some(&key)).is_err());
    }

    #[test]
    fn decode_requires_key_for_encrypted_modes() {
        let key = [0x11u8; 32];
        let encoded = encode(
            true,
            None,
            1,
            SecurityMode::ChaCha20Poly1305Tag2,
            0,
            1,
            Some(&key),
            b"adv",
        )
        .unwrap();
        assert!(matches!(
            decode(&encoded, None),
            Err(FrameError::ParseDataAeFailed)
        ));
    }

    #[test]
    fn encode_rejects_oversized_payload() {
        let payload = vec![0u8; MAX_PAYLOAD + 1];
        let result = encode(true, None, 1, SecurityMode::None, 0, 0, None, &payload);
        assert!(matches!(result, Err(FrameError::ParseDataTooBig(_))));
    }
}
