//! Wire encoding for 3DH messages (§4.7): a tagged union of
//! `{session_id, {EPKRequest | EPKResponse | IPKRequest | IPKResponse}}`.
//!
//! Session ids are 4 bytes on the wire (§4.7, "generate 4-byte session id"),
//! though the in-memory session accepts any id a peer supplied, up to the
//! same width.

use crate::error::KeyMgrError;

/// Width of a 3DH session id on the wire.
pub const SESSION_ID_SIZE: usize = 4;

const TAG_EPK_REQUEST: u8 = 0;
const TAG_EPK_RESPONSE: u8 = 1;
const TAG_IPK_REQUEST: u8 = 2;
const TAG_IPK_RESPONSE_PLAIN: u8 = 3;
const TAG_IPK_RESPONSE_ENCRYPTED: u8 = 4;

/// The content carried alongside a session id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AkeContent {
    /// Ask the peer for their ephemeral public key.
    EpkRequest,
    /// Here is my ephemeral public key.
    EpkResponse {
        /// 32-byte X25519 public key.
        ephemeral_pk: [u8; 32],
    },
    /// Ask the peer for their identity public key.
    IpkRequest,
    /// Here is my identity public key, in the clear.
    IpkResponse {
        /// 32-byte X25519 public key.
        identity_pk: [u8; 32],
    },
    /// Here is my identity public key, but encrypted. Accepted on the wire;
    /// nothing in this engine can decrypt it (§4.7 open question).
    IpkResponseEncrypted {
        /// Opaque ciphertext; length is whatever the peer sent.
        encrypted_identity_pk: Vec<u8>,
    },
}

/// One 3DH wire message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AkeMessage {
    /// The session this message belongs to.
    pub session_id: [u8; SESSION_ID_SIZE],
    /// The message content.
    pub content: AkeContent,
}

/// Encode a message as `session_id(4) tag(1) [payload]`.
#[must_use]
pub fn encode(msg: &AkeMessage) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + 1 + 32);
    out.extend_from_slice(&msg.session_id);
    match &msg.content {
        AkeContent::EpkRequest => out.push(TAG_EPK_REQUEST),
        AkeContent::EpkResponse { ephemeral_pk } => {
            out.push(TAG_EPK_RESPONSE);
            out.extend_from_slice(ephemeral_pk);
        }
        AkeContent::IpkRequest => out.push(TAG_IPK_REQUEST),
        AkeContent::IpkResponse { identity_pk } => {
            out.push(TAG_IPK_RESPONSE_PLAIN);
            out.extend_from_slice(identity_pk);
        }
        AkeContent::IpkResponseEncrypted {
            encrypted_identity_pk,
        } => {
            out.push(TAG_IPK_RESPONSE_ENCRYPTED);
            out.extend_from_slice(encrypted_identity_pk);
        }
    }
    out
}

/// Decode a message produced by [`encode`].
pub fn decode(buf: &[u8]) -> Result<AkeMessage, KeyMgrError> {
    if buf.len() < SESSION_ID_SIZE + 1 {
        return Err(KeyMgrError::MalformedMessage);
    }
    let mut session_id = [0u8; SESSION_ID_SIZE];
    session_id.copy_from_slice(&buf[..SESSION_ID_SIZE]);
    let tag = buf[SESSION_ID_SIZE];
    let rest = &buf[SESSION_ID_SIZE + 1..];

    let content = match tag {
        TAG_EPK_REQUEST => AkeContent::EpkRequest,
        TAG_EPK_RESPONSE => AkeContent::EpkResponse {
            ephemeral_pk: fixed32(rest)?,
        },
        TAG_IPK_REQUEST => AkeContent::IpkRequest,
        TAG_IPK_RESPONSE_PLAIN => AkeContent::IpkResponse {
            identity_pk: fixed32(rest)?,
        },
        TAG_IPK_RESPONSE_ENCRYPTED => AkeContent::IpkResponseEncrypted {
            encrypted_identity_pk: rest.to_vec(),
        },
        _ => return Err(KeyMgrError::MalformedMessage),
    };

    Ok(AkeMessage {
        session_id,
        content,
    })
}

fn fixed32(buf: &[u8]) -> Result<[u8; 32], KeyMgrError> {
    buf.try_into().map_err(|_| KeyMgrError::MalformedMessage)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn epk_response_round_trips() {
        let msg = AkeMessage {
            session_id: [1, 2, 3, 4],
            content: AkeContent::EpkResponse {
                ephemeral_pk: [0x42; 32],
            },
        };
        let encoded = encode(&msg);
        assert_eq!(decode(&encoded).unwrap(), msg);
    }

    #[test]
    fn encrypted_ipk_response_round_trips() {
        let msg = AkeMessage {
            session_id: [9, 9, 9, 9],
            content: AkeContent::IpkResponseEncrypted {
                encrypted_identity_pk: vec![1, 2, 3, 4, 5],
            },
        };
        let encoded = encode(&msg);
        assert_eq!(decode(&encoded).unwrap(), msg);
    }

    #[test]
    fn truncated_message_is_rejected() {
        assert!(matches!(decode(&[1, 2, 3]), Err(KeyMgrError::MalformedMessage)));
    }
}
