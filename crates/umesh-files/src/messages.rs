//! Wire encoding for file-transfer messages (§4.8): a tagged union of
//! `{session_id, {FileRequest | FileMetadata | BlockRequest | BlockResponse}}`,
//! grounded on `file_transfer.h`'s `FtSession`/`file_transfer.pb` fields.
//!
//! Session ids are locally generated at [`NOMINAL_SESSION_ID_SIZE`] but a
//! peer-supplied id up to [`MAX_SESSION_ID_SIZE`] is accepted on receive,
//! matching the original's `session_id_size` field.

use crate::error::FileTransferError;

/// Size a locally-initiated session allocates for its own session id.
pub const NOMINAL_SESSION_ID_SIZE: usize = 2;
/// Largest session id this implementation will accept from a peer.
pub const MAX_SESSION_ID_SIZE: usize = 8;
/// Largest file name, including the implicit terminator budget.
pub const MAX_FILE_NAME_SIZE: usize = 32;
/// Largest sparse bitmap carried in a `BlockRequest` (§3: "32-byte bitmap").
pub const MAX_PIECE_BITMAP_SIZE: usize = 32;
/// Largest block of file data carried in a `BlockResponse`.
pub const MAX_BLOCK_SIZE: usize = 32;

const TAG_FILE_REQUEST: u8 = 0;
const TAG_FILE_METADATA: u8 = 1;
const TAG_BLOCK_REQUEST: u8 = 2;
const TAG_BLOCK_RESPONSE: u8 = 3;

/// The content carried alongside a session id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FtContent {
    /// Receiver asking the sender to start sending `file_name`.
    FileRequest {
        /// Name of the file requested.
        file_name: String,
    },
    /// Sender advertising the file it is about to send.
    FileMetadata {
        /// Name of the file being offered.
        file_name: String,
        /// Total file size in bytes.
        file_size: u32,
        /// Piece size, in blocks.
        piece_size_blocks: u32,
        /// Block size, in bytes.
        block_size_bytes: u32,
    },
    /// Receiver asking for the still-missing blocks of one piece.
    BlockRequest {
        /// Index of the piece within the file.
        piece_id: u32,
        /// Sparse bitmap of missing blocks, one bit per block, LSB first.
        bitmap: Vec<u8>,
    },
    /// Sender's answer to a `BlockRequest`, one block at a time.
    BlockResponse {
        /// Index of the piece within the file.
        piece_id: u32,
        /// Index of the block within the piece.
        block_index: u32,
        /// Raw block data (≤ [`MAX_BLOCK_SIZE`] bytes; shorter for the
        /// file's final, partial block).
        data: Vec<u8>,
    },
}

/// One file-transfer wire message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FtMessage {
    /// The session this message belongs to.
    pub session_id: Vec<u8>,
    /// The message content.
    pub content: FtContent,
}

/// Encode a message as `session_id_len(1) session_id tag(1) [payload]`.
#[must_use]
pub fn encode(msg: &FtMessage) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + msg.session_id.len() + 1 + 40);
    out.push(msg.session_id.len() as u8);
    out.extend_from_slice(&msg.session_id);
    match &msg.content {
        FtContent::FileRequest { file_name } => {
            out.push(TAG_FILE_REQUEST);
            push_name(&mut out, file_name);
        }
        FtContent::FileMetadata {
            file_name,
            file_size,
            piece_size_blocks,
            block_size_bytes,
        } => {
            out.push(TAG_FILE_METADATA);
            push_name(&mut out, file_name);
            out.extend_from_slice(&file_size.to_be_bytes());
            out.extend_from_slice(&piece_size_blocks.to_be_bytes());
            out.extend_from_slice(&block_size_bytes.to_be_bytes());
        }
        FtContent::BlockRequest { piece_id, bitmap } => {
            out.push(TAG_BLOCK_REQUEST);
            out.extend_from_slice(&piece_id.to_be_bytes());
            out.push(bitmap.len() as u8);
            out.extend_from_slice(bitmap);
        }
        FtContent::BlockResponse {
            piece_id,
            block_index,
            data,
        } => {
            out.push(TAG_BLOCK_RESPONSE);
            out.extend_from_slice(&piece_id.to_be_bytes());
            out.extend_from_slice(&block_index.to_be_bytes());
            out.push(data.len() as u8);
            out.extend_from_slice(data);
        }
    }
    out
}

fn push_name(out: &mut Vec<u8>, name: &str) {
    let bytes = name.as_bytes();
    let len = bytes.len().min(MAX_FILE_NAME_SIZE);
    out.push(len as u8);
    out.extend_from_slice(&bytes[..len]);
}

/// Decode a message produced by [`encode`].
pub fn decode(buf: &[u8]) -> Result<FtMessage, FileTransferError> {
    let id_len = *buf.first().ok_or(FileTransferError::MalformedMessage)? as usize;
    if id_len > MAX_SESSION_ID_SIZE {
        return Err(FileTransferError::MalformedMessage);
    }
    let mut pos = 1;
    let session_id = buf
        .get(pos..pos + id_len)
        .ok_or(FileTransferError::MalformedMessage)?
        .to_vec();
    pos += id_len;

    let tag = *buf.get(pos).ok_or(FileTransferError::MalformedMessage)?;
    pos += 1;
    let rest = &buf[pos..];

    let content = match tag {
        TAG_FILE_REQUEST => {
            let (file_name, _) = read_name(rest)?;
            FtContent::FileRequest { file_name }
        }
        TAG_FILE_METADATA => {
            let (file_name, used) = read_name(rest)?;
            let rest = &rest[used..];
            let file_size = read_u32(rest, 0)?;
            let piece_size_blocks = read_u32(rest, 4)?;
            let block_size_bytes = read_u32(rest, 8)?;
            FtContent::FileMetadata {
                file_name,
                file_size,
                piece_size_blocks,
                block_size_bytes,
            }
        }
        TAG_BLOCK_REQUEST => {
            let piece_id = read_u32(rest, 0)?;
            let bitmap_len = *rest.get(4).ok_or(FileTransferError::MalformedMessage)? as usize;
            if bitmap_len > MAX_PIECE_BITMAP_SIZE {
                return Err(FileTransferError::MalformedMessage);
            }
            let bitmap = rest
                .get(5..5 + bitmap_len)
                .ok_or(FileTransferError::MalformedMessage)?
                .to_vec();
            FtContent::BlockRequest { piece_id, bitmap }
        }
        TAG_BLOCK_RESPONSE => {
            let piece_id = read_u32(rest, 0)?;
            let block_index = read_u32(rest, 4)?;
            let data_len = *rest.get(8).ok_or(FileTransferError::MalformedMessage)? as usize;
            if data_len > MAX_BLOCK_SIZE {
                return Err(FileTransferError::MalformedMessage);
            }
            let data = rest
                .get(9..9 + data_len)
                .ok_or(FileTransferError::MalformedMessage)?
                .to_vec();
            FtContent::BlockResponse {
                piece_id,
                block_index,
                data,
            }
        }
        _ => return Err(FileTransferError::MalformedMessage),
    };

    Ok(FtMessage {
        session_id,
        content,
    })
}

/// Returns the decoded name and the number of bytes consumed (length byte + name).
fn read_name(buf: &[u8]) -> Result<(String, usize), FileTransferError> {
    let len = *buf.first().ok_or(FileTransferError::MalformedMessage)? as usize;
    if len > MAX_FILE_NAME_SIZE {
        return Err(FileTransferError::MalformedMessage);
    }
    let name_bytes = buf
        .get(1..1 + len)
        .ok_or(FileTransferError::MalformedMessage)?;
    let name = std::str::from_utf8(name_bytes)
        .map_err(|_| FileTransferError::MalformedMessage)?
        .to_string();
    Ok((name, 1 + len))
}

fn read_u32(buf: &[u8], offset: usize) -> Result<u32, FileTransferError> {
    let bytes: [u8; 4] = buf
        .get(offset..offset + 4)
        .ok_or(FileTransferError::MalformedMessage)?
        .try_into()
        .map_err(|_| FileTransferError::MalformedMessage)?;
    Ok(u32::from_be_bytes(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_metadata_round_trips() {
        let msg = FtMessage {
            session_id: vec![1, 2],
            content: FtContent::FileMetadata {
                file_name: "firmware.bin".to_string(),
                file_size: 50_000,
                piece_size_blocks: 32,
                block_size_bytes: 32,
            },
        };
        let encoded = encode(&msg);
        assert_eq!(decode(&encoded).unwrap(), msg);
    }

    #[test]
    fn block_request_round_trips() {
        let mut bitmap = vec![0u8; 32];
        bitmap[0] = 0xff;
        let msg = FtMessage {
            session_id: vec![9, 9],
            content: FtContent::BlockRequest { piece_id: 3, bitmap },
        };
        let encoded = encode(&msg);
        assert_eq!(decode(&encoded).unwrap(), msg);
    }

    #[test]
    fn block_response_round_trips() {
        let msg = FtMessage {
            session_id: vec![1, 2, 3, 4, 5, 6, 7, 8],
            content: FtContent::BlockResponse {
                piece_id: 7,
                block_index: 2,
                data: vec![0x42; 32],
            },
        };
        let encoded = encode(&msg);
        assert_eq!(decode(&encoded).unwrap(), msg);
    }

    #[test]
    fn truncated_message_is_rejected() {
        assert!(matches!(
            decode(&[2, 1]),
            Err(FileTransferError::MalformedMessage)
        ));
    }

    #[test]
    fn oversized_session_id_is_rejected() {
        let buf = vec![MAX_SESSION_ID_SIZE as u8 + 1];
        assert!(matches!(
            decode(&buf),
            Err(FileTransferError::MalformedMessage)
        ));
    }
}
