//! Record framing: 1 byte content type + 4 bytes LE length + payload.

use super::keys::TAG_LEN;

pub const HEADER_LEN: usize = 5;
/// Largest plaintext carried by one application record.
pub const MAX_FRAGMENT_LEN: usize = 16 * 1024;
/// Largest payload a record may declare on the wire.
pub const MAX_PAYLOAD_LEN: usize = MAX_FRAGMENT_LEN + TAG_LEN + 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentType {
    Alert = 21,
    Handshake = 22,
    Application = 23,
}

impl ContentType {
    fn from_byte(b: u8) -> Option<Self> {
        match b {
            21 => Some(ContentType::Alert),
            22 => Some(ContentType::Handshake),
            23 => Some(ContentType::Application),
            _ => None,
        }
    }
}

/// Bytes a record with `payload_len` bytes of payload occupies on the wire.
pub fn record_len(payload_len: usize) -> usize {
    HEADER_LEN + payload_len
}

/// Write one record into the front of `out`. Returns the number of bytes written.
pub fn encode_record(
    content_type: ContentType,
    payload: &[u8],
    out: &mut [u8],
) -> Result<usize, RecordEncodeError> {
    if payload.len() > MAX_PAYLOAD_LEN {
        return Err(RecordEncodeError::TooLarge);
    }
    let total = record_len(payload.len());
    if out.len() < total {
        return Err(RecordEncodeError::NoRoom { needed: total });
    }
    out[0] = content_type as u8;
    out[1..HEADER_LEN].copy_from_slice(&(payload.len() as u32).to_le_bytes());
    out[HEADER_LEN..total].copy_from_slice(payload);
    Ok(total)
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum RecordEncodeError {
    #[error("record payload too large")]
    TooLarge,
    #[error("output buffer needs {needed} bytes")]
    NoRoom { needed: usize },
}

/// Decode one record from the front of `bytes`: content type, payload, bytes consumed.
/// Partial input yields `NeedMore`; the caller retries once more bytes arrive.
pub fn decode_record(bytes: &[u8]) -> Result<(ContentType, &[u8], usize), RecordDecodeError> {
    if bytes.len() < HEADER_LEN {
        return Err(RecordDecodeError::NeedMore);
    }
    let content_type =
        ContentType::from_byte(bytes[0]).ok_or(RecordDecodeError::UnknownType(bytes[0]))?;
    let len = u32::from_le_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]) as usize;
    if len > MAX_PAYLOAD_LEN {
        return Err(RecordDecodeError::TooLarge(len));
    }
    let total = record_len(len);
    if bytes.len() < total {
        return Err(RecordDecodeError::NeedMore);
    }
    Ok((content_type, &bytes[HEADER_LEN..total], total))
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum RecordDecodeError {
    #[error("need more bytes")]
    NeedMore,
    #[error("record of {0} bytes exceeds limit")]
    TooLarge(usize),
    #[error("unknown content type {0}")]
    UnknownType(u8),
}
