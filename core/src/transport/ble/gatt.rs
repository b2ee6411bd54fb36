/// Provisioning characteristic wire format
///
/// A write is `offset:u16-LE | reserved:u8 | length:u8 | data[length]`.
/// The protocol only knows fixed 16-byte chunks, four of them per key.
/// A read returns the two-byte status `[confirmed_this_round, confirmed_total]`.
use crate::crypto::KEY_MATERIAL_LEN;
use thiserror::Error;

/// Size of the chunk header in bytes
pub const CHUNK_HEADER_LEN: usize = 4;

/// Payload bytes carried by every chunk
pub const CHUNK_PAYLOAD_LEN: usize = 16;

/// Chunks needed to move one key
pub const CHUNKS_PER_KEY: usize = KEY_MATERIAL_LEN / CHUNK_PAYLOAD_LEN;

/// Value the sender places in the reserved header byte
pub const RESERVED_SENTINEL: u8 = 0xFF;

/// Errors for chunk and status decoding
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChunkError {
    #[error("Chunk length {0} is not 16")]
    InvalidLength(u8),
    #[error("Chunk truncated: {0} bytes")]
    Truncated(usize),
    #[error("Chunk declares {declared} payload bytes but carries {actual}")]
    PayloadMismatch { declared: usize, actual: usize },
    #[error("Status value truncated: {0} bytes")]
    StatusTruncated(usize),
}

/// Decoded chunk header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkHeader {
    pub offset: u16,
    pub reserved: u8,
    pub length: u8,
}

/// One provisioning write, borrowed from the raw value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk<'a> {
    pub header: ChunkHeader,
    pub payload: &'a [u8],
}

impl<'a> Chunk<'a> {
    /// Parse and validate a raw characteristic write
    pub fn parse(value: &'a [u8]) -> Result<Self, ChunkError> {
        if value.len() < CHUNK_HEADER_LEN {
            return Err(ChunkError::Truncated(value.len()));
        }
        let header = ChunkHeader {
            offset: u16::from_le_bytes([value[0], value[1]]),
            reserved: value[2],
            length: value[3],
        };
        if header.length as usize != CHUNK_PAYLOAD_LEN {
            return Err(ChunkError::InvalidLength(header.length));
        }
        let payload = &value[CHUNK_HEADER_LEN..];
        if payload.len() != CHUNK_PAYLOAD_LEN {
            return Err(ChunkError::PayloadMismatch {
                declared: CHUNK_PAYLOAD_LEN,
                actual: payload.len(),
            });
        }
        Ok(Self { header, payload })
    }
}

/// Build the characteristic write carrying `data` at `offset`
pub fn encode_chunk(offset: u16, data: &[u8; CHUNK_PAYLOAD_LEN]) -> Vec<u8> {
    let mut out = Vec::with_capacity(CHUNK_HEADER_LEN + CHUNK_PAYLOAD_LEN);
    out.extend_from_slice(&offset.to_le_bytes());
    out.push(RESERVED_SENTINEL);
    out.push(CHUNK_PAYLOAD_LEN as u8);
    out.extend_from_slice(data);
    out
}

/// Receiver progress as reported on read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProvisioningStatus {
    /// Bytes confirmed since the last offset-0 restart
    pub round_confirmed: u8,
    /// Bytes confirmed in total for the current key
    pub total_confirmed: u8,
}

impl ProvisioningStatus {
    pub fn to_bytes(self) -> Vec<u8> {
        vec![self.round_confirmed, self.total_confirmed]
    }

    pub fn from_bytes(value: &[u8]) -> Result<Self, ChunkError> {
        match value {
            [round, total, ..] => Ok(Self {
                round_confirmed: *round,
                total_confirmed: *total,
            }),
            _ => Err(ChunkError::StatusTruncated(value.len())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_layout() {
        let data = [0xABu8; CHUNK_PAYLOAD_LEN];
        let raw = encode_chunk(48, &data);
        assert_eq!(raw.len(), 20);
        assert_eq!(&raw[..4], &[48, 0, 0xFF, 16]);
        assert_eq!(&raw[4..], &data);
    }

    #[test]
    fn test_parse_encoded_chunk() {
        let data = [3u8; CHUNK_PAYLOAD_LEN];
        let raw = encode_chunk(16, &data);
        let chunk = Chunk::parse(&raw).expect("Parse");
        assert_eq!(chunk.header.offset, 16);
        assert_eq!(chunk.header.reserved, RESERVED_SENTINEL);
        assert_eq!(chunk.payload, &data);
    }

    #[test]
    fn test_parse_offset_is_little_endian() {
        let mut raw = vec![0x00, 0x01, 0, 16];
        raw.extend_from_slice(&[0u8; 16]);
        assert_eq!(Chunk::parse(&raw).expect("Parse").header.offset, 256);
    }

    #[test]
    fn test_parse_rejects_wrong_length_field() {
        let mut raw = vec![0, 0, 0xFF, 8];
        raw.extend_from_slice(&[0u8; 8]);
        assert_eq!(Chunk::parse(&raw), Err(ChunkError::InvalidLength(8)));
    }

    #[test]
    fn test_parse_rejects_short_header() {
        assert_eq!(Chunk::parse(&[0, 0, 0xFF]), Err(ChunkError::Truncated(3)));
    }

    #[test]
    fn test_parse_rejects_payload_mismatch() {
        let mut raw = vec![0, 0, 0xFF, 16];
        raw.extend_from_slice(&[0u8; 12]);
        assert_eq!(
            Chunk::parse(&raw),
            Err(ChunkError::PayloadMismatch {
                declared: 16,
                actual: 12
            })
        );
    }

    #[test]
    fn test_status_bytes() {
        let status = ProvisioningStatus {
            round_confirmed: 32,
            total_confirmed: 48,
        };
        assert_eq!(status.to_bytes(), vec![32, 48]);
        assert_eq!(ProvisioningStatus::from_bytes(&[32, 48]), Ok(status));
        assert_eq!(
            ProvisioningStatus::from_bytes(&[1]),
            Err(ChunkError::StatusTruncated(1))
        );
    }
}
