//! バイナリ転送チャンク
//!
//! ```text
//! [stream_id: u64 BE][offset: u64 BE][data...]
//! ```

use alloc::vec::Vec;

use crate::error::TransportError;

/// チャンクヘッダー長
pub const BLOB_CHUNK_HEADER: usize = 16;

/// バイナリ転送の 1 チャンク
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobChunk {
    pub stream_id: u64,
    /// ストリーム先頭からの位置
    pub offset: u64,
    pub data: Vec<u8>,
}

impl BlobChunk {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(BLOB_CHUNK_HEADER + self.data.len());
        out.extend_from_slice(&self.stream_id.to_be_bytes());
        out.extend_from_slice(&self.offset.to_be_bytes());
        out.extend_from_slice(&self.data);
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TransportError> {
        if bytes.len() < BLOB_CHUNK_HEADER {
            return Err(TransportError::TooShort);
        }
        let mut id = [0u8; 8];
        id.copy_from_slice(&bytes[0..8]);
        let mut offset = [0u8; 8];
        offset.copy_from_slice(&bytes[8..16]);

        Ok(BlobChunk {
            stream_id: u64::from_be_bytes(id),
            offset: u64::from_be_bytes(offset),
            data: bytes[BLOB_CHUNK_HEADER..].to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_layout() {
        let chunk = BlobChunk {
            stream_id: 7,
            offset: 0x1_0000,
            data: alloc::vec![0xAB; 3],
        };
        let bytes = chunk.to_bytes();
        assert_eq!(bytes.len(), BLOB_CHUNK_HEADER + 3);
        assert_eq!(&bytes[8..16], &[0, 0, 0, 0, 0, 1, 0, 0]);
        assert_eq!(BlobChunk::from_bytes(&bytes).unwrap(), chunk);
    }

    #[test]
    fn test_chunk_too_short() {
        assert_eq!(BlobChunk::from_bytes(&[0u8; 15]), Err(TransportError::TooShort));
    }
}
