//! Binary framing for stored graph blobs.
//!
//! Format:
//! ```text
//! [version: 1 byte][length: 4 bytes LE][data: N bytes JSON][crc32: 4 bytes LE]
//! ```
//!
//! The checksum turns a torn or bit-flipped blob into a typed
//! [`StorageError::Corrupt`] instead of a half-parsed graph.

use crc32fast::Hasher;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::StorageError;

const CODEC_VERSION: u8 = 1;

const HEADER_LEN: usize = 1 + 4;
const TRAILER_LEN: usize = 4;

/// Sanity bound on a single blob (64 MiB).
const MAX_BLOB_SIZE: usize = 64 * 1024 * 1024;

fn checksum(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

/// Serializes a value into a framed, checksummed blob.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, StorageError> {
    let data = serde_json::to_vec(value).map_err(|e| StorageError::Serialization(e.to_string()))?;
    if data.len() > MAX_BLOB_SIZE {
        return Err(StorageError::Rejected(format!(
            "blob size {} exceeds maximum {MAX_BLOB_SIZE}",
            data.len()
        )));
    }
    let len = u32::try_from(data.len()).map_err(|_| StorageError::Rejected("blob too large".to_string()))?;

    let mut out = Vec::with_capacity(HEADER_LEN + data.len() + TRAILER_LEN);
    out.push(CODEC_VERSION);
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(&data);
    out.extend_from_slice(&checksum(&data).to_le_bytes());
    Ok(out)
}

/// Verifies and deserializes a blob produced by [`encode`].
pub fn decode<T: DeserializeOwned>(blob: &[u8]) -> Result<T, StorageError> {
    if blob.len() < HEADER_LEN + TRAILER_LEN {
        return Err(StorageError::Corrupt(format!("blob truncated to {} bytes", blob.len())));
    }
    if blob[0] != CODEC_VERSION {
        return Err(StorageError::Corrupt(format!(
            "unsupported codec version: {} (expected {CODEC_VERSION})",
            blob[0]
        )));
    }

    let mut len_bytes = [0u8; 4];
    len_bytes.copy_from_slice(&blob[1..HEADER_LEN]);
    let len = u32::from_le_bytes(len_bytes) as usize;
    if len > MAX_BLOB_SIZE {
        return Err(StorageError::Corrupt(format!("blob size {len} exceeds maximum {MAX_BLOB_SIZE}")));
    }
    if blob.len() != HEADER_LEN + len + TRAILER_LEN {
        return Err(StorageError::Corrupt(format!(
            "blob length mismatch: header says {len}, have {}",
            blob.len() - HEADER_LEN - TRAILER_LEN
        )));
    }

    let data = &blob[HEADER_LEN..HEADER_LEN + len];
    let mut crc_bytes = [0u8; 4];
    crc_bytes.copy_from_slice(&blob[HEADER_LEN + len..]);
    let stored = u32::from_le_bytes(crc_bytes);
    let computed = checksum(data);
    if stored != computed {
        return Err(StorageError::Corrupt(format!(
            "CRC mismatch: stored={stored:08x}, computed={computed:08x}"
        )));
    }

    serde_json::from_slice(data).map_err(|e| StorageError::Corrupt(format!("deserialization failed: {e}")))
}
