//! Binary snapshot format for the sparse index.
//!
//! Layout, all integers little-endian:
//!
//! ```text
//! magic "PLMX" | version u32 | created_at_ms i64 | payload_len u64 | payload | crc32 u32
//! ```
//!
//! The payload is the bincode encoding of the tokenizer name and the
//! [`InvertedIndex`]. The checksum covers every byte after the magic.

use std::io::{Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{PilumError, Result};
use crate::lexical::index::InvertedIndex;

pub const SNAPSHOT_MAGIC: &[u8; 4] = b"PLMX";
pub const SNAPSHOT_FORMAT_VERSION: u32 = 2;
pub const SNAPSHOT_TEMP_SUFFIX: &str = ".tmp";

/// Upper bound on a payload we are willing to allocate for.
const MAX_PAYLOAD_LEN: u64 = 1 << 34;

/// Metadata read from (or written to) a snapshot header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotHeader {
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub payload_len: u64,
}

#[derive(Serialize)]
struct PayloadRef<'a> {
    tokenizer: &'a str,
    index: &'a InvertedIndex,
}

#[derive(Deserialize)]
struct Payload {
    tokenizer: String,
    index: InvertedIndex,
}

/// Write `index` to `writer`. The writer is flushed but not closed.
pub fn write_snapshot<W: Write>(
    writer: &mut W,
    index: &InvertedIndex,
    tokenizer: &str,
) -> Result<SnapshotHeader> {
    let payload = bincode::serialize(&PayloadRef { tokenizer, index })
        .map_err(|e| PilumError::serialization(format!("Failed to encode snapshot: {e}")))?;

    let header = SnapshotHeader {
        version: SNAPSHOT_FORMAT_VERSION,
        created_at: Utc::now(),
        payload_len: payload.len() as u64,
    };

    let mut fields = Vec::with_capacity(20);
    fields.write_u32::<LittleEndian>(header.version)?;
    fields.write_i64::<LittleEndian>(header.created_at.timestamp_millis())?;
    fields.write_u64::<LittleEndian>(header.payload_len)?;

    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&fields);
    hasher.update(&payload);

    writer.write_all(SNAPSHOT_MAGIC)?;
    writer.write_all(&fields)?;
    writer.write_all(&payload)?;
    writer.write_u32::<LittleEndian>(hasher.finalize())?;
    writer.flush()?;

    Ok(header)
}

/// Read and validate a snapshot. Every failure, including a short read, is
/// reported as [`PilumError::IndexCorrupt`].
pub fn read_snapshot<R: Read>(
    reader: &mut R,
    expected_tokenizer: &str,
) -> Result<(SnapshotHeader, InvertedIndex)> {
    let truncated = |e: std::io::Error| PilumError::corrupt(format!("truncated snapshot: {e}"));

    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic).map_err(truncated)?;
    if &magic != SNAPSHOT_MAGIC {
        return Err(PilumError::corrupt("not a pilum snapshot (bad magic)"));
    }

    let mut fields = [0u8; 20];
    reader.read_exact(&mut fields).map_err(truncated)?;
    let mut cursor = &fields[..];
    let version = cursor.read_u32::<LittleEndian>().map_err(truncated)?;
    if version != SNAPSHOT_FORMAT_VERSION {
        return Err(PilumError::corrupt(format!(
            "unsupported snapshot version {version} (expected {SNAPSHOT_FORMAT_VERSION})"
        )));
    }
    let created_ms = cursor.read_i64::<LittleEndian>().map_err(truncated)?;
    let payload_len = cursor.read_u64::<LittleEndian>().map_err(truncated)?;
    if payload_len > MAX_PAYLOAD_LEN {
        return Err(PilumError::corrupt(format!(
            "payload length {payload_len} exceeds limit"
        )));
    }
    let created_at = DateTime::<Utc>::from_timestamp_millis(created_ms)
        .ok_or_else(|| PilumError::corrupt(format!("invalid timestamp {created_ms}")))?;

    let mut payload = Vec::new();
    reader
        .by_ref()
        .take(payload_len)
        .read_to_end(&mut payload)
        .map_err(truncated)?;
    if payload.len() as u64 != payload_len {
        return Err(PilumError::corrupt(format!(
            "truncated snapshot: expected {payload_len} payload bytes, got {}",
            payload.len()
        )));
    }

    let stored_crc = reader.read_u32::<LittleEndian>().map_err(truncated)?;
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&fields);
    hasher.update(&payload);
    let actual_crc = hasher.finalize();
    if stored_crc != actual_crc {
        return Err(PilumError::corrupt(format!(
            "checksum mismatch: stored {stored_crc:#010x}, computed {actual_crc:#010x}"
        )));
    }

    let decoded: Payload = bincode::deserialize(&payload)
        .map_err(|e| PilumError::corrupt(format!("undecodable payload: {e}")))?;
    if decoded.tokenizer != expected_tokenizer {
        return Err(PilumError::corrupt(format!(
            "snapshot was built with tokenizer {:?}, index uses {expected_tokenizer:?}",
            decoded.tokenizer
        )));
    }
    decoded.index.verify()?;

    Ok((
        SnapshotHeader {
            version,
            created_at,
            payload_len,
        },
        decoded.index,
    ))
}
