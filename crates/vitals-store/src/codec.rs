//! Column encoding for compressed partitions.
//!
//! A chunk holds the samples of one point inside one partition, ordered by
//! time descending. Columns are laid out back to back (timestamp deltas,
//! values, quality codes, flags) so that runs of repeated values sit next to
//! each other before `zstd` sees them.
//!
//! Layout before compression:
//!
//! ```text
//! version: u8 | count: u32 | ts[0]: i64 | delta[1..count]: i64 | value[count]: f64 | quality[count]: u8 | flags[count]: u8
//! ```

use crate::error::{Result, StoreError};
use crate::types::SampleFlags;

const FORMAT_VERSION: u8 = 1;
const HEADER_LEN: usize = 1 + 4;
const ROW_LEN: usize = 8 + 8 + 1 + 1;
const ZSTD_LEVEL: i32 = 3;

/// One row of a chunk; the point is implied by the chunk.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChunkRow {
    /// Epoch milliseconds.
    pub timestamp: i64,
    /// Measured value.
    pub value: f64,
    /// Quality code.
    pub quality: u8,
    /// Status flags.
    pub flags: SampleFlags,
}

/// A compressed chunk and the size of its uncompressed encoding.
#[derive(Debug, Clone)]
pub struct EncodedChunk {
    /// zstd-compressed column data.
    pub payload: Vec<u8>,
    /// Size of the column data before compression.
    pub raw_bytes: usize,
}

/// Encodes and compresses rows. Rows are reordered by timestamp descending.
///
/// # Errors
///
/// Returns `StoreError::Codec` if compression fails.
pub fn encode(rows: &[ChunkRow]) -> Result<EncodedChunk> {
    let mut sorted = rows.to_vec();
    sorted.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

    let count = u32::try_from(sorted.len())
        .map_err(|_| StoreError::Codec(format!("chunk too large: {} rows", sorted.len())))?;

    let mut raw = Vec::with_capacity(HEADER_LEN + sorted.len() * ROW_LEN);
    raw.push(FORMAT_VERSION);
    raw.extend_from_slice(&count.to_le_bytes());

    let mut previous: Option<i64> = None;
    for row in &sorted {
        let encoded = previous.map_or(row.timestamp, |p| p - row.timestamp);
        raw.extend_from_slice(&encoded.to_le_bytes());
        previous = Some(row.timestamp);
    }
    for row in &sorted {
        raw.extend_from_slice(&row.value.to_le_bytes());
    }
    raw.extend(sorted.iter().map(|r| r.quality));
    raw.extend(sorted.iter().map(|r| r.flags.bits()));

    let payload = zstd::encode_all(raw.as_slice(), ZSTD_LEVEL)
        .map_err(|e| StoreError::Codec(format!("compress failed: {e}")))?;

    Ok(EncodedChunk {
        payload,
        raw_bytes: raw.len(),
    })
}

/// Decompresses and decodes a chunk. Rows come back in timestamp-descending order.
///
/// # Errors
///
/// Returns `StoreError::Codec` if the payload is corrupt or of an unknown version.
pub fn decode(payload: &[u8]) -> Result<Vec<ChunkRow>> {
    let raw = zstd::decode_all(payload)
        .map_err(|e| StoreError::Codec(format!("decompress failed: {e}")))?;

    if raw.len() < HEADER_LEN {
        return Err(StoreError::Codec("truncated header".to_string()));
    }
    if raw[0] != FORMAT_VERSION {
        return Err(StoreError::Codec(format!("unknown chunk version {}", raw[0])));
    }
    let count = u32::from_le_bytes([raw[1], raw[2], raw[3], raw[4]]) as usize;
    if raw.len() != HEADER_LEN + count * ROW_LEN {
        return Err(StoreError::Codec(format!(
            "length mismatch: {} bytes for {count} rows",
            raw.len()
        )));
    }

    let body = &raw[HEADER_LEN..];
    let (ts_col, rest) = body.split_at(count * 8);
    let (value_col, rest) = rest.split_at(count * 8);
    let (quality_col, flags_col) = rest.split_at(count);

    let mut rows = Vec::with_capacity(count);
    let mut previous: Option<i64> = None;
    for i in 0..count {
        let encoded = read_i64(&ts_col[i * 8..i * 8 + 8]);
        let timestamp = previous.map_or(encoded, |p| p - encoded);
        previous = Some(timestamp);
        rows.push(ChunkRow {
            timestamp,
            value: f64::from_bits(read_i64(&value_col[i * 8..i * 8 + 8]) as u64),
            quality: quality_col[i],
            flags: SampleFlags(flags_col[i]),
        });
    }
    Ok(rows)
}

fn read_i64(bytes: &[u8]) -> i64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(bytes);
    i64::from_le_bytes(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(timestamp: i64, value: f64) -> ChunkRow {
        ChunkRow {
            timestamp,
            value,
            quality: crate::types::QUALITY_GOOD,
            flags: SampleFlags::NONE,
        }
    }

    #[test]
    fn decode_returns_rows_newest_first() {
        let rows = vec![row(1_000, 1.0), row(3_000, 3.0), row(2_000, 2.0)];
        let encoded = encode(&rows).unwrap();
        let decoded = decode(&encoded.payload).unwrap();

        let timestamps: Vec<i64> = decoded.iter().map(|r| r.timestamp).collect();
        assert_eq!(timestamps, vec![3_000, 2_000, 1_000]);
        assert!((decoded[0].value - 3.0).abs() < f64::EPSILON);
    }

    #[test]
    fn preserves_quality_and_flags() {
        let mut r = row(5, -7.25);
        r.quality = 0;
        r.flags = SampleFlags::ALARM | SampleFlags::OVERRIDE;
        let decoded = decode(&encode(&[r]).unwrap().payload).unwrap();
        assert_eq!(decoded, vec![r]);
    }

    #[test]
    fn empty_chunk_is_valid() {
        let encoded = encode(&[]).unwrap();
        assert_eq!(encoded.raw_bytes, HEADER_LEN);
        assert!(decode(&encoded.payload).unwrap().is_empty());
    }

    #[test]
    fn repetitive_series_compresses_well() {
        // One sample a minute for a day with a flat value.
        let rows: Vec<ChunkRow> = (0..1_440).map(|i| row(i * 60_000, 21.5)).collect();
        let encoded = encode(&rows).unwrap();
        let ratio = encoded.raw_bytes as f64 / encoded.payload.len() as f64;
        assert!(ratio > 10.0, "ratio was {ratio}");
    }

    #[test]
    fn rejects_garbage() {
        assert!(decode(b"not zstd at all").is_err());

        let bogus = zstd::encode_all(&[9u8, 0, 0, 0, 0][..], 1).unwrap();
        assert!(matches!(decode(&bogus), Err(StoreError::Codec(_))));

        let short = zstd::encode_all(&[FORMAT_VERSION, 2, 0, 0, 0][..], 1).unwrap();
        assert!(matches!(decode(&short), Err(StoreError::Codec(_))));
    }
}
