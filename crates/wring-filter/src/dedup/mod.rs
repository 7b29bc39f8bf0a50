//! Content-addressed deduplication.
//!
//! The input is chunked (fixed or content-defined boundaries), each chunk is
//! hashed, and repeats are replaced by references to the first occurrence.
//!
//! Stream layout: `"DEDUP"` | `original_size: u64 LE` |
//! `total_chunks: u64 LE` | per chunk `{ chunk_size: u32 LE, is_ref: u8,
//! then original_offset: u64 LE for a reference or the raw chunk bytes for
//! a literal }`.

pub mod chunker;
pub mod table;

use bytes::{Buf, BufMut, BytesMut};
use tracing::debug;

use wring_core::DedupConfig;

use crate::FilterError;
use chunker::next_chunk_len;
use table::{chunk_hash, ChunkTable};

/// Magic prefix of a dedup stream.
pub const DEDUP_MAGIC: &[u8; 5] = b"DEDUP";

/// Read-only statistics from one deduplication run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DedupStats {
    /// Bytes in the original stream.
    pub total_bytes: u64,
    /// Bytes in the encoded stream (records only, excluding the header).
    pub bytes_after_dedup: u64,
    /// Chunks seen.
    pub total_chunks: u64,
    /// Chunks replaced by references.
    pub duplicate_chunks: u64,
    /// Original bytes those references stood for.
    pub duplicate_bytes_saved: u64,
}

impl DedupStats {
    /// Fraction of the input eliminated, in `[0, 1]`.
    pub fn ratio(&self) -> f64 {
        if self.total_bytes == 0 {
            0.0
        } else {
            1.0 - self.bytes_after_dedup as f64 / self.total_bytes as f64
        }
    }
}

/// One deduplication job: chunking settings, the chunk table, and the
/// statistics of the last run. The table is cleared at the start of every
/// encode, so a `Deduplicator` can be reused sequentially but never shared.
pub struct Deduplicator {
    config: DedupConfig,
    chunk_size: usize,
    table: ChunkTable,
    stats: DedupStats,
}

impl Deduplicator {
    /// Creates a deduplicator, clamping the configured chunk size into the
    /// accepted window.
    pub fn new(config: DedupConfig) -> Self {
        let chunk_size = config.clamped_chunk_size();
        Self {
            config,
            chunk_size,
            table: ChunkTable::new(),
            stats: DedupStats::default(),
        }
    }

    /// Statistics from the most recent [`encode`](Deduplicator::encode).
    pub fn stats(&self) -> &DedupStats {
        &self.stats
    }

    /// Encodes `input` into a dedup stream.
    pub fn encode(&mut self, input: &[u8]) -> Vec<u8> {
        self.table.clear();
        self.stats = DedupStats {
            total_bytes: input.len() as u64,
            ..DedupStats::default()
        };

        let mut out = BytesMut::with_capacity(DEDUP_MAGIC.len() + 16 + input.len() / 2);
        out.put_slice(DEDUP_MAGIC);
        out.put_u64_le(input.len() as u64);
        // Chunk count is patched in once it is known.
        let count_at = out.len();
        out.put_u64_le(0);

        let mut offset = 0usize;
        let mut records = 0u64;
        while offset < input.len() {
            let len = next_chunk_len(&input[offset..], self.config.mode, self.chunk_size);
            let chunk = &input[offset..offset + len];
            let hash = chunk_hash(self.config.hash, chunk);

            out.put_u32_le(len as u32);
            match self.table.find_or_insert(hash, len as u32, offset as u64) {
                Some(original_offset) => {
                    out.put_u8(1);
                    out.put_u64_le(original_offset);
                    self.stats.duplicate_chunks += 1;
                    self.stats.duplicate_bytes_saved += len as u64;
                    self.stats.bytes_after_dedup += 1 + 8;
                }
                None => {
                    out.put_u8(0);
                    out.put_slice(chunk);
                    self.stats.bytes_after_dedup += 1 + len as u64;
                }
            }
            records += 1;
            offset += len;
        }

        self.stats.total_chunks = records;
        out[count_at..count_at + 8].copy_from_slice(&records.to_le_bytes());

        debug!(
            total_chunks = self.stats.total_chunks,
            duplicate_chunks = self.stats.duplicate_chunks,
            saved = self.stats.duplicate_bytes_saved,
            "dedup encode finished"
        );
        out.to_vec()
    }

    /// Reconstructs the original bytes from a dedup stream.
    pub fn decode(input: &[u8]) -> Result<Vec<u8>, FilterError> {
        let mut buf = input;
        if buf.remaining() < DEDUP_MAGIC.len() + 16 {
            return Err(FilterError::corrupt("dedup header truncated"));
        }
        if &buf[..DEDUP_MAGIC.len()] != DEDUP_MAGIC {
            return Err(FilterError::corrupt("missing DEDUP magic"));
        }
        buf.advance(DEDUP_MAGIC.len());
        let original_size = buf.get_u64_le() as usize;
        let total_chunks = buf.get_u64_le();

        let mut out = Vec::with_capacity(original_size);
        for index in 0..total_chunks {
            if buf.remaining() < 5 {
                return Err(FilterError::corrupt(format!(
                    "dedup record {index} truncated"
                )));
            }
            let size = buf.get_u32_le() as usize;
            match buf.get_u8() {
                1 => {
                    if buf.remaining() < 8 {
                        return Err(FilterError::corrupt(format!(
                            "dedup reference {index} truncated"
                        )));
                    }
                    let source = buf.get_u64_le() as usize;
                    if source + size > out.len() {
                        return Err(FilterError::corrupt(format!(
                            "dedup reference {index} points past reconstructed data"
                        )));
                    }
                    out.extend_from_within(source..source + size);
                }
                0 => {
                    if buf.remaining() < size {
                        return Err(FilterError::corrupt(format!(
                            "dedup literal {index} truncated"
                        )));
                    }
                    out.extend_from_slice(&buf[..size]);
                    buf.advance(size);
                }
                other => {
                    return Err(FilterError::corrupt(format!(
                        "invalid dedup record flag {other:#04x}"
                    )))
                }
            }
        }

        if out.len() != original_size {
            return Err(FilterError::corrupt(format!(
                "dedup stream reconstructed {} bytes, header declared {original_size}",
                out.len()
            )));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wring_core::{DedupHash, DedupMode};

    fn config(mode: DedupMode, hash: DedupHash, chunk_size: usize) -> DedupConfig {
        DedupConfig {
            chunk_size,
            hash,
            mode,
        }
    }

    #[test]
    fn round_trip_fixed() {
        let data: Vec<u8> = (0..300_000u32).map(|i| (i % 251) as u8).collect();
        let mut dedup = Deduplicator::new(config(DedupMode::Fixed, DedupHash::Sha1, 65536));
        let encoded = dedup.encode(&data);
        assert_eq!(Deduplicator::decode(&encoded).unwrap(), data);
    }

    #[test]
    fn round_trip_variable() {
        let data: Vec<u8> = (0..300_000u32)
            .map(|i| (i.wrapping_mul(2654435761) >> 11) as u8)
            .collect();
        for hash in [DedupHash::Sha1, DedupHash::Md5, DedupHash::Crc32, DedupHash::Xxh64] {
            let mut dedup = Deduplicator::new(config(DedupMode::Variable, hash, 65536));
            let encoded = dedup.encode(&data);
            assert_eq!(Deduplicator::decode(&encoded).unwrap(), data);
        }
    }

    #[test]
    fn identical_regions_become_references() {
        // Two identical 64 KiB regions aligned to the fixed chunk size.
        let region: Vec<u8> = (0..65536u32).map(|i| (i % 241) as u8).collect();
        let mut data = region.clone();
        data.extend_from_slice(&region);

        let mut dedup = Deduplicator::new(config(DedupMode::Fixed, DedupHash::Sha1, 65536));
        let encoded = dedup.encode(&data);

        let stats = dedup.stats();
        assert!(stats.duplicate_chunks >= 1);
        assert_eq!(stats.total_chunks, 2);
        assert_eq!(stats.duplicate_bytes_saved, 65536);
        assert!(stats.ratio() > 0.0);

        // The second record must be a reference to offset 0.
        let mut buf = &encoded[5 + 16..];
        let first_size = buf.get_u32_le() as usize;
        assert_eq!(buf.get_u8(), 0);
        buf.advance(first_size);
        assert_eq!(buf.get_u32_le(), 65536);
        assert_eq!(buf.get_u8(), 1);
        assert_eq!(buf.get_u64_le(), 0);

        assert_eq!(Deduplicator::decode(&encoded).unwrap(), data);
    }

    #[test]
    fn empty_input() {
        let mut dedup = Deduplicator::new(DedupConfig::default());
        let encoded = dedup.encode(b"");
        assert_eq!(encoded.len(), 5 + 16);
        assert_eq!(Deduplicator::decode(&encoded).unwrap(), Vec::<u8>::new());
        assert_eq!(dedup.stats().total_chunks, 0);
    }

    #[test]
    fn table_cleared_between_runs() {
        let region = vec![0x11u8; 8192];
        let mut dedup = Deduplicator::new(config(DedupMode::Fixed, DedupHash::Xxh64, 4096));

        let first = dedup.encode(&region);
        let stats_first = *dedup.stats();
        let second = dedup.encode(&region);
        let stats_second = *dedup.stats();

        // A carried-over table would turn every chunk of the second run
        // into a reference to entries the stream does not contain.
        assert_eq!(first, second);
        assert_eq!(stats_first, stats_second);
        assert_eq!(Deduplicator::decode(&second).unwrap(), region);
    }

    #[test]
    fn bad_magic_rejected() {
        assert!(matches!(
            Deduplicator::decode(b"NODUP\0\0\0\0\0\0\0\0\0\0\0\0\0\0\0\0"),
            Err(FilterError::Corrupt(_))
        ));
    }

    #[test]
    fn forward_reference_rejected() {
        let mut out = BytesMut::new();
        out.put_slice(DEDUP_MAGIC);
        out.put_u64_le(10);
        out.put_u64_le(1);
        out.put_u32_le(10);
        out.put_u8(1);
        out.put_u64_le(5); // nothing reconstructed yet
        assert!(matches!(
            Deduplicator::decode(&out),
            Err(FilterError::Corrupt(_))
        ));
    }

    #[test]
    fn truncated_literal_rejected() {
        let mut out = BytesMut::new();
        out.put_slice(DEDUP_MAGIC);
        out.put_u64_le(100);
        out.put_u64_le(1);
        out.put_u32_le(100);
        out.put_u8(0);
        out.put_slice(&[0xAA; 10]); // 90 bytes short
        assert!(matches!(
            Deduplicator::decode(&out),
            Err(FilterError::Corrupt(_))
        ));
    }
}
