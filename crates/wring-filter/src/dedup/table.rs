//! Chunk identity table.
//!
//! 65536 buckets indexed by the first two bytes of the chunk hash; each
//! bucket is a chain of entries. Two chunks are the same only when all 20
//! hash bytes and the chunk size agree. The table lives for one
//! deduplication run and is cleared between runs.

use md5::{Digest as _, Md5};
use sha1::Sha1;
use xxhash_rust::xxh64::xxh64;

use wring_core::DedupHash;

/// Width of the stored hash field; shorter digests are zero-padded.
pub const HASH_LEN: usize = 20;

/// Bucket count: one per possible 16-bit prefix.
const BUCKET_COUNT: usize = 65536;

/// Computes the 20-byte identity of a chunk.
pub fn chunk_hash(algorithm: DedupHash, data: &[u8]) -> [u8; HASH_LEN] {
    let mut out = [0u8; HASH_LEN];
    match algorithm {
        DedupHash::Sha1 => {
            let digest = Sha1::digest(data);
            out.copy_from_slice(&digest);
        }
        DedupHash::Md5 => {
            let digest = Md5::digest(data);
            out[..16].copy_from_slice(&digest);
        }
        DedupHash::Crc32 => {
            let crc = crc32fast::hash(data);
            out[..4].copy_from_slice(&crc.to_le_bytes());
        }
        DedupHash::Xxh64 => {
            out[..8].copy_from_slice(&xxh64(data, 0).to_le_bytes());
        }
    }
    out
}

/// One known chunk.
#[derive(Debug, Clone)]
pub struct ChunkEntry {
    /// Identity hash, zero-padded to [`HASH_LEN`].
    pub hash: [u8; HASH_LEN],
    /// Offset of the first occurrence in the original stream.
    pub offset: u64,
    /// Chunk size in bytes.
    pub size: u32,
    /// How many times this chunk has been seen.
    pub ref_count: u32,
}

/// Hash table of unique chunks.
pub struct ChunkTable {
    buckets: Vec<Vec<ChunkEntry>>,
    len: usize,
}

impl ChunkTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self {
            buckets: vec![Vec::new(); BUCKET_COUNT],
            len: 0,
        }
    }

    fn bucket_of(hash: &[u8; HASH_LEN]) -> usize {
        ((hash[0] as usize) << 8) | hash[1] as usize
    }

    /// Records a chunk occurrence.
    ///
    /// Returns the offset of the first occurrence when the chunk is already
    /// known (and bumps its reference count), or `None` for a new chunk.
    pub fn find_or_insert(
        &mut self,
        hash: [u8; HASH_LEN],
        size: u32,
        offset: u64,
    ) -> Option<u64> {
        let bucket = &mut self.buckets[Self::bucket_of(&hash)];
        for entry in bucket.iter_mut() {
            if entry.hash == hash && entry.size == size {
                entry.ref_count += 1;
                return Some(entry.offset);
            }
        }
        bucket.push(ChunkEntry {
            hash,
            offset,
            size,
            ref_count: 1,
        });
        self.len += 1;
        None
    }

    /// Number of distinct chunks stored.
    pub fn len(&self) -> usize {
        self.len
    }

    /// True when no chunks have been recorded.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Drops every entry, keeping the bucket array.
    pub fn clear(&mut self) {
        for bucket in &mut self.buckets {
            bucket.clear();
        }
        self.len = 0;
    }
}

impl Default for ChunkTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha1_known_vector() {
        let hash = chunk_hash(DedupHash::Sha1, b"abc");
        assert_eq!(hex::encode(hash), "a9993e364706816aba3e25717850c26c9cd0d89d");
    }

    #[test]
    fn md5_is_zero_padded() {
        let hash = chunk_hash(DedupHash::Md5, b"abc");
        assert_eq!(
            hex::encode(&hash[..16]),
            "900150983cd24fb0d6963f7d28e17f72"
        );
        assert_eq!(&hash[16..], [0u8; 4]);
    }

    #[test]
    fn crc32_is_zero_padded() {
        let hash = chunk_hash(DedupHash::Crc32, b"123456789");
        assert_eq!(&hash[..4], 0xCBF43926u32.to_le_bytes());
        assert_eq!(&hash[4..], [0u8; 16]);
    }

    #[test]
    fn xxh64_fills_eight_bytes() {
        let hash = chunk_hash(DedupHash::Xxh64, b"some chunk data");
        assert_ne!(&hash[..8], [0u8; 8]);
        assert_eq!(&hash[8..], [0u8; 12]);
    }

    #[test]
    fn duplicate_detection_needs_hash_and_size() {
        let mut table = ChunkTable::new();
        let hash = chunk_hash(DedupHash::Sha1, b"chunk");

        assert_eq!(table.find_or_insert(hash, 5, 0), None);
        // Same hash and size: duplicate of the first occurrence.
        assert_eq!(table.find_or_insert(hash, 5, 100), Some(0));
        // Same hash, different size: distinct entry.
        assert_eq!(table.find_or_insert(hash, 6, 200), None);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn clear_resets_the_table() {
        let mut table = ChunkTable::new();
        let hash = chunk_hash(DedupHash::Xxh64, b"x");
        table.find_or_insert(hash, 1, 0);
        assert!(!table.is_empty());
        table.clear();
        assert!(table.is_empty());
        assert_eq!(table.find_or_insert(hash, 1, 0), None);
    }
}
