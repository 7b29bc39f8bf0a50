//! Engine configuration.
//!
//! All tunables travel in one explicit [`Config`] record constructed by the
//! caller (normally the CLI) and handed down through the pipeline. Nothing
//! in the engine reads process-global mutable state.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::checksum::ChecksumKind;
use crate::{DEFAULT_BUFFER_SIZE, DEFAULT_CHUNK_SIZE, MAX_THREADS};

/// Smallest accepted dedup chunk: 4 KiB.
pub const MIN_DEDUP_CHUNK_SIZE: usize = 4096;
/// Largest accepted dedup chunk: 1 MiB.
pub const MAX_DEDUP_CHUNK_SIZE: usize = 1024 * 1024;
/// Default dedup chunk: 64 KiB.
pub const DEFAULT_DEDUP_CHUNK_SIZE: usize = 65536;

/// Default progressive block size: 1 MiB.
pub const DEFAULT_BLOCK_SIZE: u32 = 1024 * 1024;
/// Largest progressive block size: 16 MiB.
pub const MAX_BLOCK_SIZE: u32 = 16 * 1024 * 1024;

/// Default split-archive part size: 100 MiB.
pub const DEFAULT_SPLIT_SIZE: u64 = 100 * 1024 * 1024;
/// Smallest split-archive part size: 1 MiB.
pub const MIN_SPLIT_SIZE: u64 = 1024 * 1024;

/// Invalid configuration reported before any work starts.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// An encryption key must contain at least one byte.
    #[error("encryption key must not be empty")]
    EmptyKey,

    /// The codec index does not name a registered codec.
    #[error("unknown codec index: {0}")]
    UnknownCodec(u8),

    /// A block range was given with start after end.
    #[error("invalid block range: {start}..{end}")]
    InvalidRange {
        /// First block requested.
        start: u32,
        /// Last block requested.
        end: u32,
    },

    /// Progressive block size outside the accepted bounds.
    #[error("block size {0} exceeds maximum of {MAX_BLOCK_SIZE}")]
    BlockSizeTooLarge(u32),
}

/// Codec parameter preset selected with `-O`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Preset {
    /// Balanced defaults.
    #[default]
    None,
    /// Favor throughput over ratio.
    Speed,
    /// Favor ratio over throughput.
    Size,
}

/// Which hash identifies a dedup chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DedupHash {
    /// SHA-1, 20 bytes.
    #[default]
    Sha1,
    /// MD5, 16 bytes.
    Md5,
    /// CRC32, 4 bytes.
    Crc32,
    /// XXH64, 8 bytes.
    Xxh64,
}

impl DedupHash {
    /// Parses the CLI-facing index (0..=3).
    pub fn from_index(index: u8) -> Option<Self> {
        match index {
            0 => Some(DedupHash::Sha1),
            1 => Some(DedupHash::Md5),
            2 => Some(DedupHash::Crc32),
            3 => Some(DedupHash::Xxh64),
            _ => None,
        }
    }
}

/// How dedup chunk boundaries are chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DedupMode {
    /// A boundary every `chunk_size` bytes.
    #[default]
    Fixed,
    /// Content-defined boundaries from a rolling hash.
    Variable,
    /// Variable chunking; reserved for format-aware boundary hints.
    Smart,
}

impl DedupMode {
    /// Parses the CLI-facing index (0..=2).
    pub fn from_index(index: u8) -> Option<Self> {
        match index {
            0 => Some(DedupMode::Fixed),
            1 => Some(DedupMode::Variable),
            2 => Some(DedupMode::Smart),
            _ => None,
        }
    }
}

/// Deduplication settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DedupConfig {
    /// Target chunk size (exact in fixed mode, maximum in variable mode).
    pub chunk_size: usize,
    /// Chunk identity hash.
    pub hash: DedupHash,
    /// Boundary selection mode.
    pub mode: DedupMode,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_DEDUP_CHUNK_SIZE,
            hash: DedupHash::default(),
            mode: DedupMode::default(),
        }
    }
}

impl DedupConfig {
    /// Clamps the chunk size into the accepted window, warning on adjustment.
    pub fn clamped_chunk_size(&self) -> usize {
        if self.chunk_size < MIN_DEDUP_CHUNK_SIZE {
            warn!(
                requested = self.chunk_size,
                using = MIN_DEDUP_CHUNK_SIZE,
                "dedup chunk size below minimum"
            );
            MIN_DEDUP_CHUNK_SIZE
        } else if self.chunk_size > MAX_DEDUP_CHUNK_SIZE {
            warn!(
                requested = self.chunk_size,
                using = MAX_DEDUP_CHUNK_SIZE,
                "dedup chunk size above maximum"
            );
            MAX_DEDUP_CHUNK_SIZE
        } else {
            self.chunk_size
        }
    }
}

/// Engine configuration record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Codec parameter preset.
    pub preset: Preset,
    /// Worker threads for parallel codecs; 0 selects the core count.
    pub threads: usize,
    /// Buffered I/O size in bytes.
    pub buffer_size: usize,
    /// Chunk size for chunked (large-file) processing.
    pub chunk_size: usize,
    /// Integrity algorithm for containers and framed I/O.
    pub checksum: ChecksumKind,
    /// Key for the cipher filter, when encryption is in play.
    pub key: Option<Vec<u8>>,
    /// Deduplication settings.
    pub dedup: DedupConfig,
    /// Progressive container block size.
    pub block_size: u32,
    /// Split-archive maximum part size.
    pub max_part_size: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            preset: Preset::None,
            threads: 0,
            buffer_size: DEFAULT_BUFFER_SIZE,
            chunk_size: DEFAULT_CHUNK_SIZE,
            checksum: ChecksumKind::None,
            key: None,
            dedup: DedupConfig::default(),
            block_size: DEFAULT_BLOCK_SIZE,
            max_part_size: DEFAULT_SPLIT_SIZE,
        }
    }
}

impl Config {
    /// Validates cross-field constraints that cannot wait until dispatch.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(key) = &self.key {
            if key.is_empty() {
                return Err(ConfigError::EmptyKey);
            }
        }
        if self.block_size > MAX_BLOCK_SIZE {
            return Err(ConfigError::BlockSizeTooLarge(self.block_size));
        }
        if self.buffer_size < 1024 {
            warn!(
                buffer_size = self.buffer_size,
                "small buffer size may hurt throughput; 1024 or more recommended"
            );
        }
        Ok(())
    }

    /// Resolves the effective worker count: auto-detect on 0, cap at
    /// [`MAX_THREADS`](crate::MAX_THREADS).
    pub fn effective_threads(&self, available: usize) -> usize {
        let n = if self.threads == 0 {
            available
        } else {
            self.threads
        };
        n.clamp(1, MAX_THREADS)
    }

    /// Clamps the split part size up to the minimum, warning on adjustment.
    pub fn clamped_part_size(&self) -> u64 {
        if self.max_part_size < MIN_SPLIT_SIZE {
            warn!(
                requested = self.max_part_size,
                using = MIN_SPLIT_SIZE,
                "split part size below minimum"
            );
            MIN_SPLIT_SIZE
        } else {
            self.max_part_size
        }
    }
}
