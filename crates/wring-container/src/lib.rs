//! Wring Container - structures that wrap codec output.
//!
//! Three containers live here:
//! - the parallel wrapper: per-chunk codec streams with a count header,
//!   produced and consumed by a worker pool
//! - the progressive container: independently decodable blocks with
//!   per-block headers, checksums, and random access
//! - the split archive: one logical stream spread across numbered parts

#![deny(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod parallel;
pub mod progressive;
pub mod split;

use thiserror::Error;
use wring_codec::CodecError;
use wring_core::checksum::ChecksumError;
use wring_core::IoError;
use wring_filter::FilterError;

pub use parallel::{optimal_threads, ParallelCodec};
pub use progressive::{
    ProgressiveHeader, ProgressiveOptions, ProgressiveReader, ProgressiveWriter, ReaderState,
    FLAG_ENCRYPTED, FLAG_HAS_CHECKSUM, FLAG_STREAMING_OPTIMIZED,
};
pub use split::{part_path, SplitArchive, SplitPartHeader};

/// Errors from the container layer.
#[derive(Debug, Error)]
pub enum ContainerError {
    /// Filesystem failure.
    #[error(transparent)]
    Io(#[from] IoError),

    /// The wrapped codec failed.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// A filter stage inside the container failed.
    #[error(transparent)]
    Filter(#[from] FilterError),

    /// The file does not carry the expected container format.
    #[error("invalid container format: {0}")]
    BadFormat(String),

    /// The container was written by a newer format revision.
    #[error("unsupported container version {0}")]
    UnsupportedVersion(u8),

    /// A split-archive part file is missing or out of order.
    #[error("missing or misordered archive part {0}")]
    MissingPart(u32),

    /// Stored and computed checksums disagree.
    #[error("checksum mismatch{}", .block_id.map(|id| format!(" in block {id}")).unwrap_or_default())]
    ChecksumMismatch {
        /// Failing block, when block-granular.
        block_id: Option<u32>,
    },

    /// A stored checksum could not even be parsed.
    #[error("malformed checksum field: {0}")]
    BadChecksum(#[from] ChecksumError),

    /// A worker failed; only the first failure is surfaced.
    #[error("worker {index} failed: {source}")]
    Worker {
        /// Index of the failing worker.
        index: usize,
        /// Its error.
        #[source]
        source: Box<ContainerError>,
    },

    /// The worker pool could not be constructed.
    #[error("thread pool setup failed: {0}")]
    ThreadPool(String),

    /// A block range does not fit the container.
    #[error("invalid block range {start}..={end} (total blocks {total})")]
    InvalidRange {
        /// First requested block.
        start: u32,
        /// Last requested block.
        end: u32,
        /// Blocks in the container.
        total: u32,
    },

    /// More parts than the split format can number.
    #[error("{0} parts exceed the archive limit")]
    TooManyParts(u64),

    /// A block's compressed form does not fit its fixed slot in the
    /// streaming-optimized layout.
    #[error("block {block_id} does not fit the streaming-optimized slot")]
    BlockTooLarge {
        /// Offending block.
        block_id: u32,
    },
}
