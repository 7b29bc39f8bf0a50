//! Wring Core - shared primitives for the wring compression engine.
//!
//! This crate provides:
//! - The checksum kernel (CRC32, MD5, SHA-256 behind one tagged value)
//! - The engine configuration record passed explicitly through every layer
//! - Buffered chunked file I/O, with an optional checksummed framing

#![deny(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod checksum;
pub mod config;
pub mod io;

pub use checksum::{Checksum, ChecksumHasher, ChecksumKind};
pub use config::{Config, DedupConfig, DedupHash, DedupMode, Preset};
pub use io::{ChunkReader, ChunkWriter, FramedReader, FramedWriter, IoError, Record};

/// Upper bound on worker threads for any parallel operation.
pub const MAX_THREADS: usize = 64;

/// Default buffered I/O size in bytes.
pub const DEFAULT_BUFFER_SIZE: usize = 8192;

/// Default chunk size for chunked file processing: 1 MiB.
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;
