//! Wring Filter - byte-stream filters that sit in front of the codecs.
//!
//! Two filters live here:
//! - the key-cycled XOR cipher (obfuscation, not cryptography; the header
//!   and behavior are preserved verbatim from the wire format)
//! - the content-addressed deduplication filter with fixed and
//!   content-defined chunking

#![deny(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod cipher;
pub mod dedup;

use thiserror::Error;
use wring_codec::CodecError;
use wring_core::IoError;

pub use cipher::{
    compress_and_encrypt, decrypt, decrypt_and_decompress, encrypt, xor_in_place,
    ENCRYPTION_HEADER,
};
pub use dedup::{DedupStats, Deduplicator};

/// Errors from the filter layer.
#[derive(Debug, Error)]
pub enum FilterError {
    /// Filesystem failure in a file-to-file operation.
    #[error(transparent)]
    Io(#[from] IoError),

    /// The inner codec failed (combined cipher+codec operations).
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// An encryption key must contain at least one byte.
    #[error("encryption key must not be empty")]
    EmptyKey,

    /// The filter stream is malformed.
    #[error("corrupt stream: {0}")]
    Corrupt(String),
}

impl FilterError {
    pub(crate) fn corrupt(detail: impl Into<String>) -> Self {
        FilterError::Corrupt(detail.into())
    }
}
