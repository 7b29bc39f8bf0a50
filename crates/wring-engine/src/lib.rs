//! Wring Engine - turns a request record into a running pipeline.
//!
//! The engine owns the codec registry, resolves which filter/codec/container
//! combination a request asks for, and drives the stages in a fixed order:
//! source → dedup → codec (or parallel driver) → encryption → container →
//! sink on the compress side, and the reverse on decompress. Stage presence
//! comes from request flags, falling back to file-extension sniffing.

#![deny(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod large;
pub mod pipeline;
pub mod request;

use std::path::PathBuf;

use thiserror::Error;
use wring_codec::CodecError;
use wring_container::ContainerError;
use wring_core::config::ConfigError;
use wring_core::IoError;
use wring_filter::FilterError;

pub use pipeline::{run, Report};
pub use request::{codec_registry, detect_codec, CodecEntry, CodecFlavor, Mode, Request};

/// Top-level engine failure.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Filesystem failure.
    #[error(transparent)]
    Io(#[from] IoError),

    /// A primitive codec failed.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// A filter stage failed.
    #[error(transparent)]
    Filter(#[from] FilterError),

    /// A container stage failed.
    #[error(transparent)]
    Container(#[from] ContainerError),

    /// The request configuration is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The codec could not be determined for a decompress request.
    #[error("cannot determine codec for {0}; pass an explicit index")]
    UnknownFormat(PathBuf),
}

impl EngineError {
    /// True when the root cause is a missing input file, which gets a
    /// dedicated diagnostic at the CLI boundary.
    pub fn is_input_not_found(&self) -> bool {
        fn open_not_found(io: &IoError) -> bool {
            matches!(io, IoError::Open { source, .. }
                if source.kind() == std::io::ErrorKind::NotFound)
        }
        match self {
            EngineError::Io(io) => open_not_found(io),
            EngineError::Codec(CodecError::Io(io)) => open_not_found(io),
            EngineError::Filter(FilterError::Io(io)) => open_not_found(io),
            EngineError::Container(ContainerError::Io(io)) => open_not_found(io),
            _ => false,
        }
    }
}
