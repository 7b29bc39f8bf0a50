//! Wring Codec - the three primitive codecs.
//!
//! Each codec transforms whole in-memory buffers; Huffman additionally
//! exposes a two-pass streaming context so arbitrarily large files can be
//! processed chunk by chunk. File-to-file operation is layered on top of the
//! buffer forms, so no codec ever needs a temporary-file bridge.
//!
//! All stream headers are little-endian. The exact layouts:
//! - Huffman: `original_size: u64` | pre-order tree | MSB-first packed codes
//! - RLE: `original_size: i64` | `(count, value)` pairs
//! - LZ77: `original_size: u64` | flagged tokens (match offsets big-endian)

#![deny(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod bitio;
pub mod huffman;
pub mod lz77;
pub mod rle;

use std::path::Path;

use thiserror::Error;
use wring_core::{IoError, Preset};

pub use huffman::{HuffmanCodec, HuffmanEncoder, HuffmanStreamDecoder, Tree};
pub use lz77::{Lz77Codec, Lz77Params};
pub use rle::RleCodec;

/// Sanity bound on a header-declared decoded size. A corrupt header can
/// otherwise request an absurd allocation before the first byte is decoded.
pub const MAX_DECLARED_SIZE: u64 = 1 << 42;

/// Errors from codec encode/decode paths.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Filesystem failure while running a file-to-file operation.
    #[error(transparent)]
    Io(#[from] IoError),

    /// The compressed stream is malformed.
    #[error("corrupt stream: {0}")]
    Corrupt(String),

    /// A header declared a size no valid producer emits.
    #[error("declared size {declared} exceeds the sanity limit")]
    OversizedAllocation {
        /// Size the header asked for.
        declared: u64,
    },
}

impl CodecError {
    pub(crate) fn corrupt(detail: impl Into<String>) -> Self {
        CodecError::Corrupt(detail.into())
    }

    pub(crate) fn check_declared(declared: u64) -> Result<usize, CodecError> {
        if declared > MAX_DECLARED_SIZE {
            return Err(CodecError::OversizedAllocation { declared });
        }
        Ok(declared as usize)
    }
}

/// A primitive byte-stream codec.
pub trait Codec {
    /// Human-readable codec name.
    fn name(&self) -> &'static str;

    /// Compresses a whole buffer into a self-contained stream.
    fn compress(&self, input: &[u8]) -> Result<Vec<u8>, CodecError>;

    /// Decompresses a self-contained stream back into the original bytes.
    fn decompress(&self, input: &[u8]) -> Result<Vec<u8>, CodecError>;

    /// Compresses `input` to `output` on disk via the buffer form.
    fn compress_file(&self, input: &Path, output: &Path) -> Result<(), CodecError> {
        let data = read_file(input)?;
        let compressed = self.compress(&data)?;
        write_file(output, &compressed)
    }

    /// Decompresses `input` to `output` on disk via the buffer form.
    fn decompress_file(&self, input: &Path, output: &Path) -> Result<(), CodecError> {
        let data = read_file(input)?;
        let decoded = self.decompress(&data)?;
        write_file(output, &decoded)
    }
}

/// Selects one of the three primitives at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Primitive {
    /// Huffman coding.
    Huffman,
    /// Run-length encoding.
    Rle,
    /// LZ77 sliding-window compression.
    Lz77,
}

impl Primitive {
    /// The algorithm byte stored in container headers. These are the codec
    /// registry indices, so containers written by the parallel variants stay
    /// readable.
    pub fn tag(self) -> u8 {
        match self {
            Primitive::Huffman => 0,
            Primitive::Rle => 1,
            Primitive::Lz77 => 4,
        }
    }

    /// Maps a stored algorithm byte back to a primitive. Parallel and
    /// encrypted registry indices decode with their underlying primitive.
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 | 2 => Some(Primitive::Huffman),
            1 | 3 => Some(Primitive::Rle),
            4 | 5 | 6 => Some(Primitive::Lz77),
            _ => None,
        }
    }

    /// Instantiates the codec with parameters drawn from `preset`.
    pub fn codec(self, preset: Preset) -> Box<dyn Codec + Send + Sync> {
        match self {
            Primitive::Huffman => Box::new(HuffmanCodec::from_preset(preset)),
            Primitive::Rle => Box::new(RleCodec),
            Primitive::Lz77 => Box::new(Lz77Codec::new(Lz77Params::from_preset(preset))),
        }
    }
}

pub(crate) fn read_file(path: &Path) -> Result<Vec<u8>, CodecError> {
    std::fs::read(path).map_err(|source| {
        CodecError::Io(IoError::Open {
            path: path.to_path_buf(),
            source,
        })
    })
}

pub(crate) fn write_file(path: &Path, data: &[u8]) -> Result<(), CodecError> {
    std::fs::write(path, data).map_err(|source| CodecError::Io(IoError::Write(source)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primitive_tags_round_trip() {
        for p in [Primitive::Huffman, Primitive::Rle, Primitive::Lz77] {
            assert_eq!(Primitive::from_tag(p.tag()), Some(p));
        }
        // Parallel registry indices resolve to their primitive.
        assert_eq!(Primitive::from_tag(2), Some(Primitive::Huffman));
        assert_eq!(Primitive::from_tag(3), Some(Primitive::Rle));
        assert_eq!(Primitive::from_tag(5), Some(Primitive::Lz77));
        assert_eq!(Primitive::from_tag(6), Some(Primitive::Lz77));
        assert_eq!(Primitive::from_tag(7), None);
    }
}
