//! Request record and codec registry.

use std::path::{Path, PathBuf};

use wring_codec::Primitive;
use wring_core::Config;

/// Compress or decompress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Input is raw; produce a compressed artifact.
    Compress,
    /// Input is a compressed artifact; restore the original bytes.
    Decompress,
}

/// How a registry entry drives its primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecFlavor {
    /// Single-threaded whole-buffer codec.
    Plain(Primitive),
    /// Worker-pool driver over the primitive.
    Parallel(Primitive),
    /// LZ77 followed by the XOR cipher.
    Encrypted,
    /// Progressive block container.
    Progressive,
}

/// One selectable codec.
#[derive(Debug, Clone, Copy)]
pub struct CodecEntry {
    /// Registry index, as used by `-c`/`-d`.
    pub index: u8,
    /// Short name.
    pub name: &'static str,
    /// One-line description for the listing.
    pub description: &'static str,
    /// Default output extension.
    pub extension: &'static str,
    /// Dispatch flavor.
    pub flavor: CodecFlavor,
}

const REGISTRY: [CodecEntry; 8] = [
    CodecEntry {
        index: 0,
        name: "Huffman",
        description: "Huffman coding (good compression ratio)",
        extension: "huf",
        flavor: CodecFlavor::Plain(Primitive::Huffman),
    },
    CodecEntry {
        index: 1,
        name: "RLE",
        description: "Run-length encoding (fast, good for repetitive data)",
        extension: "rle",
        flavor: CodecFlavor::Plain(Primitive::Rle),
    },
    CodecEntry {
        index: 2,
        name: "Huffman-Parallel",
        description: "Huffman coding across a worker pool",
        extension: "hufp",
        flavor: CodecFlavor::Parallel(Primitive::Huffman),
    },
    CodecEntry {
        index: 3,
        name: "RLE-Parallel",
        description: "Run-length encoding across a worker pool",
        extension: "rlep",
        flavor: CodecFlavor::Parallel(Primitive::Rle),
    },
    CodecEntry {
        index: 4,
        name: "LZ77",
        description: "Lempel-Ziv 77 sliding window",
        extension: "lz77",
        flavor: CodecFlavor::Plain(Primitive::Lz77),
    },
    CodecEntry {
        index: 5,
        name: "LZ77-Parallel",
        description: "Lempel-Ziv 77 across a worker pool",
        extension: "lz77p",
        flavor: CodecFlavor::Parallel(Primitive::Lz77),
    },
    CodecEntry {
        index: 6,
        name: "LZ77-Encrypted",
        description: "Lempel-Ziv 77 with XOR obfuscation",
        extension: "lz77e",
        flavor: CodecFlavor::Encrypted,
    },
    CodecEntry {
        index: 7,
        name: "Progressive",
        description: "Block container with random access",
        extension: "prog",
        flavor: CodecFlavor::Progressive,
    },
];

/// All selectable codecs, ordered by index.
pub fn codec_registry() -> &'static [CodecEntry] {
    &REGISTRY
}

/// Looks up a registry entry.
pub fn codec_entry(index: u8) -> Option<&'static CodecEntry> {
    REGISTRY.get(index as usize)
}

/// Guesses the codec index from a compressed file's extension.
pub fn detect_codec(path: &Path) -> Option<u8> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    REGISTRY
        .iter()
        .find(|entry| entry.extension == ext)
        .map(|entry| entry.index)
}

/// True when `path` looks like the first part of a split archive.
pub fn looks_like_split_part(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.len() == 8 && e.starts_with("part") && e[4..].chars().all(|c| c.is_ascii_digit()))
        .unwrap_or(false)
}

/// One unit of work handed to the engine.
#[derive(Debug, Clone)]
pub struct Request {
    /// Compress or decompress.
    pub mode: Mode,
    /// Codec registry index.
    pub codec_index: u8,
    /// True when the caller named the codec; otherwise extension sniffing
    /// may override it on decompress.
    pub codec_explicit: bool,
    /// Input path.
    pub input: PathBuf,
    /// Output path; derived from the input when absent.
    pub output: Option<PathBuf>,
    /// Chunked two-pass processing for files larger than memory.
    pub large_file: bool,
    /// Wrap in (or read from) the progressive container.
    pub progressive: bool,
    /// Spread across (or reassemble from) split-archive parts.
    pub split: bool,
    /// Run the deduplication filter before (or after) the codec.
    pub dedup: bool,
    /// Progressive block range to decode.
    pub range: Option<(u32, u32)>,
    /// Progressive streaming decode (callback per block).
    pub stream: bool,
    /// Engine configuration.
    pub config: Config,
}

impl Request {
    /// A compress request for `input` with defaults everywhere else.
    pub fn compress(input: impl Into<PathBuf>) -> Self {
        Self {
            mode: Mode::Compress,
            codec_index: 0,
            codec_explicit: false,
            input: input.into(),
            output: None,
            large_file: false,
            progressive: false,
            split: false,
            dedup: false,
            range: None,
            stream: false,
            config: Config::default(),
        }
    }

    /// A decompress request for `input` with defaults everywhere else.
    pub fn decompress(input: impl Into<PathBuf>) -> Self {
        Self {
            mode: Mode::Decompress,
            ..Self::compress(input)
        }
    }

    /// Resolves the output path: append the codec extension when
    /// compressing, strip a recognized extension when decompressing.
    pub fn resolved_output(&self, entry: &CodecEntry) -> PathBuf {
        if let Some(output) = &self.output {
            return output.clone();
        }
        match self.mode {
            Mode::Compress => {
                let mut name = self.input.as_os_str().to_os_string();
                name.push(format!(".{}", entry.extension));
                PathBuf::from(name)
            }
            Mode::Decompress => {
                let stripped = self
                    .input
                    .extension()
                    .and_then(|e| e.to_str())
                    .map(|_| self.input.with_extension(""))
                    .unwrap_or_else(|| self.input.clone());
                if stripped == self.input {
                    let mut name = self.input.as_os_str().to_os_string();
                    name.push(".out");
                    PathBuf::from(name)
                } else {
                    stripped
                }
            }
        }
    }
}
