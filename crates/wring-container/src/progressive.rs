//! Progressive block container.
//!
//! A `PROG` file packages a stream into independently decodable blocks.
//! Every block carries its own self-contained codec stream (a Huffman block
//! embeds its own tree), so any block can be decoded without its neighbors.
//!
//! Layout: `"PROG"` | `version: u8` | `algorithm: u8` | `flags: u8` |
//! `block_size: u32 LE` | `total_blocks: u32 LE` | `original_size: u64 LE` |
//! optional file checksum (tag + payload), then per block
//! `{ block_id: u32 LE, compressed_size: u32 LE, original_size: u32 LE,
//! optional block checksum, payload }`.
//!
//! With the streaming-optimized flag, every block occupies a fixed slot of
//! `block_header_len + block_size` bytes (payload zero-padded), which makes
//! a block's position directly computable; otherwise locating block `k`
//! walks the preceding block headers.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use bytes::{Buf, BufMut, BytesMut};
use tracing::{debug, info, warn};

use wring_codec::{Codec, Primitive};
use wring_core::{Checksum, ChecksumHasher, ChecksumKind, ChunkReader, ChunkWriter, IoError, Preset};
use wring_filter::xor_in_place;

use crate::ContainerError;

/// Magic prefix of a progressive file.
pub const PROG_MAGIC: &[u8; 4] = b"PROG";
/// Newest format revision this build reads and writes.
pub const CURRENT_VERSION: u8 = 1;

/// Flag bit: file and block checksums are present.
pub const FLAG_HAS_CHECKSUM: u8 = 0x01;
/// Flag bit: fixed-slot layout; block positions are computable.
pub const FLAG_STREAMING_OPTIMIZED: u8 = 0x02;
/// Flag bit: block payloads are XOR-encrypted.
pub const FLAG_ENCRYPTED: u8 = 0x04;

/// Progressive file header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressiveHeader {
    /// Format revision.
    pub version: u8,
    /// Algorithm byte (codec registry index).
    pub algorithm: u8,
    /// Flag bits.
    pub flags: u8,
    /// Uncompressed bytes per block (last block may be shorter).
    pub block_size: u32,
    /// Number of blocks.
    pub total_blocks: u32,
    /// Uncompressed stream length.
    pub original_size: u64,
    /// Whole-file checksum; [`Checksum::None`] when the flag is clear.
    pub checksum: Checksum,
}

impl ProgressiveHeader {
    /// True when per-block checksums are stored.
    pub fn has_checksum(&self) -> bool {
        self.flags & FLAG_HAS_CHECKSUM != 0
    }

    /// True when the fixed-slot layout is in effect.
    pub fn streaming_optimized(&self) -> bool {
        self.flags & FLAG_STREAMING_OPTIMIZED != 0
    }

    /// True when block payloads are encrypted.
    pub fn encrypted(&self) -> bool {
        self.flags & FLAG_ENCRYPTED != 0
    }

    /// Encoded header length in bytes.
    pub fn encoded_len(&self) -> u64 {
        let mut len = 4 + 1 + 1 + 1 + 4 + 4 + 8;
        if self.has_checksum() {
            len += self.checksum.encoded_len();
        }
        len as u64
    }

    /// Encoded length of one block header under this file's settings.
    pub fn block_header_len(&self) -> u64 {
        let mut len = 4 + 4 + 4;
        if self.has_checksum() {
            len += 4 + self.checksum.kind().payload_len();
        }
        len as u64
    }

    fn encode(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(self.encoded_len() as usize);
        buf.put_slice(PROG_MAGIC);
        buf.put_u8(self.version);
        buf.put_u8(self.algorithm);
        buf.put_u8(self.flags);
        buf.put_u32_le(self.block_size);
        buf.put_u32_le(self.total_blocks);
        buf.put_u64_le(self.original_size);
        if self.has_checksum() {
            self.checksum.encode(&mut buf);
        }
        buf.to_vec()
    }

    fn read_from(file: &mut File) -> Result<Self, ContainerError> {
        let mut fixed = [0u8; 23];
        file.read_exact(&mut fixed)
            .map_err(|e| ContainerError::Io(IoError::Read(e)))?;
        if &fixed[..4] != PROG_MAGIC {
            return Err(ContainerError::BadFormat(
                "not a progressive compression file".into(),
            ));
        }
        let mut buf = &fixed[4..];
        let version = buf.get_u8();
        if version > CURRENT_VERSION {
            return Err(ContainerError::UnsupportedVersion(version));
        }
        let algorithm = buf.get_u8();
        let flags = buf.get_u8();
        let block_size = buf.get_u32_le();
        let total_blocks = buf.get_u32_le();
        let original_size = buf.get_u64_le();

        let checksum = if flags & FLAG_HAS_CHECKSUM != 0 {
            let mut tag = [0u8; 4];
            file.read_exact(&mut tag)
                .map_err(|e| ContainerError::Io(IoError::Read(e)))?;
            let kind = ChecksumKind::from_tag(u32::from_le_bytes(tag))?;
            let mut payload = vec![0u8; kind.payload_len()];
            file.read_exact(&mut payload)
                .map_err(|e| ContainerError::Io(IoError::Read(e)))?;
            let mut slice = &payload[..];
            Checksum::decode_payload(kind, &mut slice)?
        } else {
            Checksum::None
        };

        Ok(Self {
            version,
            algorithm,
            flags,
            block_size,
            total_blocks,
            original_size,
            checksum,
        })
    }
}

/// One block's header.
#[derive(Debug, Clone, PartialEq, Eq)]
struct BlockHeader {
    block_id: u32,
    compressed_size: u32,
    original_size: u32,
    checksum: Checksum,
}

impl BlockHeader {
    fn encode(&self, has_checksum: bool) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(12 + self.checksum.encoded_len());
        buf.put_u32_le(self.block_id);
        buf.put_u32_le(self.compressed_size);
        buf.put_u32_le(self.original_size);
        if has_checksum {
            self.checksum.encode(&mut buf);
        }
        buf.to_vec()
    }

    fn read_from(file: &mut File, has_checksum: bool) -> Result<Self, ContainerError> {
        let mut fixed = [0u8; 12];
        file.read_exact(&mut fixed)
            .map_err(|e| ContainerError::Io(IoError::Read(e)))?;
        let mut buf = &fixed[..];
        let block_id = buf.get_u32_le();
        let compressed_size = buf.get_u32_le();
        let original_size = buf.get_u32_le();

        let checksum = if has_checksum {
            let mut tag = [0u8; 4];
            file.read_exact(&mut tag)
                .map_err(|e| ContainerError::Io(IoError::Read(e)))?;
            let kind = ChecksumKind::from_tag(u32::from_le_bytes(tag))?;
            let mut payload = vec![0u8; kind.payload_len()];
            file.read_exact(&mut payload)
                .map_err(|e| ContainerError::Io(IoError::Read(e)))?;
            let mut slice = &payload[..];
            Checksum::decode_payload(kind, &mut slice)?
        } else {
            Checksum::None
        };

        Ok(Self {
            block_id,
            compressed_size,
            original_size,
            checksum,
        })
    }
}

/// Settings for writing a progressive file.
#[derive(Debug, Clone)]
pub struct ProgressiveOptions {
    /// Per-block codec (Huffman by default).
    pub primitive: Primitive,
    /// Codec parameter preset.
    pub preset: Preset,
    /// Uncompressed bytes per block.
    pub block_size: u32,
    /// Checksum algorithm for the file and every block.
    pub checksum: ChecksumKind,
    /// Use the fixed-slot layout for computable block positions.
    pub streaming_optimized: bool,
    /// XOR key for block payloads.
    pub key: Option<Vec<u8>>,
}

impl Default for ProgressiveOptions {
    fn default() -> Self {
        Self {
            primitive: Primitive::Huffman,
            preset: Preset::None,
            block_size: wring_core::config::DEFAULT_BLOCK_SIZE,
            checksum: ChecksumKind::None,
            streaming_optimized: false,
            key: None,
        }
    }
}

/// Writes progressive files.
pub struct ProgressiveWriter;

impl ProgressiveWriter {
    /// Compresses `input` into a progressive file at `output`.
    pub fn compress_file(
        input: &Path,
        output: &Path,
        options: &ProgressiveOptions,
    ) -> Result<ProgressiveHeader, ContainerError> {
        let mut reader = ChunkReader::open(input, options.block_size as usize)?;
        let file_size = reader.file_size();
        let total_blocks = file_size.div_ceil(options.block_size as u64) as u32;

        let mut flags = 0u8;
        if options.checksum != ChecksumKind::None {
            flags |= FLAG_HAS_CHECKSUM;
        }
        if options.streaming_optimized {
            flags |= FLAG_STREAMING_OPTIMIZED;
        }
        if options.key.is_some() {
            flags |= FLAG_ENCRYPTED;
        }

        let mut header = ProgressiveHeader {
            version: CURRENT_VERSION,
            algorithm: options.primitive.tag(),
            flags,
            block_size: options.block_size,
            total_blocks,
            original_size: file_size,
            checksum: Checksum::zeroed(options.checksum),
        };

        let mut out = File::create(output).map_err(|source| {
            ContainerError::Io(IoError::Open {
                path: output.to_path_buf(),
                source,
            })
        })?;
        out.write_all(&header.encode())
            .map_err(|e| ContainerError::Io(IoError::Write(e)))?;

        let codec = options.primitive.codec(options.preset);
        let mut file_hasher = ChecksumHasher::new(options.checksum);
        let mut block_id = 0u32;
        while let Some(chunk) = reader.next_chunk()? {
            file_hasher.update(chunk);
            let mut payload = codec.compress(chunk)?;
            if let Some(key) = &options.key {
                xor_in_place(&mut payload, key);
            }
            if options.streaming_optimized && payload.len() > options.block_size as usize {
                return Err(ContainerError::BlockTooLarge { block_id });
            }

            let block_header = BlockHeader {
                block_id,
                compressed_size: payload.len() as u32,
                original_size: chunk.len() as u32,
                checksum: Checksum::compute(options.checksum, &payload),
            };
            out.write_all(&block_header.encode(header.has_checksum()))
                .map_err(|e| ContainerError::Io(IoError::Write(e)))?;
            out.write_all(&payload)
                .map_err(|e| ContainerError::Io(IoError::Write(e)))?;
            if options.streaming_optimized {
                let padding = options.block_size as usize - payload.len();
                if padding > 0 {
                    out.write_all(&vec![0u8; padding])
                        .map_err(|e| ContainerError::Io(IoError::Write(e)))?;
                }
            }
            block_id += 1;
        }

        // Rewrite the header now that the file checksum is known.
        header.checksum = file_hasher.finalize();
        out.seek(SeekFrom::Start(0))
            .map_err(|e| ContainerError::Io(IoError::Seek(e)))?;
        out.write_all(&header.encode())
            .map_err(|e| ContainerError::Io(IoError::Write(e)))?;

        info!(
            blocks = total_blocks,
            original_size = file_size,
            algorithm = header.algorithm,
            "progressive compress complete"
        );
        Ok(header)
    }
}

/// Decode-side position within a progressive file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderState {
    /// Header parsed; no block positioned yet (block 0 is next).
    HeaderLoaded,
    /// Positioned at a specific block.
    Positioned,
}

/// Random-access reader over a progressive file.
pub struct ProgressiveReader {
    file: File,
    header: ProgressiveHeader,
    data_start: u64,
    next_block: u32,
    state: ReaderState,
    preset: Preset,
    key: Option<Vec<u8>>,
}

impl ProgressiveReader {
    /// Opens `path` and loads its header.
    pub fn open(
        path: &Path,
        preset: Preset,
        key: Option<Vec<u8>>,
    ) -> Result<Self, ContainerError> {
        let mut file = File::open(path).map_err(|source| {
            ContainerError::Io(IoError::Open {
                path: path.to_path_buf(),
                source,
            })
        })?;
        let header = ProgressiveHeader::read_from(&mut file)?;
        let data_start = header.encoded_len();
        debug!(
            blocks = header.total_blocks,
            flags = header.flags,
            "opened progressive file"
        );
        Ok(Self {
            file,
            header,
            data_start,
            next_block: 0,
            state: ReaderState::HeaderLoaded,
            preset,
            key,
        })
    }

    /// The parsed file header.
    pub fn header(&self) -> &ProgressiveHeader {
        &self.header
    }

    /// Current decode-side state.
    pub fn state(&self) -> ReaderState {
        self.state
    }

    /// Positions at `block_id`.
    ///
    /// With the fixed-slot layout the target offset is computed directly;
    /// otherwise every preceding block header is read to skip its payload.
    pub fn seek(&mut self, block_id: u32) -> Result<(), ContainerError> {
        if block_id >= self.header.total_blocks {
            return Err(ContainerError::InvalidRange {
                start: block_id,
                end: block_id,
                total: self.header.total_blocks,
            });
        }

        if self.header.streaming_optimized() {
            let slot = self.header.block_header_len() + self.header.block_size as u64;
            let position = self.data_start + block_id as u64 * slot;
            self.file
                .seek(SeekFrom::Start(position))
                .map_err(|e| ContainerError::Io(IoError::Seek(e)))?;
        } else {
            self.file
                .seek(SeekFrom::Start(self.data_start))
                .map_err(|e| ContainerError::Io(IoError::Seek(e)))?;
            for _ in 0..block_id {
                let skipped = BlockHeader::read_from(&mut self.file, self.header.has_checksum())?;
                self.file
                    .seek(SeekFrom::Current(skipped.compressed_size as i64))
                    .map_err(|e| ContainerError::Io(IoError::Seek(e)))?;
            }
        }

        self.next_block = block_id;
        self.state = ReaderState::Positioned;
        Ok(())
    }

    /// Decodes the block at the current position and advances.
    pub fn decode_block(&mut self) -> Result<Vec<u8>, ContainerError> {
        if self.next_block >= self.header.total_blocks {
            return Err(ContainerError::InvalidRange {
                start: self.next_block,
                end: self.next_block,
                total: self.header.total_blocks,
            });
        }

        let block_header = BlockHeader::read_from(&mut self.file, self.header.has_checksum())?;
        if block_header.block_id != self.next_block {
            return Err(ContainerError::BadFormat(format!(
                "block id mismatch: expected {}, found {}",
                self.next_block, block_header.block_id
            )));
        }
        if block_header.original_size > self.header.block_size {
            return Err(ContainerError::BadFormat(format!(
                "block {} original size {} exceeds block size {}",
                block_header.block_id, block_header.original_size, self.header.block_size
            )));
        }

        let mut payload = vec![0u8; block_header.compressed_size as usize];
        self.file
            .read_exact(&mut payload)
            .map_err(|e| ContainerError::Io(IoError::Read(e)))?;
        if self.header.streaming_optimized() {
            let padding = self.header.block_size as u64 - block_header.compressed_size as u64;
            if padding > 0 {
                self.file
                    .seek(SeekFrom::Current(padding as i64))
                    .map_err(|e| ContainerError::Io(IoError::Seek(e)))?;
            }
        }

        if self.header.has_checksum() && !block_header.checksum.verify(&payload) {
            warn!(block_id = block_header.block_id, "block checksum mismatch");
            return Err(ContainerError::ChecksumMismatch {
                block_id: Some(block_header.block_id),
            });
        }

        if self.header.encrypted() {
            let key = self.key.as_deref().ok_or_else(|| {
                ContainerError::BadFormat("encrypted container requires a key".into())
            })?;
            xor_in_place(&mut payload, key);
        }

        let primitive = Primitive::from_tag(self.header.algorithm).ok_or_else(|| {
            ContainerError::BadFormat(format!("unknown algorithm {}", self.header.algorithm))
        })?;
        let decoded = primitive.codec(self.preset).decompress(&payload)?;
        if decoded.len() != block_header.original_size as usize {
            return Err(ContainerError::BadFormat(format!(
                "block {} decoded to {} bytes, header declared {}",
                block_header.block_id,
                decoded.len(),
                block_header.original_size
            )));
        }

        self.next_block += 1;
        self.state = ReaderState::Positioned;
        Ok(decoded)
    }

    /// Decompresses the whole file to `output`.
    pub fn decompress_file(
        input: &Path,
        output: &Path,
        preset: Preset,
        key: Option<Vec<u8>>,
    ) -> Result<(), ContainerError> {
        let mut reader = Self::open(input, preset, key)?;
        let mut writer = ChunkWriter::create(output, reader.header.block_size as usize)?;
        for _ in 0..reader.header.total_blocks {
            let block = reader.decode_block()?;
            writer.write(&block)?;
        }
        writer.finish()?;
        Ok(())
    }

    /// Decompresses blocks `start..=end` to `output`.
    pub fn decompress_range(
        input: &Path,
        output: &Path,
        start: u32,
        end: u32,
        preset: Preset,
        key: Option<Vec<u8>>,
    ) -> Result<(), ContainerError> {
        let mut reader = Self::open(input, preset, key)?;
        let total = reader.header.total_blocks;
        if start > end || end >= total {
            return Err(ContainerError::InvalidRange { start, end, total });
        }

        reader.seek(start)?;
        let mut writer = ChunkWriter::create(output, reader.header.block_size as usize)?;
        for _ in start..=end {
            let block = reader.decode_block()?;
            writer.write(&block)?;
        }
        writer.finish()?;
        Ok(())
    }

    /// Decodes every block in order, handing each to `callback`.
    ///
    /// Iteration stops early when the callback returns `false`.
    pub fn stream(
        input: &Path,
        preset: Preset,
        key: Option<Vec<u8>>,
        mut callback: impl FnMut(&[u8]) -> bool,
    ) -> Result<(), ContainerError> {
        let mut reader = Self::open(input, preset, key)?;
        for _ in 0..reader.header.total_blocks {
            let block = reader.decode_block()?;
            if !callback(&block) {
                break;
            }
        }
        Ok(())
    }
}
