//! Buffered chunked file I/O.
//!
//! [`ChunkReader`] and [`ChunkWriter`] stream files of arbitrary size through
//! fixed-size buffers. The framed variants additionally wrap every chunk in a
//! length-prefixed record carrying a checksum, so a reader can detect (but
//! not repair) corruption chunk by chunk.

use std::fs::File;
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use bytes::{BufMut, BytesMut};
use thiserror::Error;
use tracing::debug;

use crate::checksum::{Checksum, ChecksumError, ChecksumKind};
use crate::DEFAULT_CHUNK_SIZE;

/// Errors from the filesystem boundary.
#[derive(Debug, Error)]
pub enum IoError {
    /// The file could not be opened or created.
    #[error("cannot open {path}: {source}")]
    Open {
        /// Path that failed to open.
        path: PathBuf,
        /// Underlying OS error.
        source: std::io::Error,
    },

    /// A read failed partway through.
    #[error("read failed: {0}")]
    Read(#[source] std::io::Error),

    /// A write failed partway through.
    #[error("write failed: {0}")]
    Write(#[source] std::io::Error),

    /// A seek failed.
    #[error("seek failed: {0}")]
    Seek(#[source] std::io::Error),

    /// A framed record was malformed.
    #[error("malformed chunk record: {0}")]
    BadRecord(#[from] ChecksumError),
}

/// Sequential reader delivering up to `chunk_size` bytes per call.
#[derive(Debug)]
pub struct ChunkReader {
    file: File,
    path: PathBuf,
    file_size: u64,
    position: u64,
    buffer: Vec<u8>,
}

impl ChunkReader {
    /// Opens `path` for chunked reading.
    pub fn open(path: impl AsRef<Path>, chunk_size: usize) -> Result<Self, IoError> {
        let path = path.as_ref().to_path_buf();
        let chunk_size = if chunk_size == 0 {
            DEFAULT_CHUNK_SIZE
        } else {
            chunk_size
        };
        let file = File::open(&path).map_err(|source| IoError::Open {
            path: path.clone(),
            source,
        })?;
        let file_size = file.metadata().map_err(IoError::Read)?.len();
        debug!(path = %path.display(), file_size, chunk_size, "opened chunk reader");
        Ok(Self {
            file,
            path,
            file_size,
            position: 0,
            buffer: vec![0u8; chunk_size],
        })
    }

    /// Total size of the underlying file.
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Current read offset.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Path this reader was opened with.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the next chunk, or `None` at end of stream (idempotently).
    pub fn next_chunk(&mut self) -> Result<Option<&[u8]>, IoError> {
        if self.position >= self.file_size {
            return Ok(None);
        }
        let want = (self.file_size - self.position).min(self.buffer.len() as u64) as usize;
        self.file
            .read_exact(&mut self.buffer[..want])
            .map_err(IoError::Read)?;
        self.position += want as u64;
        Ok(Some(&self.buffer[..want]))
    }

    /// Rewinds to the start of the file for another pass.
    pub fn reset(&mut self) -> Result<(), IoError> {
        self.file
            .seek(SeekFrom::Start(0))
            .map_err(IoError::Seek)?;
        self.position = 0;
        Ok(())
    }

    /// Skips forward to an absolute offset.
    pub fn seek_to(&mut self, offset: u64) -> Result<(), IoError> {
        self.file
            .seek(SeekFrom::Start(offset))
            .map_err(IoError::Seek)?;
        self.position = offset;
        Ok(())
    }
}

/// Buffered writer that flushes once its buffer exceeds the chunk size.
pub struct ChunkWriter {
    file: BufWriter<File>,
    buffer: Vec<u8>,
    chunk_size: usize,
    bytes_written: u64,
}

impl ChunkWriter {
    /// Creates or truncates `path` for chunked writing.
    pub fn create(path: impl AsRef<Path>, chunk_size: usize) -> Result<Self, IoError> {
        let path = path.as_ref().to_path_buf();
        let chunk_size = if chunk_size == 0 {
            DEFAULT_CHUNK_SIZE
        } else {
            chunk_size
        };
        let file = File::create(&path).map_err(|source| IoError::Open {
            path: path.clone(),
            source,
        })?;
        Ok(Self {
            file: BufWriter::new(file),
            buffer: Vec::with_capacity(chunk_size),
            chunk_size,
            bytes_written: 0,
        })
    }

    /// Appends `data`, flushing the internal buffer as it fills.
    pub fn write(&mut self, data: &[u8]) -> Result<(), IoError> {
        self.buffer.extend_from_slice(data);
        self.bytes_written += data.len() as u64;
        while self.buffer.len() >= self.chunk_size {
            let rest = self.buffer.split_off(self.chunk_size);
            self.file.write_all(&self.buffer).map_err(IoError::Write)?;
            self.buffer = rest;
        }
        Ok(())
    }

    /// Total bytes accepted so far.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Flushes remaining bytes and closes the file.
    pub fn finish(mut self) -> Result<(), IoError> {
        if !self.buffer.is_empty() {
            self.file.write_all(&self.buffer).map_err(IoError::Write)?;
        }
        self.file.flush().map_err(IoError::Write)?;
        Ok(())
    }
}

/// One framed chunk as read back from disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Chunk payload.
    pub data: Vec<u8>,
    /// Whether the stored checksum matched the payload. The reader reports
    /// a mismatch and leaves the abort decision to the caller.
    pub checksum_ok: bool,
}

/// Writer emitting `tag | checksum | data_length: u32 LE | data` records.
pub struct FramedWriter {
    inner: ChunkWriter,
    kind: ChecksumKind,
}

impl FramedWriter {
    /// Creates or truncates `path` for framed writing.
    pub fn create(
        path: impl AsRef<Path>,
        chunk_size: usize,
        kind: ChecksumKind,
    ) -> Result<Self, IoError> {
        Ok(Self {
            inner: ChunkWriter::create(path, chunk_size)?,
            kind,
        })
    }

    /// Writes one record framing `data`.
    pub fn write_record(&mut self, data: &[u8]) -> Result<(), IoError> {
        let checksum = Checksum::compute(self.kind, data);
        let mut header = BytesMut::with_capacity(checksum.encoded_len() + 4);
        checksum.encode(&mut header);
        header.put_u32_le(data.len() as u32);
        self.inner.write(&header)?;
        self.inner.write(data)
    }

    /// Flushes and closes.
    pub fn finish(self) -> Result<(), IoError> {
        self.inner.finish()
    }
}

/// Reader for the records produced by [`FramedWriter`].
pub struct FramedReader {
    file: File,
    remaining: u64,
}

impl FramedReader {
    /// Opens `path` for framed reading.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, IoError> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|source| IoError::Open {
            path: path.clone(),
            source,
        })?;
        let remaining = file.metadata().map_err(IoError::Read)?.len();
        Ok(Self { file, remaining })
    }

    fn read_exact(&mut self, n: usize) -> Result<Vec<u8>, IoError> {
        let mut buf = vec![0u8; n];
        self.file.read_exact(&mut buf).map_err(IoError::Read)?;
        self.remaining = self.remaining.saturating_sub(n as u64);
        Ok(buf)
    }

    /// Reads the next record, verifying its checksum; `None` at end of file.
    pub fn next_record(&mut self) -> Result<Option<Record>, IoError> {
        if self.remaining == 0 {
            return Ok(None);
        }
        let tag_bytes = self.read_exact(4)?;
        let tag = u32::from_le_bytes([tag_bytes[0], tag_bytes[1], tag_bytes[2], tag_bytes[3]]);
        let kind = ChecksumKind::from_tag(tag)?;
        let payload = self.read_exact(kind.payload_len())?;
        let mut payload_slice = &payload[..];
        let stored = Checksum::decode_payload(kind, &mut payload_slice)?;
        let len_bytes = self.read_exact(4)?;
        let data_len =
            u32::from_le_bytes([len_bytes[0], len_bytes[1], len_bytes[2], len_bytes[3]]) as usize;
        let data = self.read_exact(data_len)?;
        let checksum_ok = stored.verify(&data);
        Ok(Some(Record { data, checksum_ok }))
    }
}
