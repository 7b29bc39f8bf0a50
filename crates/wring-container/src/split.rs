//! Split archives.
//!
//! One logical compressed output spread across numbered part files. Each
//! part holds a header and the codec stream of that part's slice of the
//! source: `"SPLT"` | `part_number: u32 LE` (1-based) | `total_parts: u32
//! LE` | `part_size: u64 LE` (source bytes in this part) | `total_size: u64
//! LE` | `checksum_type: u8` | `checksum: [u8; 32]` (zero-padded) |
//! compressed payload. Part checksums cover the part's source slice.

use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use bytes::{Buf, BufMut, BytesMut};
use tracing::{info, warn};

use wring_codec::{Codec, Primitive};
use wring_core::config::MIN_SPLIT_SIZE;
use wring_core::{Checksum, ChecksumKind, ChunkReader, IoError, Preset};

use crate::ContainerError;

/// Magic prefix of every part file.
pub const SPLIT_MAGIC: &[u8; 4] = b"SPLT";
/// Highest part number the `.partNNNN` scheme can express.
pub const MAX_SPLIT_FILES: u64 = 9999;
/// Fixed width of the stored checksum field.
const CHECKSUM_FIELD: usize = 32;
/// Encoded part header length.
const HEADER_LEN: usize = 4 + 4 + 4 + 8 + 8 + 1 + CHECKSUM_FIELD;

/// Header of one archive part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitPartHeader {
    /// 1-based part number.
    pub part_number: u32,
    /// Parts in the whole archive.
    pub total_parts: u32,
    /// Source bytes covered by this part.
    pub part_size: u64,
    /// Source bytes in the whole archive.
    pub total_size: u64,
    /// Checksum algorithm for the part checksums.
    pub checksum_kind: ChecksumKind,
    /// Checksum of this part's source slice, zero-padded to 32 bytes.
    pub checksum: [u8; CHECKSUM_FIELD],
}

impl SplitPartHeader {
    fn encode(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(HEADER_LEN);
        buf.put_slice(SPLIT_MAGIC);
        buf.put_u32_le(self.part_number);
        buf.put_u32_le(self.total_parts);
        buf.put_u64_le(self.part_size);
        buf.put_u64_le(self.total_size);
        buf.put_u8(self.checksum_kind.tag() as u8);
        buf.put_slice(&self.checksum);
        buf.to_vec()
    }

    fn read_from(file: &mut File) -> Result<Self, ContainerError> {
        let mut raw = [0u8; HEADER_LEN];
        file.read_exact(&mut raw)
            .map_err(|e| ContainerError::Io(IoError::Read(e)))?;
        if &raw[..4] != SPLIT_MAGIC {
            return Err(ContainerError::BadFormat(
                "not a split archive part".into(),
            ));
        }
        let mut buf = &raw[4..];
        let part_number = buf.get_u32_le();
        let total_parts = buf.get_u32_le();
        let part_size = buf.get_u64_le();
        let total_size = buf.get_u64_le();
        let checksum_kind = ChecksumKind::from_tag(buf.get_u8() as u32)?;
        let mut checksum = [0u8; CHECKSUM_FIELD];
        checksum.copy_from_slice(&buf[..CHECKSUM_FIELD]);
        Ok(Self {
            part_number,
            total_parts,
            part_size,
            total_size,
            checksum_kind,
            checksum,
        })
    }

    /// The stored checksum as a tagged value.
    pub fn stored_checksum(&self) -> Result<Checksum, ContainerError> {
        let mut slice = &self.checksum[..self.checksum_kind.payload_len()];
        Ok(Checksum::decode_payload(self.checksum_kind, &mut slice)?)
    }
}

/// Filename of part `number` for `base`: `<base>.partNNNN`.
pub fn part_path(base: &Path, number: u32) -> PathBuf {
    let mut name = base.as_os_str().to_os_string();
    name.push(format!(".part{number:04}"));
    PathBuf::from(name)
}

fn pad_checksum(checksum: &Checksum) -> [u8; CHECKSUM_FIELD] {
    let mut field = [0u8; CHECKSUM_FIELD];
    let mut buf = BytesMut::new();
    checksum.encode(&mut buf);
    // Skip the 4-byte tag; the header stores the kind separately.
    let payload = &buf[4..];
    field[..payload.len()].copy_from_slice(payload);
    field
}

/// Split-archive writer/reader around a primitive codec.
#[derive(Debug, Clone, Copy)]
pub struct SplitArchive {
    primitive: Primitive,
    preset: Preset,
}

impl SplitArchive {
    /// Creates an archive driver for `primitive` with `preset` parameters.
    pub fn new(primitive: Primitive, preset: Preset) -> Self {
        Self { primitive, preset }
    }

    /// Compresses `input` into parts of at most `max_part_size` source
    /// bytes named `<output_base>.partNNNN`.
    ///
    /// Returns the number of parts written.
    pub fn compress(
        &self,
        input: &Path,
        output_base: &Path,
        max_part_size: u64,
        checksum_kind: ChecksumKind,
    ) -> Result<u32, ContainerError> {
        let max_part_size = if max_part_size < MIN_SPLIT_SIZE {
            warn!(
                requested = max_part_size,
                using = MIN_SPLIT_SIZE,
                "split part size below minimum"
            );
            MIN_SPLIT_SIZE
        } else {
            max_part_size
        };

        let mut reader = ChunkReader::open(input, max_part_size.min(1 << 30) as usize)?;
        let total_size = reader.file_size();
        // An empty input still yields one (empty) part so the archive has a
        // header to decode from.
        let total_parts = total_size.div_ceil(max_part_size).max(1);
        if total_parts > MAX_SPLIT_FILES {
            return Err(ContainerError::TooManyParts(total_parts));
        }
        info!(
            parts = total_parts,
            total_size, max_part_size, "writing split archive"
        );

        let codec = self.primitive.codec(self.preset);
        for part in 1..=total_parts as u32 {
            let source: &[u8] = match reader.next_chunk()? {
                Some(chunk) => chunk,
                None => &[],
            };

            let header = SplitPartHeader {
                part_number: part,
                total_parts: total_parts as u32,
                part_size: source.len() as u64,
                total_size,
                checksum_kind,
                checksum: pad_checksum(&Checksum::compute(checksum_kind, source)),
            };
            let payload = codec.compress(source)?;

            let path = part_path(output_base, part);
            let mut out = File::create(&path).map_err(|source| {
                ContainerError::Io(IoError::Open {
                    path: path.clone(),
                    source,
                })
            })?;
            out.write_all(&header.encode())
                .map_err(|e| ContainerError::Io(IoError::Write(e)))?;
            out.write_all(&payload)
                .map_err(|e| ContainerError::Io(IoError::Write(e)))?;
        }

        Ok(total_parts as u32)
    }

    /// Reads parts `1..=N` of `input_base` and reassembles the original
    /// stream at `output`.
    pub fn decompress(&self, input_base: &Path, output: &Path) -> Result<(), ContainerError> {
        let first = Self::read_part(input_base, 1)?;
        let total_parts = first.0.total_parts;

        let mut out = File::create(output).map_err(|source| {
            ContainerError::Io(IoError::Open {
                path: output.to_path_buf(),
                source,
            })
        })?;

        let codec = self.primitive.codec(self.preset);
        let mut produced = 0u64;
        for part in 1..=total_parts {
            let (header, payload) = if part == 1 {
                first.clone()
            } else {
                Self::read_part(input_base, part)?
            };
            if header.part_number != part || header.total_parts != total_parts {
                return Err(ContainerError::MissingPart(part));
            }

            let decoded = codec.decompress(&payload)?;
            if decoded.len() as u64 != header.part_size {
                return Err(ContainerError::BadFormat(format!(
                    "part {part} decoded to {} bytes, header declared {}",
                    decoded.len(),
                    header.part_size
                )));
            }
            if header.checksum_kind != ChecksumKind::None
                && !header.stored_checksum()?.verify(&decoded)
            {
                return Err(ContainerError::ChecksumMismatch { block_id: None });
            }

            out.write_all(&decoded)
                .map_err(|e| ContainerError::Io(IoError::Write(e)))?;
            produced += decoded.len() as u64;
        }

        if produced != first.0.total_size {
            return Err(ContainerError::BadFormat(format!(
                "archive reassembled {produced} bytes, headers declared {}",
                first.0.total_size
            )));
        }
        Ok(())
    }

    fn read_part(base: &Path, number: u32) -> Result<(SplitPartHeader, Vec<u8>), ContainerError> {
        let path = part_path(base, number);
        let mut file = match File::open(&path) {
            Ok(file) => file,
            Err(_) => return Err(ContainerError::MissingPart(number)),
        };
        let header = SplitPartHeader::read_from(&mut file)?;
        let mut payload = Vec::new();
        file.read_to_end(&mut payload)
            .map_err(|e| ContainerError::Io(IoError::Read(e)))?;
        Ok((header, payload))
    }
}
