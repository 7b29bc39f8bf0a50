//! Checksum kernel.
//!
//! One tagged value covers every integrity algorithm the engine supports.
//! The wire form is always `tag: u32 LE` followed by exactly the payload
//! width the tag declares, so a reader that has consumed the tag knows how
//! many bytes to take.

use bytes::{Buf, BufMut, BytesMut};
use md5::{Digest as _, Md5};
use sha2::Sha256;
use thiserror::Error;

/// Errors raised while decoding a stored checksum.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChecksumError {
    /// The stored tag does not name a known algorithm.
    #[error("unknown checksum tag: {0}")]
    UnknownTag(u32),

    /// The buffer ended before the declared payload width.
    #[error("truncated checksum: expected {expected} bytes, got {available}")]
    Truncated {
        /// Bytes the tag declared.
        expected: usize,
        /// Bytes actually available.
        available: usize,
    },
}

/// Identifies a checksum algorithm without carrying a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub enum ChecksumKind {
    /// No integrity checking.
    #[default]
    None,
    /// CRC32, IEEE polynomial (reflected 0xEDB88320).
    Crc32,
    /// MD5, 16-byte digest.
    Md5,
    /// SHA-256, 32-byte digest.
    Sha256,
}

impl ChecksumKind {
    /// Stable wire tag.
    pub fn tag(self) -> u32 {
        match self {
            ChecksumKind::None => 0,
            ChecksumKind::Crc32 => 1,
            ChecksumKind::Md5 => 2,
            ChecksumKind::Sha256 => 3,
        }
    }

    /// Inverse of [`ChecksumKind::tag`].
    pub fn from_tag(tag: u32) -> Result<Self, ChecksumError> {
        match tag {
            0 => Ok(ChecksumKind::None),
            1 => Ok(ChecksumKind::Crc32),
            2 => Ok(ChecksumKind::Md5),
            3 => Ok(ChecksumKind::Sha256),
            other => Err(ChecksumError::UnknownTag(other)),
        }
    }

    /// Payload width in bytes for this algorithm.
    pub fn payload_len(self) -> usize {
        match self {
            ChecksumKind::None => 0,
            ChecksumKind::Crc32 => 4,
            ChecksumKind::Md5 => 16,
            ChecksumKind::Sha256 => 32,
        }
    }

    /// Parses the CLI-facing index (0..=3).
    pub fn from_index(index: u8) -> Option<Self> {
        match index {
            0 => Some(ChecksumKind::None),
            1 => Some(ChecksumKind::Crc32),
            2 => Some(ChecksumKind::Md5),
            3 => Some(ChecksumKind::Sha256),
            _ => None,
        }
    }
}

/// A computed checksum value, tagged with its algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Checksum {
    /// No checksum stored.
    None,
    /// CRC32 value.
    Crc32(u32),
    /// MD5 digest.
    Md5([u8; 16]),
    /// SHA-256 digest.
    Sha256([u8; 32]),
}

impl Checksum {
    /// The algorithm this value was produced by.
    pub fn kind(&self) -> ChecksumKind {
        match self {
            Checksum::None => ChecksumKind::None,
            Checksum::Crc32(_) => ChecksumKind::Crc32,
            Checksum::Md5(_) => ChecksumKind::Md5,
            Checksum::Sha256(_) => ChecksumKind::Sha256,
        }
    }

    /// An all-zero value of the given kind, used as a rewritable
    /// placeholder in headers that are finalized after the payload.
    pub fn zeroed(kind: ChecksumKind) -> Self {
        match kind {
            ChecksumKind::None => Checksum::None,
            ChecksumKind::Crc32 => Checksum::Crc32(0),
            ChecksumKind::Md5 => Checksum::Md5([0; 16]),
            ChecksumKind::Sha256 => Checksum::Sha256([0; 32]),
        }
    }

    /// Computes the checksum of `data` with the given algorithm.
    pub fn compute(kind: ChecksumKind, data: &[u8]) -> Self {
        let mut hasher = ChecksumHasher::new(kind);
        hasher.update(data);
        hasher.finalize()
    }

    /// Returns true when `data` hashes to this value.
    ///
    /// A [`Checksum::None`] verifies everything.
    pub fn verify(&self, data: &[u8]) -> bool {
        match self {
            Checksum::None => true,
            _ => Checksum::compute(self.kind(), data) == *self,
        }
    }

    /// Encodes as `tag: u32 LE` followed by the payload.
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.kind().tag());
        match self {
            Checksum::None => {}
            Checksum::Crc32(v) => buf.put_u32_le(*v),
            Checksum::Md5(d) => buf.put_slice(d),
            Checksum::Sha256(d) => buf.put_slice(d),
        }
    }

    /// Decodes a tag-prefixed checksum from `buf`.
    pub fn decode(buf: &mut impl Buf) -> Result<Self, ChecksumError> {
        if buf.remaining() < 4 {
            return Err(ChecksumError::Truncated {
                expected: 4,
                available: buf.remaining(),
            });
        }
        let kind = ChecksumKind::from_tag(buf.get_u32_le())?;
        Self::decode_payload(kind, buf)
    }

    /// Decodes just the payload when the algorithm is already known.
    pub fn decode_payload(kind: ChecksumKind, buf: &mut impl Buf) -> Result<Self, ChecksumError> {
        let need = kind.payload_len();
        if buf.remaining() < need {
            return Err(ChecksumError::Truncated {
                expected: need,
                available: buf.remaining(),
            });
        }
        Ok(match kind {
            ChecksumKind::None => Checksum::None,
            ChecksumKind::Crc32 => Checksum::Crc32(buf.get_u32_le()),
            ChecksumKind::Md5 => {
                let mut d = [0u8; 16];
                buf.copy_to_slice(&mut d);
                Checksum::Md5(d)
            }
            ChecksumKind::Sha256 => {
                let mut d = [0u8; 32];
                buf.copy_to_slice(&mut d);
                Checksum::Sha256(d)
            }
        })
    }

    /// Encoded width including the tag.
    pub fn encoded_len(&self) -> usize {
        4 + self.kind().payload_len()
    }
}

/// Incremental checksum computation for data that arrives in chunks.
pub enum ChecksumHasher {
    /// Accumulates nothing.
    None,
    /// Running CRC32 state.
    Crc32(crc32fast::Hasher),
    /// Running MD5 state.
    Md5(Md5),
    /// Running SHA-256 state.
    Sha256(Sha256),
}

impl ChecksumHasher {
    /// Creates a hasher for the given algorithm.
    pub fn new(kind: ChecksumKind) -> Self {
        match kind {
            ChecksumKind::None => ChecksumHasher::None,
            ChecksumKind::Crc32 => ChecksumHasher::Crc32(crc32fast::Hasher::new()),
            ChecksumKind::Md5 => ChecksumHasher::Md5(Md5::new()),
            ChecksumKind::Sha256 => ChecksumHasher::Sha256(Sha256::new()),
        }
    }

    /// Folds more data into the running state.
    pub fn update(&mut self, data: &[u8]) {
        match self {
            ChecksumHasher::None => {}
            ChecksumHasher::Crc32(h) => h.update(data),
            ChecksumHasher::Md5(h) => h.update(data),
            ChecksumHasher::Sha256(h) => h.update(data),
        }
    }

    /// Finishes and returns the tagged value.
    pub fn finalize(self) -> Checksum {
        match self {
            ChecksumHasher::None => Checksum::None,
            ChecksumHasher::Crc32(h) => Checksum::Crc32(h.finalize()),
            ChecksumHasher::Md5(h) => Checksum::Md5(h.finalize().into()),
            ChecksumHasher::Sha256(h) => Checksum::Sha256(h.finalize().into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crc32_check_value() {
        // CRC-32/ISO-HDLC check input
        let c = Checksum::compute(ChecksumKind::Crc32, b"123456789");
        assert_eq!(c, Checksum::Crc32(0xCBF43926));
    }

    #[test]
    fn md5_known_vectors() {
        let empty = Checksum::compute(ChecksumKind::Md5, b"");
        let Checksum::Md5(d) = empty else {
            panic!("wrong variant")
        };
        assert_eq!(hex::encode(d), "d41d8cd98f00b204e9800998ecf8427e");

        let abc = Checksum::compute(ChecksumKind::Md5, b"abc");
        let Checksum::Md5(d) = abc else {
            panic!("wrong variant")
        };
        assert_eq!(hex::encode(d), "900150983cd24fb0d6963f7d28e17f72");
    }

    #[test]
    fn sha256_known_vectors() {
        let empty = Checksum::compute(ChecksumKind::Sha256, b"");
        let Checksum::Sha256(d) = empty else {
            panic!("wrong variant")
        };
        assert_eq!(
            hex::encode(d),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );

        let abc = Checksum::compute(ChecksumKind::Sha256, b"abc");
        let Checksum::Sha256(d) = abc else {
            panic!("wrong variant")
        };
        assert_eq!(
            hex::encode(d),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn incremental_matches_oneshot() {
        let data = vec![0xA5u8; 100_000];
        for kind in [ChecksumKind::Crc32, ChecksumKind::Md5, ChecksumKind::Sha256] {
            let mut hasher = ChecksumHasher::new(kind);
            for part in data.chunks(7777) {
                hasher.update(part);
            }
            assert_eq!(hasher.finalize(), Checksum::compute(kind, &data));
        }
    }

    #[test]
    fn encode_decode_round_trip() {
        let values = [
            Checksum::None,
            Checksum::Crc32(0xDEADBEEF),
            Checksum::Md5([7u8; 16]),
            Checksum::Sha256([9u8; 32]),
        ];
        for value in values {
            let mut buf = BytesMut::new();
            value.encode(&mut buf);
            assert_eq!(buf.len(), value.encoded_len());
            let mut slice = &buf[..];
            assert_eq!(Checksum::decode(&mut slice).unwrap(), value);
        }
    }

    #[test]
    fn verify_rejects_mutation() {
        let data = b"the quick brown fox";
        let c = Checksum::compute(ChecksumKind::Sha256, data);
        assert!(c.verify(data));
        assert!(!c.verify(b"the quick brown fax"));
        assert!(Checksum::None.verify(data));
    }

    #[test]
    fn unknown_tag_is_rejected() {
        let mut buf = BytesMut::new();
        buf.put_u32_le(99);
        let mut slice = &buf[..];
        assert!(matches!(
            Checksum::decode(&mut slice),
            Err(ChecksumError::UnknownTag(99))
        ));
    }
}
