//! LZ77 sliding-window compression.
//!
//! Tokens are flag-prefixed: `0` introduces a literal byte, `1` a match of
//! `offset: u16` (big-endian) and `length: u8`. The stream opens with
//! `original_size: u64 LE`. Match offsets count backwards from the current
//! position; matches longer than 255 bytes continue with follow-up match
//! tokens at the same offset.

use bytes::{Buf, BufMut, BytesMut};

use crate::{Codec, CodecError};
use wring_core::Preset;

/// Sliding-window parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lz77Params {
    /// How far back matches may reach.
    pub window_size: usize,
    /// How far ahead a match may extend.
    pub lookahead_size: usize,
    /// Shortest run worth a match token.
    pub min_match: usize,
}

impl Lz77Params {
    /// Balanced defaults: 4 KiB window, 16-byte lookahead, 3-byte matches.
    pub const DEFAULT: Self = Self {
        window_size: 4096,
        lookahead_size: 16,
        min_match: 3,
    };

    /// Speed tuning: small window, longer minimum match.
    pub const SPEED: Self = Self {
        window_size: 1024,
        lookahead_size: 8,
        min_match: 4,
    };

    /// Size tuning: wide window, short minimum match.
    pub const SIZE: Self = Self {
        window_size: 8192,
        lookahead_size: 32,
        min_match: 2,
    };

    /// Parameter set for a preset.
    pub fn from_preset(preset: Preset) -> Self {
        match preset {
            Preset::None => Self::DEFAULT,
            Preset::Speed => Self::SPEED,
            Preset::Size => Self::SIZE,
        }
    }
}

/// Longest run a single match token can express.
const MAX_MATCH_LEN: usize = 255;

/// Whole-buffer LZ77 codec.
#[derive(Debug, Clone, Copy)]
pub struct Lz77Codec {
    params: Lz77Params,
}

impl Lz77Codec {
    /// Creates a codec with explicit parameters.
    pub fn new(params: Lz77Params) -> Self {
        Self { params }
    }

    /// The parameters in effect.
    pub fn params(&self) -> Lz77Params {
        self.params
    }

    /// Finds the longest match for `data[pos..]` within the window.
    ///
    /// Ties on length resolve to the candidate nearest the current
    /// position, so the emitted offset is the smallest that achieves the
    /// best length.
    fn find_longest_match(&self, data: &[u8], pos: usize) -> Option<(usize, usize)> {
        if pos + self.params.min_match > data.len() {
            return None;
        }
        let window_start = pos.saturating_sub(self.params.window_size);
        let lookahead_end = (pos + self.params.lookahead_size).min(data.len());

        let mut best_offset = 0usize;
        let mut best_len = 0usize;
        for candidate in window_start..pos {
            if data[candidate] != data[pos] {
                continue;
            }
            let mut len = 1;
            while pos + len < lookahead_end && data[candidate + len] == data[pos + len] {
                len += 1;
            }
            if len >= self.params.min_match && len >= best_len {
                best_len = len;
                best_offset = pos - candidate;
            }
        }
        (best_len >= self.params.min_match).then_some((best_offset, best_len))
    }
}

impl Default for Lz77Codec {
    fn default() -> Self {
        Self::new(Lz77Params::DEFAULT)
    }
}

impl Codec for Lz77Codec {
    fn name(&self) -> &'static str {
        "lz77"
    }

    fn compress(&self, input: &[u8]) -> Result<Vec<u8>, CodecError> {
        let mut out = BytesMut::with_capacity(16 + input.len() + input.len() / 8);
        out.put_u64_le(input.len() as u64);

        let mut pos = 0usize;
        while pos < input.len() {
            match self.find_longest_match(input, pos) {
                Some((offset, total_len)) => {
                    // Long matches continue at the same distance.
                    let mut remaining = total_len;
                    while remaining > 0 {
                        let len = remaining.min(MAX_MATCH_LEN);
                        if len >= self.params.min_match {
                            out.put_u8(1);
                            out.put_u16(offset as u16); // big-endian on the wire
                            out.put_u8(len as u8);
                        } else {
                            // A short tail is cheaper as literals.
                            for i in 0..len {
                                out.put_u8(0);
                                out.put_u8(input[pos + total_len - remaining + i]);
                            }
                        }
                        remaining -= len;
                    }
                    pos += total_len;
                }
                None => {
                    out.put_u8(0);
                    out.put_u8(input[pos]);
                    pos += 1;
                }
            }
        }
        Ok(out.to_vec())
    }

    fn decompress(&self, input: &[u8]) -> Result<Vec<u8>, CodecError> {
        let mut buf = input;
        if buf.remaining() < 8 {
            return Err(CodecError::corrupt("lz77 header truncated"));
        }
        let original_size = CodecError::check_declared(buf.get_u64_le())?;

        let mut out = Vec::with_capacity(original_size);
        while out.len() < original_size {
            if !buf.has_remaining() {
                return Err(CodecError::corrupt("lz77 token stream ended early"));
            }
            match buf.get_u8() {
                0 => {
                    if !buf.has_remaining() {
                        return Err(CodecError::corrupt("lz77 literal truncated"));
                    }
                    out.push(buf.get_u8());
                }
                1 => {
                    if buf.remaining() < 3 {
                        return Err(CodecError::corrupt("lz77 match token truncated"));
                    }
                    let offset = buf.get_u16() as usize; // big-endian on the wire
                    let length = buf.get_u8() as usize;
                    if offset == 0 || offset > out.len() {
                        return Err(CodecError::corrupt(format!(
                            "lz77 back-reference {offset} at position {}",
                            out.len()
                        )));
                    }
                    if out.len() + length > original_size {
                        return Err(CodecError::corrupt(
                            "lz77 match overflows declared size",
                        ));
                    }
                    // Byte-by-byte so overlapping copies self-extend.
                    for _ in 0..length {
                        let byte = out[out.len() - offset];
                        out.push(byte);
                    }
                }
                other => {
                    return Err(CodecError::corrupt(format!(
                        "invalid lz77 token flag {other:#04x}"
                    )))
                }
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip_with(params: Lz77Params, data: &[u8]) {
        let codec = Lz77Codec::new(params);
        let compressed = codec.compress(data).unwrap();
        assert_eq!(codec.decompress(&compressed).unwrap(), data, "params {params:?}");
    }

    fn round_trip(data: &[u8]) {
        for params in [Lz77Params::DEFAULT, Lz77Params::SPEED, Lz77Params::SIZE] {
            round_trip_with(params, data);
        }
    }

    #[test]
    fn empty_input() {
        let codec = Lz77Codec::default();
        let out = codec.compress(b"").unwrap();
        assert_eq!(out, vec![0u8; 8]);
        assert_eq!(codec.decompress(&out).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn single_byte_is_a_literal() {
        let codec = Lz77Codec::default();
        let out = codec.compress(b"k").unwrap();
        assert_eq!(&out[8..], [0x00, b'k']);
        assert_eq!(codec.decompress(&out).unwrap(), b"k");
    }

    #[test]
    fn overlapping_copy() {
        // "aaaaaaaaaa": literal 'a' then a self-extending match.
        round_trip(b"aaaaaaaaaa");
    }

    #[test]
    fn repetitive_text() {
        let data = b"to be or not to be, that is the question; to be or not to be"
            .repeat(50);
        round_trip(&data);
    }

    #[test]
    fn incompressible_bytes() {
        let data: Vec<u8> = (0..4096u32)
            .map(|i| (i.wrapping_mul(2654435761) >> 13) as u8)
            .collect();
        round_trip(&data);
    }

    #[test]
    fn nearest_match_wins_ties() {
        // "abcXabcYabc": when encoding the final "abc" both earlier
        // occurrences match at length 3; the nearer one (offset 4) must win.
        let codec = Lz77Codec::default();
        let out = codec.compress(b"abcXabcYabc").unwrap();
        let mut offsets = Vec::new();
        let mut buf = &out[8..];
        while buf.has_remaining() {
            match buf.get_u8() {
                0 => {
                    let _ = buf.get_u8();
                }
                1 => {
                    offsets.push(buf.get_u16());
                    let _ = buf.get_u8();
                }
                _ => unreachable!(),
            }
        }
        assert_eq!(offsets, [4, 4]);
        assert_eq!(codec.decompress(&out).unwrap(), b"abcXabcYabc");
    }

    #[test]
    fn match_tokens_respect_bounds() {
        let data = b"the rain in spain stays mainly in the plain".repeat(20);
        for params in [Lz77Params::DEFAULT, Lz77Params::SPEED, Lz77Params::SIZE] {
            let codec = Lz77Codec::new(params);
            let out = codec.compress(&data).unwrap();
            let mut buf = &out[8..];
            let mut produced = 0usize;
            while buf.has_remaining() {
                match buf.get_u8() {
                    0 => {
                        let _ = buf.get_u8();
                        produced += 1;
                    }
                    1 => {
                        let offset = buf.get_u16() as usize;
                        let length = buf.get_u8() as usize;
                        assert!(length >= params.min_match);
                        assert!(offset > 0 && offset <= produced);
                        assert!(offset <= params.window_size);
                        produced += length;
                    }
                    _ => unreachable!(),
                }
            }
            assert_eq!(produced, data.len());
        }
    }

    #[test]
    fn long_match_splits_into_follow_up_tokens() {
        // A lookahead wider than a token's length field forces the split.
        let params = Lz77Params {
            window_size: 4096,
            lookahead_size: 600,
            min_match: 3,
        };
        let mut data = vec![b'r'; 1];
        data.extend(std::iter::repeat(b'r').take(550));
        let codec = Lz77Codec::new(params);
        let out = codec.compress(&data).unwrap();
        assert_eq!(codec.decompress(&out).unwrap(), data);

        // The 550-byte tail cannot fit one token.
        let mut buf = &out[8..];
        let mut match_lens = Vec::new();
        while buf.has_remaining() {
            match buf.get_u8() {
                0 => {
                    let _ = buf.get_u8();
                }
                1 => {
                    let _ = buf.get_u16();
                    match_lens.push(buf.get_u8() as usize);
                }
                _ => unreachable!(),
            }
        }
        assert!(match_lens.len() >= 2);
        assert!(match_lens.iter().all(|&l| l <= 255));
        assert_eq!(match_lens.iter().sum::<usize>(), 550);
    }

    #[test]
    fn bad_offset_is_corrupt() {
        let mut out = BytesMut::new();
        out.put_u64_le(4);
        out.put_u8(0);
        out.put_u8(b'a');
        out.put_u8(1);
        out.put_u16(9); // farther back than anything produced
        out.put_u8(3);
        let codec = Lz77Codec::default();
        assert!(matches!(
            codec.decompress(&out),
            Err(CodecError::Corrupt(_))
        ));
    }

    #[test]
    fn zero_offset_is_corrupt() {
        let mut out = BytesMut::new();
        out.put_u64_le(4);
        out.put_u8(0);
        out.put_u8(b'a');
        out.put_u8(1);
        out.put_u16(0);
        out.put_u8(3);
        let codec = Lz77Codec::default();
        assert!(matches!(
            codec.decompress(&out),
            Err(CodecError::Corrupt(_))
        ));
    }

    #[test]
    fn truncated_stream_is_corrupt() {
        let codec = Lz77Codec::default();
        let mut out = codec.compress(b"abcabcabcabc").unwrap();
        out.truncate(out.len() - 1);
        assert!(matches!(
            codec.decompress(&out),
            Err(CodecError::Corrupt(_))
        ));
    }

    #[test]
    fn boundary_around_window_size() {
        for params in [Lz77Params::SPEED, Lz77Params::DEFAULT] {
            let n = params.window_size;
            for size in [n - 1, n, n + 1] {
                let data: Vec<u8> = (0..size).map(|i| (i % 17) as u8).collect();
                round_trip_with(params, &data);
            }
        }
    }
}
