//! Run-length encoding.
//!
//! Stream layout: `original_size: i64 LE`, then `(count, value)` pairs with
//! `count` in 1..=255. Runs longer than 255 split into consecutive pairs.

use bytes::{Buf, BufMut, BytesMut};

use crate::{Codec, CodecError};

/// Longest run a single pair can express.
const MAX_RUN: usize = 255;

/// Whole-buffer RLE codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct RleCodec;

impl Codec for RleCodec {
    fn name(&self) -> &'static str {
        "rle"
    }

    fn compress(&self, input: &[u8]) -> Result<Vec<u8>, CodecError> {
        let mut out = BytesMut::with_capacity(16 + input.len() / 2);
        out.put_i64_le(input.len() as i64);

        let mut iter = input.iter();
        if let Some(&first) = iter.next() {
            let mut value = first;
            let mut count = 1usize;
            for &byte in iter {
                if byte == value && count < MAX_RUN {
                    count += 1;
                } else {
                    out.put_u8(count as u8);
                    out.put_u8(value);
                    value = byte;
                    count = 1;
                }
            }
            out.put_u8(count as u8);
            out.put_u8(value);
        }
        Ok(out.to_vec())
    }

    fn decompress(&self, input: &[u8]) -> Result<Vec<u8>, CodecError> {
        let mut buf = input;
        if buf.remaining() < 8 {
            return Err(CodecError::corrupt("rle header truncated"));
        }
        let declared = buf.get_i64_le();
        if declared < 0 {
            return Err(CodecError::corrupt("negative rle size"));
        }
        let original_size = CodecError::check_declared(declared as u64)?;

        let mut out = Vec::with_capacity(original_size);
        while out.len() < original_size {
            if buf.remaining() < 2 {
                return Err(CodecError::corrupt("rle stream ended early"));
            }
            let count = buf.get_u8() as usize;
            let value = buf.get_u8();
            if count == 0 {
                return Err(CodecError::corrupt("zero-length rle run"));
            }
            if out.len() + count > original_size {
                return Err(CodecError::corrupt("rle run overflows declared size"));
            }
            out.resize(out.len() + count, value);
        }
        Ok(out)
    }
}
