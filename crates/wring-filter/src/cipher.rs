//! Key-cycled XOR cipher.
//!
//! The output is a fixed 9-byte ASCII header `ENCRYPTED` followed by the
//! payload XORed with the key repeated modulo its length. XOR is its own
//! inverse, so encrypt and decrypt share the transform. This is obfuscation
//! with a recognizable header, not cryptography.

use wring_codec::{Codec, Lz77Codec, Lz77Params};
use wring_core::Preset;

use crate::FilterError;

/// Marker prefixed to every encrypted stream (no trailing NUL).
pub const ENCRYPTION_HEADER: &[u8; 9] = b"ENCRYPTED";

/// XORs `data` in place with `key` cycled modulo its length.
///
/// Containers that mark encryption in their own headers use this raw form
/// instead of the header-wrapped stream.
pub fn xor_in_place(data: &mut [u8], key: &[u8]) {
    for (i, byte) in data.iter_mut().enumerate() {
        *byte ^= key[i % key.len()];
    }
}

/// Encrypts `input` under `key`.
pub fn encrypt(input: &[u8], key: &[u8]) -> Result<Vec<u8>, FilterError> {
    if key.is_empty() {
        return Err(FilterError::EmptyKey);
    }
    let mut out = Vec::with_capacity(ENCRYPTION_HEADER.len() + input.len());
    out.extend_from_slice(ENCRYPTION_HEADER);
    let start = out.len();
    out.extend_from_slice(input);
    xor_in_place(&mut out[start..], key);
    Ok(out)
}

/// Verifies the header and decrypts the payload.
pub fn decrypt(input: &[u8], key: &[u8]) -> Result<Vec<u8>, FilterError> {
    if key.is_empty() {
        return Err(FilterError::EmptyKey);
    }
    if input.len() < ENCRYPTION_HEADER.len() || &input[..ENCRYPTION_HEADER.len()] != ENCRYPTION_HEADER
    {
        return Err(FilterError::corrupt(
            "input is not an encrypted stream (missing header)",
        ));
    }
    let mut out = input[ENCRYPTION_HEADER.len()..].to_vec();
    xor_in_place(&mut out, key);
    Ok(out)
}

/// LZ77-compresses `input` and encrypts the compressed stream.
pub fn compress_and_encrypt(
    input: &[u8],
    key: &[u8],
    preset: Preset,
) -> Result<Vec<u8>, FilterError> {
    let codec = Lz77Codec::new(Lz77Params::from_preset(preset));
    let compressed = codec.compress(input)?;
    encrypt(&compressed, key)
}

/// Decrypts `input` and LZ77-decompresses the result.
///
/// A wrong key usually surfaces as a corrupt LZ77 stream rather than a
/// cipher-level failure.
pub fn decrypt_and_decompress(
    input: &[u8],
    key: &[u8],
    preset: Preset,
) -> Result<Vec<u8>, FilterError> {
    let decrypted = decrypt(input, key)?;
    let codec = Lz77Codec::new(Lz77Params::from_preset(preset));
    Ok(codec.decompress(&decrypted)?)
}
