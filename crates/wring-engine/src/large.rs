//! Chunked (large-file) Huffman processing.
//!
//! The whole-file paths load everything into memory; these functions keep
//! memory bounded by the chunk size instead. Compression is the two-pass
//! streaming protocol: pass one counts frequencies, pass two emits codes.
//! The stream written here is byte-identical to the whole-buffer codec's.

use std::path::Path;

use bytes::Buf;
use tracing::debug;

use wring_codec::huffman::{HuffmanEncoder, HuffmanStreamDecoder, Tree};
use wring_codec::CodecError;
use wring_core::{ChunkReader, ChunkWriter};

use crate::EngineError;

/// Largest possible serialized tree: 255 interior markers plus 256
/// two-byte leaves.
const MAX_TREE_BYTES: usize = 1024;

/// Compresses `input` to `output` with bounded memory.
pub fn compress_huffman(
    input: &Path,
    output: &Path,
    chunk_size: usize,
    max_depth: usize,
) -> Result<(), EngineError> {
    let mut reader = ChunkReader::open(input, chunk_size)?;
    let mut encoder = HuffmanEncoder::new(max_depth);

    while let Some(chunk) = reader.next_chunk()? {
        encoder.count_frequencies(chunk);
    }
    encoder.build_tree_and_codes();
    debug!(total = encoder.total_bytes(), "frequency pass complete");

    reader.reset()?;
    let mut writer = ChunkWriter::create(output, chunk_size)?;
    let mut header = Vec::new();
    encoder.write_header(&mut header);
    writer.write(&header)?;
    while let Some(chunk) = reader.next_chunk()? {
        writer.write(&encoder.compress_chunk(chunk))?;
    }
    writer.write(&encoder.finalize())?;
    writer.finish()?;
    Ok(())
}

/// Decompresses a Huffman stream at `input` to `output` with bounded memory.
pub fn decompress_huffman(
    input: &Path,
    output: &Path,
    chunk_size: usize,
) -> Result<(), EngineError> {
    let mut reader = ChunkReader::open(input, chunk_size.max(MAX_TREE_BYTES + 8))?;

    // The header and tree fit comfortably in the first chunk.
    let first = reader
        .next_chunk()?
        .ok_or_else(|| EngineError::Codec(CodecError::Corrupt("huffman header truncated".into())))?;
    let mut head = first;
    if head.remaining() < 8 {
        return Err(EngineError::Codec(CodecError::Corrupt(
            "huffman header truncated".into(),
        )));
    }
    let original_size = head.get_u64_le();
    if original_size == 0 {
        ChunkWriter::create(output, chunk_size)?.finish()?;
        return Ok(());
    }
    let tree = Tree::deserialize(&mut head).map_err(EngineError::Codec)?;
    let consumed = first.len() - head.len();
    let data_start = consumed as u64;
    reader.seek_to(data_start)?;

    let mut writer = ChunkWriter::create(output, chunk_size)?;
    let mut decoder = HuffmanStreamDecoder::new(tree);
    let mut produced = 0u64;
    let mut out = Vec::with_capacity(chunk_size);

    'outer: while let Some(chunk) = reader.next_chunk()? {
        let mut offset = 0usize;
        while offset < chunk.len() {
            let budget = (original_size - produced) as usize;
            let (consumed, _) = decoder
                .decode(&chunk[offset..], &mut out, budget)
                .map_err(EngineError::Codec)?;
            offset += consumed;
            produced += out.len() as u64;
            writer.write(&out)?;
            out.clear();
            if produced >= original_size {
                break 'outer;
            }
            if consumed == 0 {
                break;
            }
        }
    }

    if produced != original_size {
        return Err(EngineError::Codec(CodecError::Corrupt(format!(
            "huffman stream produced {produced} of {original_size} bytes"
        ))));
    }
    writer.finish()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use wring_codec::huffman::DEFAULT_MAX_DEPTH;
    use wring_codec::{Codec, HuffmanCodec};

    #[test]
    fn chunked_output_matches_whole_buffer() {
        let dir = tempdir().unwrap();
        let data: Vec<u8> = (0..200_000u32).map(|i| (i % 199) as u8).collect();
        let input = dir.path().join("input.bin");
        std::fs::write(&input, &data).unwrap();

        let chunked = dir.path().join("chunked.huf");
        compress_huffman(&input, &chunked, 8192, DEFAULT_MAX_DEPTH).unwrap();

        let whole = HuffmanCodec::default().compress(&data).unwrap();
        assert_eq!(std::fs::read(&chunked).unwrap(), whole);
    }

    #[test]
    fn chunked_round_trip() {
        let dir = tempdir().unwrap();
        let data: Vec<u8> = b"chunked huffman round trip material "
            .iter()
            .cycle()
            .take(150_000)
            .copied()
            .collect();
        let input = dir.path().join("input.bin");
        std::fs::write(&input, &data).unwrap();

        let compressed = dir.path().join("data.huf");
        let restored = dir.path().join("restored.bin");
        compress_huffman(&input, &compressed, 4096, DEFAULT_MAX_DEPTH).unwrap();
        decompress_huffman(&compressed, &restored, 4096).unwrap();
        assert_eq!(std::fs::read(&restored).unwrap(), data);
    }

    #[test]
    fn empty_file_round_trip() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("empty.bin");
        std::fs::write(&input, b"").unwrap();

        let compressed = dir.path().join("empty.huf");
        let restored = dir.path().join("empty.out");
        compress_huffman(&input, &compressed, 4096, DEFAULT_MAX_DEPTH).unwrap();
        assert_eq!(std::fs::read(&compressed).unwrap().len(), 8);
        decompress_huffman(&compressed, &restored, 4096).unwrap();
        assert_eq!(std::fs::read(&restored).unwrap(), b"");
    }

    #[test]
    fn boundary_chunk_sizes() {
        let dir = tempdir().unwrap();
        for size in [4095usize, 4096, 4097] {
            let data: Vec<u8> = (0..size).map(|i| (i % 97) as u8).collect();
            let input = dir.path().join(format!("in-{size}"));
            std::fs::write(&input, &data).unwrap();
            let compressed = dir.path().join(format!("c-{size}"));
            let restored = dir.path().join(format!("r-{size}"));
            compress_huffman(&input, &compressed, 4096, DEFAULT_MAX_DEPTH).unwrap();
            decompress_huffman(&compressed, &restored, 4096).unwrap();
            assert_eq!(std::fs::read(&restored).unwrap(), data, "size {size}");
        }
    }
}
