//! Progressive-container and split-archive behavior across crate
//! boundaries, at scaled-down sizes.

use std::path::Path;

use tempfile::tempdir;
use wring_codec::Primitive;
use wring_container::{
    part_path, ContainerError, ProgressiveOptions, ProgressiveReader, ProgressiveWriter,
    SplitArchive,
};
use wring_core::{ChecksumKind, Preset};
use wring_tests::{noise, prose};

fn write(dir: &Path, name: &str, data: &[u8]) -> std::path::PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, data).unwrap();
    path
}

#[test]
fn progressive_full_equals_input() {
    let dir = tempdir().unwrap();
    let block = 65536u32;
    let data = noise(block as usize * 10, 11);
    let input = write(dir.path(), "input.bin", &data);
    let prog = dir.path().join("input.prog");

    let options = ProgressiveOptions {
        block_size: block,
        checksum: ChecksumKind::Crc32,
        ..ProgressiveOptions::default()
    };
    let header = ProgressiveWriter::compress_file(&input, &prog, &options).unwrap();
    assert_eq!(header.total_blocks, 10);

    let out = dir.path().join("full.out");
    ProgressiveReader::decompress_file(&prog, &out, Preset::None, None).unwrap();
    assert_eq!(std::fs::read(&out).unwrap(), data);
}

#[test]
fn progressive_range_with_crc_and_corruption_report() {
    // The ten-block range scenario at a 64 KiB block size: decode blocks
    // 2..=4, then corrupt block 3 and expect it named in the failure.
    let dir = tempdir().unwrap();
    let block = 65536usize;
    let data = noise(block * 10, 13);
    let input = write(dir.path(), "input.bin", &data);
    let prog = dir.path().join("input.prog");

    let options = ProgressiveOptions {
        block_size: block as u32,
        checksum: ChecksumKind::Crc32,
        ..ProgressiveOptions::default()
    };
    ProgressiveWriter::compress_file(&input, &prog, &options).unwrap();

    let out = dir.path().join("range.out");
    ProgressiveReader::decompress_range(&prog, &out, 2, 4, Preset::None, None).unwrap();
    assert_eq!(std::fs::read(&out).unwrap(), &data[2 * block..5 * block]);

    // Corrupt one byte inside block 3's payload, then decode the range
    // again and expect block 3 to be reported. Block headers are walked
    // manually to find the payload offset.
    let mut raw = std::fs::read(&prog).unwrap();
    let reader = ProgressiveReader::open(&prog, Preset::None, None).unwrap();
    let header_len = reader.header().encoded_len();
    let block_header_len = reader.header().block_header_len();
    drop(reader);
    let mut offset = header_len;
    for _ in 0..3 {
        let compressed =
            u32::from_le_bytes(raw[offset as usize + 4..offset as usize + 8].try_into().unwrap());
        offset += block_header_len + compressed as u64;
    }
    let target = offset + block_header_len + 20;
    raw[target as usize] ^= 0x01;
    std::fs::write(&prog, &raw).unwrap();

    match ProgressiveReader::decompress_range(&prog, &out, 2, 4, Preset::None, None) {
        Err(ContainerError::ChecksumMismatch { block_id }) => assert_eq!(block_id, Some(3)),
        other => panic!("expected mismatch on block 3, got {other:?}"),
    }
}

#[test]
fn progressive_streaming_callback_sees_every_block() {
    let dir = tempdir().unwrap();
    let block = 32768usize;
    let data = prose(block * 6 + 77);
    let input = write(dir.path(), "input.bin", &data);
    let prog = dir.path().join("input.prog");

    let options = ProgressiveOptions {
        block_size: block as u32,
        primitive: Primitive::Lz77,
        ..ProgressiveOptions::default()
    };
    ProgressiveWriter::compress_file(&input, &prog, &options).unwrap();

    let mut sizes = Vec::new();
    let mut collected = Vec::new();
    ProgressiveReader::stream(&prog, Preset::None, None, |bytes| {
        sizes.push(bytes.len());
        collected.extend_from_slice(bytes);
        true
    })
    .unwrap();

    assert_eq!(sizes.len(), 7);
    assert!(sizes[..6].iter().all(|&s| s == block));
    assert_eq!(sizes[6], 77);
    assert_eq!(collected, data);
}

#[test]
fn split_archive_three_part_round_trip() {
    // The 250 MiB / 100 MiB scenario scaled down: 2.5 MiB at the 1 MiB
    // minimum part size gives three parts numbered 0001..0003.
    let dir = tempdir().unwrap();
    let data = noise(2 * 1024 * 1024 + 512 * 1024, 17);
    let input = write(dir.path(), "input.bin", &data);
    let base = dir.path().join("archive");

    let archive = SplitArchive::new(Primitive::Huffman, Preset::None);
    let parts = archive
        .compress(&input, &base, 1024 * 1024, ChecksumKind::Sha256)
        .unwrap();
    assert_eq!(parts, 3);
    for part in 1..=3 {
        assert!(part_path(&base, part).exists(), "part {part} missing");
    }
    assert!(!part_path(&base, 4).exists());

    let out = dir.path().join("joined.bin");
    archive.decompress(&base, &out).unwrap();
    assert_eq!(std::fs::read(&out).unwrap(), data);
}

#[test]
fn split_archive_survives_codec_choice() {
    let dir = tempdir().unwrap();
    let data = prose(1_500_000);
    let input = write(dir.path(), "input.bin", &data);

    for primitive in [Primitive::Huffman, Primitive::Rle, Primitive::Lz77] {
        let base = dir.path().join(format!("arc-{primitive:?}"));
        let archive = SplitArchive::new(primitive, Preset::None);
        archive
            .compress(&input, &base, 1024 * 1024, ChecksumKind::Crc32)
            .unwrap();
        let out = dir.path().join(format!("out-{primitive:?}"));
        archive.decompress(&base, &out).unwrap();
        assert_eq!(std::fs::read(&out).unwrap(), data, "{primitive:?}");
    }
}
