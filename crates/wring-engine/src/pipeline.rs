//! Pipeline assembly and dispatch.
//!
//! Compression runs source → [dedup] → [codec | parallel driver] →
//! [encryption] → [progressive | split | raw] → sink; decompression runs
//! the reverse. Stage presence comes from the request flags, with
//! file-extension sniffing filling in when the caller did not name a codec.

use std::path::{Path, PathBuf};
use std::process;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{info, warn};

use wring_codec::huffman::{DEFAULT_MAX_DEPTH, SIZE_MAX_DEPTH, SPEED_MAX_DEPTH};
use wring_codec::{Codec, Primitive};
use wring_container::{ParallelCodec, ProgressiveOptions, ProgressiveReader, ProgressiveWriter, SplitArchive};
use wring_core::config::ConfigError;
use wring_core::{ChunkWriter, Config, IoError, Preset};
use wring_filter::{cipher, DedupStats, Deduplicator, ENCRYPTION_HEADER};

use crate::request::{codec_entry, detect_codec, looks_like_split_part, CodecEntry, CodecFlavor, Mode, Request};
use crate::{large, EngineError};

/// Key used when an encrypted codec is selected without `-k`.
const DEFAULT_ENCRYPTION_KEY: &[u8] = b"default_encryption_key";

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// What a finished run did.
#[derive(Debug, Clone)]
pub struct Report {
    /// Bytes read from the source.
    pub bytes_in: u64,
    /// Bytes written to the sink (sum over parts for split archives).
    pub bytes_out: u64,
    /// Primary output path (the part base for split archives).
    pub output: PathBuf,
    /// Parts written, for split archives.
    pub parts: Option<u32>,
    /// Deduplication statistics, when the filter ran.
    pub dedup: Option<DedupStats>,
}

/// Runs one request to completion.
pub fn run(request: &Request) -> Result<Report, EngineError> {
    request.config.validate()?;
    match request.mode {
        Mode::Compress => compress(request),
        Mode::Decompress => decompress(request),
    }
}

fn entry_for(request: &Request) -> Result<&'static CodecEntry, EngineError> {
    codec_entry(request.codec_index)
        .ok_or_else(|| EngineError::Config(ConfigError::UnknownCodec(request.codec_index)))
}

/// On decompress the extension is authoritative when the caller did not
/// name a codec explicitly.
fn decode_entry_for(request: &Request) -> Result<&'static CodecEntry, EngineError> {
    if request.codec_explicit {
        return entry_for(request);
    }
    match detect_codec(&request.input) {
        Some(index) => Ok(codec_entry(index).unwrap_or(entry_for(request)?)),
        None => entry_for(request),
    }
}

fn primitive_of(entry: &CodecEntry) -> Primitive {
    match entry.flavor {
        CodecFlavor::Plain(p) | CodecFlavor::Parallel(p) => p,
        CodecFlavor::Encrypted => Primitive::Lz77,
        CodecFlavor::Progressive => Primitive::Huffman,
    }
}

fn max_depth_for(preset: Preset) -> usize {
    match preset {
        Preset::None => DEFAULT_MAX_DEPTH,
        Preset::Speed => SPEED_MAX_DEPTH,
        Preset::Size => SIZE_MAX_DEPTH,
    }
}

fn key_of(config: &Config) -> Vec<u8> {
    config
        .key
        .clone()
        .unwrap_or_else(|| DEFAULT_ENCRYPTION_KEY.to_vec())
}

fn read_input(path: &Path) -> Result<Vec<u8>, EngineError> {
    std::fs::read(path).map_err(|source| {
        EngineError::Io(IoError::Open {
            path: path.to_path_buf(),
            source,
        })
    })
}

fn write_output(path: &Path, data: &[u8]) -> Result<(), EngineError> {
    std::fs::write(path, data).map_err(|e| EngineError::Io(IoError::Write(e)))
}

/// A process- and call-distinct temporary path, removed by [`TempFile`]'s
/// drop.
struct TempFile {
    path: PathBuf,
}

impl TempFile {
    fn with_contents(data: &[u8]) -> Result<Self, EngineError> {
        let path = std::env::temp_dir().join(format!(
            "wring-{}-{}.tmp",
            process::id(),
            TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        std::fs::write(&path, data).map_err(|e| EngineError::Io(IoError::Write(e)))?;
        Ok(Self { path })
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TempFile {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

// ---------------------------------------------------------------------------
// Compress side
// ---------------------------------------------------------------------------

fn compress(request: &Request) -> Result<Report, EngineError> {
    let entry = entry_for(request)?;

    if request.split {
        return compress_split(request, entry);
    }
    if request.progressive || matches!(entry.flavor, CodecFlavor::Progressive) {
        return compress_progressive(request, entry);
    }
    if request.large_file {
        return compress_large(request, entry);
    }

    let data = read_input(&request.input)?;
    let bytes_in = data.len() as u64;

    let (data, dedup_stats) = if request.dedup {
        let mut dedup = Deduplicator::new(request.config.dedup.clone());
        let encoded = dedup.encode(&data);
        let stats = *dedup.stats();
        (encoded, Some(stats))
    } else {
        (data, None)
    };

    let preset = request.config.preset;
    let mut compressed = match entry.flavor {
        CodecFlavor::Plain(primitive) => primitive.codec(preset).compress(&data)?,
        CodecFlavor::Parallel(primitive) => {
            ParallelCodec::new(primitive, preset, request.config.threads).compress(&data)?
        }
        CodecFlavor::Encrypted => {
            cipher::compress_and_encrypt(&data, &key_of(&request.config), preset)?
        }
        CodecFlavor::Progressive => unreachable!("handled above"),
    };

    // An explicit key encrypts any codec's output; the encrypted registry
    // entry already sealed its stream.
    if request.config.key.is_some() && !matches!(entry.flavor, CodecFlavor::Encrypted) {
        compressed = cipher::encrypt(&compressed, &key_of(&request.config))?;
    }

    let output = request.resolved_output(entry);
    write_output(&output, &compressed)?;
    info!(
        codec = entry.name,
        bytes_in,
        bytes_out = compressed.len() as u64,
        output = %output.display(),
        "compression complete"
    );
    Ok(Report {
        bytes_in,
        bytes_out: compressed.len() as u64,
        output,
        parts: None,
        dedup: dedup_stats,
    })
}

fn compress_large(request: &Request, entry: &'static CodecEntry) -> Result<Report, EngineError> {
    if !matches!(entry.flavor, CodecFlavor::Plain(Primitive::Huffman)) {
        warn!(
            codec = entry.name,
            "large-file mode is chunked Huffman only; using the whole-file path"
        );
        let mut plain = request.clone();
        plain.large_file = false;
        return compress(&plain);
    }
    if request.dedup {
        warn!("dedup filter is skipped in large-file mode");
    }

    let output = request.resolved_output(entry);
    large::compress_huffman(
        &request.input,
        &output,
        request.config.chunk_size,
        max_depth_for(request.config.preset),
    )?;
    Ok(report_from_files(&request.input, &output)?)
}

fn compress_progressive(
    request: &Request,
    entry: &'static CodecEntry,
) -> Result<Report, EngineError> {
    let options = ProgressiveOptions {
        primitive: primitive_of(entry),
        preset: request.config.preset,
        block_size: request.config.block_size,
        checksum: request.config.checksum,
        streaming_optimized: false,
        key: request.config.key.clone(),
    };
    let output = request
        .output
        .clone()
        .unwrap_or_else(|| {
            let mut name = request.input.as_os_str().to_os_string();
            name.push(".prog");
            PathBuf::from(name)
        });

    let (dedup_stats, header) = if request.dedup {
        let data = read_input(&request.input)?;
        let mut dedup = Deduplicator::new(request.config.dedup.clone());
        let temp = TempFile::with_contents(&dedup.encode(&data))?;
        let stats = *dedup.stats();
        let header = ProgressiveWriter::compress_file(temp.path(), &output, &options)?;
        (Some(stats), header)
    } else {
        (
            None,
            ProgressiveWriter::compress_file(&request.input, &output, &options)?,
        )
    };

    let bytes_out = std::fs::metadata(&output)
        .map_err(|e| EngineError::Io(IoError::Read(e)))?
        .len();
    // With dedup in front, the container's original size is the dedup
    // stream; report the true input size instead.
    let bytes_in = dedup_stats
        .map(|s| s.total_bytes)
        .unwrap_or(header.original_size);
    Ok(Report {
        bytes_in,
        bytes_out,
        output,
        parts: None,
        dedup: dedup_stats,
    })
}

fn compress_split(request: &Request, entry: &'static CodecEntry) -> Result<Report, EngineError> {
    let archive = SplitArchive::new(primitive_of(entry), request.config.preset);
    let base = request
        .output
        .clone()
        .unwrap_or_else(|| request.input.clone());

    let (dedup_stats, parts, bytes_in) = if request.dedup {
        let data = read_input(&request.input)?;
        let bytes_in = data.len() as u64;
        let mut dedup = Deduplicator::new(request.config.dedup.clone());
        let temp = TempFile::with_contents(&dedup.encode(&data))?;
        let stats = *dedup.stats();
        let parts = archive.compress(
            temp.path(),
            &base,
            request.config.max_part_size,
            request.config.checksum,
        )?;
        (Some(stats), parts, bytes_in)
    } else {
        let bytes_in = std::fs::metadata(&request.input)
            .map_err(|source| {
                EngineError::Io(IoError::Open {
                    path: request.input.clone(),
                    source,
                })
            })?
            .len();
        let parts = archive.compress(
            &request.input,
            &base,
            request.config.max_part_size,
            request.config.checksum,
        )?;
        (None, parts, bytes_in)
    };

    let mut bytes_out = 0u64;
    for part in 1..=parts {
        bytes_out += std::fs::metadata(wring_container::part_path(&base, part))
            .map_err(|e| EngineError::Io(IoError::Read(e)))?
            .len();
    }
    Ok(Report {
        bytes_in,
        bytes_out,
        output: base,
        parts: Some(parts),
        dedup: dedup_stats,
    })
}

// ---------------------------------------------------------------------------
// Decompress side
// ---------------------------------------------------------------------------

fn decompress(request: &Request) -> Result<Report, EngineError> {
    if request.split || looks_like_split_part(&request.input) {
        return decompress_split(request);
    }

    let entry = decode_entry_for(request)?;
    if request.progressive || matches!(entry.flavor, CodecFlavor::Progressive) {
        return decompress_progressive(request, entry);
    }
    if request.large_file && matches!(entry.flavor, CodecFlavor::Plain(Primitive::Huffman)) {
        let output = request.resolved_output(entry);
        large::decompress_huffman(&request.input, &output, request.config.chunk_size)?;
        return report_from_files(&request.input, &output);
    }

    let data = read_input(&request.input)?;
    let bytes_in = data.len() as u64;
    let preset = request.config.preset;

    let decoded = match entry.flavor {
        CodecFlavor::Encrypted => {
            cipher::decrypt_and_decompress(&data, &key_of(&request.config), preset)?
        }
        _ => {
            // A key-sealed stream in front of any codec is peeled first.
            let data = if data.starts_with(ENCRYPTION_HEADER) && request.config.key.is_some() {
                cipher::decrypt(&data, &key_of(&request.config))?
            } else {
                data
            };
            match entry.flavor {
                CodecFlavor::Plain(primitive) => primitive.codec(preset).decompress(&data)?,
                CodecFlavor::Parallel(primitive) => {
                    ParallelCodec::new(primitive, preset, request.config.threads)
                        .decompress(&data)?
                }
                CodecFlavor::Encrypted | CodecFlavor::Progressive => unreachable!(),
            }
        }
    };

    let decoded = if request.dedup {
        Deduplicator::decode(&decoded)?
    } else {
        decoded
    };

    let output = request.resolved_output(entry);
    write_output(&output, &decoded)?;
    Ok(Report {
        bytes_in,
        bytes_out: decoded.len() as u64,
        output,
        parts: None,
        dedup: None,
    })
}

fn decompress_progressive(
    request: &Request,
    entry: &'static CodecEntry,
) -> Result<Report, EngineError> {
    let output = request.resolved_output(entry);
    let preset = request.config.preset;
    let key = request.config.key.clone();

    if let Some((start, end)) = request.range {
        ProgressiveReader::decompress_range(&request.input, &output, start, end, preset, key)?;
    } else if request.stream {
        // Streaming decode: each block goes through the callback on its way
        // to the sink.
        let mut writer = ChunkWriter::create(&output, request.config.buffer_size)?;
        let mut write_error: Option<IoError> = None;
        ProgressiveReader::stream(&request.input, preset, key, |block| {
            match writer.write(block) {
                Ok(()) => true,
                Err(e) => {
                    write_error = Some(e);
                    false
                }
            }
        })?;
        if let Some(e) = write_error {
            return Err(EngineError::Io(e));
        }
        writer.finish()?;
    } else {
        ProgressiveReader::decompress_file(&request.input, &output, preset, key)?;
    }

    if request.dedup {
        let data = read_input(&output)?;
        write_output(&output, &Deduplicator::decode(&data)?)?;
    }
    report_from_files(&request.input, &output)
}

fn decompress_split(request: &Request) -> Result<Report, EngineError> {
    // `archive.part0007` resolves to base `archive`; otherwise the input is
    // already the base.
    let base = if looks_like_split_part(&request.input) {
        request.input.with_extension("")
    } else {
        request.input.clone()
    };

    let entry = if request.codec_explicit {
        entry_for(request)?
    } else {
        detect_codec(&base)
            .and_then(codec_entry)
            .unwrap_or(entry_for(request)?)
    };

    let output = request.output.clone().unwrap_or_else(|| {
        let mut name = base.as_os_str().to_os_string();
        name.push(".out");
        PathBuf::from(name)
    });

    let archive = SplitArchive::new(primitive_of(entry), request.config.preset);
    archive.decompress(&base, &output)?;

    if request.dedup {
        let data = read_input(&output)?;
        write_output(&output, &Deduplicator::decode(&data)?)?;
    }

    let bytes_out = std::fs::metadata(&output)
        .map_err(|e| EngineError::Io(IoError::Read(e)))?
        .len();
    Ok(Report {
        bytes_in: 0,
        bytes_out,
        output,
        parts: None,
        dedup: None,
    })
}

fn report_from_files(input: &Path, output: &Path) -> Result<Report, EngineError> {
    let bytes_in = std::fs::metadata(input)
        .map_err(|e| EngineError::Io(IoError::Read(e)))?
        .len();
    let bytes_out = std::fs::metadata(output)
        .map_err(|e| EngineError::Io(IoError::Read(e)))?
        .len();
    Ok(Report {
        bytes_in,
        bytes_out,
        output: output.to_path_buf(),
        parts: None,
        dedup: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample(len: usize) -> Vec<u8> {
        (0..len as u32)
            .map(|i| (i.wrapping_mul(48271) % 239) as u8)
            .collect()
    }

    fn compress_request(input: &Path, index: u8) -> Request {
        let mut request = Request::compress(input);
        request.codec_index = index;
        request
    }

    #[test]
    fn round_trip_every_registry_entry() {
        let dir = tempdir().unwrap();
        let data = sample(60_000);
        let input = dir.path().join("data.bin");
        std::fs::write(&input, &data).unwrap();

        for index in 0..=7u8 {
            let mut request = compress_request(&input, index);
            if index == 6 {
                request.config.key = Some(b"test key".to_vec());
            }
            let report = run(&request).unwrap();
            assert_eq!(report.bytes_in, data.len() as u64, "codec {index}");

            let mut back = Request::decompress(&report.output);
            back.codec_index = index;
            back.codec_explicit = true;
            back.output = Some(dir.path().join(format!("restored-{index}.bin")));
            if index == 6 {
                back.config.key = Some(b"test key".to_vec());
            }
            let report = run(&back).unwrap();
            assert_eq!(
                std::fs::read(&report.output).unwrap(),
                data,
                "codec {index}"
            );
        }
    }

    #[test]
    fn extension_sniffing_picks_the_codec() {
        let dir = tempdir().unwrap();
        let data = sample(20_000);
        let input = dir.path().join("notes.txt");
        std::fs::write(&input, &data).unwrap();

        let request = compress_request(&input, 4);
        let report = run(&request).unwrap();
        assert!(report.output.to_string_lossy().ends_with(".lz77"));

        // Decompress without naming a codec: the extension decides.
        let back = Request::decompress(&report.output);
        let report = run(&back).unwrap();
        assert_eq!(report.output, input);
        assert_eq!(std::fs::read(&input).unwrap(), data);
    }

    #[test]
    fn dedup_chains_into_codec() {
        let dir = tempdir().unwrap();
        // The duplicate region is exactly one fixed chunk, so the second
        // copy lands on an aligned boundary and becomes a reference.
        let region = sample(65536);
        let mut data = region.clone();
        data.extend_from_slice(&region);
        let input = dir.path().join("doubled.bin");
        std::fs::write(&input, &data).unwrap();

        let mut request = compress_request(&input, 1);
        request.dedup = true;
        request.config.dedup.chunk_size = 65536;
        let report = run(&request).unwrap();
        let stats = report.dedup.expect("dedup stats");
        assert!(stats.duplicate_chunks >= 1);

        let mut back = Request::decompress(&report.output);
        back.dedup = true;
        back.output = Some(dir.path().join("restored.bin"));
        let report = run(&back).unwrap();
        assert_eq!(std::fs::read(&report.output).unwrap(), data);
    }

    #[test]
    fn key_seals_any_codec_stream() {
        let dir = tempdir().unwrap();
        let data = sample(30_000);
        let input = dir.path().join("sealed.bin");
        std::fs::write(&input, &data).unwrap();

        let mut request = compress_request(&input, 0);
        request.config.key = Some(b"belt and braces".to_vec());
        let report = run(&request).unwrap();
        let raw = std::fs::read(&report.output).unwrap();
        assert!(raw.starts_with(ENCRYPTION_HEADER));

        let mut back = Request::decompress(&report.output);
        back.config.key = Some(b"belt and braces".to_vec());
        back.output = Some(dir.path().join("unsealed.bin"));
        let report = run(&back).unwrap();
        assert_eq!(std::fs::read(&report.output).unwrap(), data);
    }

    #[test]
    fn progressive_range_through_the_engine() {
        let dir = tempdir().unwrap();
        let block = wring_core::config::DEFAULT_BLOCK_SIZE as usize;
        let data = sample(block * 3 + 1000);
        let input = dir.path().join("ranged.bin");
        std::fs::write(&input, &data).unwrap();

        let request = compress_request(&input, 7);
        let report = run(&request).unwrap();

        let mut back = Request::decompress(&report.output);
        back.range = Some((1, 2));
        back.output = Some(dir.path().join("slice.bin"));
        let report = run(&back).unwrap();
        assert_eq!(
            std::fs::read(&report.output).unwrap(),
            &data[block..3 * block]
        );
    }

    #[test]
    fn split_round_trip_through_the_engine() {
        let dir = tempdir().unwrap();
        let data = sample(2 * 1024 * 1024 + 100);
        let input = dir.path().join("big.bin");
        std::fs::write(&input, &data).unwrap();

        let mut request = compress_request(&input, 4);
        request.split = true;
        request.config.max_part_size = 1024 * 1024;
        let report = run(&request).unwrap();
        assert_eq!(report.parts, Some(3));

        let mut back = Request::decompress(&input);
        back.split = true;
        back.codec_index = 4;
        back.codec_explicit = true;
        back.output = Some(dir.path().join("joined.bin"));
        let report = run(&back).unwrap();
        assert_eq!(std::fs::read(&report.output).unwrap(), data);
    }

    #[test]
    fn large_file_mode_round_trip() {
        let dir = tempdir().unwrap();
        let data = sample(300_000);
        let input = dir.path().join("large.bin");
        std::fs::write(&input, &data).unwrap();

        let mut request = compress_request(&input, 0);
        request.large_file = true;
        request.config.chunk_size = 8192;
        let report = run(&request).unwrap();

        let mut back = Request::decompress(&report.output);
        back.large_file = true;
        back.config.chunk_size = 8192;
        back.output = Some(dir.path().join("restored.bin"));
        let report = run(&back).unwrap();
        assert_eq!(std::fs::read(&report.output).unwrap(), data);
    }

    #[test]
    fn missing_input_is_reported() {
        let request = Request::compress("/definitely/not/here.bin");
        let err = run(&request).unwrap_err();
        assert!(err.is_input_not_found());
    }

    #[test]
    fn unknown_codec_index_is_reported() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("x.bin");
        std::fs::write(&input, b"x").unwrap();
        let request = compress_request(&input, 12);
        assert!(matches!(
            run(&request),
            Err(EngineError::Config(ConfigError::UnknownCodec(12)))
        ));
    }
}
