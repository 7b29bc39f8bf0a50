//! Wring CLI - command-line front end for the compression engine.
//!
//! Parses the flag set, builds the engine configuration record, and hands a
//! request to the pipeline. Every failure becomes a one-line diagnostic on
//! stderr and a non-zero exit code.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use wring_core::{ChecksumKind, Config, DedupHash, DedupMode, Preset};
use wring_engine::{codec_registry, run, EngineError, Mode, Report, Request};

/// Environment variable consulted for the thread count when `-t` is absent.
const ENV_THREADS: &str = "OMP_NUM_THREADS";
/// Environment variable consulted for the buffer size when `-B` is absent.
const ENV_BUFFER_SIZE: &str = "COMPRESSION_BUFFER_SIZE";

#[derive(Debug, Clone, clap::ValueEnum)]
enum OptGoal {
    Speed,
    Size,
}

/// Multi-codec file compressor.
#[derive(Debug, Parser)]
#[command(name = "wring", about, long_about = None, disable_version_flag = true)]
struct Cli {
    /// Compress with codec index N (default 0 = Huffman). The index may be
    /// omitted, in which case the next token is the input file.
    #[arg(short = 'c', value_name = "N", num_args = 0..=1, default_missing_value = "", conflicts_with = "decompress")]
    compress: Option<String>,

    /// Decompress with codec index N (sniffed from the extension when omitted).
    #[arg(short = 'd', value_name = "N", num_args = 0..=1, default_missing_value = "")]
    decompress: Option<String>,

    /// List the available codecs and exit.
    #[arg(short = 'a')]
    list: bool,

    /// Worker threads; 0 or below selects the core count.
    #[arg(short = 't', value_name = "N", allow_negative_numbers = true)]
    threads: Option<i64>,

    /// Encryption key.
    #[arg(short = 'k', value_name = "KEY")]
    key: Option<String>,

    /// Optimization preset.
    #[arg(short = 'O', value_name = "GOAL", value_enum)]
    optimize: Option<OptGoal>,

    /// I/O buffer size in bytes (1024 or more recommended).
    #[arg(short = 'B', value_name = "BYTES")]
    buffer_size: Option<usize>,

    /// Chunked processing for files larger than memory.
    #[arg(short = 'L')]
    large_file: bool,

    /// Checksum kind: 0 none, 1 CRC32, 2 MD5, 3 SHA-256.
    #[arg(short = 'I', value_name = "N")]
    integrity: Option<u8>,

    /// Progressive block container.
    #[arg(short = 'P')]
    progressive: bool,

    /// Partial progressive decode: blocks a through b.
    #[arg(short = 'R', value_name = "a-b")]
    range: Option<String>,

    /// Streaming decode through the block callback.
    #[arg(short = 'S')]
    stream: bool,

    /// Split-archive mode.
    #[arg(short = 'X')]
    split: bool,

    /// Maximum split part size in bytes (default 100 MiB, minimum 1 MiB).
    #[arg(short = 'M', value_name = "BYTES")]
    max_part_size: Option<u64>,

    /// Deduplication filter.
    #[arg(short = 'D')]
    dedup: bool,

    /// Dedup chunk size in bytes.
    #[arg(short = 'C', value_name = "BYTES")]
    dedup_chunk_size: Option<usize>,

    /// Dedup hash: 0 SHA1, 1 MD5, 2 CRC32, 3 XXH64.
    #[arg(short = 'H', value_name = "N")]
    dedup_hash: Option<u8>,

    /// Dedup mode: 0 fixed, 1 variable, 2 smart.
    #[arg(short = 'V', value_name = "N")]
    dedup_mode: Option<u8>,

    /// Verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short = 'v', action = clap::ArgAction::Count)]
    verbose: u8,

    /// Input file.
    input: Option<PathBuf>,

    /// Output file (derived from the input when omitted).
    output: Option<PathBuf>,
}

fn env_usize(name: &str) -> Option<usize> {
    std::env::var(name).ok()?.trim().parse().ok()
}

fn parse_range(text: &str) -> Result<(u32, u32)> {
    let (a, b) = text
        .split_once('-')
        .with_context(|| format!("malformed block range '{text}', expected a-b"))?;
    let start = a
        .trim()
        .parse()
        .with_context(|| format!("bad range start '{a}'"))?;
    let end = b
        .trim()
        .parse()
        .with_context(|| format!("bad range end '{b}'"))?;
    Ok((start, end))
}

fn build_config(cli: &Cli) -> Result<Config> {
    let mut config = Config::default();

    config.preset = match cli.optimize {
        Some(OptGoal::Speed) => Preset::Speed,
        Some(OptGoal::Size) => Preset::Size,
        None => Preset::None,
    };

    let threads = cli
        .threads
        .or_else(|| env_usize(ENV_THREADS).map(|n| n as i64));
    config.threads = match threads {
        Some(n) if n > 0 => n as usize,
        _ => 0,
    };

    if let Some(size) = cli
        .buffer_size
        .or_else(|| env_usize(ENV_BUFFER_SIZE))
    {
        config.buffer_size = size;
        config.chunk_size = size.max(1024);
    }

    if let Some(index) = cli.integrity {
        config.checksum = ChecksumKind::from_index(index)
            .with_context(|| format!("checksum kind {index} is not 0..=3"))?;
    }

    if let Some(key) = &cli.key {
        config.key = Some(key.clone().into_bytes());
    }

    if let Some(size) = cli.max_part_size {
        config.max_part_size = size;
    }

    if let Some(size) = cli.dedup_chunk_size {
        config.dedup.chunk_size = size;
    }
    if let Some(index) = cli.dedup_hash {
        config.dedup.hash = DedupHash::from_index(index)
            .with_context(|| format!("dedup hash {index} is not 0..=3"))?;
    }
    if let Some(index) = cli.dedup_mode {
        config.dedup.mode = DedupMode::from_index(index)
            .with_context(|| format!("dedup mode {index} is not 0..=2"))?;
    }

    Ok(config)
}

fn print_codecs() {
    println!("Available compression algorithms:");
    for entry in codec_registry() {
        println!(
            "  {}: {:<18} {} (.{})",
            entry.index, entry.name, entry.description, entry.extension
        );
    }
}

fn print_report(mode: Mode, report: &Report) {
    match mode {
        Mode::Compress => {
            let ratio = if report.bytes_in > 0 {
                report.bytes_out as f64 * 100.0 / report.bytes_in as f64
            } else {
                0.0
            };
            println!(
                "Compressed {} bytes to {} bytes ({ratio:.2}%) -> {}",
                report.bytes_in,
                report.bytes_out,
                report.output.display()
            );
            if let Some(parts) = report.parts {
                println!("Split archive parts written: {parts}");
            }
        }
        Mode::Decompress => {
            println!(
                "Decompressed to {} bytes -> {}",
                report.bytes_out,
                report.output.display()
            );
        }
    }
    if let Some(stats) = &report.dedup {
        println!("Deduplication statistics:");
        println!("  total bytes:        {}", stats.total_bytes);
        println!("  after dedup:        {}", stats.bytes_after_dedup);
        println!("  total chunks:       {}", stats.total_chunks);
        println!("  duplicate chunks:   {}", stats.duplicate_chunks);
        println!("  bytes saved:        {}", stats.duplicate_bytes_saved);
        println!("  ratio:              {:.2}%", stats.ratio() * 100.0);
    }
}

fn diagnostic(err: &EngineError) -> String {
    if err.is_input_not_found() {
        "Input file not found".to_string()
    } else {
        match err {
            EngineError::Codec(_) | EngineError::Filter(_) => {
                format!("Invalid file format: {err}")
            }
            EngineError::Container(_) => format!("Invalid file format: {err}"),
            other => other.to_string(),
        }
    }
}

fn real_main() -> Result<i32> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber).context("failed to set up logging")?;

    if cli.list {
        print_codecs();
        return Ok(0);
    }

    let (mode, raw_index) = match (&cli.compress, &cli.decompress) {
        (Some(raw), None) => (Mode::Compress, raw.clone()),
        (None, Some(raw)) => (Mode::Decompress, raw.clone()),
        (None, None) => (Mode::Compress, String::new()),
        (Some(_), Some(_)) => bail!("-c and -d are mutually exclusive"),
    };

    // `-c 4 input` names a codec; `-c input` leans on the default (or, on
    // decompress, extension sniffing) and the token is really the input.
    let (codec_index, codec_explicit, stolen_input) = if raw_index.is_empty() {
        (0u8, false, None)
    } else {
        match raw_index.parse::<u8>() {
            Ok(index) => (index, true, None),
            Err(_) => (0u8, false, Some(PathBuf::from(&raw_index))),
        }
    };

    let (input, output) = match stolen_input {
        Some(path) => (path, cli.input.clone()),
        None => {
            let Some(input) = cli.input.clone() else {
                bail!("no input file given; see --help");
            };
            (input, cli.output.clone())
        }
    };

    let config = build_config(&cli)?;
    let range = cli.range.as_deref().map(parse_range).transpose()?;

    let mut request = match mode {
        Mode::Compress => Request::compress(&input),
        Mode::Decompress => Request::decompress(&input),
    };
    request.codec_index = codec_index;
    request.codec_explicit = codec_explicit;
    request.output = output;
    request.large_file = cli.large_file;
    request.progressive = cli.progressive || range.is_some() || cli.stream;
    request.split = cli.split;
    request.dedup = cli.dedup;
    request.range = range;
    request.stream = cli.stream;
    request.config = config;

    match run(&request) {
        Ok(report) => {
            print_report(mode, &report);
            Ok(0)
        }
        Err(err) => {
            eprintln!("{}", diagnostic(&err));
            Ok(1)
        }
    }
}

fn main() {
    match real_main() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{err:#}");
            std::process::exit(1);
        }
    }
}
