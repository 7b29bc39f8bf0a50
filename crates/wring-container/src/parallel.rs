//! Parallel chunk wrapper.
//!
//! The input is partitioned into `n` contiguous chunks (all but the last
//! equal-sized); each worker runs the primitive codec's whole-buffer
//! operation on its chunk, and the results are reassembled in input order:
//! `chunk_count: i32 LE` then, per chunk, `compressed_size: i64 LE` and the
//! chunk's codec stream. Chunks are independent, so decompression fans out
//! the same way.

use bytes::{Buf, BufMut, BytesMut};
use rayon::prelude::*;
use tracing::{debug, info, warn};

use wring_codec::{Codec, Primitive};
use wring_core::{Preset, MAX_THREADS};

use crate::ContainerError;

/// Smallest amount of input worth a dedicated worker.
const MIN_BYTES_PER_WORKER: usize = 1024;

/// Sanity bound on a stored chunk count.
const MAX_CHUNKS: i32 = 1 << 20;

/// Worker count when the caller asks for auto-detection.
pub fn optimal_threads() -> usize {
    num_cpus::get().clamp(1, MAX_THREADS)
}

fn resolve_threads(requested: usize) -> usize {
    if requested == 0 {
        optimal_threads()
    } else {
        requested.clamp(1, MAX_THREADS)
    }
}

fn build_pool(threads: usize) -> Result<rayon::ThreadPool, ContainerError> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build()
        .map_err(|e| ContainerError::ThreadPool(e.to_string()))
}

/// Surfaces the first failure by worker index; later failures are only
/// logged.
fn first_failure<T>(results: Vec<Result<T, ContainerError>>) -> Result<Vec<T>, ContainerError> {
    let mut out = Vec::with_capacity(results.len());
    let mut first: Option<(usize, ContainerError)> = None;
    for (index, result) in results.into_iter().enumerate() {
        match result {
            Ok(value) => out.push(value),
            Err(source) if first.is_none() => first = Some((index, source)),
            Err(source) => warn!(worker = index, error = %source, "additional worker failure"),
        }
    }
    match first {
        Some((index, source)) => Err(ContainerError::Worker {
            index,
            source: Box::new(source),
        }),
        None => Ok(out),
    }
}

/// A primitive codec accelerated by a worker pool.
#[derive(Debug, Clone, Copy)]
pub struct ParallelCodec {
    primitive: Primitive,
    preset: Preset,
    threads: usize,
}

impl ParallelCodec {
    /// Wraps `primitive` with parameters from `preset`; `threads == 0`
    /// auto-detects the core count.
    pub fn new(primitive: Primitive, preset: Preset, threads: usize) -> Self {
        Self {
            primitive,
            preset,
            threads,
        }
    }

    /// The wrapped primitive.
    pub fn primitive(&self) -> Primitive {
        self.primitive
    }

    /// Compresses `input` into the chunked wrapper format.
    pub fn compress(&self, input: &[u8]) -> Result<Vec<u8>, ContainerError> {
        let mut n = resolve_threads(self.threads);
        if input.len() < n * MIN_BYTES_PER_WORKER {
            n = 1;
        }
        let chunk_size = if n == 1 {
            input.len().max(1)
        } else {
            input.len() / n
        };
        info!(
            threads = n,
            input_len = input.len(),
            codec = ?self.primitive,
            "parallel compress"
        );

        // All but the last chunk share a size; the last takes the remainder.
        let mut chunks: Vec<&[u8]> = Vec::with_capacity(n);
        for i in 0..n {
            let start = i * chunk_size;
            let end = if i == n - 1 {
                input.len()
            } else {
                start + chunk_size
            };
            chunks.push(&input[start..end]);
        }

        let pool = build_pool(n)?;
        let primitive = self.primitive;
        let preset = self.preset;
        let results: Vec<Result<Vec<u8>, ContainerError>> = pool.install(|| {
            chunks
                .par_iter()
                .map(|chunk| {
                    let codec = primitive.codec(preset);
                    codec.compress(chunk).map_err(ContainerError::from)
                })
                .collect()
        });
        let compressed = first_failure(results)?;

        let total: usize = compressed.iter().map(|c| c.len()).sum();
        let mut out = BytesMut::with_capacity(4 + total + 8 * n);
        out.put_i32_le(n as i32);
        for chunk in &compressed {
            out.put_i64_le(chunk.len() as i64);
            out.put_slice(chunk);
        }
        debug!(chunks = n, bytes_out = out.len(), "parallel compress done");
        Ok(out.to_vec())
    }

    /// Decompresses the chunked wrapper format.
    pub fn decompress(&self, input: &[u8]) -> Result<Vec<u8>, ContainerError> {
        let mut buf = input;
        if buf.remaining() < 4 {
            return Err(ContainerError::BadFormat(
                "parallel wrapper header truncated".into(),
            ));
        }
        let count = buf.get_i32_le();
        if count <= 0 || count > MAX_CHUNKS {
            return Err(ContainerError::BadFormat(format!(
                "implausible chunk count {count}"
            )));
        }

        let mut streams: Vec<&[u8]> = Vec::with_capacity(count as usize);
        for index in 0..count {
            if buf.remaining() < 8 {
                return Err(ContainerError::BadFormat(format!(
                    "chunk {index} size record truncated"
                )));
            }
            let size = buf.get_i64_le();
            if size < 0 || size as usize > buf.remaining() {
                return Err(ContainerError::BadFormat(format!(
                    "chunk {index} declares {size} bytes with {} available",
                    buf.remaining()
                )));
            }
            streams.push(&buf[..size as usize]);
            buf.advance(size as usize);
        }

        let workers = resolve_threads(self.threads).min(streams.len());
        let pool = build_pool(workers)?;
        let primitive = self.primitive;
        let preset = self.preset;
        let results: Vec<Result<Vec<u8>, ContainerError>> = pool.install(|| {
            streams
                .par_iter()
                .map(|stream| {
                    let codec = primitive.codec(preset);
                    codec.decompress(stream).map_err(ContainerError::from)
                })
                .collect()
        });
        let decoded = first_failure(results)?;

        let total: usize = decoded.iter().map(|d| d.len()).sum();
        let mut out = Vec::with_capacity(total);
        for part in decoded {
            out.extend_from_slice(&part);
        }
        Ok(out)
    }
}
