//! Huffman coding.
//!
//! The tree lives in an arena: nodes are records in a `Vec` addressed by
//! `u32` index, internal nodes carry two child indices and leaves carry a
//! byte. The arena is built per job, cloned freely across worker threads,
//! and dropped with the job.
//!
//! Stream layout: `original_size: u64 LE`, then the tree in pre-order
//! (`0` introduces an internal node followed by its left and right subtrees,
//! `1` introduces a leaf followed by its byte), then the code stream packed
//! most-significant bit first with the final byte zero-padded. An empty
//! input is just the zero header; no tree is stored.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use bytes::{Buf, BufMut, BytesMut};

use crate::bitio::{BitReader, BitWriter};
use crate::{Codec, CodecError};
use wring_core::Preset;

/// Alphabet size: one symbol per byte value.
pub const MAX_SYMBOLS: usize = 256;

/// Default cap on code length.
pub const DEFAULT_MAX_DEPTH: usize = 256;
/// Depth cap under the speed preset.
pub const SPEED_MAX_DEPTH: usize = 32;
/// Depth cap under the size preset.
pub const SIZE_MAX_DEPTH: usize = 512;

/// Hard ceiling on arena size while deserializing: a valid tree over a
/// 256-symbol alphabet has at most 511 nodes.
const MAX_TREE_NODES: usize = 2 * MAX_SYMBOLS - 1;

/// One arena node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Node {
    /// Interior node with two children.
    Internal {
        /// Index of the left (bit 0) child.
        left: u32,
        /// Index of the right (bit 1) child.
        right: u32,
    },
    /// Terminal node carrying a byte value.
    Leaf(u8),
}

/// Arena-backed Huffman tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tree {
    nodes: Vec<Node>,
    root: u32,
}

impl Tree {
    /// Root node index.
    pub fn root(&self) -> u32 {
        self.root
    }

    /// Looks up a node by index.
    pub fn node(&self, index: u32) -> Node {
        self.nodes[index as usize]
    }

    /// Builds the tree from a byte-frequency table.
    ///
    /// Returns `None` when every frequency is zero (empty input). Ties on
    /// frequency resolve by insertion order, so the first-extracted node
    /// always becomes the left child of its merge.
    pub fn from_frequencies(freq: &[u64; MAX_SYMBOLS]) -> Option<Self> {
        let mut nodes = Vec::new();
        let mut heap: BinaryHeap<Reverse<(u64, u32, u32)>> = BinaryHeap::new();
        let mut seq: u32 = 0;

        for (byte, &count) in freq.iter().enumerate() {
            if count > 0 {
                let index = nodes.len() as u32;
                nodes.push(Node::Leaf(byte as u8));
                heap.push(Reverse((count, seq, index)));
                seq += 1;
            }
        }

        if heap.is_empty() {
            return None;
        }

        // A single distinct byte still gets a one-bit code: hang the leaf
        // under a root whose other branch repeats the same byte.
        if heap.len() == 1 {
            let Reverse((_, _, leaf)) = heap.pop()?;
            let twin = nodes.len() as u32;
            nodes.push(nodes[leaf as usize]);
            let root = nodes.len() as u32;
            nodes.push(Node::Internal { left: leaf, right: twin });
            return Some(Self { nodes, root });
        }

        while heap.len() > 1 {
            let Reverse((left_freq, _, left)) = heap.pop()?;
            let Reverse((right_freq, _, right)) = heap.pop()?;
            let parent = nodes.len() as u32;
            nodes.push(Node::Internal { left, right });
            heap.push(Reverse((left_freq + right_freq, seq, parent)));
            seq += 1;
        }

        let Reverse((_, _, root)) = heap.pop()?;
        Some(Self { nodes, root })
    }

    /// Serializes in pre-order into `out`.
    pub fn serialize(&self, out: &mut Vec<u8>) {
        self.serialize_node(self.root, out);
    }

    fn serialize_node(&self, index: u32, out: &mut Vec<u8>) {
        match self.node(index) {
            Node::Internal { left, right } => {
                out.push(0);
                self.serialize_node(left, out);
                self.serialize_node(right, out);
            }
            Node::Leaf(byte) => {
                out.push(1);
                out.push(byte);
            }
        }
    }

    /// Reads a pre-order serialized tree from the front of `buf`.
    pub fn deserialize(buf: &mut impl Buf) -> Result<Self, CodecError> {
        let mut nodes = Vec::new();
        let root = Self::deserialize_node(buf, &mut nodes, 0)?;
        Ok(Self { nodes, root })
    }

    fn deserialize_node(
        buf: &mut impl Buf,
        nodes: &mut Vec<Node>,
        depth: usize,
    ) -> Result<u32, CodecError> {
        if nodes.len() >= MAX_TREE_NODES {
            return Err(CodecError::corrupt("huffman tree has too many nodes"));
        }
        if depth > MAX_TREE_NODES {
            return Err(CodecError::corrupt("huffman tree nesting too deep"));
        }
        if !buf.has_remaining() {
            return Err(CodecError::corrupt("huffman tree truncated"));
        }
        match buf.get_u8() {
            0 => {
                // Reserve the slot so children index past their parent.
                let index = nodes.len() as u32;
                nodes.push(Node::Leaf(0));
                let left = Self::deserialize_node(buf, nodes, depth + 1)?;
                let right = Self::deserialize_node(buf, nodes, depth + 1)?;
                nodes[index as usize] = Node::Internal { left, right };
                Ok(index)
            }
            1 => {
                if !buf.has_remaining() {
                    return Err(CodecError::corrupt("huffman leaf truncated"));
                }
                let byte = buf.get_u8();
                let index = nodes.len() as u32;
                nodes.push(Node::Leaf(byte));
                Ok(index)
            }
            other => Err(CodecError::corrupt(format!(
                "invalid huffman tree marker {other:#04x}"
            ))),
        }
    }

    /// Derives the per-symbol code table.
    ///
    /// Left edges are 0, right edges 1. Once a path reaches `max_depth`,
    /// every leaf beneath that point is assigned the path so far.
    pub fn codes(&self, max_depth: usize) -> Vec<Vec<u8>> {
        let mut table = vec![Vec::new(); MAX_SYMBOLS];
        let mut path = Vec::new();
        self.collect_codes(self.root, &mut path, max_depth, &mut table);
        table
    }

    fn collect_codes(
        &self,
        index: u32,
        path: &mut Vec<u8>,
        max_depth: usize,
        table: &mut [Vec<u8>],
    ) {
        match self.node(index) {
            Node::Leaf(byte) => {
                table[byte as usize] = path.clone();
            }
            Node::Internal { left, right } => {
                if path.len() >= max_depth {
                    self.assign_truncated(index, path, table);
                    return;
                }
                path.push(0);
                self.collect_codes(left, path, max_depth, table);
                path.pop();
                path.push(1);
                self.collect_codes(right, path, max_depth, table);
                path.pop();
            }
        }
    }

    fn assign_truncated(&self, index: u32, path: &[u8], table: &mut [Vec<u8>]) {
        match self.node(index) {
            Node::Leaf(byte) => table[byte as usize] = path.to_vec(),
            Node::Internal { left, right } => {
                self.assign_truncated(left, path, table);
                self.assign_truncated(right, path, table);
            }
        }
    }
}

/// Whole-buffer Huffman codec.
#[derive(Debug, Clone)]
pub struct HuffmanCodec {
    max_depth: usize,
}

impl HuffmanCodec {
    /// Creates a codec with an explicit depth cap.
    pub fn new(max_depth: usize) -> Self {
        Self { max_depth }
    }

    /// Depth cap from the preset: 256 by default, 32 for speed, 512 for size.
    pub fn from_preset(preset: Preset) -> Self {
        let max_depth = match preset {
            Preset::None => DEFAULT_MAX_DEPTH,
            Preset::Speed => SPEED_MAX_DEPTH,
            Preset::Size => SIZE_MAX_DEPTH,
        };
        Self::new(max_depth)
    }
}

impl Default for HuffmanCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DEPTH)
    }
}

impl Codec for HuffmanCodec {
    fn name(&self) -> &'static str {
        "huffman"
    }

    fn compress(&self, input: &[u8]) -> Result<Vec<u8>, CodecError> {
        let mut encoder = HuffmanEncoder::new(self.max_depth);
        encoder.count_frequencies(input);
        encoder.build_tree_and_codes();

        let mut out = Vec::new();
        encoder.write_header(&mut out);
        out.extend_from_slice(&encoder.compress_chunk(input));
        out.extend_from_slice(&encoder.finalize());
        Ok(out)
    }

    fn decompress(&self, input: &[u8]) -> Result<Vec<u8>, CodecError> {
        let mut buf = input;
        if buf.remaining() < 8 {
            return Err(CodecError::corrupt("huffman header truncated"));
        }
        let original_size = CodecError::check_declared(buf.get_u64_le())?;
        if original_size == 0 {
            return Ok(Vec::new());
        }

        let tree = Tree::deserialize(&mut buf)?;
        let mut out = Vec::with_capacity(original_size);
        let mut bits = BitReader::new(buf);
        let mut current = tree.root();
        while out.len() < original_size {
            let bit = bits
                .next_bit()
                .ok_or_else(|| CodecError::corrupt("huffman bit stream ended early"))?;
            current = match tree.node(current) {
                Node::Internal { left, right } => {
                    if bit {
                        right
                    } else {
                        left
                    }
                }
                Node::Leaf(_) => {
                    return Err(CodecError::corrupt("huffman walk landed on a leaf"))
                }
            };
            if let Node::Leaf(byte) = tree.node(current) {
                out.push(byte);
                current = tree.root();
            }
        }
        Ok(out)
    }
}

/// Two-pass streaming Huffman encoder.
///
/// Pass one feeds every chunk through [`count_frequencies`]; after
/// [`build_tree_and_codes`] the same chunks go through [`compress_chunk`] in
/// order, and [`finalize`] flushes the trailing partial byte.
///
/// [`count_frequencies`]: HuffmanEncoder::count_frequencies
/// [`build_tree_and_codes`]: HuffmanEncoder::build_tree_and_codes
/// [`compress_chunk`]: HuffmanEncoder::compress_chunk
/// [`finalize`]: HuffmanEncoder::finalize
pub struct HuffmanEncoder {
    freq: [u64; MAX_SYMBOLS],
    total_bytes: u64,
    max_depth: usize,
    tree: Option<Tree>,
    codes: Vec<Vec<u8>>,
    writer: BitWriter,
}

impl HuffmanEncoder {
    /// Creates a fresh encoder with the given depth cap.
    pub fn new(max_depth: usize) -> Self {
        Self {
            freq: [0; MAX_SYMBOLS],
            total_bytes: 0,
            max_depth,
            tree: None,
            codes: Vec::new(),
            writer: BitWriter::new(),
        }
    }

    /// Pass 1: accumulates byte frequencies.
    pub fn count_frequencies(&mut self, data: &[u8]) {
        for &byte in data {
            self.freq[byte as usize] += 1;
        }
        self.total_bytes += data.len() as u64;
    }

    /// Total bytes seen during pass 1.
    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    /// Builds the tree and the code table from the accumulated frequencies.
    pub fn build_tree_and_codes(&mut self) {
        self.tree = Tree::from_frequencies(&self.freq);
        self.codes = match &self.tree {
            Some(tree) => tree.codes(self.max_depth),
            None => Vec::new(),
        };
    }

    /// The built tree; `None` until pass 1 saw data and the build ran.
    pub fn tree(&self) -> Option<&Tree> {
        self.tree.as_ref()
    }

    /// Writes `original_size` and the serialized tree.
    pub fn write_header(&self, out: &mut Vec<u8>) {
        let mut header = BytesMut::with_capacity(8);
        header.put_u64_le(self.total_bytes);
        out.extend_from_slice(&header);
        if let Some(tree) = &self.tree {
            tree.serialize(out);
        }
    }

    /// Pass 2: encodes one chunk, returning the complete bytes produced.
    ///
    /// Bits that do not fill a byte stay buffered for the next chunk.
    pub fn compress_chunk(&mut self, input: &[u8]) -> Vec<u8> {
        for &byte in input {
            for &bit in &self.codes[byte as usize] {
                self.writer.push_bit(bit == 1);
            }
        }
        self.writer.take_complete()
    }

    /// Flushes the final partial byte, zero-padded.
    pub fn finalize(&mut self) -> Vec<u8> {
        match self.writer.partial() {
            Some(byte) => {
                self.writer.reset();
                vec![byte]
            }
            None => Vec::new(),
        }
    }
}

/// Outcome of one streaming decode call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamStatus {
    /// The input chunk is fully consumed; feed more input.
    InputExhausted,
    /// The output budget was reached; unconsumed input remains.
    OutputFull,
}

/// Resumable Huffman bit-stream decoder.
///
/// State is the tree, the current node, and any bits left over from a
/// partially consumed input byte, so decoding continues seamlessly across
/// chunk boundaries in either direction.
pub struct HuffmanStreamDecoder {
    tree: Tree,
    current: u32,
    pending_byte: u8,
    pending_bits: u8,
}

impl HuffmanStreamDecoder {
    /// Starts decoding against `tree`.
    pub fn new(tree: Tree) -> Self {
        let current = tree.root();
        Self {
            tree,
            current,
            pending_byte: 0,
            pending_bits: 0,
        }
    }

    fn step(&mut self, bit: bool, out: &mut Vec<u8>) -> Result<(), CodecError> {
        self.current = match self.tree.node(self.current) {
            Node::Internal { left, right } => {
                if bit {
                    right
                } else {
                    left
                }
            }
            Node::Leaf(_) => return Err(CodecError::corrupt("huffman walk landed on a leaf")),
        };
        if let Node::Leaf(byte) = self.tree.node(self.current) {
            out.push(byte);
            self.current = self.tree.root();
        }
        Ok(())
    }

    /// Decodes from `input`, appending at most `budget` bytes to `out`.
    ///
    /// Returns the number of input bytes consumed and whether the call
    /// stopped for lack of input or lack of output budget. A byte whose bits
    /// were only partially used counts as consumed; the remainder is carried
    /// in the decoder state.
    pub fn decode(
        &mut self,
        input: &[u8],
        out: &mut Vec<u8>,
        budget: usize,
    ) -> Result<(usize, StreamStatus), CodecError> {
        let target = out.len() + budget;

        // Leftover bits from the previous call come first.
        while self.pending_bits > 0 {
            if out.len() >= target {
                return Ok((0, StreamStatus::OutputFull));
            }
            let bit = self.pending_byte & 0x80 != 0;
            self.pending_byte <<= 1;
            self.pending_bits -= 1;
            self.step(bit, out)?;
        }

        for (index, &byte) in input.iter().enumerate() {
            for bit_pos in 0..8u8 {
                if out.len() >= target {
                    // Stash the untouched bits of this byte.
                    self.pending_byte = byte << bit_pos;
                    self.pending_bits = 8 - bit_pos;
                    return Ok((index + 1, StreamStatus::OutputFull));
                }
                let bit = (byte >> (7 - bit_pos)) & 1 == 1;
                self.step(bit, out)?;
            }
        }

        Ok((input.len(), StreamStatus::InputExhausted))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(data: &[u8]) {
        let codec = HuffmanCodec::default();
        let compressed = codec.compress(data).unwrap();
        assert_eq!(codec.decompress(&compressed).unwrap(), data);
    }

    #[test]
    fn two_symbol_vector() {
        // 'a' and 'b' at equal frequency: 'a' is extracted first and takes
        // the left branch, so "ab" packs to the single byte 0x40.
        let codec = HuffmanCodec::default();
        let out = codec.compress(b"ab").unwrap();
        let expected = [
            0x02, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, // original_size
            0x00, 0x01, 0x61, 0x01, 0x62, // tree: internal, leaf 'a', leaf 'b'
            0x40, // code stream 0100_0000
        ];
        assert_eq!(out, expected);
        assert_eq!(codec.decompress(&out).unwrap(), b"ab");
    }

    #[test]
    fn empty_input() {
        let codec = HuffmanCodec::default();
        let out = codec.compress(b"").unwrap();
        assert_eq!(out, vec![0u8; 8]);
        assert_eq!(codec.decompress(&out).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn single_distinct_byte() {
        let codec = HuffmanCodec::default();
        let out = codec.compress(b"zzzz").unwrap();
        // Degenerate tree: one internal node, leaf on the left, one-bit code.
        assert_eq!(codec.decompress(&out).unwrap(), b"zzzz");
        // 4 one-bit codes pack into a single byte.
        let tree_len = 5; // 0, 1 'z', 1 'z'
        assert_eq!(out.len(), 8 + tree_len + 1);
    }

    #[test]
    fn single_byte_input() {
        round_trip(b"x");
    }

    #[test]
    fn all_byte_values() {
        let data: Vec<u8> = (0..=255u8).cycle().take(4096).collect();
        round_trip(&data);
    }

    #[test]
    fn skewed_distribution() {
        let mut data = vec![b'a'; 10_000];
        data.extend_from_slice(b"the quick brown fox jumps over the lazy dog");
        round_trip(&data);
    }

    #[test]
    fn truncated_tree_is_corrupt() {
        let codec = HuffmanCodec::default();
        let mut out = codec.compress(b"hello world").unwrap();
        out.truncate(10); // mid-tree
        assert!(matches!(
            codec.decompress(&out),
            Err(CodecError::Corrupt(_))
        ));
    }

    #[test]
    fn truncated_bit_stream_is_corrupt() {
        let codec = HuffmanCodec::default();
        let data: Vec<u8> = (0..200u8).collect();
        let mut out = codec.compress(&data).unwrap();
        out.truncate(out.len() - 2);
        assert!(matches!(
            codec.decompress(&out),
            Err(CodecError::Corrupt(_))
        ));
    }

    #[test]
    fn bad_tree_marker_is_corrupt() {
        let codec = HuffmanCodec::default();
        let mut out = codec.compress(b"abcabc").unwrap();
        out[8] = 7; // neither internal nor leaf
        assert!(matches!(
            codec.decompress(&out),
            Err(CodecError::Corrupt(_))
        ));
    }

    #[test]
    fn oversized_header_is_rejected() {
        let codec = HuffmanCodec::default();
        let mut out = vec![0xFFu8; 16];
        out[..8].copy_from_slice(&u64::MAX.to_le_bytes());
        assert!(matches!(
            codec.decompress(&out),
            Err(CodecError::OversizedAllocation { .. })
        ));
    }

    #[test]
    fn streaming_encoder_matches_whole_buffer() {
        let data: Vec<u8> = b"abracadabra, abracadabra, abracadabra"
            .iter()
            .cycle()
            .take(10_000)
            .copied()
            .collect();

        let codec = HuffmanCodec::default();
        let whole = codec.compress(&data).unwrap();

        let mut encoder = HuffmanEncoder::new(DEFAULT_MAX_DEPTH);
        for chunk in data.chunks(777) {
            encoder.count_frequencies(chunk);
        }
        encoder.build_tree_and_codes();
        let mut streamed = Vec::new();
        encoder.write_header(&mut streamed);
        for chunk in data.chunks(777) {
            streamed.extend_from_slice(&encoder.compress_chunk(chunk));
        }
        streamed.extend_from_slice(&encoder.finalize());

        assert_eq!(streamed, whole);
    }

    #[test]
    fn streaming_decoder_resumes_across_chunks() {
        let data: Vec<u8> = (0..50_000u32).map(|i| (i * 31 % 256) as u8).collect();
        let codec = HuffmanCodec::default();
        let compressed = codec.compress(&data).unwrap();

        // Split off the header + tree by re-parsing them.
        let mut buf = &compressed[..];
        let original_size = buf.get_u64_le() as usize;
        let tree = Tree::deserialize(&mut buf).unwrap();

        let mut decoder = HuffmanStreamDecoder::new(tree);
        let mut out = Vec::new();
        let mut offset = compressed.len() - buf.len();
        while out.len() < original_size {
            let end = (offset + 997).min(compressed.len());
            let budget = original_size - out.len();
            let (consumed, _) = decoder
                .decode(&compressed[offset..end], &mut out, budget)
                .unwrap();
            offset += consumed;
            if consumed == 0 && offset >= compressed.len() {
                break;
            }
        }
        assert_eq!(out, data);
    }

    #[test]
    fn streaming_decoder_distinguishes_output_full() {
        let data = vec![b'q'; 1000];
        let codec = HuffmanCodec::default();
        let compressed = codec.compress(&data).unwrap();

        let mut buf = &compressed[..];
        let _ = buf.get_u64_le();
        let tree = Tree::deserialize(&mut buf).unwrap();

        let mut decoder = HuffmanStreamDecoder::new(tree);
        let mut out = Vec::new();
        let (consumed, status) = decoder.decode(buf, &mut out, 10).unwrap();
        assert_eq!(status, StreamStatus::OutputFull);
        assert_eq!(out.len(), 10);
        assert!(consumed <= buf.len());

        // Resuming with the rest of the input picks up mid-byte.
        let budget = data.len() - out.len();
        let (_, status) = decoder.decode(&buf[consumed..], &mut out, budget).unwrap();
        assert_eq!(out, data);
        let _ = status;
    }

    #[test]
    fn depth_cap_truncates_deterministically() {
        // A Fibonacci-ish frequency ramp forces a deep skewed tree; with the
        // cap at 4 the deep symbols share truncated codes.
        let mut freq = [0u64; MAX_SYMBOLS];
        let mut a = 1u64;
        let mut b = 2u64;
        for byte in 0..10 {
            freq[byte] = a;
            let next = a + b;
            a = b;
            b = next;
        }
        let tree = Tree::from_frequencies(&freq).unwrap();
        let codes = tree.codes(4);
        for byte in 0..10 {
            assert!(!codes[byte].is_empty());
            assert!(codes[byte].len() <= 4, "code for {byte} exceeds the cap");
        }
    }

    #[test]
    fn tree_serialization_round_trip() {
        let mut freq = [0u64; MAX_SYMBOLS];
        for (i, f) in freq.iter_mut().enumerate() {
            *f = (i as u64 % 7) + 1;
        }
        let tree = Tree::from_frequencies(&freq).unwrap();
        let mut bytes = Vec::new();
        tree.serialize(&mut bytes);
        let mut slice = &bytes[..];
        let back = Tree::deserialize(&mut slice).unwrap();
        assert_eq!(back, tree);
        assert!(slice.is_empty());
    }
}
