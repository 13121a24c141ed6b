//! # Pipeline data model
//!
//! The reusable containers that circulate through the pipeline stages. Every type
//! here is owned by exactly one stage (or its pool) at any time: ownership moves
//! with the value and nothing keeps a reference after a [`ResourcePool::release`].
//!
//! [`ResourcePool::release`]: super::ResourcePool::release

use std::ops::Range;
use std::slice::ChunksExact;
use std::sync::Arc;

use byteorder::{ByteOrder, LittleEndian};

use super::pool::Reusable;

/// A chunk of compressed bytes as read from the input stream
#[derive(Debug, Default)]
pub struct RawBlock {
    /// Position of the block in the input stream
    pub(crate) seq: usize,

    /// Compressed payload
    pub payload: Vec<u8>,

    /// Size of the payload once decompressed, as declared by the block frame
    pub decompressed_len: usize,

    /// Number of records declared by the block frame (if the source knows it)
    pub expected_records: Option<usize>,

    /// Whether this is the last block of the stream
    pub(crate) is_final: bool,
}
impl RawBlock {
    /// Sequence id of the block (position in input order)
    #[must_use]
    pub fn seq(&self) -> usize {
        self.seq
    }

    #[must_use]
    pub fn is_final(&self) -> bool {
        self.is_final
    }
}
impl Reusable for RawBlock {
    fn reset(&mut self) {
        self.seq = 0;
        self.payload.clear();
        self.decompressed_len = 0;
        self.expected_records = None;
        self.is_final = false;
    }
}

/// The plain-byte result of decompressing one [`RawBlock`]
///
/// A decompressed block may be split across two record buffers, so it keeps a
/// cursor of how many of its bytes have already been parsed.
#[derive(Debug, Default)]
pub struct DecompressedBlock {
    pub(crate) seq: usize,
    pub(crate) data: Vec<u8>,
    pub(crate) cursor: usize,
    pub(crate) parsed_records: usize,
    pub(crate) expected_records: Option<usize>,
    pub(crate) is_final: bool,
}
impl DecompressedBlock {
    #[must_use]
    pub fn seq(&self) -> usize {
        self.seq
    }

    #[must_use]
    pub fn is_final(&self) -> bool {
        self.is_final
    }

    /// The decompressed bytes that have not been parsed yet
    #[must_use]
    pub fn remaining(&self) -> &[u8] {
        &self.data[self.cursor..]
    }

    /// Returns true once every byte of the block has been parsed
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.cursor >= self.data.len()
    }

    /// Takes over the identity of the raw block it was decompressed from
    pub(crate) fn adopt(&mut self, raw: &RawBlock) {
        self.seq = raw.seq;
        self.cursor = 0;
        self.parsed_records = 0;
        self.expected_records = raw.expected_records;
        self.is_final = raw.is_final;
    }

    pub(crate) fn advance(&mut self, consumed: usize, records: usize) {
        self.cursor += consumed;
        self.parsed_records += records;
    }

    pub(crate) fn data_mut(&mut self) -> &mut Vec<u8> {
        &mut self.data
    }
}
impl Reusable for DecompressedBlock {
    fn reset(&mut self) {
        self.seq = 0;
        self.data.clear();
        self.cursor = 0;
        self.parsed_records = 0;
        self.expected_records = None;
        self.is_final = false;
    }
}

/// A reusable container of fixed-size records
///
/// Records are a whole number of little-endian 64-bit words. A buffer is filled
/// from one or more decompressed blocks until it holds `capacity` records or the
/// final block of the stream has been parsed into it.
#[derive(Debug, Clone)]
pub struct RecordBuffer {
    id: usize,
    record_words: usize,
    capacity: usize,
    words: Vec<u64>,
    is_final: bool,
}
impl RecordBuffer {
    /// Creates an empty buffer for `capacity` records of `record_words` words each
    #[must_use]
    pub fn new(record_words: usize, capacity: usize) -> Self {
        Self {
            id: 0,
            record_words,
            capacity,
            words: Vec::with_capacity(record_words * capacity),
            is_final: false,
        }
    }

    /// Id assigned when the buffer was acquired for filling
    #[must_use]
    pub fn id(&self) -> usize {
        self.id
    }

    /// Number of records currently stored
    #[must_use]
    pub fn len(&self) -> usize {
        if self.record_words == 0 {
            0
        } else {
            self.words.len() / self.record_words
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Maximum number of records the buffer holds
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of records that still fit in the buffer
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.capacity.saturating_sub(self.len())
    }

    #[must_use]
    pub fn is_full(&self) -> bool {
        self.remaining() == 0
    }

    #[must_use]
    pub fn is_final(&self) -> bool {
        self.is_final
    }

    /// Size of a single record in 64-bit words
    #[must_use]
    pub fn record_words(&self) -> usize {
        self.record_words
    }

    /// Size of a single record in bytes
    #[must_use]
    pub fn record_bytes(&self) -> usize {
        self.record_words * 8
    }

    /// Returns the words of the record at `index`
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range
    #[must_use]
    pub fn record(&self, index: usize) -> &[u64] {
        let start = index * self.record_words;
        &self.words[start..start + self.record_words]
    }

    /// Iterates over all records in the buffer
    #[must_use]
    pub fn records(&self) -> ChunksExact<'_, u64> {
        self.words.chunks_exact(self.record_words.max(1))
    }

    /// Iterates over the records in `range`, yielding `(index, record)` pairs
    pub fn records_in(&self, range: Range<usize>) -> impl Iterator<Item = (usize, &[u64])> + '_ {
        let start = range.start;
        self.words[range.start * self.record_words..range.end * self.record_words]
            .chunks_exact(self.record_words.max(1))
            .enumerate()
            .map(move |(i, record)| (start + i, record))
    }

    /// The raw record words viewed as native-endian bytes
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.words)
    }

    /// Appends `n_records` records decoded from little-endian `bytes`
    ///
    /// `bytes` must hold at least `n_records` complete records.
    pub fn extend_from_le_bytes(&mut self, bytes: &[u8], n_records: usize) {
        let n_words = n_records * self.record_words;
        let start = self.words.len();
        self.words.resize(start + n_words, 0);
        LittleEndian::read_u64_into(&bytes[..n_words * 8], &mut self.words[start..]);
    }

    /// Appends a single record given as words
    pub fn push_record(&mut self, record: &[u64]) {
        debug_assert_eq!(record.len(), self.record_words);
        self.words.extend_from_slice(record);
    }

    pub(crate) fn set_id(&mut self, id: usize) {
        self.id = id;
    }

    pub(crate) fn mark_final(&mut self) {
        self.is_final = true;
    }

    #[cfg(test)]
    pub(crate) fn words_mut(&mut self) -> &mut [u64] {
        &mut self.words
    }
}
impl Reusable for RecordBuffer {
    fn reset(&mut self) {
        self.id = 0;
        self.words.clear();
        self.is_final = false;
    }
}

/// A `[low, high)` range of records of one shared record buffer
///
/// All fragments of a buffer share one [`Arc`]. The number of outstanding
/// fragments is the strong count of that `Arc`; the fragment that drops the
/// last reference through [`Arc::into_inner`] recovers the buffer.
#[derive(Debug)]
pub struct ValidationFragment {
    pub(crate) low: usize,
    pub(crate) high: usize,
    pub(crate) job: Arc<super::context::ValidationJob>,
}
impl ValidationFragment {
    #[must_use]
    pub fn range(&self) -> Range<usize> {
        self.low..self.high
    }

    /// Splits a finished buffer into at most `max_fragments` fragments
    ///
    /// An empty buffer still yields a single empty fragment so that its
    /// completion is observed.
    pub(crate) fn split(job: Arc<super::context::ValidationJob>, max_fragments: usize) -> Vec<Self> {
        let n_records = job.buffer.len();
        let n_fragments = max_fragments.min(n_records).max(1);
        let per_fragment = n_records.div_ceil(n_fragments).max(1);
        let mut fragments = Vec::with_capacity(n_fragments);
        let mut low = 0;
        loop {
            let high = (low + per_fragment).min(n_records);
            fragments.push(Self {
                low,
                high,
                job: Arc::clone(&job),
            });
            if high >= n_records {
                break;
            }
            low = high;
        }
        fragments
    }
}

/// Stage a work item is routed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Read,
    Decompress,
    Parse,
    Validate,
}
impl Stage {
    /// Fixed drain-before-fill priority: later stages run first
    #[must_use]
    pub fn priority(self) -> u8 {
        match self {
            Self::Read => 0,
            Self::Decompress => 1,
            Self::Parse => 2,
            Self::Validate => 3,
        }
    }
}

/// A unit of work for the scheduler
#[derive(Debug)]
pub enum WorkItem {
    /// Read the next block, optionally into a block already acquired by the driver
    Read(Option<RawBlock>),
    /// Decompress a batch of raw blocks into their paired output blocks
    Decompress(Vec<(RawBlock, DecompressedBlock)>),
    /// Parse the next in-order block into a record buffer
    Parse(DecompressedBlock, RecordBuffer),
    /// Validate one fragment of a finished record buffer
    Validate(ValidationFragment),
}
impl WorkItem {
    #[must_use]
    pub fn stage(&self) -> Stage {
        match self {
            Self::Read(_) => Stage::Read,
            Self::Decompress(_) => Stage::Decompress,
            Self::Parse(..) => Stage::Parse,
            Self::Validate(_) => Stage::Validate,
        }
    }
}
impl super::scheduler::Prioritized for WorkItem {
    fn priority(&self) -> u8 {
        self.stage().priority()
    }
}

#[cfg(test)]
mod testing {
    use super::*;

    fn le_records(records: &[[u64; 2]]) -> Vec<u8> {
        let mut bytes = Vec::new();
        for record in records {
            for word in record {
                bytes.extend_from_slice(&word.to_le_bytes());
            }
        }
        bytes
    }

    #[test]
    fn test_record_buffer_fill() {
        let mut buffer = RecordBuffer::new(2, 3);
        assert!(buffer.is_empty());
        assert_eq!(buffer.remaining(), 3);

        let bytes = le_records(&[[1, 2], [3, 4]]);
        buffer.extend_from_le_bytes(&bytes, 2);
        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.record(1), &[3, 4]);
        assert!(!buffer.is_full());

        buffer.push_record(&[5, 6]);
        assert!(buffer.is_full());
        let flags: Vec<u64> = buffer.records().map(|r| r[0]).collect();
        assert_eq!(flags, vec![1, 3, 5]);

        let tail: Vec<usize> = buffer.records_in(1..3).map(|(i, _)| i).collect();
        assert_eq!(tail, vec![1, 2]);
    }

    #[test]
    fn test_record_buffer_byte_view() {
        let mut buffer = RecordBuffer::new(2, 2);
        buffer.push_record(&[1, u64::MAX]);
        let bytes = buffer.as_bytes();
        assert_eq!(bytes.len(), buffer.record_bytes());
        assert_eq!(&bytes[..8], &1u64.to_ne_bytes());
        assert!(bytes[8..].iter().all(|&b| b == 0xff));

        // the view round-trips through the little-endian decoder on this host
        let mut copy = RecordBuffer::new(2, 2);
        let le: Vec<u8> = buffer.record(0).iter().flat_map(|w| w.to_le_bytes()).collect();
        copy.extend_from_le_bytes(&le, 1);
        assert_eq!(copy.as_bytes(), bytes);
    }

    #[test]
    fn test_record_buffer_reset() {
        let mut buffer = RecordBuffer::new(1, 4);
        buffer.push_record(&[9]);
        buffer.set_id(7);
        buffer.mark_final();
        buffer.reset();
        assert_eq!(buffer.id(), 0);
        assert!(buffer.is_empty());
        assert!(!buffer.is_final());
        assert_eq!(buffer.capacity(), 4);
    }

    #[test]
    fn test_decompressed_block_cursor() {
        let raw = RawBlock {
            seq: 3,
            is_final: true,
            expected_records: Some(2),
            ..Default::default()
        };
        let mut block = DecompressedBlock::default();
        block.data_mut().extend_from_slice(&[0u8; 32]);
        block.adopt(&raw);
        assert_eq!(block.seq(), 3);
        assert!(block.is_final());

        block.advance(16, 1);
        assert_eq!(block.remaining().len(), 16);
        assert!(!block.is_exhausted());
        block.advance(16, 1);
        assert!(block.is_exhausted());
    }

    #[test]
    fn test_priorities_drain_before_fill() {
        assert!(Stage::Validate.priority() > Stage::Parse.priority());
        assert!(Stage::Parse.priority() > Stage::Decompress.priority());
        assert!(Stage::Decompress.priority() > Stage::Read.priority());
    }
}
