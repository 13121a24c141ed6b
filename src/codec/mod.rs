//! # Stage collaborators
//!
//! The pipeline only knows how to move blocks and buffers between stages. What the
//! bytes mean is decided by four collaborators:
//!
//! * [`BlockSource`] pulls raw block frames from the input stream
//! * [`BlockCodec`] turns a raw block into plain bytes
//! * [`RecordParser`] decodes fixed-size records from plain bytes into a [`RecordBuffer`]
//! * [`RecordValidator`] decides whether a record is well formed
//!
//! The concrete BQZ implementations live in [`crate::format`] and in the
//! submodules here.

mod fixed;
mod zstd;

pub use fixed::FixedRecordParser;
pub use zstd::ZstdCodec;

use std::ops::Range;

use auto_impl::auto_impl;

use crate::error::Result;
use crate::pipeline::{RawBlock, RecordBuffer};

/// A producer of raw block frames
///
/// Only one read is in flight at a time, so implementations do not need to be `Sync`.
#[auto_impl(&mut, Box)]
pub trait BlockSource: Send {
    /// Reads the next frame into `block`
    ///
    /// Fills the payload, the declared decompressed size and (if known) the record
    /// count. Returns `true` if this was the last block of the stream. A stream
    /// without any frames yields a single empty final block.
    fn read_chunk(&mut self, block: &mut RawBlock) -> Result<bool>;
}

/// Decompresses raw blocks
#[auto_impl(&, Box, Arc)]
pub trait BlockCodec: Send + Sync {
    /// Decompresses `raw` into `out`, which is empty on entry
    fn decompress(&self, raw: &RawBlock, out: &mut Vec<u8>) -> Result<()>;
}

/// Result of one [`RecordParser::parse_into`] call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ParseProgress {
    /// Records appended to the buffer
    pub records: usize,
    /// Input bytes consumed
    pub consumed: usize,
}

/// Decodes fixed-size records
#[auto_impl(&, Box, Arc)]
pub trait RecordParser: Send + Sync {
    /// Size of one decoded record in 64-bit words
    fn record_words(&self) -> usize;

    /// Appends as many complete records from `bytes` as fit into `buffer`
    ///
    /// Must stop when the buffer is full. Trailing bytes that do not form a
    /// complete record are an error unless the buffer filled up first.
    fn parse_into(&self, bytes: &[u8], buffer: &mut RecordBuffer) -> Result<ParseProgress>;
}

/// The record validity predicate
#[auto_impl(&, Box, Arc)]
pub trait RecordValidator: Send + Sync {
    /// Checks a single record
    fn is_valid_record(&self, record: &[u64]) -> bool;

    /// Index of the first invalid record in `range`, if any
    fn first_invalid(&self, buffer: &RecordBuffer, range: Range<usize>) -> Option<usize> {
        buffer
            .records_in(range)
            .find(|(_, record)| !self.is_valid_record(record))
            .map(|(index, _)| index)
    }

    /// Returns true if every record in `range` is valid
    fn is_valid(&self, buffer: &RecordBuffer, range: Range<usize>) -> bool {
        self.first_invalid(buffer, range).is_none()
    }
}

/// Accepts every record
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;
impl RecordValidator for AcceptAll {
    fn is_valid_record(&self, _record: &[u64]) -> bool {
        true
    }
}
