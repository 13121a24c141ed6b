//! # BQZ block streams
//!
//! A concrete block format for the pipeline: fixed-length nucleotide records packed
//! two bits per base, grouped into optionally zstd-compressed block frames.
//!
//! * [`StreamHeader`] / [`BlockHeader`]: the 32-byte headers
//! * [`FrameReader`]: reads frames, the pipeline's block source
//! * [`BlockWriter`]: packs sequences and writes frames
//! * [`PackedRecordValidator`]: the record validity check

mod header;
mod reader;
mod record;
mod writer;

pub use header::{
    sequence_words, BlockHeader, StreamHeader, DEFAULT_BLOCK_RECORDS, DEFAULT_COMPRESSION_LEVEL,
    SIZE_BLOCK_HEADER, SIZE_HEADER,
};
pub use reader::FrameReader;
pub use record::PackedRecordValidator;
pub use writer::{BlockWriter, BlockWriterBuilder};
