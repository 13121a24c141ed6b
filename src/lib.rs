//! # bqpipe
//!
//! A parallel decode-and-validate pipeline for block-compressed streams of
//! fixed-size nucleotide records.
//!
//! Blocks are read, decompressed, parsed in input order into record buffers and
//! validated in parallel on a fixed pool of worker threads, with every buffer drawn
//! from a bounded pool. See [`pipeline`] for the machinery and [`format`] for the
//! BQZ stream format it runs over.
//!
//! ```rust
//! use std::io::Cursor;
//!
//! use bqpipe::{validate_stream, BlockWriterBuilder, PipelineConfigBuilder, StreamHeader};
//!
//! let mut bytes = Vec::new();
//! let mut writer = BlockWriterBuilder::default()
//!     .header(StreamHeader::new(16).with_block_records(4))
//!     .build(&mut bytes)
//!     .unwrap();
//! for _ in 0..10 {
//!     writer.write_nucleotides(0, b"ACGTACGTACGTACGT").unwrap();
//! }
//! writer.finish().unwrap();
//! drop(writer);
//!
//! let config = PipelineConfigBuilder::default().threads(2).build().unwrap();
//! let stats = validate_stream(Cursor::new(bytes), config).unwrap();
//! assert_eq!(stats.records_validated, 10);
//! ```

pub mod codec;
pub mod error;
pub mod format;
pub mod pipeline;
mod policy;
mod progress;

pub use codec::{
    AcceptAll, BlockCodec, BlockSource, FixedRecordParser, ParseProgress, RecordParser,
    RecordValidator, ZstdCodec,
};
pub use error::{Error, Result};
pub use format::{
    BlockHeader, BlockWriter, BlockWriterBuilder, FrameReader, PackedRecordValidator, StreamHeader,
};
pub use pipeline::{
    Pipeline, PipelineConfig, PipelineConfigBuilder, PipelineHandle, RawBlock, RecordBuffer, Stats,
};
pub use policy::{Policy, RNG_SEED};
pub use progress::ProgressTracker;

use std::io::Read;
use std::sync::Arc;

/// Validates every record of a BQZ stream
///
/// Reads the stream header, builds the matching codec, parser and validator and
/// runs the pipeline to completion.
pub fn validate_stream<R: Read + Send + 'static>(reader: R, config: PipelineConfig) -> Result<Stats> {
    let reader = FrameReader::new(reader)?;
    let header = reader.header();
    config.validate()?;
    let config = config.resolved();
    let pipeline = Pipeline::new(
        config.clone(),
        Arc::new(ZstdCodec::new(header.is_compressed(), config.threads)?),
        Arc::new(FixedRecordParser::new(header.record_words())?),
        Arc::new(PackedRecordValidator::new(header.slen)),
    );
    pipeline.run(reader)
}

#[cfg(test)]
mod testing {

    use super::*;
    use anyhow::Result;
    use rand::rngs::SmallRng;
    use rand::{Rng, SeedableRng};
    use std::io::Cursor;

    fn random_sequence(rng: &mut SmallRng, slen: usize) -> Vec<u8> {
        (0..slen).map(|_| b"ACGT"[rng.random_range(0..4)]).collect()
    }

    fn write_stream(header: StreamHeader, n_records: usize) -> Result<Vec<u8>> {
        let mut rng = SmallRng::seed_from_u64(RNG_SEED);
        let mut bytes = Vec::new();
        let mut writer = BlockWriterBuilder::default()
            .header(header)
            .build(&mut bytes)?;
        for i in 0..n_records {
            let sequence = random_sequence(&mut rng, header.slen as usize);
            assert!(writer.write_nucleotides(i as u64, &sequence)?);
        }
        writer.finish()?;
        drop(writer);
        Ok(bytes)
    }

    fn config(threads: usize, buffer_records: usize) -> Result<PipelineConfig> {
        Ok(PipelineConfigBuilder::default()
            .threads(threads)
            .buffer_records(buffer_records)
            .build()?)
    }

    #[test]
    fn test_compressed_stream() -> Result<()> {
        let bytes = write_stream(StreamHeader::new(50).with_block_records(64), 1000)?;
        let stats = validate_stream(Cursor::new(bytes), config(4, 100)?)?;
        assert_eq!(stats.blocks_read, 16);
        assert_eq!(stats.records_parsed, 1000);
        assert_eq!(stats.records_validated, 1000);
        assert_eq!(stats.buffers_parsed, 10);
        assert_eq!(stats.buffers_validated, 10);
        Ok(())
    }

    #[test]
    fn test_uncompressed_stream() -> Result<()> {
        let header = StreamHeader::new(32)
            .with_compression(false)
            .with_block_records(10);
        let bytes = write_stream(header, 95)?;
        let stats = validate_stream(Cursor::new(bytes), config(2, 40)?)?;
        assert_eq!(stats.records_validated, 95);
        assert_eq!(stats.buffers_parsed, 3);
        Ok(())
    }

    #[test]
    fn test_empty_stream() -> Result<()> {
        let bytes = write_stream(StreamHeader::new(20), 0)?;
        let stats = validate_stream(Cursor::new(bytes), config(2, 16)?)?;
        assert_eq!(stats.blocks_read, 1);
        assert_eq!(stats.records_validated, 0);
        assert_eq!(stats.buffers_validated, 1);
        Ok(())
    }

    #[test]
    fn test_corrupt_padding_fails_validation() -> Result<()> {
        let header = StreamHeader::new(20)
            .with_compression(false)
            .with_block_records(8);
        let mut bytes = write_stream(header, 24)?;

        // record 13 lives in the second block, at index 5
        let record_bytes = header.record_bytes();
        let offset = format::SIZE_HEADER
            + 2 * format::SIZE_BLOCK_HEADER
            + 8 * record_bytes
            + 5 * record_bytes
            + 8;
        bytes[offset..offset + 8].copy_from_slice(&u64::MAX.to_le_bytes());

        match validate_stream(Cursor::new(bytes), config(3, 10)?) {
            Err(Error::ValidationError(err)) => {
                assert_eq!(err.buffer, 1);
                assert_eq!(err.record, 3);
            }
            other => panic!("unexpected result: {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn test_truncated_stream_is_an_input_error() -> Result<()> {
        let mut bytes = write_stream(StreamHeader::new(40).with_block_records(16), 100)?;
        bytes.truncate(bytes.len() - 3);
        let result = validate_stream(Cursor::new(bytes), config(2, 32)?);
        assert!(matches!(result, Err(Error::InputError(_))));
        Ok(())
    }
}
