//! Writer for BQZ streams
//!
//! Sequences are packed into fixed-size records (a flag word followed by the
//! 2-bit encoded sequence), grouped into blocks of `block_records` records and
//! written as frames, each optionally zstd compressed.
//!
//! # Example
//!
//! ```rust
//! use bqpipe::{BlockWriterBuilder, StreamHeader};
//!
//! let mut bytes = Vec::new();
//! let mut writer = BlockWriterBuilder::default()
//!     .header(StreamHeader::new(8).with_block_records(2))
//!     .build(&mut bytes)
//!     .unwrap();
//! writer.write_nucleotides(0, b"ACGTACGT").unwrap();
//! writer.finish().unwrap();
//! ```

use std::io::Write;

use byteorder::{LittleEndian, WriteBytesExt};
use log::{debug, warn};
use rand::rngs::SmallRng;
use rand::SeedableRng;
use zstd::Encoder as ZstdEncoder;

use super::header::{BlockHeader, StreamHeader};
use crate::error::{Result, WriteError};
use crate::policy::{Policy, RNG_SEED};

/// A builder for [`BlockWriter`]
#[derive(Default)]
pub struct BlockWriterBuilder {
    header: Option<StreamHeader>,
    policy: Option<Policy>,
}
impl BlockWriterBuilder {
    #[must_use]
    pub fn header(mut self, header: StreamHeader) -> Self {
        self.header = Some(header);
        self
    }

    /// Sets how sequences with non-ACGT nucleotides are handled
    #[must_use]
    pub fn policy(mut self, policy: Policy) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn build<W: Write>(self, inner: W) -> Result<BlockWriter<W>> {
        let Some(header) = self.header else {
            return Err(WriteError::MissingHeader.into());
        };
        BlockWriter::new(inner, header, self.policy.unwrap_or_default())
    }
}

/// Writes records into a BQZ stream
///
/// The last partial block is written by [`BlockWriter::finish`], which also runs
/// when the writer is dropped.
pub struct BlockWriter<W: Write> {
    inner: W,
    header: StreamHeader,
    encoder: SequenceEncoder,

    /// Uncompressed records of the current block
    ubuf: Vec<u8>,
    /// Compressed copy of the current block
    zbuf: Vec<u8>,
    /// Records in the current block
    block_records: u32,

    records_written: usize,
    blocks_written: usize,
}
impl<W: Write> BlockWriter<W> {
    pub fn new(mut inner: W, header: StreamHeader, policy: Policy) -> Result<Self> {
        if header.block_records == 0 {
            return Err(WriteError::EmptyBlock.into());
        }
        header.write_bytes(&mut inner)?;
        let capacity = header.record_bytes() * header.block_records as usize;
        Ok(Self {
            inner,
            header,
            encoder: SequenceEncoder::with_policy(policy),
            ubuf: Vec::with_capacity(capacity),
            zbuf: Vec::new(),
            block_records: 0,
            records_written: 0,
            blocks_written: 0,
        })
    }

    #[must_use]
    pub fn header(&self) -> StreamHeader {
        self.header
    }

    /// Number of records written so far (including the unflushed block)
    #[must_use]
    pub fn records_written(&self) -> usize {
        self.records_written
    }

    /// Number of block frames written so far
    #[must_use]
    pub fn blocks_written(&self) -> usize {
        self.blocks_written
    }

    /// Encodes and writes a single sequence with its flag
    ///
    /// Returns `false` if the sequence was skipped by the invalid-nucleotide policy.
    pub fn write_nucleotides(&mut self, flag: u64, sequence: &[u8]) -> Result<bool> {
        if sequence.len() != self.header.slen as usize {
            return Err(WriteError::UnexpectedSequenceLength {
                expected: self.header.slen,
                got: sequence.len(),
            }
            .into());
        }
        let Some(words) = self.encoder.encode(sequence)? else {
            return Ok(false);
        };
        append_record(&mut self.ubuf, flag, words)?;
        self.close_record()?;
        Ok(true)
    }

    /// Writes an already packed record
    ///
    /// `words` must hold exactly as many words as a sequence of the header's `slen`.
    pub fn write_record(&mut self, flag: u64, words: &[u64]) -> Result<()> {
        append_record(&mut self.ubuf, flag, words)?;
        self.close_record()
    }

    fn close_record(&mut self) -> Result<()> {
        self.block_records += 1;
        self.records_written += 1;
        if self.block_records == self.header.block_records {
            self.flush_block()?;
        }
        Ok(())
    }

    fn flush_block(&mut self) -> Result<()> {
        if self.block_records == 0 {
            return Ok(());
        }
        let decompressed_size = u32::try_from(self.ubuf.len()).map_err(anyhow::Error::from)?;
        let payload = if self.header.compressed {
            self.zbuf.clear();
            let mut encoder = ZstdEncoder::new(&mut self.zbuf, self.header.level)?;
            encoder.write_all(&self.ubuf)?;
            encoder.finish()?;
            &self.zbuf
        } else {
            &self.ubuf
        };
        let size = u32::try_from(payload.len()).map_err(anyhow::Error::from)?;
        BlockHeader::new(size, decompressed_size, self.block_records).write_bytes(&mut self.inner)?;
        self.inner.write_all(payload)?;

        self.blocks_written += 1;
        self.block_records = 0;
        self.ubuf.clear();
        Ok(())
    }

    /// Writes the last partial block and flushes the inner writer
    pub fn finish(&mut self) -> Result<()> {
        self.flush_block()?;
        self.inner.flush()?;
        debug!(
            "Wrote {} records in {} blocks",
            self.records_written, self.blocks_written
        );
        Ok(())
    }
}
impl<W: Write> Drop for BlockWriter<W> {
    fn drop(&mut self) {
        if let Err(e) = self.finish() {
            warn!("BlockWriter: failed to finish writing: {e}");
        }
    }
}

fn append_record(ubuf: &mut Vec<u8>, flag: u64, words: &[u64]) -> Result<()> {
    ubuf.write_u64::<LittleEndian>(flag)?;
    words
        .iter()
        .try_for_each(|&word| ubuf.write_u64::<LittleEndian>(word))?;
    Ok(())
}

/// 2-bit encoder applying the invalid-nucleotide policy
struct SequenceEncoder {
    sbuffer: Vec<u64>,
    ibuf: Vec<u8>,
    policy: Policy,
    rng: SmallRng,
}
impl SequenceEncoder {
    fn with_policy(policy: Policy) -> Self {
        Self {
            sbuffer: Vec::default(),
            ibuf: Vec::default(),
            policy,
            rng: SmallRng::seed_from_u64(RNG_SEED),
        }
    }

    /// Returns `None` if the sequence is invalid and the policy skips it
    fn encode(&mut self, sequence: &[u8]) -> Result<Option<&[u64]>> {
        self.sbuffer.clear();
        if bitnuc::encode(sequence, &mut self.sbuffer).is_err() {
            self.sbuffer.clear();
            if !self.policy.handle(sequence, &mut self.ibuf, &mut self.rng)? {
                return Ok(None);
            }
            bitnuc::encode(&self.ibuf, &mut self.sbuffer)?;
        }
        Ok(Some(&self.sbuffer))
    }
}
