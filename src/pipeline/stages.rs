//! # Stage handlers
//!
//! The four handlers run on scheduler workers and never block. Each consumes one
//! resource kind, produces the next and submits the follow-on work:
//!
//! ```text
//! Read -> RawBlock -> Decompress -> DecompressedBlock -> (pending set) -> Parse
//!      -> RecordBuffer -> Validate (one item per fragment)
//! ```
//!
//! A handler that finds its output pool empty returns and is resumed by that
//! pool's release hook.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use log::{debug, trace};

use crate::error::{FormatError, Result, ValidationError};

use super::blocks::{DecompressedBlock, RawBlock, RecordBuffer, ValidationFragment, WorkItem};
use super::context::{PipelineContext, ValidationJob};

impl PipelineContext {
    /// Reads the next block from the source
    ///
    /// `seeded` is the block the driver acquired to start the pipeline.
    pub(crate) fn read(&self, seeded: Option<RawBlock>) -> Result<()> {
        let Some(mut block) = seeded.or_else(|| self.raw_blocks.try_acquire()) else {
            return self.pause_reader();
        };

        let outcome = {
            let mut reader = self.reader.lock();
            block.seq = reader.next_seq;
            let outcome = reader.source.read_chunk(&mut block);
            if outcome.is_ok() {
                reader.next_seq += 1;
            }
            outcome
        };
        let at_end = match outcome {
            Ok(at_end) => at_end,
            Err(error) => {
                self.raw_blocks.release(block)?;
                return Err(error);
            }
        };
        block.is_final = at_end;

        if !self.bump(|p| {
            p.stats.blocks_read += 1;
            p.input_exhausted |= at_end;
        }) {
            return self.raw_blocks.release(block);
        }
        trace!(
            "Read block {} ({} bytes{})",
            block.seq,
            block.payload.len(),
            if at_end { ", final" } else { "" }
        );
        if at_end {
            debug!("Input exhausted after {} blocks", block.seq + 1);
        }

        self.backlog.lock().push_back(block);
        self.dispatch_decompress()?;
        if !at_end {
            self.queue.submit(WorkItem::Read(None))?;
        }
        Ok(())
    }

    fn pause_reader(&self) -> Result<()> {
        trace!("Reader paused: no free raw blocks");
        self.read_pending.store(true, Ordering::SeqCst);

        // Partial batches must not wait for a reader that cannot run
        self.dispatch_decompress()?;

        // A raw block may have been released before the flag was visible
        if self.raw_blocks.free_count() > 0 {
            self.resume_reader()?;
        }
        Ok(())
    }

    /// Reschedules a paused reader; does nothing if the reader is not paused
    pub(crate) fn resume_reader(&self) -> Result<()> {
        if self.read_pending.swap(false, Ordering::SeqCst) {
            trace!("Reader resumed");
            self.queue.submit(WorkItem::Read(None))?;
        }
        Ok(())
    }

    /// Pairs queued raw blocks with free decompressed blocks and submits batches
    ///
    /// Pairing follows sequence order, so the next block the parser expects always
    /// gets an output block before any later one. A partial batch goes out when
    /// the final block is queued or the reader is paused.
    pub(crate) fn dispatch_decompress(&self) -> Result<()> {
        let batch_size = self.config.decompress_batch;
        loop {
            let batch = {
                let mut backlog = self.backlog.lock();
                let flush = backlog.len() >= batch_size
                    || backlog.back().is_some_and(RawBlock::is_final)
                    || self.read_pending.load(Ordering::SeqCst);
                if backlog.is_empty() || !flush {
                    return Ok(());
                }
                let mut batch = Vec::with_capacity(batch_size.min(backlog.len()));
                while batch.len() < batch_size && !backlog.is_empty() {
                    let Some(output) = self.decompressed_blocks.try_acquire() else {
                        break;
                    };
                    if let Some(raw) = backlog.pop_front() {
                        batch.push((raw, output));
                    }
                }
                batch
            };
            if batch.is_empty() {
                trace!("Decompression waiting for a free decompressed block");
                return Ok(());
            }
            self.queue.submit(WorkItem::Decompress(batch))?;
        }
    }

    pub(crate) fn decompress(&self, batch: Vec<(RawBlock, DecompressedBlock)>) -> Result<()> {
        for (raw, mut block) in batch {
            self.codec.decompress(&raw, block.data_mut())?;
            if block.data.len() != raw.decompressed_len {
                return Err(FormatError::DecompressedSize {
                    seq: raw.seq,
                    expected: raw.decompressed_len,
                    got: block.data.len(),
                }
                .into());
            }
            block.adopt(&raw);
            self.raw_blocks.release(raw)?;

            if !self.bump(|p| p.stats.blocks_decompressed += 1) {
                return self.decompressed_blocks.release(block);
            }
            trace!("Decompressed block {} ({} bytes)", block.seq, block.data.len());

            self.parse.lock().pending.insert(block.seq, block)?;
            self.schedule_parse()?;
        }
        Ok(())
    }

    /// Submits the next parse if none is in flight and both a block and a buffer are ready
    ///
    /// The stalled block goes before anything in the pending set. The buffer is the
    /// carried-over one if present, otherwise a freshly acquired one.
    pub(crate) fn schedule_parse(&self) -> Result<()> {
        let (block, buffer) = {
            let mut state = self.parse.lock();
            if state.active || !(state.stall.is_occupied() || state.pending.has_next()) {
                return Ok(());
            }
            let buffer = match state.carry.take() {
                Some(buffer) => buffer,
                None => {
                    let Some(mut buffer) = self.record_buffers.try_acquire() else {
                        trace!("Parser waiting for a free record buffer");
                        return Ok(());
                    };
                    buffer.set_id(state.next_buffer_id);
                    state.next_buffer_id += 1;
                    buffer
                }
            };
            let Some(block) = state.stall.take().or_else(|| state.pending.try_take_next()) else {
                state.carry = Some(buffer);
                return Ok(());
            };
            state.active = true;
            (block, buffer)
        };
        self.queue.submit(WorkItem::Parse(block, buffer))
    }

    pub(crate) fn parse(&self, mut block: DecompressedBlock, mut buffer: RecordBuffer) -> Result<()> {
        let progress = self.parser.parse_into(block.remaining(), &mut buffer)?;
        block.advance(progress.consumed, progress.records);
        if progress.consumed == 0 && !block.is_exhausted() && !buffer.is_full() {
            return Err(
                FormatError::PartialRecord(block.remaining().len(), buffer.record_bytes()).into(),
            );
        }

        let exhausted = block.is_exhausted();
        if exhausted {
            if let Some(expected) = block.expected_records {
                if expected != block.parsed_records {
                    return Err(FormatError::RecordCount {
                        seq: block.seq,
                        expected,
                        got: block.parsed_records,
                    }
                    .into());
                }
            }
            if block.is_final {
                buffer.mark_final();
            }
        }
        if !self.bump(|p| p.stats.records_parsed += progress.records) {
            return Ok(());
        }
        let finished = buffer.is_full() || buffer.is_final();

        let leftover = if exhausted {
            self.decompressed_blocks.release(block)?;
            None
        } else {
            Some(block)
        };
        let ready = {
            let mut state = self.parse.lock();
            if let Some(block) = leftover {
                trace!("Block {} stalled at byte {}", block.seq, block.cursor);
                state.stall.put(block)?;
            }
            state.active = false;
            if finished {
                Some(buffer)
            } else {
                state.carry = Some(buffer);
                None
            }
        };

        if let Some(buffer) = ready {
            self.fan_out(buffer)?;
        }
        self.schedule_parse()
    }

    /// Splits a finished buffer into validation fragments and submits them
    fn fan_out(&self, buffer: RecordBuffer) -> Result<()> {
        let is_final = buffer.is_final();
        if !self.bump(|p| {
            p.stats.buffers_parsed += 1;
            p.last_buffer_seen |= is_final;
        }) {
            return self.record_buffers.release(buffer);
        }
        debug!(
            "Record buffer {} ready: {} records{}",
            buffer.id(),
            buffer.len(),
            if is_final { " (final)" } else { "" }
        );

        let job = Arc::new(ValidationJob::new(buffer));
        for fragment in ValidationFragment::split(job, self.config.fragments_per_buffer) {
            self.queue.submit(WorkItem::Validate(fragment))?;
        }
        Ok(())
    }

    pub(crate) fn validate(&self, fragment: ValidationFragment) -> Result<()> {
        let ValidationFragment { low, high, job } = fragment;
        if let Some(record) = self.validator.first_invalid(&job.buffer, low..high) {
            debug!(
                "Invalid record {record} in buffer {} (fragment {low}..{high})",
                job.buffer.id()
            );
            job.record_failure(record);
        }
        if !self.bump(|p| p.stats.records_validated += high - low) {
            return Ok(());
        }
        self.tracker.add((high - low) as u64);

        // The last fragment of a buffer is the one that recovers it
        match Arc::into_inner(job) {
            Some(job) => self.finish_buffer(job),
            None => Ok(()),
        }
    }

    fn finish_buffer(&self, job: ValidationJob) -> Result<()> {
        let ValidationJob { buffer, failures } = job;
        let failures = failures.into_inner();
        let id = buffer.id();
        let is_final = buffer.is_final();
        self.record_buffers.release(buffer)?;

        if let Some(record) = failures.first_invalid {
            return Err(ValidationError {
                buffer: id,
                record,
                fragments: failures.fragments,
            }
            .into());
        }
        self.bump(|p| {
            p.stats.buffers_validated += 1;
            p.last_buffer_validated |= is_final;
        });
        trace!("Record buffer {id} validated");
        Ok(())
    }
}
