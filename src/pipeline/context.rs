//! # Shared pipeline state
//!
//! [`PipelineContext`] is the one object every stage handler calls back into. It
//! owns the three block/buffer pools, the reorder state in front of the parser and
//! the progress counters. Each piece has its own short-held lock:
//!
//! * pool and queue locks are leaves; nothing is called while they are held
//! * the parse lock and the decompression backlog lock may call `try_acquire`
//! * the progress lock only guards bookkeeping
//!
//! Releases (which may run pool hooks) and submissions always happen after the
//! caller's own locks are dropped.

use std::collections::VecDeque;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use log::{debug, info};
use parking_lot::{Condvar, Mutex};

use crate::codec::{BlockCodec, BlockSource, RecordParser, RecordValidator};
use crate::error::{Error, Result};
use crate::progress::ProgressTracker;

use super::blocks::{DecompressedBlock, RawBlock, RecordBuffer, WorkItem};
use super::config::PipelineConfig;
use super::pending::{OrderedPendingSet, StallSlot};
use super::pool::ResourcePool;
use super::scheduler::{Dispatch, WorkQueue};

/// Pipeline progress counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    pub blocks_read: usize,
    pub blocks_decompressed: usize,
    pub records_parsed: usize,
    pub records_validated: usize,
    pub buffers_parsed: usize,
    pub buffers_validated: usize,
}

#[derive(Debug, Default)]
pub(crate) struct Progress {
    pub(crate) stats: Stats,
    pub(crate) input_exhausted: bool,
    pub(crate) last_buffer_seen: bool,
    pub(crate) last_buffer_validated: bool,
    pub(crate) failed: bool,
}
impl Progress {
    pub(crate) fn is_done(&self) -> bool {
        self.input_exhausted
            && self.stats.blocks_read == self.stats.blocks_decompressed
            && self.stats.buffers_parsed == self.stats.buffers_validated
            && self.last_buffer_validated
    }
}

#[derive(Debug, Default)]
pub(crate) struct FailureSummary {
    /// Lowest invalid record index reported by any fragment
    pub(crate) first_invalid: Option<usize>,
    pub(crate) fragments: usize,
}

/// A finished record buffer shared by its validation fragments
#[derive(Debug)]
pub struct ValidationJob {
    pub(crate) buffer: RecordBuffer,
    pub(crate) failures: Mutex<FailureSummary>,
}
impl ValidationJob {
    pub(crate) fn new(buffer: RecordBuffer) -> Self {
        Self {
            buffer,
            failures: Mutex::new(FailureSummary::default()),
        }
    }

    pub(crate) fn record_failure(&self, record: usize) {
        let mut failures = self.failures.lock();
        failures.fragments += 1;
        failures.first_invalid = Some(failures.first_invalid.map_or(record, |r| r.min(record)));
    }
}

pub(crate) struct ReaderState {
    pub(crate) source: Box<dyn BlockSource>,
    pub(crate) next_seq: usize,
}

pub(crate) struct ParseState {
    pub(crate) pending: OrderedPendingSet<DecompressedBlock>,
    /// Block whose parse stopped because its record buffer filled up
    pub(crate) stall: StallSlot<DecompressedBlock>,
    /// Buffer that is neither full nor final, waiting for the next block
    pub(crate) carry: Option<RecordBuffer>,
    /// A parse work item is queued or running
    pub(crate) active: bool,
    pub(crate) next_buffer_id: usize,
}

/// State shared by all stage handlers of one pipeline run
pub struct PipelineContext {
    pub(crate) config: PipelineConfig,
    pub(crate) queue: Arc<WorkQueue<WorkItem>>,
    pub(crate) codec: Arc<dyn BlockCodec>,
    pub(crate) parser: Arc<dyn RecordParser>,
    pub(crate) validator: Arc<dyn RecordValidator>,

    pub(crate) reader: Mutex<ReaderState>,
    pub(crate) read_pending: AtomicBool,
    pub(crate) backlog: Mutex<VecDeque<RawBlock>>,
    pub(crate) parse: Mutex<ParseState>,

    pub(crate) raw_blocks: ResourcePool<RawBlock>,
    pub(crate) decompressed_blocks: ResourcePool<DecompressedBlock>,
    pub(crate) record_buffers: ResourcePool<RecordBuffer>,

    pub(crate) progress: Mutex<Progress>,
    pub(crate) completion: Condvar,
    pub(crate) tracker: ProgressTracker,
}
impl PipelineContext {
    pub(crate) fn new(
        config: PipelineConfig,
        queue: Arc<WorkQueue<WorkItem>>,
        source: Box<dyn BlockSource>,
        codec: Arc<dyn BlockCodec>,
        parser: Arc<dyn RecordParser>,
        validator: Arc<dyn RecordValidator>,
    ) -> Self {
        let record_words = parser.record_words();
        let buffer_records = config.buffer_records;
        Self {
            raw_blocks: ResourcePool::new("raw block", config.raw_blocks, RawBlock::default),
            decompressed_blocks: ResourcePool::new(
                "decompressed block",
                config.decompressed_blocks,
                DecompressedBlock::default,
            ),
            record_buffers: ResourcePool::new("record buffer", config.record_buffers, || {
                RecordBuffer::new(record_words, buffer_records)
            }),
            tracker: ProgressTracker::new("Validated records")
                .with_interval(config.progress_interval),
            reader: Mutex::new(ReaderState {
                source,
                next_seq: 0,
            }),
            read_pending: AtomicBool::new(false),
            backlog: Mutex::new(VecDeque::new()),
            parse: Mutex::new(ParseState {
                pending: OrderedPendingSet::new(),
                stall: StallSlot::new("decompressed block"),
                carry: None,
                active: false,
                next_buffer_id: 0,
            }),
            progress: Mutex::new(Progress::default()),
            completion: Condvar::new(),
            config,
            queue,
            codec,
            parser,
            validator,
        }
    }

    /// Snapshot of the counters
    pub fn stats(&self) -> Stats {
        self.progress.lock().stats
    }

    /// Applies `update` to the counters unless the pipeline has failed
    ///
    /// Returns false (and changes nothing) once a failure was recorded.
    pub(crate) fn bump(&self, update: impl FnOnce(&mut Progress)) -> bool {
        let mut progress = self.progress.lock();
        if progress.failed {
            return false;
        }
        update(&mut progress);
        if progress.is_done() {
            self.completion.notify_all();
        }
        true
    }

    /// Records a failure raised outside a handler (e.g. in a pool hook)
    pub(crate) fn fail(&self, error: Error) {
        self.mark_failed();
        self.queue.abort(error);
    }

    /// Returns true once a failure was recorded; counters no longer move after that
    pub fn is_failed(&self) -> bool {
        self.progress.lock().failed
    }

    fn mark_failed(&self) {
        let mut progress = self.progress.lock();
        progress.failed = true;
        self.completion.notify_all();
    }

    /// Blocks until the pipeline finished or failed; returns true on success
    pub(crate) fn wait(&self) -> bool {
        let mut progress = self.progress.lock();
        while !progress.failed && !progress.is_done() {
            self.completion.wait(&mut progress);
        }
        if !progress.failed {
            info!(
                "Pipeline complete: {} blocks, {} records in {} buffers",
                progress.stats.blocks_read,
                progress.stats.records_validated,
                progress.stats.buffers_validated
            );
        }
        !progress.failed
    }

    /// Routes an error raised inside a pool hook to [`Self::fail`]
    pub(crate) fn report(&self, result: Result<()>) {
        if let Err(error) = result {
            if !self.queue.is_failed() {
                self.fail(error);
            }
        }
    }
}
impl Dispatch<WorkItem> for PipelineContext {
    fn dispatch(&self, item: WorkItem, _queue: &WorkQueue<WorkItem>) -> Result<()> {
        match item {
            WorkItem::Read(seeded) => self.read(seeded),
            WorkItem::Decompress(batch) => self.decompress(batch),
            WorkItem::Parse(block, buffer) => self.parse(block, buffer),
            WorkItem::Validate(fragment) => self.validate(fragment),
        }
    }

    fn on_failure(&self, error: &Error) {
        debug!("Stopping pipeline after failure: {error}");
        self.mark_failed();
    }
}
