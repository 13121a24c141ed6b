//! # Parallel block-processing pipeline
//!
//! Turns a stream of compressed blocks into validated fixed-size records on a fixed
//! pool of worker threads, with bounded memory:
//!
//! 1. **Read**: pull the next block frame into a pooled [`RawBlock`]
//! 2. **Decompress**: batches of raw blocks become pooled [`DecompressedBlock`]s
//! 3. **Parse**: blocks are consumed strictly in input order and decoded into
//!    pooled [`RecordBuffer`]s
//! 4. **Validate**: each finished buffer is fanned out into fragments checked in parallel
//!
//! Every block and buffer comes from a [`ResourcePool`]; a stage that finds its
//! output pool empty steps aside and is resumed by the pool's release hook.
//! The first error anywhere aborts the whole run.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::fs::File;
//! use std::sync::Arc;
//!
//! use bqpipe::{FrameReader, Pipeline, PipelineConfigBuilder, PackedRecordValidator, ZstdCodec};
//! use bqpipe::FixedRecordParser;
//!
//! let reader = FrameReader::new(File::open("reads.bqz").unwrap()).unwrap();
//! let header = reader.header();
//! let config = PipelineConfigBuilder::default().threads(4).build().unwrap();
//!
//! let pipeline = Pipeline::new(
//!     config,
//!     Arc::new(ZstdCodec::new(header.is_compressed(), 4).unwrap()),
//!     Arc::new(FixedRecordParser::new(header.record_words()).unwrap()),
//!     Arc::new(PackedRecordValidator::new(header.slen)),
//! );
//! let stats = pipeline.run(reader).unwrap();
//! println!("{} records validated", stats.records_validated);
//! ```

mod blocks;
mod config;
mod context;
mod pending;
mod pool;
mod scheduler;
mod stages;

pub use blocks::{DecompressedBlock, RawBlock, RecordBuffer, Stage, ValidationFragment, WorkItem};
pub use config::{
    PipelineConfig, PipelineConfigBuilder, DEFAULT_BUFFER_RECORDS, DEFAULT_DECOMPRESS_BATCH,
    DEFAULT_PROGRESS_INTERVAL, DEFAULT_RESUME_FRACTION,
};
pub use context::{PipelineContext, Stats, ValidationJob};
pub use pending::{OrderedPendingSet, StallSlot};
pub use pool::{ReleaseHook, ResourcePool, Reusable};
pub use scheduler::{Dispatch, Prioritized, WorkQueue, WorkScheduler};

use std::sync::{Arc, Weak};

use log::debug;

use crate::codec::{BlockCodec, BlockSource, RecordParser, RecordValidator};
use crate::error::{ResourceError, Result};

/// A configured pipeline, ready to run over a block source
pub struct Pipeline {
    config: PipelineConfig,
    codec: Arc<dyn BlockCodec>,
    parser: Arc<dyn RecordParser>,
    validator: Arc<dyn RecordValidator>,
}
impl Pipeline {
    pub fn new(
        config: PipelineConfig,
        codec: Arc<dyn BlockCodec>,
        parser: Arc<dyn RecordParser>,
        validator: Arc<dyn RecordValidator>,
    ) -> Self {
        Self {
            config,
            codec,
            parser,
            validator,
        }
    }

    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Starts the worker threads and begins reading from `source`
    ///
    /// Blocks only while acquiring the first raw block.
    pub fn start<S: BlockSource + 'static>(&self, source: S) -> Result<PipelineHandle> {
        self.config.validate()?;
        let config = self.config.resolved();
        let queue = Arc::new(WorkQueue::new());
        let context = Arc::new(PipelineContext::new(
            config.clone(),
            Arc::clone(&queue),
            Box::new(source),
            Arc::clone(&self.codec),
            Arc::clone(&self.parser),
            Arc::clone(&self.validator),
        ));
        install_hooks(&context);

        let mut scheduler = WorkScheduler::with_queue(queue, Arc::clone(&context));
        scheduler.start(config.threads)?;
        debug!(
            "Pipeline started: {} threads, pools {}/{}/{}, {} records per buffer",
            config.threads,
            config.raw_blocks,
            config.decompressed_blocks,
            config.record_buffers,
            config.buffer_records
        );

        let first = context.raw_blocks.acquire();
        scheduler.submit(WorkItem::Read(Some(first)))?;
        Ok(PipelineHandle { context, scheduler })
    }

    /// Runs the pipeline over `source` to completion
    pub fn run<S: BlockSource + 'static>(&self, source: S) -> Result<Stats> {
        self.start(source)?.wait_until_done()
    }
}

/// Wires the pool release hooks back into the stage handlers
///
/// Hooks hold a [`Weak`] reference so the pools do not keep their own context alive.
fn install_hooks(context: &Arc<PipelineContext>) {
    let weak = Arc::downgrade(context);
    context.raw_blocks.set_release_hook(
        context.config.resume_threshold(),
        hook(&weak, PipelineContext::resume_reader),
    );
    context
        .decompressed_blocks
        .set_release_hook(1, hook(&weak, PipelineContext::dispatch_decompress));
    context
        .record_buffers
        .set_release_hook(1, hook(&weak, PipelineContext::schedule_parse));
}

fn hook(weak: &Weak<PipelineContext>, callback: fn(&PipelineContext) -> Result<()>) -> ReleaseHook {
    let weak = Weak::clone(weak);
    Arc::new(move || {
        if let Some(context) = weak.upgrade() {
            context.report(callback(&context));
        }
    })
}

/// A running pipeline
pub struct PipelineHandle {
    context: Arc<PipelineContext>,
    scheduler: WorkScheduler<WorkItem, PipelineContext>,
}
impl PipelineHandle {
    /// Live snapshot of the progress counters
    #[must_use]
    pub fn stats(&self) -> Stats {
        self.context.stats()
    }

    /// Returns true once the pipeline recorded a failure
    ///
    /// From then on [`Self::stats`] no longer changes.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.context.is_failed()
    }

    /// Blocks until every block has been validated or the pipeline failed
    ///
    /// Shuts the worker threads down in both cases and returns the first error.
    pub fn wait_until_done(self) -> Result<Stats> {
        let (stats, outcome) = self.finish();
        outcome.map(|()| stats)
    }

    /// Like [`Self::wait_until_done`], but also returns the counters on failure
    ///
    /// Counters stop moving once a failure is recorded, so on error they show how
    /// far the pipeline got.
    pub fn finish(self) -> (Stats, Result<()>) {
        let succeeded = self.context.wait();
        let joined = self.scheduler.join();
        let stats = self.context.stats();
        let outcome = match joined {
            Err(error) => Err(error),
            Ok(()) if !succeeded => Err(ResourceError::SchedulerStopped.into()),
            Ok(()) => {
                self.context.tracker.log_final();
                Ok(())
            }
        };
        (stats, outcome)
    }
}
