use crate::error::{ResourceError, Result};

/// Default number of records held by a single record buffer
pub const DEFAULT_BUFFER_RECORDS: usize = 4096;

/// Default number of raw blocks grouped into one decompression work item
pub const DEFAULT_DECOMPRESS_BATCH: usize = 4;

/// Default fraction of the raw block pool that must be free before a paused reader resumes
pub const DEFAULT_RESUME_FRACTION: f64 = 0.25;

/// Default number of validated records between progress log lines
pub const DEFAULT_PROGRESS_INTERVAL: u64 = 1_000_000;

/// Tuning parameters of the pipeline
///
/// Pool capacities of `0` are resolved to twice the worker count by
/// [`PipelineConfig::resolved`].
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Number of worker threads (0 = all available cores)
    pub threads: usize,
    /// Capacity of the raw block pool
    pub raw_blocks: usize,
    /// Capacity of the decompressed block pool
    pub decompressed_blocks: usize,
    /// Capacity of the record buffer pool
    pub record_buffers: usize,
    /// Number of records a record buffer holds
    pub buffer_records: usize,
    /// Number of raw blocks per decompression work item
    pub decompress_batch: usize,
    /// Maximum number of validation fragments per record buffer (0 = worker count)
    pub fragments_per_buffer: usize,
    /// Fraction of the raw block pool that must be free before a paused reader resumes
    pub resume_fraction: f64,
    /// Validated records between progress log lines (0 disables progress logging)
    pub progress_interval: u64,
}
impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            threads: 0,
            raw_blocks: 0,
            decompressed_blocks: 0,
            record_buffers: 0,
            buffer_records: DEFAULT_BUFFER_RECORDS,
            decompress_batch: DEFAULT_DECOMPRESS_BATCH,
            fragments_per_buffer: 0,
            resume_fraction: DEFAULT_RESUME_FRACTION,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
        }
    }
}
impl PipelineConfig {
    /// Returns a copy with every automatic (zero) setting replaced by a concrete value
    #[must_use]
    pub fn resolved(&self) -> Self {
        let threads = if self.threads == 0 {
            num_cpus::get()
        } else {
            self.threads
        };
        let or_default = |value: usize| if value == 0 { 2 * threads } else { value };
        Self {
            threads,
            raw_blocks: or_default(self.raw_blocks),
            decompressed_blocks: or_default(self.decompressed_blocks),
            record_buffers: or_default(self.record_buffers),
            fragments_per_buffer: if self.fragments_per_buffer == 0 {
                threads
            } else {
                self.fragments_per_buffer
            },
            ..self.clone()
        }
    }

    /// Free raw blocks required before a paused reader resumes
    ///
    /// This only gates the release hook. A reader that pauses while a raw block
    /// is already free resumes at once, whatever the threshold.
    #[must_use]
    #[allow(clippy::cast_precision_loss, clippy::cast_sign_loss)]
    pub fn resume_threshold(&self) -> usize {
        ((self.raw_blocks as f64 * self.resume_fraction) as usize).clamp(1, self.raw_blocks.max(1))
    }

    /// Checks that the pipeline can make progress with these settings
    pub fn validate(&self) -> Result<()> {
        if self.buffer_records == 0 {
            return Err(invalid("buffer_records must be greater than zero"));
        }
        if self.decompress_batch == 0 {
            return Err(invalid("decompress_batch must be greater than zero"));
        }
        if !(self.resume_fraction > 0.0 && self.resume_fraction <= 1.0) {
            return Err(invalid("resume_fraction must be in (0, 1]"));
        }
        Ok(())
    }
}

fn invalid(msg: &str) -> crate::Error {
    ResourceError::InvalidConfig(msg.to_string()).into()
}

/// A builder for [`PipelineConfig`]
///
/// # Examples
///
/// ```rust
/// use bqpipe::PipelineConfigBuilder;
///
/// let config = PipelineConfigBuilder::default()
///     .threads(4)
///     .record_buffers(2)
///     .buffer_records(1024)
///     .build()
///     .unwrap();
/// assert_eq!(config.record_buffers, 2);
/// assert_eq!(config.raw_blocks, 8);
/// ```
#[derive(Default)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}
impl PipelineConfigBuilder {
    #[must_use]
    pub fn threads(mut self, threads: usize) -> Self {
        self.config.threads = threads;
        self
    }

    #[must_use]
    pub fn raw_blocks(mut self, capacity: usize) -> Self {
        self.config.raw_blocks = capacity;
        self
    }

    #[must_use]
    pub fn decompressed_blocks(mut self, capacity: usize) -> Self {
        self.config.decompressed_blocks = capacity;
        self
    }

    #[must_use]
    pub fn record_buffers(mut self, capacity: usize) -> Self {
        self.config.record_buffers = capacity;
        self
    }

    /// Sets every pool capacity at once
    #[must_use]
    pub fn pool_capacity(self, capacity: usize) -> Self {
        self.raw_blocks(capacity)
            .decompressed_blocks(capacity)
            .record_buffers(capacity)
    }

    #[must_use]
    pub fn buffer_records(mut self, records: usize) -> Self {
        self.config.buffer_records = records;
        self
    }

    #[must_use]
    pub fn decompress_batch(mut self, blocks: usize) -> Self {
        self.config.decompress_batch = blocks;
        self
    }

    #[must_use]
    pub fn fragments_per_buffer(mut self, fragments: usize) -> Self {
        self.config.fragments_per_buffer = fragments;
        self
    }

    #[must_use]
    pub fn resume_fraction(mut self, fraction: f64) -> Self {
        self.config.resume_fraction = fraction;
        self
    }

    #[must_use]
    pub fn progress_interval(mut self, interval: u64) -> Self {
        self.config.progress_interval = interval;
        self
    }

    /// Validates the settings and resolves automatic values
    pub fn build(self) -> Result<PipelineConfig> {
        self.config.validate()?;
        Ok(self.config.resolved())
    }
}

#[cfg(test)]
mod testing {
    use super::*;

    #[test]
    fn test_resolved_defaults() {
        let config = PipelineConfig {
            threads: 3,
            ..Default::default()
        }
        .resolved();
        assert_eq!(config.raw_blocks, 6);
        assert_eq!(config.decompressed_blocks, 6);
        assert_eq!(config.record_buffers, 6);
        assert_eq!(config.fragments_per_buffer, 3);
        assert!(PipelineConfig::default().resolved().threads >= 1);
    }

    #[test]
    fn test_resume_threshold() {
        let mut config = PipelineConfig {
            raw_blocks: 16,
            ..Default::default()
        };
        assert_eq!(config.resume_threshold(), 4);

        config.raw_blocks = 1;
        assert_eq!(config.resume_threshold(), 1);

        config.raw_blocks = 8;
        config.resume_fraction = 1.0;
        assert_eq!(config.resume_threshold(), 8);
    }

    #[test]
    fn test_builder_rejects_invalid_settings() {
        assert!(PipelineConfigBuilder::default()
            .buffer_records(0)
            .build()
            .is_err());
        assert!(PipelineConfigBuilder::default()
            .decompress_batch(0)
            .build()
            .is_err());
        assert!(PipelineConfigBuilder::default()
            .resume_fraction(0.0)
            .build()
            .is_err());
        assert!(PipelineConfigBuilder::default()
            .resume_fraction(1.5)
            .build()
            .is_err());
    }

    #[test]
    fn test_builder_pool_capacity() -> anyhow::Result<()> {
        let config = PipelineConfigBuilder::default()
            .threads(2)
            .pool_capacity(1)
            .build()?;
        assert_eq!(config.raw_blocks, 1);
        assert_eq!(config.decompressed_blocks, 1);
        assert_eq!(config.record_buffers, 1);
        Ok(())
    }
}
