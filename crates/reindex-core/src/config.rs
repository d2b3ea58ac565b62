//! Runner configuration.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::ReindexError;

/// Tuning knobs for a [`crate::Runner`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerConfig {
    /// Maximum number of units in flight (listing plus item tasks)
    pub pool_size: usize,

    /// Items read per poll of the ENQUEUED queue
    pub batch_size: usize,

    /// Sleep between dispatch rounds while listing is still running
    pub poll_interval: Duration,

    /// Sleep between checks while waiting for the pool to drain
    pub drain_interval: Duration,

    /// Processed-item interval for progress log lines
    pub progress_every: u64,

    /// Directory for listing spool files (system temp dir when unset)
    pub staging_dir: Option<PathBuf>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            pool_size: 4,
            batch_size: 100,
            poll_interval: Duration::from_secs(1),
            drain_interval: Duration::from_secs(1),
            progress_every: 1000,
            staging_dir: None,
        }
    }
}

impl RunnerConfig {
    pub fn with_pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_drain_interval(mut self, interval: Duration) -> Self {
        self.drain_interval = interval;
        self
    }

    pub fn with_progress_every(mut self, every: u64) -> Self {
        self.progress_every = every;
        self
    }

    pub fn with_staging_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.staging_dir = Some(dir.into());
        self
    }

    /// Reject settings the runner cannot work with.
    pub fn validate(&self) -> Result<(), ReindexError> {
        if self.pool_size == 0 {
            return Err(ReindexError::Config("pool_size must be at least 1".into()));
        }
        if self.batch_size == 0 {
            return Err(ReindexError::Config("batch_size must be at least 1".into()));
        }
        if self.poll_interval.is_zero() || self.drain_interval.is_zero() {
            return Err(ReindexError::Config(
                "poll and drain intervals must be non-zero".into(),
            ));
        }
        Ok(())
    }
}
