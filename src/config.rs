//! Configuration for the hinted-handoff service
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{HandoffError, Result};
use crate::queue::BLOCK_OVERHEAD;

/// Main configuration for a hinted-handoff service instance
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Storage roots. New queues are spread across them.
    /// Internal structure:
    ///   {dir}/
    ///     └── {cluster}/
    ///         └── {topic}/
    ///             ├── 1, 2, 3 ...   (segment files)
    ///             └── cursor.dmp    (committed read position)
    pub dirs: Vec<PathBuf>,

    /// Max size of one segment file before a new one is rolled (in bytes)
    pub max_segment_size: u64,

    /// Max total disk usage of one queue; `None` means unlimited
    pub max_queue_size: Option<u64>,

    /// Ceiling for a single key or value length when decoding
    pub max_block_size: u32,

    // -------------------------------------------------------------------------
    // Durability Configuration
    // -------------------------------------------------------------------------
    /// How appends reach the disk
    pub sync_strategy: SyncStrategy,

    /// Append a CRC32 of key+value to every block
    pub block_checksum: bool,

    /// Successful deliveries between two cursor checkpoints
    pub checkpoint_every: u64,

    // -------------------------------------------------------------------------
    // Housekeeping Configuration
    // -------------------------------------------------------------------------
    /// Period of the purge / checkpoint / flush sweep
    pub purge_interval: Duration,

    /// A consumed head segment must also be at least this old to be purged
    pub retention_min_age: Duration,

    // -------------------------------------------------------------------------
    // Delivery Configuration
    // -------------------------------------------------------------------------
    /// How long an idle pump sleeps before polling an empty queue again
    pub poll_interval: Duration,

    /// Backoff between failed publish attempts
    pub retry: RetryPolicy,

    /// Publish attempts per block in `flush_inflights` before giving up
    pub flush_max_attempts: u32,
}

/// Segment write strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStrategy {
    /// fsync after every append (safest, slowest)
    EveryWrite,

    /// Buffered writer; flushed before the tail is read, on housekeeping
    /// ticks and on close. A crash may lose the unflushed tail.
    Buffered,
}

/// Exponential backoff parameters for publish retries
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dirs: vec![PathBuf::from("./hh")],
            max_segment_size: 10 * 1024 * 1024, // 10 MB
            max_queue_size: None,
            max_block_size: 1024 * 1024, // 1 MB
            sync_strategy: SyncStrategy::EveryWrite,
            block_checksum: true,
            checkpoint_every: 100,
            purge_interval: Duration::from_secs(60),
            retention_min_age: Duration::ZERO,
            poll_interval: Duration::from_secs(1),
            retry: RetryPolicy::default(),
            flush_max_attempts: 5,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Check the invariants the queue relies on
    pub fn validate(&self) -> Result<()> {
        if self.dirs.is_empty() {
            return Err(HandoffError::Config("at least one storage dir required".into()));
        }
        if self.max_segment_size <= BLOCK_OVERHEAD {
            return Err(HandoffError::Config(format!(
                "max_segment_size must exceed {} bytes",
                BLOCK_OVERHEAD
            )));
        }
        if self.max_block_size == 0 {
            return Err(HandoffError::Config("max_block_size must be positive".into()));
        }
        if self.retry.initial_backoff > self.retry.max_backoff {
            return Err(HandoffError::Config(format!(
                "initial backoff {:?} exceeds max backoff {:?}",
                self.retry.initial_backoff, self.retry.max_backoff
            )));
        }
        if self.checkpoint_every == 0 {
            return Err(HandoffError::Config("checkpoint_every must be positive".into()));
        }
        if self.flush_max_attempts == 0 {
            return Err(HandoffError::Config("flush_max_attempts must be positive".into()));
        }
        Ok(())
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Use a single storage root
    pub fn dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.dirs = vec![path.into()];
        self
    }

    /// Set all storage roots
    pub fn dirs<I, P>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.config.dirs = paths.into_iter().map(Into::into).collect();
        self
    }

    /// Set the segment roll size (in bytes)
    pub fn max_segment_size(mut self, size: u64) -> Self {
        self.config.max_segment_size = size;
        self
    }

    /// Cap the total disk usage of each queue (in bytes)
    pub fn max_queue_size(mut self, size: u64) -> Self {
        self.config.max_queue_size = Some(size);
        self
    }

    /// Set the key/value decode ceiling (in bytes)
    pub fn max_block_size(mut self, size: u32) -> Self {
        self.config.max_block_size = size;
        self
    }

    pub fn sync_strategy(mut self, strategy: SyncStrategy) -> Self {
        self.config.sync_strategy = strategy;
        self
    }

    pub fn block_checksum(mut self, enabled: bool) -> Self {
        self.config.block_checksum = enabled;
        self
    }

    pub fn checkpoint_every(mut self, deliveries: u64) -> Self {
        self.config.checkpoint_every = deliveries;
        self
    }

    pub fn purge_interval(mut self, interval: Duration) -> Self {
        self.config.purge_interval = interval;
        self
    }

    pub fn retention_min_age(mut self, age: Duration) -> Self {
        self.config.retention_min_age = age;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    /// Set the publish retry backoff bounds
    pub fn retry(mut self, initial: Duration, max: Duration) -> Self {
        self.config.retry = RetryPolicy {
            initial_backoff: initial,
            max_backoff: max,
        };
        self
    }

    pub fn flush_max_attempts(mut self, attempts: u32) -> Self {
        self.config.flush_max_attempts = attempts;
        self
    }

    pub fn build(self) -> Result<Config> {
        self.config.validate()?;
        Ok(self.config)
    }
}
