//! Sync engine tuning knobs.

use crate::error::{Result, SyncError};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Records per push request.
    pub batch_size: usize,

    /// Failed attempts after which a record is dropped from the queue.
    pub max_retry_count: u32,

    /// Quiet period after the last local mutation before an immediate sync.
    pub debounce: Duration,

    /// Backstop interval for background round-trips.
    pub periodic_interval: Duration,

    /// Run the periodic backstop at all.
    pub background_sync: bool,

    /// First backoff delay after a failed round-trip; doubles per failure.
    pub backoff_base: Duration,

    pub backoff_max: Duration,

    /// Page size requested from the pull endpoint. Only the first page is
    /// fetched.
    pub pull_page_size: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            max_retry_count: 3,
            debounce: Duration::from_secs(2),
            periodic_interval: Duration::from_secs(30),
            background_sync: true,
            backoff_base: Duration::from_secs(60),
            backoff_max: Duration::from_secs(300),
            pull_page_size: 1000,
        }
    }
}

impl SyncConfig {
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(SyncError::Config("batch_size must be at least 1".into()));
        }
        if self.max_retry_count == 0 {
            return Err(SyncError::Config(
                "max_retry_count must be at least 1".into(),
            ));
        }
        if self.periodic_interval.is_zero() {
            return Err(SyncError::Config(
                "periodic_interval must be non-zero".into(),
            ));
        }
        if self.backoff_max < self.backoff_base {
            return Err(SyncError::Config(format!(
                "backoff_max ({:?}) is below backoff_base ({:?})",
                self.backoff_max, self.backoff_base
            )));
        }
        if self.pull_page_size == 0 {
            return Err(SyncError::Config("pull_page_size must be at least 1".into()));
        }
        Ok(())
    }
}
