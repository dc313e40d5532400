//! Exponential backoff between failed round-trips.

use crate::config::SyncConfig;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub max: Duration,
}

impl BackoffPolicy {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }

    /// Delay before the next attempt after `consecutive_failures` failed
    /// round-trips in a row: `base * 2^(n-1)`, capped at `max`.
    ///
    /// ```
    /// use core_sync::BackoffPolicy;
    /// use std::time::Duration;
    ///
    /// let policy = BackoffPolicy::new(Duration::from_secs(60), Duration::from_secs(300));
    /// assert_eq!(policy.delay_for(1), Duration::from_secs(60));
    /// assert_eq!(policy.delay_for(3), Duration::from_secs(240));
    /// assert_eq!(policy.delay_for(4), Duration::from_secs(300));
    /// ```
    pub fn delay_for(&self, consecutive_failures: u32) -> Duration {
        let exponent = consecutive_failures.saturating_sub(1).min(31);
        self.base
            .checked_mul(1u32 << exponent)
            .map_or(self.max, |delay| delay.min(self.max))
    }
}

impl From<&SyncConfig> for BackoffPolicy {
    fn from(config: &SyncConfig) -> Self {
        Self::new(config.backoff_base, config.backoff_max)
    }
}
