//! # Per-item Exponential Backoff
//!
//! Tracks how many times each work-queue key has failed and hands out the
//! delay before its next attempt. The delay doubles with every failure:
//! `base * 2^failures`, capped at `max`.
//!
//! With the default 5ms base the sequence of delays between successive
//! queuings of a key is:
//! 5ms, 10ms, 20ms, 40ms, 80ms, 160ms, 320ms, 640ms, 1.3s, 2.6s, 5.1s, 10.2s, 20.4s, 41s, 82s

use std::collections::HashMap;
use std::time::Duration;

/// Default delay before the first retry of a key.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(5);

/// Default cap on the delay between retries of a key.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(1000);

/// Exponential backoff calculator keyed by work-queue item.
///
/// Not synchronized; the owning queue guards it with its own lock.
#[derive(Debug, Clone)]
pub struct ItemExponentialBackoff {
    /// Delay for a key's first failure
    base: Duration,
    /// Upper bound for any single delay
    max: Duration,
    /// Failures recorded per key since it was last forgotten
    failures: HashMap<String, u32>,
}

impl ItemExponentialBackoff {
    /// Create a new backoff with the given base and maximum delay.
    #[must_use]
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            failures: HashMap::new(),
        }
    }

    /// Record a failure for `key` and return how long to wait before retrying it.
    pub fn when(&mut self, key: &str) -> Duration {
        let failures = self.failures.entry(key.to_string()).or_insert(0);
        let delay = Self::calculate_for_failures(*failures, self.base, self.max);
        *failures = failures.saturating_add(1);
        delay
    }

    /// Number of failures recorded for `key` since it was last forgotten.
    #[must_use]
    pub fn num_requeues(&self, key: &str) -> u32 {
        self.failures.get(key).copied().unwrap_or(0)
    }

    /// Clear the failure history of `key`.
    pub fn forget(&mut self, key: &str) {
        self.failures.remove(key);
    }

    /// Calculate the delay for a key that has already failed `failures` times (stateless)
    ///
    /// Returns `base * 2^failures`, capped at `max`. Saturates to `max` instead
    /// of overflowing for large failure counts.
    #[must_use]
    pub fn calculate_for_failures(failures: u32, base: Duration, max: Duration) -> Duration {
        2u32.checked_pow(failures)
            .and_then(|factor| base.checked_mul(factor))
            .map_or(max, |delay| delay.min(max))
    }
}

impl Default for ItemExponentialBackoff {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY)
    }
}
