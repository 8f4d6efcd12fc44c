//! Retry policy: how many times a transient storage failure is retried, and how long to wait.

use std::time::Duration;

/// Retry policy for output uploads.
///
/// `max_attempts` counts the first try, so `1` means "no retry".
/// Delays grow exponentially: `base_delay * multiplier^(attempt - 1)`.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,

    /// Delay after the first failure.
    pub base_delay: Duration,

    pub multiplier: f64,
}

impl RetryPolicy {
    /// Single attempt. Storage failures surface immediately.
    pub fn no_retry() -> Self {
        Self::with_attempts(1)
    }

    /// `max_attempts` tries with a 500ms base delay, doubling.
    pub fn with_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: Duration::from_millis(500),
            multiplier: 2.0,
        }
    }

    /// Whether another attempt is allowed after `attempts` failed ones.
    pub fn should_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }

    /// Delay before the next try, given the number of attempts already made (1-indexed).
    ///
    /// Example with base_delay=500ms, multiplier=2.0:
    /// - after attempt 1: 500ms
    /// - after attempt 2: 1s
    /// - after attempt 3: 2s
    pub fn next_delay(&self, attempts: u32) -> Duration {
        let base_secs = self.base_delay.as_secs_f64();
        let delay_secs = base_secs * self.multiplier.powi(attempts.saturating_sub(1) as i32);
        Duration::from_secs_f64(delay_secs)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::no_retry()
    }
}
