/*!
 * Utility functions and helpers for regbridge.
 *
 * Timeouts, exponential backoff for busy re-checks and broker reconnects,
 * and millisecond conversions for configured budgets.
 */
use std::future::Future;
use std::time::Duration;

use tokio::time::timeout;

use crate::error::{Error, Result};

/// Run a future with a timeout
///
/// # Arguments
///
/// * `duration` - The timeout duration
/// * `future` - The future to run
///
/// # Returns
///
/// The result of the future, or a timeout error if the timeout is reached
pub async fn with_timeout<F, T>(duration: Duration, future: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match timeout(duration, future).await {
        Ok(result) => result,
        Err(_) => Err(Error::timeout("Operation timed out")),
    }
}

/// Exponential backoff between retries
///
/// The delay for attempt `n` is `initial * multiplier^n`, capped at `max`.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    multiplier: f64,
    current: Duration,
    attempt: u32,
}

impl Backoff {
    /// Create a backoff with the given initial delay, cap and growth factor
    pub fn new(initial: Duration, max: Duration, multiplier: f64) -> Self {
        let multiplier = if multiplier.is_finite() && multiplier >= 1.0 {
            multiplier
        } else {
            1.0
        };
        let initial = initial.min(max);
        Self {
            initial,
            max,
            multiplier,
            current: initial,
            attempt: 0,
        }
    }

    /// Create a doubling backoff from millisecond settings
    pub fn from_millis(initial_ms: u64, max_ms: u64) -> Self {
        Self::new(
            Duration::from_millis(initial_ms),
            Duration::from_millis(max_ms),
            2.0,
        )
    }

    /// Delay to wait before the next attempt
    pub fn next_sleep(&mut self) -> Duration {
        let delay = self.current;
        self.attempt = self.attempt.saturating_add(1);
        let next_nanos = (self.current.as_nanos() as f64 * self.multiplier).round();
        self.current = if next_nanos >= self.max.as_nanos() as f64 {
            self.max
        } else {
            Duration::from_nanos(next_nanos as u64)
        };
        delay
    }

    /// Number of delays handed out since the last reset
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Start over from the initial delay
    pub fn reset(&mut self) {
        self.current = self.initial;
        self.attempt = 0;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::from_millis(1, 50)
    }
}

/// Convert a Duration to milliseconds
pub fn duration_to_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Convert milliseconds to a Duration
pub fn millis_to_duration(millis: u64) -> Duration {
    Duration::from_millis(millis)
}
