//! Retry schedules used by activity interrupt-retry and workflow suspend polling.

use std::time::Duration;

/// Exponential backoff with a delay ceiling and an optional retry cap.
///
/// `delay(n)` is the pause before retry `n` (0-based). `None` means the
/// schedule is exhausted.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrySchedule {
    base: Duration,
    factor: f64,
    max_delay: Duration,
    max_retries: Option<u32>,
}

impl RetrySchedule {
    pub fn exponential(base: Duration, factor: f64) -> Self {
        Self {
            base,
            factor,
            max_delay: Duration::MAX,
            max_retries: None,
        }
    }

    /// Constant spacing between retries.
    pub fn spaced(delay: Duration) -> Self {
        Self::exponential(delay, 1.0)
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Default policy for retrying interrupted activity bodies:
    /// 4ms x 1.5, at most 10s between attempts, 10 retries.
    pub fn interrupt_default() -> Self {
        Self::exponential(Duration::from_millis(4), 1.5)
            .with_max_delay(Duration::from_secs(10))
            .with_max_retries(10)
    }

    /// Default policy for re-polling a suspended execution: 200ms x 1.5,
    /// at most 30s between polls, unbounded.
    pub fn suspended_default() -> Self {
        Self::exponential(Duration::from_millis(200), 1.5).with_max_delay(Duration::from_secs(30))
    }

    pub fn max_retries(&self) -> Option<u32> {
        self.max_retries
    }

    pub fn delay(&self, retry: u32) -> Option<Duration> {
        if self.max_retries.is_some_and(|max| retry >= max) {
            return None;
        }
        let exponent = i32::try_from(retry).unwrap_or(i32::MAX);
        let nanos = self.base.as_nanos() as f64 * self.factor.powi(exponent);
        if nanos >= self.max_delay.as_nanos() as f64 {
            return Some(self.max_delay);
        }
        Some(Duration::from_nanos(nanos as u64))
    }
}
