//! Retry budget and optional backoff between attempts.

use std::time::Duration;

/// Attempts allowed per batch when nothing else is configured.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Delay applied between two attempts of the same batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backoff {
    /// Retry immediately
    #[default]
    None,
    /// `initial_delay_ms * 2^n`, capped at `max_delay_ms`
    Exponential {
        initial_delay_ms: u64,
        max_delay_ms: u64,
    },
}

impl Backoff {
    pub fn exponential(initial_delay_ms: u64, max_delay_ms: u64) -> Self {
        Backoff::Exponential {
            initial_delay_ms,
            max_delay_ms: max_delay_ms.max(initial_delay_ms),
        }
    }

    /// Delay to wait after the `failed_attempts`-th failure (1-based).
    pub fn delay(&self, failed_attempts: u32) -> Option<Duration> {
        match *self {
            Backoff::None => None,
            Backoff::Exponential {
                initial_delay_ms,
                max_delay_ms,
            } => {
                let exponent = failed_attempts.saturating_sub(1);
                let delay = initial_delay_ms
                    .saturating_mul(2u64.saturating_pow(exponent))
                    .min(max_delay_ms);
                (delay > 0).then(|| Duration::from_millis(delay))
            }
        }
    }
}

/// How many times a batch is attempted and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per batch. Zero means the batch fails without running.
    pub max_retries: u32,
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            backoff: Backoff::None,
        }
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Delay before the next attempt, or `None` if the budget is spent or no
    /// backoff is configured.
    pub fn delay_before_retry(&self, failed_attempts: u32) -> Option<Duration> {
        if failed_attempts >= self.max_retries {
            return None;
        }
        self.backoff.delay(failed_attempts)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RETRIES)
    }
}
