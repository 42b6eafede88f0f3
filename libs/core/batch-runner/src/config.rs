//! Batch run configuration
//!
//! This module provides `BatchConfig`, built in code with the `with_*`
//! methods or loaded from `BATCH_*` environment variables.

use std::env;
use std::str::FromStr;

use crate::error::BatchError;
use crate::retry::{Backoff, DEFAULT_MAX_RETRIES, RetryPolicy};

pub const DEFAULT_BATCH_SIZE: u64 = 100;
pub const DEFAULT_NUM_WORKERS: usize = 4;
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;
pub const DEFAULT_JOB_NAME: &str = "batch";

/// Configuration for one batch run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchConfig {
    /// Name used in logs and metric labels
    pub job_name: String,

    /// Rows in the range to process
    pub total_rows: u64,

    /// Rows per unit of work
    pub batch_size: u64,

    /// Concurrent workers
    pub num_workers: usize,

    /// Attempts per unit and delay between them
    pub retry: RetryPolicy,

    /// Outcomes buffered between workers and the consumer
    pub channel_capacity: usize,
}

impl BatchConfig {
    /// Create a config for `total_rows` rows in windows of `batch_size`.
    pub fn new(total_rows: u64, batch_size: u64) -> Self {
        Self {
            job_name: DEFAULT_JOB_NAME.to_string(),
            total_rows,
            batch_size,
            num_workers: DEFAULT_NUM_WORKERS,
            retry: RetryPolicy::default(),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }

    /// Load from environment variables:
    /// - `BATCH_JOB_NAME` (default `batch`)
    /// - `BATCH_TOTAL_ROWS` (default 0)
    /// - `BATCH_SIZE` (default 100)
    /// - `BATCH_NUM_WORKERS` (default 4)
    /// - `BATCH_MAX_RETRIES` (default 3)
    /// - `BATCH_BACKOFF_INITIAL_MS` / `BATCH_BACKOFF_MAX_MS` (no backoff unless the
    ///   initial delay is set)
    /// - `BATCH_CHANNEL_CAPACITY` (default 256)
    ///
    /// The result is validated.
    pub fn from_env() -> Result<Self, BatchError> {
        let mut retry = RetryPolicy::new(parse_env("BATCH_MAX_RETRIES", DEFAULT_MAX_RETRIES)?);
        if let Some(initial) = parse_env_opt::<u64>("BATCH_BACKOFF_INITIAL_MS")? {
            let max = parse_env("BATCH_BACKOFF_MAX_MS", initial.saturating_mul(32))?;
            retry = retry.with_backoff(Backoff::exponential(initial, max));
        }

        let config = Self {
            job_name: env::var("BATCH_JOB_NAME").unwrap_or_else(|_| DEFAULT_JOB_NAME.to_string()),
            total_rows: parse_env("BATCH_TOTAL_ROWS", 0)?,
            batch_size: parse_env("BATCH_SIZE", DEFAULT_BATCH_SIZE)?,
            num_workers: parse_env("BATCH_NUM_WORKERS", DEFAULT_NUM_WORKERS)?,
            retry,
            channel_capacity: parse_env("BATCH_CHANNEL_CAPACITY", DEFAULT_CHANNEL_CAPACITY)?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Set the job name
    pub fn with_job_name(mut self, name: impl Into<String>) -> Self {
        self.job_name = name.into();
        self
    }

    /// Set the total row count
    pub fn with_total_rows(mut self, total_rows: u64) -> Self {
        self.total_rows = total_rows;
        self
    }

    /// Set the batch size
    pub fn with_batch_size(mut self, batch_size: u64) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Set the number of concurrent workers
    pub fn with_num_workers(mut self, num_workers: usize) -> Self {
        self.num_workers = num_workers;
        self
    }

    /// Set the attempts per unit
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.retry.max_retries = max_retries;
        self
    }

    /// Set the delay between attempts
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.retry.backoff = backoff;
        self
    }

    /// Set the outcome channel capacity
    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }

    /// Reject settings that cannot run.
    pub fn validate(&self) -> Result<(), BatchError> {
        if self.batch_size == 0 {
            return Err(BatchError::invalid("batch_size", "must be greater than zero"));
        }
        if self.num_workers == 0 {
            return Err(BatchError::invalid("num_workers", "must be greater than zero"));
        }
        if self.channel_capacity == 0 {
            return Err(BatchError::invalid(
                "channel_capacity",
                "must be greater than zero",
            ));
        }
        if self.job_name.trim().is_empty() {
            return Err(BatchError::invalid("job_name", "must not be empty"));
        }
        Ok(())
    }
}

fn parse_env_opt<T>(key: &str) -> Result<Option<T>, BatchError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| BatchError::invalid(key, format!("cannot parse '{}': {}", raw, e))),
        Err(_) => Ok(None),
    }
}

fn parse_env<T>(key: &str, default: T) -> Result<T, BatchError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    Ok(parse_env_opt(key)?.unwrap_or(default))
}
