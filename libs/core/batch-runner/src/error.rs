//! Batch runner error types
//!
//! Only configuration problems are returned as `Err` from the runner itself.
//! Failures of individual batches are reported as data
//! ([`Outcome::Failure`](crate::Outcome)); [`BatchError::RetryExhausted`]
//! exists so callers can turn such a failure into an error when they want to.

use thiserror::Error;

/// Batch runner errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BatchError {
    /// Rejected before any work starts
    #[error("Invalid configuration for '{field}': {reason}")]
    InvalidConfiguration { field: String, reason: String },

    /// A batch used up its retry budget without succeeding
    #[error("Batch at offset {offset} (limit {limit}) exceeded max retry attempts{}", last_error_suffix(.last_error))]
    RetryExhausted {
        limit: u64,
        offset: u64,
        last_error: Option<String>,
    },

    /// No worker could obtain a resource handle to run the batch
    #[error("Resource unavailable: {0}")]
    ResourceUnavailable(String),
}

fn last_error_suffix(last_error: &Option<String>) -> String {
    match last_error {
        Some(message) => format!(": {}", message),
        None => String::new(),
    }
}

impl BatchError {
    /// Create a configuration error for the given field
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        BatchError::InvalidConfiguration {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Check if this error was raised by configuration validation
    pub fn is_configuration(&self) -> bool {
        matches!(self, BatchError::InvalidConfiguration { .. })
    }

    /// Check if this error reports an exhausted retry budget
    pub fn is_retry_exhausted(&self) -> bool {
        matches!(self, BatchError::RetryExhausted { .. })
    }
}
