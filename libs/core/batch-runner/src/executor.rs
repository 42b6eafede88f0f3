//! Running one batch with retries.
//!
//! This module provides:
//! - `UnitOfWork` trait for the caller's batch function
//! - `RetryingExecutor` which runs a batch until it succeeds or its retry
//!   budget is spent

use std::any::Any;
use std::sync::Arc;
use std::time::Instant;

use tokio::task::JoinError;
use tracing::{debug, error, warn};

use crate::metrics::BatchMetrics;
use crate::outcome::{FailedBatch, Outcome};
use crate::partition::WorkUnit;
use crate::resource::{Resource, SharedResource, lock_resource};
use crate::retry::RetryPolicy;

/// The caller's batch function.
///
/// Receives the worker's resource handle plus the batch window and returns
/// the batch payload. Any error fails the attempt. The function may block; it
/// always runs on the blocking thread pool. It can be invoked several times
/// for the same offset and must be safe to retry.
///
/// Implemented for every `Fn(&mut R, u64, u64) -> eyre::Result<T>`, where the
/// two integers are `limit` and `offset`:
///
/// ```rust,ignore
/// fn fetch_orders(session: &mut Session, limit: u64, offset: u64) -> eyre::Result<Vec<Order>> {
///     session.query("SELECT * FROM orders ORDER BY id LIMIT $1 OFFSET $2", limit, offset)
/// }
/// ```
pub trait UnitOfWork<R, T>: Send + Sync + 'static {
    fn execute(&self, resource: &mut R, limit: u64, offset: u64) -> eyre::Result<T>;
}

impl<F, R, T> UnitOfWork<R, T> for F
where
    F: Fn(&mut R, u64, u64) -> eyre::Result<T> + Send + Sync + 'static,
{
    fn execute(&self, resource: &mut R, limit: u64, offset: u64) -> eyre::Result<T> {
        self(resource, limit, offset)
    }
}

/// Runs single batches against a worker's resource, retrying on failure.
pub struct RetryingExecutor<U> {
    work: Arc<U>,
    policy: RetryPolicy,
    metrics: BatchMetrics,
}

impl<U> RetryingExecutor<U> {
    pub fn new(work: Arc<U>, policy: RetryPolicy, metrics: BatchMetrics) -> Self {
        Self {
            work,
            policy,
            metrics,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn metrics(&self) -> &BatchMetrics {
        &self.metrics
    }

    /// Attempt `unit` up to `max_retries` times.
    ///
    /// Returns on the first success. Once the budget is spent the outcome is
    /// a [`FailedBatch`] carrying the last error message. A budget of zero
    /// fails the unit without running it.
    pub async fn attempt<R, T>(&self, resource: &SharedResource<R>, unit: WorkUnit) -> Outcome<T>
    where
        R: Resource,
        U: UnitOfWork<R, T>,
        T: Send + 'static,
    {
        let max_retries = self.policy.max_retries;
        let started = Instant::now();
        let mut attempt: u32 = 0;
        let mut last_error: Option<String> = None;

        while attempt < max_retries {
            let work = Arc::clone(&self.work);
            let handle = Arc::clone(resource);

            let result = tokio::task::spawn_blocking(move || {
                let mut guard = lock_resource(&handle);
                work.execute(&mut *guard, unit.limit, unit.offset)
            })
            .await;

            let message = match result {
                Ok(Ok(value)) => {
                    if attempt > 0 {
                        debug!(
                            offset = unit.offset,
                            retries = attempt,
                            "Batch succeeded after retries"
                        );
                    }
                    self.metrics.unit_succeeded(started.elapsed());
                    return Outcome::Success(value);
                }
                Ok(Err(e)) => format!("{:#}", e),
                Err(join_error) => describe_join_error(join_error),
            };

            attempt += 1;
            self.metrics.attempt_failed();
            warn!(
                offset = unit.offset,
                end = unit.end(),
                attempt = attempt,
                max_retries = max_retries,
                error = %message,
                "Error in batch, retrying"
            );
            last_error = Some(message);

            if let Some(delay) = self.policy.delay_before_retry(attempt) {
                tokio::time::sleep(delay).await;
            }
        }

        self.metrics.unit_failed();
        error!(
            offset = unit.offset,
            limit = unit.limit,
            max_retries = max_retries,
            last_error = last_error.as_deref().unwrap_or("none"),
            "Batch exceeded max retry attempts"
        );
        Outcome::Failure(FailedBatch::new(unit, last_error))
    }
}

fn describe_join_error(join_error: JoinError) -> String {
    if join_error.is_panic() {
        format!(
            "unit of work panicked: {}",
            panic_message(join_error.into_panic())
        )
    } else {
        "unit of work was cancelled".to_string()
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
