//! Batch Runner
//!
//! Processes a row range in fixed-size offset batches with a bounded pool of
//! concurrent workers, retrying each batch independently.
//!
//! ## Features
//!
//! - **Partitioning**: `[0, total_rows)` split into `(offset, limit)` units
//! - **Bounded pool**: `num_workers` workers drain a shared queue, each unit
//!   handed out exactly once
//! - **Per-batch retries**: up to `max_retries` attempts, optional backoff
//! - **Per-worker resources**: one handle (e.g. a DB session) per worker,
//!   released exactly once, release errors ignored
//! - **Streaming results**: outcomes yielded as they complete, or collected
//!   into a `BatchReport`
//! - **Prometheus metrics**: built-in observability
//!
//! Failed batches are returned as data (`Outcome::Failure`) with enough
//! information to re-run them; they never abort the run.
//!
//! ## Example
//!
//! ```ignore
//! use batch_runner::{BatchConfig, BatchProcessor, Outcome};
//!
//! fn fetch_page(session: &mut Session, limit: u64, offset: u64) -> eyre::Result<Vec<Row>> {
//!     session.query_page(limit, offset)
//! }
//!
//! let processor = BatchProcessor::new(move || -> eyre::Result<Session> { Session::connect(&url) }, fetch_page);
//! let report = processor.process_batches(1000, 100, 5, 3).await?;
//!
//! for outcome in report {
//!     match outcome {
//!         Outcome::Success(rows) => handle(rows),
//!         Outcome::Failure(failed) => resubmit(failed.offset, failed.limit),
//!     }
//! }
//! ```

mod config;
mod error;
mod executor;
pub mod metrics;
mod outcome;
mod partition;
mod pool;
mod processor;
mod queue;
mod resource;
mod retry;
mod stream;

// Re-export main types
pub use config::{
    BatchConfig, DEFAULT_BATCH_SIZE, DEFAULT_CHANNEL_CAPACITY, DEFAULT_JOB_NAME,
    DEFAULT_NUM_WORKERS,
};
pub use error::BatchError;
pub use executor::{RetryingExecutor, UnitOfWork};
pub use metrics::{BatchMetrics, init_metrics, render_metrics};
pub use outcome::{BatchReport, FailedBatch, Outcome, RunSummary};
pub use partition::{WorkUnit, partition, unit_count};
pub use pool::{PoolStats, WorkerPool};
pub use processor::BatchProcessor;
pub use queue::{QueueStats, WorkQueue};
pub use resource::{Resource, ResourceFactory, SharedResource, WorkerResource, lock_resource};
pub use retry::{Backoff, DEFAULT_MAX_RETRIES, RetryPolicy};
pub use stream::ResultStream;
