//! Bounded pool of workers draining the work queue.
//!
//! Each worker acquires its own resource handle, pulls units with
//! [`WorkQueue::try_pop`] until the queue is empty, hands every unit to the
//! [`RetryingExecutor`] and sends the outcome down a channel to the single
//! consumer. When a worker retires it releases its handle; release errors
//! are logged and ignored.
//!
//! ```text
//!              ┌──────────┐
//!              │WorkQueue │  filled once, drained by try_pop
//!              └────┬─────┘
//!       ┌───────────┼───────────┐
//!       v           v           v
//!  ┌─────────┐ ┌─────────┐ ┌─────────┐
//!  │worker 0 │ │worker 1 │ │worker N │  one resource each
//!  └────┬────┘ └────┬────┘ └────┬────┘
//!       └───────────┼───────────┘
//!                   v
//!           mpsc<Outcome<T>>  ──> ResultStream
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{Instrument, debug, error, info, info_span};

use crate::error::BatchError;
use crate::executor::{RetryingExecutor, UnitOfWork};
use crate::metrics::BatchMetrics;
use crate::outcome::{FailedBatch, Outcome};
use crate::queue::WorkQueue;
use crate::resource::{ResourceFactory, WorkerResource};

/// What one worker did before retiring
#[derive(Debug, Clone, Default)]
struct WorkerReport {
    units_processed: u64,
    resource_acquired: bool,
    release_failed: bool,
    acquire_error: Option<String>,
}

/// Totals for one pool run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Workers spawned
    pub workers: usize,
    /// Workers that obtained a resource handle
    pub resources_acquired: usize,
    /// Handles whose release returned an error
    pub release_failures: usize,
    /// Units that went through the executor
    pub units_processed: u64,
    /// Units failed because no worker could take them
    pub units_unavailable: u64,
}

/// Fixed-size pool of concurrent workers
#[derive(Debug, Clone)]
pub struct WorkerPool {
    num_workers: usize,
    metrics: BatchMetrics,
}

impl WorkerPool {
    /// Create a pool. A size of zero is treated as one worker.
    pub fn new(num_workers: usize, metrics: BatchMetrics) -> Self {
        Self {
            num_workers: num_workers.max(1),
            metrics,
        }
    }

    pub fn num_workers(&self) -> usize {
        self.num_workers
    }

    /// Drain `queue`, sending one outcome per unit to `sender`.
    ///
    /// Spawns at most one worker per queued unit and returns once every
    /// worker has exited. Units no worker could take (every handle
    /// acquisition failed) are sent as failures, so the receiver always sees
    /// one outcome per unit unless it hangs up first.
    pub async fn run<F, U, T>(
        &self,
        queue: Arc<WorkQueue>,
        factory: Arc<F>,
        executor: Arc<RetryingExecutor<U>>,
        sender: mpsc::Sender<Outcome<T>>,
    ) -> PoolStats
    where
        F: ResourceFactory,
        U: UnitOfWork<F::Resource, T>,
        T: Send + 'static,
    {
        let workers = self.num_workers.min(queue.len());
        let active = Arc::new(AtomicUsize::new(0));
        let mut stats = PoolStats {
            workers,
            ..PoolStats::default()
        };

        info!(
            workers = workers,
            units = queue.len(),
            max_retries = executor.policy().max_retries,
            "Starting worker pool"
        );

        let mut join_set: JoinSet<WorkerReport> = JoinSet::new();
        for worker_id in 0..workers {
            let worker = Worker {
                id: worker_id,
                queue: Arc::clone(&queue),
                factory: Arc::clone(&factory),
                executor: Arc::clone(&executor),
                sender: sender.clone(),
                active: Arc::clone(&active),
                metrics: self.metrics.clone(),
            };
            join_set.spawn(
                worker
                    .run()
                    .instrument(info_span!("batch_worker", worker_id = worker_id)),
            );
        }

        let mut acquire_error: Option<String> = None;
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(report) => {
                    stats.units_processed += report.units_processed;
                    stats.resources_acquired += usize::from(report.resource_acquired);
                    stats.release_failures += usize::from(report.release_failed);
                    if report.acquire_error.is_some() {
                        acquire_error = report.acquire_error;
                    }
                }
                Err(e) => error!(error = %e, "Batch worker task failed"),
            }
        }

        let remaining = queue.drain_remaining();
        if sender.is_closed() {
            debug!(
                units = remaining.len(),
                "Outcome receiver dropped, discarding unattempted batches"
            );
        } else {
            let reason = acquire_error
                .unwrap_or_else(|| "no worker picked up the batch".to_string());
            let message = BatchError::ResourceUnavailable(reason).to_string();

            for unit in remaining {
                self.metrics.unit_failed();
                error!(offset = unit.offset, error = %message, "Batch was never attempted");

                stats.units_unavailable += 1;
                let failed = FailedBatch::new(unit, Some(message.clone()));
                if sender.send(Outcome::Failure(failed)).await.is_err() {
                    break;
                }
            }
        }

        info!(
            units_processed = stats.units_processed,
            units_unavailable = stats.units_unavailable,
            release_failures = stats.release_failures,
            "Worker pool finished"
        );
        stats
    }
}

struct Worker<F, U, T> {
    id: usize,
    queue: Arc<WorkQueue>,
    factory: Arc<F>,
    executor: Arc<RetryingExecutor<U>>,
    sender: mpsc::Sender<Outcome<T>>,
    active: Arc<AtomicUsize>,
    metrics: BatchMetrics,
}

impl<F, U, T> Worker<F, U, T>
where
    F: ResourceFactory,
    U: UnitOfWork<F::Resource, T>,
    T: Send + 'static,
{
    async fn run(self) -> WorkerReport {
        let mut report = WorkerReport::default();

        let factory = Arc::clone(&self.factory);
        let resource = match tokio::task::spawn_blocking(move || factory.create()).await {
            Ok(Ok(resource)) => WorkerResource::new(self.id, resource),
            Ok(Err(e)) => {
                error!(error = %e, "Failed to acquire worker resource, retiring");
                report.acquire_error = Some(format!("{:#}", e));
                return report;
            }
            Err(e) => {
                error!(error = %e, "Resource factory panicked, retiring");
                report.acquire_error = Some(format!("resource factory panicked: {}", e));
                return report;
            }
        };
        report.resource_acquired = true;

        let current = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.metrics.active_workers(current);
        debug!("Worker started");

        if let Some(handle) = resource.handle() {
            while let Some(unit) = self.queue.try_pop() {
                let outcome = self.executor.attempt(&handle, unit).await;
                report.units_processed += 1;

                if self.sender.send(outcome).await.is_err() {
                    debug!("Outcome receiver dropped, stopping worker");
                    break;
                }
            }
        }

        let released = tokio::task::spawn_blocking(move || resource.release())
            .await
            .unwrap_or(false);
        if !released {
            self.metrics.resource_release_failed();
            report.release_failed = true;
        }

        let current = self.active.fetch_sub(1, Ordering::SeqCst) - 1;
        self.metrics.active_workers(current);
        debug!(units = report.units_processed, "Worker retired");

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::partition::partition;
    use crate::resource::Resource;
    use crate::retry::RetryPolicy;
    use std::collections::HashSet;
    use std::sync::atomic::AtomicUsize;

    struct Session;

    impl Resource for Session {}

    fn echo_offset(_: &mut Session, _limit: u64, offset: u64) -> eyre::Result<u64> {
        Ok(offset)
    }

    fn session() -> eyre::Result<Session> {
        Ok(Session)
    }

    fn executor<U>(work: U, max_retries: u32) -> Arc<RetryingExecutor<U>> {
        Arc::new(RetryingExecutor::new(
            Arc::new(work),
            RetryPolicy::new(max_retries),
            BatchMetrics::new("pool_test"),
        ))
    }

    async fn drain<T>(mut receiver: mpsc::Receiver<Outcome<T>>) -> Vec<Outcome<T>> {
        let mut outcomes = Vec::new();
        while let Some(outcome) = receiver.recv().await {
            outcomes.push(outcome);
        }
        outcomes
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_every_unit_reported_once() {
        let queue = Arc::new(WorkQueue::new(partition(10_000, 7).unwrap()));
        let pool = WorkerPool::new(8, BatchMetrics::new("pool_test"));
        let (sender, receiver) = mpsc::channel(16);

        let collector = tokio::spawn(drain(receiver));
        let stats = pool
            .run(queue, Arc::new(session), executor(echo_offset, 3), sender)
            .await;
        let outcomes = collector.await.unwrap();

        let expected: HashSet<u64> = (0..10_000).step_by(7).collect();
        let seen: HashSet<u64> = outcomes
            .iter()
            .map(|o| *o.success().expect("all succeed"))
            .collect();
        assert_eq!(outcomes.len(), expected.len());
        assert_eq!(seen, expected);
        assert_eq!(stats.workers, 8);
        assert_eq!(stats.units_processed, expected.len() as u64);
        assert_eq!(stats.units_unavailable, 0);
    }

    #[tokio::test]
    async fn test_never_spawns_more_workers_than_units() {
        let created = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&created);
        let factory = move || -> eyre::Result<Session> {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Session)
        };

        let queue = Arc::new(WorkQueue::new(partition(30, 10).unwrap()));
        let pool = WorkerPool::new(10, BatchMetrics::new("pool_test"));
        let (sender, receiver) = mpsc::channel(16);

        let stats = pool
            .run(queue, Arc::new(factory), executor(echo_offset, 3), sender)
            .await;

        assert_eq!(stats.workers, 3);
        assert_eq!(created.load(Ordering::SeqCst), 3);
        assert_eq!(drain(receiver).await.len(), 3);
    }

    #[tokio::test]
    async fn test_empty_queue_spawns_no_workers() {
        let queue = Arc::new(WorkQueue::new(Vec::new()));
        let pool = WorkerPool::new(4, BatchMetrics::new("pool_test"));
        let (sender, receiver) = mpsc::channel::<Outcome<u64>>(1);

        let stats = pool
            .run(queue, Arc::new(session), executor(echo_offset, 3), sender)
            .await;

        assert_eq!(stats, PoolStats::default());
        assert!(drain(receiver).await.is_empty());
    }

    #[tokio::test]
    async fn test_failed_acquisition_reports_units_as_failures() {
        let factory = || -> eyre::Result<Session> { eyre::bail!("database is down") };

        let queue = Arc::new(WorkQueue::new(partition(50, 10).unwrap()));
        let pool = WorkerPool::new(2, BatchMetrics::new("pool_test"));
        let (sender, receiver) = mpsc::channel(16);

        let stats = pool
            .run(queue, Arc::new(factory), executor(echo_offset, 3), sender)
            .await;
        let outcomes = drain(receiver).await;

        assert_eq!(stats.resources_acquired, 0);
        assert_eq!(stats.units_unavailable, 5);
        assert_eq!(outcomes.len(), 5);
        for outcome in &outcomes {
            let failed = outcome.failure().unwrap();
            assert_eq!(failed.limit, 10);
            assert_eq!(
                failed.last_error.as_deref(),
                Some("Resource unavailable: database is down")
            );
        }
    }

    #[tokio::test]
    async fn test_worker_stops_when_receiver_dropped() {
        let queue = Arc::new(WorkQueue::new(partition(1_000, 1).unwrap()));
        let pool = WorkerPool::new(1, BatchMetrics::new("pool_test"));
        let (sender, receiver) = mpsc::channel(1);
        drop(receiver);

        let stats = pool
            .run(
                Arc::clone(&queue),
                Arc::new(session),
                executor(echo_offset, 3),
                sender,
            )
            .await;

        assert_eq!(stats.units_processed, 1);
        assert_eq!(stats.units_unavailable, 0);
        assert!(queue.is_empty());
    }
}
