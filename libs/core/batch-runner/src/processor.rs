//! Public entry point tying the pieces together.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{Instrument, info, info_span};
use uuid::Uuid;

use crate::config::BatchConfig;
use crate::error::BatchError;
use crate::executor::{RetryingExecutor, UnitOfWork};
use crate::metrics::BatchMetrics;
use crate::outcome::BatchReport;
use crate::partition::partition;
use crate::pool::WorkerPool;
use crate::queue::WorkQueue;
use crate::resource::ResourceFactory;
use crate::stream::ResultStream;

/// Runs a row range through a bounded pool of workers.
///
/// `F` creates one resource handle per worker; `U` processes one batch with
/// that handle. See [`UnitOfWork`] and [`ResourceFactory`] for the contracts.
pub struct BatchProcessor<F, U> {
    factory: Arc<F>,
    work: Arc<U>,
}

impl<F, U> Clone for BatchProcessor<F, U> {
    fn clone(&self) -> Self {
        Self {
            factory: Arc::clone(&self.factory),
            work: Arc::clone(&self.work),
        }
    }
}

impl<F, U> BatchProcessor<F, U>
where
    F: ResourceFactory,
{
    pub fn new(factory: F, work: U) -> Self {
        Self {
            factory: Arc::new(factory),
            work: Arc::new(work),
        }
    }

    /// Process `total_rows` rows in windows of `batch_size` with
    /// `num_workers` workers, attempting each window up to `max_retries`
    /// times (see [`DEFAULT_MAX_RETRIES`](crate::DEFAULT_MAX_RETRIES)).
    pub async fn process_batches<T>(
        &self,
        total_rows: u64,
        batch_size: u64,
        num_workers: usize,
        max_retries: u32,
    ) -> Result<BatchReport<T>, BatchError>
    where
        U: UnitOfWork<F::Resource, T>,
        T: Send + 'static,
    {
        let config = BatchConfig::new(total_rows, batch_size)
            .with_num_workers(num_workers)
            .with_max_retries(max_retries);
        self.run(&config).await
    }

    /// Run the whole range and collect every outcome.
    pub async fn run<T>(&self, config: &BatchConfig) -> Result<BatchReport<T>, BatchError>
    where
        U: UnitOfWork<F::Resource, T>,
        T: Send + 'static,
    {
        let stream = self.stream_batches(config)?;
        Ok(stream.collect_report().await)
    }

    /// Start a run and return its outcomes as a stream.
    ///
    /// The configuration is validated before anything is spawned. Must be
    /// called from within a Tokio runtime.
    pub fn stream_batches<T>(&self, config: &BatchConfig) -> Result<ResultStream<T>, BatchError>
    where
        U: UnitOfWork<F::Resource, T>,
        T: Send + 'static,
    {
        config.validate()?;

        let units = partition(config.total_rows, config.batch_size)?;
        let total_units = units.len() as u64;
        let run_id = Uuid::now_v7();
        let metrics = BatchMetrics::new(config.job_name.clone());

        info!(
            run_id = %run_id,
            job = %config.job_name,
            total_rows = config.total_rows,
            batch_size = config.batch_size,
            units = total_units,
            num_workers = config.num_workers,
            max_retries = config.retry.max_retries,
            "Starting batch run"
        );

        let queue = Arc::new(WorkQueue::new(units));
        let executor = Arc::new(RetryingExecutor::new(
            Arc::clone(&self.work),
            config.retry,
            metrics.clone(),
        ));
        let pool = WorkerPool::new(config.num_workers, metrics);
        let (sender, receiver) = mpsc::channel(config.channel_capacity);

        let factory = Arc::clone(&self.factory);
        let span = info_span!("batch_run", run_id = %run_id, job = %config.job_name);
        let handle = tokio::spawn(
            async move { pool.run(queue, factory, executor, sender).await }.instrument(span),
        );

        Ok(ResultStream::new(
            run_id,
            config.job_name.clone(),
            total_units,
            ReceiverStream::new(receiver),
            handle,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::Resource;
    use futures::{Stream, StreamExt};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Session;

    impl Resource for Session {}

    fn session() -> eyre::Result<Session> {
        Ok(Session)
    }

    fn echo_offset(_: &mut Session, _limit: u64, offset: u64) -> eyre::Result<u64> {
        Ok(offset)
    }

    #[tokio::test]
    async fn test_invalid_config_fails_before_any_work() {
        let created = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&created);
        let factory = move || -> eyre::Result<Session> {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Session)
        };
        let processor = BatchProcessor::new(factory, echo_offset);

        let err = processor
            .process_batches::<u64>(1000, 0, 4, 3)
            .await
            .unwrap_err();
        assert!(err.is_configuration());

        let err = processor
            .process_batches::<u64>(1000, 100, 0, 3)
            .await
            .unwrap_err();
        assert!(err.is_configuration());
        assert_eq!(created.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_stream_yields_every_unit_then_ends() {
        let processor = BatchProcessor::new(session, echo_offset);
        let config = BatchConfig::new(95, 10).with_num_workers(3);

        let mut stream = processor.stream_batches::<u64>(&config).unwrap();
        assert_eq!(stream.total_units(), 10);
        assert_eq!(stream.size_hint(), (0, Some(10)));

        let mut offsets = Vec::new();
        while let Some(outcome) = stream.next().await {
            offsets.push(outcome.into_result().unwrap());
        }
        offsets.sort_unstable();

        assert_eq!(offsets, (0..95).step_by(10).collect::<Vec<u64>>());
        assert_eq!(stream.size_hint(), (0, Some(0)));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_report_carries_run_summary() {
        let processor = BatchProcessor::new(session, echo_offset);
        let config = BatchConfig::new(40, 10).with_job_name("summary_test");

        let stream = processor.stream_batches::<u64>(&config).unwrap();
        let run_id = stream.run_id();
        let report = stream.collect_report().await;

        let summary = report.summary();
        assert_eq!(summary.run_id, run_id);
        assert_eq!(summary.job, "summary_test");
        assert_eq!(summary.total_units, 4);
        assert_eq!(summary.succeeded, 4);
        assert_eq!(summary.failed, 0);
    }

    #[tokio::test]
    async fn test_finish_counts_unconsumed_outcomes() {
        let processor = BatchProcessor::new(session, |_: &mut Session, _limit: u64, offset: u64| {
            if offset >= 30 {
                eyre::bail!("offset {} out of range", offset);
            }
            Ok::<u64, eyre::Report>(offset)
        });
        let config = BatchConfig::new(50, 10).with_max_retries(1);

        let mut stream = processor.stream_batches::<u64>(&config).unwrap();
        assert!(stream.next().await.is_some());
        let summary = stream.finish().await;

        assert_eq!(summary.total_units, 5);
        assert_eq!(summary.succeeded, 3);
        assert_eq!(summary.failed, 2);
    }

    #[tokio::test]
    async fn test_outcome_pairs_match_entry_point_contract() {
        let processor = BatchProcessor::new(session, |_: &mut Session, limit: u64, offset: u64| {
            if offset == 10 {
                eyre::bail!("bad page");
            }
            Ok::<u64, eyre::Report>(limit)
        });

        let report = processor.process_batches::<u64>(30, 10, 2, 1).await.unwrap();
        let pairs = report.into_pairs();

        assert_eq!(pairs.len(), 3);
        for (success, failure) in pairs {
            assert!(success.is_some() ^ failure.is_some());
            if let Some(failure) = failure {
                assert_eq!((failure.limit, failure.offset), (10, 10));
            }
        }
    }
}
