//! Streaming access to outcomes while a run is in progress.

use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{info, warn};
use uuid::Uuid;

use crate::outcome::{BatchReport, Outcome, RunSummary};
use crate::pool::PoolStats;

/// Outcomes of a run, yielded as workers complete units.
///
/// Yields every unit exactly once, in completion order, then ends when the
/// pool has finished. Dropping the stream early makes the workers stop
/// taking new units; attempts already running are left to finish.
pub struct ResultStream<T> {
    run_id: Uuid,
    job: String,
    total_units: u64,
    yielded: u64,
    failed: u64,
    started_at: DateTime<Utc>,
    started: Instant,
    outcomes: ReceiverStream<Outcome<T>>,
    pool: JoinHandle<PoolStats>,
}

impl<T> ResultStream<T> {
    pub(crate) fn new(
        run_id: Uuid,
        job: String,
        total_units: u64,
        outcomes: ReceiverStream<Outcome<T>>,
        pool: JoinHandle<PoolStats>,
    ) -> Self {
        Self {
            run_id,
            job,
            total_units,
            yielded: 0,
            failed: 0,
            started_at: Utc::now(),
            started: Instant::now(),
            outcomes,
            pool,
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Number of units in the run
    pub fn total_units(&self) -> u64 {
        self.total_units
    }

    /// Drain the stream into a [`BatchReport`].
    pub async fn collect_report(mut self) -> BatchReport<T> {
        let mut outcomes = Vec::with_capacity(self.total_units.min(1 << 16) as usize);
        while let Some(outcome) = self.next().await {
            outcomes.push(outcome);
        }
        self.wait_for_pool().await;

        let duration_ms = self.started.elapsed().as_millis() as u64;
        BatchReport::new(
            outcomes,
            self.total_units,
            self.run_id,
            self.job,
            self.started_at,
            duration_ms,
        )
    }

    /// Wait for the run to end and summarize it.
    ///
    /// Outcomes not yet consumed are drained and counted but not returned.
    pub async fn finish(mut self) -> RunSummary {
        while self.next().await.is_some() {}
        self.wait_for_pool().await;

        RunSummary {
            run_id: self.run_id,
            job: self.job,
            total_units: self.total_units,
            succeeded: self.yielded - self.failed,
            failed: self.failed,
            started_at: self.started_at,
            duration_ms: self.started.elapsed().as_millis() as u64,
        }
    }

    async fn wait_for_pool(&mut self) {
        match (&mut self.pool).await {
            Ok(stats) => info!(
                run_id = %self.run_id,
                workers = stats.workers,
                release_failures = stats.release_failures,
                "Batch run complete"
            ),
            Err(e) => warn!(run_id = %self.run_id, error = %e, "Worker pool task failed"),
        }

        if self.yielded < self.total_units {
            warn!(
                run_id = %self.run_id,
                total_units = self.total_units,
                received = self.yielded,
                "Run ended without an outcome for every batch"
            );
        }
    }
}

// No field is structurally pinned.
impl<T> Unpin for ResultStream<T> {}

impl<T> Stream for ResultStream<T> {
    type Item = Outcome<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let polled = this.outcomes.poll_next_unpin(cx);
        if let Poll::Ready(Some(outcome)) = &polled {
            this.yielded += 1;
            this.failed += u64::from(outcome.is_failure());
        }
        polled
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.total_units.saturating_sub(self.yielded);
        (0, usize::try_from(remaining).ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outcome::FailedBatch;
    use crate::partition::WorkUnit;
    use tokio::sync::mpsc;

    fn stream_of(total_units: u64, outcomes: Vec<Outcome<u64>>) -> ResultStream<u64> {
        let (sender, receiver) = mpsc::channel(outcomes.len().max(1));
        for outcome in outcomes {
            sender.try_send(outcome).unwrap();
        }
        drop(sender);

        let pool = tokio::spawn(async { PoolStats::default() });
        ResultStream::new(
            Uuid::now_v7(),
            "stream_test".to_string(),
            total_units,
            ReceiverStream::new(receiver),
            pool,
        )
    }

    #[tokio::test]
    async fn test_finish_reports_planned_units_when_outcomes_are_missing() {
        let failed = FailedBatch::new(WorkUnit::new(10, 10), None);
        let stream = stream_of(3, vec![Outcome::Success(0), Outcome::Failure(failed)]);

        let summary = stream.finish().await;

        assert_eq!(summary.total_units, 3);
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.failed, 1);
    }

    #[tokio::test]
    async fn test_collect_report_reports_planned_units() {
        let report = stream_of(4, vec![Outcome::Success(0), Outcome::Success(10)])
            .collect_report()
            .await;

        assert_eq!(report.len(), 2);
        assert_eq!(report.summary().total_units, 4);
        assert_eq!(report.summary().succeeded, 2);
    }
}
