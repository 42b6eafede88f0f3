//! Per-batch outcomes and the collected report of a run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::BatchError;
use crate::partition::WorkUnit;

/// Descriptor of a batch that exhausted its retry budget.
///
/// Carries enough to re-run the batch externally (`limit` + `offset`). The
/// message of the last error is kept when one was observed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedBatch {
    pub limit: u64,
    pub offset: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl FailedBatch {
    pub fn new(unit: WorkUnit, last_error: Option<String>) -> Self {
        Self {
            limit: unit.limit,
            offset: unit.offset,
            last_error,
        }
    }

    /// The unit to resubmit.
    pub fn unit(&self) -> WorkUnit {
        WorkUnit::new(self.offset, self.limit)
    }

    pub fn into_error(self) -> BatchError {
        BatchError::RetryExhausted {
            limit: self.limit,
            offset: self.offset,
            last_error: self.last_error,
        }
    }
}

impl From<FailedBatch> for BatchError {
    fn from(failed: FailedBatch) -> Self {
        failed.into_error()
    }
}

/// Result of processing one batch.
///
/// Serializes as `{"status": "success", "value": ...}` or
/// `{"status": "failure", "value": {"limit": .., "offset": ..}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum Outcome<T> {
    Success(T),
    Failure(FailedBatch),
}

impl<T> Outcome<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Outcome::Failure(_))
    }

    pub fn success(&self) -> Option<&T> {
        match self {
            Outcome::Success(value) => Some(value),
            Outcome::Failure(_) => None,
        }
    }

    pub fn failure(&self) -> Option<&FailedBatch> {
        match self {
            Outcome::Success(_) => None,
            Outcome::Failure(failed) => Some(failed),
        }
    }

    /// `(success, failure)` with exactly one side populated.
    pub fn into_pair(self) -> (Option<T>, Option<FailedBatch>) {
        match self {
            Outcome::Success(value) => (Some(value), None),
            Outcome::Failure(failed) => (None, Some(failed)),
        }
    }

    /// Turn a failure into [`BatchError::RetryExhausted`].
    pub fn into_result(self) -> Result<T, BatchError> {
        match self {
            Outcome::Success(value) => Ok(value),
            Outcome::Failure(failed) => Err(failed.into_error()),
        }
    }
}

/// Totals of a finished run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub job: String,
    /// Batches planned for the run, whether or not each one reported
    pub total_units: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

/// Every outcome of a run, in the order the workers produced them.
#[derive(Debug, Clone)]
pub struct BatchReport<T> {
    outcomes: Vec<Outcome<T>>,
    summary: RunSummary,
}

impl<T> BatchReport<T> {
    pub(crate) fn new(
        outcomes: Vec<Outcome<T>>,
        total_units: u64,
        run_id: Uuid,
        job: String,
        started_at: DateTime<Utc>,
        duration_ms: u64,
    ) -> Self {
        let failed = outcomes.iter().filter(|o| o.is_failure()).count() as u64;
        let summary = RunSummary {
            run_id,
            job,
            total_units,
            succeeded: outcomes.len() as u64 - failed,
            failed,
            started_at,
            duration_ms,
        };

        Self { outcomes, summary }
    }

    pub fn summary(&self) -> &RunSummary {
        &self.summary
    }

    pub fn outcomes(&self) -> &[Outcome<T>] {
        &self.outcomes
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn succeeded(&self) -> usize {
        self.summary.succeeded as usize
    }

    pub fn failed(&self) -> usize {
        self.summary.failed as usize
    }

    pub fn successes(&self) -> impl Iterator<Item = &T> {
        self.outcomes.iter().filter_map(Outcome::success)
    }

    pub fn failures(&self) -> impl Iterator<Item = &FailedBatch> {
        self.outcomes.iter().filter_map(Outcome::failure)
    }

    pub fn into_pairs(self) -> Vec<(Option<T>, Option<FailedBatch>)> {
        self.outcomes.into_iter().map(Outcome::into_pair).collect()
    }
}

impl<T> IntoIterator for BatchReport<T> {
    type Item = Outcome<T>;
    type IntoIter = std::vec::IntoIter<Outcome<T>>;

    fn into_iter(self) -> Self::IntoIter {
        self.outcomes.into_iter()
    }
}
