//! In-memory stand-in for a paged data source.
//!
//! `SessionSource` hands every worker its own `SimulatedSession`;
//! `SimulatedPages` serves row-id ranges and can be told to fail.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use batch_runner::{Resource, ResourceFactory, UnitOfWork};
use serde::Serialize;
use tracing::debug;

/// A per-worker session. Counts the pages it served.
#[derive(Debug)]
pub struct SimulatedSession {
    pub id: usize,
    pages_served: u64,
}

impl Resource for SimulatedSession {
    fn close(&mut self) -> eyre::Result<()> {
        debug!(
            session_id = self.id,
            pages = self.pages_served,
            "Closing simulated session"
        );
        Ok(())
    }
}

/// Opens numbered sessions
#[derive(Debug, Default)]
pub struct SessionSource {
    next_id: AtomicUsize,
}

impl SessionSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn opened(&self) -> usize {
        self.next_id.load(Ordering::SeqCst)
    }
}

impl ResourceFactory for SessionSource {
    type Resource = SimulatedSession;

    fn create(&self) -> eyre::Result<SimulatedSession> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        debug!(session_id = id, "Opened simulated session");
        Ok(SimulatedSession {
            id,
            pages_served: 0,
        })
    }
}

/// One page of generated rows
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RowRange {
    pub session_id: usize,
    pub offset: u64,
    /// First row id, inclusive
    pub first_id: u64,
    /// Last row id, exclusive
    pub end_id: u64,
    pub rows: u64,
}

/// Serves `[0, total_rows)` as row ids.
#[derive(Debug)]
pub struct SimulatedPages {
    total_rows: u64,
    fail_offsets: HashSet<u64>,
    flaky_attempts: u32,
    work_delay: Duration,
    attempts: Mutex<HashMap<u64, u32>>,
}

impl SimulatedPages {
    pub fn new(total_rows: u64) -> Self {
        Self {
            total_rows,
            fail_offsets: HashSet::new(),
            flaky_attempts: 0,
            work_delay: Duration::ZERO,
            attempts: Mutex::new(HashMap::new()),
        }
    }

    /// Fail these offsets on every attempt
    pub fn with_fail_offsets(mut self, offsets: impl IntoIterator<Item = u64>) -> Self {
        self.fail_offsets.extend(offsets);
        self
    }

    /// Fail the first `attempts` attempts of every page
    pub fn with_flaky_attempts(mut self, attempts: u32) -> Self {
        self.flaky_attempts = attempts;
        self
    }

    /// Block for `delay` on every attempt
    pub fn with_work_delay(mut self, delay: Duration) -> Self {
        self.work_delay = delay;
        self
    }

    fn record_attempt(&self, offset: u64) -> u32 {
        let mut attempts = self
            .attempts
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let count = attempts.entry(offset).or_insert(0);
        *count += 1;
        *count
    }
}

impl UnitOfWork<SimulatedSession, RowRange> for SimulatedPages {
    fn execute(
        &self,
        session: &mut SimulatedSession,
        limit: u64,
        offset: u64,
    ) -> eyre::Result<RowRange> {
        let attempt = self.record_attempt(offset);
        if !self.work_delay.is_zero() {
            std::thread::sleep(self.work_delay);
        }

        if self.fail_offsets.contains(&offset) {
            eyre::bail!("simulated failure reading page at offset {}", offset);
        }
        if attempt <= self.flaky_attempts {
            eyre::bail!(
                "simulated timeout on attempt {} at offset {}",
                attempt,
                offset
            );
        }

        let end_id = offset.saturating_add(limit).min(self.total_rows);
        session.pages_served += 1;
        Ok(RowRange {
            session_id: session.id,
            offset,
            first_id: offset,
            end_id,
            rows: end_id.saturating_sub(offset),
        })
    }
}
