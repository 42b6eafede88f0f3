//! Shared queue of pending work units.
//!
//! The queue is filled once before any worker starts and then only drained.
//! [`WorkQueue::try_pop`] is the single primitive workers use to decide
//! whether there is more work, so "check then pop" can never race.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::partition::WorkUnit;

/// Counters for the work queue
#[derive(Debug, Default)]
pub struct QueueStats {
    /// Units placed in the queue
    pub enqueued: AtomicU64,

    /// Units handed out to workers
    pub dequeued: AtomicU64,
}

impl QueueStats {
    pub fn enqueued(&self) -> u64 {
        self.enqueued.load(Ordering::Relaxed)
    }

    pub fn dequeued(&self) -> u64 {
        self.dequeued.load(Ordering::Relaxed)
    }
}

/// FIFO of units waiting for a worker
#[derive(Debug, Default)]
pub struct WorkQueue {
    units: Mutex<VecDeque<WorkUnit>>,
    stats: QueueStats,
}

impl WorkQueue {
    /// Create a queue holding `units` in order.
    pub fn new(units: impl IntoIterator<Item = WorkUnit>) -> Self {
        let units: VecDeque<WorkUnit> = units.into_iter().collect();
        let stats = QueueStats::default();
        stats
            .enqueued
            .store(units.len() as u64, Ordering::Relaxed);

        Self {
            units: Mutex::new(units),
            stats,
        }
    }

    /// Take the next unit, or `None` once the queue is drained.
    pub fn try_pop(&self) -> Option<WorkUnit> {
        let unit = self.lock().pop_front();
        if unit.is_some() {
            self.stats.dequeued.fetch_add(1, Ordering::Relaxed);
        }
        unit
    }

    /// Remove and return every unit no worker has taken.
    pub fn drain_remaining(&self) -> Vec<WorkUnit> {
        let remaining: Vec<WorkUnit> = self.lock().drain(..).collect();
        self.stats
            .dequeued
            .fetch_add(remaining.len() as u64, Ordering::Relaxed);
        remaining
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn stats(&self) -> &QueueStats {
        &self.stats
    }

    // A panic while holding the lock cannot leave the deque half-updated.
    fn lock(&self) -> MutexGuard<'_, VecDeque<WorkUnit>> {
        self.units.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
