//! Splitting a row range into fixed-size offset windows.

use serde::{Deserialize, Serialize};

use crate::error::BatchError;

/// One batch of work: `limit` rows starting at `offset`.
///
/// The last unit of a range may cover fewer real rows than `limit`. Units are
/// not clamped; the unit-of-work function is expected to stop at the end of
/// the data itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkUnit {
    pub offset: u64,
    pub limit: u64,
}

impl WorkUnit {
    pub fn new(offset: u64, limit: u64) -> Self {
        Self { offset, limit }
    }

    /// Exclusive end of the window (`offset + limit`), saturating.
    pub fn end(&self) -> u64 {
        self.offset.saturating_add(self.limit)
    }
}

/// Number of units needed to cover `total_rows` in windows of `batch_size`.
pub fn unit_count(total_rows: u64, batch_size: u64) -> Result<u64, BatchError> {
    if batch_size == 0 {
        return Err(BatchError::invalid(
            "batch_size",
            "must be greater than zero",
        ));
    }
    Ok(total_rows.div_ceil(batch_size))
}

/// Partition `[0, total_rows)` into units at offsets `0, batch_size, 2 * batch_size, ...`.
///
/// Returns an empty list when `total_rows` is zero and
/// [`BatchError::InvalidConfiguration`] when `batch_size` is zero.
pub fn partition(total_rows: u64, batch_size: u64) -> Result<Vec<WorkUnit>, BatchError> {
    let count = unit_count(total_rows, batch_size)?;
    let count = usize::try_from(count).map_err(|_| {
        BatchError::invalid("total_rows", "produces more batches than can be addressed")
    })?;

    let mut units = Vec::new();
    units.try_reserve_exact(count).map_err(|e| {
        BatchError::invalid("total_rows", format!("cannot hold {} batches: {}", count, e))
    })?;

    let mut offset = 0;
    while offset < total_rows {
        units.push(WorkUnit::new(offset, batch_size));
        offset = match offset.checked_add(batch_size) {
            Some(next) => next,
            None => break,
        };
    }

    Ok(units)
}
