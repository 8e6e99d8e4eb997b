//! Shared query budget.

use std::sync::atomic::{AtomicU64, Ordering};

/// Query counter that can be consumed from several workers without overshoot.
#[derive(Debug)]
pub struct QueryBudget {
    limit: u64,
    consumed: AtomicU64,
}

impl QueryBudget {
    pub fn new(limit: u64) -> Self {
        Self {
            limit,
            consumed: AtomicU64::new(0),
        }
    }

    /// Reserve one query. Returns `false` once the limit is reached.
    pub fn try_consume(&self) -> bool {
        self.consumed
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                (used < self.limit).then_some(used + 1)
            })
            .is_ok()
    }

    pub fn consumed(&self) -> u64 {
        self.consumed.load(Ordering::Acquire)
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    pub fn remaining(&self) -> u64 {
        self.limit.saturating_sub(self.consumed())
    }

    pub fn is_exhausted(&self) -> bool {
        self.consumed() >= self.limit
    }
}
