//! Metrics for cache operations.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Cache operation metrics (thread-safe counters).
#[derive(Debug, Clone, Default)]
pub struct CacheMetrics {
    /// Records served from disk
    pub hits: Arc<AtomicU64>,
    /// Lookups with no record on disk
    pub misses: Arc<AtomicU64>,
    /// Records present but unreadable (treated as misses)
    pub corrupt: Arc<AtomicU64>,
    /// Records written
    pub writes: Arc<AtomicU64>,
}

impl CacheMetrics {
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_corrupt(&self) {
        self.corrupt.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_write(&self) {
        self.writes.fetch_add(1, Ordering::Relaxed);
    }

    /// Get a snapshot of current metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            corrupt: self.corrupt.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of metrics (for reporting).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub corrupt: u64,
    pub writes: u64,
}

impl MetricsSnapshot {
    pub fn lookups(&self) -> u64 {
        self.hits + self.misses + self.corrupt
    }

    pub fn hit_rate(&self) -> f64 {
        let total = self.lookups();
        if total == 0 {
            return 0.0;
        }
        self.hits as f64 / total as f64
    }
}
