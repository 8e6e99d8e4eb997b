//! Filesystem-backed caches for the apk-evasion attack pipeline.
//!
//! This crate provides:
//! - `FsErrorFreeStore`: validated (error-free) manipulation sets keyed by
//!   `(artifact identity, kind tag)`
//! - `FsFeatureStore`: extracted `category -> identifiers` feature maps keyed by
//!   artifact identity
//! - `CacheMetrics`: hit/miss/corrupt counters shared by both stores
//!
//! Absent or unreadable records are reported as [`Lookup::Miss`] or
//! [`Lookup::Corrupt`], never as errors, so callers can always fall back to
//! recomputing.

pub mod error_free;
pub mod features;
pub mod metrics;
pub mod paths;

pub use error_free::{ErrorFreeRecord, ErrorFreeStore, FsErrorFreeStore};
pub use features::{FeatureRecord, FsFeatureStore};
pub use metrics::{CacheMetrics, MetricsSnapshot};
pub use paths::artifact_identity;

/// Outcome of a cache read.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup<T> {
    /// A valid record was found.
    Hit(T),
    /// No record exists.
    Miss,
    /// A record exists but could not be read or decoded.
    Corrupt(String),
}

impl<T> Lookup<T> {
    /// The cached value, treating corrupt records as misses.
    pub fn hit(self) -> Option<T> {
        match self {
            Lookup::Hit(value) => Some(value),
            Lookup::Miss | Lookup::Corrupt(_) => None,
        }
    }
}
