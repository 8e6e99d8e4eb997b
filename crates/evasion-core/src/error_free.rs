//! Divide-and-conquer discovery of the manipulations that rebuild cleanly.
//!
//! The full set is built first. A failing group with more than one candidate
//! is split into `k = min(max(parallelism, 2), len)` interleaved partitions
//! (`idxs[i::k]`), so a single bad candidate poisons only one of them. The
//! recursion runs level by level: every group of one level is built as one
//! parallel batch on the worker pool, and the next level starts only after
//! the batch has joined. Accepted groups are merged in partition order.

use std::sync::atomic::{AtomicU64, Ordering};

use evasion_cache::{ErrorFreeStore, Lookup};
use evasion_types::ManipulationSet;
use tracing::{debug, info, warn};

use crate::errors::AttackError;
use crate::interfaces::ArtifactBuilder;
use crate::pool::WorkerPool;

/// Result of one filter run.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterOutcome {
    /// Maximal subset that rebuilt successfully.
    pub accepted: ManipulationSet,
    /// Validation builds issued (zero on a cache hit).
    pub builds: u64,
    /// Whether the result came from the error-free cache.
    pub cached: bool,
}

/// A group of input indices plus its position in the partition tree.
struct Group {
    path: Vec<usize>,
    indices: Vec<usize>,
}

pub struct ErrorFreeFilter<'a> {
    builder: &'a dyn ArtifactBuilder,
    pool: &'a WorkerPool,
    store: Option<&'a dyn ErrorFreeStore>,
    builds: AtomicU64,
}

impl<'a> ErrorFreeFilter<'a> {
    pub fn new(builder: &'a dyn ArtifactBuilder, pool: &'a WorkerPool) -> Self {
        Self {
            builder,
            pool,
            store: None,
            builds: AtomicU64::new(0),
        }
    }

    pub fn with_store(mut self, store: &'a dyn ErrorFreeStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Validation builds issued by this filter so far.
    pub fn builds(&self) -> u64 {
        self.builds.load(Ordering::Relaxed)
    }

    /// Maximal error-free subset of `set` for the artifact `identity`.
    pub fn filter(&self, identity: &str, set: &ManipulationSet) -> Result<FilterOutcome, AttackError> {
        if set.is_empty() {
            return Ok(FilterOutcome {
                accepted: ManipulationSet::empty(),
                builds: 0,
                cached: false,
            });
        }

        let tag = set.kind_tag();
        if let Some(store) = self.store {
            match store.load(identity, tag) {
                Lookup::Hit(accepted) => {
                    debug!(artifact = identity, tag = %tag, size = accepted.len(), "using cached error-free manipulations");
                    return Ok(FilterOutcome {
                        accepted,
                        builds: 0,
                        cached: true,
                    });
                }
                Lookup::Corrupt(reason) => {
                    warn!(artifact = identity, tag = %tag, reason = %reason, "corrupt error-free record, recomputing");
                }
                Lookup::Miss => {}
            }
        }

        let before = self.builds();
        let accepted = self.partition_search(set)?;
        let builds = self.builds() - before;

        info!(
            artifact = identity,
            tag = %tag,
            candidates = set.len(),
            accepted = accepted.len(),
            builds,
            "error-free filter done"
        );

        if let Some(store) = self.store {
            if let Err(e) = store.save(identity, tag, &accepted) {
                warn!(artifact = identity, error = %e, "failed to persist error-free manipulations");
            }
        }

        Ok(FilterOutcome {
            accepted,
            builds,
            cached: false,
        })
    }

    fn partition_search(&self, set: &ManipulationSet) -> Result<ManipulationSet, AttackError> {
        let k = self.pool.size();
        let mut accepted: Vec<Group> = Vec::new();
        let mut level = vec![Group {
            path: Vec::new(),
            indices: set.indices(),
        }];

        while !level.is_empty() {
            let results = self
                .pool
                .map(&level, |attempt, group| self.try_build(set, &group.indices, attempt));

            let mut next = Vec::new();
            for (group, result) in level.into_iter().zip(results) {
                if result? {
                    accepted.push(group);
                } else if group.indices.len() > 1 {
                    for (i, indices) in stride_partitions(&group.indices, k).into_iter().enumerate() {
                        let mut path = group.path.clone();
                        path.push(i);
                        next.push(Group { path, indices });
                    }
                } else {
                    debug!(index = group.indices[0], "dropping manipulation that breaks the rebuild");
                }
            }
            level = next;
        }

        // Lexicographic path order is the depth-first partition order.
        accepted.sort_by(|a, b| a.path.cmp(&b.path));
        let vector: Vec<usize> = accepted.into_iter().flat_map(|g| g.indices).collect();
        Ok(set.candidates_of(&vector)?)
    }

    fn try_build(&self, set: &ManipulationSet, indices: &[usize], attempt: usize) -> Result<bool, AttackError> {
        let subset = set.candidates_of(indices)?;
        self.builds.fetch_add(1, Ordering::Relaxed);
        match self.builder.validate(&subset, attempt) {
            Ok(()) => Ok(true),
            Err(e) => {
                debug!(attempt, size = indices.len(), error = %e, "validation build failed");
                Ok(false)
            }
        }
    }
}

/// Split `indices` into `min(k, len)` interleaved partitions.
///
/// At least two partitions are produced for groups of two or more, otherwise
/// a single worker would retry the same group forever.
pub fn stride_partitions(indices: &[usize], k: usize) -> Vec<Vec<usize>> {
    let n = k.max(2).min(indices.len()).max(1);
    (0..n)
        .map(|i| indices.iter().skip(i).step_by(n).copied().collect())
        .collect()
}
