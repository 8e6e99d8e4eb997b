//! Per-category model probing.
//!
//! Each category is probed in isolation with all of its candidates. A category
//! whose probe score equals the baseline score exactly is disabled. Joint
//! effects between categories are not detected.

use std::collections::BTreeMap;

use evasion_types::{FeatureCategory, ManipulationKind, ManipulationSet};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::errors::AttackError;
use crate::interfaces::{ArtifactBuilder, Oracle};
use crate::pool::WorkerPool;
use crate::space::ManipulationSpace;

/// What happened to one probed category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ProbeResult {
    /// The score moved; the category stays active.
    Sensitive { score: f64 },
    /// The score did not move; the category was disabled.
    Inert { score: f64 },
    /// The probe artifact could not be built; the category stays active.
    BuildFailed { reason: String },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProbeReport {
    /// Oracle queries issued by the probe.
    pub queries: u64,
    pub results: BTreeMap<FeatureCategory, ProbeResult>,
}

impl ProbeReport {
    pub fn disabled(&self) -> Vec<FeatureCategory> {
        self.results
            .iter()
            .filter(|(_, r)| matches!(r, ProbeResult::Inert { .. }))
            .map(|(c, _)| *c)
            .collect()
    }
}

pub struct ModelProbe<'a> {
    builder: &'a dyn ArtifactBuilder,
    oracle: &'a dyn Oracle,
    pool: &'a WorkerPool,
}

impl<'a> ModelProbe<'a> {
    pub fn new(builder: &'a dyn ArtifactBuilder, oracle: &'a dyn Oracle, pool: &'a WorkerPool) -> Self {
        Self {
            builder,
            oracle,
            pool,
        }
    }

    /// One probe set per category present in the space.
    ///
    /// A category present on both sides is probed with its obfuscations.
    pub fn probe_sets(space: &ManipulationSpace) -> Vec<(FeatureCategory, ManipulationSet)> {
        let all = space.all();
        let mut groups: BTreeMap<FeatureCategory, Vec<usize>> =
            all.indices_by_category(ManipulationKind::Inject);
        groups.extend(all.indices_by_category(ManipulationKind::Obfuscate));

        groups
            .into_iter()
            .filter_map(|(category, indices)| {
                all.candidates_of(&indices).ok().map(|set| (category, set))
            })
            .collect()
    }

    /// Probe every category and disable the inert ones.
    ///
    /// Probes run in parallel; disabling happens afterwards in category order,
    /// so the space has a single writer. Issued queries are added to `queries`
    /// even when a classification fails.
    pub fn run(
        &self,
        space: &mut ManipulationSpace,
        baseline_score: f64,
        queries: &mut u64,
    ) -> Result<ProbeReport, AttackError> {
        let sets = Self::probe_sets(space);
        let outcomes = self.pool.map(&sets, |attempt, (category, set)| {
            self.probe_one(*category, set, attempt, baseline_score)
        });

        let mut report = ProbeReport::default();
        let mut failure = None;
        for ((category, _), outcome) in sets.iter().zip(outcomes) {
            let result = match outcome {
                Ok(result) => result,
                Err(e) => {
                    report.queries += 1;
                    failure.get_or_insert(e);
                    continue;
                }
            };
            if !matches!(result, ProbeResult::BuildFailed { .. }) {
                report.queries += 1;
            }
            if matches!(result, ProbeResult::Inert { .. }) {
                space.disable_category(*category);
            }
            report.results.insert(*category, result);
        }
        *queries += report.queries;
        if let Some(e) = failure {
            return Err(e);
        }

        info!(
            queries = report.queries,
            disabled = ?report.disabled(),
            "model probing done"
        );
        Ok(report)
    }

    fn probe_one(
        &self,
        category: FeatureCategory,
        set: &ManipulationSet,
        attempt: usize,
        baseline_score: f64,
    ) -> Result<ProbeResult, AttackError> {
        let artifact = match self.builder.apply(set, attempt) {
            Ok(path) => path,
            Err(e) => {
                warn!(category = %category, error = %e, "probe build failed, keeping category");
                return Ok(ProbeResult::BuildFailed { reason: e.reason });
            }
        };

        let verdict = self.oracle.classify(&artifact);
        self.builder.discard(&artifact);
        let verdict = verdict.map_err(|e| AttackError::Oracle {
            artifact: artifact.clone(),
            reason: format!("{:#}", e),
        })?;

        debug!(category = %category, score = verdict.score, baseline = baseline_score, "probe");
        if verdict.score == baseline_score {
            Ok(ProbeResult::Inert { score: verdict.score })
        } else {
            Ok(ProbeResult::Sensitive { score: verdict.score })
        }
    }
}
