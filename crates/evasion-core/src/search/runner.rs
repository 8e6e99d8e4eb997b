//! Budgeted search loop.
//!
//! Each round proposes up to `parallelism` vectors, builds and queries them on
//! the worker pool, then folds the results into the search state in proposal
//! order. Queries are reserved from a shared [`QueryBudget`] after a
//! successful build, so the budget is never exceeded. Once a round reaches a
//! terminal state the remaining results of that round are discarded.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use evasion_types::ManipulationSet;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace};

use crate::errors::{AttackError, BuildError};
use crate::interfaces::{ArtifactBuilder, Label, Oracle, Verdict};
use crate::pool::WorkerPool;
use crate::space::SealedSpace;

use super::budget::QueryBudget;
use super::report::{Baseline, SearchReport, SearchState};
use super::strategy::Strategy;

/// Configuration for a search run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Oracle queries allowed.
    pub query_budget: u64,
    /// Maximum manipulations per vector.
    pub n_features: usize,
    /// Consecutive non-improving iterations before stopping.
    pub stagnation: u64,
    /// Consecutive build failures before giving up.
    pub max_build_failures: u64,
    /// Iterations in flight per round.
    pub parallelism: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            query_budget: 100,
            n_features: 5,
            stagnation: 5,
            max_build_failures: 10,
            parallelism: 1,
        }
    }
}

/// Mutable state of one search, owned by the engine loop.
#[derive(Debug, Clone)]
struct SearchProgress {
    state: SearchState,
    iterations: u64,
    build_failures: u64,
    consecutive_build_failures: u64,
    stagnation_counter: u64,
    best_vector: Vec<usize>,
    best_label: Label,
    best_score: f64,
    best_path: PathBuf,
    reason: Option<String>,
}

impl SearchProgress {
    fn new(baseline: &Baseline) -> Self {
        Self {
            state: SearchState::Init,
            iterations: 0,
            build_failures: 0,
            consecutive_build_failures: 0,
            stagnation_counter: 0,
            best_vector: Vec::new(),
            best_label: baseline.label,
            best_score: baseline.score,
            best_path: baseline.path.clone(),
            reason: None,
        }
    }
}

/// Outcome of one in-flight iteration.
enum Iteration {
    /// Not run (search already stopping) or no budget left to query it.
    Skipped,
    BuildFailed(BuildError),
    Queried {
        vector: Vec<usize>,
        artifact: PathBuf,
        verdict: Verdict,
    },
}

pub struct SearchEngine<'a> {
    builder: &'a dyn ArtifactBuilder,
    oracle: &'a dyn Oracle,
    pool: &'a WorkerPool,
    config: SearchConfig,
}

impl<'a> SearchEngine<'a> {
    pub fn new(
        builder: &'a dyn ArtifactBuilder,
        oracle: &'a dyn Oracle,
        pool: &'a WorkerPool,
        config: SearchConfig,
    ) -> Self {
        Self {
            builder,
            oracle,
            pool,
            config,
        }
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    /// Search `space` for an evading manipulation vector.
    ///
    /// Returns the baseline unchanged when no iteration beat it. Oracle
    /// failures and contract violations abort the search. Every query issued,
    /// including the one that failed, is added to `queries` on both paths.
    pub fn run(
        &self,
        space: &SealedSpace,
        baseline: &Baseline,
        strategy: &mut dyn Strategy,
        queries: &mut u64,
    ) -> Result<SearchReport, AttackError> {
        let start = Instant::now();
        let budget = QueryBudget::new(self.config.query_budget);
        let mut progress = SearchProgress::new(baseline);

        let searched = self.search(space, baseline, strategy, &budget, &mut progress);
        *queries += budget.consumed();
        if let Err(e) = searched {
            if !progress.best_vector.is_empty() {
                self.builder.discard(&progress.best_path);
            }
            debug!(queries = budget.consumed(), error = %e, "search aborted");
            return Err(e);
        }

        let report = SearchReport {
            state: progress.state,
            strategy: strategy.name().to_string(),
            queries: budget.consumed(),
            iterations: progress.iterations,
            build_failures: progress.build_failures,
            best_vector: progress.best_vector,
            best_label: progress.best_label,
            best_score: progress.best_score,
            best_path: progress.best_path,
            reason: progress.reason,
            elapsed_ms: start.elapsed().as_millis() as u64,
        };
        info!(
            state = %report.state,
            queries = report.queries,
            iterations = report.iterations,
            score = report.best_score,
            "search finished"
        );
        Ok(report)
    }

    fn search(
        &self,
        space: &SealedSpace,
        baseline: &Baseline,
        strategy: &mut dyn Strategy,
        budget: &QueryBudget,
        progress: &mut SearchProgress,
    ) -> Result<(), AttackError> {
        let stop = AtomicBool::new(false);
        let active = space.active_indices();

        progress.state = SearchState::Searching;
        if active.is_empty() {
            progress.state = SearchState::Failed;
            progress.reason = Some("no active manipulations after probing".to_string());
        }

        while !progress.state.is_terminal() {
            if budget.is_exhausted() {
                progress.state = SearchState::BudgetExhausted;
                break;
            }

            // A benign verdict that was not adopted must not block later rounds.
            stop.store(false, Ordering::Release);
            let in_flight = self.config.parallelism.max(1).min(budget.remaining() as usize).max(1);
            let best = (!progress.best_vector.is_empty()).then(|| progress.best_vector.clone());
            let mut round = Vec::with_capacity(in_flight);
            for _ in 0..in_flight {
                let vector = strategy.propose(active, best.as_deref(), self.config.n_features);
                round.push(space.candidates_of(&vector).map(|set| (vector, set)));
            }
            let round: Vec<(Vec<usize>, ManipulationSet)> = round.into_iter().collect::<Result<_, _>>()?;

            let results = self.pool.map(&round, |attempt, (vector, set)| {
                self.evaluate(vector, set, attempt, budget, &stop)
            });

            let mut failure = None;
            for result in results {
                match result {
                    Ok(iteration) if failure.is_none() && !progress.state.is_terminal() => {
                        self.fold(progress, baseline, budget, iteration, &stop)
                    }
                    Ok(iteration) => self.discard_result(iteration),
                    Err(e) => {
                        failure.get_or_insert(e);
                    }
                }
            }
            if let Some(e) = failure {
                return Err(e);
            }
        }
        Ok(())
    }

    fn evaluate(
        &self,
        vector: &[usize],
        set: &ManipulationSet,
        attempt: usize,
        budget: &QueryBudget,
        stop: &AtomicBool,
    ) -> Result<Iteration, AttackError> {
        if stop.load(Ordering::Acquire) {
            return Ok(Iteration::Skipped);
        }
        let artifact = match self.builder.apply(set, attempt) {
            Ok(path) => path,
            Err(e) => return Ok(Iteration::BuildFailed(e)),
        };
        if stop.load(Ordering::Acquire) || !budget.try_consume() {
            self.builder.discard(&artifact);
            return Ok(Iteration::Skipped);
        }
        let verdict = match self.oracle.classify(&artifact) {
            Ok(verdict) => verdict,
            Err(e) => {
                stop.store(true, Ordering::Release);
                let reason = format!("{:#}", e);
                self.builder.discard(&artifact);
                return Err(AttackError::Oracle { artifact, reason });
            }
        };
        if verdict.label.is_benign() {
            stop.store(true, Ordering::Release);
        }
        Ok(Iteration::Queried {
            vector: vector.to_vec(),
            artifact,
            verdict,
        })
    }

    fn fold(
        &self,
        progress: &mut SearchProgress,
        baseline: &Baseline,
        budget: &QueryBudget,
        iteration: Iteration,
        stop: &AtomicBool,
    ) {
        match iteration {
            Iteration::Skipped => {}
            Iteration::BuildFailed(e) => {
                progress.iterations += 1;
                progress.build_failures += 1;
                progress.consecutive_build_failures += 1;
                progress.stagnation_counter += 1;
                debug!(error = %e, consecutive = progress.consecutive_build_failures, "iteration build failed");

                if progress.consecutive_build_failures >= self.config.max_build_failures {
                    progress.state = SearchState::Failed;
                    progress.reason = Some(format!(
                        "{} consecutive build failures (last: {})",
                        progress.consecutive_build_failures, e
                    ));
                } else if progress.stagnation_counter >= self.config.stagnation {
                    progress.state = SearchState::Stagnated;
                }
            }
            Iteration::Queried {
                vector,
                artifact,
                verdict,
            } => {
                progress.iterations += 1;
                progress.consecutive_build_failures = 0;
                let loss = verdict.loss();
                trace!(vector = ?vector, score = loss, label = %verdict.label, "iteration");

                // A benign verdict is adopted unless it is worse than the baseline.
                let improves = loss < progress.best_score
                    || (verdict.label.is_benign()
                        && !progress.best_label.is_benign()
                        && loss <= baseline.score);

                if improves {
                    let previous = std::mem::replace(&mut progress.best_path, artifact);
                    if !progress.best_vector.is_empty() {
                        self.builder.discard(&previous);
                    }
                    progress.best_vector = vector;
                    progress.best_label = verdict.label;
                    progress.best_score = loss;
                    progress.stagnation_counter = 0;
                    debug!(score = loss, budget = budget.consumed(), "new best");
                } else {
                    self.builder.discard(&artifact);
                    progress.stagnation_counter += 1;
                }

                if improves && verdict.label.is_benign() {
                    progress.state = SearchState::Evaded;
                } else if budget.consumed() >= budget.limit() {
                    progress.state = SearchState::BudgetExhausted;
                } else if progress.stagnation_counter >= self.config.stagnation {
                    progress.state = SearchState::Stagnated;
                }
            }
        }
        if progress.state.is_terminal() {
            stop.store(true, Ordering::Release);
        }
    }

    fn discard_result(&self, iteration: Iteration) {
        if let Iteration::Queried { artifact, .. } = iteration {
            self.builder.discard(&artifact);
        }
    }
}
