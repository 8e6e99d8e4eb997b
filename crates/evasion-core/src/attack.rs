//! Attack orchestration.
//!
//! For every detected artifact: manipulation space -> baseline rebuild ->
//! error-free filter -> model probe -> search. Every input artifact yields
//! exactly one [`AttackRecord`], falling back to the unattacked baseline when
//! the attack is abandoned.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{anyhow, Result};
use evasion_cache::{artifact_identity, ErrorFreeStore};
use evasion_types::env_utils::{env_bool, env_path, env_var, env_var_or};
use evasion_types::{Feature, ManipulationSet};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::error_free::ErrorFreeFilter;
use crate::errors::{AttackError, Disposition};
use crate::interfaces::{ArtifactBuilder, BuilderFactory, FeatureExtractor, Label, Oracle};
use crate::pool::WorkerPool;
use crate::probe::ModelProbe;
use crate::results_log::ResultsLog;
use crate::search::{Baseline, SearchConfig, SearchEngine, SearchReport, SearchState, StrategyKind};
use crate::space::ManipulationSpace;

/// Prefix of the temporary files left behind by the rebuild tool.
const TOOL_TEMP_PREFIX: &str = "APKTOOL";

/// Attack configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttackConfig {
    /// Oracle queries allowed to the search engine per artifact.
    pub query_budget: u64,
    /// Maximum manipulations per candidate vector.
    pub n_features: usize,
    /// Consecutive non-improving iterations before the search stops.
    pub stagnation: u64,
    /// Consecutive failed rebuilds before the search gives up.
    pub max_build_failures: u64,
    /// Worker pool size (concurrent builds).
    pub parallelism: usize,
    pub seed: u64,
    pub strategy: StrategyKind,
    /// Per-build timeout in seconds.
    pub build_timeout: Option<u64>,
    /// Root of the error-free and feature caches (`None` disables caching).
    pub cache_dir: Option<PathBuf>,
    /// Where manipulated artifacts are written.
    pub output_dir: PathBuf,
}

impl Default for AttackConfig {
    fn default() -> Self {
        Self {
            query_budget: 100,
            n_features: 5,
            stagnation: 5,
            max_build_failures: 10,
            parallelism: 1,
            seed: 0,
            strategy: StrategyKind::Random,
            build_timeout: None,
            cache_dir: None,
            output_dir: PathBuf::from("manipulated_apks"),
        }
    }
}

impl AttackConfig {
    /// Defaults overlaid with `APK_EVASION_*` environment variables.
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Overlay `APK_EVASION_*` environment variables on this configuration.
    pub fn with_env_overrides(mut self) -> Self {
        self.query_budget = env_var_or("APK_EVASION_QUERY_BUDGET", self.query_budget);
        self.n_features = env_var_or("APK_EVASION_N_FEATURES", self.n_features);
        self.stagnation = env_var_or("APK_EVASION_STAGNATION", self.stagnation);
        self.max_build_failures = env_var_or("APK_EVASION_MAX_BUILD_FAILURES", self.max_build_failures);
        self.parallelism = env_var_or("APK_EVASION_PARALLELISM", self.parallelism);
        self.seed = env_var_or("APK_EVASION_SEED", self.seed);
        self.strategy = env_var_or("APK_EVASION_STRATEGY", self.strategy);
        if let Some(v) = env_var("APK_EVASION_BUILD_TIMEOUT") {
            self.build_timeout = Some(v);
        }
        if let Some(v) = env_path("APK_EVASION_CACHE_DIR") {
            self.cache_dir = Some(v);
        }
        if env_bool("APK_EVASION_NO_CACHE") == Some(true) {
            self.cache_dir = None;
        }
        if let Some(v) = env_path("APK_EVASION_OUTPUT_DIR") {
            self.output_dir = v;
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.n_features == 0 {
            return Err(anyhow!("n_features must be at least 1"));
        }
        if self.parallelism == 0 {
            return Err(anyhow!("parallelism must be at least 1"));
        }
        Ok(())
    }

    pub fn search_config(&self) -> SearchConfig {
        SearchConfig {
            query_budget: self.query_budget,
            n_features: self.n_features,
            stagnation: self.stagnation,
            max_build_failures: self.max_build_failures,
            parallelism: self.parallelism,
        }
    }
}

/// Final status of one artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    SkippedBenign,
    Evaded,
    BudgetExhausted,
    Stagnated,
    Failed,
    EmptySpace,
    Unbuildable,
    OracleError,
    Error,
}

impl Outcome {
    fn from_state(state: SearchState) -> Self {
        match state {
            SearchState::Evaded => Outcome::Evaded,
            SearchState::BudgetExhausted => Outcome::BudgetExhausted,
            SearchState::Stagnated => Outcome::Stagnated,
            SearchState::Failed => Outcome::Failed,
            SearchState::Init | SearchState::Searching => Outcome::Error,
        }
    }

    fn from_error(err: &AttackError) -> Self {
        match err {
            AttackError::EmptySpace => Outcome::EmptySpace,
            AttackError::UnbuildableArtifact { .. } => Outcome::Unbuildable,
            AttackError::Oracle { .. } => Outcome::OracleError,
            _ => Outcome::Error,
        }
    }
}

/// Result of attacking one artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttackRecord {
    pub artifact: PathBuf,
    pub pre_label: Option<Label>,
    pub pre_score: Option<f64>,
    pub final_label: Option<Label>,
    pub final_score: Option<f64>,
    pub final_path: PathBuf,
    pub outcome: Outcome,
    /// Oracle queries spent by the probe and the search.
    pub queries: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
    #[serde(default)]
    pub elapsed_ms: u64,
}

impl AttackRecord {
    /// Record that reports the artifact unchanged.
    pub fn baseline(artifact: PathBuf, label: Label, score: f64, outcome: Outcome) -> Self {
        Self {
            final_path: artifact.clone(),
            artifact,
            pre_label: Some(label),
            pre_score: Some(score),
            final_label: Some(label),
            final_score: Some(score),
            outcome,
            queries: 0,
            failure: None,
            elapsed_ms: 0,
        }
    }

    /// Record for an artifact that could not even be classified or analysed.
    pub fn unscored(artifact: PathBuf, outcome: Outcome, failure: String) -> Self {
        Self {
            final_path: artifact.clone(),
            artifact,
            pre_label: None,
            pre_score: None,
            final_label: None,
            final_score: None,
            outcome,
            queries: 0,
            failure: Some(failure),
            elapsed_ms: 0,
        }
    }

    pub fn evaded(&self) -> bool {
        self.outcome == Outcome::Evaded
    }
}

/// Extract every reference artifact and keep the distinct valid injections,
/// in first-seen order. Artifacts whose extraction fails are skipped.
pub fn harvest_injection_pool(extractor: &dyn FeatureExtractor, references: &[PathBuf]) -> Vec<Feature> {
    let mut seen = HashSet::new();
    let mut pool = Vec::new();
    for artifact in references {
        let features = match extractor.extract(artifact) {
            Ok(features) => features,
            Err(e) => {
                warn!(artifact = %artifact.display(), error = %format!("{:#}", e), "skipping reference artifact");
                continue;
            }
        };
        for raw in features {
            let Ok(feature) = raw.parse::<Feature>() else {
                continue;
            };
            if feature.is_valid_injection() && seen.insert(feature.clone()) {
                pool.push(feature);
            }
        }
    }
    pool
}

/// Remove the rebuild tool's leftovers from the system temp directory.
pub fn cleanup_tool_temp_files() -> usize {
    let Ok(entries) = std::fs::read_dir(std::env::temp_dir()) else {
        return 0;
    };
    let mut removed = 0;
    for entry in entries.flatten() {
        if !entry.file_name().to_string_lossy().starts_with(TOOL_TEMP_PREFIX) {
            continue;
        }
        let path = entry.path();
        let result = if path.is_dir() {
            std::fs::remove_dir_all(&path)
        } else {
            std::fs::remove_file(&path)
        };
        match result {
            Ok(()) => removed += 1,
            Err(e) => debug!(path = %path.display(), error = %e, "could not remove temp file"),
        }
    }
    removed
}

pub struct AttackOrchestrator {
    config: AttackConfig,
    extractor: Arc<dyn FeatureExtractor>,
    builders: Arc<dyn BuilderFactory>,
    oracle: Arc<dyn Oracle>,
    store: Option<Arc<dyn ErrorFreeStore>>,
    log: Option<Arc<ResultsLog>>,
    pool: WorkerPool,
}

impl AttackOrchestrator {
    pub fn new(
        config: AttackConfig,
        extractor: Arc<dyn FeatureExtractor>,
        builders: Arc<dyn BuilderFactory>,
        oracle: Arc<dyn Oracle>,
    ) -> Result<Self> {
        config.validate()?;
        let pool = WorkerPool::new(config.parallelism)?;
        Ok(Self {
            config,
            extractor,
            builders,
            oracle,
            store: None,
            log: None,
            pool,
        })
    }

    pub fn with_error_free_store(mut self, store: Arc<dyn ErrorFreeStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_results_log(mut self, log: Arc<ResultsLog>) -> Self {
        self.log = Some(log);
        self
    }

    pub fn config(&self) -> &AttackConfig {
        &self.config
    }

    /// Attack every malware artifact, using `goodware` as the injection source.
    pub fn run(&self, malware: &[PathBuf], goodware: &[PathBuf]) -> Vec<AttackRecord> {
        let pool = harvest_injection_pool(self.extractor.as_ref(), goodware);
        info!(references = goodware.len(), injections = pool.len(), "injection pool ready");

        malware
            .iter()
            .map(|artifact| {
                let record = self.attack(artifact, &pool);
                if let Some(log) = &self.log {
                    if let Err(e) = log.append(&record) {
                        warn!(error = %e, "failed to append results log");
                    }
                }
                let removed = cleanup_tool_temp_files();
                if removed > 0 {
                    debug!(removed, "removed rebuild tool temp files");
                }
                record
            })
            .collect()
    }

    /// Attack one artifact with a prepared injection pool.
    pub fn attack(&self, artifact: &Path, injection_pool: &[Feature]) -> AttackRecord {
        let start = Instant::now();
        let mut record = self.attack_inner(artifact, injection_pool);
        record.elapsed_ms = start.elapsed().as_millis() as u64;
        info!(
            artifact = %artifact.display(),
            outcome = ?record.outcome,
            queries = record.queries,
            score = ?record.final_score,
            "attack finished"
        );
        record
    }

    fn attack_inner(&self, artifact: &Path, injection_pool: &[Feature]) -> AttackRecord {
        let verdict = match self.oracle.classify(artifact) {
            Ok(verdict) => verdict,
            Err(e) => {
                warn!(artifact = %artifact.display(), error = %format!("{:#}", e), "initial classification failed");
                return AttackRecord::unscored(artifact.to_path_buf(), Outcome::OracleError, format!("{:#}", e));
            }
        };
        if verdict.label.is_benign() {
            debug!(artifact = %artifact.display(), score = verdict.score, "already benign, skipping");
            return AttackRecord::baseline(artifact.to_path_buf(), verdict.label, verdict.score, Outcome::SkippedBenign);
        }

        let own_features = match self.extractor.extract(artifact) {
            Ok(features) => features,
            Err(e) => {
                let mut record =
                    AttackRecord::baseline(artifact.to_path_buf(), verdict.label, verdict.score, Outcome::Error);
                record.failure = Some(format!("feature extraction failed: {:#}", e));
                return record;
            }
        };

        let baseline = Baseline {
            label: verdict.label,
            score: verdict.score,
            path: artifact.to_path_buf(),
        };
        let mut queries = 0;
        match self.attack_detected(artifact, &baseline, &own_features, injection_pool, &mut queries) {
            Ok(report) => AttackRecord {
                artifact: artifact.to_path_buf(),
                pre_label: Some(baseline.label),
                pre_score: Some(baseline.score),
                final_label: Some(report.best_label),
                final_score: Some(report.best_score),
                final_path: report.best_path,
                outcome: Outcome::from_state(report.state),
                queries,
                failure: report.reason,
                elapsed_ms: 0,
            },
            Err(e) => {
                match e.disposition() {
                    Disposition::Fatal => error!(artifact = %artifact.display(), error = %e, "contract violation"),
                    _ => warn!(artifact = %artifact.display(), error = %e, "attack abandoned"),
                }
                let mut record =
                    AttackRecord::baseline(artifact.to_path_buf(), baseline.label, baseline.score, Outcome::from_error(&e));
                record.queries = queries;
                record.failure = Some(e.to_string());
                record
            }
        }
    }

    fn attack_detected(
        &self,
        artifact: &Path,
        baseline: &Baseline,
        own_features: &[String],
        injection_pool: &[Feature],
        queries: &mut u64,
    ) -> Result<SearchReport, AttackError> {
        let space = ManipulationSpace::build(own_features, injection_pool)?;
        info!(
            artifact = %artifact.display(),
            inject = space.all().inject().len(),
            obfuscate = space.all().obfuscate().len(),
            "manipulation space built"
        );

        let builder = self
            .builders
            .open(artifact)
            .map_err(|e| AttackError::UnbuildableArtifact { reason: e.reason })?;
        let result = self.attack_with_builder(builder.as_ref(), artifact, baseline, space, queries);
        builder.clean_all();
        result
    }

    fn attack_with_builder(
        &self,
        builder: &dyn ArtifactBuilder,
        artifact: &Path,
        baseline: &Baseline,
        mut space: ManipulationSpace,
        queries: &mut u64,
    ) -> Result<SearchReport, AttackError> {
        ensure_baseline_build(builder)?;

        let identity = artifact_identity(artifact);
        let mut filter = ErrorFreeFilter::new(builder, &self.pool);
        if let Some(store) = &self.store {
            filter = filter.with_store(store.as_ref());
        }
        let injections = filter.filter(&identity, &space.all_injections())?;
        let obfuscations = filter.filter(&identity, &space.all_obfuscations())?;
        space.restrict_to(&ManipulationSet::combine(&injections.accepted, &obfuscations.accepted));
        if space.is_empty() {
            return Err(AttackError::EmptySpace);
        }

        ModelProbe::new(builder, self.oracle.as_ref(), &self.pool).run(&mut space, baseline.score, queries)?;

        let sealed = space.seal();
        let mut strategy = self.config.strategy.build(self.config.seed);
        let engine = SearchEngine::new(builder, self.oracle.as_ref(), &self.pool, self.config.search_config());
        engine.run(&sealed, baseline, strategy.as_mut(), queries)
    }
}

/// Rebuild the unmanipulated artifact, falling back to the degraded policy.
pub fn ensure_baseline_build(builder: &dyn ArtifactBuilder) -> Result<(), AttackError> {
    let empty = ManipulationSet::empty();
    let first = match builder.validate(&empty, 0) {
        Ok(()) => return Ok(()),
        Err(e) => e,
    };
    warn!(error = %first, "baseline rebuild failed, retrying with degraded policy");
    builder
        .degrade()
        .and_then(|()| builder.validate(&empty, 0))
        .map_err(|second| AttackError::UnbuildableArtifact {
            reason: format!("{}; degraded: {}", first, second),
        })
}
