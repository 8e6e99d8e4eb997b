//! Manipulation-space search engine for black-box APK evasion.
//!
//! The pipeline for one detected artifact:
//!
//! 1. [`space`]: candidate manipulations from the artifact's own features
//!    (obfuscations) and a goodware-derived pool (injections)
//! 2. [`error_free`]: divide-and-conquer removal of candidates that break the rebuild
//! 3. [`probe`]: one query per category, disabling categories the model ignores
//! 4. [`search`]: budgeted random or mutation search for an evading vector
//!
//! [`attack`] wires the stages together per artifact. The external surfaces
//! (rebuild toolchain, classifier, feature extractor) sit behind the traits in
//! [`interfaces`]; [`builder`], [`oracle`] and [`extractor`] implement them by
//! shelling out to configured commands.

pub mod attack;
pub mod builder;
pub mod error_free;
pub mod errors;
pub mod extractor;
pub mod interfaces;
pub mod oracle;
pub mod pool;
pub mod probe;
pub mod process;
pub mod results_log;
pub mod search;
pub mod space;

pub use attack::{harvest_injection_pool, AttackConfig, AttackOrchestrator, AttackRecord, Outcome};
pub use builder::{ToolchainBuilder, ToolchainFactory};
pub use error_free::{ErrorFreeFilter, FilterOutcome};
pub use errors::{AttackError, BuildError, Disposition};
pub use extractor::CommandFeatureExtractor;
pub use interfaces::{ArtifactBuilder, BuilderFactory, FeatureExtractor, Label, Oracle, Verdict};
pub use oracle::CommandOracle;
pub use pool::WorkerPool;
pub use probe::{ModelProbe, ProbeReport, ProbeResult};
pub use results_log::ResultsLog;
pub use search::{Baseline, SearchConfig, SearchEngine, SearchReport, SearchState, StrategyKind};
pub use space::{ManipulationSpace, SealedSpace};
