//! APK Evasion
//!
//! Black-box problem-space evasion attacks against APK malware classifiers:
//!
//! - **Candidate model**: feature categories, manipulations and manipulation sets ([`types`])
//! - **Caches**: persisted error-free manipulation sets and extracted features ([`cache`])
//! - **Attack engine**: space construction, error-free filtering, model probing and
//!   budgeted search ([`engine`])
//!
//! See [`engine::AttackOrchestrator`] for the per-artifact pipeline.

pub use evasion_cache as cache;
pub use evasion_core as engine;
pub use evasion_types as types;

pub use evasion_core::{AttackConfig, AttackOrchestrator, AttackRecord, Outcome};
