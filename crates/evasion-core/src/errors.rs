//! Failure taxonomy of a single-artifact attack.
//!
//! Per-iteration rebuild failures travel as [`BuildError`] and corrupt cache
//! records as `Lookup::Corrupt`; both are absorbed where they occur and never
//! become an [`AttackError`].

use std::fmt;
use std::path::PathBuf;

use evasion_types::{ManipulationError, ManipulationKind};

/// How the orchestrator must react to an [`AttackError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Stop attacking this artifact, report its baseline, continue with the next.
    AbandonArtifact,
    /// Programming-contract violation; never retried.
    Fatal,
}

/// Errors raised while attacking one artifact.
#[derive(Debug, Clone, PartialEq)]
pub enum AttackError {
    /// The artifact offers no usable manipulation.
    EmptySpace,

    /// The unmanipulated artifact cannot be rebuilt, even under the degraded policy.
    UnbuildableArtifact { reason: String },

    /// The classifier could not score an artifact.
    Oracle { artifact: PathBuf, reason: String },

    /// A manipulation vector addressed an index outside the space.
    IndexOutOfRange { index: usize, len: usize },

    /// A candidate whose category does not permit its kind.
    InvalidCandidate {
        feature: String,
        kind: ManipulationKind,
    },

    /// Any other candidate-model contract violation.
    Contract(ManipulationError),
}

impl AttackError {
    pub fn disposition(&self) -> Disposition {
        match self {
            AttackError::EmptySpace
            | AttackError::UnbuildableArtifact { .. }
            | AttackError::Oracle { .. } => Disposition::AbandonArtifact,
            AttackError::IndexOutOfRange { .. }
            | AttackError::InvalidCandidate { .. }
            | AttackError::Contract(_) => Disposition::Fatal,
        }
    }

    /// Short machine-readable name, used as the result-record outcome.
    pub fn kind_name(&self) -> &'static str {
        match self {
            AttackError::EmptySpace => "empty_space",
            AttackError::UnbuildableArtifact { .. } => "unbuildable",
            AttackError::Oracle { .. } => "oracle_error",
            AttackError::IndexOutOfRange { .. } => "index_out_of_range",
            AttackError::InvalidCandidate { .. } => "invalid_candidate",
            AttackError::Contract(_) => "contract_violation",
        }
    }
}

impl fmt::Display for AttackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttackError::EmptySpace => write!(f, "EMPTY_SPACE: no usable manipulation for this artifact"),
            AttackError::UnbuildableArtifact { reason } => {
                write!(f, "UNBUILDABLE: baseline rebuild failed under every policy: {}", reason)
            }
            AttackError::Oracle { artifact, reason } => {
                write!(f, "ORACLE_ERROR: could not classify {}: {}", artifact.display(), reason)
            }
            AttackError::IndexOutOfRange { index, len } => {
                write!(f, "INDEX_OUT_OF_RANGE: index {} not in [0, {})", index, len)
            }
            AttackError::InvalidCandidate { feature, kind } => {
                write!(f, "INVALID_CANDIDATE: {} cannot be used as {} candidate", feature, kind)
            }
            AttackError::Contract(err) => write!(f, "CONTRACT_VIOLATION: {}", err),
        }
    }
}

impl std::error::Error for AttackError {}

impl From<ManipulationError> for AttackError {
    fn from(err: ManipulationError) -> Self {
        match err {
            ManipulationError::IndexOutOfRange { index, len } => {
                AttackError::IndexOutOfRange { index, len }
            }
            ManipulationError::InvalidCandidate { feature, kind } => {
                AttackError::InvalidCandidate { feature, kind }
            }
            other => AttackError::Contract(other),
        }
    }
}

/// A failed rebuild (decode, transform, build, sign or align step).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildError {
    pub reason: String,
    pub timed_out: bool,
}

impl BuildError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            timed_out: false,
        }
    }

    pub fn timeout(step: &str, secs: u64) -> Self {
        Self {
            reason: format!("{} timed out after {}s", step, secs),
            timed_out: true,
        }
    }
}

impl fmt::Display for BuildError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.reason)
    }
}

impl std::error::Error for BuildError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispositions() {
        assert_eq!(AttackError::EmptySpace.disposition(), Disposition::AbandonArtifact);
        assert_eq!(
            AttackError::Oracle {
                artifact: PathBuf::from("a.apk"),
                reason: "down".into()
            }
            .disposition(),
            Disposition::AbandonArtifact
        );
        assert_eq!(
            AttackError::IndexOutOfRange { index: 9, len: 2 }.disposition(),
            Disposition::Fatal
        );
    }

    #[test]
    fn test_from_manipulation_error() {
        let err: AttackError = ManipulationError::IndexOutOfRange { index: 4, len: 4 }.into();
        assert_eq!(err, AttackError::IndexOutOfRange { index: 4, len: 4 });

        let err: AttackError = ManipulationError::DuplicateIndex(1).into();
        assert_eq!(err.disposition(), Disposition::Fatal);
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_build_timeout_message() {
        let err = BuildError::timeout("build", 30);
        assert!(err.timed_out);
        assert_eq!(err.to_string(), "build timed out after 30s");
    }
}
