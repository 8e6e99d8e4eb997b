//! Collaborator seams: feature extraction, artifact rebuilding, classification.

use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::Result;
use evasion_types::ManipulationSet;
use serde::{Deserialize, Serialize};

use crate::errors::BuildError;

/// Classifier decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Label {
    Benign,
    Malicious,
}

impl Label {
    /// `0` is benign, anything else is malicious.
    pub fn from_code(code: i64) -> Self {
        if code == 0 {
            Label::Benign
        } else {
            Label::Malicious
        }
    }

    pub fn is_benign(&self) -> bool {
        matches!(self, Label::Benign)
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Label::Benign => f.write_str("benign"),
            Label::Malicious => f.write_str("malicious"),
        }
    }
}

/// One oracle answer. `score` is the confidence in the malicious class.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub label: Label,
    pub score: f64,
}

impl Verdict {
    pub fn new(label: Label, score: f64) -> Self {
        Self { label, score }
    }

    /// Evasion loss: lower is better for the attacker.
    pub fn loss(&self) -> f64 {
        self.score
    }
}

/// Extracts `category::identifier` feature strings from an artifact.
pub trait FeatureExtractor: Send + Sync {
    fn extract(&self, artifact: &Path) -> Result<Vec<String>>;
}

/// Turns manipulation sets into rebuilt artifacts for one decoded artifact.
///
/// Every attempt index maps to its own working copy, so calls with distinct
/// indices may run concurrently. Implementations must leave no temporary
/// state behind on either the success or the failure path.
pub trait ArtifactBuilder: Send + Sync {
    /// Apply `set`, rebuild, sign and align; returns the runnable artifact.
    fn apply(&self, set: &ManipulationSet, attempt: usize) -> Result<PathBuf, BuildError>;

    /// Apply `set` and rebuild only, discarding the output.
    fn validate(&self, set: &ManipulationSet, attempt: usize) -> Result<(), BuildError>;

    /// Switch to the degraded reconstruction policy.
    fn degrade(&self) -> Result<(), BuildError>;

    /// Remove the working copy of one attempt.
    fn clean(&self, attempt: usize);

    /// Remove every working copy and the canonical decoded tree.
    fn clean_all(&self);

    /// Drop an artifact produced by [`ArtifactBuilder::apply`] that is no longer needed.
    fn discard(&self, artifact: &Path) {
        if let Err(e) = std::fs::remove_file(artifact) {
            tracing::trace!(artifact = %artifact.display(), error = %e, "discard skipped");
        }
    }
}

/// Opens an [`ArtifactBuilder`] for a given artifact (decodes it once).
pub trait BuilderFactory: Send + Sync {
    fn open(&self, artifact: &Path) -> Result<Box<dyn ArtifactBuilder>, BuildError>;
}

impl<F> BuilderFactory for F
where
    F: Fn(&Path) -> Result<Box<dyn ArtifactBuilder>, BuildError> + Send + Sync,
{
    fn open(&self, artifact: &Path) -> Result<Box<dyn ArtifactBuilder>, BuildError> {
        self(artifact)
    }
}

/// The black-box classifier. One call is one unit of query budget.
pub trait Oracle: Send + Sync {
    fn classify(&self, artifact: &Path) -> Result<Verdict>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_codes() {
        assert_eq!(Label::from_code(0), Label::Benign);
        assert_eq!(Label::from_code(1), Label::Malicious);
        assert!(Label::Benign.is_benign());
        assert_eq!(serde_json::to_string(&Label::Malicious).unwrap(), "\"malicious\"");
    }
}
