//! Search engine states and result report.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::interfaces::Label;

/// Search engine state machine. Every state after `Searching` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchState {
    Init,
    Searching,
    Evaded,
    BudgetExhausted,
    Stagnated,
    Failed,
}

impl SearchState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SearchState::Init | SearchState::Searching)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SearchState::Init => "init",
            SearchState::Searching => "searching",
            SearchState::Evaded => "evaded",
            SearchState::BudgetExhausted => "budget_exhausted",
            SearchState::Stagnated => "stagnated",
            SearchState::Failed => "failed",
        }
    }
}

impl fmt::Display for SearchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unattacked reference point of a search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Baseline {
    pub label: Label,
    pub score: f64,
    pub path: PathBuf,
}

/// Complete report from a search run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchReport {
    /// Terminal state reached.
    pub state: SearchState,
    /// Strategy used to generate vectors.
    pub strategy: String,
    /// Oracle queries consumed (never above the budget).
    pub queries: u64,
    /// Iterations evaluated, including failed builds.
    pub iterations: u64,
    /// Iterations whose rebuild failed.
    pub build_failures: u64,
    /// Best manipulation vector (empty when nothing beat the baseline).
    pub best_vector: Vec<usize>,
    pub best_label: Label,
    pub best_score: f64,
    pub best_path: PathBuf,
    /// Why the search failed, for `Failed`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Elapsed time in milliseconds.
    pub elapsed_ms: u64,
}

impl SearchReport {
    /// Whether the reported result differs from the unattacked baseline.
    pub fn improved(&self) -> bool {
        !self.best_vector.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(!SearchState::Init.is_terminal());
        assert!(!SearchState::Searching.is_terminal());
        assert!(SearchState::Evaded.is_terminal());
        assert!(SearchState::Failed.is_terminal());
        assert_eq!(
            serde_json::to_string(&SearchState::BudgetExhausted).unwrap(),
            "\"budget_exhausted\""
        );
    }
}
