//! Budgeted black-box search over a sealed manipulation space.
//!
//! - [`strategy`]: vector generation (uniform sampling, best-vector mutation)
//! - [`budget`]: atomically consumed query budget
//! - [`runner`]: the search loop and its state machine
//! - [`report`]: terminal states and the result report

pub mod budget;
pub mod report;
pub mod runner;
pub mod strategy;

pub use budget::QueryBudget;
pub use report::{Baseline, SearchReport, SearchState};
pub use runner::{SearchConfig, SearchEngine};
pub use strategy::{BestMutation, RandomSampling, Strategy, StrategyKind};
