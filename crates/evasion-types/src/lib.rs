//! Shared types for the apk-evasion workspace.
//!
//! This crate provides the candidate model used by every other crate:
//!
//! - [`feature`]: the fixed feature-category table and `category::identifier` parsing
//! - [`candidate`]: single manipulations ([`Candidate`]) and ordered collections of
//!   them ([`ManipulationSet`]) with stable vector-index addressing
//! - [`env_utils`]: typed environment variable helpers used by configuration layers

pub mod candidate;
pub mod env_utils;
pub mod feature;

pub use candidate::{Candidate, KindTag, ManipulationError, ManipulationKind, ManipulationSet};
pub use feature::{Feature, FeatureCategory, DISCARDABLE_RETURN_TYPES};
