//! Feature categories and `category::identifier` feature strings.
//!
//! The category table is fixed and process-wide: each category declares whether
//! its features may be injected into an artifact and whether features already
//! present may be obfuscated.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::candidate::{ManipulationError, ManipulationKind};

/// Separator between the category and the identifier of a feature string.
pub const FEATURE_SEPARATOR: &str = "::";

/// Method descriptor suffixes whose return value a synthesized call site can
/// safely discard (void, boolean, int).
pub const DISCARDABLE_RETURN_TYPES: [&str; 3] = ["()V", "()Z", "()I"];

/// A class of structural elements extracted from an artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureCategory {
    Activities,
    Services,
    Providers,
    Receivers,
    ApiCalls,
    SuspiciousCalls,
    Urls,
}

impl FeatureCategory {
    /// Every category, in table order.
    pub const ALL: [FeatureCategory; 7] = [
        FeatureCategory::Activities,
        FeatureCategory::Services,
        FeatureCategory::Providers,
        FeatureCategory::Receivers,
        FeatureCategory::ApiCalls,
        FeatureCategory::SuspiciousCalls,
        FeatureCategory::Urls,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FeatureCategory::Activities => "activities",
            FeatureCategory::Services => "services",
            FeatureCategory::Providers => "providers",
            FeatureCategory::Receivers => "receivers",
            FeatureCategory::ApiCalls => "api_calls",
            FeatureCategory::SuspiciousCalls => "suspicious_calls",
            FeatureCategory::Urls => "urls",
        }
    }

    /// Whether absent features of this category can be added to an artifact.
    pub fn is_injectable(&self) -> bool {
        matches!(self, FeatureCategory::ApiCalls | FeatureCategory::Urls)
    }

    /// Whether present features of this category can be rewritten or hidden.
    pub fn is_obfuscatable(&self) -> bool {
        true
    }

    /// Whether this category permits manipulations of the given kind.
    pub fn permits(&self, kind: ManipulationKind) -> bool {
        match kind {
            ManipulationKind::Inject => self.is_injectable(),
            ManipulationKind::Obfuscate => self.is_obfuscatable(),
        }
    }

    /// Whether identifiers of this category are method signatures.
    pub fn is_call(&self) -> bool {
        matches!(
            self,
            FeatureCategory::ApiCalls | FeatureCategory::SuspiciousCalls
        )
    }

    /// Whether this category names a manifest component class.
    pub fn is_component(&self) -> bool {
        matches!(
            self,
            FeatureCategory::Activities
                | FeatureCategory::Services
                | FeatureCategory::Providers
                | FeatureCategory::Receivers
        )
    }
}

impl fmt::Display for FeatureCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FeatureCategory {
    type Err = ManipulationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FeatureCategory::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| ManipulationError::MalformedFeature(s.to_string()))
    }
}

/// A single extracted feature: `category::identifier`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Feature {
    pub category: FeatureCategory,
    pub identifier: String,
}

impl Feature {
    pub fn new(category: FeatureCategory, identifier: impl Into<String>) -> Self {
        Self {
            category,
            identifier: identifier.into(),
        }
    }

    /// Whether a call identifier ends in a return type a synthesized call site may discard.
    pub fn has_discardable_return(&self) -> bool {
        DISCARDABLE_RETURN_TYPES
            .iter()
            .any(|suffix| self.identifier.ends_with(suffix))
    }

    /// Whether this feature may enter the inject side of a manipulation space.
    ///
    /// Calls must additionally return a discardable type, because the injected
    /// call site ignores the returned value.
    pub fn is_valid_injection(&self) -> bool {
        self.category.is_injectable() && (!self.category.is_call() || self.has_discardable_return())
    }

    /// Whether this feature may enter the obfuscate side of a manipulation space.
    pub fn is_valid_obfuscation(&self) -> bool {
        self.category.is_obfuscatable()
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.category, FEATURE_SEPARATOR, self.identifier)
    }
}

impl FromStr for Feature {
    type Err = ManipulationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (category, identifier) = s
            .split_once(FEATURE_SEPARATOR)
            .ok_or_else(|| ManipulationError::MalformedFeature(s.to_string()))?;
        if identifier.is_empty() {
            return Err(ManipulationError::MalformedFeature(s.to_string()));
        }
        let category = category
            .parse::<FeatureCategory>()
            .map_err(|_| ManipulationError::MalformedFeature(s.to_string()))?;
        Ok(Feature::new(category, identifier))
    }
}
