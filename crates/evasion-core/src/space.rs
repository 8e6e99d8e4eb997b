//! Manipulation space of one artifact.
//!
//! The space goes through two phases. While it is a [`ManipulationSpace`] the
//! error-free filter may restrict it and the model probe may disable
//! categories. [`ManipulationSpace::seal`] consumes it and yields a read-only
//! [`SealedSpace`] that the search engine samples from.

use std::collections::{BTreeSet, HashSet};

use evasion_types::{
    Candidate, Feature, FeatureCategory, ManipulationKind, ManipulationSet,
};
use tracing::trace;

use crate::errors::AttackError;

/// Candidate manipulations for one artifact plus the probe's disabled mask.
#[derive(Debug, Clone)]
pub struct ManipulationSpace {
    set: ManipulationSet,
    disabled: BTreeSet<FeatureCategory>,
}

impl ManipulationSpace {
    /// Derive the space from the artifact's own feature strings and the
    /// reference injection pool. Deterministic for identical inputs.
    ///
    /// `inject` keeps pool features that are valid injections and absent from
    /// the artifact. `obfuscate` keeps own features that are valid
    /// obfuscations and not selected for injection. Unknown categories are ignored.
    pub fn build(own_features: &[String], pool: &[Feature]) -> Result<Self, AttackError> {
        let own: Vec<Feature> = own_features
            .iter()
            .filter_map(|raw| match raw.parse::<Feature>() {
                Ok(feature) => Some(feature),
                Err(e) => {
                    trace!(feature = %raw, error = %e, "ignoring feature");
                    None
                }
            })
            .collect();
        let present: HashSet<&Feature> = own.iter().collect();

        let inject: Vec<Candidate> = pool
            .iter()
            .filter(|f| !present.contains(f))
            .filter_map(|f| Candidate::from_feature(f.clone(), ManipulationKind::Inject).ok())
            .collect();
        let injected: HashSet<Feature> = inject.iter().map(Candidate::feature).collect();

        let obfuscate: Vec<Candidate> = own
            .iter()
            .filter(|f| !injected.contains(f))
            .filter_map(|f| Candidate::from_feature(f.clone(), ManipulationKind::Obfuscate).ok())
            .collect();

        let set = ManipulationSet::new(inject, obfuscate)?;
        if set.is_empty() {
            return Err(AttackError::EmptySpace);
        }
        Ok(Self {
            set,
            disabled: BTreeSet::new(),
        })
    }

    pub fn from_set(set: ManipulationSet) -> Self {
        Self {
            set,
            disabled: BTreeSet::new(),
        }
    }

    pub fn all(&self) -> &ManipulationSet {
        &self.set
    }

    pub fn all_injections(&self) -> ManipulationSet {
        self.set.injections_only()
    }

    pub fn all_obfuscations(&self) -> ManipulationSet {
        self.set.obfuscations_only()
    }

    pub fn len(&self) -> usize {
        self.set.len()
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
    }

    /// Replace the content with its validated (error-free) subset.
    ///
    /// Candidates of `validated` that are not part of the space are ignored.
    pub fn restrict_to(&mut self, validated: &ManipulationSet) {
        let keep = |seq: &[Candidate], allowed: &[Candidate]| -> Vec<Candidate> {
            seq.iter().filter(|c| allowed.contains(c)).cloned().collect()
        };
        let inject = keep(self.set.inject(), validated.inject());
        let obfuscate = keep(self.set.obfuscate(), validated.obfuscate());
        // Both sequences are drawn from an already valid set.
        if let Ok(set) = ManipulationSet::new(inject, obfuscate) {
            self.set = set;
        }
    }

    /// Exclude a category from sampling. Only the model probe calls this.
    pub fn disable_category(&mut self, category: FeatureCategory) {
        self.disabled.insert(category);
    }

    pub fn disabled_categories(&self) -> &BTreeSet<FeatureCategory> {
        &self.disabled
    }

    /// End the mutable phase.
    pub fn seal(self) -> SealedSpace {
        let active = self
            .set
            .iter()
            .enumerate()
            .filter(|(_, c)| !self.disabled.contains(&c.category))
            .map(|(i, _)| i)
            .collect();
        SealedSpace {
            set: self.set,
            disabled: self.disabled,
            active,
        }
    }
}

/// Read-only space used by the search engine.
#[derive(Debug, Clone)]
pub struct SealedSpace {
    set: ManipulationSet,
    disabled: BTreeSet<FeatureCategory>,
    active: Vec<usize>,
}

impl SealedSpace {
    pub fn set(&self) -> &ManipulationSet {
        &self.set
    }

    /// Vector indices whose category is not disabled, ascending.
    pub fn active_indices(&self) -> &[usize] {
        &self.active
    }

    pub fn disabled_categories(&self) -> &BTreeSet<FeatureCategory> {
        &self.disabled
    }

    /// Manipulation set addressed by `vector`. Disabled indices are a contract violation.
    pub fn candidates_of(&self, vector: &[usize]) -> Result<ManipulationSet, AttackError> {
        let subset = self.set.candidates_of(vector)?;
        if let Some(c) = subset.iter().find(|c| self.disabled.contains(&c.category)) {
            return Err(AttackError::InvalidCandidate {
                feature: c.to_string(),
                kind: c.kind,
            });
        }
        Ok(subset)
    }
}
