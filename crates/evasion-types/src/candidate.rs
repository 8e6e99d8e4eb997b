//! Candidate manipulations and manipulation sets.
//!
//! A [`ManipulationSet`] holds two ordered sequences, `inject` and `obfuscate`,
//! and defines an index space of size `inject.len() + obfuscate.len()`:
//! indices `[0, inject.len())` address `inject`, the remainder address
//! `obfuscate`. The mapping is stable for the lifetime of a set, which lets
//! search strategies work on plain index vectors.

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::feature::{Feature, FeatureCategory};

/// Whether a candidate adds an absent feature or hides a present one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ManipulationKind {
    Inject,
    Obfuscate,
}

impl fmt::Display for ManipulationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ManipulationKind::Inject => f.write_str("inject"),
            ManipulationKind::Obfuscate => f.write_str("obfuscate"),
        }
    }
}

/// Content tag of a manipulation set, used to key persisted validation results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KindTag {
    InjectOnly,
    ObfuscateOnly,
    Mixed,
}

impl KindTag {
    /// File-name tag (`inject`, `obfuscate`, `all`).
    pub fn as_str(&self) -> &'static str {
        match self {
            KindTag::InjectOnly => "inject",
            KindTag::ObfuscateOnly => "obfuscate",
            KindTag::Mixed => "all",
        }
    }
}

impl fmt::Display for KindTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Contract violations of the candidate model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManipulationError {
    /// A vector index outside `[0, len)`.
    IndexOutOfRange { index: usize, len: usize },
    /// The same index appears twice in one manipulation vector.
    DuplicateIndex(usize),
    /// A candidate whose category does not permit its kind.
    InvalidCandidate {
        feature: String,
        kind: ManipulationKind,
    },
    /// A candidate that is not a member of the set it is looked up in.
    NotInSet(String),
    /// A feature string that is not `known_category::identifier`.
    MalformedFeature(String),
}

impl fmt::Display for ManipulationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ManipulationError::IndexOutOfRange { index, len } => {
                write!(f, "manipulation index {} out of range (len {})", index, len)
            }
            ManipulationError::DuplicateIndex(index) => {
                write!(f, "duplicate manipulation index {}", index)
            }
            ManipulationError::InvalidCandidate { feature, kind } => {
                write!(f, "feature {} cannot be used as {} candidate", feature, kind)
            }
            ManipulationError::NotInSet(feature) => {
                write!(f, "candidate {} is not part of the manipulation set", feature)
            }
            ManipulationError::MalformedFeature(raw) => write!(f, "malformed feature '{}'", raw),
        }
    }
}

impl std::error::Error for ManipulationError {}

/// A single manipulation: a feature plus what to do with it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Candidate {
    pub category: FeatureCategory,
    pub identifier: String,
    pub kind: ManipulationKind,
}

impl Candidate {
    /// Build a candidate, rejecting kinds the category table does not permit
    /// and injected calls whose return value cannot be discarded.
    pub fn new(
        category: FeatureCategory,
        identifier: impl Into<String>,
        kind: ManipulationKind,
    ) -> Result<Self, ManipulationError> {
        Self::from_feature(Feature::new(category, identifier), kind)
    }

    pub fn from_feature(feature: Feature, kind: ManipulationKind) -> Result<Self, ManipulationError> {
        let valid = match kind {
            ManipulationKind::Inject => feature.is_valid_injection(),
            ManipulationKind::Obfuscate => feature.is_valid_obfuscation(),
        };
        if !valid {
            return Err(ManipulationError::InvalidCandidate {
                feature: feature.to_string(),
                kind,
            });
        }
        Ok(Self {
            category: feature.category,
            identifier: feature.identifier,
            kind,
        })
    }

    pub fn inject(category: FeatureCategory, identifier: impl Into<String>) -> Result<Self, ManipulationError> {
        Self::new(category, identifier, ManipulationKind::Inject)
    }

    pub fn obfuscate(
        category: FeatureCategory,
        identifier: impl Into<String>,
    ) -> Result<Self, ManipulationError> {
        Self::new(category, identifier, ManipulationKind::Obfuscate)
    }

    pub fn feature(&self) -> Feature {
        Feature::new(self.category, self.identifier.clone())
    }
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.category, self.identifier)
    }
}

/// Ordered inject/obfuscate candidate sequences with vector-index addressing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ManipulationSet {
    inject: Vec<Candidate>,
    obfuscate: Vec<Candidate>,
}

impl ManipulationSet {
    /// Build a set from two sequences.
    ///
    /// Every candidate must carry the kind of the sequence it is in. Repeated
    /// candidates are dropped, keeping the first occurrence.
    pub fn new(
        inject: Vec<Candidate>,
        obfuscate: Vec<Candidate>,
    ) -> Result<Self, ManipulationError> {
        for (seq, kind) in [
            (&inject, ManipulationKind::Inject),
            (&obfuscate, ManipulationKind::Obfuscate),
        ] {
            let misplaced = |c: &&Candidate| {
                let feature = c.feature();
                c.kind != kind
                    || match kind {
                        ManipulationKind::Inject => !feature.is_valid_injection(),
                        ManipulationKind::Obfuscate => !feature.is_valid_obfuscation(),
                    }
            };
            if let Some(bad) = seq.iter().find(misplaced) {
                return Err(ManipulationError::InvalidCandidate {
                    feature: bad.to_string(),
                    kind,
                });
            }
        }
        Ok(Self {
            inject: dedup(inject),
            obfuscate: dedup(obfuscate),
        })
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn inject(&self) -> &[Candidate] {
        &self.inject
    }

    pub fn obfuscate(&self) -> &[Candidate] {
        &self.obfuscate
    }

    pub fn len(&self) -> usize {
        self.inject.len() + self.obfuscate.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The same set restricted to its inject sequence.
    pub fn injections_only(&self) -> Self {
        Self {
            inject: self.inject.clone(),
            obfuscate: Vec::new(),
        }
    }

    /// The same set restricted to its obfuscate sequence.
    pub fn obfuscations_only(&self) -> Self {
        Self {
            inject: Vec::new(),
            obfuscate: self.obfuscate.clone(),
        }
    }

    /// The full index vector `[0, len)`.
    pub fn indices(&self) -> Vec<usize> {
        (0..self.len()).collect()
    }

    /// Candidate addressed by a vector index.
    pub fn get(&self, index: usize) -> Result<&Candidate, ManipulationError> {
        if index < self.inject.len() {
            Ok(&self.inject[index])
        } else if index < self.len() {
            Ok(&self.obfuscate[index - self.inject.len()])
        } else {
            Err(ManipulationError::IndexOutOfRange {
                index,
                len: self.len(),
            })
        }
    }

    /// Vector index of a candidate, if it is a member of this set.
    pub fn vector_index_of(&self, candidate: &Candidate) -> Option<usize> {
        match candidate.kind {
            ManipulationKind::Inject => self.inject.iter().position(|c| c == candidate),
            ManipulationKind::Obfuscate => self
                .obfuscate
                .iter()
                .position(|c| c == candidate)
                .map(|i| i + self.inject.len()),
        }
    }

    /// Index vector addressing every candidate of `subset` inside this set.
    pub fn vector_of(&self, subset: &ManipulationSet) -> Result<Vec<usize>, ManipulationError> {
        subset
            .inject
            .iter()
            .chain(subset.obfuscate.iter())
            .map(|c| {
                self.vector_index_of(c)
                    .ok_or_else(|| ManipulationError::NotInSet(c.to_string()))
            })
            .collect()
    }

    /// Sub-set addressed by an index vector, preserving each candidate's kind.
    ///
    /// Candidates keep the relative order of `indices` within their sequence.
    pub fn candidates_of(&self, indices: &[usize]) -> Result<ManipulationSet, ManipulationError> {
        let mut seen = HashSet::with_capacity(indices.len());
        let mut inject = Vec::new();
        let mut obfuscate = Vec::new();
        for &index in indices {
            if !seen.insert(index) {
                return Err(ManipulationError::DuplicateIndex(index));
            }
            let candidate = self.get(index)?.clone();
            match candidate.kind {
                ManipulationKind::Inject => inject.push(candidate),
                ManipulationKind::Obfuscate => obfuscate.push(candidate),
            }
        }
        Ok(Self { inject, obfuscate })
    }

    /// Identifiers of one kind grouped by category, in sequence order.
    pub fn group_by_category(&self, kind: ManipulationKind) -> BTreeMap<FeatureCategory, Vec<String>> {
        let mut groups: BTreeMap<FeatureCategory, Vec<String>> = BTreeMap::new();
        for candidate in self.sequence(kind) {
            groups
                .entry(candidate.category)
                .or_default()
                .push(candidate.identifier.clone());
        }
        groups
    }

    /// Vector indices of one kind grouped by category, in sequence order.
    pub fn indices_by_category(&self, kind: ManipulationKind) -> BTreeMap<FeatureCategory, Vec<usize>> {
        let offset = match kind {
            ManipulationKind::Inject => 0,
            ManipulationKind::Obfuscate => self.inject.len(),
        };
        let mut groups: BTreeMap<FeatureCategory, Vec<usize>> = BTreeMap::new();
        for (i, candidate) in self.sequence(kind).iter().enumerate() {
            groups.entry(candidate.category).or_default().push(offset + i);
        }
        groups
    }

    /// Categories that appear anywhere in the set.
    pub fn categories(&self) -> Vec<FeatureCategory> {
        let mut categories: Vec<_> = self
            .inject
            .iter()
            .chain(self.obfuscate.iter())
            .map(|c| c.category)
            .collect();
        categories.sort();
        categories.dedup();
        categories
    }

    /// Content tag: inject-only, obfuscate-only, or mixed (also used for empty sets).
    pub fn kind_tag(&self) -> KindTag {
        match (self.inject.is_empty(), self.obfuscate.is_empty()) {
            (false, true) => KindTag::InjectOnly,
            (true, false) => KindTag::ObfuscateOnly,
            _ => KindTag::Mixed,
        }
    }

    /// Concatenate the inject sequence of `injections` with the obfuscate
    /// sequence of `obfuscations`.
    pub fn combine(injections: &ManipulationSet, obfuscations: &ManipulationSet) -> Self {
        Self {
            inject: injections.inject.clone(),
            obfuscate: obfuscations.obfuscate.clone(),
        }
    }

    /// All candidates, inject first, in index order.
    pub fn iter(&self) -> impl Iterator<Item = &Candidate> {
        self.inject.iter().chain(self.obfuscate.iter())
    }

    /// `category::identifier` strings of one sequence.
    pub fn feature_strings(&self, kind: ManipulationKind) -> Vec<String> {
        self.sequence(kind).iter().map(|c| c.to_string()).collect()
    }

    fn sequence(&self, kind: ManipulationKind) -> &[Candidate] {
        match kind {
            ManipulationKind::Inject => &self.inject,
            ManipulationKind::Obfuscate => &self.obfuscate,
        }
    }
}

/// Equality of content: both sequences compared as sets.
impl PartialEq for ManipulationSet {
    fn eq(&self, other: &Self) -> bool {
        fn as_set(seq: &[Candidate]) -> HashSet<&Candidate> {
            seq.iter().collect()
        }
        as_set(&self.inject) == as_set(&other.inject)
            && as_set(&self.obfuscate) == as_set(&other.obfuscate)
    }
}

impl Eq for ManipulationSet {}

fn dedup(seq: Vec<Candidate>) -> Vec<Candidate> {
    let mut seen = HashSet::with_capacity(seq.len());
    seq.into_iter()
        .filter(|c| seen.insert(c.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_set() -> ManipulationSet {
        let inject = vec![
            Candidate::inject(FeatureCategory::Urls, "good.example.com").unwrap(),
            Candidate::inject(FeatureCategory::ApiCalls, "Lx/A;->a()V").unwrap(),
            Candidate::inject(FeatureCategory::Urls, "cdn.example.com").unwrap(),
        ];
        let obfuscate = vec![
            Candidate::obfuscate(FeatureCategory::Activities, "com.evil.Main").unwrap(),
            Candidate::obfuscate(FeatureCategory::SuspiciousCalls, "Lx/B;->exec()V").unwrap(),
        ];
        ManipulationSet::new(inject, obfuscate).unwrap()
    }

    #[test]
    fn test_index_space() {
        let set = sample_set();
        assert_eq!(set.len(), 5);
        assert_eq!(set.get(0).unwrap().identifier, "good.example.com");
        assert_eq!(set.get(3).unwrap().identifier, "com.evil.Main");
        assert_eq!(
            set.get(5),
            Err(ManipulationError::IndexOutOfRange { index: 5, len: 5 })
        );
    }

    #[test]
    fn test_vector_index_and_candidates_are_inverse() {
        let set = sample_set();
        for index in set.indices() {
            let sub = set.candidates_of(&[index]).unwrap();
            assert_eq!(sub.len(), 1);
            let candidate = sub.iter().next().unwrap();
            assert_eq!(set.vector_index_of(candidate), Some(index));
        }

        let vector = vec![4, 0, 2];
        let sub = set.candidates_of(&vector).unwrap();
        assert_eq!(sub.len(), vector.len());
        let mut back = set.vector_of(&sub).unwrap();
        back.sort();
        assert_eq!(back, vec![0, 2, 4]);
    }

    #[test]
    fn test_candidates_of_rejects_bad_indices() {
        let set = sample_set();
        assert_eq!(
            set.candidates_of(&[1, 9]).unwrap_err(),
            ManipulationError::IndexOutOfRange { index: 9, len: 5 }
        );
        assert_eq!(
            set.candidates_of(&[1, 1]).unwrap_err(),
            ManipulationError::DuplicateIndex(1)
        );
    }

    #[test]
    fn test_candidates_of_preserves_kind() {
        let set = sample_set();
        let sub = set.candidates_of(&[3, 1]).unwrap();
        assert_eq!(sub.inject().len(), 1);
        assert_eq!(sub.obfuscate().len(), 1);
        assert_eq!(sub.kind_tag(), KindTag::Mixed);
        assert_eq!(set.candidates_of(&[0, 2]).unwrap().kind_tag(), KindTag::InjectOnly);
        assert_eq!(set.candidates_of(&[4]).unwrap().kind_tag(), KindTag::ObfuscateOnly);
    }

    #[test]
    fn test_invalid_candidates_rejected() {
        assert!(Candidate::inject(FeatureCategory::Activities, "com.a.B").is_err());
        assert!(Candidate::inject(FeatureCategory::ApiCalls, "Lx/A;->s()Ljava/lang/String;").is_err());

        let obf = Candidate::obfuscate(FeatureCategory::Urls, "a.com").unwrap();
        let err = ManipulationSet::new(vec![obf], vec![]).unwrap_err();
        assert!(matches!(err, ManipulationError::InvalidCandidate { .. }));
    }

    #[test]
    fn test_content_equality_ignores_order() {
        let set = sample_set();
        let mut reversed_inject = set.inject().to_vec();
        reversed_inject.reverse();
        let other = ManipulationSet::new(reversed_inject, set.obfuscate().to_vec()).unwrap();
        assert_eq!(set, other);
        assert_ne!(set, set.injections_only());
    }

    #[test]
    fn test_duplicates_dropped() {
        let url = Candidate::inject(FeatureCategory::Urls, "a.com").unwrap();
        let set = ManipulationSet::new(vec![url.clone(), url], vec![]).unwrap();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_combine_takes_one_sequence_from_each() {
        let set = sample_set();
        let other = ManipulationSet::new(
            vec![Candidate::inject(FeatureCategory::Urls, "other.example.com").unwrap()],
            vec![],
        )
        .unwrap();

        let combined = ManipulationSet::combine(&set.injections_only(), &other);
        assert_eq!(combined.inject(), set.inject());
        assert!(combined.obfuscate().is_empty());

        let combined = ManipulationSet::combine(&other, &set.obfuscations_only());
        assert_eq!(combined.inject(), other.inject());
        assert_eq!(combined.obfuscate(), set.obfuscate());
        assert_eq!(combined.len(), 3);
    }

    #[test]
    fn test_group_by_category() {
        let set = sample_set();
        let groups = set.group_by_category(ManipulationKind::Inject);
        assert_eq!(
            groups[&FeatureCategory::Urls],
            vec!["good.example.com".to_string(), "cdn.example.com".to_string()]
        );
        let idx = set.indices_by_category(ManipulationKind::Obfuscate);
        assert_eq!(idx[&FeatureCategory::Activities], vec![3]);
        assert_eq!(idx[&FeatureCategory::SuspiciousCalls], vec![4]);
    }

    #[test]
    fn test_serde_shape() {
        let set = sample_set().candidates_of(&[0]).unwrap();
        let json = serde_json::to_string(&set).unwrap();
        assert!(json.contains("\"kind\":\"inject\""));
        assert!(json.contains("\"category\":\"urls\""));
    }
}
