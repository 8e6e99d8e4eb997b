//! Filesystem-backed store of validated (error-free) manipulation sets.

use anyhow::Result;
use evasion_types::{Candidate, Feature, KindTag, ManipulationKind, ManipulationSet};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::metrics::CacheMetrics;
use crate::paths::{atomic_write_json, error_free_path};
use crate::Lookup;

/// Serialized form of a validated manipulation set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorFreeRecord {
    /// `category::identifier` strings of the inject sequence, in order
    pub inject: Vec<String>,
    /// `category::identifier` strings of the obfuscate sequence, in order
    pub obfuscate: Vec<String>,
}

impl ErrorFreeRecord {
    pub fn from_set(set: &ManipulationSet) -> Self {
        Self {
            inject: set.feature_strings(ManipulationKind::Inject),
            obfuscate: set.feature_strings(ManipulationKind::Obfuscate),
        }
    }

    /// Rebuild the manipulation set, failing on any malformed or invalid entry.
    pub fn to_set(&self) -> Result<ManipulationSet, String> {
        let decode = |raw: &[String], kind: ManipulationKind| -> Result<Vec<Candidate>, String> {
            raw.iter()
                .map(|s| {
                    let feature: Feature = s.parse().map_err(|e| format!("{}", e))?;
                    Candidate::from_feature(feature, kind).map_err(|e| format!("{}", e))
                })
                .collect()
        };
        let inject = decode(&self.inject, ManipulationKind::Inject)?;
        let obfuscate = decode(&self.obfuscate, ManipulationKind::Obfuscate)?;
        ManipulationSet::new(inject, obfuscate).map_err(|e| e.to_string())
    }
}

/// Trait for validated-manipulation stores.
pub trait ErrorFreeStore: Send + Sync {
    /// Look up the validated set for an artifact and input kind tag.
    fn load(&self, identity: &str, tag: KindTag) -> Lookup<ManipulationSet>;

    /// Store (or overwrite) the validated set for an artifact and input kind tag.
    fn save(&self, identity: &str, tag: KindTag, set: &ManipulationSet) -> Result<()>;
}

/// Filesystem store: one JSON record per `(identity, tag)`.
pub struct FsErrorFreeStore {
    cache_root: PathBuf,
    metrics: CacheMetrics,
}

impl FsErrorFreeStore {
    pub fn new<P: AsRef<Path>>(cache_root: P) -> Self {
        Self {
            cache_root: cache_root.as_ref().to_path_buf(),
            metrics: CacheMetrics::default(),
        }
    }

    pub fn with_metrics(mut self, metrics: CacheMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn cache_root(&self) -> &Path {
        &self.cache_root
    }

    pub fn metrics(&self) -> &CacheMetrics {
        &self.metrics
    }
}

impl ErrorFreeStore for FsErrorFreeStore {
    fn load(&self, identity: &str, tag: KindTag) -> Lookup<ManipulationSet> {
        let path = error_free_path(&self.cache_root, identity, tag);
        if !path.exists() {
            self.metrics.record_miss();
            return Lookup::Miss;
        }

        let decoded = std::fs::read_to_string(&path)
            .map_err(|e| format!("Failed to read {}: {}", path.display(), e))
            .and_then(|json| {
                serde_json::from_str::<ErrorFreeRecord>(&json)
                    .map_err(|e| format!("Failed to parse {}: {}", path.display(), e))
            })
            .and_then(|record| record.to_set());

        match decoded {
            Ok(set) => {
                debug!(artifact = identity, tag = %tag, size = set.len(), "error-free cache hit");
                self.metrics.record_hit();
                Lookup::Hit(set)
            }
            Err(reason) => {
                self.metrics.record_corrupt();
                Lookup::Corrupt(reason)
            }
        }
    }

    fn save(&self, identity: &str, tag: KindTag, set: &ManipulationSet) -> Result<()> {
        let path = error_free_path(&self.cache_root, identity, tag);
        atomic_write_json(&path, &ErrorFreeRecord::from_set(set))?;
        self.metrics.record_write();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use evasion_types::FeatureCategory;
    use tempfile::TempDir;

    fn validated() -> ManipulationSet {
        ManipulationSet::new(
            vec![
                Candidate::inject(FeatureCategory::Urls, "a.example.com").unwrap(),
                Candidate::inject(FeatureCategory::ApiCalls, "Lx/A;->go()Z").unwrap(),
            ],
            vec![],
        )
        .unwrap()
    }

    #[test]
    fn test_save_and_load() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let store = FsErrorFreeStore::new(temp_dir.path());

        assert_eq!(store.load("mw1", KindTag::InjectOnly), Lookup::Miss);

        store.save("mw1", KindTag::InjectOnly, &validated())?;
        let loaded = store.load("mw1", KindTag::InjectOnly).hit().expect("record should exist");
        assert_eq!(loaded, validated());
        assert_eq!(loaded.inject()[0].identifier, "a.example.com");

        // Other tags of the same artifact are independent records
        assert_eq!(store.load("mw1", KindTag::ObfuscateOnly), Lookup::Miss);

        let snap = store.metrics().snapshot();
        assert_eq!(snap.hits, 1);
        assert_eq!(snap.misses, 2);
        assert_eq!(snap.writes, 1);
        Ok(())
    }

    #[test]
    fn test_empty_set_round_trips() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let store = FsErrorFreeStore::new(temp_dir.path());
        store.save("mw2", KindTag::ObfuscateOnly, &ManipulationSet::empty())?;
        let loaded = store.load("mw2", KindTag::ObfuscateOnly).hit().unwrap();
        assert!(loaded.is_empty());
        Ok(())
    }

    #[test]
    fn test_corrupt_record_is_reported_not_raised() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let store = FsErrorFreeStore::new(temp_dir.path());

        let path = error_free_path(temp_dir.path(), "mw3", KindTag::InjectOnly);
        std::fs::create_dir_all(path.parent().unwrap())?;
        std::fs::write(&path, b"{not json")?;
        assert!(matches!(store.load("mw3", KindTag::InjectOnly), Lookup::Corrupt(_)));

        // An activity can never be injected: the record is invalid, not just unparsable
        let bad = ErrorFreeRecord {
            inject: vec!["activities::com.a.Main".to_string()],
            obfuscate: vec![],
        };
        std::fs::write(&path, serde_json::to_vec(&bad)?)?;
        assert!(matches!(store.load("mw3", KindTag::InjectOnly), Lookup::Corrupt(_)));

        // Overwriting repairs the entry
        store.save("mw3", KindTag::InjectOnly, &validated())?;
        assert!(store.load("mw3", KindTag::InjectOnly).hit().is_some());
        assert_eq!(store.metrics().snapshot().corrupt, 2);
        Ok(())
    }
}
