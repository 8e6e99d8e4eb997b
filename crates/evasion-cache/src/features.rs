//! Filesystem-backed store of extracted artifact features.

use anyhow::Result;
use evasion_types::Feature;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::trace;

use crate::metrics::CacheMetrics;
use crate::paths::{atomic_write_json, feature_path};
use crate::Lookup;

/// Extracted features of one artifact.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureRecord {
    /// SHA-256 of the artifact the features were extracted from (if known)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    /// Category name -> identifiers, in extractor order
    pub features: BTreeMap<String, Vec<String>>,
}

impl FeatureRecord {
    pub fn new(features: BTreeMap<String, Vec<String>>) -> Self {
        Self {
            sha256: None,
            features,
        }
    }

    pub fn with_sha256(mut self, sha256: impl Into<String>) -> Self {
        self.sha256 = Some(sha256.into());
        self
    }

    /// Flattened `category::identifier` strings, grouped by category.
    pub fn feature_strings(&self) -> Vec<String> {
        self.features
            .iter()
            .flat_map(|(category, ids)| ids.iter().map(move |id| format!("{}::{}", category, id)))
            .collect()
    }

    /// Features in known categories. Entries of unknown categories are skipped.
    pub fn parsed(&self) -> Vec<Feature> {
        self.feature_strings()
            .into_iter()
            .filter_map(|raw| match raw.parse::<Feature>() {
                Ok(feature) => Some(feature),
                Err(e) => {
                    trace!(feature = %raw, error = %e, "skipping unrecognized feature");
                    None
                }
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.features.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Filesystem feature store: one JSON record per artifact identity.
pub struct FsFeatureStore {
    cache_root: PathBuf,
    metrics: CacheMetrics,
}

impl FsFeatureStore {
    pub fn new<P: AsRef<Path>>(cache_root: P) -> Self {
        Self {
            cache_root: cache_root.as_ref().to_path_buf(),
            metrics: CacheMetrics::default(),
        }
    }

    pub fn cache_root(&self) -> &Path {
        &self.cache_root
    }

    pub fn metrics(&self) -> &CacheMetrics {
        &self.metrics
    }

    /// Look up the features of an artifact.
    ///
    /// When `sha256` is given and the record carries a different digest, the
    /// record is stale and reported as a miss.
    pub fn load(&self, identity: &str, sha256: Option<&str>) -> Lookup<FeatureRecord> {
        let path = feature_path(&self.cache_root, identity);
        if !path.exists() {
            self.metrics.record_miss();
            return Lookup::Miss;
        }

        let record = std::fs::read_to_string(&path)
            .map_err(|e| format!("Failed to read {}: {}", path.display(), e))
            .and_then(|json| {
                serde_json::from_str::<FeatureRecord>(&json)
                    .map_err(|e| format!("Failed to parse {}: {}", path.display(), e))
            });

        match record {
            Ok(record) => {
                if let (Some(expected), Some(stored)) = (sha256, record.sha256.as_deref()) {
                    if expected != stored {
                        trace!(artifact = identity, "feature record digest mismatch");
                        self.metrics.record_miss();
                        return Lookup::Miss;
                    }
                }
                self.metrics.record_hit();
                Lookup::Hit(record)
            }
            Err(reason) => {
                self.metrics.record_corrupt();
                Lookup::Corrupt(reason)
            }
        }
    }

    pub fn save(&self, identity: &str, record: &FeatureRecord) -> Result<()> {
        atomic_write_json(&feature_path(&self.cache_root, identity), record)?;
        self.metrics.record_write();
        Ok(())
    }
}
