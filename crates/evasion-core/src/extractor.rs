//! Feature extractor invoked as an external command, cached on disk.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use evasion_cache::paths::file_sha256;
use evasion_cache::{artifact_identity, FeatureRecord, FsFeatureStore, Lookup};
use tracing::{debug, warn};

use crate::interfaces::FeatureExtractor;
use crate::process::{self, CommandSpec};

/// Runs `<program> <args..> <artifact>`; stdout is `{category: [identifiers]}`.
pub struct CommandFeatureExtractor {
    command: CommandSpec,
    store: Option<FsFeatureStore>,
    timeout: Option<Duration>,
}

impl CommandFeatureExtractor {
    pub fn new(command: CommandSpec) -> Self {
        Self {
            command,
            store: None,
            timeout: None,
        }
    }

    pub fn with_store(mut self, store: FsFeatureStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn store(&self) -> Option<&FsFeatureStore> {
        self.store.as_ref()
    }

    fn run_extractor(&self, artifact: &Path) -> Result<BTreeMap<String, Vec<String>>> {
        let args = self.command.render_args(artifact, None);
        let output = process::run(&self.command.program, &args, &[], self.timeout)
            .map_err(|e| anyhow!("feature extraction failed for {}: {}", artifact.display(), e))?;
        serde_json::from_str(output.stdout.trim())
            .with_context(|| format!("unparsable extractor output for {}", artifact.display()))
    }
}

impl FeatureExtractor for CommandFeatureExtractor {
    fn extract(&self, artifact: &Path) -> Result<Vec<String>> {
        let identity = artifact_identity(artifact);
        let digest = file_sha256(artifact).ok();

        if let Some(store) = &self.store {
            match store.load(&identity, digest.as_deref()) {
                Lookup::Hit(record) => {
                    debug!(artifact = %identity, "feature cache hit");
                    return Ok(record.feature_strings());
                }
                Lookup::Corrupt(reason) => {
                    warn!(artifact = %identity, reason = %reason, "corrupt feature record, re-extracting");
                }
                Lookup::Miss => {}
            }
        }

        let mut record = FeatureRecord::new(self.run_extractor(artifact)?);
        if let Some(digest) = digest {
            record = record.with_sha256(digest);
        }
        if let Some(store) = &self.store {
            if let Err(e) = store.save(&identity, &record) {
                warn!(artifact = %identity, error = %e, "failed to cache features");
            }
        }
        debug!(artifact = %identity, features = record.len(), "features extracted");
        Ok(record.feature_strings())
    }
}
