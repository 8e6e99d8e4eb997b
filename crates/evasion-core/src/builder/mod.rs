//! Process-backed [`ArtifactBuilder`].
//!
//! - [`toolchain`]: decode policy and the external decode/build/sign/align commands
//! - [`workspace`]: indexed working copies of the decoded tree
//! - [`transformers`]: manipulation set -> per-technique edit plans

pub mod toolchain;
pub mod transformers;
pub mod workspace;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use evasion_cache::artifact_identity;
use evasion_types::ManipulationSet;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::errors::BuildError;
use crate::interfaces::{ArtifactBuilder, BuilderFactory};

pub use toolchain::{DecodePolicy, ToolchainConfig};
pub use transformers::{BuildState, Pipeline, Transformer};
pub use workspace::{WorkingCopy, WorkingCopyArena};

/// Builder for one decoded artifact.
pub struct ToolchainBuilder {
    config: Arc<ToolchainConfig>,
    artifact: PathBuf,
    stem: String,
    arena: WorkingCopyArena,
    pipeline: RwLock<Pipeline>,
    policy: Mutex<DecodePolicy>,
}

impl ToolchainBuilder {
    /// Decode `artifact` once. A failed decode is retried with only the main dex.
    pub fn open(config: Arc<ToolchainConfig>, artifact: &Path) -> Result<Self, BuildError> {
        let stem = artifact_identity(artifact);
        let decoded = config
            .work_dir
            .join(format!("{}_{}", stem, uuid::Uuid::new_v4().simple()));
        let builder = Self {
            config,
            artifact: artifact.to_path_buf(),
            stem,
            arena: WorkingCopyArena::new(decoded),
            pipeline: RwLock::new(Pipeline::default()),
            policy: Mutex::new(DecodePolicy::default()),
        };

        if let Err(e) = builder.decode(DecodePolicy::default()) {
            warn!(artifact = %builder.stem, error = %e, "decode failed, retrying with only the main dex");
            builder.decode(DecodePolicy {
                skip_resources: false,
                only_main_dex: true,
            })?;
        }
        Ok(builder)
    }

    pub fn policy(&self) -> DecodePolicy {
        *self.policy.lock()
    }

    pub fn transformer_names(&self) -> Vec<&'static str> {
        self.pipeline.read().names()
    }

    fn decode(&self, policy: DecodePolicy) -> Result<(), BuildError> {
        self.arena.clean_all();
        let canonical = self.arena.canonical();
        std::fs::create_dir_all(self.config.work_dir.as_path())
            .map_err(|e| BuildError::new(format!("cannot create work dir: {}", e)))?;
        let result = self.config.run_step(
            "decode",
            &self.config.decode,
            &self.artifact,
            Some(canonical),
            &policy.envs(),
        );
        match result {
            Ok(()) if canonical.is_dir() => {
                *self.policy.lock() = policy;
                debug!(artifact = %self.stem, ?policy, "decoded");
                Ok(())
            }
            Ok(()) => Err(BuildError::new("decode produced no directory")),
            Err(e) => {
                self.arena.clean_all();
                Err(e)
            }
        }
    }

    fn output_path(&self) -> PathBuf {
        self.config
            .output_dir
            .join(format!("{}_{}.apk", self.stem, uuid::Uuid::new_v4().simple()))
    }

    /// Check out a working copy, write the plans and run the build step.
    fn rebuild(&self, set: &ManipulationSet, attempt: usize, output: &Path) -> Result<(), BuildError> {
        let copy = self
            .arena
            .checkout(attempt)
            .map_err(|e| BuildError::new(format!("working copy {}: {}", attempt, e)))?;
        self.pipeline
            .read()
            .apply(set, copy.path())
            .map_err(|e| BuildError::new(format!("transform failed: {:#}", e)))?;
        std::fs::create_dir_all(&self.config.output_dir)
            .map_err(|e| BuildError::new(format!("cannot create output dir: {}", e)))?;
        self.config
            .run_step("build", &self.config.build, copy.path(), Some(output), &[])
    }
}

impl ArtifactBuilder for ToolchainBuilder {
    fn apply(&self, set: &ManipulationSet, attempt: usize) -> Result<PathBuf, BuildError> {
        let output = self.output_path();
        let result = self.rebuild(set, attempt, &output).and_then(|()| {
            for (step, spec) in [("sign", &self.config.sign), ("align", &self.config.align)] {
                if let Some(spec) = spec {
                    self.config.run_step(step, spec, &output, None, &[])?;
                }
            }
            Ok(())
        });
        match result {
            Ok(()) => Ok(output),
            Err(e) => {
                let _ = std::fs::remove_file(&output);
                Err(e)
            }
        }
    }

    fn validate(&self, set: &ManipulationSet, attempt: usize) -> Result<(), BuildError> {
        let output = self.output_path();
        let result = self.rebuild(set, attempt, &output);
        let _ = std::fs::remove_file(&output);
        result
    }

    fn degrade(&self) -> Result<(), BuildError> {
        let policy = self.policy().degraded();
        self.decode(policy)?;
        let mut pipeline = self.pipeline.write();
        pipeline.without_resource_dependent();
        info!(artifact = %self.stem, transformers = ?pipeline.names(), "switched to degraded decode policy");
        Ok(())
    }

    fn clean(&self, attempt: usize) {
        self.arena.clean(attempt);
    }

    fn clean_all(&self) {
        self.arena.clean_all();
    }
}

/// Opens a [`ToolchainBuilder`] per artifact.
pub struct ToolchainFactory {
    config: Arc<ToolchainConfig>,
}

impl ToolchainFactory {
    pub fn new(config: ToolchainConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }
}

impl BuilderFactory for ToolchainFactory {
    fn open(&self, artifact: &Path) -> Result<Box<dyn ArtifactBuilder>, BuildError> {
        Ok(Box::new(ToolchainBuilder::open(Arc::clone(&self.config), artifact)?))
    }
}
