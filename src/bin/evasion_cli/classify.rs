use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use evasion_cache::FsFeatureStore;
use evasion_core::{CommandFeatureExtractor, CommandOracle, FeatureExtractor, Oracle};
use serde_json::json;

use super::config::CommandFlags;
use super::paths::EvasionPaths;

#[derive(Parser, Debug)]
#[command(about = "Classify artifacts with the configured classifier")]
pub struct ClassifyCmd {
    #[arg(required = true)]
    pub artifacts: Vec<PathBuf>,

    #[command(flatten)]
    pub flags: CommandFlags,
}

impl ClassifyCmd {
    pub fn execute(&self, paths: &EvasionPaths, json_output: bool) -> Result<()> {
        let config = self.flags.resolve(paths)?;
        let oracle = CommandOracle::new(config.classifier()?.clone())
            .with_timeout(config.attack.build_timeout.map(Duration::from_secs));

        let mut verdicts = Vec::with_capacity(self.artifacts.len());
        for artifact in &self.artifacts {
            let verdict = oracle.classify(artifact)?;
            if !json_output {
                println!("{}  {}  {:.6}", artifact.display(), verdict.label, verdict.score);
            }
            verdicts.push(json!({
                "artifact": artifact,
                "label": verdict.label,
                "score": verdict.score,
            }));
        }
        if json_output {
            println!("{}", serde_json::to_string_pretty(&verdicts)?);
        }
        Ok(())
    }
}

#[derive(Parser, Debug)]
#[command(about = "Extract (and cache) the features of artifacts")]
pub struct FeaturesCmd {
    #[arg(required = true)]
    pub artifacts: Vec<PathBuf>,

    /// Bypass the feature cache
    #[arg(long)]
    pub no_cache: bool,

    #[command(flatten)]
    pub flags: CommandFlags,
}

impl FeaturesCmd {
    pub fn execute(&self, paths: &EvasionPaths, json_output: bool) -> Result<()> {
        let config = self.flags.resolve(paths)?;
        let mut extractor = CommandFeatureExtractor::new(config.extractor()?.clone())
            .with_timeout(config.attack.build_timeout.map(Duration::from_secs));
        if !self.no_cache {
            let root = config.attack.cache_dir.clone().unwrap_or_else(|| paths.cache_dir());
            extractor = extractor.with_store(FsFeatureStore::new(root));
        }

        let mut all = serde_json::Map::new();
        for artifact in &self.artifacts {
            let features = extractor.extract(artifact)?;
            if !json_output {
                println!("{} ({} features)", artifact.display(), features.len());
                for feature in &features {
                    println!("  {}", feature);
                }
            }
            all.insert(artifact.display().to_string(), json!(features));
        }
        if json_output {
            println!("{}", serde_json::to_string_pretty(&all)?);
        }
        Ok(())
    }
}
