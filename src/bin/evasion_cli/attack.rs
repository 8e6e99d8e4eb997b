use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use evasion_cache::{FsErrorFreeStore, FsFeatureStore};
use evasion_core::{
    AttackOrchestrator, AttackRecord, CommandFeatureExtractor, CommandOracle, ResultsLog, StrategyKind,
    ToolchainFactory,
};
use evasion_types::env_utils::env_bool;
use tracing::info;

use super::config::{CliConfig, CommandFlags};
use super::output;
use super::paths::EvasionPaths;

#[derive(Parser, Debug)]
#[command(about = "Attack detected artifacts and write one result record per input")]
pub struct AttackCmd {
    /// Malware artifacts, or directories of them
    #[arg(required = true)]
    pub malware: Vec<PathBuf>,

    /// Goodware artifacts (or directories) harvested for injectable features
    #[arg(long, num_args = 1..)]
    pub goodware: Vec<PathBuf>,

    /// Write the result records to this file as pretty JSON
    #[arg(long, short)]
    pub output: Option<PathBuf>,

    /// Oracle queries allowed per artifact
    #[arg(long)]
    pub query_budget: Option<u64>,

    /// Maximum manipulations per candidate vector
    #[arg(long)]
    pub n_features: Option<usize>,

    /// Non-improving iterations before the search stops
    #[arg(long)]
    pub stagnation: Option<u64>,

    /// Consecutive failed rebuilds before the search gives up
    #[arg(long)]
    pub max_build_failures: Option<u64>,

    /// Concurrent rebuilds
    #[arg(long, short = 'j')]
    pub parallelism: Option<usize>,

    #[arg(long)]
    pub seed: Option<u64>,

    /// Vector generation strategy (random, mutation)
    #[arg(long)]
    pub strategy: Option<StrategyKind>,

    /// Per-step toolchain timeout in seconds
    #[arg(long)]
    pub build_timeout: Option<u64>,

    /// Directory for manipulated artifacts
    #[arg(long)]
    pub output_dir: Option<PathBuf>,

    /// Cache root (defaults to <home>/cache)
    #[arg(long)]
    pub cache_dir: Option<PathBuf>,

    /// Disable the error-free and feature caches
    #[arg(long)]
    pub no_cache: bool,

    /// Do not append to the results log
    #[arg(long)]
    pub no_log: bool,

    #[command(flatten)]
    pub flags: CommandFlags,
}

impl AttackCmd {
    fn resolve(&self, paths: &EvasionPaths) -> Result<CliConfig> {
        let mut config = self.flags.resolve(paths)?;
        let attack = &mut config.attack;
        if let Some(v) = self.query_budget {
            attack.query_budget = v;
        }
        if let Some(v) = self.n_features {
            attack.n_features = v;
        }
        if let Some(v) = self.stagnation {
            attack.stagnation = v;
        }
        if let Some(v) = self.max_build_failures {
            attack.max_build_failures = v;
        }
        if let Some(v) = self.parallelism {
            attack.parallelism = v;
        }
        if let Some(v) = self.seed {
            attack.seed = v;
        }
        if let Some(v) = self.strategy {
            attack.strategy = v;
        }
        if let Some(v) = self.build_timeout {
            attack.build_timeout = Some(v);
        }
        if let Some(v) = &self.output_dir {
            attack.output_dir = v.clone();
        }
        attack.cache_dir = if self.no_cache || env_bool("APK_EVASION_NO_CACHE") == Some(true) {
            None
        } else {
            self.cache_dir
                .clone()
                .or_else(|| attack.cache_dir.clone())
                .or_else(|| Some(paths.cache_dir()))
        };
        attack.validate()?;
        Ok(config)
    }

    pub fn execute(&self, paths: &EvasionPaths, json_output: bool) -> Result<()> {
        let config = self.resolve(paths)?;
        let malware = collect_artifacts(&self.malware)?;
        let goodware = collect_artifacts(&self.goodware)?;
        if malware.is_empty() {
            return Err(anyhow!("no artifacts to attack"));
        }

        let timeout = config.attack.build_timeout.map(Duration::from_secs);
        let mut extractor = CommandFeatureExtractor::new(config.extractor()?.clone()).with_timeout(timeout);
        let oracle = CommandOracle::new(config.classifier()?.clone()).with_timeout(timeout);
        let factory = ToolchainFactory::new(config.toolchain(paths)?);
        std::fs::create_dir_all(&config.attack.output_dir)
            .with_context(|| format!("Failed to create {}", config.attack.output_dir.display()))?;

        let mut error_free = None;
        if let Some(cache_dir) = &config.attack.cache_dir {
            extractor = extractor.with_store(FsFeatureStore::new(cache_dir));
            error_free = Some(Arc::new(FsErrorFreeStore::new(cache_dir)));
        }

        info!(
            malware = malware.len(),
            goodware = goodware.len(),
            budget = config.attack.query_budget,
            strategy = %config.attack.strategy,
            "starting attack"
        );

        let mut orchestrator = AttackOrchestrator::new(
            config.attack.clone(),
            Arc::new(extractor),
            Arc::new(factory),
            Arc::new(oracle),
        )?;
        if let Some(store) = &error_free {
            orchestrator = orchestrator.with_error_free_store(store.clone());
        }
        if !self.no_log {
            orchestrator = orchestrator.with_results_log(Arc::new(ResultsLog::new(paths.results_log())));
        }

        let records = orchestrator.run(&malware, &goodware);

        if let Some(path) = &self.output {
            write_records(path, &records)?;
        }
        if json_output {
            println!("{}", serde_json::to_string_pretty(&records)?);
        } else {
            output::print_summary(&records);
            if let Some(store) = &error_free {
                output::print_cache_metrics(&store.metrics().snapshot());
            }
        }
        Ok(())
    }
}

/// Expand directories into their `.apk` files (sorted); files pass through.
pub fn collect_artifacts(inputs: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut artifacts = Vec::new();
    for input in inputs {
        if input.is_dir() {
            let mut found: Vec<PathBuf> = std::fs::read_dir(input)
                .with_context(|| format!("Failed to list {}", input.display()))?
                .filter_map(|e| e.ok().map(|e| e.path()))
                .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("apk")))
                .collect();
            found.sort();
            artifacts.extend(found);
        } else if input.is_file() {
            artifacts.push(input.clone());
        } else {
            return Err(anyhow!("artifact not found: {}", input.display()));
        }
    }
    Ok(artifacts)
}

fn write_records(path: &Path, records: &[AttackRecord]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(records).context("serialize attack records")?;
    std::fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_collect_artifacts() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("b.apk"), b"").unwrap();
        std::fs::write(dir.path().join("a.APK"), b"").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"").unwrap();
        let single = dir.path().join("b.apk");

        let found = collect_artifacts(&[dir.path().to_path_buf(), single.clone()]).unwrap();
        assert_eq!(found, vec![dir.path().join("a.APK"), single.clone(), single]);
        assert!(collect_artifacts(&[dir.path().join("missing.apk")]).is_err());
    }
}
