//! CLI configuration: attack parameters plus the external commands.
//!
//! Precedence, lowest first: built-in defaults, the JSON config file
//! (`--config`, or `<home>/config.json` when present), `APK_EVASION_*`
//! environment variables (attack parameters and command lines such as
//! `APK_EVASION_CLASSIFIER`), then command-line flags.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use evasion_core::builder::ToolchainConfig;
use evasion_core::process::CommandSpec;
use evasion_core::AttackConfig;
use evasion_types::env_utils::env_list;

use super::paths::EvasionPaths;

/// External commands the attack shells out to.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandsConfig {
    pub classifier: Option<CommandSpec>,
    pub extractor: Option<CommandSpec>,
    pub decode: Option<CommandSpec>,
    pub build: Option<CommandSpec>,
    pub sign: Option<CommandSpec>,
    pub align: Option<CommandSpec>,
}

impl CommandsConfig {
    /// Overlay `APK_EVASION_<NAME>` command lines (whitespace separated).
    pub fn with_env_overrides(mut self) -> Self {
        for (key, slot) in [
            ("APK_EVASION_CLASSIFIER", &mut self.classifier),
            ("APK_EVASION_EXTRACTOR", &mut self.extractor),
            ("APK_EVASION_DECODE", &mut self.decode),
            ("APK_EVASION_BUILD", &mut self.build),
            ("APK_EVASION_SIGN", &mut self.sign),
            ("APK_EVASION_ALIGN", &mut self.align),
        ] {
            let mut parts = env_list(key).into_iter();
            if let Some(program) = parts.next() {
                *slot = Some(CommandSpec::new(program).with_args(parts));
            }
        }
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    pub attack: AttackConfig,
    pub commands: CommandsConfig,
}

impl CliConfig {
    /// Load the layered configuration. An explicit `--config` file must exist.
    pub fn load(explicit: Option<&Path>, paths: &EvasionPaths) -> Result<Self> {
        let config = match explicit {
            Some(path) => Self::read(path)?,
            None => {
                let default = paths.config_file();
                if default.exists() {
                    Self::read(&default)?
                } else {
                    Self::default()
                }
            }
        };
        Ok(Self {
            attack: config.attack.with_env_overrides(),
            commands: config.commands.with_env_overrides(),
        })
    }

    fn read(path: &Path) -> Result<Self> {
        let content =
            std::fs::read_to_string(path).with_context(|| format!("Failed to read config {}", path.display()))?;
        serde_json::from_str(&content).with_context(|| format!("Invalid config {}", path.display()))
    }

    pub fn classifier(&self) -> Result<&CommandSpec> {
        self.commands
            .classifier
            .as_ref()
            .ok_or_else(|| anyhow!("no classifier command configured (use --classifier)"))
    }

    pub fn extractor(&self) -> Result<&CommandSpec> {
        self.commands
            .extractor
            .as_ref()
            .ok_or_else(|| anyhow!("no feature extractor command configured (use --extractor)"))
    }

    /// Toolchain settings for the rebuild steps.
    pub fn toolchain(&self, paths: &EvasionPaths) -> Result<ToolchainConfig> {
        let decode = self
            .commands
            .decode
            .clone()
            .ok_or_else(|| anyhow!("no decode command configured (use --decode)"))?;
        let build = self
            .commands
            .build
            .clone()
            .ok_or_else(|| anyhow!("no build command configured (use --build)"))?;
        Ok(ToolchainConfig {
            decode,
            build,
            sign: self.commands.sign.clone(),
            align: self.commands.align.clone(),
            work_dir: paths.work_dir(),
            output_dir: self.attack.output_dir.clone(),
            timeout_secs: self.attack.build_timeout,
        })
    }
}

/// Flags shared by every command that talks to external tools.
#[derive(Parser, Debug, Clone, Default)]
pub struct CommandFlags {
    /// JSON config file (defaults to <home>/config.json when present)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Classifier command; prints {"label": 0|1, "score": f64}
    #[arg(long)]
    pub classifier: Option<String>,

    /// Feature extractor command; prints {category: [identifiers]}
    #[arg(long)]
    pub extractor: Option<String>,

    /// Decode command ({input} artifact, {output} directory)
    #[arg(long)]
    pub decode: Option<String>,

    /// Build command ({input} working copy, {output} artifact)
    #[arg(long)]
    pub build: Option<String>,

    /// Sign command applied to the rebuilt artifact
    #[arg(long)]
    pub sign: Option<String>,

    /// Align command applied to the signed artifact
    #[arg(long)]
    pub align: Option<String>,
}

impl CommandFlags {
    pub fn apply(&self, commands: &mut CommandsConfig) -> Result<()> {
        for (flag, value, slot) in [
            ("--classifier", &self.classifier, &mut commands.classifier),
            ("--extractor", &self.extractor, &mut commands.extractor),
            ("--decode", &self.decode, &mut commands.decode),
            ("--build", &self.build, &mut commands.build),
            ("--sign", &self.sign, &mut commands.sign),
            ("--align", &self.align, &mut commands.align),
        ] {
            if let Some(line) = value {
                let spec = CommandSpec::parse(line).ok_or_else(|| anyhow!("{} must not be empty", flag))?;
                *slot = Some(spec);
            }
        }
        Ok(())
    }

    /// Layered config with these flags applied on top.
    pub fn resolve(&self, paths: &EvasionPaths) -> Result<CliConfig> {
        let mut config = CliConfig::load(self.config.as_deref(), paths)?;
        self.apply(&mut config.commands)?;
        Ok(config)
    }
}

#[derive(Parser, Debug)]
#[command(about = "Print the effective configuration")]
pub struct ConfigCmd {
    #[command(flatten)]
    pub flags: CommandFlags,
}

impl ConfigCmd {
    pub fn execute(&self, paths: &EvasionPaths) -> Result<()> {
        let config = self.flags.resolve(paths)?;
        println!("{}", serde_json::to_string_pretty(&config)?);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_flags_override_file() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("cfg.json");
        std::fs::write(
            &file,
            r#"{"attack": {"query_budget": 12}, "commands": {"classifier": {"program": "old"}}}"#,
        )
        .unwrap();
        let paths = EvasionPaths::new(Some(dir.path().to_path_buf()));
        let flags = CommandFlags {
            config: Some(file),
            classifier: Some("python3 score.py --json".to_string()),
            ..Default::default()
        };

        let config = flags.resolve(&paths).unwrap();
        assert_eq!(config.attack.query_budget, 12);
        let classifier = config.classifier().unwrap();
        assert_eq!(classifier.program, "python3");
        assert_eq!(classifier.args, vec!["score.py", "--json"]);
        assert!(config.toolchain(&paths).is_err());
    }

    #[test]
    fn test_missing_explicit_config() {
        let dir = TempDir::new().unwrap();
        let paths = EvasionPaths::new(Some(dir.path().to_path_buf()));
        assert!(CliConfig::load(Some(&dir.path().join("nope.json")), &paths).is_err());
        assert!(CliConfig::load(None, &paths).is_ok());
    }
}
