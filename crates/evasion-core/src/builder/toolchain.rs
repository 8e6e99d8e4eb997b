//! External decode / build / sign / align toolchain.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::BuildError;
use crate::process::{self, CommandSpec, ProcessError};

/// How the canonical decoded tree is produced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodePolicy {
    /// Do not decode resources (manifest stays binary, res/ untouched).
    pub skip_resources: bool,
    /// Decode only the primary dex file.
    pub only_main_dex: bool,
}

impl DecodePolicy {
    pub fn degraded(self) -> Self {
        Self {
            skip_resources: true,
            ..self
        }
    }

    /// Policy flags passed to the decode command as environment variables.
    pub fn envs(&self) -> Vec<(&'static str, String)> {
        let flag = |on: bool| if on { "1" } else { "0" }.to_string();
        vec![
            ("APK_EVASION_SKIP_RESOURCES", flag(self.skip_resources)),
            ("APK_EVASION_ONLY_MAIN_DEX", flag(self.only_main_dex)),
        ]
    }
}

/// Commands and directories of the rebuild toolchain.
///
/// `decode` receives `{input}` = artifact and `{output}` = decoded directory;
/// `build` receives the working copy and the output artifact; `sign` and
/// `align` receive the output artifact and edit it in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolchainConfig {
    pub decode: CommandSpec,
    pub build: CommandSpec,
    #[serde(default)]
    pub sign: Option<CommandSpec>,
    #[serde(default)]
    pub align: Option<CommandSpec>,
    /// Parent directory of decoded trees and their working copies.
    pub work_dir: PathBuf,
    /// Where rebuilt artifacts are written.
    pub output_dir: PathBuf,
    /// Per-step timeout in seconds.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl ToolchainConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }

    /// Run one toolchain step.
    pub fn run_step(
        &self,
        step: &str,
        spec: &CommandSpec,
        input: &Path,
        output: Option<&Path>,
        envs: &[(&str, String)],
    ) -> Result<(), BuildError> {
        let args = spec.render_args(input, output);
        debug!(step, program = %spec.program, "toolchain step");
        match process::run(&spec.program, &args, envs, self.timeout()) {
            Ok(_) => Ok(()),
            Err(ProcessError::TimedOut { secs, .. }) => Err(BuildError::timeout(step, secs)),
            Err(e) => Err(BuildError::new(format!("{} step failed: {}", step, e))),
        }
    }
}
