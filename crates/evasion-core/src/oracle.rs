//! Classifier invoked as an external command.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use tracing::debug;

use crate::interfaces::{Label, Oracle, Verdict};
use crate::process::{self, CommandSpec};

/// Expected stdout of the classifier command.
#[derive(Debug, Deserialize)]
struct ClassifierOutput {
    label: i64,
    score: f64,
}

/// Runs `<program> <args..> <artifact>` and parses `{"label": 0|1, "score": f64}`.
pub struct CommandOracle {
    command: CommandSpec,
    timeout: Option<Duration>,
    queries: AtomicU64,
}

impl CommandOracle {
    pub fn new(command: CommandSpec) -> Self {
        Self {
            command,
            timeout: None,
            queries: AtomicU64::new(0),
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Classifier invocations so far, including failed ones.
    pub fn queries(&self) -> u64 {
        self.queries.load(Ordering::Relaxed)
    }
}

/// Parse classifier stdout. The last non-empty line must be the JSON verdict.
pub fn parse_verdict(stdout: &str) -> Result<Verdict> {
    let line = stdout
        .lines()
        .rev()
        .find(|l| !l.trim().is_empty())
        .ok_or_else(|| anyhow!("classifier produced no output"))?;
    let output: ClassifierOutput =
        serde_json::from_str(line.trim()).with_context(|| format!("unparsable verdict: {}", line.trim()))?;
    if !output.score.is_finite() {
        return Err(anyhow!("non-finite score {}", output.score));
    }
    Ok(Verdict::new(Label::from_code(output.label), output.score))
}

impl Oracle for CommandOracle {
    fn classify(&self, artifact: &Path) -> Result<Verdict> {
        self.queries.fetch_add(1, Ordering::Relaxed);
        let args = self.command.render_args(artifact, None);
        let output = process::run(&self.command.program, &args, &[], self.timeout)
            .map_err(|e| anyhow!("classifier failed on {}: {}", artifact.display(), e))?;
        let verdict = parse_verdict(&output.stdout)?;
        debug!(artifact = %artifact.display(), label = %verdict.label, score = verdict.score, "classified");
        Ok(verdict)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_verdict() {
        let v = parse_verdict("loading model...\n{\"label\": 1, \"score\": 0.93}\n\n").unwrap();
        assert_eq!(v.label, Label::Malicious);
        assert!((v.score - 0.93).abs() < 1e-12);

        let v = parse_verdict("{\"label\":0,\"score\":-1.5}").unwrap();
        assert!(v.label.is_benign());

        assert!(parse_verdict("").is_err());
        assert!(parse_verdict("{\"label\": 1}").is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_command_oracle() {
        let oracle = CommandOracle::new(CommandSpec::new("sh").with_args([
            "-c",
            "echo '{\"label\": 0, \"score\": 0.1}'",
            "_",
            "{input}",
        ]));
        let verdict = oracle.classify(Path::new("x.apk")).unwrap();
        assert_eq!(verdict, Verdict::new(Label::Benign, 0.1));
        assert_eq!(oracle.queries(), 1);

        let failing = CommandOracle::new(CommandSpec::parse("false").unwrap());
        assert!(failing.classify(Path::new("x.apk")).is_err());
    }
}
