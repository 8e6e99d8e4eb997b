//! Append-only JSONL log of attack records.

use anyhow::{Context, Result};
use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::attack::AttackRecord;

/// One line of the results log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogLine {
    pub ts: String,
    pub run_id: String,
    #[serde(flatten)]
    pub record: AttackRecord,
}

#[derive(Debug)]
pub struct ResultsLog {
    path: PathBuf,
    run_id: String,
    file: Mutex<Option<File>>,
}

impl ResultsLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            run_id: uuid::Uuid::new_v4().to_string(),
            file: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn append(&self, record: &AttackRecord) -> Result<()> {
        let mut guard = self.file.lock();
        if guard.is_none() {
            if let Some(parent) = self.path.parent() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .with_context(|| format!("Failed to open {}", self.path.display()))?;
            *guard = Some(file);
        }

        if let Some(file) = guard.as_mut() {
            let line = LogLine {
                ts: Utc::now().to_rfc3339(),
                run_id: self.run_id.clone(),
                record: record.clone(),
            };
            writeln!(file, "{}", serde_json::to_string(&line)?)?;
        }
        Ok(())
    }

    /// Read every line of a results log.
    pub fn read_all(path: &Path) -> Result<Vec<LogLine>> {
        let content = fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
        content
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| serde_json::from_str(l).context("Failed to parse results log line"))
            .collect()
    }
}
