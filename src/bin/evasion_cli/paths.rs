use std::path::PathBuf;

/// Base directory for configuration, caches and logs.
pub fn evasion_home() -> PathBuf {
    std::env::var("APK_EVASION_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".apk-evasion")
        })
}

#[derive(Debug, Clone)]
pub struct EvasionPaths {
    pub base: PathBuf,
}

impl EvasionPaths {
    pub fn new(base: Option<PathBuf>) -> Self {
        Self {
            base: base.unwrap_or_else(evasion_home),
        }
    }

    pub fn config_file(&self) -> PathBuf {
        self.base.join("config.json")
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.base.join("cache")
    }

    pub fn work_dir(&self) -> PathBuf {
        self.base.join("work")
    }

    pub fn results_log(&self) -> PathBuf {
        self.base.join("logs").join("results.jsonl")
    }
}
