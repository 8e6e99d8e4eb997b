//! Path utilities for the cache layout.
//!
//! ```text
//! <cache_root>/
//!   error_free/<stem>/<stem>.<inject|obfuscate|all>.json
//!   features/<stem>.json
//! ```

use anyhow::{anyhow, Result};
use evasion_types::KindTag;
use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::{Path, PathBuf};

/// Identity of an artifact for caching purposes: its file stem.
pub fn artifact_identity(artifact: &Path) -> String {
    artifact
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "artifact".to_string())
}

/// Full path of a validated manipulation record.
pub fn error_free_path(cache_root: &Path, identity: &str, tag: KindTag) -> PathBuf {
    cache_root
        .join("error_free")
        .join(identity)
        .join(format!("{}.{}.json", identity, tag.as_str()))
}

/// Full path of an extracted feature record.
pub fn feature_path(cache_root: &Path, identity: &str) -> PathBuf {
    cache_root.join("features").join(format!("{}.json", identity))
}

/// Hex-encoded SHA-256 of a file's contents.
pub fn file_sha256(path: &Path) -> Result<String> {
    let mut file = std::fs::File::open(path)
        .map_err(|e| anyhow!("Failed to open {}: {}", path.display(), e))?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file
            .read(&mut buf)
            .map_err(|e| anyhow!("Failed to read {}: {}", path.display(), e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Ensure all parent directories exist for a path.
pub fn ensure_parent_dirs(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| anyhow!("Failed to create directory {}: {}", parent.display(), e))?;
    }
    Ok(())
}

/// Write a file atomically (write to .tmp, then rename).
pub fn atomic_write(path: &Path, contents: &[u8]) -> Result<()> {
    ensure_parent_dirs(path)?;
    let tmp_path = path.with_extension(format!(
        "{}.tmp",
        path.extension().and_then(|s| s.to_str()).unwrap_or("tmp")
    ));
    std::fs::write(&tmp_path, contents)
        .map_err(|e| anyhow!("Failed to write temp file {}: {}", tmp_path.display(), e))?;
    std::fs::rename(&tmp_path, path).map_err(|e| {
        anyhow!(
            "Failed to rename {} to {}: {}",
            tmp_path.display(),
            path.display(),
            e
        )
    })?;
    Ok(())
}

/// Write a JSON file atomically (pretty printed, records are small).
pub fn atomic_write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    let json =
        serde_json::to_vec_pretty(value).map_err(|e| anyhow!("Failed to serialize JSON: {}", e))?;
    atomic_write(path, &json)
}
