//! Indexed, disposable working copies of a decoded artifact.
//!
//! Manipulations edit the decoded tree in place, so every attempt works on
//! its own copy `<decoded>_manip_<idx>`. The canonical tree is never touched.

use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{trace, warn};

/// Top-level directory shared by link instead of copied.
const SHARED_DIR: &str = "assets";

pub struct WorkingCopyArena {
    canonical: PathBuf,
}

impl WorkingCopyArena {
    pub fn new(canonical: impl Into<PathBuf>) -> Self {
        Self {
            canonical: canonical.into(),
        }
    }

    pub fn canonical(&self) -> &Path {
        &self.canonical
    }

    /// Path of the working copy for `attempt`.
    pub fn path_for(&self, attempt: usize) -> PathBuf {
        let mut name = OsString::from(self.canonical.as_os_str());
        name.push(format!("_manip_{}", attempt));
        PathBuf::from(name)
    }

    /// Fresh copy of the canonical tree for `attempt`, removed when the guard drops.
    pub fn checkout(&self, attempt: usize) -> io::Result<WorkingCopy> {
        let path = self.path_for(attempt);
        remove_tree(&path)?;
        copy_tree(&self.canonical, &path, true)?;
        trace!(attempt, path = %path.display(), "working copy ready");
        Ok(WorkingCopy { path })
    }

    /// Remove the working copy of one attempt, if any.
    pub fn clean(&self, attempt: usize) {
        if let Err(e) = remove_tree(&self.path_for(attempt)) {
            warn!(attempt, error = %e, "failed to remove working copy");
        }
    }

    /// Remove every working copy and the canonical tree.
    pub fn clean_all(&self) {
        let prefix = {
            let mut p = OsString::from(
                self.canonical
                    .file_name()
                    .unwrap_or_default(),
            );
            p.push("_manip_");
            p
        };
        if let Some(parent) = self.canonical.parent() {
            if let Ok(entries) = std::fs::read_dir(parent) {
                for entry in entries.flatten() {
                    let name = entry.file_name();
                    if name.to_string_lossy().starts_with(&*prefix.to_string_lossy()) {
                        if let Err(e) = remove_tree(&entry.path()) {
                            warn!(path = %entry.path().display(), error = %e, "failed to remove working copy");
                        }
                    }
                }
            }
        }
        if let Err(e) = remove_tree(&self.canonical) {
            warn!(path = %self.canonical.display(), error = %e, "failed to remove decoded tree");
        }
    }
}

/// A checked-out working copy. Dropping it deletes the directory.
#[derive(Debug)]
pub struct WorkingCopy {
    path: PathBuf,
}

impl WorkingCopy {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for WorkingCopy {
    fn drop(&mut self) {
        if let Err(e) = remove_tree(&self.path) {
            warn!(path = %self.path.display(), error = %e, "failed to remove working copy");
        }
    }
}

fn remove_tree(path: &Path) -> io::Result<()> {
    match std::fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => std::fs::remove_dir_all(path),
        Ok(_) => std::fs::remove_file(path),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

fn copy_tree(from: &Path, to: &Path, top_level: bool) -> io::Result<()> {
    std::fs::create_dir_all(to)?;
    for entry in std::fs::read_dir(from)? {
        let entry = entry?;
        let source = entry.path();
        let target = to.join(entry.file_name());
        let file_type = entry.file_type()?;

        if top_level && file_type.is_dir() && entry.file_name() == SHARED_DIR && link_dir(&source, &target).is_ok() {
            continue;
        }
        if file_type.is_dir() {
            copy_tree(&source, &target, false)?;
        } else if file_type.is_symlink() {
            let dest = std::fs::read_link(&source)?;
            if link_dir(&dest, &target).is_err() {
                std::fs::copy(&source, &target)?;
            }
        } else {
            std::fs::copy(&source, &target)?;
        }
    }
    Ok(())
}

#[cfg(unix)]
fn link_dir(source: &Path, target: &Path) -> io::Result<()> {
    let source = std::fs::canonicalize(source).unwrap_or_else(|_| source.to_path_buf());
    std::os::unix::fs::symlink(source, target)
}

#[cfg(not(unix))]
fn link_dir(_source: &Path, _target: &Path) -> io::Result<()> {
    Err(io::Error::new(io::ErrorKind::Unsupported, "symlinks not supported"))
}
