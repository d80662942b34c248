//! Exclusive repository lock held for the duration of a cache update.

use anyhow::{Context, Result};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Lock file under `locks/`, removed on drop.
#[derive(Debug)]
pub struct RepoLock {
    path: PathBuf,
}

impl RepoLock {
    /// Take the exclusive lock on the repository at `root`.
    ///
    /// Fails if another cachesync process holds it.
    pub fn acquire(root: &Path) -> Result<Self> {
        let locks_dir = root.join("locks");
        fs::create_dir_all(&locks_dir)
            .with_context(|| format!("Failed to create {}", locks_dir.display()))?;

        let path = locks_dir.join("cachesync.lock");
        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                let holder = fs::read_to_string(&path).unwrap_or_default();
                anyhow::bail!(
                    "Repository is already locked ({}): {}",
                    path.display(),
                    holder.trim()
                );
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to create {}", path.display()));
            }
        };

        writeln!(file, "pid={}", std::process::id())?;
        debug!(path = %path.display(), "acquired repository lock");

        Ok(Self { path })
    }
}

impl Drop for RepoLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "failed to remove repository lock");
        }
    }
}
