//! Host-side management of the per-invocation IPC directories mounted into
//! the sandbox container.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, warn};

/// Default number of recent IPC directories retained across broker restarts.
pub const DEFAULT_RETAIN: usize = 50;

/// Owns the root under which every invocation's scoped IPC directory is
/// created, and prunes old ones LRU-style on startup.
pub struct IpcDirPool {
    root: PathBuf,
    retain: usize,
}

impl IpcDirPool {
    pub fn new(root: PathBuf, retain: usize) -> Self {
        Self { root, retain }
    }

    pub async fn ensure_root(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .with_context(|| format!("failed to create ipc root {}", self.root.display()))
    }

    /// Allocate a fresh, uniquely named scoped directory for one invocation.
    pub async fn allocate(&self, invocation_id: &str) -> Result<PathBuf> {
        self.ensure_root().await?;
        let dir = self.root.join(invocation_id);
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("failed to create ipc dir {}", dir.display()))?;
        Ok(dir)
    }

    /// Remove a single invocation's directory. Missing directories are not
    /// an error: the invocation may have already cleaned up.
    pub async fn release(&self, dir: &Path) {
        if let Err(e) = tokio::fs::remove_dir_all(dir).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(dir = %dir.display(), error = %e, "failed to remove ipc dir");
            }
        }
    }

    /// Keep only the `retain` most-recently-modified entries under the IPC
    /// root, deleting the rest. Intended to run once at broker startup.
    pub async fn prune_lru(&self) -> Result<usize> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e).context("failed to read ipc root"),
        };

        let mut dirs = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if let Ok(meta) = entry.metadata().await {
                if meta.is_dir() {
                    let mtime = meta.modified().unwrap_or(std::time::SystemTime::UNIX_EPOCH);
                    dirs.push((entry.path(), mtime));
                }
            }
        }

        if dirs.len() <= self.retain {
            return Ok(0);
        }

        dirs.sort_by_key(|(_, mtime)| *mtime);
        let to_remove = dirs.len() - self.retain;
        let mut removed = 0;
        for (path, _) in dirs.into_iter().take(to_remove) {
            if tokio::fs::remove_dir_all(&path).await.is_ok() {
                removed += 1;
                debug!(dir = %path.display(), "pruned stale ipc dir");
            }
        }
        Ok(removed)
    }
}
