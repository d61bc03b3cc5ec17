//! Local bare mirrors of remote git repositories.
//!
//! Every remote is cloned once into `<cache>/git/<sha1(url)>` and refreshed
//! with `fetch` afterwards. Working copies are cloned from the mirror, so a
//! repository shared by several packages is only downloaded once.
//!
//! Threads of one process take a per-mirror lock. New mirrors are cloned
//! into a scratch directory next to their final path and renamed into place,
//! so other processes never see a half-written mirror.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock, Mutex};

use anyhow::{Context, Result};

use crate::util::fs::{aggressive_delete, ensure_dir};
use crate::util::git::Git;
use crate::util::hash::sha1_str;

/// Prefix of the scratch directories new mirrors are cloned into.
const CLONE_PREFIX: &str = ".clone-";

static MIRROR_LOCKS: LazyLock<Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

fn mirror_lock(path: &Path) -> Arc<Mutex<()>> {
    let mut locks = MIRROR_LOCKS.lock().unwrap_or_else(|e| e.into_inner());
    locks.entry(path.to_path_buf()).or_default().clone()
}

/// Cache of bare mirrors keyed by remote URL.
#[derive(Debug, Clone)]
pub struct MirrorCache {
    root: PathBuf,
    git: Git,
}

impl MirrorCache {
    pub fn new(root: impl Into<PathBuf>, git: Git) -> Self {
        MirrorCache {
            root: root.into(),
            git,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Where the mirror of `url` lives.
    pub fn path_for(&self, url: &str) -> PathBuf {
        self.root.join(sha1_str(url))
    }

    /// A mirror without an object store or config cannot be trusted.
    pub fn is_corrupt(path: &Path) -> bool {
        path.exists() && !(path.join("objects").is_dir() && path.join("config").is_file())
    }

    /// Clone or refresh the mirror of `url` and return its path.
    pub fn ensure(&self, url: &str) -> Result<PathBuf> {
        let path = self.path_for(url);
        let lock = mirror_lock(&path);
        let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());

        if Self::is_corrupt(&path) {
            tracing::warn!(
                "git mirror for {} at {} is corrupt, recreating it",
                url,
                path.display()
            );
            aggressive_delete(&path)?;
        }

        if path.exists() {
            tracing::debug!("refreshing mirror of {}", url);
            self.git.run(&path, ["fetch", "--prune", "origin"])?;
        } else {
            self.clone_mirror(url, &path)?;
        }

        Ok(path)
    }

    fn clone_mirror(&self, url: &str, path: &Path) -> Result<()> {
        tracing::debug!("mirroring {} into {}", url, path.display());
        ensure_dir(&self.root)?;
        let scratch = tempfile::Builder::new()
            .prefix(CLONE_PREFIX)
            .tempdir_in(&self.root)
            .with_context(|| format!("failed to create a directory in {}", self.root.display()))?;

        self.git.run(
            &self.root,
            [
                OsStr::new("clone"),
                OsStr::new("--mirror"),
                OsStr::new(url),
                scratch.path().as_os_str(),
            ],
        )?;

        if let Err(e) = std::fs::rename(scratch.path(), path) {
            // Another process finished the same mirror first
            if path.exists() && !Self::is_corrupt(path) {
                tracing::debug!("using the mirror of {} cloned concurrently", url);
                return Ok(());
            }
            return Err(e).with_context(|| {
                format!("failed to move the mirror of {} to {}", url, path.display())
            });
        }

        Ok(())
    }
}
