//! On-disk marker files that record resolution state.
//!
//! Markers are the only state that outlives a run. They are not locks:
//! two processes resolving the same folder at once can still race.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// Binary resolution finished for this folder.
pub const BINARY: &str = ".pkg";

/// Source checkout present (file for worktrees and submodules, directory otherwise).
pub const SOURCE: &str = ".git";

/// This folder is an alias for a working copy elsewhere on disk.
pub const REDIRECT: &str = ".redirect";

pub fn has_binary(dir: &Path) -> bool {
    dir.join(BINARY).is_file()
}

pub fn has_source(dir: &Path) -> bool {
    dir.join(SOURCE).exists()
}

pub fn has_redirect(dir: &Path) -> bool {
    dir.join(REDIRECT).is_file()
}

/// Whether any resolution marker is present.
pub fn has_any(dir: &Path) -> bool {
    has_binary(dir) || has_source(dir) || has_redirect(dir)
}

/// Write an empty `.pkg` marker, creating the folder if needed.
pub fn write_binary(dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create directory: {}", dir.display()))?;
    let path = dir.join(BINARY);
    std::fs::write(&path, b"").with_context(|| format!("failed to write marker: {}", path.display()))
}

/// Point `dir` at an existing working copy.
pub fn write_redirect(dir: &Path, target: &Path) -> Result<()> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create directory: {}", dir.display()))?;
    let path = dir.join(REDIRECT);
    std::fs::write(&path, format!("{}\n", target.display()))
        .with_context(|| format!("failed to write marker: {}", path.display()))
}

/// Read the target of a `.redirect` marker.
pub fn read_redirect(dir: &Path) -> Option<PathBuf> {
    let contents = std::fs::read_to_string(dir.join(REDIRECT)).ok()?;
    let line = contents.lines().next()?.trim();
    if line.is_empty() {
        None
    } else {
        Some(PathBuf::from(line))
    }
}

/// Remove a stale `.redirect` marker. Returns whether one was removed.
pub fn remove_redirect(dir: &Path) -> bool {
    let path = dir.join(REDIRECT);
    if !path.is_file() {
        return false;
    }
    match std::fs::remove_file(&path) {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!("failed to remove stale {}: {}", path.display(), e);
            false
        }
    }
}

/// A folder that holds files but no resolution marker.
///
/// Such a folder was not created by package resolution and must not be
/// touched unless the caller forces it.
pub fn is_unsafe_destination(dir: &Path) -> bool {
    if !dir.is_dir() || has_any(dir) {
        return false;
    }
    std::fs::read_dir(dir)
        .map(|mut entries| entries.next().is_some())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_redirect_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("Dep");
        write_redirect(&dir, Path::new("/work/other/Dep")).unwrap();

        assert!(has_redirect(&dir));
        assert_eq!(read_redirect(&dir), Some(PathBuf::from("/work/other/Dep")));
        assert!(remove_redirect(&dir));
        assert!(!has_redirect(&dir));
        assert!(!remove_redirect(&dir));
    }

    #[test]
    fn test_unsafe_destination() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("Dep");

        assert!(!is_unsafe_destination(&dir));

        std::fs::create_dir_all(&dir).unwrap();
        assert!(!is_unsafe_destination(&dir));

        std::fs::write(dir.join("notes.txt"), "mine").unwrap();
        assert!(is_unsafe_destination(&dir));

        write_binary(&dir).unwrap();
        assert!(!is_unsafe_destination(&dir));
    }

    #[test]
    fn test_git_file_counts_as_source() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join(".git"), "gitdir: ../.git/modules/dep").unwrap();
        assert!(has_source(tmp.path()));
    }
}
