//! Filesystem utilities.

use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use walkdir::WalkDir;

/// Attempts made by [`aggressive_delete`] before giving up.
const DELETE_ATTEMPTS: usize = 5;

/// Delay between [`aggressive_delete`] attempts.
const DELETE_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Delete a file or directory tree, clearing read-only flags and retrying.
///
/// Git object stores are written read-only and antivirus or indexers may
/// briefly hold files open, so a plain `remove_dir_all` is not enough.
pub fn aggressive_delete(path: &Path) -> Result<()> {
    let mut last_error = None;

    for attempt in 0..DELETE_ATTEMPTS {
        if fs::symlink_metadata(path).is_err() {
            return Ok(());
        }

        clear_readonly(path);

        let result = if path.is_dir() && !is_symlink(path) {
            fs::remove_dir_all(path)
        } else {
            fs::remove_file(path)
        };

        match result {
            Ok(()) => return Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => {
                tracing::debug!(
                    "delete of {} failed (attempt {}): {}",
                    path.display(),
                    attempt + 1,
                    e
                );
                last_error = Some(e);
                thread::sleep(DELETE_RETRY_DELAY);
            }
        }
    }

    match last_error {
        Some(e) => Err(e).with_context(|| format!("failed to delete {}", path.display())),
        None => Ok(()),
    }
}

fn is_symlink(path: &Path) -> bool {
    fs::symlink_metadata(path)
        .map(|m| m.file_type().is_symlink())
        .unwrap_or(false)
}

#[allow(clippy::permissions_set_readonly_false)]
fn clear_readonly(path: &Path) {
    for entry in WalkDir::new(path).follow_links(false).into_iter().flatten() {
        if let Ok(metadata) = entry.metadata() {
            let mut perms = metadata.permissions();
            if perms.readonly() {
                perms.set_readonly(false);
                let _ = fs::set_permissions(entry.path(), perms);
            }
        }
    }
}

/// Recursively copy a directory.
pub fn copy_dir_all(src: &Path, dst: &Path) -> Result<()> {
    fs::create_dir_all(dst)
        .with_context(|| format!("failed to create directory: {}", dst.display()))?;

    for entry in fs::read_dir(src)
        .with_context(|| format!("failed to read directory: {}", src.display()))?
    {
        let entry = entry?;
        let ty = entry.file_type()?;
        let src_path = entry.path();
        let dst_path = dst.join(entry.file_name());

        if ty.is_dir() {
            copy_dir_all(&src_path, &dst_path)?;
        } else {
            fs::copy(&src_path, &dst_path).with_context(|| {
                format!(
                    "failed to copy {} to {}",
                    src_path.display(),
                    dst_path.display()
                )
            })?;
        }
    }
    Ok(())
}

/// Ensure a directory exists, creating it if necessary.
pub fn ensure_dir(path: &Path) -> Result<()> {
    if !path.exists() {
        fs::create_dir_all(path)
            .with_context(|| format!("failed to create directory: {}", path.display()))?;
    }
    Ok(())
}

/// Write bytes to a file, creating parent directories if needed.
pub fn write_bytes(path: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }
    fs::write(path, contents).with_context(|| format!("failed to write file: {}", path.display()))
}

/// Get the relative path from `base` to `path`.
pub fn relative_path(base: &Path, path: &Path) -> PathBuf {
    pathdiff::diff_paths(path, base).unwrap_or_else(|| path.to_path_buf())
}

/// Make `path` absolute against `base` without touching the filesystem.
pub fn absolutize(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

/// Join a `/`-separated archive path onto `root`, refusing to escape it.
pub fn join_archive_path(root: &Path, relative: &str) -> Option<PathBuf> {
    let mut out = root.to_path_buf();
    for part in relative.split(['/', '\\']) {
        match part {
            "" | "." => {}
            ".." => return None,
            part if part.contains(':') => return None,
            part => out.push(part),
        }
    }
    Some(out)
}
