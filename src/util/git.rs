//! Thin wrappers around the external `git` client.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::core::PackageError;
use crate::util::process::{find_executable, ProcessBuilder};

/// Handle to the `git` executable.
#[derive(Debug, Clone)]
pub struct Git {
    program: PathBuf,
}

impl Git {
    /// Locate `git` on PATH.
    pub fn find() -> Result<Self> {
        let program = find_executable("git")
            .context("git was not found on PATH; it is required for source packages")?;
        Ok(Git { program })
    }

    /// Use a specific git executable.
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Git {
            program: program.into(),
        }
    }

    /// Run git in `cwd` and return its stdout.
    ///
    /// A non-zero exit code is fatal and is never retried.
    pub fn run<I, S>(&self, cwd: &Path, args: I) -> Result<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<std::ffi::OsStr>,
    {
        let builder = ProcessBuilder::new(&self.program)
            .args(args)
            .cwd(cwd)
            .env("GIT_TERMINAL_PROMPT", "0");

        tracing::debug!("running `{}` in {}", builder.display_command(), cwd.display());
        let output = builder.exec()?;

        if !output.status.success() {
            return Err(PackageError::VcsFailed {
                command: builder.display_command(),
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            }
            .into());
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// List the branches of a remote repository as `(name, commit)` pairs.
pub fn list_remote_branches(url: &str) -> Result<Vec<(String, String)>> {
    let mut remote = git2::Remote::create_detached(url)
        .with_context(|| format!("invalid git remote: {}", url))?;
    remote
        .connect(git2::Direction::Fetch)
        .with_context(|| format!("failed to connect to {}", url))?;

    let branches = remote
        .list()?
        .iter()
        .filter_map(|head| {
            head.name()
                .strip_prefix("refs/heads/")
                .map(|branch| (branch.to_string(), head.oid().to_string()))
        })
        .collect();

    remote.disconnect()?;
    Ok(branches)
}

/// Whether `uri` names a path on disk rather than a remote.
pub fn is_local_uri(uri: &str) -> bool {
    if uri.contains("://") {
        return uri.starts_with("file://");
    }
    // scp-like `user@host:path`, but not a Windows drive letter
    match uri.find(':') {
        Some(1) => true,
        Some(colon) => uri[..colon].contains(['/', '\\']),
        None => true,
    }
}

/// Add `folder` to the `.gitignore` next to it so the surrounding
/// repository does not see it as an untracked nested repository.
pub fn mark_ignored(folder: &Path) -> Result<()> {
    let Some((ignore_file, entry)) = ignore_entry(folder) else {
        return Ok(());
    };

    let existing = std::fs::read_to_string(&ignore_file).unwrap_or_default();
    if existing.lines().any(|line| line.trim() == entry) {
        return Ok(());
    }

    let mut contents = existing;
    if !contents.is_empty() && !contents.ends_with('\n') {
        contents.push('\n');
    }
    contents.push_str(&entry);
    contents.push('\n');

    std::fs::write(&ignore_file, contents)
        .with_context(|| format!("failed to update {}", ignore_file.display()))
}

/// Remove the `.gitignore` entry added by [`mark_ignored`].
pub fn unmark_ignored(folder: &Path) -> Result<()> {
    let Some((ignore_file, entry)) = ignore_entry(folder) else {
        return Ok(());
    };

    let Ok(existing) = std::fs::read_to_string(&ignore_file) else {
        return Ok(());
    };

    if !existing.lines().any(|line| line.trim() == entry) {
        return Ok(());
    }

    let kept: Vec<&str> = existing.lines().filter(|line| line.trim() != entry).collect();
    let mut contents = kept.join("\n");
    if !contents.is_empty() {
        contents.push('\n');
    }

    std::fs::write(&ignore_file, contents)
        .with_context(|| format!("failed to update {}", ignore_file.display()))
}

fn ignore_entry(folder: &Path) -> Option<(PathBuf, String)> {
    let parent = folder.parent()?;
    let name = folder.file_name()?.to_string_lossy();
    if !parent.is_dir() {
        return None;
    }
    Some((parent.join(".gitignore"), format!("/{}/", name)))
}
