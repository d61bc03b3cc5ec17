//! Command implementations

pub mod cache;
pub mod resolve;
pub mod upgrade;

use std::path::PathBuf;

use anyhow::{Context, Result};

use pkgsync::util::fs::absolutize;

/// The module root a command operates on.
pub fn module_root(path: Option<PathBuf>) -> Result<PathBuf> {
    let cwd = std::env::current_dir().context("failed to get current directory")?;
    Ok(match path {
        Some(path) => absolutize(&cwd, &path),
        None => cwd,
    })
}
