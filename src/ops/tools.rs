//! Installed global tools.
//!
//! Global tools are unpacked once per user under `<data root>/tools/` and
//! their executables are recorded in `tools/registry.json`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::util::fs::write_bytes;
use crate::util::hash::sha1_str;

/// Name of the registry file inside the tools directory.
pub const REGISTRY_FILE: &str = "registry.json";

#[derive(Debug, Default, Serialize, Deserialize)]
struct RegistryFile {
    #[serde(default)]
    tools: BTreeMap<String, PathBuf>,
}

/// Registry of installed tool executables.
#[derive(Debug, Clone)]
pub struct ToolRegistry {
    tools_dir: PathBuf,
}

impl ToolRegistry {
    pub fn new(tools_dir: impl Into<PathBuf>) -> Self {
        ToolRegistry {
            tools_dir: tools_dir.into(),
        }
    }

    /// Folder a tool package is installed into.
    pub fn install_dir(&self, uri: &str, platform: &str) -> PathBuf {
        self.tools_dir.join(sha1_str(uri)).join(platform)
    }

    fn registry_path(&self) -> PathBuf {
        self.tools_dir.join(REGISTRY_FILE)
    }

    /// All registered tools.
    pub fn load(&self) -> Result<BTreeMap<String, PathBuf>> {
        let path = self.registry_path();
        if !path.exists() {
            return Ok(BTreeMap::new());
        }

        let contents = std::fs::read(&path)
            .with_context(|| format!("failed to read tool registry: {}", path.display()))?;
        let file: RegistryFile = serde_json::from_slice(&contents)
            .with_context(|| format!("failed to parse tool registry: {}", path.display()))?;
        Ok(file.tools)
    }

    /// Path of a registered tool.
    pub fn find(&self, name: &str) -> Option<PathBuf> {
        self.load().ok()?.remove(name)
    }

    /// Discover the executables below `dir` and merge them into the registry.
    ///
    /// Returns the number of tools found in `dir`.
    pub fn register(&self, dir: &Path) -> Result<usize> {
        let found = discover_executables(dir)?;
        let count = found.len();

        let mut tools = self.load().unwrap_or_else(|e| {
            tracing::warn!("starting a fresh tool registry: {:#}", e);
            BTreeMap::new()
        });
        for (name, path) in found {
            tracing::debug!("registering tool {} at {}", name, path.display());
            tools.insert(name, path);
        }

        let bytes = serde_json::to_vec_pretty(&RegistryFile { tools })?;
        write_bytes(&self.registry_path(), &bytes)?;
        Ok(count)
    }
}

/// Executables below `dir`, keyed by tool name.
pub fn discover_executables(dir: &Path) -> Result<Vec<(String, PathBuf)>> {
    let mut found = Vec::new();

    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.with_context(|| format!("failed to walk {}", dir.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let is_exe = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("exe"));

        if is_exe || is_executable(path) {
            if let Some(stem) = path.file_stem() {
                found.push((stem.to_string_lossy().into_owned(), path.to_path_buf()));
            }
        }
    }

    Ok(found)
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(_path: &Path) -> bool {
    false
}
