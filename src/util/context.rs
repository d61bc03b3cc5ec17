//! Global and per-call context.
//!
//! [`GlobalContext`] holds the directories and configuration shared by a
//! whole run. [`ResolveContext`] is threaded through every resolution call
//! and carries the nesting depth and the output sink, so nested in-process
//! resolution never touches global state.

use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};

use anyhow::{Context, Result};
use directories::ProjectDirs;

use crate::util::config::{load_config, project_config_path, Config};
use crate::util::shell::Shell;

/// Environment variable overriding the per-user data root.
pub const HOME_ENV: &str = "PKGSYNC_HOME";

/// Project directories for pkgsync
static PROJECT_DIRS: LazyLock<Option<ProjectDirs>> =
    LazyLock::new(|| ProjectDirs::from("org", "pkgsync", "pkgsync"));

/// Global context containing configuration and paths.
#[derive(Debug, Clone)]
pub struct GlobalContext {
    /// Module root the run started in
    cwd: PathBuf,

    /// Per-user data root
    home: PathBuf,

    /// Merged configuration
    config: Config,
}

impl GlobalContext {
    /// Create a context for the current directory.
    pub fn new() -> Result<Self> {
        let cwd = std::env::current_dir().context("failed to get current directory")?;
        Self::with_cwd(cwd)
    }

    /// Create a context rooted at a specific module directory.
    pub fn with_cwd(cwd: PathBuf) -> Result<Self> {
        let home = default_home();
        let config = load_config(&home.join("config.toml"), &project_config_path(&cwd));
        Ok(GlobalContext { cwd, home, config })
    }

    /// Create a context with an explicit data root and configuration.
    pub fn with_home(cwd: PathBuf, home: PathBuf, config: Config) -> Self {
        GlobalContext { cwd, home, config }
    }

    /// Get the module root directory.
    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    /// Get the per-user data root.
    pub fn home(&self) -> &Path {
        &self.home
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }

    /// Directory of the content cache.
    pub fn cache_dir(&self) -> PathBuf {
        match &self.config.cache.dir {
            Some(dir) => dir.clone(),
            None => self.home.join("cache"),
        }
    }

    /// Directory of the bare Git mirrors.
    pub fn mirror_dir(&self) -> PathBuf {
        self.cache_dir().join("git")
    }

    /// Directory of cached protocol lookups.
    pub fn lookup_dir(&self) -> PathBuf {
        self.cache_dir().join("lookup")
    }

    /// Directory global tools are installed into.
    pub fn tools_dir(&self) -> PathBuf {
        self.home.join("tools")
    }
}

fn default_home() -> PathBuf {
    if let Some(home) = std::env::var_os(HOME_ENV) {
        return PathBuf::from(home);
    }

    if let Some(dirs) = PROJECT_DIRS.as_ref() {
        dirs.data_dir().to_path_buf()
    } else {
        // Fallback to ~/.pkgsync
        directories::BaseDirs::new()
            .map(|b| b.home_dir().join(".pkgsync"))
            .unwrap_or_else(|| PathBuf::from(".pkgsync"))
    }
}

/// Maximum nesting of submodule resolution.
pub const MAX_DEPTH: usize = 32;

/// Environment variable carrying the nesting depth into child processes.
pub const DEPTH_ENV: &str = "PKGSYNC_DEPTH";

/// Per-call resolution context.
#[derive(Debug, Clone)]
pub struct ResolveContext {
    depth: usize,
    shell: Arc<Shell>,
}

impl ResolveContext {
    /// Context for a top-level resolution.
    pub fn root(shell: Shell) -> Self {
        ResolveContext {
            depth: 0,
            shell: Arc::new(shell),
        }
    }

    /// Top-level context of a process started for a nested resolution.
    pub fn at_depth(shell: Shell, depth: usize) -> Self {
        ResolveContext {
            depth,
            shell: Arc::new(shell),
        }
    }

    /// Context for a nested resolution, buffering its own output.
    pub fn nested(&self) -> Self {
        ResolveContext {
            depth: self.depth + 1,
            shell: Arc::new(self.shell.child()),
        }
    }

    /// Same depth, separate output buffer.
    pub fn buffered(&self) -> Self {
        ResolveContext {
            depth: self.depth,
            shell: Arc::new(self.shell.child()),
        }
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn is_nested(&self) -> bool {
        self.depth > 0
    }

    pub fn shell(&self) -> &Shell {
        &self.shell
    }

    /// Flush buffered output into another context.
    pub fn replay_into(&self, parent: &ResolveContext) {
        self.shell.replay_into(&parent.shell);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::shell::{Status, Verbosity};
    use tempfile::TempDir;

    #[test]
    fn test_context_paths() {
        let tmp = TempDir::new().unwrap();
        let ctx = GlobalContext::with_home(
            tmp.path().join("module"),
            tmp.path().join("home"),
            Config::default(),
        );

        assert_eq!(ctx.cache_dir(), tmp.path().join("home/cache"));
        assert_eq!(ctx.mirror_dir(), tmp.path().join("home/cache/git"));
        assert_eq!(ctx.lookup_dir(), tmp.path().join("home/cache/lookup"));
        assert_eq!(ctx.tools_dir(), tmp.path().join("home/tools"));
    }

    #[test]
    fn test_cache_dir_override() {
        let mut config = Config::default();
        config.cache.dir = Some(PathBuf::from("/srv/cache"));
        let ctx = GlobalContext::with_home(PathBuf::from("/m"), PathBuf::from("/h"), config);
        assert_eq!(ctx.cache_dir(), PathBuf::from("/srv/cache"));
    }

    #[test]
    fn test_project_config_is_loaded() {
        let tmp = TempDir::new().unwrap();
        let project = project_config_path(tmp.path());
        std::fs::create_dir_all(project.parent().unwrap()).unwrap();
        std::fs::write(&project, "[resolve]\njobs = 3\n").unwrap();

        let ctx = GlobalContext::with_cwd(tmp.path().to_path_buf()).unwrap();
        assert_eq!(ctx.config().resolve.jobs, Some(3));
    }

    #[test]
    fn test_nested_context() {
        let root = ResolveContext::root(Shell::buffered(Verbosity::Normal));
        let nested = root.nested();
        assert_eq!(nested.depth(), 1);
        assert!(nested.is_nested());

        nested.shell().status(Status::Resolved, "Inner");
        assert!(root.shell().lines().is_empty());

        nested.replay_into(&root);
        assert_eq!(root.shell().lines().len(), 1);
    }
}
