//! Configuration file support.
//!
//! Two configuration file locations are read:
//! - Global: `<data root>/config.toml` - User-wide defaults
//! - Project: `<module>/.pkgsync/config.toml` - Module-specific overrides
//!
//! Project config takes precedence over global config. Command-line flags
//! take precedence over both.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::util::retry::RetryPolicy;

/// Resolver configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Resolution settings
    pub resolve: ResolveConfig,

    /// Network settings
    pub net: NetConfig,

    /// Cache settings
    pub cache: CacheConfig,
}

/// Resolution-related configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolveConfig {
    /// Look packages up in parallel
    pub parallel: Option<bool>,

    /// Worker threads for parallel lookups (None = one per CPU)
    pub jobs: Option<usize>,

    /// Refuse to touch unmarked, non-empty package folders
    pub safe_resolve: Option<bool>,

    /// Check out sources even when a binary is available
    pub prefer_source: Option<bool>,
}

/// Network-related configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NetConfig {
    /// Attempts per download before giving up
    pub retry_attempts: Option<usize>,

    /// First backoff delay in milliseconds
    pub retry_initial_delay_ms: Option<u64>,

    /// Backoff ceiling in milliseconds
    pub retry_max_delay_ms: Option<u64>,

    /// HTTP request timeout in seconds
    pub timeout_secs: Option<u64>,

    /// Offline mode (only cached lookups and archives)
    #[serde(default)]
    pub offline: bool,
}

/// Cache-related configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Override for the cache directory
    pub dir: Option<PathBuf>,
}

impl NetConfig {
    /// Backoff policy described by this configuration.
    pub fn retry_policy(&self) -> RetryPolicy {
        let defaults = RetryPolicy::default();
        RetryPolicy {
            max_attempts: self.retry_attempts.unwrap_or(defaults.max_attempts),
            initial_delay: self
                .retry_initial_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.initial_delay),
            max_delay: self
                .retry_max_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.max_delay),
        }
    }

    /// HTTP request timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.unwrap_or(60))
    }
}

impl Config {
    /// Load configuration from a file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;

        toml::from_str(&contents)
            .with_context(|| format!("failed to parse config file: {}", path.display()))
    }

    /// Load configuration with fallback to defaults if file doesn't exist.
    pub fn load_or_default(path: &Path) -> Self {
        if path.exists() {
            Self::load(path).unwrap_or_else(|e| {
                tracing::warn!("Failed to load config from {}: {}", path.display(), e);
                Self::default()
            })
        } else {
            Self::default()
        }
    }

    /// Merge another config into this one (other takes precedence).
    pub fn merge(&mut self, other: Config) {
        // Resolve settings
        if other.resolve.parallel.is_some() {
            self.resolve.parallel = other.resolve.parallel;
        }
        if other.resolve.jobs.is_some() {
            self.resolve.jobs = other.resolve.jobs;
        }
        if other.resolve.safe_resolve.is_some() {
            self.resolve.safe_resolve = other.resolve.safe_resolve;
        }
        if other.resolve.prefer_source.is_some() {
            self.resolve.prefer_source = other.resolve.prefer_source;
        }

        // Net settings
        if other.net.retry_attempts.is_some() {
            self.net.retry_attempts = other.net.retry_attempts;
        }
        if other.net.retry_initial_delay_ms.is_some() {
            self.net.retry_initial_delay_ms = other.net.retry_initial_delay_ms;
        }
        if other.net.retry_max_delay_ms.is_some() {
            self.net.retry_max_delay_ms = other.net.retry_max_delay_ms;
        }
        if other.net.timeout_secs.is_some() {
            self.net.timeout_secs = other.net.timeout_secs;
        }
        if other.net.offline {
            self.net.offline = true;
        }

        // Cache settings
        if other.cache.dir.is_some() {
            self.cache.dir = other.cache.dir;
        }
    }
}

/// Load merged configuration from global and project locations.
///
/// Order of precedence (highest to lowest):
/// 1. Project config (.pkgsync/config.toml)
/// 2. Global config (<data root>/config.toml)
/// 3. Defaults
pub fn load_config(global_path: &Path, project_path: &Path) -> Config {
    let mut config = Config::default();

    if global_path.exists() {
        config.merge(Config::load_or_default(global_path));
    }

    if project_path.exists() {
        config.merge(Config::load_or_default(project_path));
    }

    config
}

/// Get the project config path (.pkgsync/config.toml).
pub fn project_config_path(module_root: &Path) -> PathBuf {
    module_root.join(".pkgsync").join("config.toml")
}
