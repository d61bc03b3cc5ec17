//! Module descriptions - the tree that declares package references.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::core::errors::PackageError;
use crate::core::PackageRef;
use crate::util::marker;

/// Module description file, relative to the module root.
pub const MODULE_FILE: &str = "Build/Module.toml";

/// Legacy module description, only used to recognise nested modules.
pub const LEGACY_MODULE_FILE: &str = "Build/Module.xml";

/// Feature flag that turns on safe resolution for a module.
pub const SAFE_RESOLVE_FEATURE: &str = "safe-resolve";

/// A module and the packages it declares.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleInfo {
    /// Module name
    pub name: String,

    /// Declared package references
    #[serde(default, rename = "package")]
    pub packages: Vec<PackageRef>,

    /// Enabled features; `None` means the module predates feature lists
    #[serde(default)]
    pub features: Option<Vec<String>>,

    /// Module root directory
    #[serde(skip)]
    pub path: PathBuf,
}

impl ModuleInfo {
    /// Create an in-memory module rooted at `path`.
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        ModuleInfo {
            name: name.into(),
            packages: Vec::new(),
            features: None,
            path: path.into(),
        }
    }

    /// Add a package reference.
    pub fn with_package(mut self, package: PackageRef) -> Self {
        self.packages.push(package);
        self
    }

    /// Load the module rooted at `root`.
    pub fn load(root: &Path) -> Result<Self> {
        let file = root.join(MODULE_FILE);
        let contents = std::fs::read_to_string(&file)
            .with_context(|| format!("failed to read module description: {}", file.display()))?;

        Self::parse(root, &contents)
            .with_context(|| format!("failed to parse module description: {}", file.display()))
    }

    /// Parse a module description for a module rooted at `root`.
    pub fn parse(root: &Path, contents: &str) -> Result<Self> {
        let mut module: ModuleInfo = toml::from_str(contents)?;
        module.path = root.to_path_buf();
        for package in &mut module.packages {
            package.normalize();
        }
        Ok(module)
    }

    /// Whether `root` holds a module description.
    pub fn exists_at(root: &Path) -> bool {
        root.join(MODULE_FILE).is_file()
    }

    /// Whether a feature is enabled, or `None` when the module has no feature list.
    pub fn feature_enabled(&self, feature: &str) -> Option<bool> {
        self.features
            .as_ref()
            .map(|features| features.iter().any(|f| f.eq_ignore_ascii_case(feature)))
    }

    /// Package references that apply to `platform`.
    pub fn packages_for<'a>(&'a self, platform: &'a str) -> impl Iterator<Item = &'a PackageRef> {
        self.packages.iter().filter(move |p| p.is_applicable(platform))
    }

    /// Find a declared package by exact or partial URI.
    ///
    /// An exact match always wins. Otherwise a single reference whose URI
    /// contains `query` is returned, and several are an error.
    pub fn find_package(&self, query: &str) -> Result<Option<&PackageRef>, PackageError> {
        if let Some(exact) = self.packages.iter().find(|p| p.uri == query) {
            return Ok(Some(exact));
        }

        let matches: Vec<&PackageRef> = self
            .packages
            .iter()
            .filter(|p| p.uri.contains(query))
            .collect();

        match matches.len() {
            0 => Ok(None),
            1 => Ok(Some(matches[0])),
            _ => Err(PackageError::AmbiguousReference {
                query: query.to_string(),
                candidates: matches.iter().map(|p| p.uri.clone()).collect(),
            }),
        }
    }

    /// Discover the submodules below this module for `platform`.
    ///
    /// A submodule is an immediate child directory with its own module
    /// description, or a binary package folder whose platform directory
    /// holds one.
    pub fn discover_submodules(&self, platform: &str) -> Result<Vec<ModuleInfo>> {
        let mut dirs = Vec::new();
        let entries = match std::fs::read_dir(&self.path) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("failed to read module directory: {}", self.path.display())
                })
            }
        };

        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            if entry.file_name().to_string_lossy().starts_with('.') {
                continue;
            }

            let dir = entry.path();
            if Self::exists_at(&dir) {
                dirs.push(dir);
            } else if marker::has_binary(&dir) && Self::exists_at(&dir.join(platform)) {
                dirs.push(dir.join(platform));
            }
        }

        dirs.sort();
        dirs.iter().map(|dir| Self::load(dir)).collect()
    }
}

/// Whether an extracted payload is itself a module with its own packages.
pub fn is_nested_module(dir: &Path) -> bool {
    (dir.join(MODULE_FILE).is_file() || dir.join(LEGACY_MODULE_FILE).is_file())
        && dir.join("Build").join("Projects").is_dir()
}
