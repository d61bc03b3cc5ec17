//! Discovery of existing working copies of a package.
//!
//! When a package is already checked out elsewhere in the module tree, the
//! orchestrator points the declaring folder at that copy with a `.redirect`
//! marker instead of fetching it again.

use std::path::{Path, PathBuf};

use crate::core::{ModuleInfo, PackageRef};
use crate::util::hash::sha1_str;
use crate::util::marker;

/// Prefix of the environment variables that pin a package to a folder.
pub const PACKAGE_ENV_PREFIX: &str = "PKGSYNC_PACKAGE_";

/// Finds an existing working copy of a package.
pub trait PackageLocator: Send + Sync {
    fn discover_existing(
        &self,
        module: &ModuleInfo,
        package: &PackageRef,
        platform: &str,
    ) -> Option<PathBuf>;
}

/// Name of the environment variable that pins `uri`.
pub fn package_env_var(uri: &str) -> String {
    format!("{}{}", PACKAGE_ENV_PREFIX, sha1_str(uri).to_uppercase())
}

/// Looks for a source checkout of the same URI in ancestor modules.
#[derive(Debug, Default)]
pub struct WorkingCopyLocator;

impl WorkingCopyLocator {
    pub fn new() -> Self {
        WorkingCopyLocator
    }
}

impl PackageLocator for WorkingCopyLocator {
    fn discover_existing(
        &self,
        module: &ModuleInfo,
        package: &PackageRef,
        _platform: &str,
    ) -> Option<PathBuf> {
        let own = module.path.join(&package.folder);

        if let Some(dir) = std::env::var_os(package_env_var(&package.uri)) {
            let dir = PathBuf::from(dir);
            if dir.is_dir() && !same_path(&dir, &own) {
                tracing::debug!("{} pinned to {} by environment", package.uri, dir.display());
                return Some(dir);
            }
        }

        for ancestor in module.path.ancestors().skip(1) {
            if !ModuleInfo::exists_at(ancestor) {
                continue;
            }
            let Ok(parent) = ModuleInfo::load(ancestor) else {
                continue;
            };

            let found = parent
                .packages
                .iter()
                .filter(|p| p.uri == package.uri)
                .map(|p| ancestor.join(&p.folder))
                .find(|candidate| marker::has_source(candidate) && !same_path(candidate, &own));

            if found.is_some() {
                return found;
            }
        }

        None
    }
}

fn same_path(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::fixtures::write_module;
    use tempfile::TempDir;

    #[test]
    fn test_finds_ancestor_checkout() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        write_module(
            root,
            "name = \"Root\"\n[[package]]\nuri = \"local-git://repo\"\nref = \"master\"\nfolder = \"Dep\"\n",
        );
        std::fs::create_dir_all(root.join("Dep/.git")).unwrap();

        let sub = root.join("Sub");
        write_module(&sub, "name = \"Sub\"\n");
        let module = ModuleInfo::load(&sub).unwrap();
        let package = PackageRef::new("local-git://repo", "master", "Dep");

        let found = WorkingCopyLocator::new().discover_existing(&module, &package, "Linux");
        assert_eq!(found, Some(root.join("Dep")));

        let other = PackageRef::new("local-git://other", "master", "Dep");
        assert!(WorkingCopyLocator::new()
            .discover_existing(&module, &other, "Linux")
            .is_none());
    }

    #[test]
    fn test_ignores_binary_only_copies() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        write_module(
            root,
            "name = \"Root\"\n[[package]]\nuri = \"https://h/Engine\"\nref = \"master\"\nfolder = \"Engine\"\n",
        );
        std::fs::create_dir_all(root.join("Engine")).unwrap();
        std::fs::write(root.join("Engine/.pkg"), "").unwrap();

        let sub = root.join("Sub");
        write_module(&sub, "name = \"Sub\"\n");
        let module = ModuleInfo::load(&sub).unwrap();
        let package = PackageRef::new("https://h/Engine", "master", "Engine");

        assert!(WorkingCopyLocator::new()
            .discover_existing(&module, &package, "Linux")
            .is_none());
    }

    #[test]
    fn test_env_var_name() {
        let name = package_env_var("hello");
        assert_eq!(name, "PKGSYNC_PACKAGE_AAF4C61DDCC5E8A2DABEDE0F3B482CD9AEA9434D");
    }
}
