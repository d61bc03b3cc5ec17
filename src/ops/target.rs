//! What a resolution strategy operates on and what it reports back.

use std::path::PathBuf;

use crate::core::{ModuleInfo, PackageError, PackageRef, PackageType};

/// One package reference being materialized into a module.
#[derive(Debug, Clone, Copy)]
pub struct ResolveTarget<'a> {
    pub module: &'a ModuleInfo,
    pub package: &'a PackageRef,
    pub platform: &'a str,
    /// Re-resolve even when a marker says the folder is up to date
    pub force: bool,
}

impl<'a> ResolveTarget<'a> {
    pub fn new(module: &'a ModuleInfo, package: &'a PackageRef, platform: &'a str) -> Self {
        ResolveTarget {
            module,
            package,
            platform,
            force: false,
        }
    }

    pub fn forced(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// The destination folder of the package.
    pub fn folder(&self) -> PathBuf {
        self.module.path.join(&self.package.folder)
    }

    /// Check the folder constraint of the package type.
    ///
    /// Templates are applied to the module root and take no folder;
    /// libraries always need one.
    pub fn check_folder(&self, package_type: PackageType) -> Result<(), PackageError> {
        match package_type {
            PackageType::Template if !self.package.folder.is_empty() => Err(
                PackageError::TemplateFolderNotEmpty(self.package.folder.clone()),
            ),
            PackageType::Library if self.package.folder.is_empty() => {
                Err(PackageError::InvalidReference {
                    uri: self.package.uri.clone(),
                    reason: "library packages need a destination folder".to_string(),
                })
            }
            _ => self.package.validate_folder(),
        }
    }
}

/// Result of one resolution strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The package was written to disk
    Installed,
    /// Markers show the package is already present
    Fresh,
    /// This strategy has nothing to work with for the metadata
    Unavailable,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_folder_constraints() {
        let module = ModuleInfo::new("Game", "/work/game");
        let library = PackageRef::new("local-git:///repo", "master", "Dep");
        let target = ResolveTarget::new(&module, &library, "Linux");

        assert_eq!(target.folder(), PathBuf::from("/work/game/Dep"));
        assert!(target.check_folder(PackageType::Library).is_ok());
        assert!(matches!(
            target.check_folder(PackageType::Template),
            Err(PackageError::TemplateFolderNotEmpty(folder)) if folder == "Dep"
        ));

        let template = PackageRef::new("local-template:///templates/app", "", "");
        let target = ResolveTarget::new(&module, &template, "Linux");
        assert!(target.check_folder(PackageType::Template).is_ok());
        assert!(target.check_folder(PackageType::Library).is_err());

        let parent = PackageRef::new("local-git:///repo", "master", "..");
        let target = ResolveTarget::new(&module, &parent, "Linux");
        assert!(target.check_folder(PackageType::Library).is_err());
        assert!(target.check_folder(PackageType::GlobalTool).is_err());
    }
}
