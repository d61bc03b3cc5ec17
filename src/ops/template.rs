//! Applying project templates to a module.

use std::path::Path;

use anyhow::{Context, Result};
use walkdir::WalkDir;

use crate::util::fs::{ensure_dir, relative_path, write_bytes};

/// Placeholder replaced by the module name in template paths and text files.
pub const NAME_PLACEHOLDER: &str = "PROJECT_NAME";

/// Applies a staged template tree to a module root.
pub trait TemplateApplier: Send + Sync {
    fn apply(&self, template_root: &Path, destination: &Path, name: &str) -> Result<()>;
}

/// Copies the template into the destination, substituting the module name.
///
/// Existing files are never overwritten and `.git` is not copied.
#[derive(Debug, Default)]
pub struct DirectoryTemplateApplier;

impl DirectoryTemplateApplier {
    pub fn new() -> Self {
        DirectoryTemplateApplier
    }
}

impl TemplateApplier for DirectoryTemplateApplier {
    fn apply(&self, template_root: &Path, destination: &Path, name: &str) -> Result<()> {
        if !template_root.is_dir() {
            anyhow::bail!("template folder {} does not exist", template_root.display());
        }
        ensure_dir(destination)?;

        let walker = WalkDir::new(template_root)
            .min_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| e.file_name() != ".git");

        for entry in walker {
            let entry =
                entry.with_context(|| format!("failed to walk {}", template_root.display()))?;
            let relative = relative_path(template_root, entry.path())
                .to_string_lossy()
                .replace(NAME_PLACEHOLDER, name);
            let target = destination.join(relative);

            if entry.file_type().is_dir() {
                ensure_dir(&target)?;
                continue;
            }

            if target.exists() {
                tracing::debug!("template file {} already exists, keeping it", target.display());
                continue;
            }

            let bytes = std::fs::read(entry.path())
                .with_context(|| format!("failed to read {}", entry.path().display()))?;
            let bytes = match String::from_utf8(bytes) {
                Ok(text) => text.replace(NAME_PLACEHOLDER, name).into_bytes(),
                Err(e) => e.into_bytes(),
            };
            write_bytes(&target, &bytes)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_apply_substitutes_name() {
        let tmp = TempDir::new().unwrap();
        let template = tmp.path().join("template");
        std::fs::create_dir_all(template.join("PROJECT_NAME/.git")).unwrap();
        std::fs::create_dir_all(template.join(".git")).unwrap();
        std::fs::write(template.join(".git/HEAD"), "ref").unwrap();
        std::fs::write(template.join("PROJECT_NAME/PROJECT_NAME.cs"), "class PROJECT_NAME {}").unwrap();
        std::fs::write(template.join("logo.bin"), [0xffu8, 0xfe, 0x00]).unwrap();

        let dest = tmp.path().join("dest");
        DirectoryTemplateApplier::new().apply(&template, &dest, "Game").unwrap();

        assert_eq!(
            std::fs::read_to_string(dest.join("Game/Game.cs")).unwrap(),
            "class Game {}"
        );
        assert_eq!(std::fs::read(dest.join("logo.bin")).unwrap(), [0xffu8, 0xfe, 0x00]);
        assert!(!dest.join(".git").exists());
        assert!(!dest.join("Game/.git").exists());
    }

    #[test]
    fn test_apply_keeps_existing_files() {
        let tmp = TempDir::new().unwrap();
        let template = tmp.path().join("template");
        std::fs::create_dir_all(&template).unwrap();
        std::fs::write(template.join("README.md"), "template").unwrap();

        let dest = tmp.path().join("dest");
        std::fs::create_dir_all(&dest).unwrap();
        std::fs::write(dest.join("README.md"), "mine").unwrap();

        DirectoryTemplateApplier::new().apply(&template, &dest, "Game").unwrap();
        assert_eq!(std::fs::read_to_string(dest.join("README.md")).unwrap(), "mine");
    }
}
