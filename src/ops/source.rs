//! Source resolution: git checkouts and template folders.

use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};

use crate::core::{PackageError, PackageMetadata, PackageType};
use crate::ops::mirror::MirrorCache;
use crate::ops::target::{Outcome, ResolveTarget};
use crate::ops::template::{DirectoryTemplateApplier, TemplateApplier};
use crate::util::fs::{absolutize, aggressive_delete, ensure_dir};
use crate::util::git::{is_local_uri, mark_ignored, unmark_ignored, Git};
use crate::util::process::find_executable;
use crate::util::shell::Status;
use crate::util::{GlobalContext, ResolveContext};

/// Prefix of the scratch folders templates are staged in.
pub const STAGING_PREFIX: &str = ".pkgsync-staging-";

/// Materializes packages from version-controlled source.
pub struct SourceResolver {
    mirror_root: PathBuf,
    git: Option<Git>,
    applier: Arc<dyn TemplateApplier>,
}

impl SourceResolver {
    pub fn new(gctx: &GlobalContext) -> Self {
        SourceResolver {
            mirror_root: gctx.mirror_dir(),
            git: find_executable("git").map(Git::with_program),
            applier: Arc::new(DirectoryTemplateApplier::new()),
        }
    }

    pub fn with_applier(mut self, applier: Arc<dyn TemplateApplier>) -> Self {
        self.applier = applier;
        self
    }

    pub fn applier(&self) -> &Arc<dyn TemplateApplier> {
        &self.applier
    }

    fn git(&self) -> Result<&Git> {
        self.git
            .as_ref()
            .context("git was not found on PATH; it is required for source packages")
    }

    fn mirrors(&self) -> Result<MirrorCache> {
        Ok(MirrorCache::new(&self.mirror_root, self.git()?.clone()))
    }

    /// Resolve `metadata` from source into the target folder.
    ///
    /// Returns [`Outcome::Unavailable`] when the metadata carries no source form.
    pub fn resolve(
        &self,
        ctx: &ResolveContext,
        target: &ResolveTarget<'_>,
        metadata: &PackageMetadata,
    ) -> Result<Outcome> {
        let (url, git_ref, package_type) = match metadata {
            PackageMetadata::Git(m) => (m.clone_uri.as_str(), m.git_ref.as_str(), m.package_type),
            PackageMetadata::Native(m) => match &m.source_uri {
                Some(uri) => (uri.as_str(), m.commit.as_str(), m.package_type),
                None => return Ok(Outcome::Unavailable),
            },
            PackageMetadata::NuGetV3(m) => match &m.source {
                Some(source) => (source.git_uri.as_str(), source.commit.as_str(), m.package_type),
                None => return Ok(Outcome::Unavailable),
            },
            PackageMetadata::Folder(m) => return self.apply_folder(ctx, target, &m.path),
            PackageMetadata::Transformed(_) => return Ok(Outcome::Unavailable),
        };

        target.check_folder(package_type)?;
        let url = self.clone_url(target, url);

        match package_type {
            PackageType::Library => self.checkout_library(ctx, target, &url, git_ref),
            PackageType::Template => self.checkout_template(ctx, target, &url, git_ref),
            PackageType::GlobalTool => Err(PackageError::UnsupportedCombination {
                strategy: "source",
                metadata: metadata.kind(),
                package_type,
            }
            .into()),
        }
    }

    /// Relative local repository paths are taken from the module root.
    fn clone_url(&self, target: &ResolveTarget<'_>, url: &str) -> String {
        if is_local_uri(url) && !url.starts_with("file://") {
            absolutize(&target.module.path, Path::new(url))
                .to_string_lossy()
                .into_owned()
        } else {
            url.to_string()
        }
    }

    fn checkout_library(
        &self,
        ctx: &ResolveContext,
        target: &ResolveTarget<'_>,
        url: &str,
        git_ref: &str,
    ) -> Result<Outcome> {
        let dest = target.folder();

        if dest.join(".git").exists() && !target.force {
            ctx.shell()
                .verbose(Status::Fresh, format!("{} ({})", target.package, dest.display()));
            return Ok(Outcome::Fresh);
        }

        let git = self.git()?;
        ensure_dir(&target.module.path)?;

        mark_ignored(&dest)?;
        aggressive_delete(&dest)?;
        unmark_ignored(&dest)?;

        ctx.shell()
            .status(Status::Cloning, format!("{} at {}", url, git_ref));
        self.clone_into(git, url, git_ref, &dest)?;

        mark_ignored(&dest)?;
        Ok(Outcome::Installed)
    }

    fn checkout_template(
        &self,
        ctx: &ResolveContext,
        target: &ResolveTarget<'_>,
        url: &str,
        git_ref: &str,
    ) -> Result<Outcome> {
        let git = self.git()?;
        let staging = staging_dir(&target.module.path)?;

        ctx.shell()
            .status(Status::Cloning, format!("template {} at {}", url, git_ref));
        self.clone_into(git, url, git_ref, staging.path())?;

        ctx.shell()
            .status(Status::Applying, format!("template to {}", target.module.name));
        self.applier
            .apply(staging.path(), &target.module.path, &target.module.name)?;
        Ok(Outcome::Installed)
    }

    fn apply_folder(
        &self,
        ctx: &ResolveContext,
        target: &ResolveTarget<'_>,
        path: &Path,
    ) -> Result<Outcome> {
        target.check_folder(PackageType::Template)?;
        let path = absolutize(&target.module.path, path);

        ctx.shell().status(
            Status::Applying,
            format!("template {} to {}", path.display(), target.module.name),
        );
        self.applier
            .apply(&path, &target.module.path, &target.module.name)?;
        Ok(Outcome::Installed)
    }

    /// Clone `url` through its mirror into `dest` and check out `git_ref`.
    fn clone_into(&self, git: &Git, url: &str, git_ref: &str, dest: &Path) -> Result<()> {
        let mirrors = self.mirrors()?;
        let mirror = mirrors.ensure(url)?;

        let parent = dest
            .parent()
            .with_context(|| format!("{} has no parent directory", dest.display()))?;
        ensure_dir(parent)?;

        git.run(
            parent,
            [
                OsStr::new("clone"),
                OsStr::new("--no-checkout"),
                mirror.as_os_str(),
                dest.as_os_str(),
            ],
        )?;
        git.run(dest, ["checkout", "-f", git_ref])?;
        git.run(dest, ["remote", "set-url", "origin", url])?;

        update_submodules(git, &mirrors, dest)
    }
}

/// A scratch folder in the module root, removed on drop.
pub fn staging_dir(module_root: &Path) -> Result<tempfile::TempDir> {
    ensure_dir(module_root)?;
    tempfile::Builder::new()
        .prefix(STAGING_PREFIX)
        .tempdir_in(module_root)
        .with_context(|| format!("failed to create staging folder in {}", module_root.display()))
}

#[derive(Debug, Default)]
struct SubmoduleEntry {
    path: Option<String>,
    url: Option<String>,
}

/// Initialize the submodules of `dir`, cloning each one through its mirror.
fn update_submodules(git: &Git, mirrors: &MirrorCache, dir: &Path) -> Result<()> {
    if !dir.join(".gitmodules").is_file() {
        return Ok(());
    }

    let listing = git.run(dir, ["config", "-f", ".gitmodules", "--list"])?;
    let submodules = parse_gitmodules(&listing);
    if submodules.is_empty() {
        return Ok(());
    }

    git.run(dir, ["submodule", "init"])?;

    for (name, entry) in &submodules {
        let Some(url) = &entry.url else { continue };
        // relative URLs resolve against origin
        if url.starts_with("./") || url.starts_with("../") {
            continue;
        }
        let mirror = mirrors.ensure(url)?;
        tracing::debug!("submodule {} uses mirror {}", name, mirror.display());
        git.run(
            dir,
            [
                OsStr::new("config"),
                OsStr::new(&format!("submodule.{}.url", name)),
                mirror.as_os_str(),
            ],
        )?;
    }

    git.run(
        dir,
        ["-c", "protocol.file.allow=always", "submodule", "update"],
    )?;
    git.run(dir, ["submodule", "sync"])?;

    for entry in submodules.values() {
        if let Some(path) = &entry.path {
            update_submodules(git, mirrors, &dir.join(path))?;
        }
    }

    Ok(())
}

/// Parse `git config --list` output of a `.gitmodules` file.
fn parse_gitmodules(listing: &str) -> BTreeMap<String, SubmoduleEntry> {
    let mut submodules: BTreeMap<String, SubmoduleEntry> = BTreeMap::new();

    for line in listing.lines() {
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let Some(rest) = key.strip_prefix("submodule.") else {
            continue;
        };
        if let Some(name) = rest.strip_suffix(".url") {
            submodules.entry(name.to_string()).or_default().url = Some(value.to_string());
        } else if let Some(name) = rest.strip_suffix(".path") {
            submodules.entry(name.to_string()).or_default().path = Some(value.to_string());
        }
    }

    submodules
}
