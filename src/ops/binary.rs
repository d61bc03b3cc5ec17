//! Binary resolution: prebuilt archives unpacked into the module.
//!
//! Archives are fetched from the package cache, from disk for local
//! archive packages, or downloaded and cached. Metadata without a binary
//! form is handed to source resolution.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};

use crate::cache::{cache_key, PackageCache};
use crate::core::module::is_nested_module;
use crate::core::{
    ArchiveFormat, BinaryArchive, PackageError, PackageMetadata, PackageType,
    TransformedMetadata,
};
use crate::ops::source::{staging_dir, SourceResolver};
use crate::ops::target::{Outcome, ResolveTarget};
use crate::ops::template::TemplateApplier;
use crate::ops::tools::ToolRegistry;
use crate::ops::unpack::unpack_archive;
use crate::sources::HttpClient;
use crate::util::fs::{absolutize, aggressive_delete, ensure_dir};
use crate::util::git::mark_ignored;
use crate::util::marker;
use crate::util::shell::Status;
use crate::util::{GlobalContext, ResolveContext};

/// File name the running executable is copied to inside nested modules.
#[cfg(windows)]
pub const SELF_EXE_NAME: &str = "pkgsync.exe";

/// File name the running executable is copied to inside nested modules.
#[cfg(not(windows))]
pub const SELF_EXE_NAME: &str = "pkgsync";

/// Where the bytes of an archive come from.
enum ArchiveSource<'m> {
    Download {
        format: ArchiveFormat,
        uri: &'m str,
        git_ref: &'m str,
    },
    Transform(&'m TransformedMetadata),
}

impl ArchiveSource<'_> {
    fn format(&self) -> ArchiveFormat {
        match self {
            ArchiveSource::Download { format, .. } => *format,
            ArchiveSource::Transform(m) => m.transformer.format(),
        }
    }

    fn describe(&self) -> String {
        match self {
            ArchiveSource::Download { uri, .. } => uri.to_string(),
            ArchiveSource::Transform(m) => format!("{} via {}", m.source_uri, m.transformer.name()),
        }
    }
}

/// Materializes packages from prebuilt archives.
pub struct BinaryResolver {
    cache: PackageCache,
    http: HttpClient,
    tools: ToolRegistry,
    source: Arc<SourceResolver>,
    self_exe: Option<PathBuf>,
}

impl BinaryResolver {
    pub fn new(gctx: &GlobalContext, http: HttpClient, source: Arc<SourceResolver>) -> Self {
        BinaryResolver {
            cache: PackageCache::new(gctx.cache_dir()),
            http,
            tools: ToolRegistry::new(gctx.tools_dir()),
            source,
            self_exe: std::env::current_exe().ok(),
        }
    }

    /// Executable copied into extracted payloads that are modules themselves.
    pub fn with_self_exe(mut self, self_exe: Option<PathBuf>) -> Self {
        self.self_exe = self_exe;
        self
    }

    pub fn cache(&self) -> &PackageCache {
        &self.cache
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    fn applier(&self) -> &Arc<dyn TemplateApplier> {
        self.source.applier()
    }

    /// Resolve `metadata` from its binary form, or from source when it has none.
    pub fn resolve(
        &self,
        ctx: &ResolveContext,
        target: &ResolveTarget<'_>,
        metadata: &PackageMetadata,
    ) -> Result<Outcome> {
        let archive = match metadata {
            PackageMetadata::Native(m) => usable(&m.binary).map(|b| ArchiveSource::Download {
                format: b.format,
                uri: &b.uri,
                git_ref: &m.commit,
            }),
            PackageMetadata::NuGetV3(m) => usable(&m.binary).map(|b| ArchiveSource::Download {
                format: b.format,
                uri: &b.uri,
                git_ref: &m.version,
            }),
            PackageMetadata::Transformed(m) => match m.package_type {
                PackageType::Library => Some(ArchiveSource::Transform(m)),
                package_type => {
                    return Err(PackageError::UnsupportedCombination {
                        strategy: "binary",
                        metadata: metadata.kind(),
                        package_type,
                    }
                    .into())
                }
            },
            PackageMetadata::Git(_) | PackageMetadata::Folder(_) => None,
        };

        let Some(archive) = archive else {
            tracing::debug!("{} has no binary form, using source", target.package);
            return self.source.resolve(ctx, target, metadata);
        };

        let package_type = metadata.package_type();
        target.check_folder(package_type)?;

        match package_type {
            PackageType::Library => self.resolve_library(ctx, target, &archive),
            PackageType::Template => self.resolve_template(ctx, target, &archive),
            PackageType::GlobalTool => self.resolve_tool(ctx, target, &archive),
        }
    }

    fn resolve_library(
        &self,
        ctx: &ResolveContext,
        target: &ResolveTarget<'_>,
        archive: &ArchiveSource<'_>,
    ) -> Result<Outcome> {
        let folder = target.folder();
        let platform_dir = folder.join(target.platform);

        if marker::has_binary(&platform_dir) && !target.force {
            ctx.shell().verbose(
                Status::Fresh,
                format!("{} ({})", target.package, platform_dir.display()),
            );
            return Ok(Outcome::Fresh);
        }

        ensure_dir(&target.module.path)?;
        mark_ignored(&folder)?;

        if marker::has_source(&folder) {
            tracing::debug!("replacing source checkout at {}", folder.display());
            aggressive_delete(&folder)?;
        } else {
            aggressive_delete(&platform_dir)?;
        }

        let bytes = self.fetch(ctx, target, archive)?;

        ctx.shell().status(
            Status::Extracting,
            format!("{} for {}", target.package, target.platform),
        );
        unpack_archive(archive.format(), &bytes, &platform_dir, target.platform)?;

        if is_nested_module(&platform_dir) {
            self.copy_self_into(&platform_dir)?;
        }

        marker::write_binary(&platform_dir)?;
        marker::write_binary(&folder)?;
        Ok(Outcome::Installed)
    }

    fn resolve_template(
        &self,
        ctx: &ResolveContext,
        target: &ResolveTarget<'_>,
        archive: &ArchiveSource<'_>,
    ) -> Result<Outcome> {
        let bytes = self.fetch(ctx, target, archive)?;
        let staging = staging_dir(&target.module.path)?;
        unpack_archive(archive.format(), &bytes, staging.path(), target.platform)?;

        ctx.shell().status(
            Status::Applying,
            format!("template {} to {}", target.package, target.module.name),
        );
        self.applier()
            .apply(staging.path(), &target.module.path, &target.module.name)?;
        Ok(Outcome::Installed)
    }

    fn resolve_tool(
        &self,
        ctx: &ResolveContext,
        target: &ResolveTarget<'_>,
        archive: &ArchiveSource<'_>,
    ) -> Result<Outcome> {
        let dir = self.tools.install_dir(&target.package.uri, target.platform);

        if marker::has_binary(&dir) && !target.force {
            ctx.shell()
                .verbose(Status::Fresh, format!("{} (global tool)", target.package));
            return Ok(Outcome::Fresh);
        }

        aggressive_delete(&dir)?;
        let bytes = self.fetch(ctx, target, archive)?;
        unpack_archive(archive.format(), &bytes, &dir, target.platform)?;

        let count = self.tools.register(&dir)?;
        marker::write_binary(&dir)?;
        ctx.shell().status(
            Status::Installed,
            format!("{} ({} tools in {})", target.package, count, dir.display()),
        );
        Ok(Outcome::Installed)
    }

    /// Get the archive bytes: cache, local file, then network or transformer.
    fn fetch(
        &self,
        ctx: &ResolveContext,
        target: &ResolveTarget<'_>,
        archive: &ArchiveSource<'_>,
    ) -> Result<Vec<u8>> {
        let key = match archive {
            ArchiveSource::Download {
                format,
                uri,
                git_ref,
            } => cache_key(uri, git_ref, target.platform, *format),
            ArchiveSource::Transform(m) => {
                cache_key(&m.source_uri, &m.git_ref, target.platform, m.transformer.format())
            }
        };

        if self.cache.has(&key) {
            match self.cache.get(&key) {
                Ok(bytes) => {
                    tracing::debug!("using cached archive {}", key);
                    return Ok(bytes);
                }
                Err(e) => tracing::warn!("ignoring unreadable cache entry: {:#}", e),
            }
        }

        let bytes = match archive {
            ArchiveSource::Download { uri, .. } => {
                if let Some(path) = local_archive_path(uri) {
                    let path = absolutize(&target.module.path, &path);
                    return std::fs::read(&path)
                        .with_context(|| format!("failed to read archive {}", path.display()));
                }
                ctx.shell().status(Status::Fetching, uri);
                self.http.get_bytes(uri)?
            }
            ArchiveSource::Transform(m) => {
                ctx.shell().status(Status::Fetching, archive.describe());
                m.transformer
                    .transform(&m.source_uri, &m.git_ref, &m.platform)
                    .with_context(|| format!("{} failed for {}", m.transformer.name(), m.source_uri))?
            }
        };

        self.cache.save(&key, &bytes);
        Ok(bytes)
    }

    fn copy_self_into(&self, dir: &Path) -> Result<()> {
        let Some(exe) = &self.self_exe else {
            return Ok(());
        };
        let dest = dir.join(SELF_EXE_NAME);
        tracing::debug!("copying {} into nested module {}", exe.display(), dir.display());
        std::fs::copy(exe, &dest).with_context(|| {
            format!("failed to copy {} to {}", exe.display(), dest.display())
        })?;
        Ok(())
    }
}

fn usable(binary: &Option<BinaryArchive>) -> Option<&BinaryArchive> {
    binary.as_ref().filter(|b| !b.uri.is_empty())
}

/// The file path of an archive URI that points at the local disk.
fn local_archive_path(uri: &str) -> Option<PathBuf> {
    if let Some(path) = uri.strip_prefix("file://") {
        return Some(PathBuf::from(path));
    }
    if uri.contains("://") {
        None
    } else {
        Some(PathBuf::from(uri))
    }
}
