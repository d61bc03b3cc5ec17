//! The package manager.
//!
//! Resolution of a module happens in two steps per package reference:
//! a lookup that turns the reference into metadata (network only, no disk
//! writes), then a resolve that materializes it. Lookups may run in
//! parallel; resolves always run afterwards in declaration order so output
//! and disk writes are deterministic.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use rayon::prelude::*;

use crate::core::errors;
use crate::core::module::SAFE_RESOLVE_FEATURE;
use crate::core::{ModuleInfo, PackageError, PackageMetadata, PackageRef, PackageRequestRef};
use crate::ops::binary::BinaryResolver;
use crate::ops::invoke::select_invoker;
use crate::ops::locator::{PackageLocator, WorkingCopyLocator};
use crate::ops::redirect::PackageRedirector;
use crate::ops::source::SourceResolver;
use crate::ops::target::{Outcome, ResolveTarget};
use crate::sources::{HttpClient, ProtocolRegistry};
use crate::util::context::MAX_DEPTH;
use crate::util::marker;
use crate::util::shell::Status;
use crate::util::{Config, GlobalContext, ResolveContext};

/// Options for a resolution pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolveOptions {
    /// Look packages up and resolve submodules in parallel
    pub parallel: bool,
    /// Worker threads (None = rayon's default)
    pub jobs: Option<usize>,
    /// Per-call safe-resolve override
    pub safe_resolve: Option<bool>,
    /// Check out sources even when a binary is available
    pub prefer_source: bool,
    /// Re-resolve packages whose markers say they are present
    pub force_upgrade: bool,
    /// Prefer cached lookups over network queries
    pub prefer_cache: bool,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        ResolveOptions {
            parallel: true,
            jobs: None,
            safe_resolve: None,
            prefer_source: false,
            force_upgrade: false,
            prefer_cache: false,
        }
    }
}

impl ResolveOptions {
    pub fn from_config(config: &Config) -> Self {
        ResolveOptions {
            parallel: config.resolve.parallel.unwrap_or(true),
            jobs: config.resolve.jobs,
            safe_resolve: config.resolve.safe_resolve,
            prefer_source: config.resolve.prefer_source.unwrap_or(false),
            force_upgrade: false,
            prefer_cache: config.net.offline,
        }
    }
}

/// Whether unmarked, non-empty package folders must be left alone.
///
/// An explicit flag wins. Without one, a module that declares features
/// opts in through the `safe-resolve` feature, and a module without a
/// feature list gets safe resolution.
pub fn safe_resolve_enabled(flag: Option<bool>, module: &ModuleInfo) -> bool {
    match flag {
        Some(value) => value,
        None => module.feature_enabled(SAFE_RESOLVE_FEATURE).unwrap_or(true),
    }
}

/// Result of looking up one package reference.
#[derive(Debug)]
enum Lookup {
    /// A working copy already exists elsewhere
    Redirected(PathBuf),
    Resolved(PackageMetadata),
    Failed(anyhow::Error),
}

/// Resolves the packages of a module tree.
pub struct PackageManager {
    registry: ProtocolRegistry,
    binary: BinaryResolver,
    source: Arc<SourceResolver>,
    locator: Box<dyn PackageLocator>,
    redirector: PackageRedirector,
    options: ResolveOptions,
    self_exe: Option<PathBuf>,
    pool: Option<rayon::ThreadPool>,
}

impl PackageManager {
    pub fn new(gctx: &GlobalContext, options: ResolveOptions) -> Result<Self> {
        let http = HttpClient::new(&gctx.config().net)?;
        let source = Arc::new(SourceResolver::new(gctx));
        let binary = BinaryResolver::new(gctx, http, source.clone());

        let pool = match options.jobs {
            Some(jobs) => Some(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(jobs)
                    .thread_name(|i| format!("pkgsync-worker-{}", i))
                    .build()
                    .context("failed to start worker threads")?,
            ),
            None => None,
        };

        Ok(PackageManager {
            registry: ProtocolRegistry::new(gctx)?,
            binary,
            source,
            locator: Box::new(WorkingCopyLocator::new()),
            redirector: PackageRedirector::new(),
            options,
            self_exe: std::env::current_exe().ok(),
            pool,
        })
    }

    pub fn with_registry(mut self, registry: ProtocolRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_locator(mut self, locator: Box<dyn PackageLocator>) -> Self {
        self.locator = locator;
        self
    }

    pub fn with_redirector(mut self, redirector: PackageRedirector) -> Self {
        self.redirector = redirector;
        self
    }

    /// The executable copied into nested modules and compared against
    /// their bundled copy.
    pub fn with_self_exe(mut self, self_exe: Option<PathBuf>) -> Self {
        self.binary = self.binary.with_self_exe(self_exe.clone());
        self.self_exe = self_exe;
        self
    }

    pub fn options(&self) -> &ResolveOptions {
        &self.options
    }

    pub fn redirector(&self) -> &PackageRedirector {
        &self.redirector
    }

    fn in_pool<T: Send>(&self, op: impl FnOnce() -> T + Send) -> T {
        match &self.pool {
            Some(pool) => pool.install(op),
            None => op(),
        }
    }

    /// Resolve every package of `module` for `platform`, then its submodules.
    pub fn resolve_all(
        &self,
        ctx: &ResolveContext,
        module: &ModuleInfo,
        platform: &str,
    ) -> Result<()> {
        if ctx.depth() > MAX_DEPTH {
            return Err(PackageError::NestingTooDeep(MAX_DEPTH).into());
        }

        let packages: Vec<&PackageRef> = module.packages_for(platform).collect();
        for package in &packages {
            package.validate()?;
        }

        tracing::debug!(
            "resolving {} packages of {} for {}",
            packages.len(),
            module.name,
            platform
        );

        if self.options.parallel && packages.len() > 1 {
            let lookups: Vec<Lookup> = self.in_pool(|| {
                packages
                    .par_iter()
                    .map(|package| self.lookup(module, package, platform))
                    .collect()
            });

            for (package, lookup) in packages.iter().zip(lookups) {
                self.apply(ctx, module, package, platform, lookup, self.options.force_upgrade)?;
            }
        } else {
            for package in &packages {
                let lookup = self.lookup(module, package, platform);
                self.apply(ctx, module, package, platform, lookup, self.options.force_upgrade)?;
            }
        }

        self.resolve_submodules(ctx, module, platform)
    }

    /// Re-resolve one package, ignoring its markers.
    ///
    /// `query` is an exact or partial package URI.
    pub fn upgrade(
        &self,
        ctx: &ResolveContext,
        module: &ModuleInfo,
        query: &str,
        platform: &str,
    ) -> Result<()> {
        let package = module
            .find_package(query)?
            .with_context(|| format!("module {} has no package matching `{}`", module.name, query))?;
        package.validate()?;

        if !package.is_applicable(platform) {
            bail!("{} does not apply to platform {}", package, platform);
        }

        let lookup = self.lookup(module, package, platform);
        self.apply(ctx, module, package, platform, lookup, true)
    }

    fn lookup(&self, module: &ModuleInfo, package: &PackageRef, platform: &str) -> Lookup {
        if !package.folder.is_empty() {
            if let Some(existing) = self.locator.discover_existing(module, package, platform) {
                return Lookup::Redirected(existing);
            }
        }

        let uri = self.redirector.redirect(&package.uri);
        if uri != package.uri {
            tracing::debug!("{} redirected to {}", package.uri, uri);
        }

        let request =
            PackageRequestRef::new(uri, &package.git_ref, platform, self.options.prefer_cache);
        match self.registry.resolve(&request) {
            Ok(metadata) => Lookup::Resolved(metadata),
            Err(e) => Lookup::Failed(e),
        }
    }

    fn apply(
        &self,
        ctx: &ResolveContext,
        module: &ModuleInfo,
        package: &PackageRef,
        platform: &str,
        lookup: Lookup,
        force: bool,
    ) -> Result<()> {
        let folder = module.path.join(&package.folder);

        match lookup {
            Lookup::Failed(e) if errors::is_fatal(&e) => {
                Err(e.context(format!("failed to look up {}", package)))
            }
            Lookup::Failed(e) => {
                ctx.shell().warn(format!("skipping {}: {:#}", package, e));
                Ok(())
            }
            Lookup::Redirected(existing) => {
                if self.is_guarded(ctx, module, package) {
                    return Ok(());
                }
                marker::write_redirect(&folder, &existing)?;
                ctx.shell().status(
                    Status::Redirected,
                    format!("{} to {}", package, existing.display()),
                );
                Ok(())
            }
            Lookup::Resolved(metadata) => {
                if self.is_guarded(ctx, module, package) {
                    return Ok(());
                }
                if !package.folder.is_empty() && marker::remove_redirect(&folder) {
                    tracing::debug!("removed stale redirect in {}", folder.display());
                }
                self.materialize(ctx, module, package, platform, &metadata, force)
            }
        }
    }

    /// Safe-resolve guard: true when the package folder must not be touched.
    fn is_guarded(&self, ctx: &ResolveContext, module: &ModuleInfo, package: &PackageRef) -> bool {
        if package.folder.is_empty() {
            return false;
        }

        let folder = module.path.join(&package.folder);
        if !marker::is_unsafe_destination(&folder) {
            return false;
        }

        if safe_resolve_enabled(self.options.safe_resolve, module) {
            ctx.shell().status(
                Status::Skipped,
                format!(
                    "{}: {} holds files that were not installed by package resolution",
                    package,
                    folder.display()
                ),
            );
            true
        } else {
            tracing::debug!("force-resolving into unmarked folder {}", folder.display());
            false
        }
    }

    fn materialize(
        &self,
        ctx: &ResolveContext,
        module: &ModuleInfo,
        package: &PackageRef,
        platform: &str,
        metadata: &PackageMetadata,
        force: bool,
    ) -> Result<()> {
        let target = ResolveTarget::new(module, package, platform).forced(force);
        ctx.shell()
            .verbose(Status::Resolving, format!("{} ({})", package, metadata.kind()));

        let result = if self.options.prefer_source {
            match self.source.resolve(ctx, &target, metadata) {
                Ok(Outcome::Unavailable) => self.binary.resolve(ctx, &target, metadata),
                other => other,
            }
        } else {
            self.binary.resolve(ctx, &target, metadata)
        };

        match result {
            Ok(Outcome::Installed) => {
                ctx.shell()
                    .status(Status::Resolved, format!("{} for {}", package, platform));
                Ok(())
            }
            Ok(Outcome::Fresh) => Ok(()),
            Ok(Outcome::Unavailable) => Err(PackageError::NothingToResolve {
                uri: package.uri.clone(),
                platform: platform.to_string(),
            }
            .into()),
            Err(e) if errors::is_transient(&e) => {
                ctx.shell().warn(format!("skipping {}: {:#}", package, e));
                Ok(())
            }
            Err(e) => Err(e.context(format!("failed to resolve {}", package))),
        }
    }

    /// Whether a submodule has anything to resolve.
    fn needs_resolution(&self, submodule: &ModuleInfo, platform: &str) -> bool {
        submodule.packages_for(platform).next().is_some()
            || submodule
                .discover_submodules(platform)
                .map(|nested| !nested.is_empty())
                .unwrap_or(true)
    }

    fn resolve_submodules(
        &self,
        ctx: &ResolveContext,
        module: &ModuleInfo,
        platform: &str,
    ) -> Result<()> {
        let submodules: Vec<ModuleInfo> = module
            .discover_submodules(platform)?
            .into_iter()
            .filter(|sub| {
                let needed = self.needs_resolution(sub, platform);
                if !needed {
                    tracing::debug!("submodule {} has nothing to resolve", sub.name);
                }
                needed
            })
            .collect();

        let invoke = |ctx: &ResolveContext, submodule: &ModuleInfo| -> Result<i32> {
            let invoker = select_invoker(self.self_exe.as_deref(), submodule);
            tracing::debug!("resolving submodule {} ({})", submodule.name, invoker.name());
            invoker.invoke(self, ctx, submodule, platform)
        };

        if self.options.parallel && submodules.len() > 1 {
            let results: Vec<(ResolveContext, Result<i32>)> = self.in_pool(|| {
                submodules
                    .par_iter()
                    .map(|submodule| {
                        let child = ctx.buffered();
                        let code = invoke(&child, submodule);
                        (child, code)
                    })
                    .collect()
            });

            let mut codes = Vec::with_capacity(results.len());
            for (child, code) in results {
                child.replay_into(ctx);
                codes.push(code);
            }
            for (submodule, code) in submodules.iter().zip(codes) {
                check_submodule(submodule, code?)?;
            }
        } else {
            for submodule in &submodules {
                check_submodule(submodule, invoke(ctx, submodule)?)?;
            }
        }

        Ok(())
    }
}

fn check_submodule(submodule: &ModuleInfo, code: i32) -> Result<()> {
    if code == 0 {
        Ok(())
    } else {
        Err(PackageError::SubmoduleFailed {
            name: submodule.name.clone(),
            code,
        }
        .into())
    }
}
