//! Running package resolution inside a submodule.
//!
//! A submodule is resolved in-process when its bundled executable is the
//! same file as the running one (or when it has none), and through a child
//! process otherwise. Both report an exit code instead of terminating.

use std::path::{Path, PathBuf};

use anyhow::Result;

use crate::core::errors;
use crate::core::ModuleInfo;
use crate::ops::binary::SELF_EXE_NAME;
use crate::ops::package_manager::PackageManager;
use crate::util::hash::files_identical;
use crate::util::process::ProcessBuilder;
use crate::util::context::DEPTH_ENV;
use crate::util::shell::Stream;
use crate::util::ResolveContext;

/// Runs package resolution for one submodule and returns its exit code.
pub trait SubmoduleInvoker {
    /// Short name for log output.
    fn name(&self) -> &'static str;

    fn invoke(
        &self,
        manager: &PackageManager,
        ctx: &ResolveContext,
        submodule: &ModuleInfo,
        platform: &str,
    ) -> Result<i32>;
}

/// Resolves the submodule with the current manager.
#[derive(Debug, Default)]
pub struct InProcessInvoker;

impl SubmoduleInvoker for InProcessInvoker {
    fn name(&self) -> &'static str {
        "in-process"
    }

    fn invoke(
        &self,
        manager: &PackageManager,
        ctx: &ResolveContext,
        submodule: &ModuleInfo,
        platform: &str,
    ) -> Result<i32> {
        let nested = ctx.nested();
        tracing::debug!(
            "resolving submodule {} in-process at depth {}",
            submodule.name,
            nested.depth()
        );

        let result = manager.resolve_all(&nested, submodule, platform);
        nested.replay_into(ctx);

        match result {
            Ok(()) => Ok(0),
            Err(e) => {
                ctx.shell().error(format!("{}: {:#}", submodule.name, e));
                Ok(errors::exit_code(&e))
            }
        }
    }
}

/// Resolves the submodule with the executable bundled in it.
#[derive(Debug)]
pub struct SubprocessInvoker {
    exe: PathBuf,
}

impl SubprocessInvoker {
    pub fn new(exe: impl Into<PathBuf>) -> Self {
        SubprocessInvoker { exe: exe.into() }
    }

    /// Build the child command line.
    ///
    /// `depth` is the nesting depth the child runs at; it is passed on so
    /// that cyclic module layouts still hit the nesting limit.
    pub fn command(
        &self,
        manager: &PackageManager,
        submodule: &ModuleInfo,
        platform: &str,
        depth: usize,
    ) -> ProcessBuilder {
        let options = manager.options();
        let mut builder = ProcessBuilder::new(&self.exe)
            .arg("resolve")
            .arg(platform)
            .arg(if options.parallel {
                "--parallel"
            } else {
                "--no-parallel"
            });

        match options.safe_resolve {
            Some(true) => builder = builder.arg("--safe-resolve"),
            Some(false) => builder = builder.arg("--force-resolve"),
            None => {}
        }
        if options.prefer_source {
            builder = builder.arg("--prefer-source");
        }
        if options.force_upgrade {
            builder = builder.arg("--upgrade");
        }
        if options.prefer_cache {
            builder = builder.arg("--offline");
        }
        if let Some(jobs) = options.jobs {
            builder = builder.arg("--jobs").arg(jobs.to_string());
        }

        builder
            .args(manager.redirector().arguments())
            .env(DEPTH_ENV, depth.to_string())
            .cwd(&submodule.path)
    }
}

impl SubmoduleInvoker for SubprocessInvoker {
    fn name(&self) -> &'static str {
        "subprocess"
    }

    fn invoke(
        &self,
        manager: &PackageManager,
        ctx: &ResolveContext,
        submodule: &ModuleInfo,
        platform: &str,
    ) -> Result<i32> {
        let builder = self.command(manager, submodule, platform, ctx.depth() + 1);
        tracing::debug!("running `{}` for submodule {}", builder.display_command(), submodule.name);

        let output = builder.exec()?;
        for line in String::from_utf8_lossy(&output.stdout).lines() {
            ctx.shell().raw(Stream::Out, line);
        }
        for line in String::from_utf8_lossy(&output.stderr).lines() {
            ctx.shell().raw(Stream::Err, line);
        }

        Ok(output.status.code().unwrap_or(1))
    }
}

/// Pick how to resolve `submodule`.
pub fn select_invoker(current_exe: Option<&Path>, submodule: &ModuleInfo) -> Box<dyn SubmoduleInvoker> {
    let bundled = submodule.path.join(SELF_EXE_NAME);
    if !bundled.is_file() {
        return Box::new(InProcessInvoker);
    }

    let identical = match current_exe {
        Some(current) => files_identical(current, &bundled).unwrap_or_else(|e| {
            tracing::warn!("cannot compare {} with the running executable: {:#}", bundled.display(), e);
            false
        }),
        None => false,
    };

    if identical {
        Box::new(InProcessInvoker)
    } else {
        Box::new(SubprocessInvoker::new(bundled))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::package_manager::ResolveOptions;
    use crate::ops::redirect::PackageRedirector;
    use crate::util::{Config, GlobalContext};
    use tempfile::TempDir;

    fn manager(tmp: &TempDir, options: ResolveOptions) -> PackageManager {
        let gctx = GlobalContext::with_home(
            tmp.path().to_path_buf(),
            tmp.path().join("home"),
            Config::default(),
        );
        PackageManager::new(&gctx, options).unwrap()
    }

    #[test]
    fn test_select_invoker_by_hash() {
        let tmp = TempDir::new().unwrap();
        let current = tmp.path().join("current");
        std::fs::write(&current, b"binary-a").unwrap();

        let sub = ModuleInfo::new("Sub", tmp.path().join("sub"));
        std::fs::create_dir_all(&sub.path).unwrap();

        assert_eq!(select_invoker(Some(current.as_path()), &sub).name(), "in-process");

        std::fs::write(sub.path.join(SELF_EXE_NAME), b"binary-a").unwrap();
        assert_eq!(select_invoker(Some(current.as_path()), &sub).name(), "in-process");

        std::fs::write(sub.path.join(SELF_EXE_NAME), b"binary-b").unwrap();
        assert_eq!(select_invoker(Some(current.as_path()), &sub).name(), "subprocess");
        assert_eq!(select_invoker(None, &sub).name(), "subprocess");
    }

    #[test]
    fn test_subprocess_command_line() {
        let tmp = TempDir::new().unwrap();
        let options = ResolveOptions {
            parallel: false,
            safe_resolve: Some(false),
            prefer_source: true,
            ..ResolveOptions::default()
        };
        let mut redirector = PackageRedirector::new();
        redirector.add("https-git://github.com/org/lib", "local-git:///work/lib");
        let manager = manager(&tmp, options).with_redirector(redirector);

        let sub = ModuleInfo::new("Sub", tmp.path().join("sub"));
        let builder = SubprocessInvoker::new("/opt/pkgsync").command(&manager, &sub, "Windows", 1);
        assert_eq!(
            builder.get_args(),
            [
                "resolve",
                "Windows",
                "--no-parallel",
                "--force-resolve",
                "--prefer-source",
                "--redirect",
                "https-git://github.com/org/lib=local-git:///work/lib",
            ]
        );
        assert_eq!(builder.get_env(DEPTH_ENV), Some("1"));
    }

    #[test]
    fn test_subprocess_inherits_offline_jobs_and_depth() {
        let tmp = TempDir::new().unwrap();
        let options = ResolveOptions {
            jobs: Some(3),
            prefer_cache: true,
            force_upgrade: true,
            ..ResolveOptions::default()
        };
        let manager = manager(&tmp, options);

        let sub = ModuleInfo::new("Sub", tmp.path().join("sub"));
        let builder = SubprocessInvoker::new("/opt/pkgsync").command(&manager, &sub, "Linux", 5);
        assert_eq!(
            builder.get_args(),
            [
                "resolve",
                "Linux",
                "--parallel",
                "--upgrade",
                "--offline",
                "--jobs",
                "3",
            ]
        );
        assert_eq!(builder.get_env(DEPTH_ENV), Some("5"));
    }
}
