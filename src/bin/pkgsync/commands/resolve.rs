//! `pkgsync resolve` command

use std::time::Instant;

use anyhow::Result;

use crate::cli::ResolveArgs;
use crate::commands::module_root;
use pkgsync::core::ModuleInfo;
use pkgsync::ops::{PackageManager, PackageRedirector, ResolveOptions};
use pkgsync::util::shell::Status;
use pkgsync::util::{GlobalContext, ResolveContext, Shell};

pub fn execute(args: ResolveArgs, shell: Shell) -> Result<()> {
    let root = module_root(args.path)?;
    let mut gctx = GlobalContext::with_cwd(root.clone())?;
    if args.offline {
        gctx.config_mut().net.offline = true;
    }

    let mut options = ResolveOptions::from_config(gctx.config());
    if args.parallel {
        options.parallel = true;
    }
    if args.no_parallel {
        options.parallel = false;
    }
    if args.safe_resolve {
        options.safe_resolve = Some(true);
    }
    if args.force_resolve {
        options.safe_resolve = Some(false);
    }
    if args.jobs.is_some() {
        options.jobs = args.jobs;
    }
    options.prefer_source |= args.prefer_source;
    options.force_upgrade = args.upgrade;

    let redirector = PackageRedirector::from_args(&args.redirect)?;
    let module = ModuleInfo::load(&root)?;
    let manager = PackageManager::new(&gctx, options)?.with_redirector(redirector);

    let ctx = ResolveContext::at_depth(shell, args.depth);
    let start = Instant::now();
    manager.resolve_all(&ctx, &module, &args.platform)?;

    ctx.shell().status(
        Status::Finished,
        format!(
            "{} for {} in {:.2}s",
            module.name,
            args.platform,
            start.elapsed().as_secs_f64()
        ),
    );
    Ok(())
}
