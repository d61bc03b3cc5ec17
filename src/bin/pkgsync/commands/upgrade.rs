//! `pkgsync upgrade` command

use anyhow::Result;

use crate::cli::UpgradeArgs;
use crate::commands::module_root;
use pkgsync::core::ModuleInfo;
use pkgsync::ops::{PackageManager, PackageRedirector, ResolveOptions};
use pkgsync::util::{GlobalContext, ResolveContext, Shell};

pub fn execute(args: UpgradeArgs, shell: Shell) -> Result<()> {
    let root = module_root(args.path)?;
    let gctx = GlobalContext::with_cwd(root.clone())?;

    let mut options = ResolveOptions::from_config(gctx.config());
    options.prefer_source |= args.prefer_source;

    let redirector = PackageRedirector::from_args(&args.redirect)?;
    let module = ModuleInfo::load(&root)?;
    let manager = PackageManager::new(&gctx, options)?.with_redirector(redirector);

    let ctx = ResolveContext::root(shell);
    manager.upgrade(&ctx, &module, &args.package, &args.platform)
}
