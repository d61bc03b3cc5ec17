//! `pkgsync cache` command
//!
//! Manage the package cache (archives, git mirrors, lookups).

use anyhow::Result;

use crate::cli::{CacheArgs, CacheCommands};
use pkgsync::cache::PackageCache;
use pkgsync::util::shell::Status;
use pkgsync::util::{GlobalContext, Shell};

pub fn execute(args: CacheArgs, shell: Shell) -> Result<()> {
    let ctx = GlobalContext::new()?;

    match args.command {
        CacheCommands::Path => {
            println!("{}", ctx.cache_dir().display());
        }
        CacheCommands::Clear => {
            let dir = ctx.cache_dir();
            if dir.exists() {
                PackageCache::new(&dir).clear()?;
                shell.status(Status::Finished, format!("removed {}", dir.display()));
            } else {
                shell.status(Status::Fresh, "nothing to clear");
            }
        }
    }

    Ok(())
}
