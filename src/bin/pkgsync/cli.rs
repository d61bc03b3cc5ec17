//! CLI definitions using clap.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use pkgsync::util::context::DEPTH_ENV;

/// pkgsync - resolve the package dependencies of a module tree
#[derive(Parser)]
#[command(name = "pkgsync")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Only print warnings and errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Resolve every package of the module and its submodules
    Resolve(ResolveArgs),

    /// Re-resolve a single package, ignoring what is on disk
    Upgrade(UpgradeArgs),

    /// Manage the package cache
    Cache(CacheArgs),
}

#[derive(Args)]
pub struct ResolveArgs {
    /// Target platform (e.g. Windows, Linux, MacOS)
    pub platform: String,

    /// Look packages up in parallel
    #[arg(long, overrides_with = "no_parallel")]
    pub parallel: bool,

    /// Look packages up one at a time
    #[arg(long, overrides_with = "parallel")]
    pub no_parallel: bool,

    /// Never touch package folders that hold unrelated files
    #[arg(long, conflicts_with = "force_resolve")]
    pub safe_resolve: bool,

    /// Replace package folders even when they hold unrelated files
    #[arg(long)]
    pub force_resolve: bool,

    /// Check out sources even when a binary package is available
    #[arg(long)]
    pub prefer_source: bool,

    /// Re-resolve packages that are already present
    #[arg(long)]
    pub upgrade: bool,

    /// Look up FROM at TO instead (repeatable)
    #[arg(long, value_name = "FROM=TO")]
    pub redirect: Vec<String>,

    /// Module root (defaults to the current directory)
    #[arg(long)]
    pub path: Option<PathBuf>,

    /// Number of worker threads
    #[arg(short, long)]
    pub jobs: Option<usize>,

    /// Only use cached lookups and archives
    #[arg(long)]
    pub offline: bool,

    /// Nesting depth, set when resolving a submodule in a child process
    #[arg(long, hide = true, env = DEPTH_ENV, default_value_t = 0)]
    pub depth: usize,
}

#[derive(Args)]
pub struct UpgradeArgs {
    /// Package URI, or a unique part of it
    pub package: String,

    /// Target platform
    pub platform: String,

    /// Check out sources even when a binary package is available
    #[arg(long)]
    pub prefer_source: bool,

    /// Look up FROM at TO instead (repeatable)
    #[arg(long, value_name = "FROM=TO")]
    pub redirect: Vec<String>,

    /// Module root (defaults to the current directory)
    #[arg(long)]
    pub path: Option<PathBuf>,
}

#[derive(Args)]
pub struct CacheArgs {
    #[command(subcommand)]
    pub command: CacheCommands,
}

#[derive(Subcommand)]
pub enum CacheCommands {
    /// Show the cache directory
    Path,

    /// Delete cached archives, git mirrors and lookups
    Clear,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_redirect_is_repeatable() {
        let cli = Cli::parse_from([
            "pkgsync",
            "resolve",
            "Linux",
            "--redirect",
            "a://x=b://y",
            "--redirect",
            "c://x=d://y",
            "--no-parallel",
        ]);
        match cli.command {
            Commands::Resolve(args) => {
                assert_eq!(args.redirect.len(), 2);
                assert!(args.no_parallel);
                assert!(!args.parallel);
            }
            _ => panic!("expected resolve"),
        }
    }

    #[test]
    fn test_depth_flag() {
        let cli = Cli::parse_from(["pkgsync", "resolve", "Linux", "--depth", "3", "--jobs", "2"]);
        match cli.command {
            Commands::Resolve(args) => {
                assert_eq!(args.depth, 3);
                assert_eq!(args.jobs, Some(2));
            }
            _ => panic!("expected resolve"),
        }
    }
}
