//! pkgsync CLI - package resolution for module trees

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

mod cli;
mod commands;

use cli::{Cli, Commands};
use pkgsync::core::errors;
use pkgsync::util::shell::{ColorChoice, Verbosity};
use pkgsync::util::Shell;

fn main() {
    if let Err(e) = run() {
        eprintln!("error: {:#}", e);
        std::process::exit(errors::exit_code(&e));
    }
}

fn run() -> Result<()> {
    // Parse CLI
    let cli = Cli::parse();

    // Set up logging
    let filter = if cli.verbose {
        EnvFilter::new("pkgsync=debug")
    } else {
        EnvFilter::new("pkgsync=info")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();

    let verbosity = if cli.verbose {
        Verbosity::Verbose
    } else if cli.quiet {
        Verbosity::Quiet
    } else {
        Verbosity::Normal
    };
    let color = if cli.no_color {
        ColorChoice::Never
    } else {
        ColorChoice::Auto
    };
    let shell = Shell::stdio(verbosity, color);

    // Execute command
    match cli.command {
        Commands::Resolve(args) => commands::resolve::execute(args, shell),
        Commands::Upgrade(args) => commands::upgrade::execute(args, shell),
        Commands::Cache(args) => commands::cache::execute(args, shell),
    }
}
