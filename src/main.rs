//! rpmbrowse - on-demand RPM package browser
//!
//! CLI entry point that dispatches to subcommands.

use clap::Parser;
use console::style;
use rpmbrowse::cli::{Cli, Commands};
use rpmbrowse::config::ConfigManager;
use rpmbrowse::error::CacheResult;
use std::process::ExitCode;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", style("Error:").red().bold(), e);
            if let Some(hint) = e.hint() {
                eprintln!("{} {}", style("Hint:").yellow(), hint);
            }
            ExitCode::FAILURE
        }
    }
}

async fn run() -> CacheResult<()> {
    let cli = Cli::parse();

    // Parsing needs neither config nor logging
    let command = match cli.command {
        Commands::Parse(args) => return rpmbrowse::cli::commands::parse(args),
        command => command,
    };

    let config_manager = if let Some(ref path) = cli.config {
        ConfigManager::with_path(path.clone())
    } else {
        ConfigManager::new()
    };
    let mut config = config_manager.load().await?;
    if let Some(dir) = cli.cache_dir.clone() {
        config.cache.dir = Some(dir);
    }

    // 0 = warn, 1 = info, 2+ = debug
    let filter = match cli.verbose {
        0 => EnvFilter::new("rpmbrowse=warn"),
        1 => EnvFilter::new("rpmbrowse=info"),
        _ => EnvFilter::new("rpmbrowse=debug"),
    };
    if config.general.log_format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .without_time()
            .init();
    }
    debug!("Using config {}", config_manager.path().display());

    match command {
        Commands::Parse(args) => rpmbrowse::cli::commands::parse(args),
        Commands::Fetch(args) => rpmbrowse::cli::commands::fetch(args, &config).await,
        Commands::Browse(args) => rpmbrowse::cli::commands::browse(args, &config).await,
        Commands::Cache(args) => rpmbrowse::cli::commands::cache(args, &config).await,
        Commands::Config(args) => {
            rpmbrowse::cli::commands::config(args, &config, &config_manager).await
        }
    }
}
