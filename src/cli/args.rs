//! CLI argument definitions using clap derive

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// rpmbrowse - browse the contents of RPM packages
///
/// Fetches packages from the upstream build system on demand, extracts
/// them into a bounded local cache and resolves paths inside them.
#[derive(Parser, Debug)]
#[command(name = "rpmbrowse")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Configuration file path
    #[arg(short, long, global = true, env = "RPMBROWSE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Cache directory (overrides cache.dir)
    #[arg(long, global = true, env = "RPMBROWSE_CACHE_DIR")]
    pub cache_dir: Option<PathBuf>,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Parse an RPM filename and show its fields
    Parse(ParseArgs),

    /// Fetch and extract a package into the cache
    Fetch(FetchArgs),

    /// Show a path inside a package, fetching it if needed
    Browse(BrowseArgs),

    /// Inspect and maintain the package cache
    Cache(CacheArgs),

    /// Show or initialize configuration
    Config(ConfigArgs),
}

/// Arguments for the parse command
#[derive(Parser, Debug)]
pub struct ParseArgs {
    /// RPM filename, e.g. strace-4.12-1.fc24.x86_64.rpm
    pub filename: String,

    /// Output format
    #[arg(short, long, default_value = "table")]
    pub format: OutputFormat,
}

/// Arguments for the fetch command
#[derive(Parser, Debug)]
pub struct FetchArgs {
    /// RPM filename, e.g. strace-4.12-1.fc24.src.rpm
    pub filename: String,
}

/// Arguments for the browse command
#[derive(Parser, Debug)]
pub struct BrowseArgs {
    /// RPM filename, e.g. strace-4.12-1.fc24.src.rpm
    pub filename: String,

    /// Path inside the package
    #[arg(default_value = ".")]
    pub path: String,
}

/// Arguments for the cache command
#[derive(Parser, Debug)]
pub struct CacheArgs {
    /// Subcommand for cache
    #[command(subcommand)]
    pub action: CacheAction,
}

/// Cache subcommands
#[derive(Subcommand, Debug)]
pub enum CacheAction {
    /// List cached packages, least recently used first
    List {
        /// Output format
        #[arg(short, long, default_value = "table")]
        format: OutputFormat,
    },

    /// Evict packages until the cache fits its budget
    Evict,

    /// Remove every cached package
    Clear {
        /// Skip confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
}

/// Arguments for the config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    /// Subcommand for config
    #[command(subcommand)]
    pub action: Option<ConfigAction>,
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Show configuration file path
    Path,

    /// Initialize default configuration
    Init {
        /// Overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },
}

/// Output format for listings
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table
    Table,
    /// JSON output
    Json,
    /// Simple text (one per line)
    Plain,
}
