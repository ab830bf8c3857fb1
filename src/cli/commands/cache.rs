//! Cache command - inspect and maintain the package cache

use crate::cache::{format_bytes, CacheEntryInfo, CacheSizeStatus, CacheStore, EvictionReport};
use crate::cli::args::{CacheAction, CacheArgs, OutputFormat};
use crate::config::Config;
use crate::error::CacheResult;
use console::style;
use std::io::{self, Write};

/// Execute the cache command
pub async fn execute(args: CacheArgs, config: &Config) -> CacheResult<()> {
    let store = CacheStore::from_config(config).await?;

    match args.action {
        CacheAction::List { format } => list_packages(&store, format),
        CacheAction::Evict => {
            let report = store.evict().await;
            print_report(&report, "evicted");
            Ok(())
        }
        CacheAction::Clear { yes } => clear_packages(&store, yes).await,
    }
}

/// List all cached packages
fn list_packages(store: &CacheStore, format: OutputFormat) -> CacheResult<()> {
    let entries = store.entries();

    match format {
        OutputFormat::Table => print_table(store, &entries),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&entries)?),
        OutputFormat::Plain => {
            for entry in &entries {
                println!("{}", entry.filename);
            }
        }
    }

    Ok(())
}

fn print_table(store: &CacheStore, entries: &[CacheEntryInfo]) {
    if entries.is_empty() {
        println!("No cached packages in {}", store.root().display());
        return;
    }

    println!("{:<56} {:>10} {:<20}", "PACKAGE", "SIZE", "LAST ACCESS");
    println!("{}", "-".repeat(88));

    for entry in entries {
        println!(
            "{:<56} {:>10} {:<20}",
            entry.filename,
            format_bytes(entry.size_bytes),
            entry.last_access.format("%Y-%m-%d %H:%M")
        );
    }

    let total = store.total_size_bytes();
    let limit = store.max_cache_size();
    let usage = format!(
        "{} of {} ({:.0}%)",
        format_bytes(total),
        format_bytes(limit),
        CacheSizeStatus::percentage(total, limit)
    );
    let usage = match CacheSizeStatus::from_usage(total, limit) {
        CacheSizeStatus::Ok => style(usage).green(),
        CacheSizeStatus::Warning => style(usage).yellow(),
        CacheSizeStatus::Exceeded => style(usage).red(),
    };

    println!();
    println!("Total: {} package(s), {}", entries.len(), usage);
}

/// Remove every cached package
async fn clear_packages(store: &CacheStore, skip_confirm: bool) -> CacheResult<()> {
    let entries = store.entries();

    if entries.is_empty() {
        println!("No cached packages to clear.");
        return Ok(());
    }

    println!("This will remove {} cached package(s):", entries.len());
    for entry in &entries {
        println!("  {} {}", style("•").red(), entry.filename);
    }
    println!();

    if !skip_confirm {
        print!("Are you sure? [y/N] ");
        let _ = io::stdout().flush();

        let mut input = String::new();
        if io::stdin().read_line(&mut input).is_err() {
            println!("Failed to read input, aborting.");
            return Ok(());
        }

        if !input.trim().eq_ignore_ascii_case("y") {
            println!("Aborted.");
            return Ok(());
        }
    }

    let report = store.clear().await;
    print_report(&report, "cleared");
    Ok(())
}

fn print_report(report: &EvictionReport, verb: &str) {
    for filename in &report.evicted {
        println!("  {} {}", style("•").red(), filename);
    }
    println!(
        "{} {} {} package(s), freed {}",
        style("✓").green(),
        verb,
        report.evicted.len(),
        format_bytes(report.freed_bytes)
    );
    if report.stalled {
        println!(
            "{} cache still holds {}; remaining packages are in use or the most recent",
            style("!").yellow(),
            format_bytes(report.total_size_bytes)
        );
    }
}
