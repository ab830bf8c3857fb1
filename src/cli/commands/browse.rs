//! Browse command - list a directory or locate a file inside a package

use crate::cache::{format_bytes, CacheStore};
use crate::cli::args::BrowseArgs;
use crate::cli::commands::fetch::create_progress_bar;
use crate::config::Config;
use crate::error::{CacheError, CacheResult};
use console::style;
use std::path::Path;
use tokio::fs;

/// One row of a directory listing
struct Listing {
    name: String,
    is_dir: bool,
    size: u64,
}

/// Execute the browse command
pub async fn execute(args: BrowseArgs, config: &Config) -> CacheResult<()> {
    let store = CacheStore::from_config(config).await?;

    let pb = create_progress_bar(&format!("Loading {}...", args.filename));
    let result = store.open_path(&args.filename, &args.path).await;
    pb.finish_and_clear();
    let resolved = result?;

    if !resolved.is_dir() {
        println!("{}", resolved.path().display());
        return Ok(());
    }

    let rows = list_dir(resolved.path()).await?;
    let shown = resolved
        .path()
        .strip_prefix(resolved.lease().root().canonicalize().unwrap_or_default())
        .unwrap_or(resolved.path());
    println!(
        "{} {}",
        style(&args.filename).bold(),
        style(format!("/{}", shown.display())).cyan()
    );

    for row in rows {
        if row.is_dir {
            println!("  {}", style(format!("{}/", row.name)).blue());
        } else {
            println!("  {:<48} {:>10}", row.name, format_bytes(row.size));
        }
    }

    Ok(())
}

/// Directory entries, directories first, each group sorted by name
async fn list_dir(dir: &Path) -> CacheResult<Vec<Listing>> {
    let io_err = |e| CacheError::io(format!("listing {}", dir.display()), e);
    let mut entries = fs::read_dir(dir).await.map_err(io_err)?;
    let mut rows = Vec::new();

    while let Some(entry) = entries.next_entry().await.map_err(io_err)? {
        let meta = entry.metadata().await.map_err(io_err)?;
        rows.push(Listing {
            name: entry.file_name().to_string_lossy().into_owned(),
            is_dir: meta.is_dir(),
            size: meta.len(),
        });
    }

    rows.sort_by(|a, b| b.is_dir.cmp(&a.is_dir).then_with(|| a.name.cmp(&b.name)));
    Ok(rows)
}
