//! Fetch command - materialize a package in the cache

use crate::cache::CacheStore;
use crate::cli::args::FetchArgs;
use crate::config::Config;
use crate::error::CacheResult;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::debug;

/// Execute the fetch command
pub async fn execute(args: FetchArgs, config: &Config) -> CacheResult<()> {
    let store = CacheStore::from_config(config).await?;

    let pb = create_progress_bar(&format!("Loading {}...", args.filename));
    let result = store.ensure_loaded(&args.filename).await;
    pb.finish_and_clear();

    let lease = result?;
    debug!("Cache now holds {} bytes", store.total_size_bytes());
    println!("{}", lease.root().display());
    Ok(())
}

pub(crate) fn create_progress_bar(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(msg.to_string());
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb
}
