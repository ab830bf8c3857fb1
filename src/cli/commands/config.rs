//! Config command - show or initialize configuration

use crate::cli::args::{ConfigAction, ConfigArgs};
use crate::config::{Config, ConfigManager};
use crate::error::CacheResult;
use console::style;

/// Execute the config command
pub async fn execute(args: ConfigArgs, config: &Config, manager: &ConfigManager) -> CacheResult<()> {
    match args.action {
        None | Some(ConfigAction::Show) => show_config(config)?,
        Some(ConfigAction::Path) => println!("{}", manager.path().display()),
        Some(ConfigAction::Init { force }) => init_config(manager, force).await?,
    }

    Ok(())
}

fn show_config(config: &Config) -> CacheResult<()> {
    let mut shown = config.clone();
    // Show the effective cache directory rather than leaving it unset.
    shown.cache.dir = Some(config.cache.dir_or_default());
    println!("{}", toml::to_string_pretty(&shown)?);
    Ok(())
}

async fn init_config(manager: &ConfigManager, force: bool) -> CacheResult<()> {
    let path = manager.path();

    if path.exists() && !force {
        println!(
            "{} Config already exists at {}",
            style("!").yellow(),
            path.display()
        );
        println!("  Use --force to overwrite");
        return Ok(());
    }

    manager.save(&Config::default()).await?;
    println!(
        "{} Configuration initialized: {}",
        style("✓").green(),
        path.display()
    );
    Ok(())
}
