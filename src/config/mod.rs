//! Configuration management for rpmbrowse

pub mod schema;

pub use schema::Config;

use crate::error::{CacheError, CacheResult};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

/// Overrides `upstream.url_template`
pub const ENV_UPSTREAM_URL: &str = "RPMBROWSE_UPSTREAM_URL";
/// Overrides `cache.max_cache_size`
pub const ENV_MAX_CACHE_SIZE: &str = "RPMBROWSE_MAX_CACHE_SIZE";
/// Overrides `cache.rpm_size_limit`
pub const ENV_RPM_SIZE_LIMIT: &str = "RPMBROWSE_RPM_SIZE_LIMIT";

/// Configuration manager
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    /// Create a new config manager with default path
    pub fn new() -> Self {
        Self {
            config_path: Self::default_config_path(),
        }
    }

    /// Create a config manager with a custom path
    pub fn with_path(path: PathBuf) -> Self {
        Self { config_path: path }
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("rpmbrowse")
            .join("config.toml")
    }

    /// Load configuration, then apply `RPMBROWSE_*` environment overrides
    ///
    /// A missing file means defaults.
    pub async fn load(&self) -> CacheResult<Config> {
        self.load_with_env(|name| std::env::var(name).ok()).await
    }

    /// Like [`load`](Self::load), reading overrides through `lookup`
    pub async fn load_with_env(
        &self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> CacheResult<Config> {
        let mut config = if self.config_path.exists() {
            self.load_from_file(&self.config_path).await?
        } else {
            debug!("Config file not found, using defaults");
            Config::default()
        };

        if let Some(url) = lookup(ENV_UPSTREAM_URL) {
            debug!("{} overrides upstream.url_template", ENV_UPSTREAM_URL);
            config.upstream.url_template = url;
        }
        if let Some(size) = self.size_override(&lookup, ENV_MAX_CACHE_SIZE)? {
            config.cache.max_cache_size = size;
        }
        if let Some(size) = self.size_override(&lookup, ENV_RPM_SIZE_LIMIT)? {
            config.cache.rpm_size_limit = size;
        }

        Ok(config)
    }

    fn size_override(
        &self,
        lookup: &impl Fn(&str) -> Option<String>,
        name: &str,
    ) -> CacheResult<Option<u64>> {
        let Some(raw) = lookup(name) else {
            return Ok(None);
        };
        raw.trim()
            .parse()
            .map(Some)
            .map_err(|_| CacheError::ConfigInvalid {
                path: self.config_path.clone(),
                reason: format!("{name}={raw:?} is not a byte count"),
            })
    }

    /// Load configuration from a specific file
    pub async fn load_from_file(&self, path: &Path) -> CacheResult<Config> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| CacheError::io(format!("reading config from {}", path.display()), e))?;

        toml::from_str(&content).map_err(|e| CacheError::ConfigInvalid {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Save configuration to file
    pub async fn save(&self, config: &Config) -> CacheResult<()> {
        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| {
                CacheError::io(format!("creating config directory {}", parent.display()), e)
            })?;
        }

        let content = toml::to_string_pretty(config)?;
        fs::write(&self.config_path, content).await.map_err(|e| {
            CacheError::io(
                format!("writing config to {}", self.config_path.display()),
                e,
            )
        })?;

        info!("Configuration saved to {}", self.config_path.display());
        Ok(())
    }

    /// Get the config file path
    pub fn path(&self) -> &Path {
        &self.config_path
    }
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}
