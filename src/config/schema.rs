//! Configuration schema for rpmbrowse
//!
//! Configuration is stored at `~/.config/rpmbrowse/config.toml`

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Upstream download URL used when none is configured (Fedora Koji)
pub const DEFAULT_UPSTREAM_URL: &str =
    "https://kojipkgs.fedoraproject.org/packages/{name}/{version}/{release}/{architecture}/{filename}";

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// Package cache settings
    pub cache: CacheConfig,

    /// Upstream package store settings
    pub upstream: UpstreamConfig,

    /// Extraction tool settings
    pub extract: ExtractConfig,
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log format: "text" or "json"
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_format: "text".to_string(),
        }
    }
}

/// Package cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Directory holding one subdirectory per extracted package
    /// (defaults to the platform cache dir)
    pub dir: Option<PathBuf>,

    /// Maximum total size of extracted packages in bytes
    pub max_cache_size: u64,

    /// Maximum size of a single downloaded RPM in bytes
    pub rpm_size_limit: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: None,
            max_cache_size: 1_000_000_000,
            rpm_size_limit: 100_000_000,
        }
    }
}

impl CacheConfig {
    /// The configured cache directory, or the platform default
    pub fn dir_or_default(&self) -> PathBuf {
        self.dir.clone().unwrap_or_else(|| {
            dirs::cache_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("rpmbrowse")
                .join("packages")
        })
    }
}

/// Upstream package store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Download URL template; `{name}`, `{version}`, `{release}`,
    /// `{architecture}` and `{filename}` are substituted
    pub url_template: String,

    /// Timeout for a whole download in seconds
    pub timeout_secs: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            url_template: DEFAULT_UPSTREAM_URL.to_string(),
            timeout_secs: 300,
        }
    }
}

/// Extraction configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractConfig {
    /// Timeout for unpacking one package in seconds
    pub timeout_secs: u64,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self { timeout_secs: 600 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = Config::default();
        let toml = toml::to_string_pretty(&config).unwrap();
        assert!(toml.contains("[general]"));
        assert!(toml.contains("[cache]"));
        assert!(toml.contains("kojipkgs.fedoraproject.org"));
    }

    #[test]
    fn config_deserializes_empty() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.cache.max_cache_size, 1_000_000_000);
        assert_eq!(config.cache.rpm_size_limit, 100_000_000);
    }

    #[test]
    fn config_deserializes_partial() {
        let toml = r#"
            [cache]
            dir = "/var/cache/rpmbrowse"
            max_cache_size = 5000
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.cache.dir, Some(PathBuf::from("/var/cache/rpmbrowse")));
        assert_eq!(config.cache.max_cache_size, 5000);
        assert_eq!(config.cache.rpm_size_limit, 100_000_000); // default preserved
        assert_eq!(config.upstream.url_template, DEFAULT_UPSTREAM_URL);
    }
}
