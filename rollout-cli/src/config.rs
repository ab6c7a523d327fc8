//! Configuration management for the Rollout CLI.
//!
//! Settings are resolved from command line arguments, environment variables,
//! and a configuration file, in that order of precedence.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// CLI configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Feed configuration
    #[serde(default)]
    pub feed: FeedConfig,

    /// Local package cache configuration
    #[serde(default)]
    pub packages: PackagesConfig,

    /// Publish configuration
    #[serde(default)]
    pub pack: PackConfig,
}

/// Feed configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    /// Feed location. A directory path for filesystem feeds.
    #[serde(default = "default_feed_url")]
    pub url: String,

    /// Bearer token for authenticated feeds
    #[serde(skip)]
    pub token: Option<String>,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            url: default_feed_url(),
            token: None,
        }
    }
}

fn default_feed_url() -> String {
    "./feed".to_string()
}

/// Local package cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackagesConfig {
    /// Directory holding cached package files and the local ledger
    #[serde(default = "default_packages_dir")]
    pub dir: String,
}

impl Default for PackagesConfig {
    fn default() -> Self {
        Self {
            dir: default_packages_dir(),
        }
    }
}

fn default_packages_dir() -> String {
    "./packages".to_string()
}

/// Publish configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackConfig {
    /// Channel new releases are published to
    #[serde(default = "default_channel")]
    pub channel: String,
}

impl Default for PackConfig {
    fn default() -> Self {
        Self {
            channel: default_channel(),
        }
    }
}

fn default_channel() -> String {
    "stable".to_string()
}

impl Config {
    /// Load configuration from file
    pub fn from_file(path: &PathBuf) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration with the following precedence:
    /// 1. Command line arguments (handled by Clap)
    /// 2. Environment variables
    /// 3. Configuration file
    /// 4. Default values
    pub fn load() -> anyhow::Result<Self> {
        let mut config = Config::default();

        let config_path = PathBuf::from(".rollout.toml");
        if config_path.exists() {
            match Config::from_file(&config_path) {
                Ok(file_config) => {
                    config.feed = file_config.feed;
                    config.packages = file_config.packages;
                    config.pack = file_config.pack;
                }
                Err(e) => {
                    eprintln!("Warning: Failed to load config file: {}", e);
                }
            }
        }

        if let Ok(url) = std::env::var("ROLLOUT_FEED_URL") {
            config.feed.url = url;
        }
        if let Ok(token) = std::env::var("ROLLOUT_FEED_TOKEN") {
            config.feed.token = Some(token);
        }
        if let Ok(dir) = std::env::var("ROLLOUT_PACKAGES_DIR") {
            config.packages.dir = dir;
        }
        if let Ok(channel) = std::env::var("ROLLOUT_CHANNEL") {
            config.pack.channel = channel;
        }

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.feed.url.is_empty() {
            anyhow::bail!("Feed url must not be empty");
        }
        if self.packages.dir.is_empty() {
            anyhow::bail!("Packages directory must not be empty");
        }
        if self.pack.channel.is_empty() {
            anyhow::bail!("Channel must not be empty");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.feed.url, "./feed");
        assert_eq!(config.packages.dir, "./packages");
        assert_eq!(config.pack.channel, "stable");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rollout.toml");
        std::fs::write(
            &path,
            "[feed]\nurl = \"/srv/feed\"\n\n[pack]\nchannel = \"beta\"\n",
        )
        .unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.feed.url, "/srv/feed");
        assert_eq!(config.pack.channel, "beta");
        // Unspecified sections fall back to defaults.
        assert_eq!(config.packages.dir, "./packages");
    }

    #[test]
    fn test_validate_rejects_empty() {
        let mut config = Config::default();
        config.pack.channel = String::new();
        assert!(config.validate().is_err());
    }
}
