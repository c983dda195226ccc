//! Configuration management for Postdeck

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{ConfigError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub publishing: PublishingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
}

/// Settings for the publish worker and its per-workspace throttle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishingConfig {
    /// Publish jobs allowed to run at once for a single workspace
    pub max_concurrent_per_workspace: u32,
    /// Seconds a throttle slot lives before it expires on its own
    pub throttle_window: i64,
    /// Seconds a throttled job waits before it is picked up again
    pub release_delay: i64,
    pub max_attempts: u32,
    /// Seconds between attempts after a failed publish
    pub retry_delay: i64,
    /// Seconds between daemon polls
    pub poll_interval: u64,
    /// Most due rows a single dispatch round picks up
    pub batch_size: usize,
}

impl Default for PublishingConfig {
    fn default() -> Self {
        Self {
            max_concurrent_per_workspace: 3,
            throttle_window: 60,
            release_delay: 30,
            max_attempts: 3,
            retry_delay: 300,
            poll_interval: 60,
            batch_size: 100,
        }
    }
}

impl Config {
    /// Load configuration from the default location
    pub fn load() -> Result<Self> {
        let config_path = resolve_config_path()?;
        Self::load_from_path(&config_path)
    }

    /// Load configuration, falling back to defaults when no file exists
    pub fn load_or_default() -> Result<Self> {
        let config_path = resolve_config_path()?;
        if config_path.exists() {
            Self::load_from_path(&config_path)
        } else {
            tracing::debug!(
                "No config file at {}, using defaults",
                config_path.display()
            );
            Ok(Self::default_config())
        }
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadError)?;
        let config: Config = toml::from_str(&content).map_err(ConfigError::ParseError)?;
        Ok(config)
    }

    /// Create a default configuration
    pub fn default_config() -> Self {
        Self {
            database: DatabaseConfig {
                path: "~/.local/share/postdeck/postdeck.db".to_string(),
            },
            publishing: PublishingConfig::default(),
        }
    }

    /// Database path after applying `POSTDECK_DB_PATH` and `~` expansion
    pub fn database_path(&self) -> Result<PathBuf> {
        resolve_db_path(Some(&self.database.path))
    }
}

/// Resolve the configuration file path following XDG Base Directory spec
pub fn resolve_config_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("POSTDECK_CONFIG") {
        return Ok(PathBuf::from(shellexpand::tilde(&path).to_string()));
    }

    let config_dir = dirs::config_dir()
        .ok_or_else(|| ConfigError::MissingField("config directory".to_string()))?;

    Ok(config_dir.join("postdeck").join("config.toml"))
}

/// Resolve the database path
///
/// `POSTDECK_DB_PATH` wins over the configured path; with neither set the
/// database lives in the XDG data directory.
pub fn resolve_db_path(configured: Option<&str>) -> Result<PathBuf> {
    if let Ok(path) = std::env::var("POSTDECK_DB_PATH") {
        return Ok(PathBuf::from(shellexpand::tilde(&path).to_string()));
    }

    match configured {
        Some(path) => Ok(PathBuf::from(shellexpand::tilde(path).to_string())),
        None => Ok(resolve_data_path()?.join("postdeck.db")),
    }
}

/// Resolve the data directory path following XDG Base Directory spec
pub fn resolve_data_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
        .ok_or_else(|| ConfigError::MissingField("data directory".to_string()))?;

    Ok(data_dir.join("postdeck"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    #[test]
    fn test_publishing_defaults() {
        let defaults = PublishingConfig::default();
        assert_eq!(defaults.max_concurrent_per_workspace, 3);
        assert_eq!(defaults.release_delay, 30);
        assert_eq!(defaults.max_attempts, 3);
        assert_eq!(defaults.batch_size, 100);
    }

    #[test]
    fn test_load_without_publishing_section() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        std::fs::write(&path, "[database]\npath = \"/tmp/postdeck.db\"\n").unwrap();

        let config = Config::load_from_path(&path).unwrap();
        assert_eq!(config.database.path, "/tmp/postdeck.db");
        assert_eq!(config.publishing, PublishingConfig::default());
    }

    #[test]
    fn test_load_partial_publishing_section() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[database]\npath = \"/tmp/postdeck.db\"\n\n[publishing]\nmax_concurrent_per_workspace = 5\nrelease_delay = 10\nbatch_size = 25\n",
        )
        .unwrap();

        let config = Config::load_from_path(&path).unwrap();
        assert_eq!(config.publishing.max_concurrent_per_workspace, 5);
        assert_eq!(config.publishing.release_delay, 10);
        assert_eq!(config.publishing.batch_size, 25);
        assert_eq!(config.publishing.retry_delay, 300);
    }

    #[test]
    fn test_load_invalid_toml() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        std::fs::write(&path, "this is not = = toml").unwrap();

        let result = Config::load_from_path(&path);
        assert!(matches!(
            result,
            Err(crate::PostdeckError::Config(ConfigError::ParseError(_)))
        ));
    }

    #[test]
    fn test_load_missing_file() {
        let result = Config::load_from_path(Path::new("/nonexistent/postdeck/config.toml"));
        assert!(matches!(
            result,
            Err(crate::PostdeckError::Config(ConfigError::ReadError(_)))
        ));
    }

    #[test]
    #[serial]
    fn test_config_path_env_override() {
        std::env::set_var("POSTDECK_CONFIG", "/tmp/custom/config.toml");
        let path = resolve_config_path().unwrap();
        std::env::remove_var("POSTDECK_CONFIG");
        assert_eq!(path, PathBuf::from("/tmp/custom/config.toml"));
    }

    #[test]
    #[serial]
    fn test_db_path_env_override() {
        std::env::set_var("POSTDECK_DB_PATH", "/tmp/override.db");
        let path = resolve_db_path(Some("/tmp/configured.db")).unwrap();
        std::env::remove_var("POSTDECK_DB_PATH");
        assert_eq!(path, PathBuf::from("/tmp/override.db"));
    }

    #[test]
    #[serial]
    fn test_db_path_from_config() {
        std::env::remove_var("POSTDECK_DB_PATH");
        let path = resolve_db_path(Some("/tmp/configured.db")).unwrap();
        assert_eq!(path, PathBuf::from("/tmp/configured.db"));
    }
}
