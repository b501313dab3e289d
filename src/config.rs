//! Configuration System
//!
//! Handles loading configuration from TOML files with environment
//! variable overrides, mainly the warehouse query-service endpoint and
//! credentials.

use crate::warehouse::WarehouseConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub warehouse: WarehouseSettings,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Warehouse query-service configuration
#[derive(Debug, Clone, Deserialize)]
pub struct WarehouseSettings {
    #[serde(default = "default_warehouse_url")]
    pub url: String,

    #[serde(default = "default_project")]
    pub project: String,

    #[serde(default = "default_table")]
    pub table: String,

    #[serde(default = "default_username")]
    pub username: String,

    #[serde(default = "default_password")]
    pub password: String,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_warehouse_url() -> String {
    "http://localhost:7070".to_string()
}

fn default_project() -> String {
    "api_umbrella".to_string()
}

fn default_table() -> String {
    "api_umbrella.logs".to_string()
}

fn default_username() -> String {
    "ADMIN".to_string()
}

fn default_password() -> String {
    "KYLIN".to_string()
}

fn default_request_timeout() -> u64 {
    30_000
}

fn default_max_retries() -> u32 {
    3
}

impl Default for WarehouseSettings {
    fn default() -> Self {
        Self {
            url: default_warehouse_url(),
            project: default_project(),
            table: default_table(),
            username: default_username(),
            password: default_password(),
            request_timeout_ms: default_request_timeout(),
            max_retries: default_max_retries(),
        }
    }
}

impl From<WarehouseSettings> for WarehouseConfig {
    fn from(settings: WarehouseSettings) -> Self {
        Self {
            base_url: settings.url,
            project: settings.project,
            table: settings.table,
            username: settings.username,
            password: settings.password,
            request_timeout_ms: settings.request_timeout_ms,
            max_retries: settings.max_retries,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        Ok(config)
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from default locations, falling back to environment-only
    pub fn load_default() -> Self {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("loglens").join("config.toml")),
            Some(PathBuf::from("/etc/loglens/config.toml")),
            Some(PathBuf::from("./config.toml")),
        ];

        for path in config_paths.iter().flatten() {
            if path.exists() {
                match Self::load_with_env(path) {
                    Ok(config) => {
                        tracing::info!("Loaded config from {:?}", path);
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load config from {:?}: {}", path, e);
                    }
                }
            }
        }

        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    /// Apply environment variable overrides to an existing config
    fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("LOGLENS_WAREHOUSE_URL") {
            self.warehouse.url = url;
        }
        if let Ok(project) = std::env::var("LOGLENS_WAREHOUSE_PROJECT") {
            self.warehouse.project = project;
        }
        if let Ok(username) = std::env::var("LOGLENS_WAREHOUSE_USERNAME") {
            self.warehouse.username = username;
        }
        if let Ok(password) = std::env::var("LOGLENS_WAREHOUSE_PASSWORD") {
            self.warehouse.password = password;
        }
        if let Ok(level) = std::env::var("LOGLENS_LOG_LEVEL") {
            self.logging.level = level;
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.warehouse.url, "http://localhost:7070");
        assert_eq!(config.warehouse.table, "api_umbrella.logs");
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_load_partial_file_fills_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[warehouse]\nurl = \"http://warehouse:7070\"\nusername = \"analytics\""
        )
        .unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.warehouse.url, "http://warehouse:7070");
        assert_eq!(config.warehouse.username, "analytics");
        // Unspecified fields keep defaults
        assert_eq!(config.warehouse.password, "KYLIN");
        assert_eq!(config.warehouse.max_retries, 3);
    }

    #[test]
    fn test_parse_error_reported() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "not valid toml [").unwrap();

        let err = Config::load(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_settings_convert_to_client_config() {
        let settings = WarehouseSettings::default();
        let client_config: WarehouseConfig = settings.into();
        assert_eq!(client_config.base_url, "http://localhost:7070");
        assert_eq!(client_config.project, "api_umbrella");
    }
}
