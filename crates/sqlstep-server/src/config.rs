//! Configuration for the SQLStep server
//!
//! Loads configuration from:
//! 1. config.yaml - server address, sample dataset, logging
//! 2. .env file - local overrides
//!
//! Environment variables always override config.yaml values.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid value '{value}' for {key}")]
    InvalidValue { key: String, value: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3001,
        }
    }
}

/// Which sample dataset to load, and where the database lives
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetConfig {
    /// Sample dataset name: "company" or "store"
    pub name: String,

    /// DuckDB file; in-memory when unset
    #[serde(default)]
    pub database: Option<String>,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            name: "company".to_string(),
            database: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error) or module-specific
    pub level: String,

    /// Output format: pretty, json, compact
    pub format: String,

    /// Output destination: stdout, file, both
    pub output: String,

    /// Directory for log files
    pub directory: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            output: "stdout".to_string(),
            directory: "./logs".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub dataset: DatasetConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from YAML file with environment variable overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = serde_yaml::from_str(&contents)?;
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Like [`Config::load`], but a missing file falls back to defaults.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if path.exists() {
            return Self::load(path);
        }

        warn!(path = %path.display(), "Config file not found, using defaults");
        let mut config = Config::default();
        config.apply_env_overrides()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(host) = std::env::var("SQLSTEP_SERVER_HOST") {
            self.server.host = host;
        }
        if let Ok(port) = std::env::var("SQLSTEP_SERVER_PORT") {
            self.server.port = port.parse().map_err(|_| ConfigError::InvalidValue {
                key: "SQLSTEP_SERVER_PORT".to_string(),
                value: port.clone(),
            })?;
        }

        if let Ok(name) = std::env::var("SQLSTEP_DATASET") {
            self.dataset.name = name;
        }
        if let Ok(path) = std::env::var("SQLSTEP_DATABASE") {
            self.dataset.database = Some(path);
        }

        if let Ok(level) = std::env::var("RUST_LOG") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("LOG_FORMAT") {
            self.logging.format = format;
        }
        if let Ok(output) = std::env::var("LOG_OUTPUT") {
            self.logging.output = output;
        }
        if let Ok(dir) = std::env::var("LOG_DIR") {
            self.logging.directory = dir;
        }
        Ok(())
    }

    /// Set logging environment variables for the logging module
    pub fn apply_logging_env(&self) {
        std::env::set_var("RUST_LOG", &self.logging.level);
        std::env::set_var("LOG_FORMAT", &self.logging.format);
        std::env::set_var("LOG_OUTPUT", &self.logging.output);
        std::env::set_var("LOG_DIR", &self.logging.directory);
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 3001);
        assert_eq!(config.dataset.name, "company");
        assert!(config.dataset.database.is_none());
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.format, "pretty");
        assert_eq!(config.logging.output, "stdout");
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config: Config = serde_yaml::from_str("dataset:\n  name: store\n").unwrap();
        assert_eq!(config.dataset.name, "store");
        assert_eq!(config.server.port, 3001);
        assert_eq!(config.logging.directory, "./logs");
    }

    // Environment variables are process-wide, so every override case runs in one test.
    #[test]
    fn test_env_var_override() {
        let config_yaml = r#"
server:
  host: "127.0.0.1"
  port: 3001
dataset:
  name: "company"
logging:
  level: "info"
  format: "pretty"
  output: "stdout"
  directory: "./logs"
"#;
        let temp_file = std::env::temp_dir().join("sqlstep_test_config.yaml");
        std::fs::write(&temp_file, config_yaml).unwrap();

        std::env::set_var("SQLSTEP_SERVER_PORT", "9090");
        std::env::set_var("SQLSTEP_DATASET", "store");
        std::env::set_var("SQLSTEP_DATABASE", "/tmp/sqlstep.duckdb");

        let config = Config::load(&temp_file).unwrap();
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.dataset.name, "store");
        assert_eq!(config.dataset.database.as_deref(), Some("/tmp/sqlstep.duckdb"));

        std::env::set_var("SQLSTEP_SERVER_PORT", "not-a-port");
        assert!(matches!(
            Config::load(&temp_file),
            Err(ConfigError::InvalidValue { key, .. }) if key == "SQLSTEP_SERVER_PORT"
        ));

        std::env::remove_var("SQLSTEP_SERVER_PORT");
        std::env::remove_var("SQLSTEP_DATASET");
        std::env::remove_var("SQLSTEP_DATABASE");

        let missing = std::env::temp_dir().join("sqlstep_missing_config.yaml");
        let config = Config::load_or_default(&missing).unwrap();
        assert_eq!(config.server.port, 3001);

        std::fs::remove_file(temp_file).ok();
    }
}
