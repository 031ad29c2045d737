//! Configuration module for DEPOT.

use serde::Deserialize;
use std::path::Path;

use crate::{DepotError, Result};

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind.
    #[serde(default = "default_host")]
    pub host: String,
    /// Port number to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Maximum number of concurrent connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Read timeout in seconds for a command header.
    #[serde(default = "default_read_timeout")]
    pub read_timeout_secs: u64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    4960
}

fn default_max_connections() -> usize {
    64
}

fn default_read_timeout() -> u64 {
    300
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_connections: default_max_connections(),
            read_timeout_secs: default_read_timeout(),
        }
    }
}

/// File storage configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Root directory for classified file storage.
    #[serde(default = "default_root_path")]
    pub root_path: String,
    /// Scratch directory for in-flight uploads.
    #[serde(default = "default_scratch_path")]
    pub scratch_path: String,
    /// Maximum upload size in megabytes.
    #[serde(default = "default_max_upload_size")]
    pub max_upload_size_mb: u64,
    /// Maximum attempts for moving a received file into place.
    #[serde(default = "default_move_max_attempts")]
    pub move_max_attempts: u32,
    /// Delay between move attempts in milliseconds.
    #[serde(default = "default_move_retry_delay")]
    pub move_retry_delay_ms: u64,
}

fn default_root_path() -> String {
    "data/files".to_string()
}

fn default_scratch_path() -> String {
    "data/scratch".to_string()
}

fn default_max_upload_size() -> u64 {
    100
}

fn default_move_max_attempts() -> u32 {
    3
}

fn default_move_retry_delay() -> u64 {
    200
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root_path: default_root_path(),
            scratch_path: default_scratch_path(),
            max_upload_size_mb: default_max_upload_size(),
            move_max_attempts: default_move_max_attempts(),
            move_retry_delay_ms: default_move_retry_delay(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Path to the log file.
    #[serde(default = "default_log_file")]
    pub file: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_file() -> String {
    "logs/depot.log".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: default_log_file(),
        }
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// File storage configuration.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(DepotError::Io)?;
        Self::parse(&content)
    }

    /// Load configuration from a TOML file and apply environment variable overrides.
    pub fn load_with_env<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| DepotError::Config(format!("config parse error: {e}")))
    }

    /// Apply environment variable overrides to the configuration.
    ///
    /// Supported environment variables:
    /// - `DEPOT_ROOT_PATH`: Override the storage root directory
    /// - `DEPOT_PORT`: Override the listen port
    pub fn apply_env_overrides(&mut self) {
        if let Ok(root) = std::env::var("DEPOT_ROOT_PATH") {
            if !root.is_empty() {
                self.storage.root_path = root;
            }
        }
        if let Ok(port) = std::env::var("DEPOT_PORT") {
            if let Ok(port) = port.parse() {
                self.server.port = port;
            }
        }
    }

    /// Validate the configuration.
    ///
    /// Returns an error if:
    /// - The scratch directory equals the storage root (uploads would land
    ///   inside a classified directory before their final move)
    /// - The move retry bound is zero
    pub fn validate(&self) -> Result<()> {
        if self.storage.root_path == self.storage.scratch_path {
            return Err(DepotError::Config(
                "scratch_path must differ from root_path".to_string(),
            ));
        }
        if self.storage.move_max_attempts == 0 {
            return Err(DepotError::Config(
                "move_max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 4960);
        assert_eq!(config.server.max_connections, 64);
        assert_eq!(config.server.read_timeout_secs, 300);

        assert_eq!(config.storage.root_path, "data/files");
        assert_eq!(config.storage.scratch_path, "data/scratch");
        assert_eq!(config.storage.max_upload_size_mb, 100);
        assert_eq!(config.storage.move_max_attempts, 3);
        assert_eq!(config.storage.move_retry_delay_ms, 200);

        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.file, "logs/depot.log");
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
[server]
host = "127.0.0.1"
port = 5000
max_connections = 10
read_timeout_secs = 60

[storage]
root_path = "custom/files"
scratch_path = "custom/scratch"
max_upload_size_mb = 50
move_max_attempts = 5
move_retry_delay_ms = 100

[logging]
level = "debug"
file = "custom/logs/depot.log"
"#;

        let config = Config::parse(toml).unwrap();

        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 5000);
        assert_eq!(config.server.max_connections, 10);
        assert_eq!(config.server.read_timeout_secs, 60);

        assert_eq!(config.storage.root_path, "custom/files");
        assert_eq!(config.storage.scratch_path, "custom/scratch");
        assert_eq!(config.storage.max_upload_size_mb, 50);
        assert_eq!(config.storage.move_max_attempts, 5);
        assert_eq!(config.storage.move_retry_delay_ms, 100);

        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.file, "custom/logs/depot.log");
    }

    #[test]
    fn test_parse_partial_config() {
        let toml = r#"
[server]
port = 3000

[storage]
root_path = "files"
"#;

        let config = Config::parse(toml).unwrap();

        // Specified values
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.storage.root_path, "files");

        // Default values
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.max_connections, 64);
        assert_eq!(config.storage.scratch_path, "data/scratch");
    }

    #[test]
    fn test_parse_empty_config() {
        let config = Config::parse("").unwrap();

        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 4960);
        assert_eq!(config.storage.root_path, "data/files");
    }

    #[test]
    fn test_parse_invalid_config() {
        let result = Config::parse("this is not valid toml [[[");

        assert!(result.is_err());
        if let Err(DepotError::Config(msg)) = result {
            assert!(msg.contains("config parse error"));
        } else {
            panic!("Expected Config error");
        }
    }

    #[test]
    fn test_load_nonexistent_file() {
        let result = Config::load("nonexistent.toml");

        assert!(result.is_err());
        assert!(matches!(result, Err(DepotError::Io(_))));
    }

    #[test]
    fn test_validate_scratch_equals_root() {
        let mut config = Config::default();
        config.storage.scratch_path = config.storage.root_path.clone();

        let result = config.validate();
        assert!(result.is_err());
        if let Err(DepotError::Config(msg)) = result {
            assert!(msg.contains("scratch_path"));
        }
    }

    #[test]
    fn test_validate_zero_move_attempts() {
        let mut config = Config::default();
        config.storage.move_max_attempts = 0;

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_default_ok() {
        assert!(Config::default().validate().is_ok());
    }
}
