//! Configuration management for ConvertBox
//!
//! This module provides a layered configuration system that loads settings from:
//! 1. Default values (embedded in structs)
//! 2. TOML configuration file
//! 3. Environment variables (highest priority)
//!
//! # Usage
//!
//! ```no_run
//! use convertbox::config::Config;
//!
//! let config = Config::load().expect("Failed to load configuration");
//! println!("Server listening on: {}", config.server.bind_addr);
//! ```
//!
//! # Environment Variables
//!
//! Configuration can be overridden using environment variables with the pattern:
//! `CONVERTBOX__<section>__<key>`
//!
//! Examples:
//! - `CONVERTBOX__SERVER__BIND_ADDR=0.0.0.0:9000`
//! - `CONVERTBOX__TOOLS__FFMPEG=/usr/local/bin/ffmpeg`
//! - `CONVERTBOX__CONVERSION__JOB_TIMEOUT_SECS=600`
//!
//! # Configuration File
//!
//! By default, the configuration is loaded from `config/convertbox.toml`.
//! This can be overridden using the `CONVERTBOX_CONFIG` environment variable.

mod models;
mod sources;
mod validation;

// Re-export public types
pub use crate::humanize::ByteSize;
pub use models::{
    ApiLimits, Config, ConversionConfig, LogFormat, RetentionConfig, ServerConfig,
    StorageConfig, TelemetryConfig, ToolsConfig,
};
pub use validation::ValidationError;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error("Configuration validation failed: {0}")]
    ValidationError(#[from] ValidationError),
}

impl Config {
    /// Load configuration from all sources (file + environment)
    ///
    /// Configuration is loaded with the following priority (highest to lowest):
    /// 1. Environment variables (`CONVERTBOX__*`)
    /// 2. TOML file (default: `config/convertbox.toml`)
    /// 3. Default values
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration file is malformed or a
    /// validation rule fails.
    pub fn load() -> Result<Self, ConfigError> {
        let config = sources::load()?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: std::path::PathBuf) -> Result<Self, ConfigError> {
        let config = sources::load_from_sources(path)?;
        validation::validate(&config)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_load_minimal_config() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        fs::write(&config_path, "[tools]\nunrar = \"/usr/bin/unrar\"\n").unwrap();

        let config = Config::load_from_path(config_path).unwrap();
        assert_eq!(config.tools.unrar, "/usr/bin/unrar");
        assert_eq!(config.conversion.job_timeout_secs, 300);
    }

    #[test]
    fn test_validation_runs_after_load() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        let toml_content = r#"
[storage]
upload_dir = "media/shared"
output_dir = "media/shared"
        "#;

        fs::write(&config_path, toml_content).unwrap();

        let result = Config::load_from_path(config_path);
        assert!(matches!(
            result.unwrap_err(),
            ConfigError::ValidationError(ValidationError::SharedDirectories { .. })
        ));
    }

    #[test]
    fn test_malformed_size_is_load_error() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        fs::write(&config_path, "[server.api]\nmax_upload_bytes = \"ten\"\n").unwrap();

        let result = Config::load_from_path(config_path);
        assert!(matches!(result.unwrap_err(), ConfigError::LoadError(_)));
    }
}
