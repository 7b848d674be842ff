use super::models::Config;
use config::{ConfigError, Environment, File};
use std::env;
use std::path::PathBuf;

const CONFIG_ENV_VAR: &str = "CONVERTBOX_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config/convertbox.toml";
const ENV_PREFIX: &str = "CONVERTBOX";
const ENV_SEPARATOR: &str = "__";

/// Load configuration from multiple sources with priority:
/// 1. Defaults (embedded in structs)
/// 2. TOML file (if exists)
/// 3. Environment variables from .env file (via dotenvy)
/// 4. System environment variables (highest priority)
pub fn load() -> Result<Config, ConfigError> {
    // Load .env file if it exists (ignore errors if file doesn't exist)
    let _ = dotenvy::dotenv();

    let config_path = env::var(CONFIG_ENV_VAR)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));

    load_from_sources(config_path)
}

/// Load configuration from a specific path and environment
/// Useful for testing with custom config files
pub fn load_from_sources(config_path: PathBuf) -> Result<Config, ConfigError> {
    let mut builder = config::Config::builder();

    if config_path.exists() {
        tracing::info!("Loading configuration from: {}", config_path.display());
        builder = builder.add_source(File::from(config_path).required(false));
    } else {
        tracing::warn!(
            "Configuration file not found at {}, using defaults and environment overrides",
            config_path.display()
        );
    }

    // CONVERTBOX__SERVER__BIND_ADDR -> server.bind_addr
    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .separator(ENV_SEPARATOR)
            .try_parsing(true),
    );

    let config = builder.build()?;
    config.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_load_defaults_only() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nonexistent.toml");

        let config = load_from_sources(config_path).unwrap();
        assert_eq!(config.server.bind_addr.to_string(), "0.0.0.0:8080");
        assert_eq!(config.tools.ffmpeg, "ffmpeg");
    }

    #[test]
    fn test_load_from_toml() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        let toml_content = r#"
[server]
bind_addr = "127.0.0.1:9000"

[server.api]
max_upload_bytes = "25MB"

[storage]
upload_dir = "/srv/convert/in"
output_dir = "/srv/convert/out"
scratch_dir = "/srv/convert/tmp"

[tools]
libreoffice = "/opt/libreoffice/program/soffice"
timeout_secs = 45

[conversion]
job_timeout_secs = 90

[retention]
output_max_age_secs = 3600

[telemetry]
log_format = "json"
        "#;

        fs::write(&config_path, toml_content).unwrap();

        let config = load_from_sources(config_path).unwrap();
        assert_eq!(config.server.bind_addr.to_string(), "127.0.0.1:9000");
        assert_eq!(config.server.api.max_upload_bytes.as_u64(), 25 * 1024 * 1024);
        assert_eq!(config.storage.output_dir, PathBuf::from("/srv/convert/out"));
        assert_eq!(config.storage.scratch_dir, Some(PathBuf::from("/srv/convert/tmp")));
        assert_eq!(config.tools.libreoffice, "/opt/libreoffice/program/soffice");
        assert_eq!(config.tools.pandoc, "pandoc");
        assert_eq!(config.tools.timeout(), Duration::from_secs(45));
        assert_eq!(config.conversion.job_timeout_secs, 90);
        assert_eq!(config.retention.output_max_age(), Some(Duration::from_secs(3600)));
        assert_eq!(config.telemetry.log_format, crate::config::LogFormat::Json);
    }

    // Environment overrides mutate process state and are not exercised here
}
