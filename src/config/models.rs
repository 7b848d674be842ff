use crate::humanize::ByteSize;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub conversion: ConversionConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,
    #[serde(default)]
    pub api: ApiLimits,
}

/// API request limits
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiLimits {
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: ByteSize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            api: ApiLimits::default(),
        }
    }
}

impl Default for ApiLimits {
    fn default() -> Self {
        Self {
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

fn default_max_upload_bytes() -> ByteSize {
    ByteSize(10 * 1024 * 1024) // 10 MB
}

/// Upload, output and scratch locations
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default = "default_upload_dir")]
    pub upload_dir: PathBuf,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// Root for archive workspaces; system temp dir when unset
    pub scratch_dir: Option<PathBuf>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            upload_dir: default_upload_dir(),
            output_dir: default_output_dir(),
            scratch_dir: None,
        }
    }
}

fn default_upload_dir() -> PathBuf {
    PathBuf::from("media/uploads")
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("media/converted")
}

/// External converter programs (names on `PATH` or absolute paths)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ToolsConfig {
    #[serde(default = "default_libreoffice")]
    pub libreoffice: String,
    #[serde(default = "default_pandoc")]
    pub pandoc: String,
    #[serde(default = "default_imagemagick")]
    pub imagemagick: String,
    #[serde(default = "default_ffmpeg")]
    pub ffmpeg: String,
    #[serde(default = "default_unrar")]
    pub unrar: String,
    /// Upper bound for a single tool invocation
    #[serde(default = "default_tool_timeout_secs")]
    pub timeout_secs: u64,
}

impl ToolsConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn programs(&self) -> [(&'static str, &str); 5] {
        [
            ("libreoffice", &self.libreoffice),
            ("pandoc", &self.pandoc),
            ("imagemagick", &self.imagemagick),
            ("ffmpeg", &self.ffmpeg),
            ("unrar", &self.unrar),
        ]
    }
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            libreoffice: default_libreoffice(),
            pandoc: default_pandoc(),
            imagemagick: default_imagemagick(),
            ffmpeg: default_ffmpeg(),
            unrar: default_unrar(),
            timeout_secs: default_tool_timeout_secs(),
        }
    }
}

fn default_libreoffice() -> String {
    "libreoffice".to_string()
}

fn default_pandoc() -> String {
    "pandoc".to_string()
}

fn default_imagemagick() -> String {
    "convert".to_string()
}

fn default_ffmpeg() -> String {
    "ffmpeg".to_string()
}

fn default_unrar() -> String {
    "unrar".to_string()
}

fn default_tool_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConversionConfig {
    /// Upper bound for one whole dispatch
    #[serde(default = "default_job_timeout_secs")]
    pub job_timeout_secs: u64,
}

impl ConversionConfig {
    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            job_timeout_secs: default_job_timeout_secs(),
        }
    }
}

fn default_job_timeout_secs() -> u64 {
    300
}

/// Retention configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RetentionConfig {
    /// Outputs older than this are not served; unset keeps them forever
    pub output_max_age_secs: Option<u64>,
}

impl RetentionConfig {
    pub fn output_max_age(&self) -> Option<Duration> {
        self.output_max_age_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Telemetry configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TelemetryConfig {
    #[serde(default)]
    pub log_format: LogFormat,
}
