use async_trait::async_trait;
use std::path::Path;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use super::archive::ArchiveError;

/// Handler-level conversion failures
#[derive(Debug, Error)]
pub enum ConversionError {
    #[error("unsupported archive format: {0}")]
    UnsupportedArchiveFormat(String),
    #[error("archive conversion failed: {0}")]
    ArchiveConversionFailed(#[from] ArchiveError),
    #[error("external tool '{tool}' failed: {reason}")]
    ExternalToolFailed { tool: String, reason: String },
    #[error("unsupported {category} conversion: {input} -> {output}")]
    UnsupportedPair {
        category: &'static str,
        input: String,
        output: String,
    },
    #[error("conversion cancelled")]
    Cancelled,
    #[error("processing failed: {0}")]
    Processing(String),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<tokio::task::JoinError> for ConversionError {
    fn from(err: tokio::task::JoinError) -> Self {
        ConversionError::Processing(format!("conversion task aborted: {err}"))
    }
}

/// Uniform contract every handler category implements
///
/// Given a local input path and a reserved output path, a converter either
/// leaves a complete file at `output` or fails. On failure it must not leave
/// a non-empty file behind. Once `cancel` fires the converter stops its
/// work, including blocking tasks it spawned, and never writes `output`.
#[async_trait]
pub trait Converter: Send + Sync {
    async fn convert(
        &self,
        input: &Path,
        output: &Path,
        cancel: &CancellationToken,
    ) -> Result<(), ConversionError>;

    /// Short backend name for logs
    fn name(&self) -> &'static str;
}
