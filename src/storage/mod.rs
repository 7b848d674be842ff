//! Local persisted layout: one directory of raw uploads, one of outputs.
//! Files are keyed by generated identifier plus extension and never rewritten.

use std::fs::Metadata;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::io::AsyncWriteExt;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Storage result type
pub type Result<T> = std::result::Result<T, StorageError>;

#[derive(Debug, Clone)]
pub struct LocalStore {
    upload_dir: PathBuf,
    output_dir: PathBuf,
}

impl LocalStore {
    pub fn new(upload_dir: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            upload_dir: upload_dir.into(),
            output_dir: output_dir.into(),
        }
    }

    pub fn upload_dir(&self) -> &Path {
        &self.upload_dir
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Create both directories if missing
    pub async fn ensure_dirs(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.upload_dir).await?;
        tokio::fs::create_dir_all(&self.output_dir).await?;
        Ok(())
    }

    pub fn upload_path(&self, id: &str, extension: &str) -> PathBuf {
        self.upload_dir.join(format!("{id}{extension}"))
    }

    pub fn output_path(&self, id: &str, extension: &str) -> PathBuf {
        self.output_dir.join(format!("{id}{extension}"))
    }

    /// Persist an upload under `{id}{extension}`. Refuses to replace an
    /// existing file.
    pub async fn write_upload(&self, id: &str, extension: &str, data: &[u8]) -> Result<PathBuf> {
        let path = self.upload_path(id, extension);

        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
            .map_err(|e| match e.kind() {
                ErrorKind::AlreadyExists => {
                    StorageError::UploadFailed(format!("{} already exists", path.display()))
                }
                _ => StorageError::Io(e),
            })?;
        file.write_all(data).await?;
        file.flush().await?;

        tracing::debug!(path = %path.display(), size = data.len(), "Stored upload");
        Ok(path)
    }

    /// Stat `output_dir/name`. The caller is responsible for making sure
    /// `name` is a plain file name.
    pub async fn output_metadata(&self, name: &str) -> Result<(PathBuf, Metadata)> {
        let path = self.output_dir.join(name);
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok((path, meta)),
            Ok(_) => Err(StorageError::NotFound(name.to_string())),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(StorageError::NotFound(name.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Whether (uploads, outputs) directories currently exist
    pub async fn dirs_present(&self) -> (bool, bool) {
        (is_dir(&self.upload_dir).await, is_dir(&self.output_dir).await)
    }
}

async fn is_dir(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_dir())
        .unwrap_or(false)
}
