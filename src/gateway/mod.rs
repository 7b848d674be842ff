//! Upload/Token Gateway
//!
//! Accepts an upload, persists it under a generated identifier, runs the
//! dispatcher and mints a download token `{identifier}{output extension}`.
//! Tokens are redeemed against the output directory only after they are
//! checked to be a plain file name.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::formats::{FormatRegistry, HandlerCategory, normalize_extension, resolve_extension};
use crate::handlers::{ConversionJob, DispatchError, Dispatcher};
use crate::storage::{LocalStore, StorageError};

const FALLBACK_STEM: &str = "converted";

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("file too large: {size} bytes exceeds limit of {limit} bytes")]
    PayloadTooLarge { size: u64, limit: u64 },

    #[error("cannot convert '{input}' to '{requested}'")]
    UnsupportedFormat {
        input: String,
        requested: String,
        allowed: Vec<String>,
    },

    #[error("invalid token")]
    InvalidToken,

    #[error("not found")]
    NotFound,

    /// Opaque to callers; the cause is logged where it happens
    #[error("conversion failed")]
    ConversionFailed {
        job_id: String,
        #[source]
        source: DispatchError,
    },

    #[error("storage error: {0}")]
    Storage(StorageError),
}

impl From<StorageError> for GatewayError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(_) => GatewayError::NotFound,
            other => GatewayError::Storage(other),
        }
    }
}

/// Result of a successful upload
#[derive(Debug, Clone)]
pub struct TokenInfo {
    pub token: String,
    pub job_id: String,
    pub suggested_name: String,
    pub input_extension: String,
    pub output_extension: String,
    pub category: HandlerCategory,
    pub output_bytes: u64,
}

/// A resolved download
#[derive(Debug, Clone)]
pub struct FileHandle {
    pub path: PathBuf,
    pub download_name: String,
    pub size: u64,
}

#[derive(Clone, bon::Builder)]
pub struct Gateway {
    dispatcher: Dispatcher,
    store: LocalStore,
    max_upload_bytes: u64,
    /// Outputs older than this are no longer served
    max_output_age: Option<Duration>,
}

impl Gateway {
    pub fn registry(&self) -> &FormatRegistry {
        self.dispatcher.registry()
    }

    pub fn store(&self) -> &LocalStore {
        &self.store
    }

    pub fn max_upload_bytes(&self) -> u64 {
        self.max_upload_bytes
    }

    pub async fn accept_upload(
        &self,
        data: &[u8],
        original_filename: &str,
        requested_format: &str,
    ) -> Result<TokenInfo, GatewayError> {
        let size = data.len() as u64;
        if size > self.max_upload_bytes {
            return Err(GatewayError::PayloadTooLarge {
                size,
                limit: self.max_upload_bytes,
            });
        }

        let input = resolve_extension(self.registry(), original_filename);
        let output = normalize_extension(requested_format);
        self.dispatcher
            .route(&input, &output)
            .map_err(|err| match err {
                DispatchError::UnsupportedConversion { allowed, .. } => {
                    GatewayError::UnsupportedFormat {
                        input: input.clone(),
                        requested: output.clone(),
                        allowed,
                    }
                }
                _ => GatewayError::UnsupportedFormat {
                    input: input.clone(),
                    requested: output.clone(),
                    allowed: Vec::new(),
                },
            })?;

        let job_id = Uuid::new_v4().to_string();
        let source_path = self.store.write_upload(&job_id, &input, data).await?;
        let job = ConversionJob::builder()
            .job_id(job_id.as_str())
            .source_path(source_path)
            .input_extension(input.as_str())
            .requested_output_extension(output.as_str())
            .output_path(self.store.output_path(&job_id, &output))
            .build();

        let report = match self.dispatcher.dispatch(&job).await {
            Ok(report) => report,
            Err(source) => {
                error!(%job_id, %input, %output, error = %source, "Conversion failed");
                return Err(GatewayError::ConversionFailed { job_id, source });
            }
        };

        let token = format!("{job_id}{output}");
        info!(%job_id, %token, category = %report.category, "Upload converted");

        Ok(TokenInfo {
            suggested_name: suggested_name(original_filename, &input, &output),
            token,
            job_id,
            input_extension: input,
            output_extension: output,
            category: report.category,
            output_bytes: report.output_bytes,
        })
    }

    pub async fn resolve_download(&self, token: &str) -> Result<FileHandle, GatewayError> {
        if !is_plain_token(token) {
            warn!(token, "Rejected download token");
            return Err(GatewayError::InvalidToken);
        }

        let (path, meta) = self.store.output_metadata(token).await?;

        if let Some(max_age) = self.max_output_age {
            let age = meta
                .modified()
                .ok()
                .and_then(|modified| modified.elapsed().ok())
                .unwrap_or_default();
            if age > max_age {
                info!(token, age_secs = age.as_secs(), "Output expired");
                return Err(GatewayError::NotFound);
            }
        }

        let extension = resolve_extension(self.registry(), token);
        Ok(FileHandle {
            path,
            download_name: format!("{FALLBACK_STEM}{extension}"),
            size: meta.len(),
        })
    }
}

/// A token is a bare file name: no separators, no parent references
fn is_plain_token(token: &str) -> bool {
    !token.is_empty()
        && !token.contains(['/', '\\', '\0'])
        && !token.contains("..")
}

/// Friendly output name: the original base name with the resolved input
/// suffix replaced by the output extension.
pub fn suggested_name(original_filename: &str, input_extension: &str, output_extension: &str) -> String {
    let base = original_filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(original_filename);

    let suffix_len = input_extension.len();
    let stem = if !input_extension.is_empty()
        && base.len() >= suffix_len
        && base.is_char_boundary(base.len() - suffix_len)
        && base[base.len() - suffix_len..].eq_ignore_ascii_case(input_extension)
    {
        &base[..base.len() - suffix_len]
    } else {
        base
    };

    let stem = stem.trim();
    let stem = if stem.is_empty() { FALLBACK_STEM } else { stem };
    format!("{stem}{output_extension}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ToolsConfig;
    use crate::handlers::HandlerSet;
    use std::io::{Read, Write};
    use std::sync::Arc;
    use tempfile::TempDir;

    const REPORT: &str = "name,qty\napple,3\nbanana,12\ncherry,7\ndate,1\nelder,40\n";

    async fn gateway(dir: &TempDir, max_upload_bytes: u64) -> Gateway {
        let store = LocalStore::new(dir.path().join("uploads"), dir.path().join("converted"));
        store.ensure_dirs().await.unwrap();

        let dispatcher = Dispatcher::new(
            Arc::new(FormatRegistry::builtin()),
            HandlerSet::from_config(&ToolsConfig::default(), Some(dir.path())),
            Duration::from_secs(30),
        );

        Gateway::builder()
            .dispatcher(dispatcher)
            .store(store)
            .max_upload_bytes(max_upload_bytes)
            .build()
    }

    fn zip_bytes(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut cursor = std::io::Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut cursor);
            let options = zip::write::SimpleFileOptions::default();
            for (name, body) in entries {
                writer.start_file(*name, options).unwrap();
                writer.write_all(body.as_bytes()).unwrap();
            }
            writer.finish().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn test_suggested_name() {
        assert_eq!(suggested_name("Report.CSV", ".csv", ".json"), "Report.json");
        assert_eq!(suggested_name("photos.tar.gz", ".tar.gz", ".zip"), "photos.zip");
        assert_eq!(suggested_name("dir/sub\\a.zip", ".zip", ".7z"), "a.7z");
        assert_eq!(suggested_name(".zip", ".zip", ".tar"), "converted.tar");
    }

    #[test]
    fn test_plain_token() {
        assert!(is_plain_token("0f8c.zip"));
        assert!(!is_plain_token("../../etc/passwd"));
        assert!(!is_plain_token("a/b.zip"));
        assert!(!is_plain_token("a\\b.zip"));
        assert!(!is_plain_token(""));
    }

    #[tokio::test]
    async fn test_oversized_upload_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let gateway = gateway(&dir, 8).await;

        let err = gateway
            .accept_upload(REPORT.as_bytes(), "report.csv", "json")
            .await
            .unwrap_err();

        assert!(matches!(err, GatewayError::PayloadTooLarge { limit: 8, .. }));
        let stored = std::fs::read_dir(dir.path().join("uploads")).unwrap().count();
        assert_eq!(stored, 0);
    }

    #[tokio::test]
    async fn test_unsupported_format_carries_allowed() {
        let dir = TempDir::new().unwrap();
        let gateway = gateway(&dir, 1024).await;

        let err = gateway
            .accept_upload(REPORT.as_bytes(), "report.csv", ".zip")
            .await
            .unwrap_err();

        match err {
            GatewayError::UnsupportedFormat { input, allowed, .. } => {
                assert_eq!(input, ".csv");
                assert!(allowed.contains(&".json".to_string()));
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let err = gateway
            .accept_upload(b"??", "blob.xyz", ".pdf")
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::UnsupportedFormat { ref allowed, .. } if allowed.is_empty()));
        assert_eq!(std::fs::read_dir(dir.path().join("uploads")).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_traversal_tokens_are_invalid() {
        let dir = TempDir::new().unwrap();
        let gateway = gateway(&dir, 1024).await;

        for token in ["../../etc/passwd", "a/b.zip", "..", "x\\..\\y"] {
            let err = gateway.resolve_download(token).await.unwrap_err();
            assert!(matches!(err, GatewayError::InvalidToken), "{token}");
        }
    }

    #[tokio::test]
    async fn test_unknown_token_not_found() {
        let dir = TempDir::new().unwrap();
        let gateway = gateway(&dir, 1024).await;

        let err = gateway.resolve_download("missing.zip").await.unwrap_err();
        assert!(matches!(err, GatewayError::NotFound));
    }

    #[tokio::test]
    async fn test_csv_upload_to_json_download() {
        let dir = TempDir::new().unwrap();
        let gateway = gateway(&dir, 1024).await;

        let info = gateway
            .accept_upload(REPORT.as_bytes(), "Quarterly Report.csv", "JSON")
            .await
            .unwrap();

        assert!(info.token.ends_with(".json"));
        assert_eq!(info.suggested_name, "Quarterly Report.json");
        assert_eq!(info.category, HandlerCategory::Data);

        let handle = gateway.resolve_download(&info.token).await.unwrap();
        assert_eq!(handle.download_name, "converted.json");
        assert_eq!(handle.size, info.output_bytes);

        let body = std::fs::read_to_string(&handle.path).unwrap();
        let rows: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(rows.as_array().unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_zip_upload_to_tar_gz() {
        let dir = TempDir::new().unwrap();
        let gateway = gateway(&dir, 1024 * 1024).await;
        let payload = zip_bytes(&[("a.txt", "alpha"), ("docs/b.txt", "beta")]);

        let info = gateway
            .accept_upload(&payload, "bundle.zip", ".tar.gz")
            .await
            .unwrap();
        assert!(info.token.ends_with(".tar.gz"));

        let handle = gateway.resolve_download(&info.token).await.unwrap();
        assert_eq!(handle.download_name, "converted.tar.gz");

        let file = std::fs::File::open(&handle.path).unwrap();
        let mut archive = tar::Archive::new(flate2::read::GzDecoder::new(file));
        let mut files = Vec::new();
        for entry in archive.entries().unwrap() {
            let mut entry = entry.unwrap();
            if entry.header().entry_type().is_file() {
                let name = entry.path().unwrap().to_string_lossy().into_owned();
                let mut body = String::new();
                entry.read_to_string(&mut body).unwrap();
                files.push((name, body));
            }
        }
        files.sort();
        assert_eq!(
            files,
            vec![
                ("a.txt".to_string(), "alpha".to_string()),
                ("docs/b.txt".to_string(), "beta".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_failed_conversion_is_opaque() {
        let dir = TempDir::new().unwrap();
        let gateway = gateway(&dir, 1024).await;

        let err = gateway
            .accept_upload(b"not a zip", "broken.zip", ".tar")
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "conversion failed");
        assert!(matches!(err, GatewayError::ConversionFailed { .. }));
        assert_eq!(std::fs::read_dir(dir.path().join("converted")).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_expired_output_is_not_found() {
        let dir = TempDir::new().unwrap();
        let store = LocalStore::new(dir.path().join("uploads"), dir.path().join("converted"));
        store.ensure_dirs().await.unwrap();
        std::fs::write(store.output_path("old", ".json"), b"[]").unwrap();

        let gateway = Gateway::builder()
            .dispatcher(Dispatcher::new(
                Arc::new(FormatRegistry::builtin()),
                HandlerSet::from_config(&ToolsConfig::default(), None),
                Duration::from_secs(5),
            ))
            .store(store)
            .max_upload_bytes(1024)
            .max_output_age(Duration::ZERO)
            .build();

        tokio::time::sleep(Duration::from_millis(20)).await;
        let err = gateway.resolve_download("old.json").await.unwrap_err();
        assert!(matches!(err, GatewayError::NotFound));
    }
}
