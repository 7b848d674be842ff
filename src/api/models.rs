//! Response bodies for the ConvertBox HTTP API.
//!
//! - `POST /convert` returns an [`UploadResponse`] carrying the download token
//! - `GET /download/{token}` streams the file; errors use [`ErrorResponse`]
//! - `GET /formats?filename=` returns a [`FormatsResponse`] for format pickers
//! - `GET /health` returns a [`HealthResponse`]
//!
//! An upload response, as JSON:
//!
//! ```json
//! {
//!   "success": true,
//!   "token": "6f1c1d0e-3f0f-4a8e-9d43-1b6f3c1d2a9e.tar.gz",
//!   "original_name": "photos.tar.gz",
//!   "label": "TAR.GZ",
//!   "format_name": "Gzipped Tar Archive",
//!   "size_kb": 12.5
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::formats::HandlerCategory;
use crate::observability::MetricsSnapshot;

#[derive(Debug, Serialize, Deserialize)]
pub struct UploadResponse {
    pub success: bool,
    pub token: String,
    /// Suggested name for the converted file
    pub original_name: String,
    pub label: String,
    pub format_name: String,
    pub size_kb: f64,
}

#[derive(Debug, Deserialize)]
pub struct FormatsQuery {
    pub filename: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FormatsResponse {
    pub input: String,
    pub targets: Vec<TargetFormat>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TargetFormat {
    pub extension: String,
    pub label: String,
    pub format_name: String,
    pub category: HandlerCategory,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: &'static str,
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub components: HashMap<String, String>,
    pub version: String,
    pub counters: MetricsSnapshot,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub checked_at: chrono::DateTime<chrono::Utc>,
}
