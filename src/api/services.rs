use std::collections::HashMap;

use axum::{
    Json,
    body::Body,
    extract::{Multipart, Path, Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use tracing::{debug, info};

use super::{
    models::{FormatsQuery, FormatsResponse, HealthResponse, UploadResponse},
    state::AppState,
    utils::{content_disposition, content_type_for, target_formats},
};
use crate::api::error::ApiError;
use crate::formats::{FormatRegistry, resolve_extension};
use crate::gateway::GatewayError;
use crate::humanize::ByteSize;

/// Conversion endpoint (POST /convert)
///
/// Multipart form with a `file` part and a `format` text part naming the
/// target extension (`pdf`, `.tar.gz`, ...). The whole conversion runs
/// inside the request; the response carries the download token.
pub async fn convert_file(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let limit = state.gateway.max_upload_bytes();
    let mut upload: Option<(String, Bytes)> = None;
    let mut format: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::from_multipart(e, limit))?
    {
        match field.name() {
            Some("file") => {
                let filename = field.file_name().unwrap_or_default().to_string();
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::from_multipart(e, limit))?;
                upload = Some((filename, data));
            }
            Some("format") => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ApiError::from_multipart(e, limit))?;
                format = Some(text.trim().to_string());
            }
            other => debug!(field = ?other, "Ignoring multipart field"),
        }
    }

    let (filename, data) = upload
        .filter(|(name, _)| !name.is_empty())
        .ok_or_else(|| ApiError::InvalidPayload("no file uploaded".into()))?;
    let format = format
        .filter(|f| !f.is_empty())
        .ok_or_else(|| ApiError::InvalidPayload("no target format given".into()))?;

    let info = match state.gateway.accept_upload(&data, &filename, &format).await {
        Ok(info) => info,
        Err(err) => {
            match err {
                GatewayError::ConversionFailed { .. } => {
                    state.metrics.upload_accepted();
                    state.metrics.conversion_failed();
                }
                _ => state.metrics.upload_rejected(),
            }
            return Err(err.into());
        }
    };

    state.metrics.upload_accepted();
    state.metrics.conversion_succeeded();

    let response = UploadResponse {
        success: true,
        label: FormatRegistry::label(&info.output_extension),
        format_name: FormatRegistry::format_name(&info.output_extension),
        size_kb: ByteSize(info.output_bytes).as_kib(),
        original_name: info.suggested_name,
        token: info.token,
    };

    Ok((StatusCode::OK, Json(response)))
}

/// Download endpoint (GET /download/{token})
pub async fn download_file(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<Response, ApiError> {
    let handle = state.gateway.resolve_download(&token).await?;

    let data = tokio::fs::read(&handle.path).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => ApiError::NotFound,
        _ => {
            tracing::error!(token, error = %e, "Failed to read output");
            ApiError::Internal
        }
    })?;

    let extension = resolve_extension(state.registry(), &token);
    state.metrics.download_served();
    info!(token, size = handle.size, "Serving download");

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type_for(&extension).as_ref())
        .header(
            header::CONTENT_DISPOSITION,
            content_disposition(&handle.download_name),
        )
        .header(header::CONTENT_LENGTH, data.len())
        .body(Body::from(Bytes::from(data)))
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to build download response");
            ApiError::Internal
        })
}

/// Format listing endpoint (GET /formats?filename=...)
///
/// Resolves the file's extension the same way an upload would and lists
/// the targets it can be converted to. Unknown inputs get an empty list.
pub async fn list_formats(
    State(state): State<AppState>,
    Query(query): Query<FormatsQuery>,
) -> impl IntoResponse {
    let input = resolve_extension(state.registry(), &query.filename);
    let targets = target_formats(state.registry(), &input);

    Json(FormatsResponse { input, targets })
}

/// Health check endpoint (GET /health)
///
/// Reports whether the upload and output directories exist and the
/// in-process conversion counters. Returns 503 if a directory is missing.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let (uploads, outputs) = state.gateway.store().dirs_present().await;

    let mut components = HashMap::new();
    components.insert("api".to_string(), "healthy".to_string());
    for (name, present) in [("upload_dir", uploads), ("output_dir", outputs)] {
        let status = if present { "healthy" } else { "missing" };
        components.insert(name.to_string(), status.to_string());
    }

    let all_healthy = components.values().all(|status| status == "healthy");
    let (overall_status, status_code) = if all_healthy {
        ("healthy", StatusCode::OK)
    } else {
        ("unhealthy", StatusCode::SERVICE_UNAVAILABLE)
    };

    let response = HealthResponse {
        status: overall_status.to_string(),
        components,
        version: env!("CARGO_PKG_VERSION").to_string(),
        counters: state.metrics.snapshot(),
        checked_at: chrono::Utc::now(),
    };

    (status_code, Json(response))
}
