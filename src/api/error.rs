use axum::{Json, extract::multipart::MultipartError, http::StatusCode, response::IntoResponse};
use thiserror::Error;
use tracing::error;

use super::models::ErrorResponse;
use crate::gateway::GatewayError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    InvalidPayload(String),
    #[error("file too large: upload limit is {limit} bytes")]
    PayloadTooLarge { limit: u64 },
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
    #[error("conversion failed")]
    ConversionFailed,
    #[error("internal error")]
    Internal,
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::InvalidPayload(_) => StatusCode::BAD_REQUEST,
            ApiError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::UnsupportedFormat { .. } => StatusCode::BAD_REQUEST,
            ApiError::InvalidToken => StatusCode::BAD_REQUEST,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::ConversionFailed => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::InvalidPayload(_) => "INVALID_PAYLOAD",
            ApiError::PayloadTooLarge { .. } => "PAYLOAD_TOO_LARGE",
            ApiError::UnsupportedFormat { .. } => "UNSUPPORTED_FORMAT",
            ApiError::InvalidToken => "INVALID_TOKEN",
            ApiError::NotFound => "NOT_FOUND",
            ApiError::ConversionFailed => "CONVERSION_FAILED",
            ApiError::Internal => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        let allowed = match &self {
            ApiError::UnsupportedFormat { allowed, .. } => Some(allowed.clone()),
            _ => None,
        };
        let body = ErrorResponse {
            code: self.code(),
            error: self.to_string(),
            allowed,
        };

        (status, Json(body)).into_response()
    }
}

impl From<GatewayError> for ApiError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::PayloadTooLarge { limit, .. } => ApiError::PayloadTooLarge { limit },
            GatewayError::UnsupportedFormat {
                input,
                requested,
                allowed,
            } => ApiError::UnsupportedFormat {
                input,
                requested,
                allowed,
            },
            GatewayError::InvalidToken => ApiError::InvalidToken,
            GatewayError::NotFound => ApiError::NotFound,
            GatewayError::ConversionFailed { .. } => ApiError::ConversionFailed,
            GatewayError::Storage(err) => {
                error!(error = %err, "Storage failure");
                ApiError::Internal
            }
        }
    }
}

impl ApiError {
    /// Body limit overruns surface as multipart errors while a field is read
    pub fn from_multipart(err: MultipartError, limit: u64) -> Self {
        if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
            return ApiError::PayloadTooLarge { limit };
        }
        ApiError::InvalidPayload(err.body_text())
    }
}
