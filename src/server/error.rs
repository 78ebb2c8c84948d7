//! HTTP mapping for [`crate::Error`]
//!
//! Bodies are `{"error": {"code", "message"}}`. Server-side faults are
//! logged and reported with a generic message.

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::Error;

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetail {
    /// Machine-readable code, e.g. `LINK_EXISTS`
    pub code: String,
    pub message: String,
}

impl Error {
    pub fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            Error::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            Error::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            Error::EntityExists(_) => (StatusCode::CONFLICT, "ALREADY_EXISTS"),
            Error::DuplicateLink { .. } => (StatusCode::CONFLICT, "LINK_EXISTS"),
            Error::TransientStorage(_) => (StatusCode::SERVICE_UNAVAILABLE, "STORAGE_UNAVAILABLE"),
            Error::UnexpectedStorage(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        let message = match &self {
            Error::DuplicateLink { .. } => "Link already exists".to_string(),
            Error::TransientStorage(_) => "Storage temporarily unavailable, retry the request".to_string(),
            Error::UnexpectedStorage(_) => "An internal error occurred".to_string(),
            other => other.to_string(),
        };

        match &self {
            Error::UnexpectedStorage(_) => tracing::error!(error = %self, "internal server error"),
            Error::TransientStorage(_) => tracing::warn!(error = %self, "transient storage failure"),
            _ => tracing::debug!(error = %self, "client error"),
        }

        let body = ErrorBody {
            error: ErrorDetail {
                code: code.to_string(),
                message,
            },
        };

        if status == StatusCode::SERVICE_UNAVAILABLE {
            (status, [(header::RETRY_AFTER, "1")], Json(body)).into_response()
        } else {
            (status, Json(body)).into_response()
        }
    }
}
