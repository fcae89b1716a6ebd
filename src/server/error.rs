//! Error-to-HTTP response conversion.
//!
//! Route handlers return `Result<T, AppError>`; any
//! [`previewly_common::Error`] converts with `?`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use previewly_common::Error;
use serde_json::json;

/// Wrapper so we can implement `IntoResponse` for an external type.
#[derive(Debug)]
pub struct AppError(pub Error);

impl From<Error> for AppError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

impl AppError {
    /// Stable machine-readable error code.
    pub fn code(&self) -> &'static str {
        match &self.0 {
            Error::InvalidInput(_) => "invalid_input",
            Error::LaunchFailure { .. } => "launch_failure",
            Error::ReadinessTimeout { .. } => "readiness_timeout",
            Error::CapacityExceeded { .. } => "capacity_exceeded",
            Error::NotFound { .. } => "not_found",
            Error::SourceUnavailable(_) => "source_unavailable",
            Error::Conflict(_) => "conflict",
            Error::Io { .. } => "io_error",
            Error::Config(_) => "config_error",
            Error::Internal(_) => "internal_error",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        if status.is_server_error() {
            if let Error::ReadinessTimeout {
                diagnostics: Some(diagnostics),
                ..
            } = &self.0
            {
                tracing::warn!(status = %status, error = %self.0, %diagnostics, "Preview failed");
            } else {
                tracing::error!(status = %status, error = %self.0, "Server error in API handler");
            }
        }

        let body = json!({
            "error": self.0.to_string(),
            "code": self.code(),
        });

        (status, axum::Json(body)).into_response()
    }
}
