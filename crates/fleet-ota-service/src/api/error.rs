//! HTTP error mapping

use axum::{
    Json,
    extract::{multipart::MultipartError, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use fleet_ota_rollout::{ErrorKind, OtaError};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, warn};

/// Errors returned by API handlers
#[derive(Error, Debug)]
pub enum ApiError {
    /// Error from the rollout core
    #[error(transparent)]
    Ota(#[from] OtaError),

    /// Malformed request the core never saw
    #[error("{0}")]
    BadRequest(String),

    /// Download token missing, wrong or expired
    #[error("download link is invalid or expired")]
    Forbidden,

    /// Route exists but the resource is not served by this instance
    #[error("{0} not available")]
    Unavailable(&'static str),
}

/// JSON error body
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    /// Human readable message
    pub error: String,
    /// Stable machine readable code
    pub code: &'static str,
}

impl ApiError {
    /// HTTP status for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Ota(e) => match e.kind() {
                ErrorKind::Validation => StatusCode::BAD_REQUEST,
                ErrorKind::NotFound | ErrorKind::NoPendingUpdate => StatusCode::NOT_FOUND,
                ErrorKind::Integrity => StatusCode::UNPROCESSABLE_ENTITY,
                ErrorKind::Storage => StatusCode::SERVICE_UNAVAILABLE,
                ErrorKind::Concurrency => StatusCode::CONFLICT,
                ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::Unavailable(_) => StatusCode::NOT_FOUND,
        }
    }

    /// Stable code placed in the response body
    pub fn error_code(&self) -> &'static str {
        match self {
            ApiError::Ota(e) => e.kind().as_str(),
            ApiError::BadRequest(_) => ErrorKind::Validation.as_str(),
            ApiError::Forbidden => "forbidden",
            ApiError::Unavailable(_) => ErrorKind::NotFound.as_str(),
        }
    }

    fn message(&self) -> String {
        match self {
            ApiError::Ota(OtaError::NoPendingUpdate(_)) => "no pending update".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<MultipartError> for ApiError {
    fn from(e: MultipartError) -> Self {
        ApiError::BadRequest(format!("invalid multipart body: {}", e.body_text()))
    }
}

impl From<JsonRejection> for ApiError {
    fn from(e: JsonRejection) -> Self {
        ApiError::BadRequest(e.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if status.is_server_error() {
            error!(status = %status, error = %self, "Request failed");
        } else if matches!(&self, ApiError::Ota(e) if e.is_security_relevant()) {
            warn!(error = %self, "Integrity check failed");
        }

        let body = ErrorBody {
            error: self.message(),
            code: self.error_code(),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_ota_rollout::{EntityKind, IntegrityFailure};
    use std::time::Duration;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (
                ApiError::from(OtaError::validation("version", "bad")),
                StatusCode::BAD_REQUEST,
                "validation",
            ),
            (
                ApiError::from(OtaError::not_found(EntityKind::Deployment, "d1")),
                StatusCode::NOT_FOUND,
                "not_found",
            ),
            (
                ApiError::from(OtaError::NoPendingUpdate("dev-1".to_string())),
                StatusCode::NOT_FOUND,
                "no_pending_update",
            ),
            (
                ApiError::from(OtaError::Integrity {
                    release_id: "r1".to_string(),
                    failure: IntegrityFailure::SignatureInvalid("bad signature".to_string()),
                }),
                StatusCode::UNPROCESSABLE_ENTITY,
                "integrity",
            ),
            (
                ApiError::from(OtaError::StorageTimeout {
                    operation: "get_binary",
                    timeout: Duration::from_secs(1),
                }),
                StatusCode::SERVICE_UNAVAILABLE,
                "storage",
            ),
            (ApiError::Forbidden, StatusCode::FORBIDDEN, "forbidden"),
        ];

        for (error, status, code) in cases {
            assert_eq!(error.status_code(), status, "{}", error);
            assert_eq!(error.error_code(), code, "{}", error);
        }
    }

    #[test]
    fn test_no_pending_update_message() {
        let error = ApiError::from(OtaError::NoPendingUpdate("dev-1".to_string()));
        assert_eq!(error.message(), "no pending update");
    }
}
