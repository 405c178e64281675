//! API error type
//!
//! Maps crate errors onto HTTP statuses with a JSON body of the form
//! `{"error": {"code": "...", "message": "..."}}`.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::error::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Operation disabled on this appliance (403)
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Another long-running job is active (409)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        match err {
            Error::Busy { active } => ApiError::Conflict(format!("Another operation is already running ({})", active)),
            Error::Validation(msg) => ApiError::BadRequest(msg),
            Error::NotFound(msg) => ApiError::NotFound(msg),
            Error::Common(avppi_common::Error::InvalidInput(msg)) => ApiError::BadRequest(msg),
            other => {
                error!("Request failed: {}", other);
                ApiError::Internal(other.to_string())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, "FORBIDDEN", msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg),
        };

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::JobKind;

    #[test]
    fn test_error_mapping() {
        assert!(matches!(
            ApiError::from(Error::Busy { active: JobKind::Sync }),
            ApiError::Conflict(msg) if msg.contains("sync")
        ));
        assert!(matches!(ApiError::from(Error::Validation("bad".into())), ApiError::BadRequest(_)));
        assert!(matches!(ApiError::from(Error::NotFound("x".into())), ApiError::NotFound(_)));
        assert!(matches!(ApiError::from(Error::Job("boom".into())), ApiError::Internal(_)));
        assert!(matches!(
            ApiError::from(Error::Common(avppi_common::Error::InvalidInput("25:00".into()))),
            ApiError::BadRequest(_)
        ));
        assert!(matches!(
            ApiError::from(Error::Common(avppi_common::Error::Config("bad".into()))),
            ApiError::Internal(_)
        ));
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(ApiError::Forbidden("no".into()).into_response().status(), StatusCode::FORBIDDEN);
        assert_eq!(ApiError::Conflict("busy".into()).into_response().status(), StatusCode::CONFLICT);
    }
}
