//! API error type and JSON error bodies.
//!
//! Maps [`CurbsideError`] onto HTTP status codes. Invalid filter values never
//! reach this module; they are ordinary 200 responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tracing::error;

use curbside_core::error::CurbsideError;

/// JSON error response body.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    /// Machine-readable error code (e.g., "bad_request", "gateway_timeout").
    pub error: String,
    pub message: String,
}

#[derive(Debug)]
pub enum ApiError {
    /// 400 - missing or invalid parameters.
    BadRequest(String),
    /// 500 - storage failures and index inconsistencies.
    Internal(String),
    /// 503 - a collaborator needed for this operation is unreachable.
    ServiceUnavailable(String),
    /// 504 - the per-query deadline expired.
    GatewayTimeout(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            ApiError::Internal(msg) => {
                error!(message = %msg, "Request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg)
            }
            ApiError::ServiceUnavailable(msg) => {
                (StatusCode::SERVICE_UNAVAILABLE, "service_unavailable", msg)
            }
            ApiError::GatewayTimeout(msg) => (StatusCode::GATEWAY_TIMEOUT, "gateway_timeout", msg),
        };

        let body = ErrorBody {
            error: error_code.to_string(),
            message,
        };

        (status, Json(body)).into_response()
    }
}

impl From<CurbsideError> for ApiError {
    fn from(err: CurbsideError) -> Self {
        match &err {
            CurbsideError::Validation(msg) => ApiError::BadRequest(msg.clone()),
            CurbsideError::Timeout(_) => ApiError::GatewayTimeout(err.to_string()),
            e if e.is_collaborator() => ApiError::ServiceUnavailable(err.to_string()),
            _ => ApiError::Internal(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn status_of(err: CurbsideError) -> StatusCode {
        ApiError::from(err).into_response().status()
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            status_of(CurbsideError::Validation("empty".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(CurbsideError::Timeout(Duration::from_secs(30))),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            status_of(CurbsideError::Embedding("down".into())),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_of(CurbsideError::DimensionMismatch { expected: 3, actual: 2 }),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            status_of(CurbsideError::Storage("locked".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
