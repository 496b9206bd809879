//! JSON error responses for everything that fails before a stream starts.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use cordon_api_models::ErrorBody;
use cordon_exec::{GateError, RunError};

/// Structured API error rendered as `{"error": ...}` with a status code.
#[derive(Debug)]
pub(crate) struct ApiError {
    pub(crate) status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub(crate) fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub(crate) fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, message)
    }

    pub(crate) fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorBody {
                error: self.message,
            }),
        )
            .into_response()
    }
}

// Gate rejections happen before any process exists.
impl From<GateError> for ApiError {
    fn from(error: GateError) -> Self {
        Self::forbidden(error.to_string())
    }
}

impl From<RunError> for ApiError {
    fn from(error: RunError) -> Self {
        Self::internal(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gate_errors_map_to_forbidden() {
        let error = GateError::PathResolution {
            command: "curl".to_string(),
            details: "'curl' was not found on PATH".to_string(),
        };
        let api_error = ApiError::from(error);
        assert_eq!(api_error.status, StatusCode::FORBIDDEN);
    }

    #[test]
    fn run_errors_map_to_internal() {
        let error = RunError::PipeMissing { stream: "stdout" };
        let api_error = ApiError::from(error);
        assert_eq!(api_error.status, StatusCode::INTERNAL_SERVER_ERROR);
    }
}
