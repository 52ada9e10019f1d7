use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::error::{CoordinatorError, PersistenceError, ValidationError};

/// JSON error envelope returned by every control-surface handler on
/// failure. `kind` is the error taxonomy's machine-readable tag (spec.md
/// §7); `message` is human-readable detail for logs or a UI toast.
#[derive(Debug, Serialize)]
struct ErrorBody {
    kind: &'static str,
    message: String,
}

/// Maps the error-handling taxonomy of spec.md §7 onto HTTP status codes.
/// Per-request transport/script errors never reach this type — they are
/// recorded on the `ResponseRecord`/`ScriptResult` itself, not raised here.
/// Only coordinator-level errors (`invalid_config`, `not_found`,
/// `conflict`) and persistence failures surface synchronously to the
/// caller, as spec.md §7's propagation policy requires.
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    Conflict(String),
    InvalidConfig(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind, message) = match self {
            Self::NotFound(message) => (StatusCode::NOT_FOUND, "not_found", message),
            Self::Conflict(message) => (StatusCode::CONFLICT, "conflict", message),
            Self::InvalidConfig(message) => (StatusCode::BAD_REQUEST, "invalid_config", message),
            Self::Internal(message) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", message),
        };
        (status, Json(ErrorBody { kind, message })).into_response()
    }
}

impl From<CoordinatorError> for ApiError {
    fn from(err: CoordinatorError) -> Self {
        match err {
            CoordinatorError::NotFound { run_id } => Self::NotFound(format!("run '{run_id}' not found")),
            CoordinatorError::Conflict { run_id, state } => {
                Self::Conflict(format!("run '{run_id}' is '{state}'"))
            }
            CoordinatorError::InvalidConfig { reason } => Self::InvalidConfig(reason),
            CoordinatorError::Failed { run_id, reason } => {
                Self::Internal(format!("run '{run_id}' failed: {reason}"))
            }
        }
    }
}

impl From<PersistenceError> for ApiError {
    fn from(err: PersistenceError) -> Self {
        match err {
            PersistenceError::RunNotFound { run_id } => Self::NotFound(format!("run '{run_id}' not found")),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        Self::InvalidConfig(err.to_string())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(err: JsonRejection) -> Self {
        Self::InvalidConfig(err.body_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coordinator_not_found_maps_to_404() {
        let response = ApiError::from(CoordinatorError::NotFound { run_id: "x".to_owned() }).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn persistence_run_not_found_maps_to_404() {
        let response =
            ApiError::from(PersistenceError::RunNotFound { run_id: "x".to_owned() }).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn invalid_config_maps_to_400() {
        let response = ApiError::from(CoordinatorError::InvalidConfig { reason: "bad".to_owned() })
            .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
