//! Error types for keystone-daemon

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use keystone_claims::ClaimsError;
use keystone_resolver::ResolverError;
use keystone_types::SpecValidationError;
use serde::Serialize;
use thiserror::Error;

/// Daemon-level errors
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Server startup error
    #[error("Server error: {0}")]
    Server(String),

    /// Storage error
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Message bus error
    #[error("Bus error: {0}")]
    Bus(#[from] ResolverError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Storage-specific errors
#[derive(Debug, Error)]
pub enum StorageError {
    /// Conflict (e.g., entity is being deleted)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Invalid data
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// Backend unavailable
    #[error("Connection error: {0}")]
    Connection(String),
}

/// Errors from a single reconciliation attempt
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Claims error: {0}")]
    Claims(#[from] ClaimsError),

    #[error("Invalid spec: {0}")]
    Validation(#[from] SpecValidationError),

    #[error("Resolver error: {0}")]
    Resolver(#[from] ResolverError),
}

impl ReconcileError {
    /// Transient failures are requeued with backoff; the rest wait for the
    /// next trigger.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ReconcileError::Storage(_) | ReconcileError::Resolver(_))
    }
}

/// API-specific errors
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Bad request
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Conflict
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(#[from] SpecValidationError),

    /// Storage error
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            ApiError::Conflict(_) => (StatusCode::CONFLICT, "CONFLICT"),
            ApiError::Validation(_) => (StatusCode::UNPROCESSABLE_ENTITY, "VALIDATION_ERROR"),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
            ApiError::Storage(StorageError::Conflict(_)) => (StatusCode::CONFLICT, "CONFLICT"),
            ApiError::Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, "STORAGE_ERROR"),
        };

        let body = ErrorResponse {
            error: self.to_string(),
            code: code.to_string(),
        };

        (status, Json(body)).into_response()
    }
}

/// Result type alias for API operations
pub type ApiResult<T> = Result<T, ApiError>;

/// Result type alias for daemon operations
pub type DaemonResult<T> = Result<T, DaemonError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_error_status_codes() {
        assert_eq!(
            ApiError::NotFound("test".to_string()).into_response().status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::Validation(SpecValidationError::Empty("root_ref.name"))
                .into_response()
                .status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            ApiError::Storage(StorageError::Conflict("deleting".to_string()))
                .into_response()
                .status(),
            StatusCode::CONFLICT
        );
    }

    #[test]
    fn test_retryable_errors() {
        let storage = StorageError::Connection("down".to_string());
        assert!(ReconcileError::Storage(storage).is_retryable());
        let resolver = ResolverError::Transport("connection lost".to_string());
        assert!(ReconcileError::Resolver(resolver).is_retryable());

        let claims = ClaimsError::InvalidSigner("bad seed".to_string());
        assert!(!ReconcileError::Claims(claims).is_retryable());
        let spec = SpecValidationError::InvalidCidr("x".to_string());
        assert!(!ReconcileError::Validation(spec).is_retryable());
    }
}
