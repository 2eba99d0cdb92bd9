//! Scrum Poker error types.
//!
//! Every failure in the service is a [`PokerError`]. HTTP handlers return it
//! directly (see the `IntoResponse` impl); the websocket path logs it and
//! drops the offending frame. Store and internal details are logged
//! server-side and never echoed to clients.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Scrum Poker error type.
///
/// Maps to HTTP status codes:
/// - `Validation`: 400 Bad Request
/// - `SessionExpired`: 401 Unauthorized
/// - `PermissionDenied`: 403 Forbidden
/// - `NotFound`: 404 Not Found
/// - `Timeout`: 503 Service Unavailable
/// - `Store`, `Internal`: 500 Internal Server Error
#[derive(Debug, Error)]
pub enum PokerError {
    /// A required field is missing or malformed.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Room, user or session does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Action restricted to the scrum master, or to the connection's own user.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Session TTL has elapsed.
    #[error("Session expired")]
    SessionExpired,

    /// Registration hand-off, acknowledgment or room lock deadline missed.
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Presence store operation failed.
    #[error("Store error: {0}")]
    Store(String),

    /// Internal error (closed channels, serialization).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PokerError {
    /// Returns the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            PokerError::Validation(_) => StatusCode::BAD_REQUEST,
            PokerError::SessionExpired => StatusCode::UNAUTHORIZED,
            PokerError::PermissionDenied(_) => StatusCode::FORBIDDEN,
            PokerError::NotFound(_) => StatusCode::NOT_FOUND,
            PokerError::Timeout(_) => StatusCode::SERVICE_UNAVAILABLE,
            PokerError::Store(_) | PokerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns the stable machine-readable error code.
    pub fn error_code(&self) -> &'static str {
        match self {
            PokerError::Validation(_) => "VALIDATION_ERROR",
            PokerError::SessionExpired => "SESSION_EXPIRED",
            PokerError::PermissionDenied(_) => "PERMISSION_DENIED",
            PokerError::NotFound(_) => "NOT_FOUND",
            PokerError::Timeout(_) => "TIMEOUT",
            PokerError::Store(_) => "STORE_ERROR",
            PokerError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Returns a client-safe error message (no internal details).
    pub fn client_message(&self) -> String {
        match self {
            PokerError::Validation(msg)
            | PokerError::NotFound(msg)
            | PokerError::PermissionDenied(msg) => msg.clone(),
            PokerError::SessionExpired => "Session expired".to_string(),
            PokerError::Timeout(_) => "Service temporarily unavailable".to_string(),
            PokerError::Store(_) | PokerError::Internal(_) => {
                "An internal error occurred".to_string()
            }
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
}

impl IntoResponse for PokerError {
    fn into_response(self) -> Response {
        match &self {
            PokerError::Store(err) => {
                tracing::error!(target: "poker.store", error = %err, "Store operation failed");
            }
            PokerError::Internal(err) => {
                tracing::error!(target: "poker.internal", error = %err, "Internal error");
            }
            PokerError::Timeout(what) => {
                tracing::warn!(target: "poker.availability", timeout = %what, "Request timed out");
            }
            _ => {}
        }

        let status = self.status_code();
        let body = ErrorResponse {
            error: ErrorDetail {
                code: self.error_code(),
                message: self.client_message(),
            },
        };

        (status, Json(body)).into_response()
    }
}

/// Convert sqlx errors to `PokerError`.
impl From<sqlx::Error> for PokerError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => PokerError::NotFound("record not found".to_string()),
            other => PokerError::Store(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for PokerError {
    fn from(err: serde_json::Error) -> Self {
        PokerError::Internal(format!("serialization failed: {err}"))
    }
}

impl From<common::types::IdParseError> for PokerError {
    fn from(err: common::types::IdParseError) -> Self {
        PokerError::Validation(err.to_string())
    }
}
