//! Error types for the docflow gateway

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

/// Result type alias for gateway operations
pub type Result<T> = std::result::Result<T, Error>;

/// Closed classification of every failure the gateway can surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The external service could not be reached
    UpstreamUnreachable,
    /// The external service answered with a non-success status
    UpstreamRejected,
    /// Requested task, file or artifact is absent
    NotFound,
    /// A poller exhausted its attempts
    Timeout,
    /// The caller sent something unusable
    InvalidRequest,
    /// Anything else
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::UpstreamUnreachable => "upstream_unreachable",
            ErrorKind::UpstreamRejected => "upstream_rejected",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Timeout => "timeout",
            ErrorKind::InvalidRequest => "invalid_request",
            ErrorKind::Internal => "internal",
        }
    }
}

/// Gateway errors
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Missing or malformed request parameters
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Path outside the allow-list
    #[error("Access denied: {0}")]
    Forbidden(String),

    /// Path with no known container/host prefix
    #[error("No path mapping for '{0}'")]
    UnmappedPath(String),

    /// Task, file or artifact not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// External service could not be reached
    #[error("Service '{service}' unreachable: {message}")]
    UpstreamUnreachable { service: String, message: String },

    /// External service responded with a failure
    #[error("Service '{service}' rejected request with status {status}: {body}")]
    UpstreamRejected {
        service: String,
        status: u16,
        body: String,
    },

    /// Poller gave up
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create an invalid request error
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    /// Create a not found error
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    /// Create an unreachable-upstream error
    pub fn unreachable(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::UpstreamUnreachable {
            service: service.into(),
            message: message.into(),
        }
    }

    /// Create a rejected-upstream error
    pub fn rejected(service: impl Into<String>, status: u16, body: impl Into<String>) -> Self {
        Self::UpstreamRejected {
            service: service.into(),
            status,
            body: body.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Closed kind of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidRequest(_)
            | Error::Forbidden(_)
            | Error::UnmappedPath(_)
            | Error::Json(_) => ErrorKind::InvalidRequest,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::UpstreamUnreachable { .. } => ErrorKind::UpstreamUnreachable,
            Error::UpstreamRejected { .. } => ErrorKind::UpstreamRejected,
            Error::Timeout(_) => ErrorKind::Timeout,
            Error::Config(_) | Error::Io(_) | Error::Internal(_) => ErrorKind::Internal,
        }
    }

    /// HTTP status used when this error reaches a handler boundary
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::Forbidden(_) => StatusCode::FORBIDDEN,
            Error::UpstreamRejected { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            _ => match self.kind() {
                ErrorKind::InvalidRequest => StatusCode::BAD_REQUEST,
                ErrorKind::NotFound => StatusCode::NOT_FOUND,
                ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
                ErrorKind::UpstreamUnreachable
                | ErrorKind::UpstreamRejected
                | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        let service = err
            .url()
            .and_then(|u| u.host_str().map(|h| h.to_string()))
            .unwrap_or_else(|| "unknown".to_string());
        Error::UpstreamUnreachable {
            service,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let kind = self.kind();

        let body = match &self {
            Error::NotFound(msg) => json!({
                "ok": false,
                "found": false,
                "kind": kind,
                "message": msg,
            }),
            Error::UpstreamRejected { status, body, .. } => json!({
                "ok": false,
                "kind": kind,
                "message": format!("Backend API error: {}", status),
                "details": body,
            }),
            Error::UpstreamUnreachable { message, .. } => json!({
                "ok": false,
                "kind": kind,
                "message": message,
            }),
            other => json!({
                "ok": false,
                "kind": kind,
                "message": other.to_string(),
            }),
        };

        if status.is_server_error() {
            tracing::error!(kind = kind.as_str(), "{}", self);
        }

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(Error::not_found("x").kind(), ErrorKind::NotFound);
        assert_eq!(Error::UnmappedPath("/x".into()).kind(), ErrorKind::InvalidRequest);
        assert_eq!(Error::Timeout("ocr".into()).kind(), ErrorKind::Timeout);
        assert_eq!(
            Error::rejected("ocr", 422, "bad").kind(),
            ErrorKind::UpstreamRejected
        );
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(Error::not_found("x").status_code(), StatusCode::NOT_FOUND);
        assert_eq!(Error::Forbidden("x".into()).status_code(), StatusCode::FORBIDDEN);
        assert_eq!(
            Error::rejected("ocr", 422, "bad").status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            Error::unreachable("ocr", "refused").status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(Error::Timeout("x".into()).status_code(), StatusCode::GATEWAY_TIMEOUT);
    }

    #[test]
    fn test_kind_serializes_snake_case() {
        let value = serde_json::to_value(ErrorKind::UpstreamUnreachable).unwrap();
        assert_eq!(value, "upstream_unreachable");
    }
}
