//! Error types for AnswerForge
//!
//! Provides a comprehensive error handling system with:
//! - Distinct error types for different failure modes
//! - HTTP status code mapping
//! - Structured, sanitized error bodies
//! - Error codes for client handling

use crate::resilience::{sanitize, CriticalOperationError};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

/// Error codes for machine-readable error identification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Validation errors (1xxx)
    ValidationError,

    // Rate limiting (6xxx)
    RateLimited,

    // External service errors (8xxx)
    UpstreamError,
    Timeout,
    CircuitBreakerOpen,
    OperationFailed,
    CacheError,

    // Internal errors (9xxx)
    StageError,
    InternalError,
    ConfigurationError,
    SerializationError,
}

impl ErrorCode {
    /// Get the numeric code for this error
    pub fn as_code(&self) -> u16 {
        match self {
            ErrorCode::ValidationError => 1001,

            ErrorCode::RateLimited => 6001,

            ErrorCode::UpstreamError => 8001,
            ErrorCode::Timeout => 8002,
            ErrorCode::CircuitBreakerOpen => 8003,
            ErrorCode::OperationFailed => 8004,
            ErrorCode::CacheError => 8005,

            ErrorCode::StageError => 9001,
            ErrorCode::InternalError => 9002,
            ErrorCode::ConfigurationError => 9003,
            ErrorCode::SerializationError => 9004,
        }
    }
}

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Validation errors
    #[error("Validation failed: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    // Timeouts
    #[error("Operation '{operation}' timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    // External service errors
    #[error("Upstream {service} returned HTTP {status}: {message}")]
    Upstream {
        service: String,
        status: u16,
        message: String,
    },

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("Rate limit exceeded for {service}")]
    RateLimited {
        service: String,
        retry_after_secs: Option<u64>,
    },

    #[error("Circuit breaker open for service: {service}")]
    CircuitBreakerOpen { service: String },

    #[error(transparent)]
    CriticalOperation(#[from] CriticalOperationError),

    #[error("Cache error: {message}")]
    CacheError { message: String },

    // Pipeline errors
    #[error("Stage {stage} failed: {message}")]
    Stage { stage: String, message: String },

    // Internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Generic
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl AppError {
    /// Shorthand for a validation error without a field
    pub fn validation(message: impl Into<String>) -> Self {
        AppError::Validation {
            message: message.into(),
            field: None,
        }
    }

    /// Shorthand for an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        AppError::Internal {
            message: message.into(),
        }
    }

    /// Get the error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::Validation { .. } => ErrorCode::ValidationError,
            AppError::Timeout { .. } => ErrorCode::Timeout,
            AppError::Upstream { .. } | AppError::HttpClient(_) => ErrorCode::UpstreamError,
            AppError::RateLimited { .. } => ErrorCode::RateLimited,
            AppError::CircuitBreakerOpen { .. } => ErrorCode::CircuitBreakerOpen,
            AppError::CriticalOperation(_) => ErrorCode::OperationFailed,
            AppError::CacheError { .. } => ErrorCode::CacheError,
            AppError::Stage { .. } => ErrorCode::StageError,
            AppError::Internal { .. } | AppError::Other(_) => ErrorCode::InternalError,
            AppError::Configuration { .. } => ErrorCode::ConfigurationError,
            AppError::Serialization(_) => ErrorCode::SerializationError,
        }
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            AppError::Validation { .. } => StatusCode::BAD_REQUEST,

            // 429 Too Many Requests
            AppError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,

            // 500 Internal Server Error
            AppError::Stage { .. }
            | AppError::Internal { .. }
            | AppError::Configuration { .. }
            | AppError::Serialization(_)
            | AppError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,

            // 502 Bad Gateway
            AppError::Upstream { .. }
            | AppError::HttpClient(_)
            | AppError::CriticalOperation(_) => StatusCode::BAD_GATEWAY,

            // 503 Service Unavailable
            AppError::CircuitBreakerOpen { .. } | AppError::CacheError { .. } => {
                StatusCode::SERVICE_UNAVAILABLE
            }

            // 504 Gateway Timeout
            AppError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    /// Check if this error should be logged at error level
    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }

    /// Check if this error is a client error
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }
}

/// Structured error body for an HTTP layer
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: ErrorDetails,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl ErrorBody {
    /// Build a sanitized body from an error
    pub fn from_error(err: &AppError) -> Self {
        let (details, request_id) = match err {
            AppError::CriticalOperation(op) => (
                serde_json::to_value(&op.response).ok(),
                op.response.request_id.clone(),
            ),
            AppError::RateLimited {
                retry_after_secs: Some(secs),
                ..
            } => (Some(serde_json::json!({ "retry_after_secs": secs })), None),
            _ => (None, None),
        };

        ErrorBody {
            error: ErrorDetails {
                code: err.code(),
                message: sanitize(&err.to_string()),
                details,
                request_id,
            },
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorBody::from_error(&self);

        // Log based on severity
        if self.is_server_error() {
            tracing::error!(
                error = %body.error.message,
                code = ?body.error.code,
                status = status.as_u16(),
                "Server error"
            );
        } else if self.is_client_error() {
            tracing::warn!(
                error = %body.error.message,
                code = ?body.error.code,
                status = status.as_u16(),
                "Client error"
            );
        }

        (status, Json(body)).into_response()
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Configuration {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_mapping() {
        let err = AppError::Timeout {
            operation: "wikipedia.fetch".into(),
            timeout_ms: 1000,
        };
        assert_eq!(err.code(), ErrorCode::Timeout);
        assert_eq!(err.status_code(), StatusCode::GATEWAY_TIMEOUT);
        assert!(err.is_server_error());
    }

    #[test]
    fn test_validation_error() {
        let err = AppError::Validation {
            message: "Query must not be empty".into(),
            field: Some("query".into()),
        };
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert!(!err.is_server_error());
        assert!(err.is_client_error());
    }

    #[test]
    fn test_error_body_is_sanitized() {
        let err = AppError::Upstream {
            service: "openalex".into(),
            status: 500,
            message: "bad request with api_key=abc123".into(),
        };
        let body = ErrorBody::from_error(&err);
        assert!(!body.error.message.contains("abc123"));
        assert_eq!(body.error.code, ErrorCode::UpstreamError);
    }

    #[test]
    fn test_rate_limited_maps_to_429() {
        let err = AppError::RateLimited {
            service: "hackernews".into(),
            retry_after_secs: Some(120),
        };
        assert_eq!(err.code(), ErrorCode::RateLimited);
        assert_eq!(err.code().as_code(), 6001);
        assert_eq!(err.status_code(), StatusCode::TOO_MANY_REQUESTS);
        assert!(err.is_client_error());

        let body = ErrorBody::from_error(&err);
        assert_eq!(body.error.details, Some(serde_json::json!({ "retry_after_secs": 120 })));
    }
}
