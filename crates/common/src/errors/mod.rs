//! Error types for FinSight services
//!
//! Provides a comprehensive error handling system with:
//! - Distinct error types for setup, retrieval, tool and synthesis failures
//! - HTTP status code mapping
//! - Structured error responses
//! - Error codes for client handling

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
    InvalidToolParameters,

    // Resource errors (4xxx)
    NotFound,
    DocumentNotFound,
    UnknownTool,

    // Rate limiting (6xxx)
    RateLimited,

    // Retrieval errors (7xxx)
    RetrievalError,
    VectorIndexError,
    DimensionMismatch,

    // External service errors (8xxx)
    UpstreamError,
    UpstreamTimeout,
    EmbeddingError,
    GenerationError,
    AccountingError,
    ToolExecutionError,

    // Internal errors (9xxx)
    InternalError,
    ConfigurationError,
    SerializationError,
}

impl ErrorCode {
    /// Get the numeric code for this error
    pub fn as_code(&self) -> u16 {
        match self {
            // Validation (1xxx)
            ErrorCode::ValidationError => 1001,
            ErrorCode::InvalidToolParameters => 1002,

            // Resources (4xxx)
            ErrorCode::NotFound => 4001,
            ErrorCode::DocumentNotFound => 4002,
            ErrorCode::UnknownTool => 4003,

            // Rate limits (6xxx)
            ErrorCode::RateLimited => 6001,

            // Retrieval (7xxx)
            ErrorCode::RetrievalError => 7001,
            ErrorCode::VectorIndexError => 7002,
            ErrorCode::DimensionMismatch => 7003,

            // External (8xxx)
            ErrorCode::UpstreamError => 8001,
            ErrorCode::UpstreamTimeout => 8002,
            ErrorCode::EmbeddingError => 8003,
            ErrorCode::GenerationError => 8004,
            ErrorCode::AccountingError => 8005,
            ErrorCode::ToolExecutionError => 8006,

            // Internal (9xxx)
            ErrorCode::InternalError => 9001,
            ErrorCode::ConfigurationError => 9002,
            ErrorCode::SerializationError => 9003,
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

    #[error("Invalid parameters for tool {tool}: {message}")]
    InvalidToolParameters { tool: String, message: String },

    // Resource errors
    #[error("Resource not found: {resource_type} with id {id}")]
    NotFound { resource_type: String, id: String },

    #[error("Document not found: {id}")]
    DocumentNotFound { id: String },

    #[error("Unknown tool: {name}")]
    UnknownTool { name: String },

    // Rate limiting
    #[error("Rate limit exceeded: {limit} requests per second")]
    RateLimited { limit: u32 },

    // Retrieval errors
    #[error("Retrieval failed: {message}")]
    Retrieval { message: String },

    #[error("Vector index error: {message}")]
    VectorIndex { message: String },

    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    // External service errors
    #[error("Embedding service error: {message}")]
    EmbeddingError { message: String },

    #[error("Generation backend error: {message}")]
    Generation { message: String },

    #[error("Accounting data source error: {message}")]
    Accounting { message: String },

    #[error("Tool {tool} failed: {message}")]
    ToolExecution { tool: String, message: String },

    #[error("{service} timed out after {timeout_ms}ms")]
    UpstreamTimeout { service: String, timeout_ms: u64 },

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    // Internal errors
    #[error("Internal server error: {message}")]
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
    /// Shorthand for a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        AppError::Configuration {
            message: message.into(),
        }
    }

    /// Shorthand for a validation error on a named field
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        AppError::Validation {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Get the error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::Validation { .. } => ErrorCode::ValidationError,
            AppError::InvalidToolParameters { .. } => ErrorCode::InvalidToolParameters,
            AppError::NotFound { .. } => ErrorCode::NotFound,
            AppError::DocumentNotFound { .. } => ErrorCode::DocumentNotFound,
            AppError::UnknownTool { .. } => ErrorCode::UnknownTool,
            AppError::RateLimited { .. } => ErrorCode::RateLimited,
            AppError::Retrieval { .. } => ErrorCode::RetrievalError,
            AppError::VectorIndex { .. } => ErrorCode::VectorIndexError,
            AppError::DimensionMismatch { .. } => ErrorCode::DimensionMismatch,
            AppError::EmbeddingError { .. } => ErrorCode::EmbeddingError,
            AppError::Generation { .. } => ErrorCode::GenerationError,
            AppError::Accounting { .. } => ErrorCode::AccountingError,
            AppError::ToolExecution { .. } => ErrorCode::ToolExecutionError,
            AppError::UpstreamTimeout { .. } => ErrorCode::UpstreamTimeout,
            AppError::HttpClient(_) => ErrorCode::UpstreamError,
            AppError::Internal { .. } => ErrorCode::InternalError,
            AppError::Configuration { .. } => ErrorCode::ConfigurationError,
            AppError::Serialization(_) => ErrorCode::SerializationError,
            AppError::Other(_) => ErrorCode::InternalError,
        }
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            AppError::Validation { .. }
            | AppError::InvalidToolParameters { .. }
            | AppError::DimensionMismatch { .. } => StatusCode::BAD_REQUEST,

            // 404 Not Found
            AppError::NotFound { .. }
            | AppError::DocumentNotFound { .. }
            | AppError::UnknownTool { .. } => StatusCode::NOT_FOUND,

            // 429 Too Many Requests
            AppError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,

            // 500 Internal Server Error
            AppError::Internal { .. }
            | AppError::Configuration { .. }
            | AppError::Serialization(_)
            | AppError::ToolExecution { .. }
            | AppError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,

            // 502 Bad Gateway
            AppError::EmbeddingError { .. }
            | AppError::Generation { .. }
            | AppError::Accounting { .. }
            | AppError::HttpClient(_) => StatusCode::BAD_GATEWAY,

            // 503 Service Unavailable
            AppError::Retrieval { .. } | AppError::VectorIndex { .. } => {
                StatusCode::SERVICE_UNAVAILABLE
            }

            // 504 Gateway Timeout
            AppError::UpstreamTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
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

/// Structured error response for API
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetails,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub code: ErrorCode,
    pub numeric_code: u16,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();
        let message = self.to_string();
        let field = match &self {
            AppError::Validation { field, .. } => field.clone(),
            _ => None,
        };

        // Log based on severity
        if self.is_server_error() {
            tracing::error!(
                error = %message,
                code = ?code,
                status = status.as_u16(),
                "Server error"
            );
        } else if self.is_client_error() {
            tracing::warn!(
                error = %message,
                code = ?code,
                status = status.as_u16(),
                "Client error"
            );
        }

        let body = ErrorResponse {
            error: ErrorDetails {
                code,
                numeric_code: code.as_code(),
                message,
                field,
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_mapping() {
        let err = AppError::DocumentNotFound { id: "doc_1".into() };
        assert_eq!(err.code(), ErrorCode::DocumentNotFound);
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(err.code().as_code(), 4002);
    }

    #[test]
    fn test_validation_error() {
        let err = AppError::validation("content", "must not be empty");
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert!(!err.is_server_error());
        assert!(err.is_client_error());
    }

    #[test]
    fn test_upstream_errors_are_server_errors() {
        let err = AppError::Generation {
            message: "503 from provider".into(),
        };
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
        assert!(err.is_server_error());

        let err = AppError::UpstreamTimeout {
            service: "accounting".into(),
            timeout_ms: 10_000,
        };
        assert_eq!(err.code(), ErrorCode::UpstreamTimeout);
        assert_eq!(err.to_string(), "accounting timed out after 10000ms");
    }

    #[test]
    fn test_configuration_error() {
        let err = AppError::configuration("OpenAI API key required");
        assert_eq!(err.code(), ErrorCode::ConfigurationError);
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
