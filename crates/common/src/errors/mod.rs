//! Error types for the Kazanim engine
//!
//! Provides a comprehensive error handling system with:
//! - Distinct error types for different failure modes
//! - Retry and circuit-breaker classification
//! - Error codes for client handling

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

/// Error codes for machine-readable error identification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Validation errors (1xxx)
    ValidationError,
    InvalidObjectiveCode,

    // Dependency errors (8xxx)
    UpstreamError,
    DependencyTimeout,
    CircuitBreakerOpen,
    MalformedResponse,

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
            ErrorCode::InvalidObjectiveCode => 1002,

            // Dependencies (8xxx)
            ErrorCode::UpstreamError => 8001,
            ErrorCode::DependencyTimeout => 8002,
            ErrorCode::CircuitBreakerOpen => 8003,
            ErrorCode::MalformedResponse => 8004,

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

    #[error("Invalid objective code: {code}")]
    InvalidObjectiveCode { code: String },

    // Transient dependency errors
    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("Upstream error from {service}: {message}")]
    Upstream {
        service: String,
        status: Option<u16>,
        message: String,
    },

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    // Fast-fail
    #[error("Circuit breaker open for {service}, retry in {}ms", .retry_after.as_millis())]
    CircuitOpen {
        service: String,
        retry_after: Duration,
    },

    // Structured output mismatch
    #[error("Malformed response from {service}: {message}")]
    MalformedResponse { service: String, message: String },

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
    /// Shorthand for a validation error on a named field
    pub fn validation(field: &str, message: impl Into<String>) -> Self {
        AppError::Validation {
            message: message.into(),
            field: Some(field.to_string()),
        }
    }

    /// Get the error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::Validation { .. } => ErrorCode::ValidationError,
            AppError::InvalidObjectiveCode { .. } => ErrorCode::InvalidObjectiveCode,
            AppError::Timeout { .. } => ErrorCode::DependencyTimeout,
            AppError::Upstream { .. } | AppError::HttpClient(_) => ErrorCode::UpstreamError,
            AppError::CircuitOpen { .. } => ErrorCode::CircuitBreakerOpen,
            AppError::MalformedResponse { .. } => ErrorCode::MalformedResponse,
            AppError::Internal { .. } | AppError::Other(_) => ErrorCode::InternalError,
            AppError::Configuration { .. } => ErrorCode::ConfigurationError,
            AppError::Serialization(_) => ErrorCode::SerializationError,
        }
    }

    /// Bad input from the caller; surfaced immediately
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            AppError::Validation { .. } | AppError::InvalidObjectiveCode { .. }
        )
    }

    /// Whether a retry loop may attempt the call again
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::Timeout { .. } | AppError::HttpClient(_) => true,
            AppError::Upstream { status, .. } => match status {
                None => true,
                Some(code) => *code == 429 || *code >= 500,
            },
            _ => false,
        }
    }

    /// Whether this outcome is a dependency failure for breaker accounting.
    ///
    /// Validation errors, open-circuit rejections and malformed structured
    /// output leave the breaker untouched.
    pub fn counts_toward_breaker(&self) -> bool {
        match self {
            AppError::Validation { .. }
            | AppError::InvalidObjectiveCode { .. }
            | AppError::CircuitOpen { .. }
            | AppError::MalformedResponse { .. }
            | AppError::Configuration { .. }
            | AppError::Serialization(_) => false,
            AppError::Upstream { status, .. } => {
                !matches!(status, Some(code) if (400..500).contains(code) && *code != 429)
            }
            AppError::Timeout { .. }
            | AppError::HttpClient(_)
            | AppError::Internal { .. }
            | AppError::Other(_) => true,
        }
    }
}
