//! # Error Handling Module
//!
//! This module provides the error type shared by every APIGW resource. Errors are
//! grouped by the way the orchestrating host must react to them:
//!
//! - `NotFound` clears a resource from state on READ and is surfaced on explicit lookups
//! - `Validation` is raised locally before any request leaves the process
//! - `PollerTimeout` and `Cancelled` are retryable at the host level
//! - `Upstream` carries any other non-2xx answer verbatim with operation context

use std::time::Duration;
use thiserror::Error;

/// Main result type used throughout the crate
pub type ApigwResult<T> = Result<T, ApigwError>;

/// Error kinds produced by the APIGW resources and the service client
#[derive(Debug, Error, Clone)]
pub enum ApigwError {
    /// The remote object does not exist
    #[error("{resource} not found: {id}")]
    NotFound { resource: String, id: String },

    /// The service refused the change because of live references or duplicates
    #[error("Conflict: {message}")]
    Conflict { message: String },

    /// Local invariant violated before any request was issued
    #[error("Validation failed: {field} - {reason}")]
    Validation { field: String, reason: String },

    /// A long-running operation did not reach its target state in time
    #[error("Timeout after {timeout:?} while waiting for {operation}")]
    PollerTimeout { operation: String, timeout: Duration },

    /// The host cancelled an in-flight operation
    #[error("Operation cancelled: {operation}")]
    Cancelled { operation: String },

    /// A polled object reported a state that is neither pending nor target
    #[error("Unexpected state '{state}' while waiting for {operation}")]
    UnexpectedState { operation: String, state: String },

    /// Any other non-2xx answer from the service
    #[error("{operation} failed with status {status}: {code} {message}")]
    Upstream {
        operation: String,
        status: u16,
        code: String,
        message: String,
    },

    /// Configuration-related errors (invalid config, missing files, etc.)
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// HTTP transport failures
    #[error("HTTP client error: {message}")]
    HttpClient { message: String },

    /// JSON serialization/deserialization errors
    #[error("JSON error: {message}")]
    Json { message: String },

    /// YAML parsing errors for configuration files
    #[error("YAML error: {message}")]
    Yaml { message: String },

    /// I/O errors
    #[error("I/O error: {message}")]
    Io { message: String },
}

impl ApigwError {
    /// Create a not found error for a resource kind and id
    pub fn not_found<R: Into<String>, I: Into<String>>(resource: R, id: I) -> Self {
        Self::NotFound {
            resource: resource.into(),
            id: id.into(),
        }
    }

    /// Create a validation error naming the offending field
    pub fn validation<F: Into<String>, S: Into<String>>(field: F, reason: S) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create a conflict error
    pub fn conflict<S: Into<String>>(message: S) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    /// Create a configuration error with a custom message
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a cancellation error for the named operation
    pub fn cancelled<S: Into<String>>(operation: S) -> Self {
        Self::Cancelled {
            operation: operation.into(),
        }
    }

    /// Returns true when the error means the remote object is gone
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Check if the host may retry the failed operation as-is
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::PollerTimeout { .. } => true,
            Self::Cancelled { .. } => true,
            Self::HttpClient { .. } => true,
            Self::Upstream { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Stable label used in structured log fields
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::Conflict { .. } => "conflict",
            Self::Validation { .. } => "validation_failure",
            Self::PollerTimeout { .. } => "poller_timeout",
            Self::Cancelled { .. } => "cancelled",
            Self::UnexpectedState { .. } => "unexpected_state",
            Self::Upstream { .. } => "upstream_error",
            Self::Configuration { .. } => "configuration_error",
            Self::HttpClient { .. } => "http_client_error",
            Self::Json { .. } => "json_error",
            Self::Yaml { .. } => "yaml_error",
            Self::Io { .. } => "io_error",
        }
    }
}

/// Translate a NotFound outcome of a READ into an empty-state signal
pub trait NotFoundExt<T> {
    fn or_gone(self) -> ApigwResult<Option<T>>;
}

impl<T> NotFoundExt<T> for ApigwResult<T> {
    fn or_gone(self) -> ApigwResult<Option<T>> {
        match self {
            Ok(value) => Ok(Some(value)),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }
}

impl From<std::io::Error> for ApigwError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for ApigwError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json {
            message: err.to_string(),
        }
    }
}

impl From<serde_yaml::Error> for ApigwError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Yaml {
            message: err.to_string(),
        }
    }
}

impl From<reqwest::Error> for ApigwError {
    fn from(err: reqwest::Error) -> Self {
        Self::HttpClient {
            message: err.to_string(),
        }
    }
}
