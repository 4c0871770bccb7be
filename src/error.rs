//! Error types for the personality network
//!
//! Provides structured error handling with:
//! - Numeric error codes for machine parsing
//! - User-friendly messages with suggestions
//! - Exit codes for CLI
//! - HTTP-facing `ApiError` for the agent and registry servers

use std::fmt;
use std::path::PathBuf;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Result type alias for node operations
pub type Result<T> = std::result::Result<T, Error>;

/// Numeric error codes for machine parsing and documentation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ErrorCode {
    // Configuration errors (1xx)
    ConfigNotFound = 100,
    ConfigParseError = 101,
    ConfigValidation = 102,

    // IO errors (2xx)
    IoRead = 200,
    IoWrite = 201,
    IoPermission = 202,
    IoNotFound = 203,

    // Connection errors (3xx)
    ConnectionFailed = 300,
    ConnectionTimeout = 301,
    TransportRejected = 302,

    // Protocol errors (4xx)
    RidFormat = 400,
    ProtocolMalformed = 401,
    Serialization = 402,

    // Validation errors (5xx)
    ProfileInvalid = 500,

    // Registry / tool errors (6xx)
    ToolNotFound = 600,
    ToolNotCallable = 601,
    ResourceNotFound = 602,

    // Internal errors (9xx)
    InternalError = 900,
}

impl ErrorCode {
    /// Get the string code (e.g., "E100")
    pub fn as_str(&self) -> String {
        format!("E{}", *self as u16)
    }

    /// Get the exit code for CLI (maps to 1-125 range)
    pub fn exit_code(&self) -> i32 {
        match *self as u16 {
            100..=199 => 10,
            200..=299 => 20,
            300..=399 => 30,
            400..=499 => 40,
            500..=599 => 50,
            600..=699 => 60,
            900..=999 => 90,
            _ => 1,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Main error type for the node
#[derive(Error, Debug)]
pub enum Error {
    // ─────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────

    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    /// Configuration parse error
    #[error("Failed to parse configuration: {message}")]
    ConfigParse { message: String },

    /// Configuration validation error
    #[error("Configuration validation failed: {message}")]
    ConfigValidation { message: String, field: Option<String> },

    // ─────────────────────────────────────────────────────────────
    // IO Errors
    // ─────────────────────────────────────────────────────────────

    /// File read error
    #[error("Failed to read file: {path}")]
    IoRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// File write error
    #[error("Failed to write file: {path}")]
    IoWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML serialization error
    #[error("TOML serialization error: {0}")]
    Toml(#[from] toml::ser::Error),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // ─────────────────────────────────────────────────────────────
    // Connection Errors
    // ─────────────────────────────────────────────────────────────

    /// Connection failed
    #[error("Failed to reach {url}: {message}")]
    ConnectionFailed { url: String, message: String },

    /// Connection timeout
    #[error("Request to {url} timed out after {timeout_ms}ms")]
    ConnectionTimeout { url: String, timeout_ms: u64 },

    /// Peer answered with a non-success status
    #[error("{url} rejected request with status {status}")]
    TransportRejected { url: String, status: u16 },

    // ─────────────────────────────────────────────────────────────
    // Protocol Errors
    // ─────────────────────────────────────────────────────────────

    /// Malformed canonical identity string
    #[error("Invalid {kind} reference '{reference}': {reason}")]
    RidFormat {
        kind: &'static str,
        reference: String,
        reason: String,
    },

    /// Malformed protocol payload
    #[error("Malformed protocol message: {message}")]
    ProtocolMalformed { message: String },

    // ─────────────────────────────────────────────────────────────
    // Validation Errors
    // ─────────────────────────────────────────────────────────────

    /// Contents do not match the personality profile shape
    #[error("Invalid personality profile for {rid}: {message}")]
    ProfileInvalid { rid: String, message: String },

    // ─────────────────────────────────────────────────────────────
    // Registry / Tool Errors
    // ─────────────────────────────────────────────────────────────

    /// No trait with this name
    #[error("Trait {name} not found")]
    ToolNotFound { name: String },

    /// Trait exists but is not callable
    #[error("Trait {name} is not callable")]
    ToolNotCallable { name: String },

    /// Unknown resource id
    #[error("Resource {id} not found")]
    ResourceNotFound { id: String },

    // ─────────────────────────────────────────────────────────────
    // Internal Errors
    // ─────────────────────────────────────────────────────────────

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    // ─────────────────────────────────────────────────────────────
    // Error Classification
    // ─────────────────────────────────────────────────────────────

    /// Get the numeric error code
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::ConfigNotFound { .. } => ErrorCode::ConfigNotFound,
            Error::ConfigParse { .. } => ErrorCode::ConfigParseError,
            Error::ConfigValidation { .. } => ErrorCode::ConfigValidation,

            Error::IoRead { .. } => ErrorCode::IoRead,
            Error::IoWrite { .. } => ErrorCode::IoWrite,
            Error::Io(e) => match e.kind() {
                std::io::ErrorKind::NotFound => ErrorCode::IoNotFound,
                std::io::ErrorKind::PermissionDenied => ErrorCode::IoPermission,
                _ => ErrorCode::IoRead,
            },
            Error::Toml(_) => ErrorCode::ConfigParseError,
            Error::Json(_) => ErrorCode::Serialization,

            Error::ConnectionFailed { .. } => ErrorCode::ConnectionFailed,
            Error::ConnectionTimeout { .. } => ErrorCode::ConnectionTimeout,
            Error::TransportRejected { .. } => ErrorCode::TransportRejected,

            Error::RidFormat { .. } => ErrorCode::RidFormat,
            Error::ProtocolMalformed { .. } => ErrorCode::ProtocolMalformed,

            Error::ProfileInvalid { .. } => ErrorCode::ProfileInvalid,

            Error::ToolNotFound { .. } => ErrorCode::ToolNotFound,
            Error::ToolNotCallable { .. } => ErrorCode::ToolNotCallable,
            Error::ResourceNotFound { .. } => ErrorCode::ResourceNotFound,

            Error::Internal(_) => ErrorCode::InternalError,
        }
    }

    /// Check if the error is worth retrying
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::ConnectionFailed { .. } | Error::ConnectionTimeout { .. } => true,
            Error::TransportRejected { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Check if the error is fatal (process should exit)
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::ConfigNotFound { .. }
                | Error::ConfigParse { .. }
                | Error::ConfigValidation { .. }
                | Error::Internal(_)
        )
    }

    /// Get the exit code for CLI
    pub fn exit_code(&self) -> i32 {
        self.code().exit_code()
    }

    // ─────────────────────────────────────────────────────────────
    // User-Friendly Messages
    // ─────────────────────────────────────────────────────────────

    /// Get a user-friendly suggestion for how to fix this error
    pub fn suggestion(&self) -> Option<&'static str> {
        match self {
            Error::ConfigNotFound { .. } => Some(
                "Run 'personality-net config init' to create a default configuration file."
            ),
            Error::ConfigParse { .. } => Some(
                "Check your configuration file syntax. Run 'personality-net config validate' to see details."
            ),
            Error::ConfigValidation { .. } => Some(
                "Review the configuration file and fix the invalid values."
            ),
            Error::ConnectionFailed { .. } | Error::ConnectionTimeout { .. } => Some(
                "Check that the coordinator is running and that network.first_contact points at its /koi-net base URL."
            ),
            Error::RidFormat { .. } => Some(
                "Personality references look like 'orn:agent.personality:<name>/<version>'."
            ),
            _ => None,
        }
    }

    /// Format the error for terminal display with colors
    pub fn format_for_terminal(&self) -> String {
        let code = self.code();
        let mut output = format!("\x1b[31mError [{}]\x1b[0m: {}\n", code.as_str(), self);

        if let Some(hint) = self.suggestion() {
            output.push_str(&format!("\n\x1b[33mHint\x1b[0m: {}\n", hint));
        }

        output
    }

    /// Format the error for logging (no colors)
    pub fn format_for_log(&self) -> String {
        format!("[{}] {}", self.code().as_str(), self)
    }
}

// ─────────────────────────────────────────────────────────────────
// Error Constructors
// ─────────────────────────────────────────────────────────────────

impl Error {
    /// Create a config not found error
    pub fn config_not_found(path: impl Into<PathBuf>) -> Self {
        Error::ConfigNotFound { path: path.into() }
    }

    /// Create a config parse error
    pub fn config_parse(message: impl Into<String>) -> Self {
        Error::ConfigParse {
            message: message.into(),
        }
    }

    /// Create a config validation error
    pub fn config_validation(message: impl Into<String>) -> Self {
        Error::ConfigValidation {
            message: message.into(),
            field: None,
        }
    }

    /// Create a config validation error with field name
    pub fn config_field_invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Error::ConfigValidation {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Create a connection failed error
    pub fn connection_failed(url: impl Into<String>, message: impl Into<String>) -> Self {
        Error::ConnectionFailed {
            url: url.into(),
            message: message.into(),
        }
    }

    /// Create an identity format error
    pub fn rid_format(
        kind: &'static str,
        reference: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Error::RidFormat {
            kind,
            reference: reference.into(),
            reason: reason.into(),
        }
    }

    /// Create a profile validation error
    pub fn profile_invalid(rid: impl fmt::Display, message: impl Into<String>) -> Self {
        Error::ProfileInvalid {
            rid: rid.to_string(),
            message: message.into(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// HTTP API Errors
// ─────────────────────────────────────────────────────────────────

/// Errors surfaced to HTTP callers of the agent and registry servers
#[derive(Debug, Error)]
pub enum ApiError {
    /// Unknown resource, agent or trait
    #[error("{0}")]
    NotFound(String),

    /// Request cannot be served as asked (e.g. trait not callable)
    #[error("{0}")]
    BadRequest(String),

    /// Server-side failure
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        match err {
            Error::ToolNotFound { .. } | Error::ResourceNotFound { .. } => {
                ApiError::NotFound(err.to_string())
            }
            Error::ToolNotCallable { .. }
            | Error::RidFormat { .. }
            | Error::ProtocolMalformed { .. }
            | Error::ProfileInvalid { .. } => ApiError::BadRequest(err.to_string()),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        };

        let body = ErrorResponse {
            error: self.to_string(),
            code: code.to_string(),
        };

        (status, Json(body)).into_response()
    }
}

/// Result type alias for HTTP handlers
pub type ApiResult<T> = std::result::Result<T, ApiError>;

// ─────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────
