//! Gateway error kinds and their wire codes.

use std::fmt;

use serde::{Deserialize, Serialize};

// ── Error codes ─────────────────────────────────────────────────────

/// Kind of a gateway failure.
///
/// Each kind maps to a fixed wire code string carried in the `error-code`
/// field of an RPC error reply.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCode {
    /// Legacy protocol version.
    NotSupported,
    /// Authorization denial (also used for masked not-found).
    Unauthorized,
    /// Malformed tag, path or arguments.
    BadRequest,
    /// Unknown watcher, model or user.
    NotFound,
    /// Backend unreachable.
    ConnectionFailed,
    /// The client must reconnect elsewhere.
    Redirect,
    /// Unknown or not-yet-permitted facade method.
    NotImplemented,
    /// Marshalling, logging or other internal failure.
    Internal,
}

impl ErrorCode {
    /// Wire representation of this code.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotSupported => "not supported",
            Self::Unauthorized => "unauthorized access",
            Self::BadRequest => "bad request",
            Self::NotFound => "not found",
            Self::ConnectionFailed => "connection failed",
            Self::Redirect => "redirection required",
            Self::NotImplemented => "not implemented",
            Self::Internal => "internal error",
        }
    }

    /// Parse a wire code back into a kind.
    pub fn from_wire(code: &str) -> Option<Self> {
        match code {
            "not supported" => Some(Self::NotSupported),
            "unauthorized access" => Some(Self::Unauthorized),
            "bad request" => Some(Self::BadRequest),
            "not found" => Some(Self::NotFound),
            "connection failed" => Some(Self::ConnectionFailed),
            "redirection required" => Some(Self::Redirect),
            "not implemented" => Some(Self::NotImplemented),
            "internal error" => Some(Self::Internal),
            _ => None,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── GatewayError ────────────────────────────────────────────────────

/// An error with a kind and a human-readable message.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct GatewayError {
    code: ErrorCode,
    message: String,
}

impl GatewayError {
    /// Create an error of the given kind.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Create an error whose message is the code's wire string.
    pub fn from_code(code: ErrorCode) -> Self {
        Self::new(code, code.as_str())
    }

    /// Kind of this error.
    pub fn code(&self) -> ErrorCode {
        self.code
    }

    /// Human-readable message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Legacy protocol version.
    pub fn not_supported(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotSupported, message)
    }

    /// Authorization denial.
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unauthorized, message)
    }

    /// Malformed input.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::BadRequest, message)
    }

    /// Missing entity.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    /// Backend unreachable.
    pub fn connection_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ConnectionFailed, message)
    }

    /// Client must reconnect elsewhere.
    pub fn redirect() -> Self {
        Self::from_code(ErrorCode::Redirect)
    }

    /// Method not available.
    pub fn not_implemented(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotImplemented, message)
    }

    /// Internal failure.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, message)
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        Self::internal(err.to_string())
    }
}

/// Result alias for gateway operations.
pub type Result<T> = std::result::Result<T, GatewayError>;
