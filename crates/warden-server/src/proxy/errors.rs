//! Proxy errors and their HTTP forms.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use warden_core::{ErrorCode, GatewayError};

/// Why a relay direction ended abnormally.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// The client socket failed.
    #[error("client socket: {0}")]
    Client(#[from] axum::Error),

    /// The backend socket failed.
    #[error("backend socket: {0}")]
    Backend(#[from] tokio_tungstenite::tungstenite::Error),
}

/// Status for an error raised before a `WebSocket` upgrade.
pub fn upgrade_status(err: &GatewayError) -> StatusCode {
    match err.code() {
        ErrorCode::BadRequest => StatusCode::BAD_REQUEST,
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::Unauthorized => StatusCode::UNAUTHORIZED,
        ErrorCode::ConnectionFailed => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Status for an error raised by the HTTP proxy. Unparseable paths are
/// 422 and every backend failure is 500.
pub fn http_status(err: &GatewayError) -> StatusCode {
    match err.code() {
        ErrorCode::BadRequest => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::Unauthorized => StatusCode::UNAUTHORIZED,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// `(status, message)` response.
pub fn error_response(status: StatusCode, err: &GatewayError) -> Response {
    (status, err.message().to_owned()).into_response()
}
