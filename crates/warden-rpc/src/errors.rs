//! Dispatch-boundary errors.
//!
//! Handlers return [`RpcError`]; the dispatcher turns it into the wire
//! `{error, error-code, error-info}` triple of a reply frame.

use warden_core::{ErrorCode, GatewayError};

use crate::types::Message;

/// Error returned by facade method handlers.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    /// Request body could not be decoded into the method's parameter type.
    #[error("{message}")]
    InvalidParams {
        /// Description of what is wrong.
        message: String,
    },

    /// Unknown facade, version or method, or a call made before login.
    #[error("{message}")]
    NotImplemented {
        /// Description.
        message: String,
    },

    /// A gateway error raised by the method itself.
    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

impl RpcError {
    /// Wire code of this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidParams { .. } => ErrorCode::BadRequest.as_str(),
            Self::NotImplemented { .. } => ErrorCode::NotImplemented.as_str(),
            Self::Gateway(err) => err.code().as_str(),
        }
    }

    /// Error kind of this error.
    pub fn kind(&self) -> ErrorCode {
        match self {
            Self::InvalidParams { .. } => ErrorCode::BadRequest,
            Self::NotImplemented { .. } => ErrorCode::NotImplemented,
            Self::Gateway(err) => err.code(),
        }
    }

    /// Build the error reply frame for `request_id`.
    pub fn to_reply(&self, request_id: u64) -> Message {
        Message {
            request_id,
            error: self.to_string(),
            error_code: self.code().to_owned(),
            ..Message::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_params_is_bad_request() {
        let err = RpcError::InvalidParams { message: "bad".into() };
        assert_eq!(err.code(), "bad request");
        assert_eq!(err.to_string(), "bad");
    }

    #[test]
    fn gateway_error_keeps_code_and_message() {
        let err: RpcError = GatewayError::not_supported("too old").into();
        assert_eq!(err.code(), "not supported");
        assert_eq!(err.kind(), ErrorCode::NotSupported);
        assert_eq!(err.to_string(), "too old");
    }

    #[test]
    fn to_reply_fills_error_fields() {
        let err = RpcError::NotImplemented { message: "nope".into() };
        let reply = err.to_reply(42);
        assert_eq!(reply.request_id, 42);
        assert_eq!(reply.error, "nope");
        assert_eq!(reply.error_code, "not implemented");
        assert!(reply.response.is_none());
    }
}
