//! Audit error types.

use thiserror::Error;

/// Errors raised while recording or persisting audit entries.
#[derive(Debug, Error)]
pub enum AuditError {
    /// A request or reply body could not be encoded or decoded.
    #[error("audit body: {0}")]
    Body(#[from] serde_json::Error),
    /// The audit database failed.
    #[error("audit database: {0}")]
    Database(#[from] rusqlite::Error),
}

impl From<AuditError> for warden_core::GatewayError {
    fn from(err: AuditError) -> Self {
        Self::internal(err.to_string())
    }
}
