//! Audit log entry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One audited request or reply.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuditLogEntry {
    /// When the frame was seen, UTC, rounded to the millisecond.
    pub time: DateTime<Utc>,
    /// Connection-scoped id shared by every entry of one connection.
    pub conversation_id: String,
    /// Request id of the frame.
    pub message_id: u64,
    /// Caller's user tag, empty before login.
    pub identity_tag: String,
    /// Model tag the connection is bound to, empty for the controller root.
    pub model: String,
    /// Facade name.
    pub facade_name: String,
    /// Method name.
    pub facade_method: String,
    /// Facade version.
    pub facade_version: u32,
    /// Object id of the call.
    pub object_id: String,
    /// Request body (requests only, never for logins).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    /// `{"results":[..]}` error summary (replies only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<Value>,
    /// Whether this entry records a reply.
    pub is_response: bool,
}

/// Current time rounded to the millisecond.
pub fn now_millis() -> DateTime<Utc> {
    let now = Utc::now();
    DateTime::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now)
}
