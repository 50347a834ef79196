//! Wire frame.
//!
//! Requests and replies share one JSON shape:
//!
//! ```text
//! {"request-id":1,"type":"Admin","version":3,"id":"","request":"Login","params":{..}}
//! {"request-id":1,"response":{..}}
//! {"request-id":1,"error":"..","error-code":"..","error-info":{..}}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_zero(v: &u32) -> bool {
    *v == 0
}

/// One RPC frame, request or reply.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Message {
    /// Correlates a reply with its request.
    #[serde(default)]
    pub request_id: u64,
    /// Facade name.
    #[serde(rename = "type", default, skip_serializing_if = "String::is_empty")]
    pub facade: String,
    /// Facade version.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub version: u32,
    /// Object id (e.g. a watcher id).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    /// Method name.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub request: String,
    /// Request body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    /// Error message of a failed call.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
    /// Wire error code of a failed call.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error_code: String,
    /// Structured error details.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_info: Option<Map<String, Value>>,
    /// Reply body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<Value>,
}

impl Message {
    /// Build a request frame.
    pub fn request(
        request_id: u64,
        facade: &str,
        version: u32,
        method: &str,
        params: Option<Value>,
    ) -> Self {
        Self {
            request_id,
            facade: facade.to_owned(),
            version,
            request: method.to_owned(),
            params,
            ..Self::default()
        }
    }

    /// Build a successful reply frame.
    pub fn reply(request_id: u64, response: Value) -> Self {
        Self {
            request_id,
            response: Some(response),
            ..Self::default()
        }
    }

    /// Whether this frame is a request (names a method).
    pub fn is_request(&self) -> bool {
        !self.request.is_empty()
    }

    /// Whether this frame is an error reply.
    pub fn is_error(&self) -> bool {
        !self.error.is_empty()
    }

    /// Whether this request is one of the `Admin` login calls.
    pub fn is_login(&self) -> bool {
        self.facade == "Admin" && self.request.starts_with("Login")
    }
}
