//! API tunnel tap: login rewriting and auditing of relayed RPC frames.

use std::collections::HashMap;
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use metrics::counter;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use tracing::{debug, warn};
use warden_audit::AuditRecorder;
use warden_core::UserTag;
use warden_rpc::Message;

use super::relay::{Filters, TextFilter};
use crate::metrics::AUDIT_FAILURES_TOTAL;

/// Observes both directions of an API tunnel.
///
/// Client `Admin.Login*` frames get the trust token and the caller's tag
/// injected. Backend login replies lose their `servers` list so the client
/// stays on the gateway. Every request and its reply are audited; requests
/// wait in an in-flight map keyed by request id until their reply arrives.
pub struct ApiTap {
    caller: String,
    token: String,
    audit: Arc<AuditRecorder>,
    in_flight: Mutex<HashMap<u64, Message>>,
}

impl ApiTap {
    /// Create a tap for `caller`, injecting `trust_token` into logins.
    pub fn new(caller: &UserTag, trust_token: &str, audit: Arc<AuditRecorder>) -> Arc<Self> {
        audit.set_identity(caller.to_string());
        Arc::new(Self {
            caller: caller.to_string(),
            token: STANDARD.encode(trust_token),
            audit,
            in_flight: Mutex::new(HashMap::new()),
        })
    }

    /// Relay filters for both directions.
    pub fn filters(self: &Arc<Self>) -> Filters {
        let up = Arc::clone(self);
        let down = Arc::clone(self);
        let to_backend: TextFilter = Box::new(move |text| Some(up.from_client(text)));
        let to_client: TextFilter = Box::new(move |text| Some(down.from_backend(text)));
        Filters {
            to_backend: Some(to_backend),
            to_client: Some(to_client),
        }
    }

    /// Requests still waiting for a reply.
    pub fn pending(&self) -> usize {
        self.in_flight.lock().len()
    }

    /// Rewrite and audit a client frame. Frames that are not RPC messages
    /// pass through untouched.
    pub fn from_client(&self, text: String) -> String {
        let Ok(mut message) = serde_json::from_str::<Message>(&text) else {
            debug!("relaying unparseable client frame as is");
            return text;
        };
        if !message.is_request() {
            return text;
        }

        let rewritten = message.is_login() && self.inject_login(&mut message);
        if let Err(e) = self.audit.log_request(&message) {
            counter!(AUDIT_FAILURES_TOTAL, "direction" => "request").increment(1);
            warn!(error = %e, request_id = message.request_id, "cannot audit relayed request");
        }

        let out = if rewritten {
            serde_json::to_string(&message).unwrap_or(text)
        } else {
            text
        };
        let _ = self.in_flight.lock().insert(message.request_id, message);
        out
    }

    /// Rewrite and audit a backend frame.
    pub fn from_backend(&self, text: String) -> String {
        let Ok(mut reply) = serde_json::from_str::<Message>(&text) else {
            return text;
        };
        let Some(request) = self.in_flight.lock().remove(&reply.request_id) else {
            return text;
        };

        let rewritten = request.is_login() && strip_servers(&mut reply);
        if let Err(e) = self.audit.log_reply(&request, &reply) {
            counter!(AUDIT_FAILURES_TOTAL, "direction" => "reply").increment(1);
            warn!(error = %e, request_id = reply.request_id, "cannot audit relayed reply");
        }

        if rewritten {
            serde_json::to_string(&reply).unwrap_or(text)
        } else {
            text
        }
    }

    fn inject_login(&self, message: &mut Message) -> bool {
        let mut params = match message.params.take() {
            Some(Value::Object(map)) => map,
            _ => Map::new(),
        };
        let _ = params.insert("token".into(), Value::String(self.token.clone()));
        let _ = params.insert("auth-tag".into(), Value::String(self.caller.clone()));
        message.params = Some(Value::Object(params));
        true
    }
}

fn strip_servers(reply: &mut Message) -> bool {
    match reply.response.as_mut() {
        Some(Value::Object(body)) => body.remove("servers").is_some(),
        _ => false,
    }
}
