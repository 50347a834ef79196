//! Builds audit entries from RPC frames.
//!
//! One recorder per connection. Every entry it produces carries the same
//! conversation id; the message id is the frame's request id.

use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;
use warden_core::ids::new_conversation_id;
use warden_rpc::Message;
use warden_rpc::params::{ErrorBody, ErrorResult, ErrorResults};

use crate::entry::{AuditLogEntry, now_millis};
use crate::errors::AuditError;
use crate::sink::AuditSink;

/// Per-connection audit recorder.
pub struct AuditRecorder {
    sink: Arc<dyn AuditSink>,
    conversation_id: String,
    model: String,
    identity: RwLock<String>,
}

impl AuditRecorder {
    /// Create a recorder for a connection bound to `model` (empty for the
    /// controller root).
    pub fn new(sink: Arc<dyn AuditSink>, model: impl Into<String>) -> Self {
        Self {
            sink,
            conversation_id: new_conversation_id(),
            model: model.into(),
            identity: RwLock::new(String::new()),
        }
    }

    /// Conversation id stamped on every entry.
    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    /// Record the caller once the connection has authenticated.
    pub fn set_identity(&self, tag: impl Into<String>) {
        *self.identity.write() = tag.into();
    }

    fn entry(&self, request_id: u64, request: &Message) -> AuditLogEntry {
        AuditLogEntry {
            time: now_millis(),
            conversation_id: self.conversation_id.clone(),
            message_id: request_id,
            identity_tag: self.identity.read().clone(),
            model: self.model.clone(),
            facade_name: request.facade.clone(),
            facade_method: request.request.clone(),
            facade_version: request.version,
            object_id: request.id.clone(),
            params: None,
            errors: None,
            is_response: false,
        }
    }

    /// Record an inbound request. Login bodies are never stored.
    pub fn log_request(&self, request: &Message) -> Result<(), AuditError> {
        let mut entry = self.entry(request.request_id, request);
        if !request.is_login() {
            entry.params = Some(
                request
                    .params
                    .clone()
                    .unwrap_or(Value::Object(serde_json::Map::new())),
            );
        }
        self.sink.append(entry);
        Ok(())
    }

    /// Record the reply to `request`.
    ///
    /// The error summary combines any bulk `results` in the reply body with
    /// the frame's own error. A reply body that is not an object is an error.
    pub fn log_reply(&self, request: &Message, reply: &Message) -> Result<(), AuditError> {
        let mut all = match &reply.response {
            Some(body) if !body.is_null() => serde_json::from_value::<ErrorResults>(body.clone())?,
            _ => ErrorResults::default(),
        };
        all.results.retain(|r| r.error.is_some());
        if reply.is_error() {
            all.results.push(ErrorResult {
                error: Some(ErrorBody {
                    message: reply.error.clone(),
                    code: reply.error_code.clone(),
                    info: reply.error_info.clone(),
                }),
            });
        }

        let mut entry = self.entry(reply.request_id, request);
        entry.errors = Some(serde_json::to_value(&all)?);
        entry.is_response = true;
        self.sink.append(entry);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::MemoryAuditSink;
    use serde_json::json;

    fn recorder() -> (AuditRecorder, MemoryAuditSink) {
        let sink = MemoryAuditSink::new();
        (AuditRecorder::new(Arc::new(sink.clone()), ""), sink)
    }

    #[test]
    fn request_records_header_and_params() {
        let (rec, sink) = recorder();
        rec.set_identity("user-bob@idp");
        let mut req = Message::request(4, "ModelSummaryWatcher", 1, "Next", Some(json!({"x": 1})));
        req.id = "w-1".into();
        rec.log_request(&req).unwrap();

        let entries = sink.entries();
        assert_eq!(entries.len(), 1);
        let e = &entries[0];
        assert_eq!(e.message_id, 4);
        assert_eq!(e.identity_tag, "user-bob@idp");
        assert_eq!(e.facade_name, "ModelSummaryWatcher");
        assert_eq!(e.facade_method, "Next");
        assert_eq!(e.facade_version, 1);
        assert_eq!(e.object_id, "w-1");
        assert_eq!(e.params, Some(json!({"x": 1})));
        assert!(!e.is_response);
        assert_eq!(e.conversation_id, rec.conversation_id());
    }

    #[test]
    fn login_params_are_not_recorded() {
        let (rec, sink) = recorder();
        let req = Message::request(1, "Admin", 3, "Login", Some(json!({"token": "secret"})));
        rec.log_request(&req).unwrap();
        let params = Some(json!({"session-token": "s"}));
        let req = Message::request(2, "Admin", 4, "LoginWithSessionToken", params);
        rec.log_request(&req).unwrap();
        assert!(sink.entries().iter().all(|e| e.params.is_none()));
    }

    #[test]
    fn reply_combines_bulk_and_header_errors() {
        let (rec, sink) = recorder();
        let req = Message::request(9, "Controller", 9, "AllModels", None);
        let mut reply = Message::reply(
            9,
            json!({"results": [{"error": {"message": "a", "code": "not found"}}, {}]}),
        );
        reply.error = "b".into();
        reply.error_code = "bad request".into();
        rec.log_reply(&req, &reply).unwrap();

        let e = &sink.entries()[0];
        assert!(e.is_response);
        assert!(e.params.is_none());
        let results = e.errors.as_ref().unwrap()["results"].as_array().unwrap().clone();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0]["error"]["message"], "a");
        assert_eq!(results[1]["error"]["code"], "bad request");
    }

    #[test]
    fn successful_reply_has_empty_results() {
        let (rec, sink) = recorder();
        let req = Message::request(1, "Pinger", 1, "Ping", None);
        rec.log_reply(&req, &Message::reply(1, json!({}))).unwrap();
        assert_eq!(sink.entries()[0].errors, Some(json!({"results": []})));
    }

    #[test]
    fn non_object_reply_is_error() {
        let (rec, sink) = recorder();
        let req = Message::request(1, "Pinger", 1, "Ping", None);
        let err = rec.log_reply(&req, &Message::reply(1, json!("text"))).unwrap_err();
        assert!(matches!(err, AuditError::Body(_)));
        assert!(sink.entries().is_empty());
    }

    #[test]
    fn conversation_ids_differ_between_recorders() {
        let (a, _) = recorder();
        let (b, _) = recorder();
        assert_ne!(a.conversation_id(), b.conversation_id());
    }
}
