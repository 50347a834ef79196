//! Audit sinks.
//!
//! Appending is fire-and-forget from the caller's point of view: a sink
//! must not block the RPC path for long and reports its own failures.

use std::sync::Arc;

use metrics::counter;
use parking_lot::Mutex;

use crate::entry::AuditLogEntry;

/// Destination of audit entries.
pub trait AuditSink: Send + Sync {
    /// Take ownership of one entry.
    fn append(&self, entry: AuditLogEntry);

    /// Persist anything buffered. Called on shutdown.
    fn flush(&self) {}
}

/// Emits each entry as a structured `tracing` event at target `audit`.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn append(&self, entry: AuditLogEntry) {
        counter!("audit_entries_total", "sink" => "tracing").increment(1);
        let params = entry.params.as_ref().map(ToString::to_string);
        let errors = entry.errors.as_ref().map(ToString::to_string);
        tracing::info!(
            target: "audit",
            time = %entry.time.to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            conversation_id = %entry.conversation_id,
            message_id = entry.message_id,
            identity = %entry.identity_tag,
            model = %entry.model,
            facade = %entry.facade_name,
            method = %entry.facade_method,
            version = entry.facade_version,
            object_id = %entry.object_id,
            params = params.as_deref(),
            errors = errors.as_deref(),
            is_response = entry.is_response,
            "rpc"
        );
    }
}

/// Keeps entries in memory.
#[derive(Clone, Debug, Default)]
pub struct MemoryAuditSink {
    entries: Arc<Mutex<Vec<AuditLogEntry>>>,
}

impl MemoryAuditSink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything appended so far.
    pub fn entries(&self) -> Vec<AuditLogEntry> {
        self.entries.lock().clone()
    }
}

impl AuditSink for MemoryAuditSink {
    fn append(&self, entry: AuditLogEntry) {
        self.entries.lock().push(entry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::now_millis;

    fn entry(id: u64) -> AuditLogEntry {
        AuditLogEntry {
            time: now_millis(),
            conversation_id: "c".into(),
            message_id: id,
            identity_tag: String::new(),
            model: String::new(),
            facade_name: "Pinger".into(),
            facade_method: "Ping".into(),
            facade_version: 1,
            object_id: String::new(),
            params: Some(serde_json::json!({})),
            errors: None,
            is_response: false,
        }
    }

    #[test]
    fn memory_sink_keeps_order() {
        let sink = MemoryAuditSink::new();
        sink.append(entry(1));
        sink.append(entry(2));
        let ids: Vec<u64> = sink.entries().iter().map(|e| e.message_id).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn tracing_sink_does_not_panic_without_subscriber() {
        TracingAuditSink.append(entry(1));
        TracingAuditSink.flush();
    }
}
