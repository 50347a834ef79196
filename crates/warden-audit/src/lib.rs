//! # warden-audit
//!
//! Audit trail of every RPC call served by a connection root.
//!
//! - [`entry::AuditLogEntry`]: one request or reply record
//! - [`sink::AuditSink`]: where entries go ([`sink::TracingAuditSink`],
//!   [`sqlite::SqliteAuditSink`])
//! - [`recorder::AuditRecorder`]: builds entries from wire frames

#![deny(unsafe_code)]

pub mod entry;
pub mod errors;
pub mod recorder;
pub mod sink;
pub mod sqlite;

pub use entry::AuditLogEntry;
pub use errors::AuditError;
pub use recorder::AuditRecorder;
pub use sink::{AuditSink, MemoryAuditSink, TracingAuditSink};
pub use sqlite::{SqliteAuditSink, SqliteSinkConfig};
