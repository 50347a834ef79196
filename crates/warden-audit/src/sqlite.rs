//! `SQLite` audit sink.
//!
//! Entries are accumulated in an in-memory batch and written in a single
//! transaction:
//!
//! - **Threshold flush** when the batch reaches `batch_size` (default 100).
//! - **Periodic flush** via [`SqliteAuditSink::spawn_flush_task`] (default 1 second).
//! - **Final flush** through [`AuditSink::flush`] on shutdown.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use metrics::counter;
use rusqlite::Connection;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::error;

use crate::entry::AuditLogEntry;
use crate::errors::AuditError;
use crate::sink::AuditSink;

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS audit_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    time TEXT NOT NULL,
    conversation_id TEXT NOT NULL,
    message_id INTEGER NOT NULL,
    identity_tag TEXT NOT NULL,
    model TEXT NOT NULL,
    facade_name TEXT NOT NULL,
    facade_method TEXT NOT NULL,
    facade_version INTEGER NOT NULL,
    object_id TEXT NOT NULL,
    params TEXT,
    errors TEXT,
    is_response INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS audit_log_conversation ON audit_log (conversation_id);
CREATE INDEX IF NOT EXISTS audit_log_time ON audit_log (time);";

/// Batching configuration.
#[derive(Clone, Debug)]
pub struct SqliteSinkConfig {
    /// Number of entries before an immediate flush. Default: 100.
    pub batch_size: usize,
    /// Flush interval in milliseconds. Default: 1000.
    pub flush_interval_ms: u64,
}

impl Default for SqliteSinkConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            flush_interval_ms: 1000,
        }
    }
}

struct SinkInner {
    batch: Vec<AuditLogEntry>,
    conn: Connection,
}

/// Batched writer into the `audit_log` table.
#[derive(Clone)]
pub struct SqliteAuditSink {
    inner: Arc<Mutex<SinkInner>>,
    config: SqliteSinkConfig,
}

impl SqliteAuditSink {
    /// Open (or create) the database at `path` and ensure the schema.
    pub fn open(path: &Path, config: SqliteSinkConfig) -> Result<Self, AuditError> {
        let conn = Connection::open(path)?;
        Self::new(conn, config)
    }

    /// Wrap an existing connection, creating the table if needed.
    pub fn new(conn: Connection, config: SqliteSinkConfig) -> Result<Self, AuditError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            inner: Arc::new(Mutex::new(SinkInner {
                batch: Vec::with_capacity(config.batch_size),
                conn,
            })),
            config,
        })
    }

    /// Spawn the periodic flush task. It flushes once more and exits when
    /// `cancel` fires.
    pub fn spawn_flush_task(&self, cancel: CancellationToken) -> JoinHandle<()> {
        let sink = self.clone();
        let period = Duration::from_millis(self.config.flush_interval_ms.max(1));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                tokio::select! {
                    () = cancel.cancelled() => {
                        sink.flush();
                        break;
                    }
                    _ = interval.tick() => sink.flush(),
                }
            }
        })
    }

    /// Number of entries waiting for a flush.
    pub fn pending(&self) -> usize {
        lock(&self.inner).batch.len()
    }

    /// Total rows in `audit_log`.
    pub fn count(&self) -> Result<u64, AuditError> {
        let guard = lock(&self.inner);
        let n: i64 = guard.conn.query_row("SELECT COUNT(*) FROM audit_log", [], |r| r.get(0))?;
        Ok(u64::try_from(n).unwrap_or_default())
    }

    /// Entries of one conversation, oldest first.
    pub fn conversation(&self, conversation_id: &str) -> Result<Vec<AuditLogEntry>, AuditError> {
        let guard = lock(&self.inner);
        let mut stmt = guard.conn.prepare_cached(
            "SELECT time, conversation_id, message_id, identity_tag, model, facade_name, \
             facade_method, facade_version, object_id, params, errors, is_response \
             FROM audit_log WHERE conversation_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map([conversation_id], |r| {
            Ok(AuditLogEntry {
                time: r.get(0)?,
                conversation_id: r.get(1)?,
                message_id: r.get::<_, i64>(2)?.try_into().unwrap_or_default(),
                identity_tag: r.get(3)?,
                model: r.get(4)?,
                facade_name: r.get(5)?,
                facade_method: r.get(6)?,
                facade_version: r.get(7)?,
                object_id: r.get(8)?,
                params: r.get(9)?,
                errors: r.get(10)?,
                is_response: r.get(11)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(AuditError::from)
    }

    fn flush_locked(guard: &mut SinkInner) {
        if guard.batch.is_empty() {
            return;
        }
        let entries: Vec<AuditLogEntry> = guard.batch.drain(..).collect();
        match write_batch(&guard.conn, &entries) {
            Ok(()) => {
                counter!("audit_entries_total", "sink" => "sqlite").increment(entries.len() as u64);
            }
            Err(err) => {
                counter!("audit_write_errors_total").increment(1);
                error!(error = %err, dropped = entries.len(), "failed to write audit batch");
            }
        }
    }
}

impl AuditSink for SqliteAuditSink {
    fn append(&self, entry: AuditLogEntry) {
        let mut guard = lock(&self.inner);
        guard.batch.push(entry);
        if guard.batch.len() >= self.config.batch_size {
            Self::flush_locked(&mut guard);
        }
    }

    fn flush(&self) {
        let mut guard = lock(&self.inner);
        Self::flush_locked(&mut guard);
    }
}

fn lock(inner: &Mutex<SinkInner>) -> std::sync::MutexGuard<'_, SinkInner> {
    match inner.lock() {
        Ok(g) => g,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Write a batch of entries in a single transaction.
fn write_batch(conn: &Connection, entries: &[AuditLogEntry]) -> Result<(), rusqlite::Error> {
    if entries.is_empty() {
        return Ok(());
    }

    let tx = conn.unchecked_transaction()?;
    {
        let mut stmt = tx.prepare_cached(
            "INSERT INTO audit_log (time, conversation_id, message_id, identity_tag, model, \
             facade_name, facade_method, facade_version, object_id, params, errors, is_response) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        )?;
        for entry in entries {
            let _ = stmt.execute(rusqlite::params![
                entry.time,
                entry.conversation_id,
                i64::try_from(entry.message_id).unwrap_or(i64::MAX),
                entry.identity_tag,
                entry.model,
                entry.facade_name,
                entry.facade_method,
                entry.facade_version,
                entry.object_id,
                entry.params,
                entry.errors,
                entry.is_response,
            ])?;
        }
    }
    tx.commit()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::now_millis;
    use serde_json::json;

    fn entry(conversation: &str, id: u64, is_response: bool) -> AuditLogEntry {
        AuditLogEntry {
            time: now_millis(),
            conversation_id: conversation.into(),
            message_id: id,
            identity_tag: "user-bob@idp".into(),
            model: String::new(),
            facade_name: "Controller".into(),
            facade_method: "AllModels".into(),
            facade_version: 9,
            object_id: String::new(),
            params: (!is_response).then(|| json!({})),
            errors: is_response.then(|| json!({"results": []})),
            is_response,
        }
    }

    fn sink(batch_size: usize) -> SqliteAuditSink {
        let conn = Connection::open_in_memory().unwrap();
        SqliteAuditSink::new(
            conn,
            SqliteSinkConfig {
                batch_size,
                ..Default::default()
            },
        )
        .unwrap()
    }

    #[test]
    fn config_defaults() {
        let cfg = SqliteSinkConfig::default();
        assert_eq!(cfg.batch_size, 100);
        assert_eq!(cfg.flush_interval_ms, 1000);
    }

    #[test]
    fn entries_wait_for_flush() {
        let sink = sink(10);
        sink.append(entry("c1", 1, false));
        assert_eq!(sink.pending(), 1);
        assert_eq!(sink.count().unwrap(), 0);
        sink.flush();
        assert_eq!(sink.pending(), 0);
        assert_eq!(sink.count().unwrap(), 1);
    }

    #[test]
    fn batch_threshold_flushes_immediately() {
        let sink = sink(2);
        sink.append(entry("c1", 1, false));
        sink.append(entry("c1", 1, true));
        assert_eq!(sink.pending(), 0);
        assert_eq!(sink.count().unwrap(), 2);
    }

    #[test]
    fn conversation_round_trips_fields() {
        let sink = sink(100);
        sink.append(entry("c1", 7, false));
        sink.append(entry("c2", 8, false));
        sink.append(entry("c1", 7, true));
        sink.flush();

        let rows = sink.conversation("c1").unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].message_id, 7);
        assert_eq!(rows[0].params, Some(json!({})));
        assert!(!rows[0].is_response);
        assert!(rows[1].is_response);
        assert_eq!(rows[1].errors, Some(json!({"results": []})));
    }

    #[test]
    fn open_creates_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.db");
        let sink = SqliteAuditSink::open(&path, SqliteSinkConfig::default()).unwrap();
        sink.append(entry("c1", 1, false));
        sink.flush();
        drop(sink);

        let reopened = SqliteAuditSink::open(&path, SqliteSinkConfig::default()).unwrap();
        assert_eq!(reopened.count().unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn flush_task_flushes_on_interval_and_cancel() {
        let sink = sink(100);
        let cancel = CancellationToken::new();
        let task = sink.spawn_flush_task(cancel.clone());

        sink.append(entry("c1", 1, false));
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(sink.count().unwrap(), 1);

        sink.append(entry("c1", 2, false));
        cancel.cancel();
        task.await.unwrap();
        assert_eq!(sink.count().unwrap(), 2);
    }
}
