//! Listener, liveness, proxy, auth, logging and audit settings.

use serde::{Deserialize, Serialize};
use warden_core::logging::LogFormat;

/// Listener and gateway identity.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Listen port.
    pub port: u16,
    /// UUID the gateway reports as its own controller.
    pub controller_uuid: String,
    /// Name the gateway reports as its own controller.
    pub controller_name: String,
    /// Gateway version reported to clients.
    pub version: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 17070,
            controller_uuid: "914487b5-60e7-42bb-bd63-1adc3fd3a388".to_string(),
            controller_name: "warden".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Connection liveness.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HeartbeatSettings {
    /// Seconds without an inbound frame before a connection is dropped.
    pub ping_timeout_secs: u64,
}

impl Default for HeartbeatSettings {
    fn default() -> Self {
        Self {
            ping_timeout_secs: 90,
        }
    }
}

/// Model summary watchers.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WatcherSettings {
    /// Seconds between refreshes of a watcher's visible model set.
    pub access_refresh_secs: u64,
}

impl Default for WatcherSettings {
    fn default() -> Self {
        Self {
            access_refresh_secs: 60,
        }
    }
}

/// Summary bus.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PubsubSettings {
    /// Maximum handlers running at once across all publishes.
    pub max_concurrency: usize,
}

impl Default for PubsubSettings {
    fn default() -> Self {
        Self {
            max_concurrency: 100,
        }
    }
}

/// Backend dialing.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProxySettings {
    /// `WebSocket` scheme for backend dials (`wss` in production).
    pub dial_scheme: String,
    /// HTTP scheme for proxied uploads (`https` in production).
    pub http_scheme: String,
    /// Seconds allowed for one backend dial.
    pub dial_timeout_secs: u64,
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            dial_scheme: "wss".to_string(),
            http_scheme: "https".to_string(),
            dial_timeout_secs: 30,
        }
    }
}

/// Session and trust tokens.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuthSettings {
    /// HS256 secret that signs client session tokens.
    pub session_secret: String,
    /// HS256 secret that signs backend trust tokens.
    pub trust_token_secret: String,
    /// Trust token lifetime in seconds.
    pub trust_token_ttl_secs: u64,
    /// Identity provider location sent in discharge challenges.
    pub identity_location: String,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            session_secret: String::new(),
            trust_token_secret: String::new(),
            trust_token_ttl_secs: 300,
            identity_location: "https://identity.invalid".to_string(),
        }
    }
}

/// Log output.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter when `RUST_LOG` is unset.
    pub level: String,
    /// Line format.
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
        }
    }
}

/// Where audit entries go.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditSinkKind {
    /// Batched `SQLite` table.
    #[default]
    Sqlite,
    /// `tracing` events at target `audit`.
    Tracing,
}

/// Audit log.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuditSettings {
    /// Sink kind.
    pub sink: AuditSinkKind,
    /// `SQLite` database path.
    pub db_path: String,
    /// Entries buffered before an immediate flush.
    pub batch_size: usize,
    /// Milliseconds between background flushes.
    pub flush_interval_ms: u64,
}

impl Default for AuditSettings {
    fn default() -> Self {
        Self {
            sink: AuditSinkKind::Sqlite,
            db_path: "audit.db".to_string(),
            batch_size: 100,
            flush_interval_ms: 1000,
        }
    }
}
