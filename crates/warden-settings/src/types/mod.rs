//! Settings types.
//!
//! Every struct uses `#[serde(default)]`, so a settings file only needs the
//! keys it overrides. Keys are camelCase on disk.

mod directory;
mod server;

pub use directory::{DirectorySettings, ModelEntry, UserEntry};
pub use server::{
    AuditSettings, AuditSinkKind, AuthSettings, HeartbeatSettings, LoggingSettings, ProxySettings,
    PubsubSettings, ServerSettings, WatcherSettings,
};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{Result, SettingsError};

/// Root settings object.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WardenSettings {
    /// Listener and gateway identity.
    pub server: ServerSettings,
    /// Connection liveness.
    pub heartbeat: HeartbeatSettings,
    /// Model summary watchers.
    pub watcher: WatcherSettings,
    /// Summary bus.
    pub pubsub: PubsubSettings,
    /// Backend dialing.
    pub proxy: ProxySettings,
    /// Session and trust tokens.
    pub auth: AuthSettings,
    /// Log output.
    pub logging: LoggingSettings,
    /// Audit log.
    pub audit: AuditSettings,
    /// Static controllers, models and users.
    pub directory: DirectorySettings,
}

impl WardenSettings {
    /// Check values that serde cannot.
    ///
    /// Secrets may still be empty here; the binary refuses to start without
    /// them, tests do not need them.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(SettingsError::InvalidValue("server.port must be non-zero".into()));
        }
        let _ = self.server.controller_uuid()?;
        if self.heartbeat.ping_timeout_secs == 0 {
            return Err(SettingsError::InvalidValue(
                "heartbeat.pingTimeoutSecs must be non-zero".into(),
            ));
        }
        if self.watcher.access_refresh_secs == 0 {
            return Err(SettingsError::InvalidValue(
                "watcher.accessRefreshSecs must be non-zero".into(),
            ));
        }
        if self.pubsub.max_concurrency == 0 {
            return Err(SettingsError::InvalidValue(
                "pubsub.maxConcurrency must be non-zero".into(),
            ));
        }
        self.directory.validate()
    }
}

impl ServerSettings {
    /// The gateway's own controller UUID.
    pub fn controller_uuid(&self) -> Result<Uuid> {
        Uuid::parse_str(&self.controller_uuid).map_err(|e| {
            SettingsError::InvalidValue(format!(
                "server.controllerUuid {:?}: {e}",
                self.controller_uuid
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let settings = WardenSettings::default();
        settings.validate().unwrap();
        assert_eq!(settings.heartbeat.ping_timeout_secs, 90);
        assert_eq!(settings.watcher.access_refresh_secs, 60);
        assert_eq!(settings.pubsub.max_concurrency, 100);
        assert_eq!(settings.auth.trust_token_ttl_secs, 300);
    }

    #[test]
    fn bad_controller_uuid_rejected() {
        let mut settings = WardenSettings::default();
        settings.server.controller_uuid = "nope".into();
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("controllerUuid"));
    }

    #[test]
    fn zero_timeout_rejected() {
        let mut settings = WardenSettings::default();
        settings.heartbeat.ping_timeout_secs = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let settings: WardenSettings =
            serde_json::from_str(r#"{"server": {"port": 9000}, "logging": {"format": "json"}}"#)
                .unwrap();
        assert_eq!(settings.server.port, 9000);
        assert_eq!(settings.server.host, "0.0.0.0");
        assert_eq!(settings.logging.format, warden_core::logging::LogFormat::Json);
    }
}
