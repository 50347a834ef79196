//! Server configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;
use warden_core::ControllerTag;
use warden_settings::{SettingsError, WardenSettings};

/// UUID the gateway reports as its own controller UUID unless configured.
const DEFAULT_CONTROLLER_UUID: Uuid = Uuid::from_u128(0x9144_87b5_60e7_42bb_bd63_1adc_3fd3_a388);

/// Configuration for the warden server.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// UUID the gateway presents as its own controller UUID.
    pub controller_uuid: Uuid,
    /// Gateway name.
    pub controller_name: String,
    /// Gateway build version.
    pub version: String,
    /// Seconds without an inbound frame before a connection is dropped.
    pub ping_timeout_secs: u64,
    /// Seconds between refreshes of a watcher's visible-model set.
    pub access_refresh_secs: u64,
    /// Maximum concurrent summary handlers on the bus.
    pub pubsub_max_concurrency: usize,
    /// Scheme used to dial backend WebSockets (`wss` or `ws`).
    pub dial_scheme: String,
    /// Scheme used for proxied HTTP requests (`https` or `http`).
    pub http_scheme: String,
    /// Timeout for one backend dial.
    pub dial_timeout_secs: u64,
    /// Max `WebSocket` message size in bytes.
    pub max_message_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            controller_uuid: DEFAULT_CONTROLLER_UUID,
            controller_name: "warden".into(),
            version: env!("CARGO_PKG_VERSION").into(),
            ping_timeout_secs: 90,
            access_refresh_secs: 60,
            pubsub_max_concurrency: 100,
            dial_scheme: "wss".into(),
            http_scheme: "https".into(),
            dial_timeout_secs: 30,
            max_message_size: 16 * 1024 * 1024, // 16 MB
        }
    }
}

impl ServerConfig {
    /// Derive the server configuration from loaded settings.
    pub fn from_settings(settings: &WardenSettings) -> Result<Self, SettingsError> {
        Ok(Self {
            host: settings.server.host.clone(),
            port: settings.server.port,
            controller_uuid: settings.server.controller_uuid()?,
            controller_name: settings.server.controller_name.clone(),
            version: settings.server.version.clone(),
            ping_timeout_secs: settings.heartbeat.ping_timeout_secs,
            access_refresh_secs: settings.watcher.access_refresh_secs,
            pubsub_max_concurrency: settings.pubsub.max_concurrency,
            dial_scheme: settings.proxy.dial_scheme.clone(),
            http_scheme: settings.proxy.http_scheme.clone(),
            dial_timeout_secs: settings.proxy.dial_timeout_secs,
            ..Self::default()
        })
    }

    /// Tag of the gateway's own controller.
    pub fn controller_tag(&self) -> ControllerTag {
        ControllerTag::new(self.controller_uuid)
    }

    /// Heartbeat timeout.
    pub fn ping_timeout(&self) -> Duration {
        Duration::from_secs(self.ping_timeout_secs)
    }

    /// Access refresh period.
    pub fn access_refresh(&self) -> Duration {
        Duration::from_secs(self.access_refresh_secs)
    }

    /// Backend dial timeout.
    pub fn dial_timeout(&self) -> Duration {
        Duration::from_secs(self.dial_timeout_secs)
    }
}
