//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`WardenSettings::default()`]
//! 2. If the settings file exists, deep-merge its values over the defaults
//! 3. Apply `WARDEN_*` environment variable overrides (highest priority)
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::WardenSettings;

/// Resolve the settings file path.
///
/// `WARDEN_SETTINGS` wins; otherwise `~/.warden/settings.json`.
pub fn settings_path() -> PathBuf {
    if let Some(path) = read_env_string("WARDEN_SETTINGS") {
        return PathBuf::from(path);
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".warden").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<WardenSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<WardenSettings> {
    let defaults = serde_json::to_value(WardenSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: WardenSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply environment variable overrides to loaded settings.
///
/// Invalid values are warned about and ignored.
pub fn apply_env_overrides(settings: &mut WardenSettings) {
    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = read_env_string("WARDEN_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = read_env_u64("WARDEN_PORT", 1, 65535).and_then(|v| u16::try_from(v).ok()) {
        settings.server.port = v;
    }
    if let Some(v) = read_env_string("WARDEN_CONTROLLER_UUID") {
        settings.server.controller_uuid = v;
    }

    // ── Liveness and watchers ───────────────────────────────────────
    if let Some(v) = read_env_u64("WARDEN_PING_TIMEOUT_SECS", 1, 86_400) {
        settings.heartbeat.ping_timeout_secs = v;
    }
    if let Some(v) = read_env_u64("WARDEN_ACCESS_REFRESH_SECS", 1, 86_400) {
        settings.watcher.access_refresh_secs = v;
    }

    // ── Proxy and auth ──────────────────────────────────────────────
    if let Some(v) = read_env_string("WARDEN_DIAL_SCHEME") {
        settings.proxy.dial_scheme = v;
    }
    if let Some(v) = read_env_string("WARDEN_SESSION_SECRET") {
        settings.auth.session_secret = v;
    }
    if let Some(v) = read_env_string("WARDEN_TRUST_TOKEN_SECRET") {
        settings.auth.trust_token_secret = v;
    }

    // ── Logging and audit ───────────────────────────────────────────
    if let Some(v) = read_env_string("WARDEN_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = read_env_string("WARDEN_LOG_FORMAT") {
        match serde_json::from_value(Value::String(v.clone())) {
            Ok(format) => settings.logging.format = format,
            Err(_) => {
                tracing::warn!(key = "WARDEN_LOG_FORMAT", value = %v, "invalid log format");
            }
        }
    }
    if let Some(v) = read_env_string("WARDEN_AUDIT_DB") {
        settings.audit.db_path = v;
    }
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn read_env_u64(name: &str, min: u64, max: u64) -> Option<u64> {
    let val = std::env::var(name).ok()?;
    let result = parse_u64_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid u64 env var, ignoring");
    }
    result
}
