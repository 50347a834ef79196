//! # warden-settings
//!
//! Gateway configuration with layered sources.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`WardenSettings::default()`]
//! 2. **Settings file**: `~/.warden/settings.json` or `$WARDEN_SETTINGS`
//!    (deep-merged over defaults)
//! 3. **Environment variables**: `WARDEN_*` overrides (highest priority)
//!
//! The binary loads once at startup and hands the result to the server;
//! nothing reads settings globally.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;
