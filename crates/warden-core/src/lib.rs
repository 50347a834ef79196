//! # warden-core
//!
//! Types shared by every warden crate:
//!
//! - [`errors`]: the gateway error taxonomy and its wire codes
//! - [`tags`]: user, model and controller tags (`user-alice@idp`, `model-<uuid>`)
//! - [`identity`]: authenticated identities and model access levels
//! - [`model`]: backend controller and model records
//! - [`ids`]: per-connection id generation and audit conversation ids
//! - [`logging`]: `tracing` subscriber initialization

#![deny(unsafe_code)]

pub mod errors;
pub mod identity;
pub mod ids;
pub mod logging;
pub mod model;
pub mod tags;

pub use errors::{ErrorCode, GatewayError, Result};
pub use identity::{Access, Identity};
pub use model::{Controller, HostPort, Model};
pub use tags::{ControllerTag, ModelTag, TagError, UserTag};
