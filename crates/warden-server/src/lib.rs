//! # warden-server
//!
//! Axum HTTP + `WebSocket` gateway in front of a fleet of backend controllers.
//!
//! - [`root`]: per-connection facade dispatch, login and masquerade
//! - [`heartbeat`]: per-connection dead-man's switch
//! - [`pubsub`] and [`watchers`]: access-filtered model summary delivery
//! - [`proxy`]: path resolution, trust tokens, dialing and frame relays
//! - [`services`]: collaborator capabilities, with [`directory`] and [`auth`]
//!   as the built-in implementations
//! - [`server`]: router, listener, health and metrics endpoints

#![deny(unsafe_code)]

pub mod auth;
pub mod config;
pub mod directory;
pub mod health;
pub mod heartbeat;
pub mod metrics;
pub mod proxy;
pub mod pubsub;
pub mod root;
pub mod server;
pub mod services;
pub mod shutdown;
pub mod watchers;
pub mod websocket;

pub use config::ServerConfig;
pub use server::WardenServer;
pub use services::Services;
