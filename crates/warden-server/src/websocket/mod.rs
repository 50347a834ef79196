//! `WebSocket` RPC sessions for the controller and legacy model roots.

pub mod session;

pub use session::run_rpc_session;
