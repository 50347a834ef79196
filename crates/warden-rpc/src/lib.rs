//! # warden-rpc
//!
//! The RPC protocol spoken over client `WebSocket` connections.
//!
//! - [`types::Message`]: one request or reply frame
//! - [`params`]: request and response bodies of the locally served facades
//! - [`errors::RpcError`]: dispatch-boundary errors and their wire form
//! - [`registry::FacadeTable`]: the immutable `(facade, version, method)`
//!   table built once at startup, with typed handler adapters

#![deny(unsafe_code)]

pub mod errors;
pub mod params;
pub mod registry;
pub mod types;

pub use errors::RpcError;
pub use registry::{
    DuplicateMethod, FacadeTable, FacadeTableBuilder, MethodHandler, MethodKey, method,
};
pub use types::Message;
