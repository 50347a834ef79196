//! Model summary watchers.
//!
//! A summary watcher pairs two inputs: an [`access::AccessWatcher`] that
//! periodically refreshes which models the caller may see, and a bus
//! subscription filtered by that set. Visibility is therefore eventually
//! consistent within one refresh period, without an authorization check
//! per delivered event.

pub mod access;
pub mod registry;
pub mod summary;

pub use access::{AccessWatcher, ListVisible};
pub use registry::WatcherRegistry;
pub use summary::ModelSummaryWatcher;
