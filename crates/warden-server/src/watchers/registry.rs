//! Per-connection table of live summary watchers.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;
use warden_core::GatewayError;

use crate::watchers::summary::ModelSummaryWatcher;

/// Watchers owned by one connection, keyed by id.
#[derive(Default)]
pub struct WatcherRegistry {
    watchers: RwLock<HashMap<String, Arc<ModelSummaryWatcher>>>,
}

impl WatcherRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a watcher under its id.
    pub fn register(&self, watcher: Arc<ModelSummaryWatcher>) {
        let id = watcher.id().to_owned();
        let _ = self.watchers.write().insert(id, watcher);
    }

    /// Look up a watcher.
    pub fn get(&self, id: &str) -> Result<Arc<ModelSummaryWatcher>, GatewayError> {
        self.watchers
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| GatewayError::not_found(format!("watcher {id:?} not found")))
    }

    /// Stop every watcher and empty the registry. Runs at connection
    /// teardown.
    pub fn stop_all(&self) {
        let drained: Vec<Arc<ModelSummaryWatcher>> =
            self.watchers.write().drain().map(|(_, w)| w).collect();
        for watcher in drained {
            if !watcher.stop() {
                debug!(watcher_id = watcher.id(), "watcher was already stopped");
            }
        }
    }

    /// Registered watchers.
    pub fn len(&self) -> usize {
        self.watchers.read().len()
    }

    /// Whether no watcher is registered.
    pub fn is_empty(&self) -> bool {
        self.watchers.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pubsub::Hub;
    use crate::watchers::access::AccessWatcher;
    use futures::FutureExt;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;
    use warden_core::{ErrorCode, GatewayError};

    fn watcher(
        hub: &Arc<Hub<warden_rpc::params::ModelAbstract>>,
        id: &str,
    ) -> Arc<ModelSummaryWatcher> {
        let access = Arc::new(AccessWatcher::new(
            Arc::new(|| async { Ok::<_, GatewayError>(Vec::<String>::new()) }.boxed()),
            Duration::from_secs(60),
            CancellationToken::new(),
        ));
        Arc::new(ModelSummaryWatcher::start(id.into(), hub, access, CancellationToken::new()))
    }

    #[tokio::test]
    async fn get_unknown_is_not_found() {
        let reg = WatcherRegistry::new();
        let err = reg.get("nope").err().unwrap();
        assert_eq!(err.code(), ErrorCode::NotFound);
    }

    #[tokio::test]
    async fn register_then_get() {
        let hub = Hub::new(4);
        let reg = WatcherRegistry::new();
        reg.register(watcher(&hub, "a"));
        assert_eq!(reg.get("a").unwrap().id(), "a");
        assert_eq!(reg.len(), 1);
    }

    #[tokio::test]
    async fn stop_all_stops_each_once_and_clears() {
        let hub = Hub::new(4);
        let reg = WatcherRegistry::new();
        let a = watcher(&hub, "a");
        let b = watcher(&hub, "b");
        reg.register(Arc::clone(&a));
        reg.register(Arc::clone(&b));

        reg.stop_all();

        assert!(a.is_stopped());
        assert!(b.is_stopped());
        // a second stop is a no-op, so each was stopped exactly once
        assert!(!a.stop());
        assert!(!b.stop());
        assert!(reg.is_empty());
        assert!(reg.get("a").is_err());
        assert_eq!(hub.subscriber_count(), 0);
    }
}
