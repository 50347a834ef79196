//! Which models a connection may currently see.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use warden_core::GatewayError;

/// Lists the model UUIDs the owning identity may see.
pub type ListVisible =
    Arc<dyn Fn() -> BoxFuture<'static, Result<Vec<String>, GatewayError>> + Send + Sync>;

/// Periodically refreshed visibility set.
///
/// The set is swapped wholesale on each successful refresh, so readers
/// never observe a partial update. A failed refresh keeps the previous set.
pub struct AccessWatcher {
    visible: RwLock<Arc<HashSet<String>>>,
    list: ListVisible,
    period: Duration,
    cancel: CancellationToken,
}

impl AccessWatcher {
    /// Create a watcher with an empty set. Nothing is fetched until
    /// [`AccessWatcher::refresh`] or [`AccessWatcher::run`].
    pub fn new(list: ListVisible, period: Duration, cancel: CancellationToken) -> Self {
        Self {
            visible: RwLock::new(Arc::new(HashSet::new())),
            list,
            period,
            cancel,
        }
    }

    /// Fetch the visible models and replace the set.
    pub async fn refresh(&self) -> Result<(), GatewayError> {
        let models = (self.list)().await?;
        *self.visible.write() = Arc::new(models.into_iter().collect());
        Ok(())
    }

    /// Whether `model` is in the current set.
    pub fn matches(&self, model: &str) -> bool {
        self.visible.read().contains(model)
    }

    /// Snapshot of the current set.
    pub fn visible(&self) -> Arc<HashSet<String>> {
        Arc::clone(&*self.visible.read())
    }

    /// Refresh every period until cancelled.
    pub async fn run(self: Arc<Self>) {
        loop {
            tokio::select! {
                () = self.cancel.cancelled() => return,
                () = tokio::time::sleep(self.period) => {
                    if let Err(err) = self.refresh().await {
                        warn!(error = %err, "failed to refresh visible models");
                    }
                }
            }
        }
    }
}
