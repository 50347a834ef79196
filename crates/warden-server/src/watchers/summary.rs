//! Pollable, access-filtered view of the model summary bus.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use metrics::gauge;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use warden_rpc::params::{ModelAbstract, SummaryWatcherNextResults};

use crate::metrics::WATCHERS_ACTIVE;
use crate::pubsub::{Hub, Unsubscribe};
use crate::watchers::access::AccessWatcher;

type Snapshot = HashMap<String, (u64, ModelAbstract)>;

/// Latest summary of every visible model, polled with [`ModelSummaryWatcher::next`].
pub struct ModelSummaryWatcher {
    id: String,
    summaries: Arc<Mutex<Snapshot>>,
    cancel: CancellationToken,
    unsubscribe: Unsubscribe,
    stopped: AtomicBool,
}

impl ModelSummaryWatcher {
    /// Subscribe to `hub`, filtered by `access`.
    ///
    /// Summaries already on the bus for visible models are held before this
    /// returns. `cancel` is cancelled on [`ModelSummaryWatcher::stop`]; pass
    /// the token the access watcher's refresh loop runs under.
    pub fn start(
        id: String,
        hub: &Arc<Hub<ModelAbstract>>,
        access: Arc<AccessWatcher>,
        cancel: CancellationToken,
    ) -> Self {
        let summaries: Arc<Mutex<Snapshot>> = Arc::new(Mutex::new(HashMap::new()));
        let sink = Arc::clone(&summaries);
        let unsubscribe = hub.subscribe_match(
            move |model| access.matches(model),
            move |model, seq, summary| {
                let mut held = sink.lock();
                // handlers for one model may finish out of order
                if held.get(model).is_some_and(|(newest, _)| *newest > seq) {
                    return;
                }
                let _ = held.insert(model.to_owned(), (seq, summary));
            },
        );
        gauge!(WATCHERS_ACTIVE).increment(1.0);
        debug!(watcher_id = %id, "model summary watcher started");
        Self {
            id,
            summaries,
            cancel,
            unsubscribe,
            stopped: AtomicBool::new(false),
        }
    }

    /// Watcher id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Current summaries, sorted by model UUID. Never blocks.
    pub fn next(&self) -> SummaryWatcherNextResults {
        let mut models: Vec<ModelAbstract> = self
            .summaries
            .lock()
            .values()
            .map(|(_, summary)| summary.clone())
            .collect();
        models.sort_by(|a, b| a.uuid.cmp(&b.uuid));
        SummaryWatcherNextResults { models }
    }

    /// Unsubscribe and cancel the access refresh. Returns `false` if the
    /// watcher was already stopped.
    pub fn stop(&self) -> bool {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.unsubscribe.unsubscribe();
        self.cancel.cancel();
        gauge!(WATCHERS_ACTIVE).decrement(1.0);
        debug!(watcher_id = %self.id, "model summary watcher stopped");
        true
    }

    /// Whether [`ModelSummaryWatcher::stop`] has run.
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

impl Drop for ModelSummaryWatcher {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::watchers::access::ListVisible;
    use futures::FutureExt;
    use std::time::Duration;
    use warden_core::GatewayError;

    fn summary(uuid: &str, status: &str) -> ModelAbstract {
        ModelAbstract {
            uuid: uuid.into(),
            status: status.into(),
            ..ModelAbstract::default()
        }
    }

    fn fixed(ids: &[&str]) -> ListVisible {
        let ids: Vec<String> = ids.iter().map(|s| (*s).to_owned()).collect();
        Arc::new(move || {
            let ids = ids.clone();
            async move { Ok::<_, GatewayError>(ids) }.boxed()
        })
    }

    async fn access(ids: &[&str]) -> Arc<AccessWatcher> {
        let w = AccessWatcher::new(fixed(ids), Duration::from_secs(60), CancellationToken::new());
        w.refresh().await.unwrap();
        Arc::new(w)
    }

    #[tokio::test]
    async fn next_is_sorted_and_filtered() {
        let hub = Hub::new(10);
        let w = ModelSummaryWatcher::start(
            "w1".into(),
            &hub,
            access(&["b", "a"]).await,
            CancellationToken::new(),
        );
        hub.publish("b", summary("b", "green")).done().await;
        hub.publish("a", summary("a", "green")).done().await;
        hub.publish("hidden", summary("hidden", "red")).done().await;

        let uuids: Vec<String> = w.next().models.into_iter().map(|m| m.uuid).collect();
        assert_eq!(uuids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn empty_result_is_valid() {
        let hub = Hub::new(10);
        let w = ModelSummaryWatcher::start("w".into(), &hub, access(&[]).await, CancellationToken::new());
        assert!(w.next().models.is_empty());
    }

    #[tokio::test]
    async fn last_write_wins() {
        let hub = Hub::new(10);
        let w = ModelSummaryWatcher::start("w".into(), &hub, access(&["m"]).await, CancellationToken::new());
        hub.publish("m", summary("m", "first")).done().await;
        hub.publish("m", summary("m", "second")).done().await;

        let models = w.next().models;
        assert_eq!(models.len(), 1);
        assert_eq!(models[0].status, "second");
    }

    #[tokio::test]
    async fn existing_summaries_are_replayed() {
        let hub = Hub::new(10);
        hub.publish("m", summary("m", "before")).done().await;
        let w = ModelSummaryWatcher::start("w".into(), &hub, access(&["m"]).await, CancellationToken::new());
        assert_eq!(w.next().models[0].status, "before");
    }

    #[tokio::test]
    async fn model_becomes_visible_after_refresh() {
        let hub = Hub::new(10);
        let listed: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let source = Arc::clone(&listed);
        let list: ListVisible = Arc::new(move || {
            let ids = source.lock().clone();
            async move { Ok::<_, GatewayError>(ids) }.boxed()
        });
        let access = Arc::new(AccessWatcher::new(list, Duration::from_secs(60), CancellationToken::new()));
        access.refresh().await.unwrap();
        let w = ModelSummaryWatcher::start("w".into(), &hub, Arc::clone(&access), CancellationToken::new());

        hub.publish("m", summary("m", "hidden")).done().await;
        assert!(w.next().models.is_empty());

        listed.lock().push("m".into());
        access.refresh().await.unwrap();
        hub.publish("m", summary("m", "shown")).done().await;

        let models = w.next().models;
        assert_eq!(models.len(), 1);
        assert_eq!(models[0].uuid, "m");
        assert_eq!(models[0].status, "shown");
    }

    #[tokio::test]
    async fn stop_is_idempotent_and_unsubscribes() {
        let hub = Hub::new(10);
        let cancel = CancellationToken::new();
        let w = ModelSummaryWatcher::start("w".into(), &hub, access(&["m"]).await, cancel.clone());
        assert_eq!(hub.subscriber_count(), 1);

        assert!(w.stop());
        assert!(!w.stop());
        assert!(w.is_stopped());
        assert!(cancel.is_cancelled());
        assert_eq!(hub.subscriber_count(), 0);

        hub.publish("m", summary("m", "late")).done().await;
        assert!(w.next().models.is_empty());
    }
}
