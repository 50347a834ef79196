//! Process-wide publish/subscribe hub keyed by model.
//!
//! The hub remembers the latest message published for every model. A new
//! subscriber is first replayed every remembered message its predicate
//! accepts, synchronously, then receives live publishes. Live delivery runs
//! each matching handler on its own task, bounded by a semaphore.
//!
//! Every publish carries a sequence number that increases across the hub.
//! Handlers for one model may run concurrently, so subscribers that keep
//! only the newest message compare sequence numbers instead of relying on
//! arrival order.
//!
//! Handlers and predicates run while the hub's lock may be held and must
//! not call back into the hub.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use metrics::counter;
use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::metrics::PUBSUB_PUBLISHED_TOTAL;

type Predicate = Arc<dyn Fn(&str) -> bool + Send + Sync>;
type Handler<T> = Arc<dyn Fn(&str, u64, T) + Send + Sync>;

struct Subscriber<T> {
    matches: Predicate,
    handler: Handler<T>,
}

struct HubState<T> {
    next_id: u64,
    next_seq: u64,
    subscribers: HashMap<u64, Subscriber<T>>,
    latest: HashMap<String, (u64, T)>,
}

/// Publish/subscribe hub.
pub struct Hub<T> {
    state: Mutex<HubState<T>>,
    limit: Arc<Semaphore>,
}

impl<T: Clone + Send + Sync + 'static> Hub<T> {
    /// Create a hub running at most `max_concurrency` handlers at once.
    pub fn new(max_concurrency: usize) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(HubState {
                next_id: 0,
                next_seq: 0,
                subscribers: HashMap::new(),
                latest: HashMap::new(),
            }),
            limit: Arc::new(Semaphore::new(max_concurrency.max(1))),
        })
    }

    /// Store `content` as the latest message for `model` and deliver it to
    /// every matching subscriber. Must be called inside a tokio runtime.
    pub fn publish(&self, model: &str, content: T) -> PublishHandle {
        let (seq, handlers) = {
            let mut state = self.state.lock();
            state.next_seq += 1;
            let seq = state.next_seq;
            let _ = state.latest.insert(model.to_owned(), (seq, content.clone()));
            let handlers: Vec<Handler<T>> = state
                .subscribers
                .values()
                .filter(|s| (s.matches)(model))
                .map(|s| Arc::clone(&s.handler))
                .collect();
            (seq, handlers)
        };
        counter!(PUBSUB_PUBLISHED_TOTAL).increment(1);
        debug!(model, seq, subscribers = handlers.len(), "publish");

        let tasks = handlers
            .into_iter()
            .map(|handler| {
                let limit = Arc::clone(&self.limit);
                let model = model.to_owned();
                let content = content.clone();
                tokio::spawn(async move {
                    let Ok(_permit) = limit.acquire_owned().await else {
                        return;
                    };
                    handler(&model, seq, content);
                })
            })
            .collect();
        PublishHandle { tasks }
    }

    /// Subscribe to every model `matches` accepts.
    ///
    /// Remembered messages for matching models are delivered before this
    /// returns. The subscription lasts until the returned guard is
    /// unsubscribed or dropped.
    pub fn subscribe_match<P, H>(self: &Arc<Self>, matches: P, handler: H) -> Unsubscribe
    where
        P: Fn(&str) -> bool + Send + Sync + 'static,
        H: Fn(&str, u64, T) + Send + Sync + 'static,
    {
        let mut state = self.state.lock();
        for (model, (seq, content)) in &state.latest {
            if matches(model) {
                handler(model, *seq, content.clone());
            }
        }
        state.next_id += 1;
        let id = state.next_id;
        let _ = state.subscribers.insert(
            id,
            Subscriber {
                matches: Arc::new(matches),
                handler: Arc::new(handler),
            },
        );
        drop(state);

        let hub: Weak<Self> = Arc::downgrade(self);
        Unsubscribe::new(move || {
            if let Some(hub) = hub.upgrade() {
                let _ = hub.state.lock().subscribers.remove(&id);
            }
        })
    }

    /// Subscribe to a single model.
    pub fn subscribe<H>(self: &Arc<Self>, model: &str, handler: H) -> Unsubscribe
    where
        H: Fn(&str, u64, T) + Send + Sync + 'static,
    {
        let model = model.to_owned();
        self.subscribe_match(move |m| m == model, handler)
    }

    /// Latest message published for `model`.
    pub fn latest(&self, model: &str) -> Option<T> {
        self.state.lock().latest.get(model).map(|(_, content)| content.clone())
    }

    /// Live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.state.lock().subscribers.len()
    }
}

/// Deliveries started by one publish.
pub struct PublishHandle {
    tasks: Vec<JoinHandle<()>>,
}

impl PublishHandle {
    /// Number of subscribers the message was delivered to.
    pub fn deliveries(&self) -> usize {
        self.tasks.len()
    }

    /// Wait until every handler has run.
    pub async fn done(self) {
        let _ = futures::future::join_all(self.tasks).await;
    }
}

/// Subscription guard. Unsubscribes on [`Unsubscribe::unsubscribe`] or drop.
#[must_use = "dropping the guard ends the subscription"]
pub struct Unsubscribe {
    cancel: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl Unsubscribe {
    fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Mutex::new(Some(Box::new(cancel))),
        }
    }

    /// End the subscription. Later calls do nothing.
    pub fn unsubscribe(&self) {
        let cancel = self.cancel.lock().take();
        if let Some(cancel) = cancel {
            cancel();
        }
    }
}

impl Drop for Unsubscribe {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    type Seen = Arc<Mutex<Vec<(String, u64, String)>>>;

    fn recorder() -> (Seen, impl Fn(&str, u64, String) + Send + Sync + 'static) {
        let seen: Seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        (seen, move |model: &str, seq: u64, content: String| {
            sink.lock().push((model.to_owned(), seq, content));
        })
    }

    #[tokio::test]
    async fn publish_reaches_matching_subscribers_only() {
        let hub = Hub::<String>::new(10);
        let (seen, handler) = recorder();
        let _sub = hub.subscribe_match(|m| m.starts_with("a"), handler);

        hub.publish("a1", "x".into()).done().await;
        let handle = hub.publish("b1", "y".into());
        assert_eq!(handle.deliveries(), 0);
        handle.done().await;

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, "a1");
        assert_eq!(seen[0].2, "x");
    }

    #[tokio::test]
    async fn subscribe_replays_latest_synchronously() {
        let hub = Hub::<String>::new(10);
        hub.publish("m1", "old".into()).done().await;
        hub.publish("m1", "new".into()).done().await;
        hub.publish("m2", "other".into()).done().await;

        let (seen, handler) = recorder();
        let _sub = hub.subscribe("m1", handler);
        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].2, "new");
        assert_eq!(seen[0].1, 2);
    }

    #[tokio::test]
    async fn sequence_numbers_increase() {
        let hub = Hub::<String>::new(10);
        let (seen, handler) = recorder();
        let _sub = hub.subscribe_match(|_| true, handler);
        hub.publish("m1", "a".into()).done().await;
        hub.publish("m2", "b".into()).done().await;
        let mut seqs: Vec<u64> = seen.lock().iter().map(|(_, s, _)| *s).collect();
        seqs.sort_unstable();
        assert_eq!(seqs, vec![1, 2]);
    }

    #[tokio::test]
    async fn unsubscribe_is_idempotent_and_stops_delivery() {
        let hub = Hub::<String>::new(10);
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&calls);
        let sub = hub.subscribe_match(
            |_| true,
            move |_, _, _: String| {
                let _ = counted.fetch_add(1, Ordering::SeqCst);
            },
        );
        assert_eq!(hub.subscriber_count(), 1);

        sub.unsubscribe();
        sub.unsubscribe();
        assert_eq!(hub.subscriber_count(), 0);

        hub.publish("m1", "x".into()).done().await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn dropping_guard_unsubscribes() {
        let hub = Hub::<String>::new(10);
        let (_seen, handler) = recorder();
        {
            let _sub = hub.subscribe_match(|_| true, handler);
            assert_eq!(hub.subscriber_count(), 1);
        }
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn guard_outliving_hub_is_harmless() {
        let hub = Hub::<String>::new(1);
        let (_seen, handler) = recorder();
        let sub = hub.subscribe_match(|_| true, handler);
        drop(hub);
        sub.unsubscribe();
    }

    #[tokio::test]
    async fn latest_is_remembered() {
        let hub = Hub::<String>::new(0);
        assert!(hub.latest("m1").is_none());
        hub.publish("m1", "x".into()).done().await;
        assert_eq!(hub.latest("m1").as_deref(), Some("x"));
    }
}
