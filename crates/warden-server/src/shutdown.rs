//! Graceful shutdown coordination via `CancellationToken`.
//!
//! Background tasks the server owns (the listener, the audit flush task)
//! are tracked here so shutdown can wait for them. Per-connection tasks
//! are not tracked: they watch [`ShutdownCoordinator::token`] and close
//! their sockets when it fires.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Default timeout for graceful shutdown before giving up on tasks.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Coordinates graceful shutdown across all server tasks.
pub struct ShutdownCoordinator {
    token: CancellationToken,
    tracked: Mutex<Vec<(&'static str, JoinHandle<()>)>>,
}

impl ShutdownCoordinator {
    /// Create a new shutdown coordinator.
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            tracked: Mutex::new(Vec::new()),
        }
    }

    /// Get a clone of the cancellation token.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Initiate shutdown.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Whether a shutdown has been initiated.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Wait for `handle` during [`ShutdownCoordinator::graceful_shutdown`].
    pub fn track(&self, name: &'static str, handle: JoinHandle<()>) {
        self.tracked.lock().push((name, handle));
    }

    /// Number of tracked tasks not yet drained.
    pub fn tracked_len(&self) -> usize {
        self.tracked.lock().len()
    }

    /// Cancel the token, then wait up to `timeout` for every tracked task.
    pub async fn graceful_shutdown(&self, timeout: Option<Duration>) {
        let timeout = timeout.unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT);
        let tracked = std::mem::take(&mut *self.tracked.lock());

        self.shutdown();
        let names: Vec<&str> = tracked.iter().map(|(name, _)| *name).collect();
        info!(
            tasks = ?names,
            timeout_secs = timeout.as_secs(),
            "waiting for tasks to complete"
        );

        let drain = futures::future::join_all(tracked.into_iter().map(|(_, handle)| handle));
        if tokio::time::timeout(timeout, drain).await.is_err() {
            warn!("shutdown timed out after {timeout:?}, some tasks may still be running");
        }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_state_not_shutting_down() {
        let coord = ShutdownCoordinator::new();
        assert!(!coord.is_shutting_down());
        assert_eq!(coord.tracked_len(), 0);
    }

    #[test]
    fn shutdown_cancels_every_token() {
        let coord = ShutdownCoordinator::new();
        let t1 = coord.token();
        let t2 = coord.token();
        coord.shutdown();
        coord.shutdown();
        assert!(coord.is_shutting_down());
        assert!(t1.is_cancelled());
        assert!(t2.is_cancelled());
    }

    #[tokio::test]
    async fn graceful_shutdown_drains_tracked_tasks() {
        let coord = ShutdownCoordinator::new();
        let token = coord.token();
        let (tx, rx) = tokio::sync::oneshot::channel();
        coord.track(
            "worker",
            tokio::spawn(async move {
                token.cancelled().await;
                let _ = tx.send(());
            }),
        );
        assert_eq!(coord.tracked_len(), 1);

        coord.graceful_shutdown(None).await;
        assert!(rx.await.is_ok());
        assert_eq!(coord.tracked_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn graceful_shutdown_times_out() {
        let coord = ShutdownCoordinator::new();
        coord.track(
            "stubborn",
            tokio::spawn(async {
                tokio::time::sleep(Duration::from_secs(300)).await;
            }),
        );
        coord.graceful_shutdown(Some(Duration::from_millis(100))).await;
        assert!(coord.is_shutting_down());
    }
}
