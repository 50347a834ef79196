//! Per-connection liveness monitor.
//!
//! A [`HeartbeatMonitor`] owns a deadline that every inbound frame pushes
//! forward. A background task sleeps until the deadline; if no heartbeat
//! moved it in the meantime the monitor fires, once. The connection loop
//! races [`DeadSignal::fired`] against its socket and tears down on
//! whichever completes first. The monitor never retries anything.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

struct Inner {
    timeout: Duration,
    deadline: Mutex<Instant>,
    fired: watch::Sender<bool>,
    stop: CancellationToken,
    beats: AtomicU64,
}

/// Resettable dead-man's switch.
pub struct HeartbeatMonitor {
    inner: Arc<Inner>,
}

impl HeartbeatMonitor {
    /// Start monitoring with the given timeout. Must be called inside a
    /// tokio runtime.
    pub fn start(timeout: Duration) -> Self {
        let (fired, _) = watch::channel(false);
        let inner = Arc::new(Inner {
            timeout,
            deadline: Mutex::new(Instant::now() + timeout),
            fired,
            stop: CancellationToken::new(),
            beats: AtomicU64::new(0),
        });
        let _ = tokio::spawn(watch_deadline(Arc::clone(&inner)));
        Self { inner }
    }

    /// Record liveness: the monitor will not fire for another full timeout.
    pub fn heartbeat(&self) {
        let _ = self.inner.beats.fetch_add(1, Ordering::Relaxed);
        *self.inner.deadline.lock() = Instant::now() + self.inner.timeout;
    }

    /// Signal that resolves once the monitor fires.
    pub fn dead(&self) -> DeadSignal {
        DeadSignal {
            rx: self.inner.fired.subscribe(),
        }
    }

    /// Halt monitoring. Returns whether the monitor had already fired.
    pub fn stop(&self) -> bool {
        self.inner.stop.cancel();
        self.is_dead()
    }

    /// Whether the monitor has fired.
    pub fn is_dead(&self) -> bool {
        *self.inner.fired.borrow()
    }

    /// Heartbeats recorded so far.
    pub fn beats(&self) -> u64 {
        self.inner.beats.load(Ordering::Relaxed)
    }
}

impl Drop for HeartbeatMonitor {
    fn drop(&mut self) {
        self.inner.stop.cancel();
    }
}

/// Receive side of a monitor's firing.
pub struct DeadSignal {
    rx: watch::Receiver<bool>,
}

impl DeadSignal {
    /// Wait until the monitor fires. Never resolves if the monitor is
    /// dropped without firing.
    pub async fn fired(mut self) {
        if self.rx.wait_for(|dead| *dead).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

async fn watch_deadline(inner: Arc<Inner>) {
    loop {
        let deadline = *inner.deadline.lock();
        tokio::select! {
            () = inner.stop.cancelled() => return,
            () = tokio::time::sleep_until(deadline) => {
                if *inner.deadline.lock() <= Instant::now() {
                    debug!(timeout_secs = inner.timeout.as_secs(), "heartbeat deadline passed");
                    let _ = inner.fired.send_replace(true);
                    return;
                }
            }
        }
    }
}
