//! `/health` endpoint.

use std::time::Instant;

use serde::Serialize;

/// Body of `GET /health`.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// `"ok"` while the listener is up.
    pub status: &'static str,
    /// Whole seconds since the server was built.
    pub uptime_secs: u64,
    /// Open client sockets: controller roots, legacy model roots and tunnels.
    pub connections: usize,
    /// Live subscriptions on the model summary bus.
    pub watchers: usize,
}

impl HealthResponse {
    /// Snapshot the gateway's counters.
    pub fn snapshot(started: Instant, connections: usize, watchers: usize) -> Self {
        Self {
            status: "ok",
            uptime_secs: started.elapsed().as_secs(),
            connections,
            watchers,
        }
    }
}
