//! Prometheus metrics recorder and `/metrics` endpoint handler.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the `PrometheusHandle` used to render the `/metrics` endpoint.
/// Call once at startup, before any metrics are recorded.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Render Prometheus text format from the installed recorder.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

// Metric name constants to avoid typos across modules.

/// RPC requests total (counter, labels: method).
pub const RPC_REQUESTS_TOTAL: &str = "rpc_requests_total";
/// RPC errors total (counter, labels: method, error_type).
pub const RPC_ERRORS_TOTAL: &str = "rpc_errors_total";
/// RPC request duration seconds (histogram, labels: method).
pub const RPC_REQUEST_DURATION_SECONDS: &str = "rpc_request_duration_seconds";
/// WebSocket connections opened total (counter, labels: root).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// WebSocket disconnections total (counter, labels: reason).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Active WebSocket connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// WebSocket connection duration seconds (histogram).
pub const WS_CONNECTION_DURATION_SECONDS: &str = "ws_connection_duration_seconds";
/// Logins total (counter, labels: outcome).
pub const LOGINS_TOTAL: &str = "logins_total";
/// Connections dropped by the heartbeat monitor (counter).
pub const HEARTBEAT_TIMEOUTS_TOTAL: &str = "heartbeat_timeouts_total";
/// Active model summary watchers (gauge).
pub const WATCHERS_ACTIVE: &str = "watchers_active";
/// Summaries published on the bus (counter).
pub const PUBSUB_PUBLISHED_TOTAL: &str = "pubsub_published_total";
/// Proxied connections total (counter, labels: mode).
pub const PROXY_CONNECTIONS_TOTAL: &str = "proxy_connections_total";
/// Active proxied connections (gauge).
pub const PROXY_CONNECTIONS_ACTIVE: &str = "proxy_connections_active";
/// Failed backend dials (counter).
pub const PROXY_DIAL_FAILURES_TOTAL: &str = "proxy_dial_failures_total";
/// Frames relayed (counter, labels: direction).
pub const PROXY_FRAMES_TOTAL: &str = "proxy_frames_total";
/// Proxied HTTP requests (counter, labels: status).
pub const HTTP_PROXY_REQUESTS_TOTAL: &str = "http_proxy_requests_total";
/// Audit recorder failures (counter, labels: kind).
pub const AUDIT_FAILURES_TOTAL: &str = "audit_failures_total";
