//! `WardenServer`: Axum HTTP + `WebSocket` router and listener.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use axum::Router;
use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::{DefaultBodyLimit, Json, Path, State};
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use bytes::Bytes;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use uuid::Uuid;
use warden_audit::AuditRecorder;
use warden_core::GatewayError;
use warden_rpc::params::ModelAbstract;
use warden_rpc::{DuplicateMethod, FacadeTable};

use crate::config::ServerConfig;
use crate::health::HealthResponse;
use crate::proxy::errors::{error_response, upgrade_status};
use crate::proxy::http::ProxiedRequest;
use crate::proxy::{self, ProxyContext};
use crate::root::facades::build_controller_facades;
use crate::root::model_root::{ModelRoot, build_model_facades};
use crate::root::ConnectionRoot;
use crate::services::Services;
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::run_rpc_session;

/// Server construction failed.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// A facade table could not be built.
    #[error(transparent)]
    Facades(#[from] DuplicateMethod),

    /// The proxy could not be built.
    #[error(transparent)]
    Proxy(#[from] GatewayError),
}

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Collaborators.
    pub services: Services,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Facades served on `/api`.
    pub controller_facades: Arc<FacadeTable<ConnectionRoot>>,
    /// Facades served on `/model/{uuid}/api`.
    pub model_facades: Arc<FacadeTable<ModelRoot>>,
    /// Controller proxy.
    pub proxy: Arc<ProxyContext>,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// When the server started.
    pub start_time: Instant,
    /// Live client connections.
    pub connections: Arc<AtomicUsize>,
    /// Prometheus handle for `/metrics`.
    pub metrics: PrometheusHandle,
}

/// The gateway server.
pub struct WardenServer {
    state: AppState,
}

impl WardenServer {
    /// Create a server. Facade tables are built once here and shared by
    /// every connection.
    pub fn new(
        config: ServerConfig,
        services: Services,
        metrics: PrometheusHandle,
    ) -> Result<Self, ServerError> {
        Self::with_shutdown(config, services, metrics, ShutdownCoordinator::new())
    }

    /// Create a server around an existing coordinator, so tasks started
    /// before the server (such as an audit flush task) are drained with it.
    pub fn with_shutdown(
        config: ServerConfig,
        services: Services,
        metrics: PrometheusHandle,
        shutdown: ShutdownCoordinator,
    ) -> Result<Self, ServerError> {
        let proxy = ProxyContext::new(services.clone(), &config)?;
        Ok(Self {
            state: AppState {
                services,
                config: Arc::new(config),
                controller_facades: Arc::new(build_controller_facades()?),
                model_facades: Arc::new(build_model_facades()?),
                proxy: Arc::new(proxy),
                shutdown: Arc::new(shutdown),
                start_time: Instant::now(),
                connections: Arc::new(AtomicUsize::new(0)),
                metrics,
            },
        })
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let body_limit = self.state.config.max_message_size;
        Router::new()
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .route("/api", get(controller_api))
            .route("/model/{uuid}/api", get(model_api))
            .route("/admin/summaries", post(publish_summary))
            .route("/{uuid}/{*endpoint}", get(proxy_websocket).post(proxy_http))
            .layer(DefaultBodyLimit::max(body_limit))
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Bind the configured address and serve until shutdown. Returns the
    /// bound address and the serving task.
    pub async fn listen(&self) -> io::Result<(SocketAddr, JoinHandle<()>)> {
        let config = &self.state.config;
        let listener = TcpListener::bind((config.host.as_str(), config.port)).await?;
        let addr = listener.local_addr()?;
        let router = self.router();
        let token = self.state.shutdown.token();

        let handle = tokio::spawn(async move {
            let serve = axum::serve(listener, router)
                .with_graceful_shutdown(async move { token.cancelled().await });
            if let Err(e) = serve.await {
                error!(error = %e, "server failed");
            }
        });
        info!(%addr, "warden listening");
        Ok((addr, handle))
    }

    /// Get the shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.state.shutdown
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.state.config
    }

    /// Live client connections.
    pub fn connection_count(&self) -> usize {
        self.state.connections.load(Ordering::Relaxed)
    }
}

/// Counts a connection for as long as it is alive.
struct ConnectionGuard(Arc<AtomicUsize>);

impl ConnectionGuard {
    fn new(connections: &Arc<AtomicUsize>) -> Self {
        let _ = connections.fetch_add(1, Ordering::Relaxed);
        Self(Arc::clone(connections))
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        let _ = self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

// ── Handlers ────────────────────────────────────────────────────────

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse::snapshot(
        state.start_time,
        state.connections.load(Ordering::Relaxed),
        state.services.hub.subscriber_count(),
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> String {
    crate::metrics::render(&state.metrics)
}

/// GET /api
async fn controller_api(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.max_message_size(state.config.max_message_size)
        .on_upgrade(move |socket| serve_controller(socket, state))
}

async fn serve_controller(socket: WebSocket, state: AppState) {
    let _guard = ConnectionGuard::new(&state.connections);
    let token = state.shutdown.token();
    let root = Arc::new(ConnectionRoot::new(
        state.services.clone(),
        Arc::clone(&state.config),
        Arc::clone(&state.controller_facades),
        &token,
    ));
    let audit = Arc::new(AuditRecorder::new(Arc::clone(&state.services.audit), ""));
    run_rpc_session(socket, Uuid::new_v4().to_string(), root, audit, token).await;
}

/// GET /model/{uuid}/api
async fn model_api(
    ws: WebSocketUpgrade,
    Path(uuid): Path<String>,
    State(state): State<AppState>,
) -> Response {
    ws.max_message_size(state.config.max_message_size)
        .on_upgrade(move |socket| serve_model(socket, uuid, state))
}

async fn serve_model(socket: WebSocket, uuid: String, state: AppState) {
    let _guard = ConnectionGuard::new(&state.connections);
    let audit = Arc::new(AuditRecorder::new(Arc::clone(&state.services.audit), uuid.clone()));
    let root = Arc::new(ModelRoot::new(
        state.services.clone(),
        &state.config,
        Arc::clone(&state.model_facades),
        uuid,
    ));
    run_rpc_session(socket, Uuid::new_v4().to_string(), root, audit, state.shutdown.token()).await;
}

/// POST /admin/summaries: publish a model summary on the bus.
async fn publish_summary(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(summary): Json<ModelAbstract>,
) -> Response {
    let caller = match state.proxy.authenticate(&headers).await {
        Ok(caller) => caller,
        Err(e) => return error_response(upgrade_status(&e), &e),
    };
    if !caller.admin {
        let e = GatewayError::unauthorized("administrator access required");
        return error_response(StatusCode::UNAUTHORIZED, &e);
    }
    if Uuid::parse_str(&summary.uuid).is_err() {
        let e = GatewayError::bad_request(format!("invalid model UUID {:?}", summary.uuid));
        return error_response(StatusCode::BAD_REQUEST, &e);
    }
    let model = summary.uuid.clone();
    let _ = state.services.hub.publish(&model, summary);
    StatusCode::ACCEPTED.into_response()
}

/// GET /{uuid}/{*endpoint}: `WebSocket` tunnel to the model's controller.
async fn proxy_websocket(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    headers: HeaderMap,
    uri: Uri,
) -> Response {
    let target = match proxy::admit_websocket(&state.proxy, &headers, uri.path()).await {
        Ok(target) => target,
        Err(resp) => return resp,
    };
    ws.max_message_size(state.config.max_message_size)
        .on_upgrade(move |socket| async move {
            let _guard = ConnectionGuard::new(&state.connections);
            state.proxy.tunnel(socket, target, state.shutdown.token()).await;
        })
}

/// POST /{uuid}/{*endpoint}: HTTP upload to the model's controller.
async fn proxy_http(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request = ProxiedRequest {
        method,
        query: uri.query().map(str::to_owned),
        headers,
        body,
    };
    proxy::proxy_http(&state.proxy, uri.path(), request).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::fakes::{self, MODEL_A};
    use axum::body::Body;
    use axum::http::Request;
    use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
    use metrics_exporter_prometheus::PrometheusBuilder;
    use serde_json::json;
    use tower::ServiceExt;

    fn make_server() -> WardenServer {
        let (services, _) = fakes::services();
        let handle = PrometheusBuilder::new().build_recorder().handle();
        WardenServer::new(ServerConfig::default(), services, handle).unwrap()
    }

    fn summary_request(token: Option<&str>, uuid: &str) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/admin/summaries")
            .header(CONTENT_TYPE, "application/json");
        if let Some(token) = token {
            builder = builder.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        let body = json!({
            "uuid": uuid, "controller": "ctl-1", "name": "m", "admins": [], "cloud": "aws",
            "region": "eu-west-1", "credential": "", "size": {}, "status": "available",
            "messages": [], "annotations": {}
        });
        builder.body(Body::from(body.to_string())).unwrap()
    }

    #[tokio::test]
    async fn health_endpoint_returns_ok() {
        let server = make_server();
        let req = Request::builder().uri("/health").body(Body::empty()).unwrap();

        let resp = server.router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let body = axum::body::to_bytes(resp.into_body(), 10_000).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["status"], "ok");
        assert_eq!(parsed["connections"], 0);
        assert_eq!(parsed["watchers"], 0);
    }

    #[tokio::test]
    async fn metrics_endpoint_renders() {
        let server = make_server();
        let req = Request::builder().uri("/metrics").body(Body::empty()).unwrap();
        let resp = server.router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn unknown_route_returns_404() {
        let server = make_server();
        let req = Request::builder().uri("/nonexistent").body(Body::empty()).unwrap();
        let resp = server.router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn api_requires_upgrade() {
        let server = make_server();
        let req = Request::builder().uri("/api").body(Body::empty()).unwrap();
        let resp = server.router().oneshot(req).await.unwrap();
        assert!(resp.status().is_client_error());
        assert_ne!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn summaries_need_an_administrator() {
        let server = make_server();
        let resp = server.router().oneshot(summary_request(None, MODEL_A)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let resp = server
            .router()
            .oneshot(summary_request(Some("alice@idp"), MODEL_A))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn admin_summary_is_published() {
        let server = make_server();
        let resp = server
            .router()
            .oneshot(summary_request(Some("root@idp"), MODEL_A))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::ACCEPTED);
        let latest = server.state.services.hub.latest(MODEL_A).unwrap();
        assert_eq!(latest.status, "available");
    }

    #[tokio::test]
    async fn summary_with_bad_uuid_is_rejected() {
        let server = make_server();
        let resp = server
            .router()
            .oneshot(summary_request(Some("root@idp"), "not-a-uuid"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn http_proxy_statuses() {
        let server = make_server();
        let post = |uri: String, token: Option<&str>| {
            let mut builder = Request::builder().method("POST").uri(uri);
            if let Some(token) = token {
                builder = builder.header(AUTHORIZATION, format!("Bearer {token}"));
            }
            builder.body(Body::from("bytes")).unwrap()
        };

        let resp = server
            .router()
            .oneshot(post(format!("/{MODEL_A}/charms"), None))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let resp = server
            .router()
            .oneshot(post(format!("/{}/charms", Uuid::nil()), Some("bob@idp")))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let resp = server
            .router()
            .oneshot(post("/not-a-model/charms".into(), Some("bob@idp")))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn connection_guard_counts() {
        let server = make_server();
        {
            let _a = ConnectionGuard::new(&server.state.connections);
            let _b = ConnectionGuard::new(&server.state.connections);
            assert_eq!(server.connection_count(), 2);
        }
        assert_eq!(server.connection_count(), 0);
    }

    #[test]
    fn shutdown_coordinator_accessible() {
        let server = make_server();
        assert!(!server.shutdown().is_shutting_down());
        assert_eq!(server.config().host, "127.0.0.1");
    }
}
