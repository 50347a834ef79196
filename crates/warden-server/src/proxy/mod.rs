//! Controller proxy: tunnels client connections to the controller that
//! hosts the requested model.
//!
//! Every route authenticates the HTTP-level caller, parses
//! `/<model-uuid>/<endpoint>`, resolves the model and checks access before
//! anything is dialled. `WebSocket` routes then mint a trust token, dial the
//! controller and relay frames; API endpoints go through an [`api::ApiTap`].
//! `POST` routes are forwarded by [`http::HttpProxy`].

pub mod api;
pub mod dial;
pub mod errors;
pub mod http;
pub mod path;
pub mod relay;

use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, WebSocket, close_code};
use axum::http::HeaderMap;
use axum::response::Response;
use axum_extra::headers::authorization::{Basic, Bearer};
use axum_extra::headers::{Authorization, HeaderMapExt};
use metrics::{counter, gauge};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};
use warden_audit::AuditRecorder;
use warden_core::{Access, GatewayError, Identity, Model};

use self::api::ApiTap;
use self::dial::Dialer;
use self::errors::{error_response, http_status, upgrade_status};
use self::http::{HttpProxy, ProxiedRequest};
use self::path::{Endpoint, parse_proxy_path};
use self::relay::{Filters, relay};
use crate::config::ServerConfig;
use crate::metrics::{PROXY_CONNECTIONS_ACTIVE, PROXY_CONNECTIONS_TOTAL};
use crate::services::Services;

/// Longest close reason a control frame can carry.
const MAX_CLOSE_REASON: usize = 123;

/// A resolved, authorized proxy request.
#[derive(Clone, Debug)]
pub struct Target {
    /// Authenticated caller.
    pub caller: Identity,
    /// Model being reached, with its controller.
    pub model: Model,
    /// Caller's access on the model.
    pub access: Access,
    /// Endpoint on the controller.
    pub endpoint: Endpoint,
}

/// Shared state of the proxy routes.
pub struct ProxyContext {
    services: Services,
    dialer: Dialer,
    http: HttpProxy,
}

impl ProxyContext {
    /// Build the proxy from the server configuration.
    pub fn new(services: Services, config: &ServerConfig) -> Result<Self, GatewayError> {
        Ok(Self {
            dialer: Dialer::new(config.dial_scheme.clone(), config.dial_timeout()),
            http: HttpProxy::new(config.http_scheme.clone(), config.dial_timeout())?,
            services,
        })
    }

    /// Authenticate the HTTP-level caller from basic auth (password is a
    /// session token) or a bearer token.
    pub async fn authenticate(&self, headers: &HeaderMap) -> Result<Identity, GatewayError> {
        let basic = headers.typed_get::<Authorization<Basic>>();
        let bearer = headers.typed_get::<Authorization<Bearer>>();
        let token = if let Some(Authorization(basic)) = basic {
            basic.password().to_owned()
        } else if let Some(Authorization(bearer)) = bearer {
            bearer.token().to_owned()
        } else {
            return Err(GatewayError::unauthorized("authentication required"));
        };
        if token.is_empty() {
            return Err(GatewayError::unauthorized("authentication required"));
        }
        self.services
            .authenticator
            .verify_session_token(&token)
            .await
            .map_err(|e| GatewayError::unauthorized(e.message()))
    }

    /// Resolve a `WebSocket` proxy path for `caller`.
    ///
    /// Unknown models are NotFound and nothing is dialled. Unknown endpoints
    /// are BadRequest. Missing or insufficient access is Unauthorized.
    pub async fn resolve(&self, caller: Identity, path: &str) -> Result<Target, GatewayError> {
        let parsed = parse_proxy_path(path)?;
        let model = self.services.directory.resolve_model(parsed.model).await?;
        let endpoint = Endpoint::classify(&parsed.endpoint)?;
        let access = self.authorize(&caller, &model, endpoint.required_access()).await?;
        Ok(Target {
            caller,
            model,
            access,
            endpoint,
        })
    }

    async fn authorize(
        &self,
        caller: &Identity,
        model: &Model,
        required: Access,
    ) -> Result<Access, GatewayError> {
        match self.services.directory.model_access(caller, &model.tag()).await {
            Some(access) if access >= required => Ok(access),
            _ => Err(GatewayError::unauthorized(format!(
                "{} lacks {} access to model {}",
                caller.tag,
                required.as_str(),
                model.qualified_name()
            ))),
        }
    }

    /// Forward an HTTP upload. The caller needs write access to the model.
    pub async fn forward_http(
        &self,
        path: &str,
        request: ProxiedRequest,
    ) -> Result<Response, GatewayError> {
        let caller = self.authenticate(&request.headers).await?;
        let parsed = parse_proxy_path(path)?;
        let model = self.services.directory.resolve_model(parsed.model).await?;
        let _ = self.authorize(&caller, &model, Access::Write).await?;
        self.http
            .forward(&model.controller, model.uuid, &parsed.endpoint, request)
            .await
    }

    /// Mint, dial and relay until either side goes away or `shutdown` fires.
    #[instrument(skip_all, fields(
        model = %target.model.uuid,
        endpoint = target.endpoint.name(),
        caller = %target.caller.tag,
    ))]
    pub async fn tunnel(&self, socket: WebSocket, target: Target, shutdown: CancellationToken) {
        let mode = target.endpoint.mode();
        counter!(PROXY_CONNECTIONS_TOTAL, "mode" => mode).increment(1);
        gauge!(PROXY_CONNECTIONS_ACTIVE).increment(1.0);
        self.run_tunnel(socket, &target, &shutdown).await;
        gauge!(PROXY_CONNECTIONS_ACTIVE).decrement(1.0);
    }

    async fn run_tunnel(&self, socket: WebSocket, target: &Target, shutdown: &CancellationToken) {
        let token = match self.services.minter.mint(&target.caller, &target.model, target.access) {
            Ok(token) => token,
            Err(e) => {
                warn!(error = %e, "cannot mint trust token");
                close_with_error(socket, &e).await;
                return;
            }
        };

        let backend = match self
            .dialer
            .dial(&target.model.controller, target.model.uuid, target.endpoint.name(), &token)
            .await
        {
            Ok(backend) => backend,
            Err(e) => {
                warn!(error = %e, "cannot reach controller");
                close_with_error(socket, &e).await;
                return;
            }
        };
        info!(controller = %target.model.controller.name, "tunnel open");

        let filters = match &target.endpoint {
            Endpoint::Api(_) => {
                let audit = Arc::new(AuditRecorder::new(
                    Arc::clone(&self.services.audit),
                    target.model.uuid.to_string(),
                ));
                ApiTap::new(&target.caller.tag, &token, audit).filters()
            }
            Endpoint::Stream(_) => Filters::default(),
        };

        let outcome = relay(socket, backend, filters, shutdown).await;
        match outcome.error {
            Some(e) => info!(first = ?outcome.first, error = %e, "tunnel closed"),
            None => info!(first = ?outcome.first, "tunnel closed"),
        }
    }
}

/// `GET /<uuid>/<endpoint>`: authenticate and resolve before upgrading.
/// Failures become the HTTP response of the refused upgrade.
pub async fn admit_websocket(
    ctx: &ProxyContext,
    headers: &HeaderMap,
    path: &str,
) -> Result<Target, Response> {
    let caller = ctx
        .authenticate(headers)
        .await
        .map_err(|e| error_response(upgrade_status(&e), &e))?;
    ctx.resolve(caller, path)
        .await
        .map_err(|e| error_response(upgrade_status(&e), &e))
}

/// `POST /<uuid>/<endpoint>`.
pub async fn proxy_http(ctx: &ProxyContext, path: &str, request: ProxiedRequest) -> Response {
    match ctx.forward_http(path, request).await {
        Ok(response) => response,
        Err(e) => error_response(http_status(&e), &e),
    }
}

async fn close_with_error(mut socket: WebSocket, err: &GatewayError) {
    let frame = CloseFrame {
        code: close_code::ERROR,
        reason: truncate(err.message(), MAX_CLOSE_REASON).to_owned().into(),
    };
    let _ = socket.send(Message::Close(Some(frame))).await;
}

fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
