//! Dialing backend controllers.

use std::time::Duration;

use futures::FutureExt;
use futures::future;
use metrics::counter;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, warn};
use uuid::Uuid;
use warden_core::{Controller, GatewayError};

use crate::metrics::PROXY_DIAL_FAILURES_TOTAL;

/// A dialled backend `WebSocket`.
pub type BackendSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens `WebSocket` connections to controllers.
pub struct Dialer {
    scheme: String,
    timeout: Duration,
}

impl Dialer {
    /// Create a dialer using `scheme` (`wss`, or `ws` for plain backends).
    pub fn new(scheme: impl Into<String>, timeout: Duration) -> Self {
        Self {
            scheme: scheme.into(),
            timeout,
        }
    }

    /// URL of `endpoint` on the model, served by the controller at `address`.
    pub fn url(&self, address: &str, model: Uuid, endpoint: &str) -> String {
        let endpoint = if endpoint.is_empty() { "api" } else { endpoint };
        format!("{}://{address}/model/{model}/{endpoint}", self.scheme)
    }

    /// Connect to the controller hosting `model`, presenting `token`.
    ///
    /// The public address is tried first. After that every reachable
    /// address is dialled at once; the first to connect wins and the
    /// others are dropped.
    pub async fn dial(
        &self,
        controller: &Controller,
        model: Uuid,
        endpoint: &str,
        token: &str,
    ) -> Result<BackendSocket, GatewayError> {
        if let Some(public) = controller.public_address.as_deref() {
            match self.dial_one(public, model, endpoint, token).await {
                Ok(socket) => return Ok(socket),
                Err(e) => {
                    counter!(PROXY_DIAL_FAILURES_TOTAL).increment(1);
                    warn!(controller = %controller.name, error = %e, "cannot dial public address");
                }
            }
        }

        let addresses = controller.reachable_addresses();
        if addresses.is_empty() {
            return Err(GatewayError::connection_failed(format!(
                "no reachable address for controller {}",
                controller.name
            )));
        }
        let attempts = addresses
            .iter()
            .map(|address| self.dial_one(address, model, endpoint, token).boxed());
        match future::select_ok(attempts).await {
            Ok((socket, _pending)) => Ok(socket),
            Err(e) => {
                counter!(PROXY_DIAL_FAILURES_TOTAL).increment(1);
                Err(GatewayError::connection_failed(format!(
                    "cannot connect to controller {}: {}",
                    controller.name,
                    e.message()
                )))
            }
        }
    }

    async fn dial_one(
        &self,
        address: &str,
        model: Uuid,
        endpoint: &str,
        token: &str,
    ) -> Result<BackendSocket, GatewayError> {
        let url = self.url(address, model, endpoint);
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| GatewayError::connection_failed(format!("{url}: {e}")))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|e| GatewayError::internal(format!("invalid trust token header: {e}")))?;
        let _ = request.headers_mut().insert(AUTHORIZATION, bearer);

        match tokio::time::timeout(self.timeout, connect_async(request)).await {
            Ok(Ok((socket, _response))) => {
                debug!(%url, "backend connected");
                Ok(socket)
            }
            Ok(Err(e)) => Err(GatewayError::connection_failed(format!("{url}: {e}"))),
            Err(_) => Err(GatewayError::connection_failed(format!(
                "{url}: timed out after {:?}",
                self.timeout
            ))),
        }
    }
}
