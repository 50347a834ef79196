//! HTTP proxy for non-`WebSocket` uploads.

use std::time::Duration;

use axum::body::Body;
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_ENCODING, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderName, Method};
use axum::response::Response;
use bytes::Bytes;
use metrics::counter;
use reqwest::{Certificate, Client};
use tracing::{debug, warn};
use uuid::Uuid;
use warden_core::{Controller, GatewayError};

use crate::metrics::HTTP_PROXY_REQUESTS_TOTAL;

/// Headers copied from the caller's request and from the backend's reply.
static CONTENT_HEADERS: [HeaderName; 3] = [CONTENT_TYPE, CONTENT_DISPOSITION, CONTENT_ENCODING];

/// An inbound request, minus the caller's credentials.
#[derive(Debug, Default)]
pub struct ProxiedRequest {
    /// HTTP method.
    pub method: Method,
    /// Raw query string, if any.
    pub query: Option<String>,
    /// Caller headers; only content headers are forwarded.
    pub headers: HeaderMap,
    /// Request body.
    pub body: Bytes,
}

/// Forwards HTTP requests to controllers using each controller's own
/// credentials.
pub struct HttpProxy {
    client: Client,
    scheme: String,
    timeout: Duration,
}

impl HttpProxy {
    /// Create a proxy using `scheme` (`https`, or `http` for plain backends).
    pub fn new(scheme: impl Into<String>, timeout: Duration) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::internal(format!("cannot build HTTP client: {e}")))?;
        Ok(Self {
            client,
            scheme: scheme.into(),
            timeout,
        })
    }

    /// URL of `endpoint` on the model, served by the controller at `address`.
    pub fn url(&self, address: &str, model: Uuid, endpoint: &str) -> String {
        format!("{}://{address}/model/{model}/{endpoint}", self.scheme)
    }

    /// Forward `request` to the controller hosting `model` and return its
    /// status and body verbatim. Transport failures are ConnectionFailed.
    pub async fn forward(
        &self,
        controller: &Controller,
        model: Uuid,
        endpoint: &str,
        request: ProxiedRequest,
    ) -> Result<Response, GatewayError> {
        let address = controller
            .public_address
            .clone()
            .or_else(|| controller.reachable_addresses().into_iter().next())
            .ok_or_else(|| {
                let name = &controller.name;
                GatewayError::connection_failed(format!("no address for controller {name}"))
            })?;
        let mut url = self.url(&address, model, endpoint);
        if let Some(query) = request.query.as_deref().filter(|q| !q.is_empty()) {
            url.push('?');
            url.push_str(query);
        }

        let client = self.client_for(controller)?;
        let mut outbound = client
            .request(request.method, &url)
            .basic_auth(&controller.admin_user, Some(&controller.admin_password))
            .body(request.body);
        for name in &CONTENT_HEADERS {
            if let Some(value) = request.headers.get(name) {
                outbound = outbound.header(name, value);
            }
        }

        let reply = match outbound.send().await {
            Ok(reply) => reply,
            Err(e) => {
                counter!(HTTP_PROXY_REQUESTS_TOTAL, "status" => "error").increment(1);
                warn!(%url, error = %e, "backend HTTP request failed");
                return Err(GatewayError::connection_failed(format!(
                    "cannot reach controller {}: {e}",
                    controller.name
                )));
            }
        };

        let status = reply.status();
        counter!(HTTP_PROXY_REQUESTS_TOTAL, "status" => status.as_u16().to_string()).increment(1);
        debug!(%url, status = status.as_u16(), "backend HTTP reply");

        let mut response = Response::builder().status(status);
        for name in &CONTENT_HEADERS {
            if let Some(value) = reply.headers().get(name) {
                response = response.header(name, value);
            }
        }
        let body = reply
            .bytes()
            .await
            .map_err(|e| {
                GatewayError::connection_failed(format!("cannot read controller reply: {e}"))
            })?;
        response
            .body(Body::from(body))
            .map_err(|e| GatewayError::internal(format!("cannot build response: {e}")))
    }

    fn client_for(&self, controller: &Controller) -> Result<Client, GatewayError> {
        let Some(pem) = controller.ca_cert.as_deref().filter(|pem| !pem.is_empty()) else {
            return Ok(self.client.clone());
        };
        let ca = Certificate::from_pem(pem.as_bytes())
            .map_err(|e| {
                let name = &controller.name;
                GatewayError::internal(format!("invalid CA certificate for {name}: {e}"))
            })?;
        Client::builder()
            .timeout(self.timeout)
            .add_root_certificate(ca)
            .build()
            .map_err(|e| GatewayError::internal(format!("cannot build HTTP client: {e}")))
    }
}
