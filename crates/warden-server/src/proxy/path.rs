//! Proxy path parsing and endpoint classification.

use std::sync::LazyLock;

use regex::Regex;
use uuid::Uuid;
use warden_core::{Access, GatewayError};

static PROXY_PATH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^/(\w{8}-\w{4}-\w{4}-\w{4}-\w{12})/(.*)$").unwrap());

/// `/<model-uuid>/<endpoint>`, parsed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProxyPath {
    /// Model UUID.
    pub model: Uuid,
    /// Everything after the UUID, without the leading slash.
    pub endpoint: String,
}

/// Parse an inbound proxy path. Anything malformed is BadRequest.
pub fn parse_proxy_path(path: &str) -> Result<ProxyPath, GatewayError> {
    let captures = PROXY_PATH
        .captures(path)
        .ok_or_else(|| GatewayError::bad_request(format!("invalid path {path:?}")))?;
    let model = Uuid::parse_str(&captures[1])
        .map_err(|_| GatewayError::bad_request(format!("invalid model UUID {:?}", &captures[1])))?;
    Ok(ProxyPath {
        model,
        endpoint: captures[2].to_owned(),
    })
}

/// How a `WebSocket` endpoint is proxied.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Endpoint {
    /// RPC tunnel with login injection and auditing (`api`, `commands`).
    Api(String),
    /// Plain stream tunnel (`log`, `charms`).
    Stream(String),
}

impl Endpoint {
    /// Classify `endpoint`. Unknown stream endpoints are BadRequest.
    pub fn classify(endpoint: &str) -> Result<Self, GatewayError> {
        match endpoint {
            "" | "api" => Ok(Self::Api("api".into())),
            "commands" => Ok(Self::Api("commands".into())),
            "log" | "charms" => Ok(Self::Stream(endpoint.into())),
            other => Err(GatewayError::bad_request(format!("unsupported endpoint {other:?}"))),
        }
    }

    /// Final path segment dialled on the backend.
    pub fn name(&self) -> &str {
        match self {
            Self::Api(name) | Self::Stream(name) => name,
        }
    }

    /// Access the caller must hold on the model.
    pub fn required_access(&self) -> Access {
        match self {
            Self::Stream(name) if name == "charms" => Access::Write,
            _ => Access::Read,
        }
    }

    /// Metric label.
    pub fn mode(&self) -> &'static str {
        match self {
            Self::Api(_) => "api",
            Self::Stream(_) => "stream",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_core::ErrorCode;

    const UUID: &str = "8f4c3e2a-5b1d-4c6e-9a7f-0123456789ab";

    #[test]
    fn parses_model_and_endpoint() {
        let p = parse_proxy_path(&format!("/{UUID}/api")).unwrap();
        assert_eq!(p.model.to_string(), UUID);
        assert_eq!(p.endpoint, "api");

        let p = parse_proxy_path(&format!("/{UUID}/charms/upload")).unwrap();
        assert_eq!(p.endpoint, "charms/upload");

        let p = parse_proxy_path(&format!("/{UUID}/")).unwrap();
        assert_eq!(p.endpoint, "");
    }

    #[test]
    fn malformed_paths_are_bad_requests() {
        let no_endpoint = format!("/{UUID}");
        for path in [
            "/",
            "/api",
            no_endpoint.as_str(),
            "/zzzzzzzz-zzzz-zzzz-zzzz-zzzzzzzzzzzz/api",
            "/1234/api",
        ] {
            let err = parse_proxy_path(path).unwrap_err();
            assert_eq!(err.code(), ErrorCode::BadRequest, "{path}");
        }
    }

    #[test]
    fn endpoints_and_access() {
        assert_eq!(Endpoint::classify("api").unwrap(), Endpoint::Api("api".into()));
        assert_eq!(Endpoint::classify("").unwrap().name(), "api");
        assert_eq!(Endpoint::classify("commands").unwrap().mode(), "api");
        assert_eq!(Endpoint::classify("log").unwrap().required_access(), Access::Read);
        assert_eq!(Endpoint::classify("charms").unwrap().required_access(), Access::Write);
        assert_eq!(
            Endpoint::classify("debug-log").unwrap_err().code(),
            ErrorCode::BadRequest
        );
    }
}
