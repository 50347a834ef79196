//! Legacy per-model root (`/model/<uuid>/api`).
//!
//! Older clients connect to a model's endpoint directly. The gateway never
//! serves those connections itself: login always ends in a redirect to the
//! controller hosting the model, whose addresses `Admin.RedirectInfo`
//! reports. A missing or malformed UUID is a bad request; a well-formed
//! UUID naming no model is not found.

use std::net::IpAddr;
use std::sync::Arc;

use serde_json::Value;
use uuid::Uuid;
use warden_core::{Controller, GatewayError, HostPort};
use warden_rpc::params::{HostPortParam, NoParams, RedirectInfoResult};
use warden_rpc::{DuplicateMethod, FacadeTable, FacadeTableBuilder, MethodHandler, RpcError, method};

use super::{RpcRoot, reject_old_client};
use crate::config::ServerConfig;
use crate::heartbeat::HeartbeatMonitor;
use crate::services::Services;

/// Root of one legacy model connection.
pub struct ModelRoot {
    services: Services,
    model_id: String,
    table: Arc<FacadeTable<ModelRoot>>,
    heartbeat: HeartbeatMonitor,
}

impl ModelRoot {
    /// Create the root for a connection to model `model_id`.
    pub fn new(
        services: Services,
        config: &ServerConfig,
        table: Arc<FacadeTable<Self>>,
        model_id: impl Into<String>,
    ) -> Self {
        Self {
            services,
            model_id: model_id.into(),
            table,
            heartbeat: HeartbeatMonitor::start(config.ping_timeout()),
        }
    }

    fn model_uuid(&self) -> Result<Uuid, GatewayError> {
        if self.model_id.is_empty() {
            return Err(GatewayError::bad_request("model UUID required"));
        }
        Uuid::parse_str(&self.model_id)
            .map_err(|_| {
                GatewayError::bad_request(format!("invalid model UUID {:?}", self.model_id))
            })
    }

    async fn controller(&self) -> Result<Controller, GatewayError> {
        let model = self.services.directory.resolve_model(self.model_uuid()?).await?;
        Ok(model.controller)
    }

    /// `Admin.Login`: always fails, with Redirect when the model exists.
    pub async fn login(&self) -> Result<(), GatewayError> {
        let _ = self.controller().await?;
        Err(GatewayError::redirect())
    }

    /// `Admin.RedirectInfo`: where the model's controller can be reached.
    pub async fn redirect_info(&self) -> Result<RedirectInfoResult, GatewayError> {
        let controller = self.controller().await?;
        let mut servers = Vec::new();
        if let Some(public) = controller.public_address.as_deref().and_then(parse_address) {
            servers.push(vec![host_port_param(&public)]);
        }
        servers.extend(
            controller
                .addresses
                .iter()
                .map(|group| group.iter().map(host_port_param).collect()),
        );
        Ok(RedirectInfoResult {
            servers,
            ca_cert: controller.ca_cert.unwrap_or_default(),
        })
    }
}

fn parse_address(address: &str) -> Option<HostPort> {
    let (host, port) = address.rsplit_once(':')?;
    Some(HostPort {
        value: host.trim_start_matches('[').trim_end_matches(']').to_owned(),
        port: port.parse().ok()?,
        scope: "public".into(),
    })
}

fn host_port_param(hp: &HostPort) -> HostPortParam {
    let kind = match hp.value.parse::<IpAddr>() {
        Ok(IpAddr::V4(_)) => "ipv4",
        Ok(IpAddr::V6(_)) => "ipv6",
        Err(_) => "hostname",
    };
    HostPortParam {
        value: hp.value.clone(),
        kind: kind.into(),
        scope: hp.scope.clone(),
        port: hp.port,
    }
}

impl RpcRoot for ModelRoot {
    fn find_method(
        &self,
        facade: &str,
        version: u32,
        method: &str,
    ) -> Result<Arc<dyn MethodHandler<Self>>, RpcError> {
        self.heartbeat.heartbeat();
        reject_old_client(facade, version)?;
        self.table.find(facade, version, method)
    }

    fn heartbeat(&self) -> &HeartbeatMonitor {
        &self.heartbeat
    }

    fn identity_tag(&self) -> Option<String> {
        None
    }

    fn audit_model(&self) -> String {
        self.model_id.clone()
    }

    fn close(&self) -> bool {
        self.heartbeat.stop()
    }
}

/// Build the legacy model root's facade table.
pub fn build_model_facades() -> Result<FacadeTable<ModelRoot>, DuplicateMethod> {
    let mut b = FacadeTableBuilder::<ModelRoot>::new();
    b.register(
        "Admin",
        &[3],
        "Login",
        method(|root: Arc<ModelRoot>, _id: String, _p: Value| async move {
            root.login().await.map_err(RpcError::from)
        }),
    )?;
    b.register(
        "Admin",
        &[3],
        "RedirectInfo",
        method(|root: Arc<ModelRoot>, _id: String, _p: NoParams| async move {
            root.redirect_info().await.map_err(RpcError::from)
        }),
    )?;
    b.register(
        "Pinger",
        &[1],
        "Ping",
        method(|_root: Arc<ModelRoot>, _id: String, _p: NoParams| async move { Ok::<_, RpcError>(()) }),
    )?;
    Ok(b.build())
}
