//! Backend controller and model records.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::tags::{ControllerTag, ModelTag, UserTag};

/// One network address of a controller.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostPort {
    /// Host name or IP.
    pub value: String,
    /// TCP port.
    pub port: u16,
    /// Network scope: `public`, `local-cloud`, `local-machine`, ...
    #[serde(default)]
    pub scope: String,
}

impl HostPort {
    /// `host:port` form.
    pub fn address(&self) -> String {
        format!("{}:{}", self.value, self.port)
    }

    /// Whether the gateway should try to reach this address.
    ///
    /// Public and cloud-local addresses qualify, as do addresses with no
    /// recorded scope. Machine-local and link-local ones never do.
    pub fn maybe_reachable(&self) -> bool {
        matches!(self.scope.as_str(), "public" | "local-cloud" | "")
    }
}

/// A backend controller.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Controller {
    /// Human-readable name.
    pub name: String,
    /// Controller UUID.
    pub uuid: Uuid,
    /// Preferred address (`host:port`), tried before any other.
    #[serde(default)]
    pub public_address: Option<String>,
    /// Known addresses, grouped per controller machine.
    #[serde(default)]
    pub addresses: Vec<Vec<HostPort>>,
    /// PEM CA certificate the controller's TLS chain roots in.
    #[serde(default)]
    pub ca_cert: Option<String>,
    /// Admin user the gateway authenticates to the controller as.
    #[serde(default)]
    pub admin_user: String,
    /// Password for [`Controller::admin_user`].
    #[serde(default)]
    pub admin_password: String,
    /// Agent version the controller runs.
    #[serde(default)]
    pub agent_version: String,
}

impl Controller {
    /// Tag of this controller.
    pub fn tag(&self) -> ControllerTag {
        ControllerTag::new(self.uuid)
    }

    /// Addresses worth dialing, public address excluded.
    pub fn reachable_addresses(&self) -> Vec<String> {
        self.addresses
            .iter()
            .flatten()
            .filter(|hp| hp.maybe_reachable())
            .map(HostPort::address)
            .collect()
    }
}

/// A model hosted by exactly one controller.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Model {
    /// Model UUID.
    pub uuid: Uuid,
    /// Model name, unique per owner.
    pub name: String,
    /// Owning user.
    pub owner: UserTag,
    /// Cloud the model runs on.
    #[serde(default)]
    pub cloud: String,
    /// Cloud region.
    #[serde(default)]
    pub region: String,
    /// Hosting controller.
    pub controller: Controller,
}

impl Model {
    /// Tag of this model.
    pub fn tag(&self) -> ModelTag {
        ModelTag::new(self.uuid)
    }

    /// `controller/model` form used in logs and audit entries.
    pub fn qualified_name(&self) -> String {
        format!("{}/{}", self.controller.name, self.name)
    }
}
