//! Static controllers, models, users and grants.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use uuid::Uuid;
use warden_core::Controller;

use crate::errors::{Result, SettingsError};

/// Static directory the gateway serves from.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DirectorySettings {
    /// Backend controllers.
    pub controllers: Vec<Controller>,
    /// Models and their grants.
    pub models: Vec<ModelEntry>,
    /// Known users.
    pub users: Vec<UserEntry>,
    /// User ids with controller superuser access.
    pub controller_admins: Vec<String>,
}

/// One model and the users granted access to it.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelEntry {
    /// Model UUID.
    pub uuid: Uuid,
    /// Model name.
    pub name: String,
    /// Owner user id (`alice@idp`).
    pub owner: String,
    /// Name of the hosting controller.
    pub controller: String,
    /// Cloud name.
    #[serde(default)]
    pub cloud: String,
    /// Cloud region.
    #[serde(default)]
    pub region: String,
    /// Users with read access.
    #[serde(default)]
    pub readers: Vec<String>,
    /// Users with write access.
    #[serde(default)]
    pub writers: Vec<String>,
    /// Users with admin access.
    #[serde(default)]
    pub admins: Vec<String>,
}

/// A known user.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserEntry {
    /// User id (`bob@idp`).
    pub name: String,
    /// Display name.
    #[serde(default)]
    pub display_name: String,
}

impl DirectorySettings {
    /// Every model must name a configured controller, and UUIDs must be unique.
    pub fn validate(&self) -> Result<()> {
        let controllers: HashSet<&str> = self.controllers.iter().map(|c| c.name.as_str()).collect();
        let mut seen = HashSet::new();
        for model in &self.models {
            if !controllers.contains(model.controller.as_str()) {
                return Err(SettingsError::Directory {
                    model: model.uuid.to_string(),
                    reason: format!("unknown controller {:?}", model.controller),
                });
            }
            if !seen.insert(model.uuid) {
                return Err(SettingsError::Directory {
                    model: model.uuid.to_string(),
                    reason: "listed twice".into(),
                });
            }
        }
        Ok(())
    }
}
