//! Model directory built from the settings file.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use uuid::Uuid;
use warden_core::{Access, Controller, GatewayError, Identity, Model, ModelTag, UserTag};
use warden_settings::{DirectorySettings, ModelEntry};

use crate::services::ModelDirectory;

struct Grants {
    readers: HashSet<String>,
    writers: HashSet<String>,
    admins: HashSet<String>,
}

impl Grants {
    fn from_entry(entry: &ModelEntry) -> Self {
        let set = |ids: &[String]| ids.iter().cloned().collect::<HashSet<_>>();
        let mut admins = set(&entry.admins);
        let _ = admins.insert(entry.owner.clone());
        Self {
            readers: set(&entry.readers),
            writers: set(&entry.writers),
            admins,
        }
    }

    fn access(&self, user: &str) -> Option<Access> {
        if self.admins.contains(user) {
            Some(Access::Admin)
        } else if self.writers.contains(user) {
            Some(Access::Write)
        } else if self.readers.contains(user) {
            Some(Access::Read)
        } else {
            None
        }
    }
}

/// In-memory directory of controllers, models, users and grants.
///
/// Model owners administer their models; controller admins administer
/// every model.
pub struct StaticDirectory {
    controllers: Vec<Controller>,
    models: HashMap<Uuid, (Model, Grants)>,
    users: HashMap<String, String>,
    controller_admins: HashSet<String>,
}

impl StaticDirectory {
    /// Build the directory. Malformed owners or unknown controllers are
    /// BadRequest.
    pub fn from_settings(settings: &DirectorySettings) -> Result<Self, GatewayError> {
        let mut models = HashMap::new();
        for entry in &settings.models {
            let controller = settings
                .controllers
                .iter()
                .find(|c| c.name == entry.controller)
                .ok_or_else(|| {
                    GatewayError::bad_request(format!(
                        "model {} names unknown controller {:?}",
                        entry.uuid, entry.controller
                    ))
                })?;
            let model = Model {
                uuid: entry.uuid,
                name: entry.name.clone(),
                owner: UserTag::from_id(&entry.owner)?,
                cloud: entry.cloud.clone(),
                region: entry.region.clone(),
                controller: controller.clone(),
            };
            let _ = models.insert(entry.uuid, (model, Grants::from_entry(entry)));
        }
        Ok(Self {
            controllers: settings.controllers.clone(),
            models,
            users: settings
                .users
                .iter()
                .map(|u| (u.name.clone(), u.display_name.clone()))
                .collect(),
            controller_admins: settings.controller_admins.iter().cloned().collect(),
        })
    }

    /// Number of models.
    pub fn model_count(&self) -> usize {
        self.models.len()
    }

    fn is_known(&self, id: &str) -> bool {
        self.users.contains_key(id) || self.controller_admins.contains(id)
    }
}

/// Numeric components of a version string, `3.5.1-beta` → `[3, 5, 1]`.
fn version_key(version: &str) -> Vec<u64> {
    version
        .split(['.', '-'])
        .map_while(|part| part.parse().ok())
        .collect()
}

#[async_trait]
impl ModelDirectory for StaticDirectory {
    async fn list_visible_models(&self, identity: &Identity) -> Result<Vec<Model>, GatewayError> {
        let id = identity.tag.id();
        let mut visible: Vec<Model> = self
            .models
            .values()
            .filter(|(_, grants)| identity.admin || grants.access(&id).is_some())
            .map(|(model, _)| model.clone())
            .collect();
        visible.sort_by_key(|m| m.uuid);
        Ok(visible)
    }

    async fn resolve_model(&self, uuid: Uuid) -> Result<Model, GatewayError> {
        self.models
            .get(&uuid)
            .map(|(model, _)| model.clone())
            .ok_or_else(|| GatewayError::not_found(format!("model {uuid} not found")))
    }

    async fn get_identity(&self, user: &UserTag) -> Result<Identity, GatewayError> {
        let id = user.id();
        if !self.is_known(&id) {
            return Err(GatewayError::not_found(format!("user {user} not found")));
        }
        let admin = self.controller_admins.contains(&id);
        let mut identity = Identity::new(user.clone()).with_admin(admin);
        if let Some(name) = self.users.get(&id).filter(|n| !n.is_empty()) {
            identity.display_name.clone_from(name);
        }
        Ok(identity)
    }

    async fn model_access(&self, identity: &Identity, model: &ModelTag) -> Option<Access> {
        let (_, grants) = self.models.get(&model.uuid())?;
        if identity.admin {
            return Some(Access::Admin);
        }
        grants.access(&identity.tag.id())
    }

    async fn earliest_controller_version(&self) -> Result<String, GatewayError> {
        self.controllers
            .iter()
            .map(|c| c.agent_version.as_str())
            .filter(|v| !v.is_empty())
            .min_by_key(|v| version_key(v))
            .map(str::to_owned)
            .ok_or_else(|| GatewayError::not_found("no controller versions known"))
    }
}
