//! Collaborator capabilities the gateway consumes.
//!
//! Authentication, the model directory and trust-token minting sit behind
//! traits so connection roots and proxies can be driven by fakes in tests.
//! [`crate::directory`] and [`crate::auth`] hold the built-in implementations.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;
use warden_audit::AuditSink;
use warden_core::{Access, GatewayError, Identity, Model, ModelTag, UserTag};
use warden_rpc::params::{LoginRequest, ModelAbstract};

use crate::pubsub::Hub;

/// Outcome of a failed login.
#[derive(Clone, Debug, thiserror::Error)]
pub enum AuthError {
    /// The client must discharge `challenge` and retry. Not a hard failure.
    #[error("discharge required: {reason}")]
    DischargeRequired {
        /// Challenge returned to the client.
        challenge: Value,
        /// Why the challenge was issued.
        reason: String,
    },

    /// Credentials were rejected.
    #[error(transparent)]
    Rejected(#[from] GatewayError),
}

/// Authenticates callers.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Authenticate an `Admin.Login` request.
    async fn authenticate(&self, request: &LoginRequest) -> Result<Identity, AuthError>;

    /// Verify a session token presented directly (HTTP basic auth, bearer
    /// header or `Admin.LoginWithSessionToken`).
    async fn verify_session_token(&self, token: &str) -> Result<Identity, GatewayError>;
}

/// Models, controllers, users and grants.
#[async_trait]
pub trait ModelDirectory: Send + Sync {
    /// Every model `identity` may see.
    async fn list_visible_models(&self, identity: &Identity) -> Result<Vec<Model>, GatewayError>;

    /// Look up a model and its controller. Unknown models are NotFound.
    async fn resolve_model(&self, uuid: Uuid) -> Result<Model, GatewayError>;

    /// Identity of a user the directory knows. Unknown users are NotFound.
    async fn get_identity(&self, user: &UserTag) -> Result<Identity, GatewayError>;

    /// Access `identity` holds on `model`, if any.
    async fn model_access(&self, identity: &Identity, model: &ModelTag) -> Option<Access>;

    /// Earliest agent version across backend controllers.
    async fn earliest_controller_version(&self) -> Result<String, GatewayError>;
}

/// Mints short-lived trust tokens for backend controllers.
pub trait TokenMinter: Send + Sync {
    /// Token identifying `identity` to the controller hosting `model`,
    /// carrying the caller's `access` on it.
    fn mint(&self, identity: &Identity, model: &Model, access: Access)
    -> Result<String, GatewayError>;
}

/// Shared services handed to every connection.
#[derive(Clone)]
pub struct Services {
    /// Authenticates callers.
    pub authenticator: Arc<dyn Authenticator>,
    /// Model and user directory.
    pub directory: Arc<dyn ModelDirectory>,
    /// Trust-token minter.
    pub minter: Arc<dyn TokenMinter>,
    /// Audit log sink.
    pub audit: Arc<dyn AuditSink>,
    /// Model summary bus.
    pub hub: Arc<Hub<ModelAbstract>>,
}

#[cfg(test)]
pub(crate) mod fakes {
    //! Hand-written collaborator fakes shared by unit tests.

    use std::collections::HashMap;

    use warden_audit::MemoryAuditSink;
    use warden_core::{Controller, HostPort};

    use super::*;

    pub const MODEL_A: &str = "11111111-1111-4111-8111-111111111111";
    pub const MODEL_B: &str = "22222222-2222-4222-8222-222222222222";
    pub const CONTROLLER: &str = "33333333-3333-4333-8333-333333333333";

    pub fn user(id: &str) -> Identity {
        Identity::new(UserTag::from_id(id).unwrap())
    }

    pub fn controller() -> Controller {
        Controller {
            name: "ctl-1".into(),
            uuid: CONTROLLER.parse().unwrap(),
            public_address: None,
            addresses: vec![vec![HostPort {
                value: "10.0.0.1".into(),
                port: 17070,
                scope: "public".into(),
            }]],
            ca_cert: None,
            admin_user: "admin".into(),
            admin_password: "pw".into(),
            agent_version: "3.5.1".into(),
        }
    }

    pub fn model(uuid: &str, owner: &str) -> Model {
        Model {
            uuid: uuid.parse().unwrap(),
            name: format!("m-{}", &uuid[..4]),
            owner: UserTag::from_id(owner).unwrap(),
            cloud: "aws".into(),
            region: "eu-west-1".into(),
            controller: controller(),
        }
    }

    /// Accepts `token` equal to a known user id; anything else is rejected.
    /// An empty token asks for a discharge.
    pub struct FakeAuthenticator {
        pub users: HashMap<String, Identity>,
    }

    #[async_trait]
    impl Authenticator for FakeAuthenticator {
        async fn authenticate(&self, request: &LoginRequest) -> Result<Identity, AuthError> {
            if request.token.is_empty() {
                return Err(AuthError::DischargeRequired {
                    challenge: serde_json::json!({"location": "https://idp"}),
                    reason: "authentication required".into(),
                });
            }
            self.verify_session_token(&request.token).await.map_err(AuthError::from)
        }

        async fn verify_session_token(&self, token: &str) -> Result<Identity, GatewayError> {
            self.users
                .get(token)
                .cloned()
                .ok_or_else(|| GatewayError::unauthorized("invalid session token"))
        }
    }

    /// Fixed models with explicit grants.
    pub struct FakeDirectory {
        pub models: Vec<Model>,
        pub grants: HashMap<(String, String), Access>,
        pub users: HashMap<String, Identity>,
    }

    #[async_trait]
    impl ModelDirectory for FakeDirectory {
        async fn list_visible_models(
            &self,
            identity: &Identity,
        ) -> Result<Vec<Model>, GatewayError> {
            let mut out = Vec::new();
            for m in &self.models {
                if identity.admin || self.model_access(identity, &m.tag()).await.is_some() {
                    out.push(m.clone());
                }
            }
            Ok(out)
        }

        async fn resolve_model(&self, uuid: Uuid) -> Result<Model, GatewayError> {
            self.models
                .iter()
                .find(|m| m.uuid == uuid)
                .cloned()
                .ok_or_else(|| GatewayError::not_found(format!("model {uuid} not found")))
        }

        async fn get_identity(&self, user: &UserTag) -> Result<Identity, GatewayError> {
            self.users
                .get(&user.id())
                .cloned()
                .ok_or_else(|| GatewayError::not_found(format!("user {user} not found")))
        }

        async fn model_access(&self, identity: &Identity, model: &ModelTag) -> Option<Access> {
            self.grants.get(&(identity.tag.id(), model.id())).copied()
        }

        async fn earliest_controller_version(&self) -> Result<String, GatewayError> {
            Ok("3.5.1".into())
        }
    }

    /// Token is `sub|model|access`.
    pub struct FakeMinter;

    impl TokenMinter for FakeMinter {
        fn mint(
            &self,
            identity: &Identity,
            model: &Model,
            access: Access,
        ) -> Result<String, GatewayError> {
            Ok(format!("{}|{}|{}", identity.tag, model.uuid, access.as_str()))
        }
    }

    /// alice@idp reads model A, bob@idp writes model B, root@idp is admin.
    pub fn services() -> (Services, MemoryAuditSink) {
        let alice = user("alice@idp");
        let bob = user("bob@idp");
        let root = user("root@idp").with_admin(true);
        let users: HashMap<String, Identity> = [&alice, &bob, &root]
            .into_iter()
            .map(|i| (i.tag.id(), i.clone()))
            .collect();
        let mut grants = HashMap::new();
        let _ = grants.insert(("alice@idp".to_owned(), MODEL_A.to_owned()), Access::Read);
        let _ = grants.insert(("bob@idp".to_owned(), MODEL_B.to_owned()), Access::Write);

        let sink = MemoryAuditSink::new();
        let services = Services {
            authenticator: Arc::new(FakeAuthenticator { users: users.clone() }),
            directory: Arc::new(FakeDirectory {
                models: vec![model(MODEL_A, "alice@idp"), model(MODEL_B, "bob@idp")],
                grants,
                users,
            }),
            minter: Arc::new(FakeMinter),
            audit: Arc::new(sink.clone()),
            hub: Hub::new(10),
        };
        (services, sink)
    }
}
