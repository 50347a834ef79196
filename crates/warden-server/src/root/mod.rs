//! Per-connection protocol roots.
//!
//! A [`ConnectionRoot`] serves the controller endpoint (`/api`): it owns the
//! connection's identity, its watchers and its heartbeat monitor, and
//! resolves every inbound call through an immutable [`FacadeTable`] built
//! once at startup by [`facades::build_controller_facades`].
//!
//! [`model_root::ModelRoot`] serves the legacy per-model endpoint, which
//! only ever redirects clients to the controller hosting the model.

pub mod facades;
pub mod model_root;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::FutureExt;
use metrics::counter;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use warden_core::ids::IdGenerator;
use warden_core::{GatewayError, Identity, Model, UserTag};
use warden_rpc::params::{
    AuthUserInfo, ControllerVersionResults, LoginRequest, LoginResult, ModelInfo, SummaryWatcherId,
    SummaryWatcherNextResults, UserModel, UserModelList,
};
use warden_rpc::{FacadeTable, MethodHandler, RpcError};

use crate::config::ServerConfig;
use crate::heartbeat::HeartbeatMonitor;
use crate::metrics::LOGINS_TOTAL;
use crate::services::{AuthError, Services};
use crate::watchers::{AccessWatcher, ListVisible, ModelSummaryWatcher, WatcherRegistry};

/// Facades reachable before login.
const PRE_LOGIN_FACADES: [&str; 2] = ["Admin", "Pinger"];

/// Oldest `Admin` version either root serves.
const MIN_ADMIN_VERSION: u32 = 3;

/// Refuse every `Admin` call from a client older than
/// [`MIN_ADMIN_VERSION`], whatever the method.
fn reject_old_client(facade: &str, version: u32) -> Result<(), RpcError> {
    if facade == "Admin" && version < MIN_ADMIN_VERSION {
        return Err(GatewayError::not_supported(facades::OLD_CLIENT_MESSAGE).into());
    }
    Ok(())
}

/// Callback run on every `Pinger.Ping`.
pub type PingCallback = Arc<dyn Fn() + Send + Sync>;

/// What the `WebSocket` session needs from a root.
pub trait RpcRoot: Send + Sync + 'static {
    /// Resolve a handler. Counts as a heartbeat.
    fn find_method(
        &self,
        facade: &str,
        version: u32,
        method: &str,
    ) -> Result<Arc<dyn MethodHandler<Self>>, RpcError>;

    /// The connection's liveness monitor.
    fn heartbeat(&self) -> &HeartbeatMonitor;

    /// Tag of the authenticated caller, if any.
    fn identity_tag(&self) -> Option<String>;

    /// Model the connection is bound to, for audit entries.
    fn audit_model(&self) -> String {
        String::new()
    }

    /// Tear down everything the root owns. Returns whether the heartbeat
    /// monitor had fired.
    fn close(&self) -> bool;
}

#[derive(Default)]
struct RootState {
    identity: Option<Identity>,
    ids: Option<IdGenerator>,
}

/// Root of one controller connection.
pub struct ConnectionRoot {
    services: Services,
    config: Arc<ServerConfig>,
    table: Arc<FacadeTable<ConnectionRoot>>,
    state: Mutex<RootState>,
    controller_uuid_masking: AtomicBool,
    watchers: WatcherRegistry,
    heartbeat: HeartbeatMonitor,
    on_ping: Option<PingCallback>,
    cancel: CancellationToken,
}

impl ConnectionRoot {
    /// Create the root of a freshly accepted connection. Its watchers stop
    /// when `shutdown` is cancelled.
    pub fn new(
        services: Services,
        config: Arc<ServerConfig>,
        table: Arc<FacadeTable<Self>>,
        shutdown: &CancellationToken,
    ) -> Self {
        let heartbeat = HeartbeatMonitor::start(config.ping_timeout());
        Self {
            services,
            config,
            table,
            state: Mutex::new(RootState::default()),
            controller_uuid_masking: AtomicBool::new(true),
            watchers: WatcherRegistry::new(),
            heartbeat,
            on_ping: None,
            cancel: shutdown.child_token(),
        }
    }

    /// Run `callback` on every ping.
    #[must_use]
    pub fn with_ping_callback(mut self, callback: PingCallback) -> Self {
        self.on_ping = Some(callback);
        self
    }

    /// The authenticated identity, once logged in.
    pub fn identity(&self) -> Option<Identity> {
        self.state.lock().identity.clone()
    }

    fn require_identity(&self) -> Result<Identity, GatewayError> {
        self.identity()
            .ok_or_else(|| GatewayError::unauthorized("not logged in"))
    }

    fn require_admin(&self) -> Result<Identity, GatewayError> {
        let identity = self.require_identity()?;
        if !identity.admin {
            return Err(GatewayError::unauthorized("unauthorized access"));
        }
        Ok(identity)
    }

    /// Next connection-unique id. The generator is created on first use.
    pub fn next_id(&self) -> String {
        let mut state = self.state.lock();
        state.ids.get_or_insert_with(IdGenerator::new).next_id()
    }

    /// Registered watchers.
    pub fn watchers(&self) -> &WatcherRegistry {
        &self.watchers
    }

    /// Whether backend controller UUIDs are replaced by the gateway's.
    pub fn is_masking_controller_uuids(&self) -> bool {
        self.controller_uuid_masking.load(Ordering::SeqCst)
    }

    // ── Login ───────────────────────────────────────────────────────

    /// `Admin.Login`.
    ///
    /// A discharge challenge comes back inside the result; rejected
    /// credentials are an error. The identity is set at most once.
    pub async fn login(&self, request: &LoginRequest) -> Result<LoginResult, GatewayError> {
        if self.identity().is_some() {
            return Err(GatewayError::bad_request("already logged in"));
        }
        match self.services.authenticator.authenticate(request).await {
            Ok(identity) => self.complete_login(identity).await,
            Err(AuthError::DischargeRequired { challenge, reason }) => {
                counter!(LOGINS_TOTAL, "outcome" => "discharge_required").increment(1);
                Ok(LoginResult {
                    discharge_required: Some(challenge),
                    discharge_required_error: reason,
                    ..LoginResult::default()
                })
            }
            Err(AuthError::Rejected(err)) => {
                counter!(LOGINS_TOTAL, "outcome" => "rejected").increment(1);
                Err(err)
            }
        }
    }

    /// `Admin.LoginWithSessionToken`.
    pub async fn login_with_session_token(&self, token: &str) -> Result<LoginResult, GatewayError> {
        if self.identity().is_some() {
            return Err(GatewayError::bad_request("already logged in"));
        }
        match self.services.authenticator.verify_session_token(token).await {
            Ok(identity) => self.complete_login(identity).await,
            Err(err) => {
                counter!(LOGINS_TOTAL, "outcome" => "rejected").increment(1);
                Err(err)
            }
        }
    }

    async fn complete_login(&self, identity: Identity) -> Result<LoginResult, GatewayError> {
        {
            let mut state = self.state.lock();
            if state.identity.is_some() {
                return Err(GatewayError::bad_request("already logged in"));
            }
            state.identity = Some(identity.clone());
        }
        counter!(LOGINS_TOTAL, "outcome" => "success").increment(1);
        info!(user = %identity.tag, admin = identity.admin, "login succeeded");

        let server_version = match self.services.directory.earliest_controller_version().await {
            Ok(version) => version,
            Err(e) => {
                warn!(error = %e, "cannot determine controller version");
                String::new()
            }
        };
        Ok(LoginResult {
            user_info: Some(AuthUserInfo {
                display_name: identity.display_name.clone(),
                identity: identity.tag.to_string(),
                controller_access: identity.controller_access().to_owned(),
            }),
            controller_tag: Some(self.config.controller_tag().to_string()),
            facades: self.table.versions().to_vec(),
            server_version,
            ..LoginResult::default()
        })
    }

    // ── Identity ────────────────────────────────────────────────────

    /// Identity to act as for `user_tag`.
    ///
    /// Callers may always name themselves. Anyone else requires an
    /// administrator, and only identity-provider users can be assumed.
    pub async fn masquerade(&self, user_tag: &str) -> Result<Identity, GatewayError> {
        let caller = self.require_identity()?;
        let target: UserTag = user_tag
            .parse()
            .map_err(|e| GatewayError::bad_request(format!("invalid user tag: {e}")))?;
        if target == caller.tag {
            return Ok(caller);
        }
        if target.is_local() {
            return Err(GatewayError::bad_request(format!(
                "cannot masquerade as local user {target}"
            )));
        }
        if !caller.admin {
            return Err(GatewayError::unauthorized("unauthorized access"));
        }
        self.services.directory.get_identity(&target).await
    }

    /// Invoke the ping callback. Liveness itself was recorded by
    /// [`RpcRoot::find_method`].
    pub fn ping(&self) {
        if let Some(callback) = &self.on_ping {
            callback();
        }
    }

    // ── Models ──────────────────────────────────────────────────────

    fn model_info(&self, model: &Model) -> ModelInfo {
        let controller_uuid = if self.is_masking_controller_uuids() {
            self.config.controller_uuid
        } else {
            model.controller.uuid
        };
        ModelInfo {
            name: model.name.clone(),
            uuid: model.uuid.to_string(),
            kind: "iaas".into(),
            owner_tag: model.owner.to_string(),
            controller_uuid: controller_uuid.to_string(),
        }
    }

    async fn models_for(&self, identity: &Identity) -> Result<UserModelList, GatewayError> {
        let models = self.services.directory.list_visible_models(identity).await?;
        Ok(UserModelList {
            user_models: models
                .iter()
                .map(|m| UserModel {
                    model: self.model_info(m),
                    last_connection: None,
                })
                .collect(),
        })
    }

    /// `Controller.AllModels`: models the caller can see.
    pub async fn all_models(&self) -> Result<UserModelList, GatewayError> {
        let identity = self.require_identity()?;
        self.models_for(&identity).await
    }

    /// `ModelManager.ListModels`: models `user_tag` can see.
    pub async fn list_models(&self, user_tag: &str) -> Result<UserModelList, GatewayError> {
        let identity = self.masquerade(user_tag).await?;
        self.models_for(&identity).await
    }

    /// `Controller.ControllerVersion`.
    pub async fn controller_version(&self) -> Result<ControllerVersionResults, GatewayError> {
        let _ = self.require_identity()?;
        Ok(ControllerVersionResults {
            version: self.services.directory.earliest_controller_version().await?,
            git_commit: self.config.version.clone(),
        })
    }

    /// `Controller.DisableControllerUUIDMasking`. Administrators only.
    pub fn disable_controller_uuid_masking(&self) -> Result<(), GatewayError> {
        let identity = self.require_admin()?;
        self.controller_uuid_masking.store(false, Ordering::SeqCst);
        debug!(user = %identity.tag, "controller UUID masking disabled");
        Ok(())
    }

    // ── Summary watchers ────────────────────────────────────────────

    /// `Controller.WatchModelSummaries` (`all = false`) or
    /// `Controller.WatchAllModelSummaries` (`all = true`, administrators only).
    pub async fn watch_model_summaries(&self, all: bool) -> Result<SummaryWatcherId, GatewayError> {
        let identity = if all { self.require_admin()? } else { self.require_identity()? };

        let directory = Arc::clone(&self.services.directory);
        let list: ListVisible = Arc::new(move || {
            let directory = Arc::clone(&directory);
            let identity = identity.clone();
            async move {
                let models = directory.list_visible_models(&identity).await?;
                Ok::<_, GatewayError>(models.into_iter().map(|m| m.uuid.to_string()).collect())
            }
            .boxed()
        });

        let id = self.next_id();
        let cancel = self.cancel.child_token();
        let refresh = self.config.access_refresh();
        let access = Arc::new(AccessWatcher::new(list, refresh, cancel.clone()));
        if let Err(e) = access.refresh().await {
            warn!(watcher_id = %id, error = %e, "initial access refresh failed");
        }
        let _ = tokio::spawn(Arc::clone(&access).run());

        let watcher = ModelSummaryWatcher::start(id.clone(), &self.services.hub, access, cancel);
        self.watchers.register(Arc::new(watcher));
        Ok(SummaryWatcherId { watcher_id: id })
    }

    /// `ModelSummaryWatcher.Next`.
    pub fn summary_watcher_next(
        &self,
        id: &str,
    ) -> Result<SummaryWatcherNextResults, GatewayError> {
        Ok(self.watchers.get(id)?.next())
    }

    /// `ModelSummaryWatcher.Stop`. The watcher keeps its id until the
    /// connection closes; stopping it again is a no-op.
    pub fn summary_watcher_stop(&self, id: &str) -> Result<(), GatewayError> {
        let _ = self.watchers.get(id)?.stop();
        Ok(())
    }
}

impl RpcRoot for ConnectionRoot {
    fn find_method(
        &self,
        facade: &str,
        version: u32,
        method: &str,
    ) -> Result<Arc<dyn MethodHandler<Self>>, RpcError> {
        self.heartbeat.heartbeat();
        reject_old_client(facade, version)?;
        if self.identity().is_none() && !PRE_LOGIN_FACADES.contains(&facade) {
            return Err(RpcError::NotImplemented {
                message: format!("unknown object type {facade:?}"),
            });
        }
        self.table.find(facade, version, method)
    }

    fn heartbeat(&self) -> &HeartbeatMonitor {
        &self.heartbeat
    }

    fn identity_tag(&self) -> Option<String> {
        self.identity().map(|i| i.tag.to_string())
    }

    fn close(&self) -> bool {
        self.watchers.stop_all();
        self.cancel.cancel();
        self.heartbeat.stop()
    }
}
