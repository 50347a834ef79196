//! Request and response bodies of the locally served facades.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Body of a method that takes no arguments.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoParams {}

// ── Login ───────────────────────────────────────────────────────────

/// `Admin.Login` request.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct LoginRequest {
    /// Tag the client claims to be.
    pub auth_tag: String,
    /// Password-style credentials (unused by the gateway).
    #[serde(skip_serializing_if = "String::is_empty")]
    pub credentials: String,
    /// Discharged macaroons, if the client answered a challenge.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub macaroons: Vec<Value>,
    /// Session or trust token.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub token: String,
    /// Client software version.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub client_version: String,
}

/// `Admin.LoginWithSessionToken` request.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct LoginWithSessionTokenRequest {
    /// Session token issued by the identity provider.
    pub session_token: String,
}

/// One facade and the versions of it the gateway serves.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FacadeVersions {
    /// Facade name.
    pub name: String,
    /// Supported versions, ascending.
    pub versions: Vec<u32>,
}

/// User details returned by a successful login.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct AuthUserInfo {
    /// Display name.
    pub display_name: String,
    /// User tag.
    pub identity: String,
    /// `login` or `superuser`.
    pub controller_access: String,
}

/// `Admin.Login` result.
///
/// Either a full login (user info, facades, versions) or a discharge
/// challenge the client must answer before retrying.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct LoginResult {
    /// Authenticated user.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_info: Option<AuthUserInfo>,
    /// Gateway controller tag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub controller_tag: Option<String>,
    /// Served facades, sorted by name.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub facades: Vec<FacadeVersions>,
    /// Earliest backend controller version.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub server_version: String,
    /// Challenge the client must discharge.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discharge_required: Option<Value>,
    /// Why the challenge was issued.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub discharge_required_error: String,
}

/// Address in a redirect reply.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostPortParam {
    /// Host name or IP.
    pub value: String,
    /// `ipv4`, `ipv6` or `hostname`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Network scope.
    pub scope: String,
    /// TCP port.
    pub port: u16,
}

/// `Admin.RedirectInfo` result.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RedirectInfoResult {
    /// Addresses of the controller the client should connect to.
    pub servers: Vec<Vec<HostPortParam>>,
    /// PEM CA certificate of that controller.
    pub ca_cert: String,
}

// ── Models ──────────────────────────────────────────────────────────

/// A single entity reference.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    /// Entity tag.
    pub tag: String,
}

/// Brief model description.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ModelInfo {
    /// Model name.
    pub name: String,
    /// Model UUID.
    pub uuid: String,
    /// Model type.
    #[serde(rename = "type")]
    pub kind: String,
    /// Owner tag.
    pub owner_tag: String,
    /// Hosting controller UUID (masked as the gateway's unless disabled).
    pub controller_uuid: String,
}

/// A model a user can see.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct UserModel {
    /// The model.
    pub model: ModelInfo,
    /// Last time the user connected, if known.
    #[serde(default)]
    pub last_connection: Option<String>,
}

/// `Controller.AllModels` / `ModelManager.ListModels` result.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct UserModelList {
    /// Visible models.
    pub user_models: Vec<UserModel>,
}

/// `Controller.ControllerVersion` result.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ControllerVersionResults {
    /// Earliest backend controller version.
    pub version: String,
    /// Gateway build version.
    pub git_commit: String,
}

// ── Model summaries ─────────────────────────────────────────────────

/// Entity counts of a model.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSummarySize {
    /// Machines.
    pub machines: u64,
    /// Containers.
    pub containers: u64,
    /// Applications.
    pub applications: u64,
    /// Units.
    pub units: u64,
    /// Relations.
    pub relations: u64,
}

/// A status message attached to a model summary.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSummaryMessage {
    /// Reporting agent.
    pub agent: String,
    /// Message text.
    pub message: String,
}

/// Summary of one model, as delivered by the summary bus.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ModelAbstract {
    /// Model UUID.
    pub uuid: String,
    /// Hosting controller name.
    pub controller: String,
    /// Model name.
    pub name: String,
    /// Model administrators.
    pub admins: Vec<String>,
    /// Cloud.
    pub cloud: String,
    /// Region.
    pub region: String,
    /// Credential name.
    pub credential: String,
    /// Entity counts.
    pub size: ModelSummarySize,
    /// Aggregate status.
    pub status: String,
    /// Status messages.
    pub messages: Vec<ModelSummaryMessage>,
    /// Free-form annotations.
    pub annotations: BTreeMap<String, String>,
}

/// Result of starting a summary watcher.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryWatcherId {
    /// Id to pass to `ModelSummaryWatcher.Next` / `Stop`.
    #[serde(rename = "watcher-id")]
    pub watcher_id: String,
}

/// `ModelSummaryWatcher.Next` result.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryWatcherNextResults {
    /// Current summaries, sorted by UUID.
    pub models: Vec<ModelAbstract>,
}

// ── Errors ──────────────────────────────────────────────────────────

/// Wire error body.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ErrorBody {
    /// Message.
    pub message: String,
    /// Wire code.
    pub code: String,
    /// Structured details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub info: Option<serde_json::Map<String, Value>>,
}

/// Outcome of one item of a bulk call.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ErrorResult {
    /// The item's error, if it failed.
    pub error: Option<ErrorBody>,
}

/// Outcomes of a bulk call.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ErrorResults {
    /// One entry per item.
    pub results: Vec<ErrorResult>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn login_request_accepts_partial_body() {
        let req: LoginRequest = serde_json::from_value(json!({"auth-tag": "user-bob@idp"})).unwrap();
        assert_eq!(req.auth_tag, "user-bob@idp");
        assert!(req.token.is_empty());
        assert!(req.macaroons.is_empty());
    }

    #[test]
    fn challenge_result_omits_login_fields() {
        let result = LoginResult {
            discharge_required: Some(json!({"location": "https://idp"})),
            discharge_required_error: "authentication required".into(),
            ..LoginResult::default()
        };
        let value = serde_json::to_value(&result).unwrap();
        assert!(value.get("facades").is_none());
        assert!(value.get("user-info").is_none());
        assert_eq!(value["discharge-required-error"], "authentication required");
    }

    #[test]
    fn watcher_id_field_name() {
        let value = serde_json::to_value(SummaryWatcherId { watcher_id: "w".into() }).unwrap();
        assert_eq!(value, json!({"watcher-id": "w"}));
    }

    #[test]
    fn model_abstract_defaults() {
        let summary: ModelAbstract = serde_json::from_value(json!({"uuid": "u1", "status": "green"})).unwrap();
        assert_eq!(summary.uuid, "u1");
        assert_eq!(summary.size, ModelSummarySize::default());
    }

    #[test]
    fn error_results_ignore_unrelated_fields() {
        let parsed: ErrorResults = serde_json::from_value(json!({"watcher-id": "x"})).unwrap();
        assert!(parsed.results.is_empty());
    }

    #[test]
    fn no_params_accepts_empty_object() {
        let _: NoParams = serde_json::from_value(json!({})).unwrap();
        let _: NoParams = serde_json::from_value(json!({"ignored": 1})).unwrap();
    }
}
