//! Session-token authentication and trust-token minting.
//!
//! Clients authenticate with an HS256 session token issued by the identity
//! provider. The gateway then mints a separate, short-lived trust token for
//! each backend it dials, scoped to one model and its controller.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;
use uuid::Uuid;
use warden_core::{Access, ErrorCode, GatewayError, Identity, Model, UserTag};
use warden_rpc::params::LoginRequest;

use crate::services::{AuthError, Authenticator, ModelDirectory, TokenMinter};

/// Default trust token lifetime.
pub const DEFAULT_TRUST_TOKEN_TTL: Duration = Duration::from_secs(300);

fn now_secs() -> i64 {
    chrono::Utc::now().timestamp()
}

#[allow(clippy::cast_possible_wrap)]
fn ttl_secs(ttl: Duration) -> i64 {
    ttl.as_secs() as i64
}

// ── Session tokens ──────────────────────────────────────────────────

/// Claims of a client session token.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClaims {
    /// User id (`alice@idp`).
    pub sub: String,
    /// Issued at, Unix seconds.
    pub iat: i64,
    /// Expiry, Unix seconds.
    pub exp: i64,
}

/// Verifies HS256 session tokens and resolves their subject through the
/// model directory.
pub struct SessionTokenAuthenticator {
    encoding: EncodingKey,
    decoding: DecodingKey,
    directory: Arc<dyn ModelDirectory>,
    identity_location: String,
}

impl SessionTokenAuthenticator {
    /// Create an authenticator for tokens signed with `secret`.
    ///
    /// `identity_location` is sent to clients that log in without a token.
    pub fn new(
        secret: &[u8],
        directory: Arc<dyn ModelDirectory>,
        identity_location: impl Into<String>,
    ) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            directory,
            identity_location: identity_location.into(),
        }
    }

    /// Issue a session token for `user`, valid for `ttl`.
    pub fn issue(&self, user: &UserTag, ttl: Duration) -> Result<String, GatewayError> {
        let iat = now_secs();
        let claims = SessionClaims {
            sub: user.id(),
            iat,
            exp: iat + ttl_secs(ttl),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| GatewayError::internal(format!("cannot sign session token: {e}")))
    }

    fn decode(&self, token: &str) -> Result<SessionClaims, GatewayError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_required_spec_claims(&["exp", "sub"]);
        decode::<SessionClaims>(token, &self.decoding, &validation)
            .map(|data| data.claims)
            .map_err(|e| {
                debug!(error = %e, "session token rejected");
                GatewayError::unauthorized("invalid session token")
            })
    }
}

#[async_trait]
impl Authenticator for SessionTokenAuthenticator {
    async fn authenticate(&self, request: &LoginRequest) -> Result<Identity, AuthError> {
        if request.token.is_empty() {
            return Err(AuthError::DischargeRequired {
                challenge: json!({"location": self.identity_location}),
                reason: "authentication required".into(),
            });
        }
        let identity = self.verify_session_token(&request.token).await?;
        if !request.auth_tag.is_empty() && request.auth_tag != identity.tag.to_string() {
            return Err(GatewayError::unauthorized("auth tag does not match session token").into());
        }
        Ok(identity)
    }

    async fn verify_session_token(&self, token: &str) -> Result<Identity, GatewayError> {
        let claims = self.decode(token)?;
        let tag = UserTag::from_id(&claims.sub)
            .map_err(|_| GatewayError::unauthorized("invalid session token subject"))?;
        match self.directory.get_identity(&tag).await {
            Ok(identity) => Ok(identity),
            // users provisioned by the identity provider need not be listed
            Err(e) if e.code() == ErrorCode::NotFound => Ok(Identity::new(tag)),
            Err(e) => Err(e),
        }
    }
}

// ── Trust tokens ────────────────────────────────────────────────────

/// Claims of a backend trust token.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustClaims {
    /// Gateway controller UUID.
    pub iss: String,
    /// Caller's user tag.
    pub sub: String,
    /// Backend controller UUID.
    pub aud: String,
    /// Model tag.
    pub model: String,
    /// Controller tag.
    pub controller: String,
    /// Access granted, keyed by tag.
    pub access: BTreeMap<String, String>,
    /// Issued at, Unix seconds.
    pub iat: i64,
    /// Expiry, Unix seconds.
    pub exp: i64,
    /// Token id.
    pub jti: String,
}

/// Mints HS256 trust tokens for backend controllers.
pub struct JwtTokenMinter {
    encoding: EncodingKey,
    decoding: DecodingKey,
    issuer: Uuid,
    ttl: Duration,
}

impl JwtTokenMinter {
    /// Create a minter signing with `secret` on behalf of gateway `issuer`.
    pub fn new(secret: &[u8], issuer: Uuid, ttl: Duration) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            issuer,
            ttl,
        }
    }

    /// Decode and validate a token minted for controller `audience`.
    pub fn verify(&self, token: &str, audience: Uuid) -> Result<TrustClaims, GatewayError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_audience(&[audience.to_string()]);
        validation.set_issuer(&[self.issuer.to_string()]);
        decode::<TrustClaims>(token, &self.decoding, &validation)
            .map(|data| data.claims)
            .map_err(|e| GatewayError::unauthorized(format!("invalid trust token: {e}")))
    }
}

impl TokenMinter for JwtTokenMinter {
    fn mint(
        &self,
        identity: &Identity,
        model: &Model,
        access: Access,
    ) -> Result<String, GatewayError> {
        let model_tag = model.tag().to_string();
        let controller_tag = model.controller.tag().to_string();
        let mut grants = BTreeMap::new();
        let _ = grants.insert(model_tag.clone(), access.as_str().to_owned());
        let _ = grants.insert(controller_tag.clone(), identity.controller_access().to_owned());

        let iat = now_secs();
        let claims = TrustClaims {
            iss: self.issuer.to_string(),
            sub: identity.tag.to_string(),
            aud: model.controller.uuid.to_string(),
            model: model_tag,
            controller: controller_tag,
            access: grants,
            iat,
            exp: iat + ttl_secs(self.ttl),
            jti: Uuid::new_v4().to_string(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| GatewayError::internal(format!("cannot sign trust token: {e}")))
    }
}
