//! Facade table and timed dispatch.
//!
//! A [`FacadeTable`] maps `(facade, version, method)` to a handler. It is
//! assembled once through a [`FacadeTableBuilder`] and is immutable after
//! [`FacadeTableBuilder::build`]. Handlers are generic over the per-connection
//! context `C` they receive.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use metrics::{counter, histogram};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::warn;
use warden_core::GatewayError;

use crate::errors::RpcError;
use crate::params::FacadeVersions;

/// Maximum time a single handler is allowed to run.
pub const HANDLER_TIMEOUT: Duration = Duration::from_secs(60);

/// Calls slower than this are logged.
const SLOW_CALL: Duration = Duration::from_secs(5);

/// Trait implemented by every facade method handler.
#[async_trait]
pub trait MethodHandler<C: ?Sized>: Send + Sync {
    /// Execute the method for object `id` with the raw request body.
    async fn call(&self, ctx: Arc<C>, id: String, params: Option<Value>) -> Result<Value, RpcError>;
}

/// Handler adapter that decodes `P`, runs a closure and encodes `R`.
pub struct TypedMethod<F, P, R> {
    f: F,
    _marker: PhantomData<fn(P) -> R>,
}

/// Wrap an async closure `(ctx, id, params) -> Result<R>` as a handler.
///
/// A missing or `null` body decodes as `{}`; a `null` result encodes as `{}`.
pub fn method<C, F, Fut, P, R>(f: F) -> TypedMethod<F, P, R>
where
    C: ?Sized + Send + Sync + 'static,
    F: Fn(Arc<C>, String, P) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, RpcError>> + Send + 'static,
    P: DeserializeOwned + Send + 'static,
    R: Serialize + Send + 'static,
{
    TypedMethod {
        f,
        _marker: PhantomData,
    }
}

#[async_trait]
impl<C, F, Fut, P, R> MethodHandler<C> for TypedMethod<F, P, R>
where
    C: ?Sized + Send + Sync + 'static,
    F: Fn(Arc<C>, String, P) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, RpcError>> + Send + 'static,
    P: DeserializeOwned + Send + 'static,
    R: Serialize + Send + 'static,
{
    async fn call(
        &self,
        ctx: Arc<C>,
        id: String,
        params: Option<Value>,
    ) -> Result<Value, RpcError> {
        let body = match params {
            None | Some(Value::Null) => Value::Object(Map::new()),
            Some(v) => v,
        };
        let decoded: P = serde_json::from_value(body).map_err(|e| RpcError::InvalidParams {
            message: format!("cannot decode params: {e}"),
        })?;
        let result = (self.f)(ctx, id, decoded).await?;
        match serde_json::to_value(result).map_err(GatewayError::from)? {
            Value::Null => Ok(Value::Object(Map::new())),
            v => Ok(v),
        }
    }
}

/// Fully qualified method name.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodKey {
    /// Facade name.
    pub facade: String,
    /// Facade version.
    pub version: u32,
    /// Method name.
    pub method: String,
}

impl MethodKey {
    /// Build a key.
    pub fn new(facade: &str, version: u32, method: &str) -> Self {
        Self {
            facade: facade.to_owned(),
            version,
            method: method.to_owned(),
        }
    }
}

impl std::fmt::Display for MethodKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({}).{}", self.facade, self.version, self.method)
    }
}

/// Registration failed.
#[derive(Debug, thiserror::Error)]
#[error("method {0} registered twice")]
pub struct DuplicateMethod(pub MethodKey);

/// Mutable builder for a [`FacadeTable`].
pub struct FacadeTableBuilder<C: ?Sized> {
    handlers: HashMap<MethodKey, Arc<dyn MethodHandler<C>>>,
}

impl<C: ?Sized + Send + Sync + 'static> FacadeTableBuilder<C> {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register `handler` for `method` under every listed version of `facade`.
    pub fn register(
        &mut self,
        facade: &str,
        versions: &[u32],
        method: &str,
        handler: impl MethodHandler<C> + 'static,
    ) -> Result<(), DuplicateMethod> {
        let handler: Arc<dyn MethodHandler<C>> = Arc::new(handler);
        for &version in versions {
            let key = MethodKey::new(facade, version, method);
            if self.handlers.contains_key(&key) {
                return Err(DuplicateMethod(key));
            }
            let _ = self.handlers.insert(key, Arc::clone(&handler));
        }
        Ok(())
    }

    /// Freeze the table.
    pub fn build(self) -> FacadeTable<C> {
        let mut by_facade: BTreeMap<String, Vec<u32>> = BTreeMap::new();
        for key in self.handlers.keys() {
            let versions = by_facade.entry(key.facade.clone()).or_default();
            if !versions.contains(&key.version) {
                versions.push(key.version);
            }
        }
        let versions = by_facade
            .into_iter()
            .map(|(name, mut versions)| {
                versions.sort_unstable();
                FacadeVersions { name, versions }
            })
            .collect();
        FacadeTable {
            handlers: self.handlers,
            versions,
        }
    }
}

impl<C: ?Sized + Send + Sync + 'static> Default for FacadeTableBuilder<C> {
    fn default() -> Self {
        Self::new()
    }
}

/// Immutable `(facade, version, method)` → handler table.
pub struct FacadeTable<C: ?Sized> {
    handlers: HashMap<MethodKey, Arc<dyn MethodHandler<C>>>,
    versions: Vec<FacadeVersions>,
}

impl<C: ?Sized + Send + Sync + 'static> FacadeTable<C> {
    /// Resolve a handler.
    ///
    /// Unknown facade, version or method is reported as "not implemented".
    pub fn find(
        &self,
        facade: &str,
        version: u32,
        method: &str,
    ) -> Result<Arc<dyn MethodHandler<C>>, RpcError> {
        let key = MethodKey::new(facade, version, method);
        if let Some(handler) = self.handlers.get(&key) {
            return Ok(Arc::clone(handler));
        }
        let message = match self.versions.iter().find(|f| f.name == facade) {
            None => format!("unknown object type {facade:?}"),
            Some(f) if !f.versions.contains(&version) => {
                format!("unknown version {version} of interface {facade:?}")
            }
            Some(_) => {
                format!("no such request - method {facade}({version}).{method} is not implemented")
            }
        };
        Err(RpcError::NotImplemented { message })
    }

    /// Every facade and its versions, sorted by facade name.
    pub fn versions(&self) -> &[FacadeVersions] {
        &self.versions
    }

    /// Number of registered `(facade, version, method)` entries.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Run `handler` under the handler timeout, recording metrics.
    pub async fn invoke(
        handler: Arc<dyn MethodHandler<C>>,
        key: &MethodKey,
        ctx: Arc<C>,
        id: String,
        params: Option<Value>,
    ) -> Result<Value, RpcError> {
        let label = format!("{}.{}", key.facade, key.method);
        counter!("rpc_requests_total", "method" => label.clone()).increment(1);

        let start = Instant::now();
        let call = handler.call(ctx, id, params);
        let result = match tokio::time::timeout(HANDLER_TIMEOUT, call).await {
            Ok(result) => result,
            Err(_elapsed) => {
                tracing::error!(method = %key, "handler timed out after {:?}", HANDLER_TIMEOUT);
                Err(GatewayError::internal(format!("{key} timed out")).into())
            }
        };

        if let Err(err) = &result {
            counter!("rpc_errors_total", "method" => label.clone(), "error_type" => err.code())
                .increment(1);
        }

        let duration = start.elapsed();
        histogram!("rpc_request_duration_seconds", "method" => label)
            .record(duration.as_secs_f64());
        if duration >= SLOW_CALL {
            warn!(method = %key, duration_secs = duration.as_secs_f64(), "slow RPC request");
        }

        result
    }
}
