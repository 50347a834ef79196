//! Facades served by [`ConnectionRoot`].

use std::sync::Arc;

use serde_json::Value;
use warden_core::GatewayError;
use warden_rpc::params::{Entity, LoginRequest, LoginWithSessionTokenRequest, NoParams};
use warden_rpc::{DuplicateMethod, FacadeTable, FacadeTableBuilder, RpcError, method};

use super::ConnectionRoot;

/// Fixed reply to every login from a client older than `Admin` v3.
pub const OLD_CLIENT_MESSAGE: &str = "warden does not support login from old clients";

/// Build the controller root's facade table.
pub fn build_controller_facades() -> Result<FacadeTable<ConnectionRoot>, DuplicateMethod> {
    let mut b = FacadeTableBuilder::<ConnectionRoot>::new();

    // ── Admin ───────────────────────────────────────────────────────
    b.register(
        "Admin",
        &[1, 2],
        "Login",
        method(|_root: Arc<ConnectionRoot>, _id: String, _p: Value| async move {
            Err::<(), RpcError>(GatewayError::not_supported(OLD_CLIENT_MESSAGE).into())
        }),
    )?;
    b.register(
        "Admin",
        &[3, 4],
        "Login",
        method(|root: Arc<ConnectionRoot>, _id: String, p: LoginRequest| async move {
            root.login(&p).await.map_err(RpcError::from)
        }),
    )?;
    b.register(
        "Admin",
        &[4],
        "LoginWithSessionToken",
        method(
            |root: Arc<ConnectionRoot>, _id: String, p: LoginWithSessionTokenRequest| async move {
                root.login_with_session_token(&p.session_token)
                    .await
                    .map_err(RpcError::from)
            },
        ),
    )?;

    // ── Pinger ──────────────────────────────────────────────────────
    b.register(
        "Pinger",
        &[1],
        "Ping",
        method(|root: Arc<ConnectionRoot>, _id: String, _p: NoParams| async move {
            root.ping();
            Ok::<_, RpcError>(())
        }),
    )?;

    // ── Controller ──────────────────────────────────────────────────
    let controller = [9, 10, 11];
    b.register(
        "Controller",
        &controller,
        "AllModels",
        method(|root: Arc<ConnectionRoot>, _id: String, _p: NoParams| async move {
            root.all_models().await.map_err(RpcError::from)
        }),
    )?;
    b.register(
        "Controller",
        &controller,
        "ControllerVersion",
        method(|root: Arc<ConnectionRoot>, _id: String, _p: NoParams| async move {
            root.controller_version().await.map_err(RpcError::from)
        }),
    )?;
    b.register(
        "Controller",
        &controller,
        "WatchModelSummaries",
        method(|root: Arc<ConnectionRoot>, _id: String, _p: NoParams| async move {
            root.watch_model_summaries(false).await.map_err(RpcError::from)
        }),
    )?;
    b.register(
        "Controller",
        &controller,
        "WatchAllModelSummaries",
        method(|root: Arc<ConnectionRoot>, _id: String, _p: NoParams| async move {
            root.watch_model_summaries(true).await.map_err(RpcError::from)
        }),
    )?;
    b.register(
        "Controller",
        &[11],
        "DisableControllerUUIDMasking",
        method(|root: Arc<ConnectionRoot>, _id: String, _p: NoParams| async move {
            root.disable_controller_uuid_masking().map_err(RpcError::from)
        }),
    )?;

    // ── ModelManager ────────────────────────────────────────────────
    b.register(
        "ModelManager",
        &[9, 10],
        "ListModels",
        method(|root: Arc<ConnectionRoot>, _id: String, p: Entity| async move {
            root.list_models(&p.tag).await.map_err(RpcError::from)
        }),
    )?;

    // ── ModelSummaryWatcher ─────────────────────────────────────────
    b.register(
        "ModelSummaryWatcher",
        &[1],
        "Next",
        method(|root: Arc<ConnectionRoot>, id: String, _p: NoParams| async move {
            root.summary_watcher_next(&id).map_err(RpcError::from)
        }),
    )?;
    b.register(
        "ModelSummaryWatcher",
        &[1],
        "Stop",
        method(|root: Arc<ConnectionRoot>, id: String, _p: NoParams| async move {
            root.summary_watcher_stop(&id).map_err(RpcError::from)
        }),
    )?;

    Ok(b.build())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::root::RpcRoot;
    use crate::services::fakes;
    use serde_json::json;
    use tokio_util::sync::CancellationToken;
    use warden_core::ErrorCode;
    use warden_rpc::MethodKey;

    fn root() -> Arc<ConnectionRoot> {
        Arc::new(ConnectionRoot::new(
            fakes::services().0,
            Arc::new(ServerConfig::default()),
            Arc::new(build_controller_facades().unwrap()),
            &CancellationToken::new(),
        ))
    }

    async fn call(
        root: &Arc<ConnectionRoot>,
        facade: &str,
        version: u32,
        name: &str,
        params: Value,
    ) -> Result<Value, RpcError> {
        let handler = root.find_method(facade, version, name)?;
        let key = MethodKey::new(facade, version, name);
        FacadeTable::invoke(handler, &key, Arc::clone(root), String::new(), Some(params)).await
    }

    #[test]
    fn catalogue_is_sorted_with_expected_versions() {
        let table = build_controller_facades().unwrap();
        let catalogue: Vec<(String, Vec<u32>)> = table
            .versions()
            .iter()
            .map(|f| (f.name.clone(), f.versions.clone()))
            .collect();
        assert_eq!(
            catalogue,
            vec![
                ("Admin".to_owned(), vec![1, 2, 3, 4]),
                ("Controller".to_owned(), vec![9, 10, 11]),
                ("ModelManager".to_owned(), vec![9, 10]),
                ("ModelSummaryWatcher".to_owned(), vec![1]),
                ("Pinger".to_owned(), vec![1]),
            ]
        );
    }

    #[test]
    fn session_token_login_only_on_v4() {
        let table = build_controller_facades().unwrap();
        assert!(table.find("Admin", 4, "LoginWithSessionToken").is_ok());
        assert!(table.find("Admin", 3, "LoginWithSessionToken").is_err());
        assert!(table.find("Controller", 11, "DisableControllerUUIDMasking").is_ok());
        assert!(table.find("Controller", 10, "DisableControllerUUIDMasking").is_err());
    }

    #[tokio::test]
    async fn legacy_login_always_fails() {
        let r = root();
        for version in [1, 2] {
            for params in [json!({}), json!({"token": "alice@idp"}), json!("junk"), Value::Null] {
                let err = call(&r, "Admin", version, "Login", params).await.unwrap_err();
                assert_eq!(err.kind(), ErrorCode::NotSupported);
                assert_eq!(err.to_string(), OLD_CLIENT_MESSAGE);
            }
        }
        assert!(r.identity().is_none());
    }

    #[tokio::test]
    async fn login_then_list_through_the_table() {
        let r = root();
        let result = call(&r, "Admin", 3, "Login", json!({"token": "alice@idp"})).await.unwrap();
        assert_eq!(result["user-info"]["identity"], "user-alice@idp");

        let models = call(&r, "Controller", 9, "AllModels", json!({})).await.unwrap();
        assert_eq!(models["user-models"][0]["model"]["uuid"], fakes::MODEL_A);

        let listed = call(&r, "ModelManager", 10, "ListModels", json!({"tag": "user-alice@idp"}))
            .await
            .unwrap();
        assert_eq!(listed, models);
    }

    #[tokio::test]
    async fn ping_before_login() {
        let r = root();
        let out = call(&r, "Pinger", 1, "Ping", json!({})).await.unwrap();
        assert_eq!(out, json!({}));
        assert_eq!(r.heartbeat().beats(), 1);
    }

    #[tokio::test]
    async fn watcher_calls_use_object_id() {
        let r = root();
        let _ = call(&r, "Admin", 4, "LoginWithSessionToken", json!({"session-token": "bob@idp"}))
            .await
            .unwrap();
        let started = call(&r, "Controller", 10, "WatchModelSummaries", json!({})).await.unwrap();
        let id = started["watcher-id"].as_str().unwrap().to_owned();

        let key = MethodKey::new("ModelSummaryWatcher", 1, "Next");
        let handler = r.find_method("ModelSummaryWatcher", 1, "Next").unwrap();
        let next = FacadeTable::invoke(handler, &key, Arc::clone(&r), id.clone(), None)
            .await
            .unwrap();
        assert_eq!(next, json!({"models": []}));

        let key = MethodKey::new("ModelSummaryWatcher", 1, "Stop");
        let handler = r.find_method("ModelSummaryWatcher", 1, "Stop").unwrap();
        let stopped = FacadeTable::invoke(handler, &key, Arc::clone(&r), id, None).await.unwrap();
        assert_eq!(stopped, json!({}));

        let err = call(&r, "ModelSummaryWatcher", 1, "Next", json!({})).await.unwrap_err();
        assert_eq!(err.kind(), ErrorCode::NotFound);
    }
}
