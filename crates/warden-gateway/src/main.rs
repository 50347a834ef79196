//! # warden-gateway
//!
//! Gateway binary: loads settings, wires the directory, authenticator,
//! token minter, audit sink and summary bus together and serves until
//! interrupted.

#![deny(unsafe_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use warden_audit::{AuditSink, SqliteAuditSink, SqliteSinkConfig, TracingAuditSink};
use warden_core::logging::init_subscriber;
use warden_server::auth::{JwtTokenMinter, SessionTokenAuthenticator};
use warden_server::directory::StaticDirectory;
use warden_server::pubsub::Hub;
use warden_server::shutdown::ShutdownCoordinator;
use warden_server::{ServerConfig, Services, WardenServer};
use warden_settings::{AuditSinkKind, AuditSettings, WardenSettings};

/// Model gateway server.
#[derive(Parser, Debug)]
#[command(name = "warden-gateway", about = "Model gateway server")]
struct Cli {
    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Settings file (defaults to `WARDEN_SETTINGS` or `~/.warden/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Log level filter (overrides settings; `RUST_LOG` still wins).
    #[arg(long)]
    log_level: Option<String>,
}

impl Cli {
    /// Load settings and apply command-line overrides.
    fn settings(&self) -> Result<WardenSettings> {
        let mut settings = match &self.settings {
            Some(path) => warden_settings::load_settings_from_path(path)
                .with_context(|| format!("Failed to load settings from {}", path.display()))?,
            None => warden_settings::load_settings().context("Failed to load settings")?,
        };
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(level) = &self.log_level {
            settings.logging.level.clone_from(level);
        }
        settings.validate().context("Invalid settings")?;
        Ok(settings)
    }
}

/// Open the configured audit sink. The `SQLite` flush task is tracked so
/// shutdown waits for its final flush.
fn open_audit_sink(
    settings: &AuditSettings,
    shutdown: &ShutdownCoordinator,
) -> Result<Arc<dyn AuditSink>> {
    match settings.sink {
        AuditSinkKind::Tracing => Ok(Arc::new(TracingAuditSink)),
        AuditSinkKind::Sqlite => {
            let path = Path::new(&settings.db_path);
            ensure_parent_dir(path)?;
            let sink = SqliteAuditSink::open(
                path,
                SqliteSinkConfig {
                    batch_size: settings.batch_size,
                    flush_interval_ms: settings.flush_interval_ms,
                },
            )
            .with_context(|| format!("Failed to open audit database {}", path.display()))?;
            shutdown.track("audit-flush", sink.spawn_flush_task(shutdown.token()));
            info!(path = %path.display(), "audit log opened");
            Ok(Arc::new(sink))
        }
    }
}

fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    Ok(())
}

/// Build the collaborators the server runs on.
fn build_services(
    settings: &WardenSettings,
    config: &ServerConfig,
    audit: Arc<dyn AuditSink>,
) -> Result<Services> {
    anyhow::ensure!(!settings.auth.session_secret.is_empty(), "auth.sessionSecret must be set");
    anyhow::ensure!(
        !settings.auth.trust_token_secret.is_empty(),
        "auth.trustTokenSecret must be set"
    );

    let directory = Arc::new(
        StaticDirectory::from_settings(&settings.directory).context("Invalid directory")?,
    );
    info!(models = directory.model_count(), "directory loaded");

    let authenticator = SessionTokenAuthenticator::new(
        settings.auth.session_secret.as_bytes(),
        directory.clone(),
        settings.auth.identity_location.clone(),
    );
    let minter = JwtTokenMinter::new(
        settings.auth.trust_token_secret.as_bytes(),
        config.controller_uuid,
        Duration::from_secs(settings.auth.trust_token_ttl_secs),
    );

    Ok(Services {
        authenticator: Arc::new(authenticator),
        directory,
        minter: Arc::new(minter),
        audit,
        hub: Hub::new(config.pubsub_max_concurrency),
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = cli.settings()?;
    init_subscriber(&settings.logging.level, settings.logging.format);

    let metrics = warden_server::metrics::install_recorder()
        .context("Failed to install metrics recorder")?;
    let config = ServerConfig::from_settings(&settings).context("Invalid server settings")?;

    // The audit flush task is tracked on the coordinator the server will own.
    let shutdown = ShutdownCoordinator::new();
    let audit = open_audit_sink(&settings.audit, &shutdown)?;
    let services = build_services(&settings, &config, audit)?;
    let server = WardenServer::with_shutdown(config, services, metrics, shutdown)
        .context("Failed to build server")?;

    let (addr, handle) = server.listen().await.context("Failed to bind")?;
    info!(%addr, controller = %server.config().controller_uuid, "warden gateway ready");

    tokio::signal::ctrl_c().await.context("Failed to listen for ctrl-c")?;
    info!("shutting down");
    server.shutdown().graceful_shutdown(None).await;
    let _ = handle.await;
    info!("shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_settings(dir: &Path, value: &serde_json::Value) -> PathBuf {
        let path = dir.join("settings.json");
        std::fs::write(&path, value.to_string()).unwrap();
        path
    }

    #[test]
    fn parses_overrides() {
        let cli = Cli::parse_from([
            "warden-gateway",
            "--host",
            "0.0.0.0",
            "--port",
            "18000",
            "--log-level",
            "debug",
        ]);
        assert_eq!(cli.host.as_deref(), Some("0.0.0.0"));
        assert_eq!(cli.port, Some(18000));
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
        assert!(cli.settings.is_none());
    }

    #[test]
    fn cli_overrides_beat_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = serde_json::json!({"server": {"host": "10.1.1.1", "port": 9000}});
        let path = write_settings(dir.path(), &file);
        let cli = Cli::parse_from([
            "warden-gateway",
            "--settings",
            path.to_str().unwrap(),
            "--port",
            "9001",
        ]);

        let settings = cli.settings().unwrap();
        assert_eq!(settings.server.host, "10.1.1.1");
        assert_eq!(settings.server.port, 9001);
    }

    #[test]
    fn invalid_settings_are_refused() {
        let dir = tempfile::tempdir().unwrap();
        let file = serde_json::json!({"server": {"controllerUuid": "nope"}});
        let path = write_settings(dir.path(), &file);
        let cli = Cli::parse_from(["warden-gateway", "--settings", path.to_str().unwrap()]);
        assert!(cli.settings().is_err());
    }

    #[test]
    fn secrets_are_required() {
        let settings = WardenSettings::default();
        let config = ServerConfig::from_settings(&settings).unwrap();
        let err = build_services(&settings, &config, Arc::new(TracingAuditSink)).err().unwrap();
        assert!(err.to_string().contains("sessionSecret"));
    }

    #[test]
    fn services_build_with_secrets() {
        let mut settings = WardenSettings::default();
        settings.auth.session_secret = "s".repeat(32);
        settings.auth.trust_token_secret = "t".repeat(32);
        let config = ServerConfig::from_settings(&settings).unwrap();
        let services = build_services(&settings, &config, Arc::new(TracingAuditSink)).unwrap();
        assert_eq!(services.hub.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn sqlite_sink_is_tracked_for_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let settings = AuditSettings {
            sink: AuditSinkKind::Sqlite,
            db_path: dir.path().join("nested").join("audit.db").display().to_string(),
            ..AuditSettings::default()
        };
        let shutdown = ShutdownCoordinator::new();
        let _sink = open_audit_sink(&settings, &shutdown).unwrap();
        assert_eq!(shutdown.tracked_len(), 1);
        shutdown.graceful_shutdown(Some(Duration::from_secs(5))).await;
        assert_eq!(shutdown.tracked_len(), 0);
    }
}
