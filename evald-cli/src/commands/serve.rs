//! Run the evald server in the foreground.
//!
//! Wires the configured registry, record store, harness and resource monitor
//! into an [`Orchestrator`] and serves the HTTP API until interrupted.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use evald_core::{
    CommandHarness, Harness, LibsqlRecordStore, MemoryRecordStore, Orchestrator, RecordStore,
    SimulatedHarness,
};
use evald_monitor::{CachedMonitor, ResourceMonitor};
use evald_server::{AppState, EvaldServer, ServerConfig};
use tracing::{info, warn};

use crate::config::{ConfigLoader, EvaldConfig, HarnessKind, StoreKind};

/// Arguments for the serve command
#[derive(Debug, Args)]
pub struct ServeArgs {
    /// Port to listen on (overrides config)
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Host to bind to (overrides config)
    #[arg(long)]
    pub host: Option<String>,

    /// Keep records in memory instead of the database file
    #[arg(long)]
    pub memory_store: bool,

    /// Use the simulated harness regardless of config
    #[arg(long)]
    pub simulate: bool,
}

/// Run the serve command
pub async fn run(args: ServeArgs) -> Result<()> {
    let mut config = ConfigLoader::load()?;
    apply_overrides(&mut config, &args);

    let registry = Arc::new(super::registry(&config));
    match registry.scan_all().await {
        Ok(report) => info!(
            models = report.total,
            skipped = report.skipped.len(),
            "model registry scanned"
        ),
        Err(e) => warn!(error = %e, "model scan failed; starting with an empty catalog"),
    }

    let store = open_store(&config).await?;
    let harness = build_harness(&config)?;
    let monitor: Arc<dyn ResourceMonitor> = Arc::new(CachedMonitor::new(
        super::system_monitor(&config),
        Duration::from_millis(config.monitor.cache_ttl_ms),
    ));

    let orchestrator = Orchestrator::start(
        config.orchestrator.clone(),
        registry,
        store,
        harness,
        Arc::clone(&monitor),
    )
    .await;
    let state = Arc::new(AppState::new(orchestrator, monitor));

    let server_config = ServerConfig::new(config.server.host.clone(), config.server.port);
    info!("Starting evald server on {}", server_config.addr());
    EvaldServer::new(server_config, state)
        .run(shutdown_signal())
        .await
        .map_err(Into::into)
}

fn apply_overrides(config: &mut EvaldConfig, args: &ServeArgs) {
    if let Some(host) = &args.host {
        config.server.host = host.clone();
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if args.memory_store {
        config.store.kind = StoreKind::Memory;
    }
    if args.simulate {
        config.harness.kind = HarnessKind::Simulated;
    }
}

async fn open_store(config: &EvaldConfig) -> Result<Arc<dyn RecordStore>> {
    match config.store.kind {
        StoreKind::Memory => {
            warn!("records are kept in memory and lost on exit");
            Ok(Arc::new(MemoryRecordStore::new()))
        }
        StoreKind::Sqlite => {
            let path = &config.store.path;
            let store = LibsqlRecordStore::open(path)
                .await
                .with_context(|| format!("failed to open record store at {}", path.display()))?;
            info!(path = %path.display(), "record store opened");
            Ok(Arc::new(store))
        }
    }
}

fn build_harness(config: &EvaldConfig) -> Result<Arc<dyn Harness>> {
    match config.harness.kind {
        HarnessKind::Simulated => Ok(Arc::new(SimulatedHarness::new(Duration::from_millis(
            config.harness.simulated_delay_ms,
        )))),
        HarnessKind::Command => {
            let program = config
                .harness
                .command
                .as_ref()
                .context("harness.kind is \"command\" but harness.command is not set")?;
            Ok(Arc::new(CommandHarness::new(
                program,
                config.harness.args.clone(),
            )))
        }
    }
}

/// Resolves on Ctrl-C, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        serve: ServeArgs,
    }

    fn config() -> EvaldConfig {
        toml::from_str(
            r#"
[server]
host = "127.0.0.1"
port = 9000

[registry]
models_dir = "/srv/models"
datasets_dir = "/srv/datasets"

[orchestrator]

[harness]
kind = "command"
args = []
simulated_delay_ms = 0

[store]
kind = "sqlite"
path = "/srv/records.db"

[monitor]
nvidia_smi = "nvidia-smi"
timeout_ms = 100
cache_ttl_ms = 100
"#,
        )
        .unwrap()
    }

    #[test]
    fn test_serve_args_defaults() {
        let cli = TestCli::parse_from(["test"]);
        assert!(cli.serve.port.is_none());
        assert!(cli.serve.host.is_none());
        assert!(!cli.serve.memory_store);
        assert!(!cli.serve.simulate);
    }

    #[test]
    fn test_overrides_replace_config_values() {
        let cli = TestCli::parse_from([
            "test",
            "--port",
            "9100",
            "--host",
            "0.0.0.0",
            "--memory-store",
            "--simulate",
        ]);
        let mut config = config();
        apply_overrides(&mut config, &cli.serve);

        assert_eq!(config.server.port, 9100);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.store.kind, StoreKind::Memory);
        assert_eq!(config.harness.kind, HarnessKind::Simulated);
    }

    #[test]
    fn test_command_harness_requires_a_program() {
        let err = build_harness(&config()).err().unwrap();
        assert!(err.to_string().contains("harness.command"));
    }

    #[tokio::test]
    async fn test_memory_store_needs_no_path() {
        let mut config = config();
        config.store.kind = StoreKind::Memory;
        let store = open_store(&config).await.unwrap();
        assert!(store.statistics().await.is_ok());
    }
}
