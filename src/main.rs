//! insteon-plm - Insteon PLM daemon
//!
//! Drives one or more Power-Line Modems, keeps their link tables and device
//! catalogs on disk, and serves read-only status over HTTP.

mod show;

use clap::{Parser, Subcommand};
use insteon_server::{
    restore, run_status_server, Config, GatewayRegistry, GatewayRunner, Metrics, SharedPlm,
};
use insteon_storage::SnapshotStore;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "insteon-plm")]
#[command(about = "Host-side protocol engine for Insteon Power-Line Modems")]
#[command(version)]
struct Cli {
    /// Path to the YAML config file
    #[arg(short, long, env = "INSTEON_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every configured gateway (default)
    Run,

    /// Print the stored snapshot of a gateway
    Show {
        /// Gateway name
        gateway: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Failed to load config: {}", e);
            return Err(e.into());
        }
    };

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run(config).await,
        Commands::Show { gateway } => {
            let store = SnapshotStore::open(config.storage.snapshots_dir())?;
            let Some(snapshot) = store.load(&gateway)? else {
                return Err(format!("no snapshot stored for gateway '{gateway}'").into());
            };
            let plm = insteon_core::Plm::from_snapshot(&gateway, config.engine.clone(), &snapshot)?;
            print!("{}", show::render(&plm));
            Ok(())
        }
    }
}

async fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    if config.gateways.is_empty() {
        tracing::error!("No gateways configured");
        return Err("no gateways configured".into());
    }

    tracing::info!("Starting insteon-plm");
    tracing::info!("  Data directory: {}", config.storage.data_dir.display());
    tracing::info!("  Save interval: {}s", config.storage.save_interval_secs);

    let store = Arc::new(SnapshotStore::open(config.storage.snapshots_dir())?);
    let metrics = Arc::new(Metrics::new()?);
    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let mut engines: BTreeMap<String, SharedPlm> = BTreeMap::new();
    let mut handles = Vec::new();
    for gateway in &config.gateways {
        let transport = match insteon_server::transport::open(gateway) {
            Ok(transport) => transport,
            Err(e) => {
                tracing::error!("[{}] Failed to open link: {}", gateway.name, e);
                continue;
            }
        };
        let plm: SharedPlm = Arc::new(Mutex::new(restore(&gateway.name, &config.engine, &store)));
        engines.insert(gateway.name.clone(), plm.clone());

        let runner = GatewayRunner::new(plm, transport, store.clone(), metrics.clone())
            .with_intervals(config.status.poll_interval(), config.storage.save_interval());
        handles.push(tokio::spawn(runner.run(shutdown_tx.subscribe())));
    }

    if handles.is_empty() {
        return Err("no gateway could be opened".into());
    }

    let registry = GatewayRegistry::new(engines);
    let status_handle = if config.status.enabled {
        let addr = config.status.bind_addr;
        let shutdown = shutdown_tx.subscribe();
        let metrics = metrics.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = run_status_server(addr, registry, metrics, shutdown).await {
                tracing::error!("Status server failed: {}", e);
            }
        }))
    } else {
        tracing::info!("  Status endpoint: disabled");
        None
    };

    tokio::signal::ctrl_c().await?;
    tracing::info!("Received shutdown signal, saving snapshots...");
    let _ = shutdown_tx.send(());

    for handle in handles {
        let _ = handle.await;
    }
    if let Some(handle) = status_handle {
        let _ = handle.await;
    }

    tracing::info!("Stopped");
    Ok(())
}
