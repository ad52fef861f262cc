//! fleetd — the fleetgrid daemon.
//!
//! Single binary that assembles all fleetgrid subsystems:
//! - Record store (redb)
//! - Cluster state cache and nomination ledger
//! - Change ingestion
//! - Disruption controller workers
//! - Periodic resync
//! - REST API
//!
//! # Usage
//!
//! ```text
//! fleetd run --config /etc/fleetgrid/fleetd.toml --port 8080
//! fleetd check-config --config /etc/fleetgrid/fleetd.toml
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use fleetd::{Fleet, FleetdConfig};
use fleetgrid_cluster::SystemClock;
use fleetgrid_state::RecordStore;

#[derive(Parser)]
#[command(name = "fleetd", about = "fleetgrid daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the daemon (all subsystems in one process).
    Run {
        /// Path to fleetd.toml. Defaults apply when omitted.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Port to listen on. Overrides the config file.
        #[arg(long)]
        port: Option<u16>,

        /// Data directory for the record store. Overrides the config file.
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Emit logs as JSON lines.
        #[arg(long)]
        log_json: bool,
    },
    /// Parse and validate a config file, then exit.
    CheckConfig {
        #[arg(long)]
        config: PathBuf,
    },
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,fleetd=debug,fleetgrid=debug"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            config,
            port,
            data_dir,
            log_json,
        } => {
            init_tracing(log_json);
            let mut fleetd_config = match &config {
                Some(path) => FleetdConfig::from_file(path)?,
                None => FleetdConfig::default(),
            };
            if let Some(port) = port {
                fleetd_config.server.port = port;
            }
            if let Some(data_dir) = data_dir {
                fleetd_config.server.data_dir = data_dir;
            }
            run(fleetd_config).await
        }
        Command::CheckConfig { config } => {
            let parsed = FleetdConfig::from_file(&config)?;
            println!(
                "{}: ok ({} node pools, {} workers)",
                config.display(),
                parsed.node_pools.len(),
                parsed.controller.workers
            );
            Ok(())
        }
    }
}

async fn run(config: FleetdConfig) -> anyhow::Result<()> {
    info!("fleetgrid daemon starting");

    std::fs::create_dir_all(&config.server.data_dir)?;
    let db_path = config.server.data_dir.join("fleetgrid.redb");

    let store = RecordStore::open(&db_path)?;
    info!(path = ?db_path, "record store opened");

    let mut fleet = Fleet::assemble(store, &config, Arc::new(SystemClock))?;
    info!(
        workers = config.controller.workers,
        pools = config.node_pools.len(),
        "subsystems initialized"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handles = fleet.start(shutdown_rx);

    let router = fleet.router();
    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    info!(%addr, "API server starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    let server = axum::serve(listener, router).with_graceful_shutdown(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for shutdown signal");
        }
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    server.await?;

    for handle in handles {
        let _ = handle.await;
    }

    info!("fleetgrid daemon stopped");
    Ok(())
}
