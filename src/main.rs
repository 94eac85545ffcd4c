//! # tillsync
//!
//! Store terminal sync daemon: keeps the local store's accounts, catalog,
//! sales and loyalty ledger flowing into the chain-wide store.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use tillsync_core::{PassOutcome, Trigger};
use tillsync_engine::{ConnectionHealth, SyncOrchestrator, SyncScheduler};
use tillsync_server::{AppState, EngineSyncService, ServerConfig};
use tillsync_settings::TillsyncSettings;
use tillsync_telemetry::{init_telemetry, TelemetryConfig};

#[derive(Parser, Debug)]
#[command(name = "tillsync", about = "Store-to-chain sync daemon")]
struct Cli {
    /// Settings file (defaults to `~/.tillsync/settings.json`).
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Local store path, overriding settings.
    #[arg(long, global = true)]
    local_db: Option<PathBuf>,

    /// Chain store path, overriding settings.
    #[arg(long, global = true)]
    chain_db: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the scheduler and the HTTP control surface (default).
    Serve {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
    },
    /// Run a single pass and print its outcome as JSON.
    SyncOnce,
}

fn load(cli: &Cli) -> Result<TillsyncSettings> {
    let mut settings = match &cli.settings {
        Some(path) => tillsync_settings::load_settings_from_path(path),
        None => tillsync_settings::load_settings(),
    }
    .context("failed to load settings")?;
    if let Some(path) = &cli.local_db {
        settings.local.path = path.to_string_lossy().into_owned();
    }
    if let Some(path) = &cli.chain_db {
        settings.chain.path = path.to_string_lossy().into_owned();
    }
    Ok(settings)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut settings = load(&cli)?;

    let telemetry = init_telemetry(TelemetryConfig::new(
        &settings.telemetry.log_level,
        settings.telemetry.log_to_sqlite,
        PathBuf::from(&settings.telemetry.log_db_path),
    ));

    let health = Arc::new(ConnectionHealth::sqlite(&settings.local.path, &settings.chain.path));
    // Without the local store there is nothing to sync from.
    health
        .bootstrap()
        .with_context(|| format!("failed to open local store at {}", settings.local.path))?;
    tracing::info!(
        store_id = settings.store.store_id,
        pos_id = settings.store.pos_id,
        status = %health.describe(),
        "stores bootstrapped"
    );

    let orchestrator = Arc::new(SyncOrchestrator::new(health, settings.store.clone()));

    match cli.command.unwrap_or(Command::Serve { host: None, port: None }) {
        Command::SyncOnce => {
            let outcome = tokio::task::spawn_blocking(move || orchestrator.run_pass(Trigger::Manual))
                .await
                .context("sync pass task failed")?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
            if !matches!(outcome, PassOutcome::Completed(_)) {
                std::process::exit(2);
            }
            Ok(())
        }
        Command::Serve { host, port } => {
            if let Some(host) = host {
                settings.server.host = host;
            }
            if let Some(port) = port {
                settings.server.port = port;
            }
            serve(settings, orchestrator, telemetry.log_sink()).await
        }
    }
}

async fn serve(
    settings: TillsyncSettings,
    orchestrator: Arc<SyncOrchestrator>,
    logs: Option<Arc<tillsync_telemetry::SqliteLogSink>>,
) -> Result<()> {
    let shutdown = CancellationToken::new();

    let server = tillsync_server::start(
        ServerConfig {
            host: settings.server.host.clone(),
            port: settings.server.port,
        },
        AppState {
            service: Arc::new(EngineSyncService::new(orchestrator.clone())),
            logs,
        },
        shutdown.clone(),
    )
    .await
    .context("failed to start HTTP server")?;
    tracing::info!(port = server.port, "tillsync ready");

    let scheduler = settings.sync.enabled.then(|| {
        SyncScheduler::from_settings(orchestrator, &settings.sync, &settings.local).spawn(shutdown.clone())
    });

    let result = match scheduler {
        Some(mut handle) => {
            let finished = tokio::select! {
                signal = tokio::signal::ctrl_c() => {
                    signal.context("failed to listen for ctrl+c")?;
                    None
                }
                joined = &mut handle => Some(joined),
            };
            match finished {
                None => {
                    tracing::info!("shutting down");
                    shutdown.cancel();
                    let _ = handle.await;
                    Ok(())
                }
                Some(joined) => match joined.context("sync scheduler task failed")? {
                    Ok(()) => Ok(()),
                    Err(e) => Err(anyhow::Error::new(e).context("local store lost")),
                },
            }
        }
        None => {
            tracing::warn!("timed sync disabled, passes run only on request");
            tokio::signal::ctrl_c().await.context("failed to listen for ctrl+c")?;
            tracing::info!("shutting down");
            Ok(())
        }
    };

    shutdown.cancel();
    server.stopped().await;
    result
}
