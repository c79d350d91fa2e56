//! Tagging Server - bucketed tag membership service

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tagging_core::backend::MemoryStore;
use tagging_core::legacy::MemoryLegacyStore;
use tagging_server::api::{self, AppState};
use tagging_server::config::{BackendKind, ServerConfig};
use tagging_server::etcd::{self, EtcdLegacyStore, EtcdStore};
use tagging_server::observability::{init_metrics, init_tracing, shutdown_tracing, TracingConfig};
use tagging_server::registry::HttpGroupRegistry;
use tagging_server::version;
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(name = "tagging-server", version = version::VERSION, about)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the HTTP server (default)
    Serve(ServeArgs),
    /// Print build information and exit
    Version,
}

#[derive(Debug, Default, clap::Args)]
struct ServeArgs {
    /// Listen address, overrides BIND_ADDR
    #[arg(long)]
    bind: Option<String>,

    /// Backing store, overrides TAG_BACKEND
    #[arg(long, value_enum)]
    backend: Option<BackendKind>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command.unwrap_or(Command::Serve(ServeArgs::default())) {
        Command::Version => {
            println!("{}", version::BUILD);
            Ok(())
        }
        Command::Serve(args) => serve(args).await,
    }
}

async fn serve(args: ServeArgs) -> Result<()> {
    init_tracing(TracingConfig::from_env()).map_err(|e| anyhow!("Failed to initialize tracing: {e}"))?;
    info!(version = %version::full_version(), "Starting tagging server");

    let metrics = init_metrics().map_err(|e| anyhow!("Failed to initialize metrics: {e}"))?;

    let mut config = ServerConfig::from_env();
    if let Some(bind) = args.bind {
        config.bind_addr = bind;
    }
    if let Some(backend) = args.backend {
        config.backend = backend;
    }
    info!(
        bind_addr = %config.bind_addr,
        backend = ?config.backend,
        registry_url = %config.registry_url,
        max_batch_size = config.tagging.max_batch_size,
        "Loaded configuration"
    );

    let registry = Arc::new(HttpGroupRegistry::new(&config)?);

    let state = match config.backend {
        BackendKind::Etcd => {
            info!(endpoints = ?config.etcd_endpoints, "Connecting to etcd");
            let client = etcd::connect(&config).await?;
            info!("Connected to etcd");

            let store = Arc::new(EtcdStore::new(
                client.clone(),
                &config.etcd_key_prefix,
                config.etcd_max_txn_ops,
            ));
            let legacy = Arc::new(EtcdLegacyStore::new(client.clone(), &config.etcd_legacy_prefix));
            AppState::new(store, registry, legacy, config.tagging.clone()).with_etcd(client)
        }
        BackendKind::Memory => {
            warn!("Using in-memory backend, membership is lost on restart");
            AppState::new(
                Arc::new(MemoryStore::new()),
                registry,
                Arc::new(MemoryLegacyStore::new()),
                config.tagging.clone(),
            )
        }
    }
    .with_metrics(metrics);

    let readiness = state.readiness.clone();
    let app = api::create_router(state);

    info!(bind_addr = %config.bind_addr, "Starting API server");
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    readiness.store(true, Ordering::Release);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    shutdown_tracing();
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
