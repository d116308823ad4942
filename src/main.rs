//! Multi-tenant tool gateway.
//!
//! # Architecture Overview
//!
//! ```text
//!   agent ──POST /tools/{*path}──▶ ┌──────────────────────────────────────────┐
//!                                  │ http: request id, trace, timeout, limits │
//!                                  └───────────────────┬──────────────────────┘
//!                                                      ▼
//!        ┌─────────────────────────── pipeline ─────────────────────────────┐
//!        │ tenant → breaker → bucket → auth → key → scopes → input schema   │
//!        │   → idempotency replay → policy → handler → record → output     │
//!        └──────┬───────────────┬─────────────────┬───────────────┬─────────┘
//!               ▼               ▼                 ▼               ▼
//!          config snapshot   idempotency       SWR cache        outbox
//!          (ArcSwap, hot     (postgres →       (redis →        (postgres or
//!           reload)           redis → memory)   memory)          memory)
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;

use tool_gateway::config::{
    load_config, run_reload_loop, ConfigWatcher, GatewayConfig, SnapshotHandle,
};
use tool_gateway::handlers::HandlerSet;
use tool_gateway::http::{AppState, HttpServer};
use tool_gateway::lifecycle::{wait_for_signal, Shutdown};
use tool_gateway::observability::{logging, metrics};
use tool_gateway::pipeline::{Pipeline, PipelineSettings};
use tool_gateway::security::authenticator_from_config;
use tool_gateway::store::Stores;

#[derive(Parser)]
#[command(name = "tool-gateway", version, about = "Multi-tenant HTTP tool gateway")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long, env = "GATEWAY_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => GatewayConfig::default(),
    };

    logging::init_tracing(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "tool-gateway starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        manifest = ?config.paths.manifest,
        default_tenant = %config.pipeline.default_tenant,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let stores = Stores::connect(&config.stores).await;
    let snapshots = Arc::new(SnapshotHandle::load(config.paths.clone(), HandlerSet::builtin())?);
    let shutdown = Shutdown::new();

    // The watcher must outlive the server.
    let _watcher = if config.paths.watch {
        let (watcher, changes) = ConfigWatcher::new(&config.paths);
        tokio::spawn(run_reload_loop(Arc::clone(&snapshots), changes, shutdown.subscribe()));
        Some(watcher.run()?)
    } else {
        None
    };

    if config.auth.bypass {
        tracing::warn!("Authentication bypass is enabled; every caller is trusted");
    }
    let pipeline = Arc::new(Pipeline::new(
        snapshots,
        authenticator_from_config(&config.auth),
        stores,
        PipelineSettings::from(&config.pipeline),
    ));

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    let server = HttpServer::new(AppState::new(pipeline, config.admin.clone()), &config.listener);
    let server_task = tokio::spawn(server.run(listener, shutdown.subscribe()));

    let signal = wait_for_signal().await?;
    tracing::info!(signal, "Shutdown signal received");
    shutdown.trigger();

    server_task.await??;
    tracing::info!("Shutdown complete");
    Ok(())
}
