//! Payout Service Daemon
//!
//! Main entry point: loads configuration, opens the store, and serves the
//! HTTP API until shutdown.

use std::env;
use std::path::PathBuf;

use tracing::info;

use lib_store::PayoutStore;

use payoutd::api;
use payoutd::config::ServiceConfig;
use payoutd::engine::PayoutEngine;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    let filter = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args = parse_cli_args();

    let mut config = match &args.config {
        Some(path) => ServiceConfig::load(path)?,
        None => ServiceConfig::default(),
    };
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(db) = args.database_path {
        config.database_path = db;
    }

    info!("Starting payout service...");
    info!("  Database: {}", config.database_path);
    info!("  Listening on: {}:{}", config.bind_addr, config.port);
    info!("  Request timeout: {}s", config.request_timeout_secs);
    info!(
        "  Scheduler token: {}",
        if config.scheduler_token.is_some() { "configured" } else { "marker header only" }
    );

    let store = PayoutStore::open(&config.database_path).await?;
    let engine = PayoutEngine::new(store);
    let app = api::router(engine, &config);

    let listener = tokio::net::TcpListener::bind(config.socket_addr()?).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("Shutdown signal received, draining in-flight requests");
}

struct CliArgs {
    config: Option<PathBuf>,
    port: Option<u16>,
    database_path: Option<String>,
}

/// Parse command-line arguments
fn parse_cli_args() -> CliArgs {
    let args: Vec<String> = env::args().collect();

    let mut parsed = CliArgs {
        config: None,
        port: None,
        database_path: None,
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    parsed.config = Some(PathBuf::from(&args[i + 1]));
                    i += 2;
                } else {
                    i += 1;
                }
            }
            "--port" | "-p" => {
                if i + 1 < args.len() {
                    parsed.port = args[i + 1].parse().ok();
                    i += 2;
                } else {
                    i += 1;
                }
            }
            "--db" => {
                if i + 1 < args.len() {
                    parsed.database_path = Some(args[i + 1].clone());
                    i += 2;
                } else {
                    i += 1;
                }
            }
            _ => {
                i += 1;
            }
        }
    }

    parsed
}
