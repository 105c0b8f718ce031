//! Redkite server entry point.
//!
//! Parses configuration, restores the last snapshot, starts the background
//! tasks and serves clients until Ctrl+C.

use clap::Parser;
use redkite::config::ServerConfig;
use redkite::persistence::LoadOutcome;
use redkite::server::{self, ServerContext};
use redkite::storage::ExpirySweeper;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::parse();

    // RUST_LOG overrides --log-level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(version = redkite::VERSION, "Redkite starting");

    let ctx = ServerContext::new(config);

    match ctx.snapshots.load_initial()? {
        LoadOutcome::NotFound => {
            info!(path = %ctx.snapshots.path().display(), "No snapshot found, starting empty")
        }
        LoadOutcome::Loaded(keys) => info!(keys, "Snapshot loaded"),
        LoadOutcome::Discarded => warn!("Snapshot was unreadable, starting empty"),
    }

    let sweeper = ExpirySweeper::start(ctx.db.clone());

    ctx.snapshots.start();

    let listener = TcpListener::bind(ctx.config.bind_address()).await?;
    info!("Listening on {}", ctx.config.bind_address());

    let shutdown = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    server::run(listener, ctx.clone(), shutdown).await;

    sweeper.stop();
    ctx.shutdown();

    info!("Server shutdown complete");
    Ok(())
}
