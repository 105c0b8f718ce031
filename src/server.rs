//! TCP Server
//!
//! [`ServerContext`] bundles everything a connection needs. It is built once
//! at startup and cloned into every connection task; there is no global
//! state.

use crate::config::ServerConfig;
use crate::connection::handle_connection;
use crate::persistence::SnapshotManager;
use crate::protocol::BufferPool;
use crate::storage::Db;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

/// Shared server state handed to every connection.
#[derive(Debug, Clone)]
pub struct ServerContext {
    /// The store
    pub db: Db,
    /// Snapshot manager attached to `db`
    pub snapshots: Arc<SnapshotManager>,
    /// Startup configuration
    pub config: Arc<ServerConfig>,
    /// Reply buffers shared by all connections
    pub pool: Arc<BufferPool>,
}

impl ServerContext {
    /// Creates an empty store and a snapshot manager attached to it.
    pub fn new(config: ServerConfig) -> Self {
        let db = Db::new();
        let snapshots = SnapshotManager::new(config.snapshot_config());
        snapshots.set_store(db.clone());

        Self {
            db,
            snapshots: Arc::new(snapshots),
            config: Arc::new(config),
            pool: Arc::new(BufferPool::default()),
        }
    }

    /// Stops automatic saves and writes a final snapshot when save rules
    /// are configured.
    pub fn shutdown(&self) {
        self.snapshots.stop();

        if self.snapshots.rules().is_empty() {
            return;
        }
        match self.snapshots.save_now() {
            Ok(keys) => info!(keys, "Final snapshot saved"),
            Err(e) => error!(error = %e, "Final snapshot failed"),
        }
    }
}

/// Accepts connections until `shutdown` completes.
pub async fn run(listener: TcpListener, ctx: ServerContext, shutdown: impl Future) {
    tokio::select! {
        _ = accept_loop(listener, ctx) => {}
        _ = shutdown => {
            info!("Shutdown signal received, stopping server...");
        }
    }
}

/// Main loop that accepts incoming connections
async fn accept_loop(listener: TcpListener, ctx: ServerContext) {
    loop {
        match listener.accept().await {
            Ok((stream, _addr)) => {
                tokio::spawn(handle_connection(stream, ctx.clone()));
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}
