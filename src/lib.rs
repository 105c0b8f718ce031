//! # Redkite - An In-Memory Key-Value Server with Expiry and Snapshots
//!
//! Redkite speaks the RESP protocol, keeps string values in memory, expires
//! keys that carry a time-to-live, and periodically snapshots the dataset to
//! a JSON file according to configurable save rules.
//!
//! ## Layout
//!
//! ```text
//!  client ──TCP──> server::run ──spawn──> connection ──tokens──> CommandHandler
//!                                                                     │
//!                                                                     ▼
//!   ExpirySweeper ──purge / sample──>  Db { persistent, volatile, ttl index }
//!                                                                     ▲
//!   SnapshotManager ──save rules, JSON file──────────────────────────┘
//! ```
//!
//! ## Running a server
//!
//! ```no_run
//! use redkite::config::ServerConfig;
//! use redkite::server::{self, ServerContext};
//! use redkite::storage::ExpirySweeper;
//! use tokio::net::TcpListener;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let ctx = ServerContext::new(ServerConfig::default());
//!     ctx.snapshots.load_initial()?;
//!
//!     let sweeper = ExpirySweeper::start(ctx.db.clone());
//!     ctx.snapshots.start();
//!
//!     let listener = TcpListener::bind(ctx.config.bind_address()).await?;
//!     server::run(listener, ctx.clone(), tokio::signal::ctrl_c()).await;
//!
//!     sweeper.stop();
//!     ctx.shutdown();
//!     Ok(())
//! }
//! ```
//!
//! ## Supported Commands
//!
//! - `PING [message]`, `ECHO message`
//! - `SET key value [EX seconds | PX milliseconds]`, `GET key`
//! - `DEL key [key ...]`, `EXISTS key [key ...]`
//! - `EXPIRE key seconds`, `PEXPIRE key milliseconds`
//! - `TTL key`, `PTTL key`, `PERSIST key`
//! - `DBSIZE`, `CONFIG GET pattern`, `SAVE`, `LASTSAVE`, `COMMAND`
//!
//! ## Modules
//!
//! - [`protocol`]: RESP parser, value types and reply buffer pool
//! - [`storage`]: the two-region store, TTL index and expiry sweeper
//! - [`persistence`]: save rules and the snapshot manager
//! - [`commands`]: command dispatch
//! - [`connection`]: per-client read/execute/write loop
//! - [`server`]: shared context and the accept loop
//! - [`config`]: command line and environment configuration
//!
//! ## Expiry
//!
//! Keys with a TTL are removed in three ways:
//! 1. **Passive**: an access that finds the key past its deadline deletes it
//! 2. **Active**: a background task sleeps until the earliest deadline
//! 3. **Sampling**: a periodic tick checks a random sample of volatile keys
//!    and, once enough expired keys have been seen, sweeps a bounded batch
//!    in deadline order

pub mod commands;
pub mod config;
pub mod connection;
pub mod persistence;
pub mod protocol;
pub mod server;
pub mod storage;

pub use commands::CommandHandler;
pub use config::ServerConfig;
pub use connection::handle_connection;
pub use persistence::{SaveRule, SnapshotManager};
pub use protocol::{ParseError, RespParser, RespValue};
pub use server::ServerContext;
pub use storage::{Db, ExpiryConfig, ExpirySweeper};

/// Port used when none is configured.
pub const DEFAULT_PORT: u16 = 6379;

/// Address used when none is configured.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Crate version, reported at startup.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
