//! Client Connections
//!
//! One Tokio task per accepted socket. The task owns a [`ConnectionHandler`],
//! which owns the connection's parser, and runs until the peer goes away.
//!
//! ```text
//!   socket ──read──> RespParser::feed ──tokens──> CommandHandler
//!      ▲                                              │
//!      └──── flush ◄── BufWriter ◄── pooled reply ◄───┘
//! ```
//!
//! A read may carry a fragment of a command or a whole pipeline; replies for
//! everything completed by one read go out in a single flush. A malformed
//! request gets `-ERR Protocol error: ...` and the connection stays open.
//!
//! ```no_run
//! use redkite::config::ServerConfig;
//! use redkite::connection::handle_connection;
//! use redkite::server::ServerContext;
//! use tokio::net::TcpListener;
//!
//! # #[tokio::main]
//! # async fn main() -> std::io::Result<()> {
//! let ctx = ServerContext::new(ServerConfig::default());
//! let listener = TcpListener::bind("127.0.0.1:6379").await?;
//!
//! let (stream, _addr) = listener.accept().await?;
//! tokio::spawn(handle_connection(stream, ctx.clone()));
//! # Ok(())
//! # }
//! ```

pub mod handler;

pub use handler::{handle_connection, ConnectionError, ConnectionHandler};
