//! Per-client read / execute / write loop.
//!
//! Each read is appended to the connection's [`RespParser`]. Every command
//! the read completes is executed in order and its reply is encoded into a
//! buffer borrowed from the shared [`BufferPool`]. Replies pile up in a
//! `BufWriter` and are flushed once per read, so a pipeline is answered with
//! one write.
//!
//! On a protocol error the commands completed before the bad byte still run,
//! then the client gets `-ERR Protocol error: ...`, the parser drops what it
//! buffered and the loop continues.

use crate::commands::CommandHandler;
use crate::protocol::{BufferPool, RespParser, RespValue};
use crate::server::ServerContext;
use bytes::{Bytes, BytesMut};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;
use tracing::{debug, info, trace, warn};

/// Bytes requested from the socket per read.
const READ_CHUNK_SIZE: usize = 16 * 1024;

/// State of one client connection, generic over the byte stream.
pub struct ConnectionHandler<S> {
    stream: BufWriter<S>,

    /// Peer address, for logs
    peer: String,

    /// Bytes of the last read
    chunk: BytesMut,

    command_handler: CommandHandler,

    /// RESP parser, owned by this connection
    parser: RespParser,

    /// Reply buffers shared by all connections
    pool: Arc<BufferPool>,
}

impl<S> ConnectionHandler<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// `peer` only labels log lines.
    pub fn new(stream: S, peer: impl Into<String>, ctx: ServerContext) -> Self {
        let pool = Arc::clone(&ctx.pool);
        Self {
            stream: BufWriter::new(stream),
            peer: peer.into(),
            chunk: BytesMut::with_capacity(READ_CHUNK_SIZE),
            command_handler: CommandHandler::new(ctx),
            parser: RespParser::new(),
            pool,
        }
    }

    /// Serves the client until it disconnects or an I/O error occurs.
    pub async fn run(mut self) -> Result<(), ConnectionError> {
        info!(client = %self.peer, "Client connected");

        let result = self.main_loop().await;

        match &result {
            Ok(()) => info!(client = %self.peer, "Client disconnected gracefully"),
            Err(ConnectionError::ClientDisconnected) => {
                debug!(client = %self.peer, "Client disconnected")
            }
            Err(ConnectionError::Io(io_err))
                if io_err.kind() == std::io::ErrorKind::ConnectionReset =>
            {
                debug!(client = %self.peer, "Connection reset by client")
            }
            Err(e) => warn!(client = %self.peer, error = %e, "Connection error"),
        }

        result
    }

    async fn main_loop(&mut self) -> Result<(), ConnectionError> {
        loop {
            self.read_more_data().await?;

            let mut commands: Vec<Vec<Bytes>> = Vec::new();
            let parsed = self
                .parser
                .feed(&self.chunk, |command| commands.push(command));

            // Commands completed before a protocol error still run.
            for command in &commands {
                let response = self.command_handler.execute(command);
                self.write_response(&response).await?;
            }

            if let Err(e) = parsed {
                warn!(client = %self.peer, error = %e, "Protocol error, discarding buffered input");
                self.parser.reset();
                let response = RespValue::error(format!("ERR Protocol error: {}", e));
                self.write_response(&response).await?;
            }

            self.stream.flush().await?;
            trace!(
                client = %self.peer,
                commands = commands.len(),
                buffered = self.parser.buffered(),
                "Replies flushed"
            );
        }
    }

    /// Reads the next chunk of data from the socket.
    async fn read_more_data(&mut self) -> Result<(), ConnectionError> {
        self.chunk.clear();
        let n = self.stream.get_mut().read_buf(&mut self.chunk).await?;

        if n == 0 {
            if self.parser.buffered() > 0 {
                debug!(
                    client = %self.peer,
                    buffered = self.parser.buffered(),
                    "Connection closed with a partial command"
                );
            }
            return Err(ConnectionError::ClientDisconnected);
        }

        trace!(client = %self.peer, bytes = n, "Read data");
        Ok(())
    }

    /// Buffers a response for the client.
    async fn write_response(&mut self, response: &RespValue) -> Result<(), ConnectionError> {
        let mut buf = self.pool.acquire(response.encoded_len_hint());
        response.serialize_into(&mut buf);
        let written = self.stream.write_all(&buf).await;
        self.pool.release(buf);
        written?;
        Ok(())
    }
}

/// Why a connection loop ended.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),

    /// Client closed the connection
    #[error("client closed the connection")]
    ClientDisconnected,
}

/// Serves one accepted TCP client to completion. How the connection ended
/// is logged by [`ConnectionHandler::run`].
pub async fn handle_connection(stream: TcpStream, ctx: ServerContext) {
    let peer = stream
        .peer_addr()
        .map_or_else(|_| "unknown".to_string(), |addr| addr.to_string());

    let _ = ConnectionHandler::new(stream, peer, ctx).run().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::protocol::encode_command;
    use std::net::SocketAddr;
    use tempfile::TempDir;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio_test::io::Builder;

    fn test_context() -> (ServerContext, TempDir) {
        let dir = TempDir::new().unwrap();
        let config = ServerConfig {
            dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        (ServerContext::new(config), dir)
    }

    async fn create_test_server() -> (SocketAddr, ServerContext, TempDir) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (ctx, dir) = test_context();

        let server_ctx = ctx.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(handle_connection(stream, server_ctx.clone()));
            }
        });

        (addr, ctx, dir)
    }

    async fn read_exactly(client: &mut TcpStream, len: usize) -> Vec<u8> {
        let mut buf = vec![0u8; len];
        tokio::time::timeout(
            tokio::time::Duration::from_secs(2),
            client.read_exact(&mut buf),
        )
        .await
        .unwrap()
        .unwrap();
        buf
    }

    #[tokio::test]
    async fn test_ping_pong() {
        let (addr, _ctx, _dir) = create_test_server().await;

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"*1\r\n$4\r\nPING\r\n").await.unwrap();

        assert_eq!(read_exactly(&mut client, 7).await, b"+PONG\r\n");
    }

    #[tokio::test]
    async fn test_set_get() {
        let (addr, ctx, _dir) = create_test_server().await;

        let mut client = TcpStream::connect(addr).await.unwrap();

        client
            .write_all(&encode_command(&["SET", "name", "kite"]))
            .await
            .unwrap();
        assert_eq!(read_exactly(&mut client, 5).await, b"+OK\r\n");

        client
            .write_all(&encode_command(&["GET", "name"]))
            .await
            .unwrap();
        assert_eq!(read_exactly(&mut client, 10).await, b"$4\r\nkite\r\n");

        assert_eq!(ctx.db.get("name"), Some(Bytes::from("kite")));
    }

    #[tokio::test]
    async fn test_multiple_commands() {
        let (addr, _ctx, _dir) = create_test_server().await;

        let mut client = TcpStream::connect(addr).await.unwrap();

        // Pipelining: four commands in one write
        let mut pipeline = Vec::new();
        pipeline.extend(encode_command(&["SET", "k1", "v1"]));
        pipeline.extend(encode_command(&["SET", "k2", "v2"]));
        pipeline.extend(encode_command(&["GET", "k1"]));
        pipeline.extend(encode_command(&["GET", "k2"]));
        client.write_all(&pipeline).await.unwrap();

        let expected = b"+OK\r\n+OK\r\n$2\r\nv1\r\n$2\r\nv2\r\n";
        assert_eq!(read_exactly(&mut client, expected.len()).await, expected);
    }

    #[tokio::test]
    async fn test_command_split_across_reads() {
        let (ctx, _dir) = test_context();
        let stream = Builder::new()
            .read(b"*3\r\n$3\r\nSET\r\n$5\r\nco")
            .read(b"lor\r\n$3\r\nre")
            .read(b"d\r\n")
            .write(b"+OK\r\n")
            .build();

        let result = ConnectionHandler::new(stream, "mock", ctx.clone()).run().await;

        assert!(matches!(result, Err(ConnectionError::ClientDisconnected)));
        assert_eq!(ctx.db.get("color"), Some(Bytes::from("red")));
    }

    #[tokio::test]
    async fn test_protocol_error_then_recovery() {
        let (ctx, _dir) = test_context();
        let stream = Builder::new()
            .read(b"*1\r\n$4\r\nPING\r\n?bad\r\n")
            .write(b"+PONG\r\n")
            .write(b"-ERR Protocol error: Unknown RESP type byte: 0x3f\r\n")
            .read(b"*1\r\n$4\r\nPING\r\n")
            .write(b"+PONG\r\n")
            .build();

        let result = ConnectionHandler::new(stream, "mock", ctx).run().await;
        assert!(matches!(result, Err(ConnectionError::ClientDisconnected)));
    }

    #[tokio::test]
    async fn test_null_bulk_and_del_count() {
        let (ctx, _dir) = test_context();
        ctx.db.set("a".to_string(), Bytes::from("1"), None);

        let mut input = encode_command(&["GET", "nonexistingkey"]);
        input.extend(encode_command(&["DEL", "a", "b"]));

        let stream = Builder::new()
            .read(&input)
            .write(b"$-1\r\n:1\r\n")
            .build();

        let result = ConnectionHandler::new(stream, "mock", ctx).run().await;
        assert!(matches!(result, Err(ConnectionError::ClientDisconnected)));
    }

    #[tokio::test]
    async fn test_reply_buffers_return_to_pool() {
        let (addr, ctx, _dir) = create_test_server().await;

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"*1\r\n$4\r\nPING\r\n").await.unwrap();
        let _ = read_exactly(&mut client, 7).await;

        assert_eq!(ctx.pool.idle_counts()[0], 1);
    }

    #[tokio::test]
    async fn test_handle_connection_returns_when_client_leaves() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (ctx, _dir) = test_context();

        let mut client = TcpStream::connect(addr).await.unwrap();
        let (stream, _) = listener.accept().await.unwrap();
        let served = tokio::spawn(handle_connection(stream, ctx));

        client.write_all(&encode_command(&["PING"])).await.unwrap();
        assert_eq!(read_exactly(&mut client, 7).await, b"+PONG\r\n");
        drop(client);

        tokio::time::timeout(tokio::time::Duration::from_secs(2), served)
            .await
            .unwrap()
            .unwrap();
    }
}
