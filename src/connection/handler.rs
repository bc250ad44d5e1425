//! Per-Connection Loop
//!
//! Each accepted client gets its own task running
//! read frame → validate → dispatch → write reply, until the stream ends or
//! a protocol violation makes it impossible to keep reading.
//!
//! ## Connection Lifecycle
//!
//! ```text
//! 1. Client connects
//!        │
//!        ▼
//! 2. ConnectionHandler spawned
//!        │
//!        ▼
//! 3. ┌──────────────────────────────┐
//!    │  read_value()   (codec)      │◄──┐
//!    │  Request::from_frame()       │   │
//!    │  CommandHandler::execute()   │   │
//!    │  write_value()  (codec)      │───┘
//!    └──────────────────────────────┘
//!        │ EOF / protocol error / I/O error
//!        ▼
//! 4. Handler task ends, socket closed
//! ```
//!
//! Command failures (bad arity, bad SET option, unknown command) are normal
//! replies and keep the connection open. Only a malformed or truncated
//! frame, or a frame that is not an array of bulk strings, ends it.

use crate::commands::{CommandHandler, Request, RequestError};
use crate::protocol::{CodecError, RespCodec, RespValue};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::TcpStream;
use tracing::{debug, info, trace, warn};

/// Statistics for connection handling
#[derive(Debug, Default)]
pub struct ConnectionStats {
    /// Total number of connections accepted
    pub connections_accepted: AtomicU64,
    /// Currently active connections
    pub active_connections: AtomicU64,
    /// Total commands processed
    pub commands_processed: AtomicU64,
    /// Connections closed because of a protocol violation
    pub protocol_errors: AtomicU64,
    pub bytes_read: AtomicU64,
    pub bytes_written: AtomicU64,
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_opened(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn command_processed(&self) {
        self.commands_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn protocol_error(&self) {
        self.protocol_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bytes_read(&self, count: usize) {
        self.bytes_read.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn bytes_written(&self, count: usize) {
        self.bytes_written.fetch_add(count as u64, Ordering::Relaxed);
    }
}

/// Errors that end a connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// Reading or writing a frame failed
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// A well-formed frame that is not a command
    #[error("invalid request: {0}")]
    InvalidRequest(#[from] RequestError),
}

impl ConnectionError {
    /// True for errors caused by the client breaking the protocol, as
    /// opposed to the network going away.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            ConnectionError::InvalidRequest(_)
                | ConnectionError::Codec(CodecError::Parse(_))
                | ConnectionError::Codec(CodecError::BufferFull { .. })
        )
    }

    /// True when the peer simply went away.
    pub fn is_disconnect(&self) -> bool {
        match self {
            ConnectionError::Codec(CodecError::Closed) => true,
            ConnectionError::Codec(CodecError::Io(e)) => matches!(
                e.kind(),
                std::io::ErrorKind::ConnectionReset | std::io::ErrorKind::BrokenPipe
            ),
            _ => false,
        }
    }
}

/// Serves a single client connection.
pub struct ConnectionHandler {
    codec: RespCodec<TcpStream>,
    /// Client's address (for logging)
    addr: SocketAddr,
    command_handler: CommandHandler,
    stats: Arc<ConnectionStats>,
}

impl ConnectionHandler {
    pub fn new(
        stream: TcpStream,
        addr: SocketAddr,
        command_handler: CommandHandler,
        stats: Arc<ConnectionStats>,
    ) -> Self {
        stats.connection_opened();

        Self {
            codec: RespCodec::new(stream),
            addr,
            command_handler,
            stats,
        }
    }

    /// Runs the connection until the client leaves or breaks the protocol.
    pub async fn run(mut self) -> Result<(), ConnectionError> {
        info!(client = %self.addr, "Client connected");

        let result = self.main_loop().await;

        match &result {
            Ok(()) => info!(client = %self.addr, "Client disconnected"),
            Err(e) if e.is_disconnect() => {
                debug!(client = %self.addr, error = %e, "Connection dropped by client")
            }
            Err(e) if e.is_protocol_violation() => {
                self.stats.protocol_error();
                warn!(client = %self.addr, error = %e, "Protocol error, closing connection");
                self.reject(e).await;
            }
            Err(e) => warn!(client = %self.addr, error = %e, "Connection error"),
        }

        self.stats.connection_closed();
        result
    }

    async fn main_loop(&mut self) -> Result<(), ConnectionError> {
        loop {
            let (frame, consumed) = match self.codec.read_value().await {
                Ok(read) => read,
                Err(CodecError::Closed) => return Ok(()),
                Err(e) => return Err(e.into()),
            };
            self.stats.bytes_read(consumed);

            let request = Request::from_frame(frame)?;
            trace!(client = %self.addr, command = %request.name, args = request.args.len(), "Executing command");

            let response = self.command_handler.execute(&request);
            self.stats.command_processed();
            trace!(client = %self.addr, reply = %response, "Sending reply");

            let written = self.codec.write_value(&response).await?;
            self.stats.bytes_written(written);
        }
    }

    /// Best-effort error reply before the socket is dropped.
    async fn reject(&mut self, error: &ConnectionError) {
        let reply = RespValue::error(format!("ERR Protocol error: {}", error));
        match self.codec.write_value(&reply).await {
            Ok(written) => self.stats.bytes_written(written),
            Err(e) => trace!(client = %self.addr, error = %e, "Could not send protocol error"),
        }
    }
}

/// Creates a [`ConnectionHandler`] and runs it to completion.
pub async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    command_handler: CommandHandler,
    stats: Arc<ConnectionStats>,
) {
    let handler = ConnectionHandler::new(stream, addr, command_handler, stats);
    // Already logged inside run()
    let _ = handler.run().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StorageEngine;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::time::{sleep, Duration};

    async fn create_test_server() -> (SocketAddr, Arc<StorageEngine>, Arc<ConnectionStats>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let storage = Arc::new(StorageEngine::new());
        let stats = Arc::new(ConnectionStats::new());

        let storage_clone = Arc::clone(&storage);
        let stats_clone = Arc::clone(&stats);

        tokio::spawn(async move {
            while let Ok((stream, client_addr)) = listener.accept().await {
                let handler = CommandHandler::new(Arc::clone(&storage_clone));
                let stats = Arc::clone(&stats_clone);
                tokio::spawn(handle_connection(stream, client_addr, handler, stats));
            }
        });

        (addr, storage, stats)
    }

    async fn send(client: &mut TcpStream, request: &[u8], expected: &[u8]) {
        client.write_all(request).await.unwrap();
        let mut buf = vec![0u8; expected.len()];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(
            String::from_utf8_lossy(&buf),
            String::from_utf8_lossy(expected)
        );
    }

    async fn assert_closed(client: &mut TcpStream) {
        let mut buf = [0u8; 64];
        let n = client.read(&mut buf).await.unwrap_or(0);
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn test_ping_pong() {
        let (addr, _, _) = create_test_server().await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        send(&mut client, b"*1\r\n$4\r\nPING\r\n", b"+\"PONG\"\r\n").await;
        send(
            &mut client,
            b"*2\r\n$4\r\nPING\r\n$5\r\nhello\r\n",
            b"+\"hello\"\r\n",
        )
        .await;
    }

    #[tokio::test]
    async fn test_set_get() {
        let (addr, storage, _) = create_test_server().await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        send(
            &mut client,
            b"*3\r\n$3\r\nSET\r\n$4\r\nname\r\n$4\r\nembr\r\n",
            b"+\"OK\"\r\n",
        )
        .await;
        send(
            &mut client,
            b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n",
            b"$4\r\nembr\r\n",
        )
        .await;
        send(
            &mut client,
            b"*2\r\n$3\r\nGET\r\n$7\r\nmissing\r\n",
            b"$-1\r\n",
        )
        .await;

        assert_eq!(storage.len(), 1);
    }

    #[tokio::test]
    async fn test_pipelined_commands() {
        let (addr, _, _) = create_test_server().await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        send(
            &mut client,
            b"*3\r\n$3\r\nSET\r\n$2\r\nk1\r\n$2\r\nv1\r\n*3\r\n$3\r\nSET\r\n$2\r\nk2\r\n$2\r\nv2\r\n*2\r\n$3\r\nGET\r\n$2\r\nk1\r\n*2\r\n$3\r\nGET\r\n$2\r\nk2\r\n",
            b"+\"OK\"\r\n+\"OK\"\r\n$2\r\nv1\r\n$2\r\nv2\r\n",
        )
        .await;
    }

    #[tokio::test]
    async fn test_command_errors_keep_connection_open() {
        let (addr, _, _) = create_test_server().await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        send(
            &mut client,
            b"*1\r\n$3\r\nFOO\r\n",
            b"-ERR unknown command 'FOO'\r\n",
        )
        .await;
        send(
            &mut client,
            b"*5\r\n$3\r\nSET\r\n$1\r\na\r\n$1\r\n1\r\n$2\r\nEX\r\n$10\r\nnotanumber\r\n",
            b"-wrong value for argument 'EX'\r\n",
        )
        .await;
        send(
            &mut client,
            b"*3\r\n$4\r\nPING\r\n$1\r\na\r\n$1\r\nb\r\n",
            b"-wrong number of arguments for 'ping' command\r\n",
        )
        .await;
        send(&mut client, b"*1\r\n$4\r\nPING\r\n", b"+\"PONG\"\r\n").await;
    }

    #[tokio::test]
    async fn test_protocol_error_closes_connection() {
        let (addr, _, stats) = create_test_server().await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        send(
            &mut client,
            b"+PING\r\n",
            b"-ERR Protocol error: parse error: unknown type prefix: 0x2b\r\n",
        )
        .await;
        assert_closed(&mut client).await;

        sleep(Duration::from_millis(50)).await;
        assert_eq!(stats.protocol_errors.load(Ordering::Relaxed), 1);
        assert_eq!(stats.active_connections.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_non_command_frame_closes_connection() {
        let (addr, _, _) = create_test_server().await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        send(
            &mut client,
            b"*0\r\n",
            b"-ERR Protocol error: invalid request: empty command\r\n",
        )
        .await;
        assert_closed(&mut client).await;
    }

    #[tokio::test]
    async fn test_concurrent_clients_disjoint_keys() {
        let (addr, storage, _) = create_test_server().await;

        let clients: Vec<_> = (0..8)
            .map(|c| {
                tokio::spawn(async move {
                    let mut client = TcpStream::connect(addr).await.unwrap();
                    for i in 0..25 {
                        let key = format!("c{}-k{}", c, i);
                        let value = format!("v{}", i);
                        let set = RespValue::array(vec![
                            RespValue::bulk_string("SET"),
                            RespValue::bulk_string(key.clone()),
                            RespValue::bulk_string(value.clone()),
                        ]);
                        send(&mut client, &set.serialize(), b"+\"OK\"\r\n").await;

                        let get = RespValue::array(vec![
                            RespValue::bulk_string("GET"),
                            RespValue::bulk_string(key),
                        ]);
                        let expected = RespValue::bulk_string(value).serialize();
                        send(&mut client, &get.serialize(), &expected).await;
                    }
                })
            })
            .collect();

        for client in clients {
            client.await.unwrap();
        }

        assert_eq!(storage.len(), 200);
    }

    #[tokio::test]
    async fn test_connection_stats() {
        let (addr, _, stats) = create_test_server().await;

        assert_eq!(stats.active_connections.load(Ordering::Relaxed), 0);

        let mut client = TcpStream::connect(addr).await.unwrap();
        sleep(Duration::from_millis(50)).await;

        assert_eq!(stats.connections_accepted.load(Ordering::Relaxed), 1);
        assert_eq!(stats.active_connections.load(Ordering::Relaxed), 1);

        send(&mut client, b"*1\r\n$4\r\nPING\r\n", b"+\"PONG\"\r\n").await;
        sleep(Duration::from_millis(50)).await;

        assert_eq!(stats.commands_processed.load(Ordering::Relaxed), 1);
        assert_eq!(stats.bytes_read.load(Ordering::Relaxed), 14);
        assert_eq!(stats.bytes_written.load(Ordering::Relaxed), 9);

        drop(client);
        sleep(Duration::from_millis(50)).await;

        assert_eq!(stats.active_connections.load(Ordering::Relaxed), 0);
        assert_eq!(stats.protocol_errors.load(Ordering::Relaxed), 0);
    }
}
