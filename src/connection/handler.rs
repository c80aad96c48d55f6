//! Connection Handler
//!
//! One handler task per client. The task owns the client's [`Session`] and
//! runs a read-parse-execute-respond loop until the client disconnects, sends
//! `QUIT`, or breaks the protocol.
//!
//! ## Connection Lifecycle
//!
//! ```text
//! 1. Client connects, handler task spawned with a fresh Session (db 0)
//!        │
//!        ▼
//! 2. ┌──────────────────────────────┐
//!    │      Main Loop               │
//!    │                              │
//!    │  Read bytes from socket      │
//!    │            │                 │
//!    │            ▼                 │
//!    │  Parse request words         │──── protocol error ──> -ERR, close
//!    │            │                 │
//!    │            ▼                 │
//!    │  Execute against registry    │
//!    │            │                 │
//!    │            ▼                 │
//!    │  Send reply                  │──── QUIT ──> close
//!    │            │                 │
//!    │       [Loop back]            │
//!    └──────────────────────────────┘
//!        │
//!        ▼
//! 3. Client disconnects, Session dropped
//! ```
//!
//! Replies are written in request order. Pipelined requests that arrive in a
//! single read are answered one after another from the same buffer.

use crate::commands::{CommandHandler, Session};
use crate::protocol::{ParseError, Reply, RequestParser};
use bytes::{Bytes, BytesMut};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;
use tracing::{debug, error, info, trace, warn};

/// Maximum bytes buffered beyond what length headers account for (64 KB)
const MAX_BUFFER_SIZE: usize = 64 * 1024;

/// Initial buffer capacity
const INITIAL_BUFFER_SIZE: usize = 4096;

/// Server-wide connection counters.
#[derive(Debug, Default)]
pub struct ConnectionStats {
    /// Total number of connections accepted
    pub connections_accepted: AtomicU64,
    /// Currently active connections
    pub active_connections: AtomicU64,
    /// Total requests answered
    pub commands_processed: AtomicU64,
    /// Requests answered with an error reply
    pub command_errors: AtomicU64,
    /// Connections closed because of malformed input
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

    pub fn command_processed(&self, reply: &Reply) {
        self.commands_processed.fetch_add(1, Ordering::Relaxed);
        if reply.is_error() {
            self.command_errors.fetch_add(1, Ordering::Relaxed);
        }
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

/// Handles a single client connection.
pub struct ConnectionHandler {
    stream: BufWriter<TcpStream>,

    /// Client's address (for logging)
    addr: SocketAddr,

    /// Bytes received but not yet parsed
    buffer: BytesMut,

    /// Selected database and close flag for this client
    session: Session,

    command_handler: CommandHandler,

    parser: RequestParser,

    /// Connection statistics (shared)
    stats: Arc<ConnectionStats>,
}

impl ConnectionHandler {
    /// Creates a new connection handler with a fresh session.
    pub fn new(
        stream: TcpStream,
        addr: SocketAddr,
        command_handler: CommandHandler,
        stats: Arc<ConnectionStats>,
    ) -> Self {
        stats.connection_opened();

        Self {
            stream: BufWriter::new(stream),
            addr,
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_SIZE),
            session: Session::new(),
            command_handler,
            parser: RequestParser::new(),
            stats,
        }
    }

    /// Runs the connection until the client leaves or an error occurs.
    pub async fn run(mut self) -> Result<(), ConnectionError> {
        info!(client = %self.addr, "Client connected");

        let result = self.main_loop().await;

        match &result {
            Ok(()) => info!(client = %self.addr, "Client disconnected gracefully"),
            Err(ConnectionError::ClientDisconnected) => {
                debug!(client = %self.addr, "Client disconnected")
            }
            Err(ConnectionError::IoError(io_err))
                if io_err.kind() == std::io::ErrorKind::ConnectionReset =>
            {
                debug!(client = %self.addr, "Connection reset by client")
            }
            Err(e) => warn!(client = %self.addr, error = %e, "Connection error"),
        }

        self.stats.connection_closed();
        result
    }

    /// The main read-execute-respond loop. Returns `Ok` after `QUIT`.
    async fn main_loop(&mut self) -> Result<(), ConnectionError> {
        loop {
            while let Some(words) = self.next_request().await? {
                let reply = self.command_handler.execute(&mut self.session, words);
                self.stats.command_processed(&reply);
                self.send_response(&reply).await?;

                if self.session.is_closing() {
                    return Ok(());
                }
            }

            self.read_more_data().await?;
        }
    }

    /// Parses the next buffered request.
    ///
    /// A protocol error is answered before it is returned, since the
    /// connection is closed right after.
    async fn next_request(&mut self) -> Result<Option<Vec<Bytes>>, ConnectionError> {
        match self.try_parse_request() {
            Ok(words) => Ok(words),
            Err(e) => {
                self.stats.protocol_error();
                let reply = Reply::error(format!("ERR Protocol error: {}", e));
                self.send_response(&reply).await?;
                Err(ConnectionError::ParseError(e))
            }
        }
    }

    fn try_parse_request(&mut self) -> Result<Option<Vec<Bytes>>, ParseError> {
        if self.buffer.is_empty() {
            return Ok(None);
        }

        match self.parser.parse(&self.buffer) {
            Ok(Some((words, consumed))) => {
                let _ = self.buffer.split_to(consumed);
                trace!(
                    client = %self.addr,
                    consumed = consumed,
                    remaining = self.buffer.len(),
                    "Parsed request"
                );
                Ok(Some(words))
            }
            Ok(None) => {
                trace!(
                    client = %self.addr,
                    buffered = self.buffer.len(),
                    "Incomplete request, need more data"
                );
                Ok(None)
            }
            Err(e) => {
                warn!(client = %self.addr, error = %e, "Protocol error");
                Err(e)
            }
        }
    }

    /// Reads more data from the socket into the buffer.
    ///
    /// Bytes covered by a received length header may grow the buffer up to
    /// that length. At most `MAX_BUFFER_SIZE` further bytes may sit in the
    /// buffer without a header accounting for them.
    async fn read_more_data(&mut self) -> Result<(), ConnectionError> {
        let framed = self.parser.framed_len(&self.buffer);
        if self.buffer.len() >= framed + MAX_BUFFER_SIZE {
            error!(
                client = %self.addr,
                size = self.buffer.len(),
                "Buffer size limit exceeded"
            );
            self.stats.protocol_error();
            let reply = Reply::error("ERR Protocol error: too big request without length header");
            self.send_response(&reply).await?;
            return Err(ConnectionError::BufferFull);
        }

        if self.buffer.capacity() - self.buffer.len() < 1024 {
            let pending = framed.saturating_sub(self.buffer.len());
            self.buffer.reserve(pending.clamp(4096, MAX_BUFFER_SIZE));
        }

        let n = self.stream.get_mut().read_buf(&mut self.buffer).await?;

        if n == 0 {
            if self.buffer.is_empty() {
                return Err(ConnectionError::ClientDisconnected);
            }
            return Err(ConnectionError::UnexpectedEof);
        }

        self.stats.bytes_read(n);
        trace!(client = %self.addr, bytes = n, "Read data");

        Ok(())
    }

    async fn send_response(&mut self, reply: &Reply) -> Result<(), ConnectionError> {
        let bytes = reply.serialize();
        self.stream.write_all(&bytes).await?;
        self.stream.flush().await?;
        self.stats.bytes_written(bytes.len());
        trace!(client = %self.addr, bytes = bytes.len(), "Sent reply");
        Ok(())
    }
}

/// Errors that end a connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Malformed request; the client was sent `-ERR Protocol error`
    #[error("Parse error: {0}")]
    ParseError(#[from] ParseError),

    #[error("Client disconnected")]
    ClientDisconnected,

    /// Stream closed in the middle of a request
    #[error("Unexpected end of stream")]
    UnexpectedEof,

    /// Unframed data outgrew the buffer; the client was sent `-ERR Protocol error`
    #[error("Buffer size limit exceeded")]
    BufferFull,
}

/// Creates a [`ConnectionHandler`] and runs it to completion.
pub async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    command_handler: CommandHandler,
    stats: Arc<ConnectionStats>,
) {
    let handler = ConnectionHandler::new(stream, addr, command_handler, stats);
    if let Err(e) = handler.run().await {
        match e {
            ConnectionError::ClientDisconnected => {}
            ConnectionError::IoError(ref io_err)
                if io_err.kind() == std::io::ErrorKind::ConnectionReset => {}
            _ => {
                debug!(client = %addr, error = %e, "Connection ended with error");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::DatabaseRegistry;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::time::{timeout, Duration};

    async fn create_test_server() -> (SocketAddr, Arc<DatabaseRegistry>, Arc<ConnectionStats>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let registry = Arc::new(DatabaseRegistry::new());
        let stats = Arc::new(ConnectionStats::new());

        let handler = CommandHandler::with_stats(Arc::clone(&registry), Arc::clone(&stats));
        let stats_clone = Arc::clone(&stats);

        tokio::spawn(async move {
            while let Ok((stream, client_addr)) = listener.accept().await {
                let stats = Arc::clone(&stats_clone);
                tokio::spawn(handle_connection(
                    stream,
                    client_addr,
                    handler.clone(),
                    stats,
                ));
            }
        });

        (addr, registry, stats)
    }

    /// Encodes words as a RESP array of bulk strings.
    fn encode(words: &[&str]) -> Vec<u8> {
        let mut out = format!("*{}\r\n", words.len()).into_bytes();
        for word in words {
            out.extend_from_slice(format!("${}\r\n{}\r\n", word.len(), word).as_bytes());
        }
        out
    }

    /// Reads exactly `len` reply bytes, failing after two seconds.
    async fn read_exact_reply(client: &mut TcpStream, len: usize) -> Vec<u8> {
        let mut buf = vec![0u8; len];
        timeout(Duration::from_secs(2), client.read_exact(&mut buf))
            .await
            .expect("reply timed out")
            .unwrap();
        buf
    }

    async fn roundtrip(client: &mut TcpStream, words: &[&str], expected: &[u8]) {
        client.write_all(&encode(words)).await.unwrap();
        let reply = read_exact_reply(client, expected.len()).await;
        assert_eq!(
            String::from_utf8_lossy(&reply),
            String::from_utf8_lossy(expected)
        );
    }

    #[tokio::test]
    async fn test_ping_pong() {
        let (addr, _, _) = create_test_server().await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        client.write_all(b"*1\r\n$4\r\nPING\r\n").await.unwrap();

        let mut buf = [0u8; 64];
        let n = client.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"+PONG\r\n");
    }

    #[tokio::test]
    async fn test_inline_ping() {
        let (addr, _, _) = create_test_server().await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        client.write_all(b"PING\r\n").await.unwrap();
        let reply = read_exact_reply(&mut client, 7).await;
        assert_eq!(&reply, b"+PONG\r\n");
    }

    #[tokio::test]
    async fn test_set_get_longest_prefix() {
        let (addr, _, _) = create_test_server().await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        roundtrip(&mut client, &["SET", "10.0.0.0/8", "A"], b"+OK\r\n").await;
        roundtrip(&mut client, &["SET", "10.1.0.0/16", "B"], b"+OK\r\n").await;
        roundtrip(&mut client, &["GET", "10.1.2.3"], b"$1\r\nB\r\n").await;
        roundtrip(&mut client, &["GET", "10.2.0.1"], b"$1\r\nA\r\n").await;
        roundtrip(&mut client, &["GET", "11.0.0.1"], b"$-1\r\n").await;
        roundtrip(&mut client, &["DBSIZE"], b":2\r\n").await;
    }

    #[tokio::test]
    async fn test_pipelined_requests() {
        let (addr, _, _) = create_test_server().await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        let mut batch = encode(&["SET", "10.0.0.0/8", "v1"]);
        batch.extend(encode(&["SET", "2001:db8::/32", "v2"]));
        batch.extend(encode(&["GET", "10.9.9.9"]));
        batch.extend(encode(&["GET", "2001:db8::1"]));
        client.write_all(&batch).await.unwrap();

        let expected = b"+OK\r\n+OK\r\n$2\r\nv1\r\n$2\r\nv2\r\n";
        let reply = read_exact_reply(&mut client, expected.len()).await;
        assert_eq!(&reply, expected);
    }

    #[tokio::test]
    async fn test_value_larger_than_buffer() {
        let (addr, _, _) = create_test_server().await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        let value = "x".repeat(100_000);
        roundtrip(&mut client, &["SET", "10.0.0.0/8", value.as_str()], b"+OK\r\n").await;

        let mut expected = b"$100000\r\n".to_vec();
        expected.extend_from_slice(value.as_bytes());
        expected.extend_from_slice(b"\r\n");
        roundtrip(&mut client, &["GET", "10.1.2.3"], &expected).await;

        // Connection still usable afterwards
        roundtrip(&mut client, &["PING"], b"+PONG\r\n").await;
    }

    #[tokio::test]
    async fn test_oversized_inline_request_is_rejected() {
        let (addr, _, stats) = create_test_server().await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        client.write_all(&vec![b'a'; MAX_BUFFER_SIZE]).await.unwrap();

        let mut received = Vec::new();
        timeout(Duration::from_secs(2), client.read_to_end(&mut received))
            .await
            .expect("server did not close")
            .unwrap();

        let text = String::from_utf8_lossy(&received);
        assert!(text.starts_with("-ERR Protocol error: "), "got {text:?}");
        assert_eq!(stats.protocol_errors.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_select_isolation_across_connections() {
        let (addr, registry, _) = create_test_server().await;
        let mut first = TcpStream::connect(addr).await.unwrap();
        let mut second = TcpStream::connect(addr).await.unwrap();

        roundtrip(&mut second, &["SELECT", "1"], b"+OK\r\n").await;
        roundtrip(&mut first, &["SET", "10.0.0.0/8", "zero"], b"+OK\r\n").await;
        roundtrip(&mut second, &["GET", "10.0.0.1"], b"$-1\r\n").await;
        roundtrip(&mut second, &["SET", "10.0.0.0/8", "one"], b"+OK\r\n").await;
        roundtrip(&mut first, &["GET", "10.0.0.1"], b"$4\r\nzero\r\n").await;

        // Selection is per connection: a new client starts on db 0
        let mut third = TcpStream::connect(addr).await.unwrap();
        roundtrip(&mut third, &["GET", "10.0.0.1"], b"$4\r\nzero\r\n").await;

        assert_eq!(registry.snapshot(), vec![(0, 1), (1, 1)]);
    }

    #[tokio::test]
    async fn test_command_error_keeps_connection() {
        let (addr, _, stats) = create_test_server().await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        roundtrip(
            &mut client,
            &["SET", "10.0.0.0/8"],
            b"-ERR wrong number of arguments for 'SET' command\r\n",
        )
        .await;
        roundtrip(&mut client, &["PING"], b"+PONG\r\n").await;

        assert_eq!(stats.command_errors.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_quit_closes_connection() {
        let (addr, _, _) = create_test_server().await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        roundtrip(&mut client, &["QUIT"], b"+OK\r\n").await;

        let mut buf = [0u8; 16];
        let n = timeout(Duration::from_secs(2), client.read(&mut buf))
            .await
            .expect("server did not close")
            .unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn test_protocol_error_closes_connection() {
        let (addr, _, stats) = create_test_server().await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        client.write_all(b"*1\r\n:5\r\n").await.unwrap();

        let mut received = Vec::new();
        timeout(Duration::from_secs(2), client.read_to_end(&mut received))
            .await
            .expect("server did not close")
            .unwrap();

        let text = String::from_utf8_lossy(&received);
        assert!(text.starts_with("-ERR Protocol error: "), "got {text:?}");
        assert!(text.ends_with("\r\n"));
        assert_eq!(stats.protocol_errors.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_connection_stats() {
        let (addr, _, stats) = create_test_server().await;

        assert_eq!(stats.active_connections.load(Ordering::Relaxed), 0);

        let mut client = TcpStream::connect(addr).await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(stats.connections_accepted.load(Ordering::Relaxed), 1);
        assert_eq!(stats.active_connections.load(Ordering::Relaxed), 1);

        roundtrip(&mut client, &["PING"], b"+PONG\r\n").await;

        assert!(stats.commands_processed.load(Ordering::Relaxed) >= 1);
        assert!(stats.bytes_read.load(Ordering::Relaxed) > 0);
        assert!(stats.bytes_written.load(Ordering::Relaxed) > 0);

        drop(client);
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(stats.active_connections.load(Ordering::Relaxed), 0);
    }
}
