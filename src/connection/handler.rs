//! Connection Handler Module
//!
//! This module handles individual client sessions. Each client gets its own
//! task that greets it, then loops reading one command, executing it and
//! writing its envelope, until the client says `BYE` or goes away.
//!
//! ## Session Lifecycle
//!
//! ```text
//! 1. Client connects
//!        │
//!        ▼
//! 2. Greeting "btd <version>" sent
//!        │
//!        ▼
//! 3. ┌──────────────────────────────┐
//!    │      Main Loop               │
//!    │                              │
//!    │  ┌─────────────────────────┐ │
//!    │  │ Read verb token         │─┼──> end of stream: close, no reply
//!    │  └───────────┬─────────────┘ │
//!    │              ▼               │
//!    │  ┌─────────────────────────┐ │
//!    │  │ Execute command         │ │
//!    │  └───────────┬─────────────┘ │
//!    │              ▼               │
//!    │  ┌─────────────────────────┐ │
//!    │  │ Send envelope           │─┼──> BYE: close after sending
//!    │  └───────────┬─────────────┘ │
//!    │              ▼               │
//!    │         [Loop back]          │
//!    └──────────────────────────────┘
//! ```
//!
//! Only one command is ever in flight: the next verb is not read until the
//! previous envelope has been flushed.

use crate::commands::{CommandHandler, Outcome};
use crate::protocol::{greeting, ProtocolReader, Reply};
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, BufWriter, ReadHalf, WriteHalf};
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
    /// Total bytes read
    pub bytes_read: AtomicU64,
    /// Total bytes written
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

    pub fn bytes_read(&self, count: u64) {
        self.bytes_read.fetch_add(count, Ordering::Relaxed);
    }

    pub fn bytes_written(&self, count: usize) {
        self.bytes_written
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn active(&self) -> u64 {
        self.active_connections.load(Ordering::Relaxed)
    }
}

/// Handles a single client session.
///
/// Generic over the byte stream so the same loop serves TCP, Unix domain
/// sockets and in-memory pipes.
pub struct ConnectionHandler<S> {
    /// Client half, tokenized
    reader: ProtocolReader<BufReader<ReadHalf<S>>>,

    /// Server half, flushed after every envelope
    writer: BufWriter<WriteHalf<S>>,

    /// Client's address (for logging)
    peer: String,

    /// The command handler (shared store inside)
    command_handler: CommandHandler,

    /// Connection statistics (shared)
    stats: Arc<ConnectionStats>,
}

impl<S> ConnectionHandler<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Creates a new connection handler.
    ///
    /// # Arguments
    ///
    /// * `stream` - The client stream
    /// * `peer` - Printable client address
    /// * `command_handler` - The command handler for executing commands
    /// * `stats` - Shared connection statistics
    /// * `read_timeout` - Idle limit for a single read
    pub fn new(
        stream: S,
        peer: impl Into<String>,
        command_handler: CommandHandler,
        stats: Arc<ConnectionStats>,
        read_timeout: Option<Duration>,
    ) -> Self {
        stats.connection_opened();

        let (read_half, write_half) = tokio::io::split(stream);
        Self {
            reader: ProtocolReader::new(BufReader::new(read_half)).with_read_timeout(read_timeout),
            writer: BufWriter::new(write_half),
            peer: peer.into(),
            command_handler,
            stats,
        }
    }

    /// Runs the session until `BYE`, end of stream or an I/O error.
    pub async fn run(mut self) -> Result<(), ConnectionError> {
        info!(client = %self.peer, "Client connected");

        let result = self.main_loop().await;

        match &result {
            Ok(()) => info!(client = %self.peer, "Client said bye"),
            Err(ConnectionError::ClientDisconnected) => {
                info!(client = %self.peer, "Client disconnected")
            }
            Err(ConnectionError::Io(e)) if e.kind() == io::ErrorKind::ConnectionReset => {
                debug!(client = %self.peer, "Connection reset by client")
            }
            Err(e) => warn!(client = %self.peer, error = %e, "Session ended with error"),
        }

        // Best effort: the peer may already be gone
        let _ = self.writer.shutdown().await;
        result
    }

    /// The main read-execute-respond loop.
    async fn main_loop(&mut self) -> Result<(), ConnectionError> {
        self.send_raw(greeting().as_bytes()).await?;

        loop {
            let token = match self.reader.next_string().await {
                Ok(Some(token)) => token,
                Ok(None) => return Err(ConnectionError::ClientDisconnected),
                Err(e) => return Err(e.into()),
            };
            debug!(client = %self.peer, command = %token, "Parsed command");

            let outcome = self.command_handler.execute(&token, &mut self.reader).await?;
            self.stats.command_processed();

            match outcome {
                Outcome::Reply(reply) => self.send_reply(&reply).await?,
                Outcome::Silent => {}
                Outcome::Close(reply) => {
                    self.send_reply(&reply).await?;
                    return Ok(());
                }
                Outcome::Disconnected => return Err(ConnectionError::ClientDisconnected),
            }
        }
    }

    /// Sends an envelope to the client.
    async fn send_reply(&mut self, reply: &Reply) -> Result<(), ConnectionError> {
        self.send_raw(&reply.serialize()).await
    }

    async fn send_raw(&mut self, bytes: &[u8]) -> Result<(), ConnectionError> {
        self.writer.write_all(bytes).await?;
        self.writer.flush().await?;
        self.stats.bytes_written(bytes.len());
        trace!(
            client = %self.peer,
            bytes = bytes.len(),
            "Sent response"
        );
        Ok(())
    }
}

// Runs however the session ends, including an aborted or panicked task
impl<S> Drop for ConnectionHandler<S> {
    fn drop(&mut self) {
        self.stats.bytes_read(self.reader.bytes_consumed());
        self.stats.connection_closed();
    }
}

/// Errors that can occur while handling a connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// I/O error (network issue or read timeout)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Client went away without saying bye
    #[error("Client disconnected")]
    ClientDisconnected,
}

/// Handles a client session.
///
/// This is a convenience function that creates a ConnectionHandler
/// and runs it to completion.
pub async fn handle_connection<S>(
    stream: S,
    peer: String,
    command_handler: CommandHandler,
    stats: Arc<ConnectionStats>,
    read_timeout: Option<Duration>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let handler = ConnectionHandler::new(stream, peer.clone(), command_handler, stats, read_timeout);
    if let Err(e) = handler.run().await {
        match e {
            ConnectionError::ClientDisconnected => {}
            _ => debug!(client = %peer, error = %e, "Connection ended with error"),
        }
    }
}
