//! Server Module
//!
//! Binds the configured socket, accepts clients and supervises their
//! sessions until a termination signal arrives.
//!
//! ## Architecture
//!
//! ```text
//!              ┌──────────────────────────────┐
//!  SIGINT ────>│                              │
//!  SIGTERM ───>│        control loop          │
//!              │        (tokio::select!)      │
//!              └──┬─────────────┬─────────────┘
//!                 │ accept()    │ join_next()
//!                 ▼             ▼
//!        ┌──────────────┐  ┌──────────────────┐
//!        │   Listener   │  │ JoinSet<session> │
//!        │ (TCP / Unix) │  │  reap + log      │
//!        └──────┬───────┘  └──────────────────┘
//!               │ spawn
//!               ▼
//!        ┌──────────────────┐
//!        │ ConnectionHandler│  one task per client
//!        └──────────────────┘
//! ```
//!
//! Sessions are isolated tasks: a session that blocks, fails or panics does
//! not affect its neighbours or the acceptor. When the loop ends, for
//! whatever reason, the [`Teardown`] sequence runs exactly once.

pub mod lifecycle;
pub mod listener;

pub use lifecycle::{log_session_exit, write_pidfile, ShutdownSignals, Teardown};
pub use listener::{ConnectionStream, Listener, ListenerError};

use crate::commands::{CommandHandler, CommandOptions};
use crate::config::{Config, SocketSpec};
use crate::connection::{handle_connection, ConnectionStats};
use crate::storage::BibStore;
use std::future::Future;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Errors that stop the server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error(transparent)]
    Listener(#[from] ListenerError),

    #[error("failed to install signal handlers: {0}")]
    Signal(#[source] io::Error),

    #[error("accept failed: {0}")]
    Accept(#[source] io::Error),
}

/// The btd daemon.
pub struct Server {
    sockets: Vec<SocketSpec>,
    read_timeout: Option<Duration>,
    shutdown_grace: Duration,
    handler: CommandHandler,
    store: Arc<BibStore>,
    stats: Arc<ConnectionStats>,
    teardown: Arc<Teardown>,
}

impl Server {
    pub fn new(config: &Config, store: Arc<BibStore>) -> Self {
        Self {
            sockets: config.sockets.clone(),
            read_timeout: config.read_timeout,
            shutdown_grace: config.shutdown_grace,
            handler: CommandHandler::new(Arc::clone(&store), CommandOptions::from(config)),
            store,
            stats: Arc::new(ConnectionStats::new()),
            teardown: Arc::new(Teardown::new()),
        }
    }

    pub fn stats(&self) -> Arc<ConnectionStats> {
        Arc::clone(&self.stats)
    }

    pub fn teardown(&self) -> Arc<Teardown> {
        Arc::clone(&self.teardown)
    }

    /// Runs until SIGINT or SIGTERM.
    pub async fn run(self) -> Result<(), ServerError> {
        let mut signals = match ShutdownSignals::install() {
            Ok(signals) => signals,
            Err(e) => {
                self.teardown
                    .run(None, &mut JoinSet::new(), &self.store, self.shutdown_grace)
                    .await;
                return Err(ServerError::Signal(e));
            }
        };
        self.run_until(async move {
            let name = signals.recv().await;
            info!(signal = name, "Shutdown signal received");
        })
        .await
    }

    /// Binds a candidate and serves until `shutdown` completes.
    ///
    /// When nothing can be bound, teardown still runs and the bind error is
    /// returned.
    pub async fn run_until<F>(self, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()>,
    {
        let listener = match Listener::bind(&self.sockets).await {
            Ok(listener) => listener,
            Err(e) => {
                error!(error = %e, "Giving up");
                self.teardown
                    .run(None, &mut JoinSet::new(), &self.store, self.shutdown_grace)
                    .await;
                return Err(e.into());
            }
        };
        self.serve(listener, shutdown).await
    }

    /// Accept loop over an already bound listener.
    pub async fn serve<F>(self, listener: Listener, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut sessions: JoinSet<()> = JoinSet::new();

        let result = loop {
            tokio::select! {
                _ = &mut shutdown => break Ok(()),

                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        debug!(client = %peer, active = self.stats.active(), "Accepted connection");
                        sessions.spawn(handle_connection(
                            stream,
                            peer,
                            self.handler.clone(),
                            Arc::clone(&self.stats),
                            self.read_timeout,
                        ));
                    }
                    Err(e) if is_transient(&e) => {
                        warn!(error = %e, "Failed to accept connection");
                    }
                    Err(e) => {
                        error!(error = %e, "Accept failed, stopping");
                        break Err(ServerError::Accept(e));
                    }
                },

                Some(finished) = sessions.join_next(), if !sessions.is_empty() => {
                    log_session_exit(finished);
                }
            }
        };

        self.teardown
            .run(Some(listener), &mut sessions, &self.store, self.shutdown_grace)
            .await;
        result
    }
}

/// Accept errors caused by a single client rather than the listener.
fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::TimedOut
    ) || e.raw_os_error() == Some(24) // EMFILE
        || e.raw_os_error() == Some(23) // ENFILE
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
    use tokio::net::{TcpStream, UnixStream};
    use tokio::sync::oneshot;

    fn config(sockets: Vec<SocketSpec>) -> Config {
        Config::builder()
            .sockets(sockets)
            .shutdown_grace(Duration::from_millis(200))
            .build()
    }

    async fn envelope<R: AsyncRead + Unpin>(reader: &mut BufReader<R>) -> String {
        let mut out = String::new();
        reader.read_line(&mut out).await.unwrap();
        reader.read_line(&mut out).await.unwrap();
        out
    }

    #[tokio::test]
    async fn test_tcp_session_and_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(BibStore::open(dir.path()).unwrap());
        let config = config(vec![SocketSpec::Tcp {
            host: "127.0.0.1".to_string(),
            port: 0,
        }]);

        let listener = Listener::bind(&config.sockets).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = Server::new(&config, Arc::clone(&store));
        let teardown = server.teardown();
        let (tx, rx) = oneshot::channel::<()>();
        let task = tokio::spawn(server.serve(listener, async {
            let _ = rx.await;
        }));

        let mut client = BufReader::new(TcpStream::connect(addr).await.unwrap());
        let mut greeting = String::new();
        client.read_line(&mut greeting).await.unwrap();
        assert!(greeting.starts_with("btd "));

        client.get_mut().write_all(b"NUM\n").await.unwrap();
        assert_eq!(envelope(&mut client).await, "0\n0\n");
        client.get_mut().write_all(b"BYE\n").await.unwrap();
        assert_eq!(envelope(&mut client).await, "0\nbye\n");

        tx.send(()).unwrap();
        task.await.unwrap().unwrap();
        assert!(teardown.is_done());
        assert!(store.is_closed());
        assert!(TcpStream::connect(addr).await.is_err());
    }

    #[tokio::test]
    async fn test_unix_sessions_are_independent() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(BibStore::open(dir.path().join("db")).unwrap());
        let path: PathBuf = dir.path().join("btd.sock");
        let config = config(vec![SocketSpec::Unix(path.clone())]);

        let server = Server::new(&config, Arc::clone(&store));
        let stats = server.stats();
        let (tx, rx) = oneshot::channel::<()>();
        let task = tokio::spawn(server.run_until(async {
            let _ = rx.await;
        }));

        // Wait for the socket node to appear
        let mut idle = loop {
            match UnixStream::connect(&path).await {
                Ok(stream) => break BufReader::new(stream),
                Err(_) => tokio::time::sleep(Duration::from_millis(10)).await,
            }
        };
        let mut line = String::new();
        idle.read_line(&mut line).await.unwrap();
        // A half-sent command must not stall other clients
        idle.get_mut().write_all(b"SHO").await.unwrap();

        let mut busy = BufReader::new(UnixStream::connect(&path).await.unwrap());
        line.clear();
        busy.read_line(&mut line).await.unwrap();
        busy.get_mut()
            .write_all(b"BIBTEX /x @misc{m1}\nNUM\n")
            .await
            .unwrap();
        assert_eq!(envelope(&mut busy).await, "0\nAdded with id: 1\n");
        assert_eq!(envelope(&mut busy).await, "0\n1\n");
        assert!(stats.active() >= 2);

        tx.send(()).unwrap();
        task.await.unwrap().unwrap();

        // The idle session was aborted after the grace period
        let mut rest = Vec::new();
        idle.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
        assert!(!path.exists());
        assert!(store.is_closed());
        assert_eq!(stats.active(), 0);
    }

    #[tokio::test]
    async fn test_sigterm_runs_teardown() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(BibStore::open(dir.path().join("db")).unwrap());
        let path = dir.path().join("term.sock");
        let config = config(vec![SocketSpec::Unix(path.clone())]);

        let server = Server::new(&config, Arc::clone(&store));
        let teardown = server.teardown();
        let task = tokio::spawn(server.run());

        // Handlers are installed before binding, so once a client gets in
        // the signal is caught rather than killing the test process
        let mut client = loop {
            match UnixStream::connect(&path).await {
                Ok(stream) => break BufReader::new(stream),
                Err(_) => tokio::time::sleep(Duration::from_millis(10)).await,
            }
        };
        let mut greeting = String::new();
        client.read_line(&mut greeting).await.unwrap();
        assert!(greeting.starts_with("btd "));

        let status = tokio::process::Command::new("kill")
            .args(["-TERM", &std::process::id().to_string()])
            .status()
            .await
            .unwrap();
        assert!(status.success());

        let result = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("server did not stop on SIGTERM")
            .unwrap();
        assert!(result.is_ok());
        assert!(teardown.is_done());
        assert!(!path.exists());
        assert!(store.is_closed());
    }

    #[tokio::test]
    async fn test_no_bindable_candidate_still_tears_down() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(BibStore::open(dir.path()).unwrap());
        let busy = dir.path().join("busy.sock");
        let _holder = tokio::net::UnixListener::bind(&busy).unwrap();

        let config = config(vec![SocketSpec::Unix(busy.clone())]);
        let server = Server::new(&config, Arc::clone(&store));
        let teardown = server.teardown();

        let result = server.run_until(std::future::pending()).await;
        assert!(matches!(
            result,
            Err(ServerError::Listener(ListenerError::Exhausted))
        ));
        assert!(teardown.is_done());
        assert!(store.is_closed());
        // Someone else's live socket is left alone
        assert!(busy.exists());
    }

    #[test]
    fn test_transient_accept_errors() {
        assert!(is_transient(&io::Error::from(io::ErrorKind::ConnectionAborted)));
        assert!(is_transient(&io::Error::from_raw_os_error(24)));
        assert!(!is_transient(&io::Error::from(io::ErrorKind::InvalidInput)));
    }
}
