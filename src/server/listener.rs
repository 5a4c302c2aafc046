//! Listening socket for btd.
//!
//! The configuration gives an ordered list of candidates. Each one is tried
//! in turn and the first address that binds wins; a failure is logged and
//! the next candidate is tried. A TCP candidate may resolve to several
//! addresses, which are tried in resolution order.

use crate::config::SocketSpec;
use std::fs;
use std::io;
use std::net::SocketAddr;
use std::os::unix::fs::FileTypeExt;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{TcpListener, TcpStream, UnixListener, UnixStream};
use tracing::{debug, info, warn};

/// Errors raised while binding a candidate.
#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    #[error("failed to resolve {host}:{port}: {source}")]
    Resolve {
        host: String,
        port: u16,
        #[source]
        source: io::Error,
    },

    #[error("{host}:{port} resolved to no addresses")]
    ResolveEmpty { host: String, port: u16 },

    #[error("failed to bind {addr}: {source}")]
    BindTcp {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("failed to bind unix socket {path}: {source}")]
    BindUnix {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("unix socket {path} is already in use")]
    UnixInUse { path: String },

    #[error("{path} exists and is not a socket")]
    UnixNotSocket { path: String },

    #[error("failed to inspect {path}: {source}")]
    UnixMetadata {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to remove stale socket {path}: {source}")]
    UnixCleanup {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to test unix socket {path}: {source}")]
    UnixConnect {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("no socket candidate could be bound")]
    Exhausted,
}

/// A bound listening socket.
#[derive(Debug)]
pub enum Listener {
    Tcp(TcpListener),
    Unix { listener: UnixListener, path: PathBuf },
}

impl Listener {
    /// Binds the first candidate that works.
    pub async fn bind(candidates: &[SocketSpec]) -> Result<Self, ListenerError> {
        for candidate in candidates {
            info!(candidate = %candidate, "Trying socket candidate");
            match Self::bind_one(candidate).await {
                Ok(listener) => {
                    info!(address = %listener.describe(), "Listening");
                    return Ok(listener);
                }
                Err(e) => warn!(candidate = %candidate, error = %e, "Could not bind candidate"),
            }
        }
        Err(ListenerError::Exhausted)
    }

    async fn bind_one(candidate: &SocketSpec) -> Result<Self, ListenerError> {
        match candidate {
            SocketSpec::Unix(path) => {
                let listener = bind_unix(path)?;
                Ok(Listener::Unix {
                    listener,
                    path: path.clone(),
                })
            }
            SocketSpec::Tcp { host, port } => bind_tcp(host, *port).await.map(Listener::Tcp),
        }
    }

    /// Accepts the next client.
    ///
    /// Returns the stream and a printable peer description.
    pub async fn accept(&self) -> io::Result<(ConnectionStream, String)> {
        match self {
            Listener::Tcp(listener) => {
                let (stream, addr) = listener.accept().await?;
                // Envelopes are small and flushed one at a time
                stream.set_nodelay(true)?;
                Ok((ConnectionStream::Tcp(stream), addr.to_string()))
            }
            Listener::Unix { listener, path } => {
                let (stream, _) = listener.accept().await?;
                Ok((
                    ConnectionStream::Unix(stream),
                    format!("unix:{}", path.display()),
                ))
            }
        }
    }

    /// The filesystem node to remove on teardown, if any.
    pub fn unix_path(&self) -> Option<&Path> {
        match self {
            Listener::Tcp(_) => None,
            Listener::Unix { path, .. } => Some(path),
        }
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        match self {
            Listener::Tcp(listener) => listener.local_addr().ok(),
            Listener::Unix { .. } => None,
        }
    }

    /// Human readable bound address.
    pub fn describe(&self) -> String {
        match self {
            Listener::Tcp(listener) => listener
                .local_addr()
                .map(|addr| addr.to_string())
                .unwrap_or_else(|_| "tcp:?".to_string()),
            Listener::Unix { path, .. } => format!("unix:{}", path.display()),
        }
    }
}

async fn bind_tcp(host: &str, port: u16) -> Result<TcpListener, ListenerError> {
    let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host, port))
        .await
        .map_err(|source| ListenerError::Resolve {
            host: host.to_string(),
            port,
            source,
        })?
        .collect();

    let mut last = None;
    for addr in addrs {
        debug!(%addr, "Trying address");
        match TcpListener::bind(addr).await {
            Ok(listener) => return Ok(listener),
            Err(source) => {
                warn!(%addr, error = %source, "Bind failed");
                last = Some(ListenerError::BindTcp { addr, source });
            }
        }
    }
    Err(last.unwrap_or_else(|| ListenerError::ResolveEmpty {
        host: host.to_string(),
        port,
    }))
}

/// Binds a Unix socket, clearing a stale node left by a dead process.
fn bind_unix(path: &Path) -> Result<UnixListener, ListenerError> {
    let shown = || path.display().to_string();

    if path.exists() {
        let metadata = fs::symlink_metadata(path).map_err(|source| ListenerError::UnixMetadata {
            path: shown(),
            source,
        })?;
        if !metadata.file_type().is_socket() {
            return Err(ListenerError::UnixNotSocket { path: shown() });
        }
        match std::os::unix::net::UnixStream::connect(path) {
            Ok(_stream) => return Err(ListenerError::UnixInUse { path: shown() }),
            Err(error)
                if error.kind() == io::ErrorKind::ConnectionRefused
                    || error.kind() == io::ErrorKind::NotFound =>
            {
                debug!(path = %path.display(), "Removing stale socket");
                fs::remove_file(path).map_err(|source| ListenerError::UnixCleanup {
                    path: shown(),
                    source,
                })?;
            }
            Err(source) => {
                return Err(ListenerError::UnixConnect {
                    path: shown(),
                    source,
                })
            }
        }
    }

    UnixListener::bind(path).map_err(|source| ListenerError::BindUnix {
        path: shown(),
        source,
    })
}

/// Removes the socket node, tolerating one that is already gone.
pub fn remove_socket_node(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => debug!(path = %path.display(), "Removed socket node"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove socket node"),
    }
}

/// An accepted client stream of either transport.
#[derive(Debug)]
pub enum ConnectionStream {
    Tcp(TcpStream),
    Unix(UnixStream),
}

impl AsyncRead for ConnectionStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            ConnectionStream::Tcp(s) => Pin::new(s).poll_read(cx, buf),
            ConnectionStream::Unix(s) => Pin::new(s).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for ConnectionStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            ConnectionStream::Tcp(s) => Pin::new(s).poll_write(cx, buf),
            ConnectionStream::Unix(s) => Pin::new(s).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            ConnectionStream::Tcp(s) => Pin::new(s).poll_flush(cx),
            ConnectionStream::Unix(s) => Pin::new(s).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            ConnectionStream::Tcp(s) => Pin::new(s).poll_shutdown(cx),
            ConnectionStream::Unix(s) => Pin::new(s).poll_shutdown(cx),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tcp_any() -> SocketSpec {
        SocketSpec::Tcp {
            host: "127.0.0.1".to_string(),
            port: 0,
        }
    }

    #[tokio::test]
    async fn test_bind_tcp_ephemeral() {
        let listener = Listener::bind(&[tcp_any()]).await.unwrap();
        let addr = listener.local_addr().unwrap();
        assert_ne!(addr.port(), 0);
        assert!(listener.unix_path().is_none());
    }

    #[tokio::test]
    async fn test_stale_unix_socket_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("btd.sock");
        {
            let _stale = std::os::unix::net::UnixListener::bind(&path).unwrap();
        }
        assert!(path.exists());

        let listener = Listener::bind(&[SocketSpec::Unix(path.clone())])
            .await
            .unwrap();
        assert_eq!(listener.unix_path(), Some(path.as_path()));
        UnixStream::connect(&path).await.unwrap();
    }

    #[tokio::test]
    async fn test_live_unix_socket_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("busy.sock");
        let _live = UnixListener::bind(&path).unwrap();

        let err = Listener::bind(&[SocketSpec::Unix(path.clone())])
            .await
            .unwrap_err();
        assert!(matches!(err, ListenerError::Exhausted));
        assert!(path.exists());

        // Falls through to the next candidate
        let listener = Listener::bind(&[SocketSpec::Unix(path), tcp_any()])
            .await
            .unwrap();
        assert!(matches!(listener, Listener::Tcp(_)));
    }

    #[tokio::test]
    async fn test_regular_file_is_not_a_socket() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plain");
        fs::write(&path, b"x").unwrap();

        let err = bind_unix(&path).unwrap_err();
        assert!(matches!(err, ListenerError::UnixNotSocket { .. }));
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_no_candidates() {
        assert!(matches!(
            Listener::bind(&[]).await,
            Err(ListenerError::Exhausted)
        ));
    }

    #[test]
    fn test_remove_missing_node() {
        let dir = tempfile::tempdir().unwrap();
        remove_socket_node(&dir.path().join("gone.sock"));
    }
}
