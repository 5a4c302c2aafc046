//! Process lifecycle: termination signals, ordered teardown and the pidfile.

use super::listener::{remove_socket_node, Listener};
use crate::storage::{atomic_write, BibStore};
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::signal::unix::{signal, Signal, SignalKind};
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, trace, warn};

/// SIGINT and SIGTERM, observed from the control loop.
pub struct ShutdownSignals {
    interrupt: Signal,
    terminate: Signal,
}

impl ShutdownSignals {
    /// Installs both handlers. Must be called inside the runtime.
    pub fn install() -> io::Result<Self> {
        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
        })
    }

    /// Waits for either signal and returns its name.
    pub async fn recv(&mut self) -> &'static str {
        tokio::select! {
            _ = self.interrupt.recv() => "SIGINT",
            _ = self.terminate.recv() => "SIGTERM",
        }
    }
}

/// Runs the shutdown sequence at most once.
///
/// Order: close the listener, remove the Unix socket node, drain sessions
/// for the grace period and abort the rest, close the store.
#[derive(Debug, Default)]
pub struct Teardown {
    done: AtomicBool,
}

impl Teardown {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::SeqCst)
    }

    /// Returns `false` when teardown had already run.
    pub async fn run(
        &self,
        listener: Option<Listener>,
        sessions: &mut JoinSet<()>,
        store: &BibStore,
        grace: Duration,
    ) -> bool {
        if self
            .done
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }

        if let Some(listener) = listener {
            let node = listener.unix_path().map(Path::to_path_buf);
            debug!(address = %listener.describe(), "Closing listener");
            drop(listener);
            if let Some(node) = node {
                remove_socket_node(&node);
            }
        }

        if !sessions.is_empty() {
            debug!(sessions = sessions.len(), grace = ?grace, "Draining sessions");
            let drained = tokio::time::timeout(grace, async {
                while let Some(result) = sessions.join_next().await {
                    log_session_exit(result);
                }
            })
            .await;

            if drained.is_err() {
                warn!(remaining = sessions.len(), "Grace period over, aborting sessions");
                sessions.abort_all();
                while let Some(result) = sessions.join_next().await {
                    log_session_exit(result);
                }
            }
        }

        if store.close() {
            debug!("Store closed");
        }
        info!("Teardown complete");
        true
    }
}

/// Logs how a session task ended. Panics are contained to their session.
pub fn log_session_exit(result: Result<(), JoinError>) {
    match result {
        Ok(()) => trace!("Session task finished"),
        Err(e) if e.is_panic() => error!(error = %e, "Session panicked"),
        Err(e) => debug!(error = %e, "Session task cancelled"),
    }
}

/// Writes the bare decimal process id, with no trailing newline.
pub fn write_pidfile(path: &Path) -> io::Result<()> {
    atomic_write(path, std::process::id().to_string().as_bytes())?;
    debug!(path = %path.display(), "Wrote pidfile");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SocketSpec;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_teardown_runs_once() {
        let dir = tempfile::tempdir().unwrap();
        let store = BibStore::open(dir.path().join("db")).unwrap();
        let sock = dir.path().join("btd.sock");
        let listener = Listener::bind(&[SocketSpec::Unix(sock.clone())])
            .await
            .unwrap();
        assert!(sock.exists());

        let teardown = Teardown::new();
        let mut sessions = JoinSet::new();
        assert!(teardown.run(Some(listener), &mut sessions, &store, Duration::from_secs(1)).await);
        assert!(teardown.is_done());
        assert!(!sock.exists());
        assert!(store.is_closed());

        assert!(!teardown.run(None, &mut sessions, &store, Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn test_teardown_drains_then_aborts() {
        let dir = tempfile::tempdir().unwrap();
        let store = BibStore::open(dir.path()).unwrap();
        let finished = Arc::new(AtomicUsize::new(0));

        let mut sessions = JoinSet::new();
        let quick = Arc::clone(&finished);
        sessions.spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            quick.fetch_add(1, Ordering::SeqCst);
        });
        let stuck = Arc::clone(&finished);
        sessions.spawn(async move {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            stuck.fetch_add(1, Ordering::SeqCst);
        });

        let teardown = Teardown::new();
        assert!(
            teardown
                .run(None, &mut sessions, &store, Duration::from_millis(100))
                .await
        );
        assert!(sessions.is_empty());
        assert_eq!(finished.load(Ordering::SeqCst), 1);
        assert!(store.is_closed());
    }

    #[tokio::test]
    async fn test_panicking_session_is_contained() {
        let mut sessions: JoinSet<()> = JoinSet::new();
        sessions.spawn(async { panic!("session blew up") });
        let result = sessions.join_next().await.unwrap();
        assert!(result.as_ref().unwrap_err().is_panic());
        log_session_exit(result);
    }

    #[test]
    fn test_write_pidfile() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("btd.pid");
        write_pidfile(&path).unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, std::process::id().to_string());

        // A stale pidfile is replaced, not appended to
        std::fs::write(&path, "99999999\nold").unwrap();
        write_pidfile(&path).unwrap();
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            std::process::id().to_string()
        );
    }
}
