//! btd - Bibliography Daemon
//!
//! This is the main entry point for the btd server.
//! It reads the configuration, opens the store and serves clients until
//! SIGINT or SIGTERM.

use anyhow::Context;
use btd::config::{verbosity_filter, Config, DEFAULT_VERBOSITY, MAX_VERBOSITY};
use btd::server::{write_pidfile, Server};
use btd::storage::BibStore;
use clap::{ArgAction, Parser};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};
use tracing_subscriber::{fmt, EnvFilter};

/// btd - bibliography daemon
#[derive(Parser, Debug)]
#[command(name = "btd")]
#[command(about = "Serves a BibTeX bibliography store over a text protocol")]
#[command(version)]
struct Args {
    /// Configuration file (searched in the XDG locations when omitted)
    config: Option<PathBuf>,

    /// More verbose logging, repeatable
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Less verbose logging, repeatable
    #[arg(short, long, action = ArgAction::Count)]
    quiet: u8,
}

impl Args {
    fn verbosity(&self) -> u8 {
        (i16::from(DEFAULT_VERBOSITY) + i16::from(self.verbose) - i16::from(self.quiet))
            .clamp(0, i16::from(MAX_VERBOSITY)) as u8
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let verbosity = args.verbosity();

    // RUST_LOG wins over -v/-q
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(verbosity_filter(verbosity)));
    fmt().with_env_filter(filter).with_target(false).init();

    let config = Config::load(args.config.as_deref(), verbosity)
        .context("failed to load configuration")?;
    info!("btd v{}", btd::VERSION);
    debug!("\n{}", config);

    if let Some(pidfile) = &config.pidfile {
        write_pidfile(pidfile)
            .with_context(|| format!("failed to write pidfile {}", pidfile.display()))?;
    }

    let store = BibStore::open(&config.db)
        .with_context(|| format!("failed to open store at {}", config.db.display()))?;

    Server::new(&config, Arc::new(store))
        .run()
        .await
        .context("server stopped")?;

    info!("Server shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbosity_flags() {
        let args = Args::parse_from(["btd"]);
        assert_eq!(args.verbosity(), 1);
        assert!(args.config.is_none());

        let args = Args::parse_from(["btd", "-vvv", "/tmp/btd.conf"]);
        assert_eq!(args.verbosity(), 4);
        assert_eq!(args.config, Some(PathBuf::from("/tmp/btd.conf")));

        let args = Args::parse_from(["btd", "-qqq"]);
        assert_eq!(args.verbosity(), 0);

        let args = Args::parse_from(["btd", "-vvvvvvvv"]);
        assert_eq!(args.verbosity(), MAX_VERBOSITY);
    }
}
