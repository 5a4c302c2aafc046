//! # btd - A Bibliography Daemon
//!
//! btd keeps a persistent store of BibTeX entries and their attachments and
//! serves it to clients over a small text protocol, on a Unix domain socket
//! or TCP.
//!
//! ## Features
//!
//! - **Simple Protocol**: whitespace separated, backslash escaped tokens and a
//!   two-line `status\npayload\n` envelope per command
//! - **Binary Attachments**: `ATTACH` switches the stream to exact byte
//!   framing for its payload
//! - **Isolated Sessions**: every client is its own Tokio task; a stuck or
//!   crashing session never affects the others
//! - **Clean Shutdown**: SIGINT/SIGTERM tear down the socket and store once
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                 btd                                     │
//! │                                                                         │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐                  │
//! │  │   Server    │───>│ Connection  │───>│  Command    │                  │
//! │  │ (Listener)  │    │  Handler    │    │  Handler    │                  │
//! │  └──────┬──────┘    └──────┬──────┘    └──────┬──────┘                  │
//! │         │                  │                  │                         │
//! │         │                  ▼                  ▼                         │
//! │         │           ┌─────────────┐    ┌─────────────┐                  │
//! │         │           │  Protocol   │    │  BibStore   │                  │
//! │         │           │  Reader     │<───│  (RwLock)   │                  │
//! │         │           └──────┬──────┘    └─────────────┘                  │
//! │         │                  │                  ▲                         │
//! │         │                  ▼                  │                         │
//! │         │           ┌─────────────┐           │                         │
//! │         │           │   BibTeX    │───────────┘                         │
//! │         │           │   Parser    │                                     │
//! │         │           └─────────────┘                                     │
//! │         ▼                                                               │
//! │  ┌──────────────────────────────────────────────┐                       │
//! │  │ Lifecycle: signals, teardown, pidfile        │                       │
//! │  └──────────────────────────────────────────────┘                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use btd::config::Config;
//! use btd::server::Server;
//! use btd::storage::BibStore;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load(None, 1)?;
//!     let store = Arc::new(BibStore::open(&config.db)?);
//!     Server::new(&config, store).run().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Supported Commands
//!
//! - `NUM` - number of stored entries
//! - `SHOW <id>` - one entry as BibTeX
//! - `LIST` - one summary line per entry
//! - `ATTACH <name> <id> <length>` followed by `length` raw bytes
//! - `BIBTEX <path> <entry>` - parse and store an entry
//! - `HELP` - usage text
//! - `BYE` - end the session
//!
//! ## Module Overview
//!
//! - [`protocol`]: tokenizer, envelopes and verbs
//! - [`bibtex`]: entry parser and canonical form
//! - [`storage`]: the persistent bibliography store
//! - [`commands`]: the command dispatcher
//! - [`connection`]: per-client session loop
//! - [`server`]: listener, supervised accept loop and lifecycle
//! - [`config`]: configuration file and defaults

pub mod bibtex;
pub mod commands;
pub mod config;
pub mod connection;
pub mod protocol;
pub mod server;
pub mod storage;

// Re-export commonly used types for convenience
pub use commands::{CommandHandler, CommandOptions};
pub use config::Config;
pub use connection::{handle_connection, ConnectionStats};
pub use protocol::{ProtocolReader, Reply};
pub use server::{Server, ServerError};
pub use storage::BibStore;

/// Version of btd, sent in the greeting
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
