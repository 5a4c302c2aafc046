//! Connection Handler Module
//!
//! This module manages individual client sessions of btd.
//! Each accepted connection is handled by its own async task, so one slow
//! or stuck client never holds up another.
//!
//! ## Session Flow
//!
//! ```text
//!   Listener::accept()          (server module)
//!          │
//!          │  one task per client, tracked in a JoinSet
//!          ▼
//!   ConnectionHandler::run()
//!          │
//!          ├── greeting ─────────────────────────> "btd <version>\n"
//!          │
//!          └── loop
//!                ├─ ProtocolReader::next_string()   verb token
//!                ├─ CommandHandler::execute()       reads args / payload
//!                └─ Outcome
//!                     ├─ Reply   ──> write + flush, next verb
//!                     ├─ Silent  ──> next verb
//!                     ├─ Close   ──> write + flush, end session
//!                     └─ Disconnected ──> end session
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use btd::connection::{handle_connection, ConnectionStats};
//! use btd::commands::{CommandHandler, CommandOptions};
//! use btd::storage::BibStore;
//! use std::sync::Arc;
//!
//! let store = Arc::new(BibStore::open("/var/lib/btd")?);
//! let stats = Arc::new(ConnectionStats::new());
//! let handler = CommandHandler::new(store, CommandOptions::default());
//!
//! // For each accepted connection...
//! let (stream, addr) = listener.accept().await?;
//! tokio::spawn(handle_connection(stream, addr.to_string(), handler, stats, None));
//! ```

pub mod handler;

// Re-export commonly used types
pub use handler::{handle_connection, ConnectionError, ConnectionHandler, ConnectionStats};
