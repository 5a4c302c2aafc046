//! Command Handler Module
//!
//! This module implements the seven btd commands. The connection loop reads
//! the verb token and hands the stream to [`CommandHandler::execute`], which
//! reads the command's own arguments (and payload, for `ATTACH` and
//! `BIBTEX`) before touching the store.
//!
//! ## Supported Commands
//!
//! - `NUM` - Number of stored entries
//! - `SHOW id` - Text of one entry
//! - `LIST` - One summary line per entry
//! - `ATTACH name id length <bytes>` - Store a binary attachment
//! - `BIBTEX path <record>` - Parse and store a BibTeX record
//! - `BYE` - End the session
//! - `HELP` - Protocol usage
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     CommandHandler                          │
//! │                                                             │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐     │
//! │  │ lookup verb │───>│  read args  │───>│  execute()  │     │
//! │  └─────────────┘    └─────────────┘    └─────────────┘     │
//! │                                               │             │
//! │                          ┌────────────────────┴──────┐      │
//! │                          ▼                           ▼      │
//! │                      BibStore                  BibTeX parser│
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Malformed Integers
//!
//! When `SHOW` or `ATTACH` receives an argument that is not an integer, the
//! token is consumed and, by default, no envelope is written at all. This
//! matches the historical behavior clients were written against. Setting
//! `report_malformed_integers` answers with `1\nInvalid number: '<token>'`
//! instead.

use crate::bibtex::{parse_entry, BibtexError};
use crate::config::Config;
use crate::protocol::{IntegerToken, ProtocolReader, Reply, Verb, USAGE};
use crate::storage::{BibStore, StoreError, StoreResult};
use std::io;
use std::sync::Arc;
use tokio::io::AsyncBufRead;
use tracing::{debug, warn};

/// Per-command behavior switches, taken from [`Config`].
#[derive(Debug, Clone, Default)]
pub struct CommandOptions {
    /// Enforce required BibTeX fields
    pub check_fields: bool,
    /// Largest attachment accepted
    pub max_attachment_size: Option<u64>,
    /// Reply to malformed integers instead of staying silent
    pub report_malformed_integers: bool,
}

impl From<&Config> for CommandOptions {
    fn from(config: &Config) -> Self {
        Self {
            check_fields: config.check_fields,
            max_attachment_size: config.max_attachment_size,
            report_malformed_integers: config.report_malformed_integers,
        }
    }
}

/// What the connection loop should do after a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Write the envelope and read the next command
    Reply(Reply),

    /// Write nothing and read the next command
    Silent,

    /// Write the envelope and end the session
    Close(Reply),

    /// The stream ended while reading arguments; end the session quietly
    Disconnected,
}

/// Handles btd commands by dispatching them to the appropriate handlers.
#[derive(Clone)]
pub struct CommandHandler {
    /// The store shared by every session
    store: Arc<BibStore>,
    options: CommandOptions,
}

impl CommandHandler {
    /// Creates a new command handler with the given store.
    pub fn new(store: Arc<BibStore>, options: CommandOptions) -> Self {
        Self { store, options }
    }

    pub fn store(&self) -> &Arc<BibStore> {
        &self.store
    }

    /// Executes the command named by `token`, reading its arguments from
    /// `reader`.
    ///
    /// # Errors
    ///
    /// Returns an I/O error when reading the stream fails; the session
    /// cannot continue after that.
    pub async fn execute<R>(&self, token: &str, reader: &mut ProtocolReader<R>) -> io::Result<Outcome>
    where
        R: AsyncBufRead + Unpin,
    {
        let Some(verb) = Verb::from_token(token) else {
            return Ok(Outcome::Reply(Reply::unknown_command(token)));
        };
        debug!(verb = %verb, "Dispatching command");

        match verb {
            Verb::Num => Ok(self.cmd_num()),
            Verb::Show => self.cmd_show(reader).await,
            Verb::List => Ok(self.cmd_list()),
            Verb::Attach => self.cmd_attach(reader).await,
            Verb::Bibtex => self.cmd_bibtex(reader).await,
            Verb::Bye => Ok(Outcome::Close(Reply::success("bye"))),
            Verb::Help => Ok(Outcome::Reply(Reply::success(USAGE))),
        }
    }

    // ========================================================================
    // Helper functions
    // ========================================================================

    fn malformed(&self, token: &str) -> Outcome {
        debug!(token, "Malformed integer argument");
        if self.options.report_malformed_integers {
            Outcome::Reply(Reply::failure(format!("Invalid number: '{}'", token)))
        } else {
            Outcome::Silent
        }
    }

    /// Runs a store mutation on the blocking pool, off the runtime threads.
    async fn blocking<T, F>(&self, op: F) -> StoreResult<T>
    where
        F: FnOnce(&BibStore) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || op(&store))
            .await
            .map_err(|e| StoreError::Io(io::Error::other(e)))?
    }

    fn store_failure(&self, error: StoreError) -> Outcome {
        warn!(error = %error, "Store operation failed");
        Outcome::Reply(Reply::failure(format!("Store error: {}", error)))
    }

    // ========================================================================
    // Commands
    // ========================================================================

    /// NUM
    fn cmd_num(&self) -> Outcome {
        match self.store.count() {
            Ok(n) => Outcome::Reply(Reply::success(n.to_string())),
            Err(e) => self.store_failure(e),
        }
    }

    /// LIST
    fn cmd_list(&self) -> Outcome {
        match self.store.list_summary() {
            Ok(summary) => Outcome::Reply(Reply::success(summary)),
            Err(e) => self.store_failure(e),
        }
    }

    /// SHOW id
    async fn cmd_show<R>(&self, reader: &mut ProtocolReader<R>) -> io::Result<Outcome>
    where
        R: AsyncBufRead + Unpin,
    {
        let id = match reader.next_integer().await? {
            None => return Ok(Outcome::Disconnected),
            Some(IntegerToken::Malformed(token)) => return Ok(self.malformed(&token)),
            Some(IntegerToken::Value(n)) => n,
        };
        if id <= 0 {
            return Ok(Outcome::Reply(Reply::failure("Number should be positive")));
        }

        Ok(match self.store.get(id as u64) {
            Ok(Some(text)) => Outcome::Reply(Reply::success(text)),
            Ok(None) => Outcome::Reply(Reply::failure("Number not a valid ID")),
            Err(e) => self.store_failure(e),
        })
    }

    /// ATTACH name id length
    ///
    /// The id is checked only after the payload has been consumed, so the
    /// stream stays aligned with the next command. A malformed id stops
    /// argument parsing before the length token is read.
    async fn cmd_attach<R>(&self, reader: &mut ProtocolReader<R>) -> io::Result<Outcome>
    where
        R: AsyncBufRead + Unpin,
    {
        let Some(name) = reader.next_string().await? else {
            return Ok(Outcome::Disconnected);
        };
        let id = match reader.next_integer().await? {
            None => return Ok(Outcome::Disconnected),
            Some(IntegerToken::Malformed(token)) => return Ok(self.malformed(&token)),
            Some(IntegerToken::Value(n)) => n,
        };
        let length = match reader.next_integer().await? {
            None => return Ok(Outcome::Disconnected),
            Some(IntegerToken::Malformed(token)) => return Ok(self.malformed(&token)),
            Some(IntegerToken::Value(n)) => n,
        };

        if length < 0 {
            return Ok(Outcome::Reply(Reply::failure(
                "Length should not be negative",
            )));
        }
        let length = length as u64;

        if let Some(max) = self.options.max_attachment_size {
            if length > max {
                debug!(length, max, "Discarding oversized attachment");
                reader.discard(length).await?;
                return Ok(Outcome::Reply(Reply::failure("Attachment too large")));
            }
        }

        let payload = reader.read_payload(length).await?;
        if id <= 0 {
            return Ok(Outcome::Reply(Reply::failure("Number should be positive")));
        }

        let written = {
            let name = name.clone();
            self.blocking(move |store| store.write_attachment(&name, id as u64, &payload))
                .await
        };
        Ok(match written {
            Ok(_) => Outcome::Reply(Reply::success(format!("Attached {} to {}", name, id))),
            Err(StoreError::NotFound(_)) => {
                Outcome::Reply(Reply::failure("Number not a valid ID"))
            }
            Err(StoreError::InvalidName(name)) => Outcome::Reply(Reply::failure(format!(
                "Invalid attachment name: '{}'",
                name
            ))),
            Err(e) => self.store_failure(e),
        })
    }

    /// BIBTEX path record
    async fn cmd_bibtex<R>(&self, reader: &mut ProtocolReader<R>) -> io::Result<Outcome>
    where
        R: AsyncBufRead + Unpin,
    {
        let Some(path) = reader.next_string().await? else {
            return Ok(Outcome::Disconnected);
        };

        let entry = match parse_entry(reader, self.options.check_fields).await {
            Ok(entry) => entry,
            Err(BibtexError::Io(e)) => return Err(e),
            Err(e) => {
                debug!(error = %e, "BibTeX parsing failed");
                return Ok(Outcome::Reply(Reply::failure(format!(
                    "Parsing failed: {}",
                    e
                ))));
            }
        };

        let inserted = self
            .blocking(move |store| store.insert_entry(&entry, &path))
            .await;
        Ok(match inserted {
            Ok(id) => Outcome::Reply(Reply::success(format!("Added with id: {}", id))),
            Err(e) => self.store_failure(e),
        })
    }
}
