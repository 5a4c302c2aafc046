//! btd Protocol Implementation
//!
//! This module implements the textual command protocol spoken by btd.
//!
//! ## Overview
//!
//! A session starts with a greeting line (`btd <version>`). The client then
//! sends one command at a time: a case-insensitive verb followed by its
//! argument tokens. Tokens are separated by whitespace and a backslash
//! escapes the byte that follows it. `ATTACH` is followed by a raw binary
//! payload of a declared length, and `BIBTEX` by a BibTeX record.
//!
//! Every command is answered with a two-line envelope: a status line (`0` or
//! `1`) and a payload line.
//!
//! ## Modules
//!
//! - `types`: `Verb`, the `Reply` envelope, greeting and usage text
//! - `reader`: tokenizer and exact-length payload framer
//!
//! ## Example
//!
//! ```
//! use btd::protocol::{ProtocolReader, Reply, Verb};
//!
//! # tokio_test::block_on(async {
//! let mut reader = ProtocolReader::new(&b"show 3\n"[..]);
//! let verb = reader.next_string().await.unwrap().unwrap();
//! assert_eq!(Verb::from_token(&verb), Some(Verb::Show));
//!
//! let reply = Reply::failure("Number not a valid ID");
//! assert_eq!(reply.serialize(), b"1\nNumber not a valid ID\n");
//! # });
//! ```

pub mod reader;
pub mod types;

// Re-export commonly used types for convenience
pub use reader::{is_space, IntegerToken, ProtocolReader};
pub use types::{greeting, Reply, Verb, USAGE};
