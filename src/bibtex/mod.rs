//! BibTeX Entry Parser
//!
//! Turns the bytes following a `BIBTEX` command into a structured record.
//! The parser reads from the session stream itself and consumes exactly one
//! record, so it owns the framing of its own payload.
//!
//! - `entry`: `BibtexEntry` and its canonical single-line text form
//! - `parser`: the streaming parser and optional required-field checks

pub mod entry;
pub mod parser;

pub use entry::{BibtexEntry, FieldValue, ValuePart};
pub use parser::{parse_entry, validate, BibtexError, BibtexResult};
