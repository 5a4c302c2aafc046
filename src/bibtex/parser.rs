//! Streaming BibTeX Record Parser
//!
//! The parser reads one record straight off the session stream, byte by
//! byte, and stops at the closing delimiter of the record. It never reads
//! past the record, so the next command token is left untouched.
//!
//! ## Accepted Grammar
//!
//! ```text
//! record  := '@' type ws* ('{' body '}' | '(' body ')')
//! body    := key (',' field)* ','?
//! field   := name ws* '=' ws* value
//! value   := part (ws* '#' ws* part)*
//! part    := '{' balanced '}' | '"' balanced '"' | digits | name
//! ```

use crate::bibtex::entry::{required_fields, BibtexEntry, FieldValue, ValuePart};
use crate::protocol::{is_space, ProtocolReader};
use std::io;
use thiserror::Error;
use tokio::io::AsyncBufRead;

/// Errors produced while parsing a record.
#[derive(Debug, Error)]
pub enum BibtexError {
    /// The stream ended inside the record
    #[error("unexpected end of input")]
    UnexpectedEnd,

    /// A byte that does not fit the grammar at this position
    #[error("expected {expected} but found '{found}'")]
    Unexpected { expected: &'static str, found: char },

    #[error("missing entry type after '@'")]
    MissingType,

    #[error("missing citation key")]
    MissingKey,

    #[error("duplicate field '{0}'")]
    DuplicateField(String),

    /// Only reported when field checks are enabled
    #[error("unknown entry type '@{0}'")]
    UnknownType(String),

    /// Only reported when field checks are enabled
    #[error("missing required field '{field}' for @{kind}")]
    MissingField { kind: String, field: String },

    /// Reading the stream failed
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Result type for parsing operations.
pub type BibtexResult<T> = Result<T, BibtexError>;

/// Parses exactly one BibTeX record from `reader`.
///
/// With `check_fields` set, the entry type must be a standard one and all
/// of its required fields must be present.
///
/// # Example
///
/// ```
/// use btd::bibtex::parse_entry;
/// use btd::protocol::ProtocolReader;
///
/// # tokio_test::block_on(async {
/// let mut reader = ProtocolReader::new(&b"@book{b1, title = \"Dune\"} NUM\n"[..]);
/// let entry = parse_entry(&mut reader, false).await.unwrap();
/// assert_eq!(entry.to_string(), "@book{b1, title = {Dune}}");
/// assert_eq!(reader.next_string().await.unwrap().as_deref(), Some("NUM"));
/// # });
/// ```
pub async fn parse_entry<R>(
    reader: &mut ProtocolReader<R>,
    check_fields: bool,
) -> BibtexResult<BibtexEntry>
where
    R: AsyncBufRead + Unpin,
{
    let entry = EntryParser { reader }.parse().await?;
    if check_fields {
        validate(&entry)?;
    }
    Ok(entry)
}

/// Checks the entry type and required fields.
pub fn validate(entry: &BibtexEntry) -> BibtexResult<()> {
    let required =
        required_fields(&entry.kind).ok_or_else(|| BibtexError::UnknownType(entry.kind.clone()))?;

    for alternatives in required {
        if !alternatives.iter().any(|name| entry.has_field(name)) {
            return Err(BibtexError::MissingField {
                kind: entry.kind.clone(),
                field: alternatives.join("' or '"),
            });
        }
    }
    Ok(())
}

#[inline]
fn is_name_byte(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || matches!(byte, b'_' | b'-' | b':' | b'.' | b'+' | b'/')
}

/// Collapses whitespace runs to single spaces and trims the ends.
fn normalize(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw)
        .split(|c: char| c.is_ascii() && is_space(c as u8))
        .filter(|word| !word.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

struct EntryParser<'a, R> {
    reader: &'a mut ProtocolReader<R>,
}

impl<'a, R: AsyncBufRead + Unpin> EntryParser<'a, R> {
    async fn parse(&mut self) -> BibtexResult<BibtexEntry> {
        self.reader.skip_whitespace().await?;
        self.expect(b'@', "'@'").await?;

        let kind = self.name().await?.to_ascii_lowercase();
        if kind.is_empty() {
            return Err(BibtexError::MissingType);
        }

        self.reader.skip_whitespace().await?;
        let closer = match self.next().await? {
            b'{' => b'}',
            b'(' => b')',
            other => {
                return Err(BibtexError::Unexpected {
                    expected: "'{' or '('",
                    found: other as char,
                })
            }
        };

        let key = self.key(closer).await?;
        let mut entry = BibtexEntry {
            kind,
            key,
            fields: Vec::new(),
        };

        loop {
            self.reader.skip_whitespace().await?;
            if self.peek().await? == closer {
                self.next().await?;
                return Ok(entry);
            }

            let name = self.name().await?.to_ascii_lowercase();
            if name.is_empty() {
                let found = self.peek().await? as char;
                return Err(BibtexError::Unexpected {
                    expected: "a field name",
                    found,
                });
            }
            if entry.has_field(&name) {
                return Err(BibtexError::DuplicateField(name));
            }

            self.reader.skip_whitespace().await?;
            self.expect(b'=', "'='").await?;
            let value = self.value().await?;
            entry.fields.push((name, value));

            self.reader.skip_whitespace().await?;
            match self.next().await? {
                b',' => continue,
                b if b == closer => return Ok(entry),
                other => {
                    return Err(BibtexError::Unexpected {
                        expected: "',' or the closing delimiter",
                        found: other as char,
                    })
                }
            }
        }
    }

    async fn peek(&mut self) -> BibtexResult<u8> {
        self.reader
            .peek_byte()
            .await?
            .ok_or(BibtexError::UnexpectedEnd)
    }

    async fn next(&mut self) -> BibtexResult<u8> {
        self.reader
            .next_byte()
            .await?
            .ok_or(BibtexError::UnexpectedEnd)
    }

    async fn expect(&mut self, wanted: u8, expected: &'static str) -> BibtexResult<()> {
        match self.next().await? {
            b if b == wanted => Ok(()),
            found => Err(BibtexError::Unexpected {
                expected,
                found: found as char,
            }),
        }
    }

    /// Reads a run of name bytes, possibly empty.
    async fn name(&mut self) -> BibtexResult<String> {
        let mut name = Vec::new();
        while is_name_byte(self.peek().await?) {
            name.push(self.next().await?);
        }
        Ok(String::from_utf8_lossy(&name).into_owned())
    }

    /// Reads the citation key and the `,` after it. A closer right after
    /// the key is left in the stream.
    async fn key(&mut self, closer: u8) -> BibtexResult<String> {
        self.reader.skip_whitespace().await?;
        let mut key = Vec::new();
        loop {
            let byte = self.peek().await?;
            if byte == b',' || byte == closer || is_space(byte) {
                break;
            }
            key.push(self.next().await?);
        }
        if key.is_empty() {
            return Err(BibtexError::MissingKey);
        }

        self.reader.skip_whitespace().await?;
        match self.peek().await? {
            b',' => {
                self.next().await?;
            }
            b if b == closer => {}
            other => {
                return Err(BibtexError::Unexpected {
                    expected: "',' after the citation key",
                    found: other as char,
                })
            }
        }
        Ok(String::from_utf8_lossy(&key).into_owned())
    }

    async fn value(&mut self) -> BibtexResult<FieldValue> {
        let mut parts = Vec::new();
        loop {
            self.reader.skip_whitespace().await?;
            parts.push(self.part().await?);
            self.reader.skip_whitespace().await?;
            if self.peek().await? != b'#' {
                return Ok(FieldValue { parts });
            }
            self.next().await?;
        }
    }

    async fn part(&mut self) -> BibtexResult<ValuePart> {
        match self.peek().await? {
            b'{' => {
                self.next().await?;
                Ok(ValuePart::Literal(self.delimited(b'}').await?))
            }
            b'"' => {
                self.next().await?;
                Ok(ValuePart::Literal(self.delimited(b'"').await?))
            }
            b if b.is_ascii_digit() => {
                let mut digits = Vec::new();
                while self.peek().await?.is_ascii_digit() {
                    digits.push(self.next().await?);
                }
                Ok(ValuePart::Number(String::from_utf8_lossy(&digits).into_owned()))
            }
            b if is_name_byte(b) => Ok(ValuePart::Macro(self.name().await?)),
            other => Err(BibtexError::Unexpected {
                expected: "a field value",
                found: other as char,
            }),
        }
    }

    /// Reads up to `end` at brace depth zero. Nested braces are kept.
    async fn delimited(&mut self, end: u8) -> BibtexResult<String> {
        let mut raw = Vec::new();
        let mut depth = 0usize;
        loop {
            let byte = self.next().await?;
            match byte {
                b'{' => depth += 1,
                b'}' if depth > 0 => depth -= 1,
                b if b == end && depth == 0 => return Ok(normalize(&raw)),
                _ => {}
            }
            raw.push(byte);
        }
    }
}
