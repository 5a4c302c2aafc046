//! Protocol Data Types
//!
//! This module defines the values exchanged over a btd session.
//!
//! ## Envelope Format
//!
//! Every command is answered with exactly two logical lines:
//!
//! ```text
//! 0\n<payload>\n      success
//! 1\n<message>\n      failure
//! ```
//!
//! The payload of `LIST` and `HELP` may itself span several lines; the
//! status line is always the first one.
//!
//! ## Examples
//!
//! Success: `0\nAdded with id: 1\n`
//! Failure: `1\nUnknown command: 'FOO'\n`

use std::fmt;

/// Status code written for a successful command.
pub const STATUS_OK: u8 = b'0';

/// Status code written for a failed command.
pub const STATUS_ERR: u8 = b'1';

/// Protocol usage text returned by `HELP`.
pub const USAGE: &str = "Protocol specification:

Commands are case insensitive and space has to be escaped with\\
Command Args         Info
ATTACH  NAME ID LEN  Attach a file with name NAME to ID with LEN bytes.
BYE                  Close the connection gracefully.
NUM                  Print the number of entries available.
SHOW    ID           Show the snippet matching ID.
LIST                 Print a summary.
HELP                 Display this help.
BIBTEX  DIR  SNIPPET Add a bibtex snippet to the database in
                     directory DIR and use SNIPPET as the data.";

/// Builds the greeting line sent when a session starts.
pub fn greeting() -> String {
    format!("btd {}\n", crate::VERSION)
}

/// The fixed set of commands a client may send.
///
/// Verbs are matched case-insensitively; arguments are not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    Num,
    Show,
    List,
    Attach,
    Bibtex,
    Bye,
    Help,
}

impl Verb {
    /// Every verb, in the order they are matched.
    pub const ALL: [Verb; 7] = [
        Verb::Bibtex,
        Verb::Num,
        Verb::Show,
        Verb::Attach,
        Verb::List,
        Verb::Bye,
        Verb::Help,
    ];

    /// Returns the canonical (upper case) name of the verb.
    pub fn name(self) -> &'static str {
        match self {
            Verb::Num => "NUM",
            Verb::Show => "SHOW",
            Verb::List => "LIST",
            Verb::Attach => "ATTACH",
            Verb::Bibtex => "BIBTEX",
            Verb::Bye => "BYE",
            Verb::Help => "HELP",
        }
    }

    /// Looks up a verb from a command token, ignoring ASCII case.
    ///
    /// # Example
    /// ```
    /// use btd::protocol::Verb;
    /// assert_eq!(Verb::from_token("show"), Some(Verb::Show));
    /// assert_eq!(Verb::from_token("sHoW"), Some(Verb::Show));
    /// assert_eq!(Verb::from_token("shows"), None);
    /// ```
    pub fn from_token(token: &str) -> Option<Verb> {
        Verb::ALL
            .into_iter()
            .find(|verb| verb.name().eq_ignore_ascii_case(token))
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A response envelope: a status line followed by a payload line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Status `0` with the given payload.
    Success(String),

    /// Status `1` with a human-readable message.
    Failure(String),
}

impl Reply {
    /// Creates a success envelope.
    ///
    /// # Example
    /// ```
    /// use btd::protocol::Reply;
    /// assert_eq!(Reply::success("bye").serialize(), b"0\nbye\n");
    /// ```
    pub fn success(payload: impl Into<String>) -> Self {
        Reply::Success(payload.into())
    }

    /// Creates a failure envelope.
    pub fn failure(message: impl Into<String>) -> Self {
        Reply::Failure(message.into())
    }

    /// Reply to an unrecognized verb.
    pub fn unknown_command(verb: &str) -> Self {
        Reply::Failure(format!("Unknown command: '{}'", verb))
    }

    /// Returns true for a `0` envelope.
    pub fn is_success(&self) -> bool {
        matches!(self, Reply::Success(_))
    }

    /// Returns the payload line without the status.
    pub fn payload(&self) -> &str {
        match self {
            Reply::Success(s) | Reply::Failure(s) => s,
        }
    }

    /// Serializes the envelope to bytes for sending over the wire.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.payload().len() + 3);
        self.serialize_into(&mut buf);
        buf
    }

    /// Serializes the envelope into an existing buffer.
    pub fn serialize_into(&self, buf: &mut Vec<u8>) {
        let status = match self {
            Reply::Success(_) => STATUS_OK,
            Reply::Failure(_) => STATUS_ERR,
        };
        buf.push(status);
        buf.push(b'\n');
        buf.extend_from_slice(self.payload().as_bytes());
        buf.push(b'\n');
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Success(s) => write!(f, "(ok) {}", s),
            Reply::Failure(s) => write!(f, "(error) {}", s),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_serialize() {
        let reply = Reply::success("Added with id: 1");
        assert_eq!(reply.serialize(), b"0\nAdded with id: 1\n");
    }

    #[test]
    fn test_failure_serialize() {
        let reply = Reply::failure("Number should be positive");
        assert_eq!(reply.serialize(), b"1\nNumber should be positive\n");
    }

    #[test]
    fn test_unknown_command() {
        let reply = Reply::unknown_command("frobnicate");
        assert_eq!(reply.serialize(), b"1\nUnknown command: 'frobnicate'\n");
        assert!(!reply.is_success());
    }

    #[test]
    fn test_empty_payload_still_two_lines() {
        assert_eq!(Reply::success("").serialize(), b"0\n\n");
    }

    #[test]
    fn test_verb_lookup_is_case_insensitive() {
        for verb in Verb::ALL {
            assert_eq!(Verb::from_token(verb.name()), Some(verb));
            assert_eq!(Verb::from_token(&verb.name().to_lowercase()), Some(verb));
        }
        assert_eq!(Verb::from_token("ByE"), Some(Verb::Bye));
        assert_eq!(Verb::from_token(""), None);
        assert_eq!(Verb::from_token("NUMS"), None);
    }

    #[test]
    fn test_greeting() {
        assert_eq!(greeting(), format!("btd {}\n", crate::VERSION));
    }

    #[test]
    fn test_usage_lists_every_verb() {
        for verb in Verb::ALL {
            assert!(USAGE.contains(verb.name()), "missing {}", verb);
        }
    }
}
