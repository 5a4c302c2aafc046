//! Token Reader and Attachment Framer
//!
//! This module reads client input for one session. Most of the stream is
//! text: whitespace-separated tokens where a backslash makes the following
//! byte part of the token, whatever it is. `ATTACH` switches the same stream
//! into binary mode for an exact number of bytes, and the BibTeX parser pulls
//! single bytes through [`ProtocolReader::next_byte`] and
//! [`ProtocolReader::peek_byte`].
//!
//! ## Token Rules
//!
//! ```text
//!   "  show 12\n"        -> "show", "12"
//!   "a\ b c"             -> "a b", "c"
//!   "x\\y "              -> "x\y"
//!   "bye"  (then EOF)    -> end of stream, the token was never terminated
//! ```
//!
//! All reads go through one buffered reader, so a token read never consumes
//! more than the whitespace byte that terminates it, and an attachment read
//! never consumes more than its declared length.

use bytes::{BufMut, Bytes, BytesMut};
use std::io;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

/// Initial capacity for a token buffer; it grows as needed.
const INITIAL_TOKEN_CAPACITY: usize = 32;

/// Upper bound on the buffer preallocated for an attachment.
const MAX_PREALLOCATION: usize = 64 * 1024;

/// The escape byte.
const BACKSLASH: u8 = b'\\';

/// Whitespace as understood by the protocol: space, `\t`, `\n`, `\v`,
/// `\f` and `\r`.
#[inline]
pub fn is_space(byte: u8) -> bool {
    byte.is_ascii_whitespace() || byte == 0x0b
}

/// Result of reading a token that is expected to be an integer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntegerToken {
    /// The token parsed as a signed integer.
    Value(i64),

    /// The token was consumed but is not an integer literal.
    Malformed(String),
}

/// Buffered reader over the client half of a session.
pub struct ProtocolReader<R> {
    inner: R,

    /// Idle limit for a single read, `None` waits forever.
    read_timeout: Option<Duration>,

    /// Total bytes consumed so far.
    consumed: u64,
}

impl<R> ProtocolReader<R> {
    /// Creates a reader that waits indefinitely for input.
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            read_timeout: None,
            consumed: 0,
        }
    }

    /// Sets the per-read idle timeout.
    pub fn with_read_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Returns the number of bytes consumed from the stream.
    pub fn bytes_consumed(&self) -> u64 {
        self.consumed
    }

    /// Returns the underlying reader.
    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: AsyncBufRead + Unpin> ProtocolReader<R> {
    /// Fills the internal buffer, honoring the read timeout.
    ///
    /// An empty slice means end of stream.
    async fn fill(&mut self) -> io::Result<&[u8]> {
        match self.read_timeout {
            Some(limit) => tokio::time::timeout(limit, self.inner.fill_buf())
                .await
                .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "read timed out"))?,
            None => self.inner.fill_buf().await,
        }
    }

    fn advance(&mut self, n: usize) {
        self.inner.consume(n);
        self.consumed += n as u64;
    }

    /// Returns the next byte without consuming it.
    pub async fn peek_byte(&mut self) -> io::Result<Option<u8>> {
        Ok(self.fill().await?.first().copied())
    }

    /// Consumes and returns the next byte.
    pub async fn next_byte(&mut self) -> io::Result<Option<u8>> {
        let byte = match self.fill().await?.first() {
            Some(&b) => b,
            None => return Ok(None),
        };
        self.advance(1);
        Ok(Some(byte))
    }

    /// Consumes whitespace up to the first non-whitespace byte.
    pub async fn skip_whitespace(&mut self) -> io::Result<()> {
        loop {
            let buf = self.fill().await?;
            if buf.is_empty() {
                return Ok(());
            }
            let skip = buf.iter().take_while(|&&b| is_space(b)).count();
            let exhausted = skip == buf.len();
            self.advance(skip);
            if !exhausted {
                return Ok(());
            }
        }
    }

    /// Reads the next whitespace-delimited token.
    ///
    /// Leading whitespace is skipped. A backslash is dropped and the byte
    /// after it is taken literally. The terminating whitespace byte is
    /// consumed. Returns `None` when the stream ends before the token is
    /// terminated, including a trailing lone backslash.
    pub async fn next_token(&mut self) -> io::Result<Option<Bytes>> {
        self.skip_whitespace().await?;

        let mut token = BytesMut::with_capacity(INITIAL_TOKEN_CAPACITY);
        loop {
            let byte = match self.next_byte().await? {
                Some(b) => b,
                None => return Ok(None),
            };
            if is_space(byte) {
                return Ok(Some(token.freeze()));
            }
            if byte == BACKSLASH {
                match self.next_byte().await? {
                    Some(escaped) => token.put_u8(escaped),
                    None => return Ok(None),
                }
            } else {
                token.put_u8(byte);
            }
        }
    }

    /// Reads the next token as text, replacing invalid UTF-8.
    pub async fn next_string(&mut self) -> io::Result<Option<String>> {
        Ok(self
            .next_token()
            .await?
            .map(|token| String::from_utf8_lossy(&token).into_owned()))
    }

    /// Reads the next token and parses it as a signed integer.
    ///
    /// A malformed token is still consumed; it is returned so the caller can
    /// decide whether to report it.
    pub async fn next_integer(&mut self) -> io::Result<Option<IntegerToken>> {
        let token = match self.next_string().await? {
            Some(t) => t,
            None => return Ok(None),
        };
        Ok(Some(match token.parse::<i64>() {
            Ok(n) => IntegerToken::Value(n),
            Err(_) => IntegerToken::Malformed(token),
        }))
    }

    /// Reads exactly `len` bytes of opaque payload.
    ///
    /// The bytes bypass tokenization entirely. Nothing after the payload is
    /// consumed. A zero length returns immediately without touching the
    /// stream.
    pub async fn read_payload(&mut self, len: u64) -> io::Result<Bytes> {
        let prealloc = usize::try_from(len).unwrap_or(usize::MAX).min(MAX_PREALLOCATION);
        let mut payload = BytesMut::with_capacity(prealloc);
        self.transfer(len, |chunk| payload.extend_from_slice(chunk))
            .await?;
        Ok(payload.freeze())
    }

    /// Consumes and drops exactly `len` bytes.
    pub async fn discard(&mut self, len: u64) -> io::Result<()> {
        self.transfer(len, |_| {}).await
    }

    async fn transfer<F>(&mut self, len: u64, mut sink: F) -> io::Result<()>
    where
        F: FnMut(&[u8]),
    {
        let mut remaining = len;
        while remaining > 0 {
            let buf = self.fill().await?;
            if buf.is_empty() {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("stream ended with {} payload bytes outstanding", remaining),
                ));
            }
            let take = usize::try_from(remaining).map_or(buf.len(), |r| r.min(buf.len()));
            sink(&buf[..take]);
            self.advance(take);
            remaining -= take as u64;
        }
        Ok(())
    }
}
