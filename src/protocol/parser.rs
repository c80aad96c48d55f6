//! Incremental RESP Request Parser
//!
//! Clients send requests either as a RESP array of bulk strings
//! (`*2\r\n$3\r\nGET\r\n$8\r\n10.0.0.1\r\n`, what `redis-cli` and client
//! libraries send) or as an inline line (`GET 10.0.0.1\r\n`, what a human
//! typing into telnet sends).
//!
//! ## How the Parser Works
//!
//! The parser reads from a buffer and returns either:
//! - `Ok(Some((words, consumed)))` - A complete request, `consumed` bytes were used
//! - `Ok(None)` - Need more data, the request is incomplete
//! - `Err(ParseError)` - Invalid protocol data
//!
//! This design allows the caller to:
//! 1. Append incoming network data to a buffer
//! 2. Call `parse()` to attempt parsing
//! 3. If successful, advance the buffer by `consumed` bytes
//! 4. If incomplete, wait for more data
//! 5. If error, report it and disconnect the client

use crate::protocol::types::{prefix, CRLF};
use bytes::Bytes;
use thiserror::Error;

/// Errors that can occur during request parsing.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// A length header is not a valid integer
    #[error("invalid integer: {0}")]
    InvalidInteger(String),

    /// Invalid UTF-8 in an inline command
    #[error("invalid UTF-8 in inline command")]
    InvalidUtf8,

    /// Bulk string length is negative
    #[error("invalid bulk length: {0}")]
    InvalidBulkLength(i64),

    /// Array length is negative or too large
    #[error("invalid multibulk length: {0}")]
    InvalidArrayLength(i64),

    /// An array element is not a bulk string
    #[error("expected '$', got '{}'", char::from(*.0))]
    UnexpectedElement(u8),

    /// Protocol violation (missing CRLF, etc.)
    #[error("{0}")]
    ProtocolError(String),

    /// A bulk string exceeds the maximum allowed size
    #[error("bulk string too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },
}

/// Result type for parsing operations.
pub type ParseResult<T> = Result<T, ParseError>;

/// Maximum size for a single bulk string (512 MB, same as Redis)
pub const MAX_BULK_SIZE: usize = 512 * 1024 * 1024;

/// Maximum number of words in one request
pub const MAX_ARRAY_LEN: usize = 1024 * 1024;

/// A RESP request parser.
///
/// # Example
///
/// ```
/// use triedis::protocol::RequestParser;
///
/// let parser = RequestParser::new();
/// let buffer = b"*2\r\n$3\r\nGET\r\n$8\r\n10.0.0.1\r\n";
///
/// let (words, consumed) = parser.parse(buffer).unwrap().unwrap();
/// assert_eq!(words.len(), 2);
/// assert_eq!(consumed, buffer.len());
/// ```
#[derive(Debug, Default, Clone, Copy)]
pub struct RequestParser;

impl RequestParser {
    /// Creates a new parser instance.
    pub fn new() -> Self {
        Self
    }

    /// Attempts to parse one request from the front of `buf`.
    ///
    /// An empty request (`*0\r\n` or a blank inline line) yields an empty word list.
    pub fn parse(&self, buf: &[u8]) -> ParseResult<Option<(Vec<Bytes>, usize)>> {
        if buf.is_empty() {
            return Ok(None);
        }

        match buf[0] {
            prefix::ARRAY => self.parse_array(buf),
            _ => self.parse_inline(buf),
        }
    }

    /// Bytes at the front of `buf` already accounted for by length headers.
    ///
    /// For a partially received array this is everything up to the end of
    /// the last bulk string whose header has arrived, even if its data has
    /// not. Inline requests and malformed headers report 0; `parse` is what
    /// reports the error.
    pub fn framed_len(&self, buf: &[u8]) -> usize {
        if buf.first() != Some(&prefix::ARRAY) {
            return 0;
        }
        let Ok(Some((count, mut framed))) = parse_header(buf) else {
            return 0;
        };

        for _ in 0..count.max(0) {
            let Some(rest) = buf.get(framed..).filter(|rest| !rest.is_empty()) else {
                break;
            };
            if rest[0] != prefix::BULK_STRING {
                break;
            }
            let Ok(Some((length, data_start))) = parse_header(rest) else {
                break;
            };
            match usize::try_from(length) {
                Ok(length) if length <= MAX_BULK_SIZE => framed += data_start + length + 2,
                _ => break,
            }
            if framed >= buf.len() {
                break;
            }
        }

        framed
    }

    /// Parses an array of bulk strings: `*<count>\r\n$<len>\r\n<data>\r\n...`
    fn parse_array(&self, buf: &[u8]) -> ParseResult<Option<(Vec<Bytes>, usize)>> {
        debug_assert!(buf[0] == prefix::ARRAY);

        let Some((count, mut consumed)) = parse_header(buf)? else {
            return Ok(None);
        };

        if count < 0 || count as usize > MAX_ARRAY_LEN {
            return Err(ParseError::InvalidArrayLength(count));
        }

        let count = count as usize;
        let mut words = Vec::with_capacity(count.min(64));

        for _ in 0..count {
            if consumed >= buf.len() {
                return Ok(None); // Incomplete
            }

            match self.parse_bulk_string(&buf[consumed..])? {
                Some((word, used)) => {
                    words.push(word);
                    consumed += used;
                }
                None => return Ok(None),
            }
        }

        Ok(Some((words, consumed)))
    }

    /// Parses a bulk string: `$<length>\r\n<data>\r\n`
    fn parse_bulk_string(&self, buf: &[u8]) -> ParseResult<Option<(Bytes, usize)>> {
        if buf[0] != prefix::BULK_STRING {
            return Err(ParseError::UnexpectedElement(buf[0]));
        }

        let Some((length, data_start)) = parse_header(buf)? else {
            return Ok(None);
        };

        if length < 0 {
            return Err(ParseError::InvalidBulkLength(length));
        }

        let length = length as usize;
        if length > MAX_BULK_SIZE {
            return Err(ParseError::MessageTooLarge {
                size: length,
                max: MAX_BULK_SIZE,
            });
        }

        let total_needed = data_start + length + 2; // data + CRLF
        if buf.len() < total_needed {
            return Ok(None); // Incomplete
        }

        if &buf[data_start + length..total_needed] != CRLF {
            return Err(ParseError::ProtocolError(
                "bulk string missing trailing CRLF".to_string(),
            ));
        }

        let data = Bytes::copy_from_slice(&buf[data_start..data_start + length]);
        Ok(Some((data, total_needed)))
    }

    /// Parses an inline command: words separated by whitespace, ended by CRLF.
    fn parse_inline(&self, buf: &[u8]) -> ParseResult<Option<(Vec<Bytes>, usize)>> {
        let Some(crlf_pos) = find_crlf(buf) else {
            return Ok(None);
        };

        let line = std::str::from_utf8(&buf[..crlf_pos]).map_err(|_| ParseError::InvalidUtf8)?;

        let words = line
            .split_whitespace()
            .map(|s| Bytes::copy_from_slice(s.as_bytes()))
            .collect();

        Ok(Some((words, crlf_pos + 2)))
    }
}

/// Parses a `<prefix><integer>\r\n` header line.
///
/// Returns the integer and the number of bytes the header used.
fn parse_header(buf: &[u8]) -> ParseResult<Option<(i64, usize)>> {
    let Some(pos) = find_crlf(&buf[1..]) else {
        return Ok(None);
    };

    let text = std::str::from_utf8(&buf[1..1 + pos])
        .map_err(|_| ParseError::InvalidInteger(String::from_utf8_lossy(&buf[1..1 + pos]).into()))?;
    let n: i64 = text
        .parse()
        .map_err(|_| ParseError::InvalidInteger(text.to_string()))?;

    // +1 for prefix, +2 for CRLF
    Ok(Some((n, 1 + pos + 2)))
}

/// Finds the position of CRLF in the buffer.
///
/// Returns the position of `\r` if found, or None if CRLF is not present.
#[inline]
fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == CRLF)
}

/// Helper function to parse a single request from bytes.
pub fn parse_request(buf: &[u8]) -> ParseResult<Option<(Vec<Bytes>, usize)>> {
    RequestParser::new().parse(buf)
}
