//! Request and Reply Types
//!
//! A client sends a `Request`: a command name plus byte-string arguments.
//! The server answers every request with exactly one `Reply`, written in
//! RESP2 wire format.
//!
//! ## Reply Format
//!
//! Each reply starts with a type prefix byte:
//! - `+` Status
//! - `-` Error
//! - `:` Integer
//! - `$` Bulk String (`$-1` for Null)
//! - `*` Array
//!
//! All types are terminated with CRLF (`\r\n`).

use bytes::Bytes;

/// The CRLF terminator used in RESP protocol
pub const CRLF: &[u8] = b"\r\n";

/// RESP protocol type prefixes
pub mod prefix {
    pub const SIMPLE_STRING: u8 = b'+';
    pub const ERROR: u8 = b'-';
    pub const INTEGER: u8 = b':';
    pub const BULK_STRING: u8 = b'$';
    pub const ARRAY: u8 = b'*';
}

/// A tokenized client request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Command name as sent by the client (case preserved)
    pub name: Bytes,
    /// Arguments following the name, in order
    pub args: Vec<Bytes>,
}

impl Request {
    /// Builds a request from its words, the first being the command name.
    ///
    /// Returns `None` for an empty word list.
    pub fn from_parts(mut parts: Vec<Bytes>) -> Option<Self> {
        if parts.is_empty() {
            return None;
        }
        let name = parts.remove(0);
        Some(Self { name, args: parts })
    }

    /// Upper-cased command name, if it is valid UTF-8.
    pub fn command_name(&self) -> Option<String> {
        std::str::from_utf8(&self.name)
            .ok()
            .map(|s| s.to_ascii_uppercase())
    }
}

/// A reply to one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Status line, e.g. `+OK`
    Status(String),

    /// Error line, e.g. `-ERR unknown command 'FOO'`
    Error(String),

    /// 64-bit signed integer
    Integer(i64),

    /// Binary-safe string
    Bulk(Bytes),

    /// Null bulk string (`$-1`)
    Null,

    /// Sequence of replies
    Array(Vec<Reply>),
}

impl Reply {
    /// Creates a new error reply.
    ///
    /// # Example
    /// ```
    /// use triedis::protocol::Reply;
    /// let err = Reply::error("ERR unknown command 'FOO'");
    /// assert_eq!(err.serialize(), b"-ERR unknown command 'FOO'\r\n");
    /// ```
    pub fn error(s: impl Into<String>) -> Self {
        Reply::Error(s.into())
    }

    pub fn integer(n: i64) -> Self {
        Reply::Integer(n)
    }

    pub fn bulk(data: impl Into<Bytes>) -> Self {
        Reply::Bulk(data.into())
    }

    /// `Bulk` when a value is present, `Null` otherwise.
    pub fn optional_bulk(value: Option<Bytes>) -> Self {
        value.map(Reply::Bulk).unwrap_or(Reply::Null)
    }

    /// Common response for successful operations
    pub fn ok() -> Self {
        Reply::Status("OK".to_string())
    }

    /// Common response for PING
    pub fn pong() -> Self {
        Reply::Status("PONG".to_string())
    }

    /// Serializes the reply to bytes for sending over the wire.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.serialize_into(&mut buf);
        buf
    }

    /// Serializes the reply into an existing buffer.
    pub fn serialize_into(&self, buf: &mut Vec<u8>) {
        match self {
            Reply::Status(s) => write_line(buf, prefix::SIMPLE_STRING, s.as_bytes()),
            Reply::Error(s) => write_line(buf, prefix::ERROR, s.as_bytes()),
            Reply::Integer(n) => write_line(buf, prefix::INTEGER, n.to_string().as_bytes()),
            Reply::Bulk(data) => {
                write_line(buf, prefix::BULK_STRING, data.len().to_string().as_bytes());
                buf.extend_from_slice(data);
                buf.extend_from_slice(CRLF);
            }
            Reply::Null => write_line(buf, prefix::BULK_STRING, b"-1"),
            Reply::Array(values) => {
                write_line(buf, prefix::ARRAY, values.len().to_string().as_bytes());
                for value in values {
                    value.serialize_into(buf);
                }
            }
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Reply::Error(_))
    }
}

fn write_line(buf: &mut Vec<u8>, type_prefix: u8, content: &[u8]) {
    buf.push(type_prefix);
    buf.extend_from_slice(content);
    buf.extend_from_slice(CRLF);
}
