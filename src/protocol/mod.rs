//! RESP Protocol Implementation
//!
//! This module implements the wire side of Triedis: turning client bytes into
//! requests and replies back into bytes, using the Redis Serialization
//! Protocol (RESP2) so that `redis-cli` and any Redis client library can talk
//! to the server.
//!
//! ## Modules
//!
//! - `types`: `Request` and `Reply`, and reply serialization
//! - `parser`: incremental parser for incoming requests
//!
//! ## Example
//!
//! ```
//! use triedis::protocol::{parse_request, Reply, Request};
//!
//! // Parsing incoming data
//! let data = b"*2\r\n$3\r\nGET\r\n$8\r\n10.0.0.1\r\n";
//! let (words, _consumed) = parse_request(data).unwrap().unwrap();
//! let request = Request::from_parts(words).unwrap();
//! assert_eq!(request.command_name().as_deref(), Some("GET"));
//!
//! // Creating responses
//! let response = Reply::bulk("private");
//! assert_eq!(response.serialize(), b"$7\r\nprivate\r\n");
//! ```

pub mod parser;
pub mod types;

// Re-export commonly used types for convenience
pub use parser::{parse_request, ParseError, ParseResult, RequestParser};
pub use types::{Reply, Request};
