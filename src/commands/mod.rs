//! Command Module
//!
//! This module implements the command processing layer for Triedis.
//! It receives tokenized requests, validates them into commands, executes
//! them against the database registry and returns replies.
//!
//! ## Architecture
//!
//! ```text
//! Client Request
//!       │
//!       ▼
//! ┌─────────────────┐
//! │  RESP Parser    │  (protocol module)
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │ Command::parse  │  (command.rs: arity + arguments)
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐     ┌─────────────┐
//! │ CommandHandler  │<───>│   Session   │  (selected database)
//! └────────┬────────┘     └─────────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │DatabaseRegistry │  (storage module)
//! └─────────────────┘
//! ```
//!
//! ## Supported Commands
//!
//! - `PING`, `SELECT`, `QUIT`
//! - `SET`/`INSERT`, `GET`/`LOOKUP`, `DEL`/`DELETE`, `EXISTS`
//! - `DBSIZE`/`COUNT`, `KEYS`, `FLUSHDB`, `FLUSHALL`, `INFO`

pub mod command;
pub mod handler;
pub mod session;

// Re-export the main command types
pub use command::{Command, CommandError, InfoSection};
pub use handler::{CommandHandler, INFO_FALLBACK};
pub use session::{Session, DEFAULT_DB};
