//! # Triedis - A Prefix-Keyed In-Memory Database
//!
//! Triedis speaks the Redis protocol, but its keys are IP network prefixes
//! (`10.0.0.0/8`, `2001:db8::/32`) and reads resolve by longest-prefix match:
//! `GET 10.1.2.3` returns the value of the most specific stored prefix that
//! covers the address.
//!
//! ## Features
//!
//! - **Redis-Compatible**: RESP2 framing, usable from `redis-cli`
//! - **Longest-Prefix Match**: PATRICIA trie per database, IPv4 and IPv6
//! - **Many Databases**: `SELECT` any non-negative index, created on first use
//! - **Async I/O**: One Tokio task per client connection
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                              Triedis                                    │
//! │                                                                         │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐                  │
//! │  │ TCP Server  │───>│ Connection  │───>│  Command    │                  │
//! │  │ (Listener)  │    │  Handler    │    │  Handler    │                  │
//! │  └─────────────┘    │ + Session   │    └──────┬──────┘                  │
//! │                     └─────────────┘           │                         │
//! │                                               ▼                         │
//! │  ┌─────────────┐    ┌──────────────────────────────────────────────┐   │
//! │  │   RESP      │    │            DatabaseRegistry                  │   │
//! │  │   Parser    │    │  ┌────────┐ ┌────────┐ ┌────────┐            │   │
//! │  │             │    │  │ db 0   │ │ db 1   │ │ db N   │  ...       │   │
//! │  └─────────────┘    │  │RwLock  │ │RwLock  │ │RwLock  │            │   │
//! │                     │  │ trie   │ │ trie   │ │ trie   │            │   │
//! │                     │  └────────┘ └────────┘ └────────┘            │   │
//! │                     └──────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use triedis::commands::CommandHandler;
//! use triedis::connection::{handle_connection, ConnectionStats};
//! use triedis::storage::DatabaseRegistry;
//! use std::sync::Arc;
//! use tokio::net::TcpListener;
//!
//! #[tokio::main]
//! async fn main() {
//!     let registry = Arc::new(DatabaseRegistry::new());
//!     let handler = CommandHandler::new(registry);
//!     let stats = Arc::new(ConnectionStats::new());
//!
//!     let listener = TcpListener::bind("127.0.0.1:6379").await.unwrap();
//!
//!     loop {
//!         let (stream, addr) = listener.accept().await.unwrap();
//!         tokio::spawn(handle_connection(stream, addr, handler.clone(), Arc::clone(&stats)));
//!     }
//! }
//! ```
//!
//! ## Supported Commands
//!
//! - `PING`
//! - `SELECT index`
//! - `SET prefix value` / `INSERT prefix value`
//! - `GET address-or-prefix` / `LOOKUP address-or-prefix`
//! - `DEL prefix [prefix ...]` / `DELETE prefix [prefix ...]`
//! - `EXISTS prefix [prefix ...]`
//! - `DBSIZE` / `COUNT`
//! - `KEYS [prefix]`
//! - `FLUSHDB` / `FLUSHALL`
//! - `INFO [section]`
//! - `QUIT`
//!
//! ## Module Overview
//!
//! - [`protocol`]: RESP request parser and reply types
//! - [`storage`]: prefix keys, the trie, per-database engines and the registry
//! - [`commands`]: command validation, execution and per-connection sessions
//! - [`connection`]: client connection management
//! - [`config`]: command-line configuration

pub mod commands;
pub mod config;
pub mod connection;
pub mod protocol;
pub mod storage;

// Re-export commonly used types for convenience
pub use commands::{CommandHandler, Session};
pub use config::{CliAction, Config, ConfigError, DEFAULT_ADDR};
pub use connection::{handle_connection, ConnectionStats};
pub use protocol::{ParseError, Reply, Request, RequestParser};
pub use storage::{DatabaseRegistry, PrefixKey, TrieEngine};

/// Version of Triedis
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
