//! Storage Module
//!
//! This module provides the prefix storage for Triedis: canonical prefix
//! keys, the PATRICIA trie, the locked per-database engine and the registry
//! of logical databases.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    DatabaseRegistry                         │
//! │                RwLock<BTreeMap<index, _>>                   │
//! │  ┌────────────┐ ┌────────────┐ ┌────────────┐               │
//! │  │    db 0    │ │    db 1    │ │   db N     │               │
//! │  │ TrieEngine │ │ TrieEngine │ │ TrieEngine │               │
//! │  │   RwLock   │ │   RwLock   │ │   RwLock   │               │
//! │  └────────────┘ └────────────┘ └────────────┘               │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```
//! use triedis::storage::{DatabaseRegistry, PrefixKey};
//! use bytes::Bytes;
//!
//! let registry = DatabaseRegistry::new();
//! let db = registry.get_or_create(0);
//!
//! db.insert(PrefixKey::parse("192.168.0.0/16").unwrap(), Bytes::from("private"));
//! let hit = db.get_lpm(&PrefixKey::parse("192.168.1.15").unwrap());
//! assert_eq!(hit, Some(Bytes::from("private")));
//! ```

pub mod engine;
pub mod prefix;
pub mod registry;
pub mod trie;

// Re-export commonly used types
pub use engine::{EngineStats, TrieEngine};
pub use prefix::{Family, PrefixError, PrefixKey};
pub use registry::{DatabaseRegistry, DbIndex};
pub use trie::PrefixTrie;
