//! Per-Database Trie Engine
//!
//! A `TrieEngine` is one logical database: a `PrefixTrie` behind a single
//! `RwLock`, plus operation counters.
//!
//! ## Concurrency Model
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                 TrieEngine                   │
//! │                                              │
//! │   get / lookup / count / keys  -> read lock  │
//! │   insert / delete / clear      -> write lock │
//! │                                              │
//! │   ┌──────────────────────────────────────┐   │
//! │   │     RwLock<PrefixTrie<Bytes>>        │   │
//! │   └──────────────────────────────────────┘   │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! Every trie operation is a walk bounded by the address width (at most 128
//! levels) with no I/O, so a lock is never held longer than one traversal.
//! A writer replaces a link only after the new node is fully built, and holds
//! the exclusive lock while doing so, so readers never observe a half-linked
//! node. Engines share nothing: a writer on one database never blocks another.

use crate::storage::prefix::PrefixKey;
use crate::storage::trie::PrefixTrie;
use bytes::Bytes;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// One logical database of prefix keys.
///
/// # Example
///
/// ```
/// use triedis::storage::{PrefixKey, TrieEngine};
/// use bytes::Bytes;
///
/// let engine = TrieEngine::new();
/// engine.insert(PrefixKey::parse("10.0.0.0/8").unwrap(), Bytes::from("A"));
/// engine.insert(PrefixKey::parse("10.1.0.0/16").unwrap(), Bytes::from("B"));
///
/// let query = PrefixKey::parse("10.1.2.3").unwrap();
/// assert_eq!(engine.get_lpm(&query), Some(Bytes::from("B")));
/// ```
pub struct TrieEngine {
    trie: RwLock<PrefixTrie<Bytes>>,

    /// Statistics: total lookups (exact and LPM)
    lookup_count: AtomicU64,

    /// Statistics: lookups that found a value
    hit_count: AtomicU64,

    /// Statistics: total insert operations
    insert_count: AtomicU64,

    /// Statistics: total delete operations
    delete_count: AtomicU64,
}

/// Snapshot of an engine's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub keys: u64,
    pub lookups: u64,
    pub hits: u64,
    pub inserts: u64,
    pub deletes: u64,
}

impl std::fmt::Debug for TrieEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrieEngine")
            .field("keys", &self.key_count())
            .field("lookup_count", &self.lookup_count.load(Ordering::Relaxed))
            .field("insert_count", &self.insert_count.load(Ordering::Relaxed))
            .finish()
    }
}

impl Default for TrieEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl TrieEngine {
    /// Creates an empty engine.
    pub fn new() -> Self {
        Self {
            trie: RwLock::new(PrefixTrie::new()),
            lookup_count: AtomicU64::new(0),
            hit_count: AtomicU64::new(0),
            insert_count: AtomicU64::new(0),
            delete_count: AtomicU64::new(0),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, PrefixTrie<Bytes>> {
        self.trie.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, PrefixTrie<Bytes>> {
        self.trie.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn record_lookup(&self, found: bool) {
        self.lookup_count.fetch_add(1, Ordering::Relaxed);
        if found {
            self.hit_count.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Stores `value` at exactly `key`, overwriting any previous value.
    ///
    /// # Returns
    ///
    /// Returns `true` if a new key was created, `false` if an existing key was updated.
    pub fn insert(&self, key: PrefixKey, value: Bytes) -> bool {
        self.insert_count.fetch_add(1, Ordering::Relaxed);
        self.write().insert(key, value).is_none()
    }

    /// Returns the value stored at exactly `key`.
    pub fn get_exact(&self, key: &PrefixKey) -> Option<Bytes> {
        let value = self.read().get(key).cloned();
        self.record_lookup(value.is_some());
        value
    }

    /// Returns the value of the most specific stored prefix containing `query`.
    pub fn get_lpm(&self, query: &PrefixKey) -> Option<Bytes> {
        self.longest_match(query).map(|(_, value)| value)
    }

    /// Like [`get_lpm`](Self::get_lpm), also returning the matching key.
    pub fn longest_match(&self, query: &PrefixKey) -> Option<(PrefixKey, Bytes)> {
        let found = self
            .read()
            .longest_match(query)
            .map(|(key, value)| (key, value.clone()));
        self.record_lookup(found.is_some());
        found
    }

    /// Removes the value stored at exactly `key`.
    ///
    /// # Returns
    ///
    /// Returns `true` if the key was deleted, `false` if it didn't exist.
    pub fn delete(&self, key: &PrefixKey) -> bool {
        self.delete_count.fetch_add(1, Ordering::Relaxed);
        self.write().remove(key).is_some()
    }

    /// Deletes several keys under one write lock.
    ///
    /// # Returns
    ///
    /// Returns the number of keys that were deleted.
    pub fn delete_many(&self, keys: &[PrefixKey]) -> u64 {
        self.delete_count
            .fetch_add(keys.len() as u64, Ordering::Relaxed);
        let mut trie = self.write();
        keys.iter().filter(|key| trie.remove(key).is_some()).count() as u64
    }

    /// Counts how many of the given keys are stored exactly.
    pub fn exists_many(&self, keys: &[PrefixKey]) -> u64 {
        let found = {
            let trie = self.read();
            keys.iter().filter(|key| trie.get(key).is_some()).count() as u64
        };
        self.lookup_count
            .fetch_add(keys.len() as u64, Ordering::Relaxed);
        self.hit_count.fetch_add(found, Ordering::Relaxed);
        found
    }

    /// Drops every key.
    pub fn clear(&self) {
        self.write().clear();
    }

    /// Number of stored keys.
    pub fn key_count(&self) -> u64 {
        self.read().len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.key_count() == 0
    }

    /// Every stored key, taken under one read lock.
    pub fn enumerate_keys(&self) -> Vec<PrefixKey> {
        self.read().keys()
    }

    /// Stored keys equal to or more specific than `filter`.
    pub fn keys_within(&self, filter: &PrefixKey) -> Vec<PrefixKey> {
        self.read().keys_within(filter)
    }

    /// Returns engine statistics.
    pub fn stats(&self) -> EngineStats {
        EngineStats {
            keys: self.key_count(),
            lookups: self.lookup_count.load(Ordering::Relaxed),
            hits: self.hit_count.load(Ordering::Relaxed),
            inserts: self.insert_count.load(Ordering::Relaxed),
            deletes: self.delete_count.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn key(s: &str) -> PrefixKey {
        PrefixKey::parse(s).unwrap()
    }

    #[test]
    fn test_insert_and_lookup() {
        let engine = TrieEngine::new();

        assert!(engine.insert(key("10.0.0.0/8"), Bytes::from("A")));
        assert!(engine.insert(key("10.1.0.0/16"), Bytes::from("B")));
        assert!(!engine.insert(key("10.1.0.0/16"), Bytes::from("B2")));

        assert_eq!(engine.get_lpm(&key("10.1.2.3")), Some(Bytes::from("B2")));
        assert_eq!(engine.get_lpm(&key("10.2.0.0")), Some(Bytes::from("A")));
        assert_eq!(engine.get_lpm(&key("192.168.0.0")), None);
        assert_eq!(engine.key_count(), 2);
    }

    #[test]
    fn test_longest_match_reports_key() {
        let engine = TrieEngine::new();
        engine.insert(key("10.0.0.0/8"), Bytes::from("A"));

        let (matched, value) = engine.longest_match(&key("10.20.30.40")).unwrap();
        assert_eq!(matched, key("10.0.0.0/8"));
        assert_eq!(value, Bytes::from("A"));
    }

    #[test]
    fn test_delete_then_lookup() {
        let engine = TrieEngine::new();
        engine.insert(key("10.0.0.0/8"), Bytes::from("A"));
        engine.insert(key("10.0.0.0/16"), Bytes::from("B"));

        assert!(engine.delete(&key("10.0.0.0/8")));
        assert_eq!(engine.get_exact(&key("10.0.0.0/8")), None);
        assert_eq!(engine.get_exact(&key("10.0.0.0/16")), Some(Bytes::from("B")));
        assert_eq!(engine.key_count(), 1);

        assert!(!engine.delete(&key("10.0.0.0/8")));
        assert_eq!(engine.key_count(), 1);
    }

    #[test]
    fn test_delete_many_and_exists_many() {
        let engine = TrieEngine::new();
        engine.insert(key("10.0.0.0/8"), Bytes::from("A"));
        engine.insert(key("::/0"), Bytes::from("B"));

        let keys = [key("10.0.0.0/8"), key("::/0"), key("1.2.3.4")];
        assert_eq!(engine.exists_many(&keys), 2);
        assert_eq!(engine.delete_many(&keys), 2);
        assert_eq!(engine.exists_many(&keys), 0);
        assert!(engine.is_empty());
    }

    #[test]
    fn test_clear_resets_count() {
        let engine = TrieEngine::new();
        for i in 0..50u8 {
            engine.insert(key(&format!("10.{}.0.0/16", i)), Bytes::from("v"));
        }
        engine.delete(&key("10.3.0.0/16"));
        assert_eq!(engine.key_count(), 49);

        engine.clear();
        assert_eq!(engine.key_count(), 0);
        assert!(engine.enumerate_keys().is_empty());
    }

    #[test]
    fn test_stats() {
        let engine = TrieEngine::new();
        engine.insert(key("10.0.0.0/8"), Bytes::from("A"));
        engine.get_lpm(&key("10.1.1.1"));
        engine.get_lpm(&key("11.1.1.1"));
        engine.exists_many(&[key("10.0.0.0/8"), key("10.0.0.0/9")]);
        engine.delete(&key("10.0.0.0/8"));

        let stats = engine.stats();
        assert_eq!(stats.keys, 0);
        assert_eq!(stats.inserts, 1);
        assert_eq!(stats.lookups, 4);
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.deletes, 1);
    }

    #[test]
    fn test_concurrent_inserts() {
        let engine = Arc::new(TrieEngine::new());
        let mut handles = vec![];

        // 8 writers x 250 distinct keys, with readers interleaved
        for i in 0..8u32 {
            let engine = Arc::clone(&engine);
            handles.push(thread::spawn(move || {
                for j in 0..250u32 {
                    let addr = std::net::Ipv4Addr::from((i << 24) | (j << 8));
                    let k = PrefixKey::new(addr.into(), 24).unwrap();
                    engine.insert(k, Bytes::from("value"));
                    assert!(engine.get_exact(&k).is_some());
                    engine.enumerate_keys();
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(engine.key_count(), 2000);
        assert_eq!(engine.enumerate_keys().len(), 2000);
    }
}
