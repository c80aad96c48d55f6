//! Database Registry
//!
//! Maps a database index to its `TrieEngine`, creating engines lazily on
//! first reference. Engines live for the rest of the process; FLUSHDB empties
//! an engine but never removes its slot.
//!
//! The index map sits behind its own `RwLock`. Lookups of existing engines
//! take the read lock; creation re-checks under the write lock, so two
//! connections racing on a new index always end up sharing one engine.

use crate::storage::engine::{EngineStats, TrieEngine};
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::debug;

/// Index of a logical database.
pub type DbIndex = usize;

/// Owns every logical database.
#[derive(Debug, Default)]
pub struct DatabaseRegistry {
    engines: RwLock<BTreeMap<DbIndex, Arc<TrieEngine>>>,
}

impl DatabaseRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the engine for `index`, creating an empty one on first use.
    pub fn get_or_create(&self, index: DbIndex) -> Arc<TrieEngine> {
        if let Some(engine) = self.get(index) {
            return engine;
        }

        let mut engines = self.engines.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(engines.entry(index).or_insert_with(|| {
            debug!(db = index, "Creating database");
            Arc::new(TrieEngine::new())
        }))
    }

    /// Returns the engine for `index` if it has been created.
    pub fn get(&self, index: DbIndex) -> Option<Arc<TrieEngine>> {
        self.engines
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&index)
            .cloned()
    }

    /// `(index, key_count)` for every created database, ascending by index.
    ///
    /// Each count is consistent for its engine; the set as a whole is not one
    /// atomic snapshot.
    pub fn snapshot(&self) -> Vec<(DbIndex, u64)> {
        self.engines()
            .into_iter()
            .map(|(index, engine)| (index, engine.key_count()))
            .collect()
    }

    /// Number of created databases.
    pub fn len(&self) -> usize {
        self.engines
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Clears every created database. Slots are kept.
    pub fn flush_all(&self) {
        for (_, engine) in self.engines() {
            engine.clear();
        }
    }

    /// Counters summed over every created database.
    pub fn stats(&self) -> EngineStats {
        self.engines()
            .into_iter()
            .map(|(_, engine)| engine.stats())
            .fold(EngineStats::default(), |total, stats| EngineStats {
                keys: total.keys + stats.keys,
                lookups: total.lookups + stats.lookups,
                hits: total.hits + stats.hits,
                inserts: total.inserts + stats.inserts,
                deletes: total.deletes + stats.deletes,
            })
    }

    // Engines are cloned out so no engine lock is taken under the map lock.
    fn engines(&self) -> Vec<(DbIndex, Arc<TrieEngine>)> {
        self.engines
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(index, engine)| (*index, Arc::clone(engine)))
            .collect()
    }
}
