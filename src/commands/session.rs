//! Per-Connection Session State

use crate::storage::DbIndex;

/// Database selected by a connection that never sent SELECT.
pub const DEFAULT_DB: DbIndex = 0;

/// State owned by one client connection.
///
/// The selected database is only an index into the registry; a session never
/// holds trie state of its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    selected_db: DbIndex,
    closing: bool,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self {
            selected_db: DEFAULT_DB,
            closing: false,
        }
    }

    /// Index of the database commands run against.
    pub fn selected_db(&self) -> DbIndex {
        self.selected_db
    }

    pub fn select(&mut self, index: DbIndex) {
        self.selected_db = index;
    }

    /// Marks the connection to be closed after the current reply.
    pub fn request_close(&mut self) {
        self.closing = true;
    }

    pub fn is_closing(&self) -> bool {
        self.closing
    }
}
