//! Single-writer object store.
//!
//! The store keeps one committed [`StoreState`] behind an `Arc`. Readers
//! take a snapshot and never block writers for longer than a pointer swap.
//! Writers are serialized; each write transaction works on its own copy of
//! the state, which replaces the committed state only when the transaction
//! body returns `Ok`.

mod state;
mod table;
mod transaction;

pub use state::{StoreState, StoredObject};
pub use table::Table;
pub use transaction::Transaction;

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::debug;

use crate::config::StoreConfig;
use crate::error::CoreResult;

/// The object store handle.
#[derive(Debug, Default)]
pub struct Database {
    committed: RwLock<Arc<StoreState>>,
    writer: Mutex<()>,
    config: StoreConfig,
}

impl Database {
    /// Opens an empty store with default configuration.
    #[must_use]
    pub fn open_in_memory() -> Self {
        Self::with_config(StoreConfig::default())
    }

    /// Opens an empty store with the given configuration.
    #[must_use]
    pub fn with_config(config: StoreConfig) -> Self {
        Self {
            committed: RwLock::new(Arc::new(StoreState::new())),
            writer: Mutex::new(()),
            config,
        }
    }

    /// Store configuration.
    #[must_use]
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Returns a consistent snapshot of the committed state.
    #[must_use]
    pub fn snapshot(&self) -> Arc<StoreState> {
        Arc::clone(&self.committed.read())
    }

    /// Runs a read-only function against a snapshot.
    pub fn read<F, T>(&self, f: F) -> T
    where
        F: FnOnce(&StoreState) -> T,
    {
        let snapshot = self.snapshot();
        f(&snapshot)
    }

    /// Executes a function within a write transaction.
    ///
    /// If the function returns `Ok`, the transaction is committed.
    /// If it returns `Err`, every change it made is discarded.
    pub fn transaction<F, T>(&self, f: F) -> CoreResult<T>
    where
        F: FnOnce(&mut Transaction<'_>) -> CoreResult<T>,
    {
        let _writer = self.writer.lock();
        let base = StoreState::clone(&self.committed.read());
        let mut txn = Transaction::new(base, &self.config);
        match f(&mut txn) {
            Ok(value) => {
                *self.committed.write() = Arc::new(txn.into_state());
                Ok(value)
            }
            Err(err) => {
                debug!(error = %err, "transaction rolled back");
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoreError;
    use crate::item::Item;
    use crate::types::LibraryId;
    use chrono::Utc;

    #[test]
    fn commit_on_ok() {
        let db = Database::open_in_memory();
        db.transaction(|txn| {
            txn.insert(Item::new(LibraryId::User, "A", "document", Utc::now()));
            Ok(())
        })
        .unwrap();

        assert!(db.read(|state| state.item(LibraryId::User, "A").is_some()));
    }

    #[test]
    fn rollback_on_err() {
        let db = Database::open_in_memory();
        let result: CoreResult<()> = db.transaction(|txn| {
            txn.insert(Item::new(LibraryId::User, "A", "document", Utc::now()));
            Err(CoreError::transaction_aborted("test"))
        });

        assert!(result.is_err());
        assert!(db.read(|state| state.item(LibraryId::User, "A").is_none()));
    }

    #[test]
    fn snapshots_are_isolated_from_later_commits() {
        let db = Database::open_in_memory();
        let before = db.snapshot();
        db.transaction(|txn| {
            txn.insert(Item::new(LibraryId::User, "A", "document", Utc::now()));
            Ok(())
        })
        .unwrap();

        assert!(before.item(LibraryId::User, "A").is_none());
        assert!(db.snapshot().item(LibraryId::User, "A").is_some());
    }
}
