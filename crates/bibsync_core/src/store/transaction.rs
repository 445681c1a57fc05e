//! Write transactions and user edits that must keep model invariants.

use std::ops::{Deref, DerefMut};

use tracing::debug;

use super::state::StoreState;
use crate::change::{ChangeFlags, ChangeOrigin};
use crate::config::StoreConfig;
use crate::error::{CoreError, CoreResult};
use crate::types::{LibraryId, ObjectKind};

/// A write transaction.
///
/// Holds a private copy of the store state. Reads and writes go through
/// [`StoreState`] via `Deref`; the copy replaces the committed state only
/// if the transaction body returns `Ok`.
#[derive(Debug)]
pub struct Transaction<'a> {
    state: StoreState,
    config: &'a StoreConfig,
}

impl<'a> Transaction<'a> {
    pub(crate) fn new(state: StoreState, config: &'a StoreConfig) -> Self {
        Self { state, config }
    }

    pub(crate) fn into_state(self) -> StoreState {
        self.state
    }

    /// Store configuration.
    #[must_use]
    pub fn config(&self) -> &StoreConfig {
        self.config
    }

    /// Moves an item under a new parent item, or to the top level.
    ///
    /// Child items never belong to collections directly: membership moves
    /// to the new root item when an item becomes a child, and is inherited
    /// from the former root when it becomes top-level again.
    pub fn set_item_parent(
        &mut self,
        library: LibraryId,
        key: &str,
        parent: Option<&str>,
    ) -> CoreResult<()> {
        let item = self
            .state
            .item(library, key)
            .ok_or_else(|| CoreError::not_found(ObjectKind::Item, key))?;
        if item.parent.as_deref() == parent {
            return Ok(());
        }
        let former_root = self.state.root_item_key(library, key);

        match parent {
            Some(parent) => {
                if self.state.item(library, parent).is_none() {
                    return Err(CoreError::not_found(ObjectKind::Item, parent));
                }
                if parent == key
                    || self
                        .state
                        .descendant_items(library, key)
                        .iter()
                        .any(|descendant| descendant == parent)
                {
                    return Err(CoreError::invalid_operation(format!(
                        "item {key} cannot be its own ancestor"
                    )));
                }
                let new_root = self.state.root_item_key(library, parent);
                let moved = self
                    .state
                    .item_mut(library, key)
                    .map(|item| std::mem::take(&mut item.collections))
                    .unwrap_or_default();
                if let Some(root) = self.state.item_mut(library, &new_root) {
                    let before = root.collections.len();
                    root.collections.extend(moved);
                    if root.collections.len() != before {
                        root.sync
                            .record_change(ChangeFlags::COLLECTIONS, ChangeOrigin::User);
                    }
                }
            }
            None => {
                let inherited = self
                    .state
                    .item(library, &former_root)
                    .map(|root| root.collections.clone())
                    .unwrap_or_default();
                if let Some(item) = self.state.item_mut(library, key) {
                    item.collections = inherited;
                }
            }
        }

        if let Some(item) = self.state.item_mut(library, key) {
            item.parent = parent.map(str::to_owned);
            let mut flags = ChangeFlags::PARENT;
            if item.parent.is_none() || !item.collections.is_empty() {
                flags |= ChangeFlags::COLLECTIONS;
            }
            item.sync.record_change(flags, ChangeOrigin::User);
        }
        debug!(library = %library, key, parent = ?parent, "item re-parented");
        Ok(())
    }

    /// Moves a collection under a new parent collection, or to the top level.
    ///
    /// Fails with [`CoreError::CollectionCycle`] if `key` would become its
    /// own ancestor.
    pub fn set_collection_parent(
        &mut self,
        library: LibraryId,
        key: &str,
        parent: Option<&str>,
    ) -> CoreResult<()> {
        if self.state.collection(library, key).is_none() {
            return Err(CoreError::not_found(ObjectKind::Collection, key));
        }
        if let Some(parent) = parent {
            if self.state.collection(library, parent).is_none() {
                return Err(CoreError::not_found(ObjectKind::Collection, parent));
            }
            if self.config.check_collection_cycles
                && self.state.would_create_collection_cycle(library, key, parent)
            {
                return Err(CoreError::CollectionCycle {
                    key: key.to_owned(),
                    parent: parent.to_owned(),
                });
            }
        }
        if let Some(collection) = self.state.collection_mut(library, key) {
            if collection.parent.as_deref() != parent {
                collection.parent = parent.map(str::to_owned);
                collection
                    .sync
                    .record_change(ChangeFlags::PARENT, ChangeOrigin::User);
            }
        }
        Ok(())
    }

    /// Adds a top-level item to a collection.
    pub fn add_item_to_collection(
        &mut self,
        library: LibraryId,
        item_key: &str,
        collection_key: &str,
    ) -> CoreResult<()> {
        if self.state.collection(library, collection_key).is_none() {
            return Err(CoreError::not_found(ObjectKind::Collection, collection_key));
        }
        let reject_children = self.config.reject_child_collection_membership;
        let item = self
            .state
            .item_mut(library, item_key)
            .ok_or_else(|| CoreError::not_found(ObjectKind::Item, item_key))?;
        if reject_children && item.parent.is_some() {
            return Err(CoreError::invalid_operation(format!(
                "child item {item_key} cannot belong to a collection"
            )));
        }
        if item.collections.insert(collection_key.to_owned()) {
            item.sync
                .record_change(ChangeFlags::COLLECTIONS, ChangeOrigin::User);
        }
        Ok(())
    }

    /// Removes an item from a collection.
    pub fn remove_item_from_collection(
        &mut self,
        library: LibraryId,
        item_key: &str,
        collection_key: &str,
    ) -> CoreResult<()> {
        let item = self
            .state
            .item_mut(library, item_key)
            .ok_or_else(|| CoreError::not_found(ObjectKind::Item, item_key))?;
        if item.collections.remove(collection_key) {
            item.sync
                .record_change(ChangeFlags::COLLECTIONS, ChangeOrigin::User);
        }
        Ok(())
    }
}

impl Deref for Transaction<'_> {
    type Target = StoreState;

    fn deref(&self) -> &StoreState {
        &self.state
    }
}

impl DerefMut for Transaction<'_> {
    fn deref_mut(&mut self) -> &mut StoreState {
        &mut self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::Collection;
    use crate::item::Item;
    use chrono::Utc;

    const LIB: LibraryId = LibraryId::User;

    fn state() -> StoreState {
        let mut state = StoreState::new();
        state.insert(Collection::new(LIB, "COLL", "Reading"));
        let mut a = Item::new(LIB, "A", "document", Utc::now());
        a.collections.insert("COLL".into());
        state.insert(a);
        state.insert(Item::new(LIB, "B", "document", Utc::now()));
        state
    }

    #[test]
    fn becoming_child_moves_membership_to_root() {
        let config = StoreConfig::default();
        let mut txn = Transaction::new(state(), &config);

        txn.set_item_parent(LIB, "A", Some("B")).unwrap();

        assert!(txn.item(LIB, "A").unwrap().collections.is_empty());
        assert!(txn.item(LIB, "B").unwrap().collections.contains("COLL"));
        assert!(txn
            .item(LIB, "A")
            .unwrap()
            .sync
            .change_set()
            .contains(ChangeFlags::PARENT));
    }

    #[test]
    fn becoming_top_level_inherits_membership() {
        let config = StoreConfig::default();
        let mut txn = Transaction::new(state(), &config);
        txn.set_item_parent(LIB, "B", Some("A")).unwrap();

        txn.set_item_parent(LIB, "B", None).unwrap();

        assert!(txn.item(LIB, "B").unwrap().parent.is_none());
        assert!(txn.item(LIB, "B").unwrap().collections.contains("COLL"));
    }

    #[test]
    fn item_cannot_become_own_ancestor() {
        let config = StoreConfig::default();
        let mut txn = Transaction::new(state(), &config);
        txn.set_item_parent(LIB, "B", Some("A")).unwrap();

        let err = txn.set_item_parent(LIB, "A", Some("B")).unwrap_err();
        assert!(matches!(err, CoreError::InvalidOperation { .. }));
    }

    #[test]
    fn collection_cycle_rejected() {
        let config = StoreConfig::default();
        let mut base = state();
        base.insert(Collection::new(LIB, "SUB", "Sub"));
        let mut txn = Transaction::new(base, &config);
        txn.set_collection_parent(LIB, "SUB", Some("COLL")).unwrap();

        let err = txn
            .set_collection_parent(LIB, "COLL", Some("SUB"))
            .unwrap_err();
        assert!(matches!(err, CoreError::CollectionCycle { .. }));
        assert!(txn.collection(LIB, "COLL").unwrap().parent.is_none());
    }

    #[test]
    fn child_items_rejected_from_collections() {
        let config = StoreConfig::default();
        let mut txn = Transaction::new(state(), &config);
        txn.set_item_parent(LIB, "B", Some("A")).unwrap();

        let err = txn.add_item_to_collection(LIB, "B", "COLL").unwrap_err();
        assert!(matches!(err, CoreError::InvalidOperation { .. }));
    }
}
