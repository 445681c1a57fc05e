//! Store contents with the queries and cascades over them.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use tracing::debug;

use super::table::Table;
use crate::change::{SyncMeta, SyncState};
use crate::collection::Collection;
use crate::item::Item;
use crate::search::Search;
use crate::tag::{Tag, TagId};
use crate::types::{LibraryId, ObjectId, Syncable};
use crate::user::User;

/// A syncable object kind with its own table in the store.
pub trait StoredObject: Syncable {
    /// The table holding objects of this kind.
    fn table(state: &StoreState) -> &Table<ObjectId, Self>;

    /// The table holding objects of this kind, mutably.
    fn table_mut(state: &mut StoreState) -> &mut Table<ObjectId, Self>;

    /// Removes the object and everything that only exists through it.
    ///
    /// Returns the keys of removed objects of this kind.
    fn delete_cascade(state: &mut StoreState, library: LibraryId, key: &str) -> Vec<String>;

    /// Creates an empty object that only reserves `key` until the remote
    /// state is fetched. Placeholders are `Dirty` at version 0.
    fn placeholder(library: LibraryId, key: &str, now: DateTime<Utc>) -> Self;
}

fn placeholder_meta() -> SyncMeta {
    SyncMeta {
        sync_state: SyncState::Dirty,
        ..SyncMeta::default()
    }
}

/// The full contents of the object store.
///
/// Committed states are shared immutably between readers; a write
/// transaction works on its own copy.
#[derive(Debug, Clone, Default)]
pub struct StoreState {
    items: Table<ObjectId, Item>,
    collections: Table<ObjectId, Collection>,
    searches: Table<ObjectId, Search>,
    tags: Table<TagId, Tag>,
    users: BTreeMap<i64, User>,
}

impl StoreState {
    /// Creates an empty state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Generic object access
    // ========================================================================

    /// Returns an object by key.
    pub fn get<T: StoredObject>(&self, library: LibraryId, key: &str) -> Option<&T> {
        T::table(self).get(&ObjectId::new(library, key))
    }

    /// Returns an object by key, mutably.
    pub fn get_mut<T: StoredObject>(&mut self, library: LibraryId, key: &str) -> Option<&mut T> {
        T::table_mut(self).get_mut(&ObjectId::new(library, key))
    }

    /// Iterates all objects of a kind in a library, in insertion order.
    pub fn all<'a, T: StoredObject + 'a>(&'a self, library: LibraryId) -> impl Iterator<Item = &'a T> {
        T::table(self)
            .values()
            .filter(move |object| object.library() == library)
    }

    /// Iterates all objects of a kind in a library mutably.
    pub fn all_mut<'a, T: StoredObject + 'a>(&'a mut self, library: LibraryId) -> impl Iterator<Item = &'a mut T> {
        T::table_mut(self)
            .values_mut()
            .filter(move |object| object.library() == library)
    }

    /// Keys of all objects of a kind in a library.
    pub fn keys<T: StoredObject>(&self, library: LibraryId) -> Vec<String> {
        self.all::<T>(library)
            .map(|object| object.key().to_owned())
            .collect()
    }

    /// Inserts or replaces an object.
    pub fn insert<T: StoredObject>(&mut self, object: T) -> Option<T> {
        let id = object.id();
        T::table_mut(self).insert(id, object)
    }

    /// Deletes an object with cascade. Returns the removed keys.
    pub fn delete<T: StoredObject>(&mut self, library: LibraryId, key: &str) -> Vec<String> {
        T::delete_cascade(self, library, key)
    }

    // ========================================================================
    // Typed access
    // ========================================================================

    /// Returns an item.
    pub fn item(&self, library: LibraryId, key: &str) -> Option<&Item> {
        self.get(library, key)
    }

    /// Returns an item mutably.
    pub fn item_mut(&mut self, library: LibraryId, key: &str) -> Option<&mut Item> {
        self.get_mut(library, key)
    }

    /// Returns a collection.
    pub fn collection(&self, library: LibraryId, key: &str) -> Option<&Collection> {
        self.get(library, key)
    }

    /// Returns a collection mutably.
    pub fn collection_mut(&mut self, library: LibraryId, key: &str) -> Option<&mut Collection> {
        self.get_mut(library, key)
    }

    /// Returns a search.
    pub fn search(&self, library: LibraryId, key: &str) -> Option<&Search> {
        self.get(library, key)
    }

    /// Returns a search mutably.
    pub fn search_mut(&mut self, library: LibraryId, key: &str) -> Option<&mut Search> {
        self.get_mut(library, key)
    }

    // ========================================================================
    // Hierarchy
    // ========================================================================

    /// Keys of the direct child items of an item.
    pub fn child_items(&self, library: LibraryId, key: &str) -> Vec<String> {
        self.all::<Item>(library)
            .filter(|item| item.parent.as_deref() == Some(key))
            .map(|item| item.key.clone())
            .collect()
    }

    /// Keys of all descendants of an item, breadth first.
    pub fn descendant_items(&self, library: LibraryId, key: &str) -> Vec<String> {
        let mut result = Vec::new();
        let mut seen = BTreeSet::from([key.to_owned()]);
        let mut frontier = vec![key.to_owned()];
        while !frontier.is_empty() {
            let mut next = Vec::new();
            for parent in &frontier {
                for child in self.child_items(library, parent) {
                    if seen.insert(child.clone()) {
                        result.push(child.clone());
                        next.push(child);
                    }
                }
            }
            frontier = next;
        }
        result
    }

    /// Key of the top-level ancestor of an item (the item itself if it has
    /// no stored parent).
    pub fn root_item_key(&self, library: LibraryId, key: &str) -> String {
        let mut current = key.to_owned();
        let mut seen = BTreeSet::new();
        while seen.insert(current.clone()) {
            match self
                .item(library, &current)
                .and_then(|item| item.parent.as_ref())
            {
                Some(parent) if self.item(library, parent).is_some() => current = parent.clone(),
                _ => break,
            }
        }
        current
    }

    /// Keys of the direct child collections of a collection.
    pub fn child_collections(&self, library: LibraryId, key: &str) -> Vec<String> {
        self.all::<Collection>(library)
            .filter(|collection| collection.parent.as_deref() == Some(key))
            .map(|collection| collection.key.clone())
            .collect()
    }

    /// Keys of the items directly in a collection.
    pub fn collection_items(&self, library: LibraryId, key: &str) -> Vec<String> {
        self.all::<Item>(library)
            .filter(|item| item.collections.contains(key))
            .map(|item| item.key.clone())
            .collect()
    }

    /// Returns true if `ancestor` is on the parent chain of collection `key`.
    pub fn collection_has_ancestor(&self, library: LibraryId, key: &str, ancestor: &str) -> bool {
        let mut seen = BTreeSet::new();
        let mut current = self
            .collection(library, key)
            .and_then(|collection| collection.parent.clone());
        while let Some(parent) = current {
            if parent == ancestor {
                return true;
            }
            if !seen.insert(parent.clone()) {
                return false;
            }
            current = self
                .collection(library, &parent)
                .and_then(|collection| collection.parent.clone());
        }
        false
    }

    /// Returns true if making `parent` the parent of collection `key` would
    /// make `key` its own ancestor.
    pub fn would_create_collection_cycle(
        &self,
        library: LibraryId,
        key: &str,
        parent: &str,
    ) -> bool {
        parent == key || self.collection_has_ancestor(library, parent, key)
    }

    // ========================================================================
    // Base tags
    // ========================================================================

    /// Returns a base tag.
    pub fn tag(&self, library: LibraryId, name: &str) -> Option<&Tag> {
        self.tags.get(&TagId::new(library, name))
    }

    /// Returns a base tag mutably.
    pub fn tag_mut(&mut self, library: LibraryId, name: &str) -> Option<&mut Tag> {
        self.tags.get_mut(&TagId::new(library, name))
    }

    /// Iterates the base tags of a library.
    pub fn tags(&self, library: LibraryId) -> impl Iterator<Item = &Tag> {
        self.tags.values().filter(move |tag| tag.library == library)
    }

    /// Inserts or replaces a base tag.
    pub fn insert_tag(&mut self, tag: Tag) -> Option<Tag> {
        self.tags.insert(tag.id(), tag)
    }

    /// Removes a base tag and every typed tag linking to it.
    ///
    /// Returns the keys of items that lost the tag.
    pub fn remove_tag(&mut self, library: LibraryId, name: &str) -> Vec<String> {
        let mut untagged = Vec::new();
        for item in self.all_mut::<Item>(library) {
            let before = item.tags.len();
            item.tags.retain(|tag| tag.name != name);
            if item.tags.len() != before {
                untagged.push(item.key.clone());
            }
        }
        self.tags.remove(&TagId::new(library, name));
        untagged
    }

    /// Creates a base tag unless one exists. Returns true if created.
    pub fn ensure_tag(&mut self, library: LibraryId, name: &str) -> bool {
        if self.tag(library, name).is_some() {
            return false;
        }
        self.insert_tag(Tag::new(library, name));
        true
    }

    /// Number of typed tags linking to a base tag.
    pub fn tag_link_count(&self, library: LibraryId, name: &str) -> usize {
        self.all::<Item>(library)
            .filter(|item| item.tags.iter().any(|tag| tag.name == name))
            .count()
    }

    /// Removes the named base tags that have become garbage.
    ///
    /// Returns the names of pruned tags.
    pub fn prune_tags<'a>(
        &mut self,
        library: LibraryId,
        names: impl IntoIterator<Item = &'a str>,
    ) -> Vec<String> {
        let mut pruned = Vec::new();
        for name in names {
            let garbage = self
                .tag(library, name)
                .is_some_and(|tag| tag.is_garbage(self.tag_link_count(library, name)));
            if garbage {
                self.tags.remove(&TagId::new(library, name));
                pruned.push(name.to_owned());
            }
        }
        if !pruned.is_empty() {
            debug!(library = %library, count = pruned.len(), "pruned orphaned tags");
        }
        pruned
    }

    // ========================================================================
    // Users
    // ========================================================================

    /// Returns a user.
    pub fn user(&self, id: i64) -> Option<&User> {
        self.users.get(&id)
    }

    /// Inserts or updates a user.
    pub fn upsert_user(&mut self, user: User) {
        self.users.insert(user.id, user);
    }

    /// Number of items referencing a user as creator or last modifier.
    pub fn user_reference_count(&self, id: i64) -> usize {
        self.items
            .values()
            .filter(|item| item.created_by == Some(id) || item.modified_by == Some(id))
            .count()
    }

    /// Removes the given users if nothing references them any more.
    ///
    /// Returns the ids of removed users.
    pub fn prune_users(&mut self, ids: impl IntoIterator<Item = i64>) -> Vec<i64> {
        let mut removed = Vec::new();
        for id in ids {
            if self.users.contains_key(&id) && self.user_reference_count(id) == 0 {
                self.users.remove(&id);
                removed.push(id);
            }
        }
        removed
    }
}

impl StoredObject for Item {
    fn table(state: &StoreState) -> &Table<ObjectId, Self> {
        &state.items
    }

    fn table_mut(state: &mut StoreState) -> &mut Table<ObjectId, Self> {
        &mut state.items
    }

    fn delete_cascade(state: &mut StoreState, library: LibraryId, key: &str) -> Vec<String> {
        let mut removed = Vec::new();
        let mut tag_names = BTreeSet::new();
        let mut users = BTreeSet::new();
        let mut stack = vec![key.to_owned()];

        while let Some(key) = stack.pop() {
            stack.extend(state.child_items(library, &key));
            if let Some(item) = state.items.remove(&ObjectId::new(library, key.as_str())) {
                tag_names.extend(item.tags.into_iter().map(|tag| tag.name));
                users.extend(item.created_by);
                users.extend(item.modified_by);
                removed.push(key);
            }
        }

        state.prune_tags(library, tag_names.iter().map(String::as_str));
        state.prune_users(users);
        if !removed.is_empty() {
            debug!(library = %library, key = %removed[0], count = removed.len(), "deleted items");
        }
        removed
    }

    fn placeholder(library: LibraryId, key: &str, now: DateTime<Utc>) -> Self {
        let mut item = Item::new(library, key, "", now);
        item.sync = placeholder_meta();
        item
    }
}

impl StoredObject for Collection {
    fn table(state: &StoreState) -> &Table<ObjectId, Self> {
        &state.collections
    }

    fn table_mut(state: &mut StoreState) -> &mut Table<ObjectId, Self> {
        &mut state.collections
    }

    fn delete_cascade(state: &mut StoreState, library: LibraryId, key: &str) -> Vec<String> {
        let mut removed = Vec::new();
        let mut stack = vec![key.to_owned()];

        while let Some(key) = stack.pop() {
            stack.extend(state.child_collections(library, &key));
            if state
                .collections
                .remove(&ObjectId::new(library, key.as_str()))
                .is_some()
            {
                removed.push(key);
            }
        }

        for item in state.all_mut::<Item>(library) {
            for key in &removed {
                item.collections.remove(key);
            }
        }
        if !removed.is_empty() {
            debug!(library = %library, key = %removed[0], count = removed.len(), "deleted collections");
        }
        removed
    }

    fn placeholder(library: LibraryId, key: &str, _now: DateTime<Utc>) -> Self {
        let mut collection = Collection::new(library, key, "");
        collection.sync = placeholder_meta();
        collection
    }
}

impl StoredObject for Search {
    fn table(state: &StoreState) -> &Table<ObjectId, Self> {
        &state.searches
    }

    fn table_mut(state: &mut StoreState) -> &mut Table<ObjectId, Self> {
        &mut state.searches
    }

    fn delete_cascade(state: &mut StoreState, library: LibraryId, key: &str) -> Vec<String> {
        state
            .searches
            .remove(&ObjectId::new(library, key))
            .map(|search| vec![search.key])
            .unwrap_or_default()
    }

    fn placeholder(library: LibraryId, key: &str, now: DateTime<Utc>) -> Self {
        let mut search = Search::new(library, key, "", now);
        search.sync = placeholder_meta();
        search
    }
}
