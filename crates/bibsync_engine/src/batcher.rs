//! Upload Batcher: turns pending local changes into write and delete
//! batches.
//!
//! Within one object kind, entries are ordered by ancestor depth so the
//! remote never sees a child before its parent. Depth only counts
//! ancestors that are uploaded in the same pass; an object whose parent is
//! already synced is a root for ordering purposes.

use std::collections::BTreeMap;

use bibsync_core::{
    Collection, Item, LibraryId, ObjectKind, Search, StoreState, StoredObject, Version,
};
use bibsync_protocol::{DeleteBatch, UpdateParameters, WriteBatch};
use tracing::debug;
use uuid::Uuid;

use crate::config::SyncConfig;
use crate::params::ToUpdateParameters;

/// One object ready for upload.
#[derive(Debug, Clone)]
struct Pending {
    key: String,
    depth: usize,
    parameters: UpdateParameters,
    change_ids: Vec<Uuid>,
}

/// Builds upload batches from the store.
#[derive(Debug, Clone)]
pub struct UploadBatcher<'a> {
    config: &'a SyncConfig,
}

impl<'a> UploadBatcher<'a> {
    /// Creates a batcher.
    #[must_use]
    pub fn new(config: &'a SyncConfig) -> Self {
        Self { config }
    }

    /// Write batches for every object kind: collections, then searches,
    /// then items.
    pub fn write_batches(
        &self,
        state: &StoreState,
        library: LibraryId,
        version: Version,
    ) -> Vec<WriteBatch> {
        let mut batches = self.write_batches_for::<Collection>(state, library, version);
        batches.extend(self.write_batches_for::<Search>(state, library, version));
        batches.extend(self.write_batches_for::<Item>(state, library, version));
        batches
    }

    /// Write batches for one object kind, ancestors first.
    ///
    /// Objects pending deletion and objects whose changes are paused are
    /// left out.
    pub fn write_batches_for<T>(
        &self,
        state: &StoreState,
        library: LibraryId,
        version: Version,
    ) -> Vec<WriteBatch>
    where
        T: StoredObject + ToUpdateParameters,
    {
        let candidates: BTreeMap<&str, &T> = state
            .all::<T>(library)
            .filter(|object| is_upload_candidate(*object))
            .map(|object| (object.key(), object))
            .collect();

        let mut depths = BTreeMap::new();
        let mut pending: Vec<Pending> = state
            .all::<T>(library)
            .filter(|object| candidates.contains_key(object.key()))
            .filter_map(|object| {
                let parameters = object.update_parameters()?;
                Some(Pending {
                    key: object.key().to_owned(),
                    depth: depth(object.key(), &candidates, &mut depths),
                    parameters,
                    change_ids: object.sync().change_ids(),
                })
            })
            .collect();
        pending.sort_by_key(|entry| entry.depth);

        let batches: Vec<WriteBatch> = pending
            .chunks(self.config.max_write_batch.max(1))
            .map(|chunk| WriteBatch {
                library,
                object: T::KIND,
                version,
                parameters: chunk.iter().map(|entry| entry.parameters.clone()).collect(),
                change_ids: chunk
                    .iter()
                    .map(|entry| (entry.key.clone(), entry.change_ids.clone()))
                    .collect(),
            })
            .collect();
        if !batches.is_empty() {
            debug!(
                library = %library,
                kind = %T::KIND,
                objects = pending.len(),
                batches = batches.len(),
                "prepared write batches"
            );
        }
        batches
    }

    /// Delete batches for every object kind: collections, then searches,
    /// then items.
    pub fn delete_batches(
        &self,
        state: &StoreState,
        library: LibraryId,
        version: Version,
    ) -> Vec<DeleteBatch> {
        let mut batches = self.delete_batches_for::<Collection>(state, library, version);
        batches.extend(self.delete_batches_for::<Search>(state, library, version));
        batches.extend(self.delete_batches_for::<Item>(state, library, version));
        batches
    }

    /// Delete batches for locally deleted objects of one kind.
    pub fn delete_batches_for<T: StoredObject>(
        &self,
        state: &StoreState,
        library: LibraryId,
        version: Version,
    ) -> Vec<DeleteBatch> {
        let keys: Vec<String> = state
            .all::<T>(library)
            .filter(|object| object.sync().deleted_locally && !object.sync().changes_sync_paused)
            .map(|object| object.key().to_owned())
            .collect();
        chunk_keys(T::KIND, library, version, &keys, self.config.max_delete_batch.max(1))
    }
}

fn is_upload_candidate<T: StoredObject>(object: &T) -> bool {
    let meta = object.sync();
    meta.is_changed() && !meta.changes_sync_paused && !meta.deleted_locally
}

/// Number of parent hops through `candidates` from `key` to a root.
///
/// Results are cached for every object on the walked chain.
fn depth<'k, T: StoredObject>(
    key: &'k str,
    candidates: &BTreeMap<&'k str, &'k T>,
    cache: &mut BTreeMap<&'k str, usize>,
) -> usize {
    if let Some(depth) = cache.get(key) {
        return *depth;
    }

    let mut chain: Vec<&'k str> = Vec::new();
    let mut base = 0;
    let mut current = Some(key);
    while let Some(key) = current {
        if let Some(depth) = cache.get(key) {
            base = depth + 1;
            break;
        }
        if chain.contains(&key) {
            break;
        }
        chain.push(key);
        current = candidates
            .get(key)
            .and_then(|object| object.parent_key())
            .and_then(|parent| candidates.get_key_value(parent))
            .map(|(parent, _)| *parent);
    }

    for (offset, key) in chain.iter().rev().enumerate() {
        cache.insert(*key, base + offset);
    }
    cache.get(key).copied().unwrap_or(0)
}

fn chunk_keys(
    object: ObjectKind,
    library: LibraryId,
    version: Version,
    keys: &[String],
    size: usize,
) -> Vec<DeleteBatch> {
    keys.chunks(size)
        .map(|chunk| DeleteBatch {
            library,
            object,
            version,
            keys: chunk.to_vec(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bibsync_core::{ChangeFlags, ChangeOrigin, SyncMeta, Syncable};
    use chrono::Utc;

    const LIB: LibraryId = LibraryId::User;

    fn item(key: &str, parent: Option<&str>, dirty: bool) -> Item {
        let mut item = Item::new(LIB, key, "book", Utc::now());
        item.parent = parent.map(str::to_owned);
        item.sync = SyncMeta::synced(1);
        if dirty {
            item.sync.record_change(ChangeFlags::FIELDS, ChangeOrigin::User);
        }
        item
    }

    fn item_keys(batches: &[WriteBatch]) -> Vec<String> {
        batches.iter().flat_map(WriteBatch::keys).collect()
    }

    #[test]
    fn ancestors_come_first() {
        let mut state = StoreState::new();
        state.insert(item("C", Some("B"), true));
        state.insert(item("B", Some("A"), true));
        state.insert(item("A", None, true));

        let config = SyncConfig::default();
        let batches = UploadBatcher::new(&config).write_batches_for::<Item>(&state, LIB, 9);

        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].version, 9);
        assert_eq!(item_keys(&batches), vec!["A", "B", "C"]);
    }

    #[test]
    fn synced_parent_counts_as_root() {
        let mut state = StoreState::new();
        state.insert(item("CHILD", Some("PARENT"), true));
        state.insert(item("PARENT", None, false));
        state.insert(item("OTHER", None, true));

        let config = SyncConfig::default();
        let batches = UploadBatcher::new(&config).write_batches_for::<Item>(&state, LIB, 1);

        assert_eq!(item_keys(&batches), vec!["CHILD", "OTHER"]);
    }

    #[test]
    fn chunks_respect_batch_size() {
        let mut state = StoreState::new();
        for index in 0..5 {
            state.insert(item(&format!("K{index}"), None, true));
        }
        let config = SyncConfig::default().with_max_write_batch(2);
        let batches = UploadBatcher::new(&config).write_batches_for::<Item>(&state, LIB, 1);

        let sizes: Vec<usize> = batches.iter().map(WriteBatch::len).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
        assert_eq!(item_keys(&batches), vec!["K0", "K1", "K2", "K3", "K4"]);
    }

    #[test]
    fn change_ids_travel_with_entries() {
        let mut state = StoreState::new();
        let mut a = item("A", None, true);
        let second = a
            .sync
            .record_change(ChangeFlags::TAGS, ChangeOrigin::User)
            .unwrap();
        let ids = a.sync.change_ids();
        state.insert(a);

        let config = SyncConfig::default();
        let batches = UploadBatcher::new(&config).write_batches_for::<Item>(&state, LIB, 1);

        assert_eq!(batches[0].change_ids["A"], ids);
        assert!(batches[0].change_ids["A"].contains(&second));
    }

    #[test]
    fn paused_and_deleted_objects_are_not_written() {
        let mut state = StoreState::new();
        let mut paused = item("PAUSED", None, true);
        paused.sync.changes_sync_paused = true;
        let mut deleted = item("DELETED", None, true);
        deleted.sync.deleted_locally = true;
        state.insert(paused);
        state.insert(deleted);
        state.insert(item("CLEAN", None, false));

        let config = SyncConfig::default();
        let batcher = UploadBatcher::new(&config);

        assert!(batcher.write_batches(&state, LIB, 1).is_empty());
        let deletes = batcher.delete_batches(&state, LIB, 1);
        assert_eq!(deletes.len(), 1);
        assert_eq!(deletes[0].object, ObjectKind::Item);
        assert_eq!(deletes[0].keys, vec!["DELETED"]);
    }

    #[test]
    fn kinds_are_emitted_collections_first() {
        let mut state = StoreState::new();
        state.insert(item("ITEM", None, true));
        let mut collection = Collection::new(LIB, "COLL", "Reading");
        collection
            .sync
            .record_change(ChangeFlags::NAME, ChangeOrigin::User);
        state.insert(collection);
        let mut search = Search::new(LIB, "SRCH", "Recent", Utc::now());
        search
            .sync
            .record_change(ChangeFlags::NAME, ChangeOrigin::User);
        state.insert(search);

        let config = SyncConfig::default();
        let kinds: Vec<ObjectKind> = UploadBatcher::new(&config)
            .write_batches(&state, LIB, 1)
            .iter()
            .map(|batch| batch.object)
            .collect();
        assert_eq!(
            kinds,
            vec![ObjectKind::Collection, ObjectKind::Search, ObjectKind::Item]
        );
    }

    #[test]
    fn collection_tree_is_ordered() {
        let mut state = StoreState::new();
        for (key, parent) in [("LEAF", Some("MID")), ("MID", Some("TOP")), ("TOP", None)] {
            let mut collection = Collection::new(LIB, key, key);
            collection.parent = parent.map(str::to_owned);
            let flags = collection.full_change_set();
            collection.sync.record_change(flags, ChangeOrigin::User);
            state.insert(collection);
        }

        let config = SyncConfig::default();
        let batches = UploadBatcher::new(&config).write_batches_for::<Collection>(&state, LIB, 1);
        assert_eq!(item_keys(&batches), vec!["TOP", "MID", "LEAF"]);
    }

    #[test]
    fn delete_batches_are_chunked() {
        let mut state = StoreState::new();
        for index in 0..3 {
            let mut deleted = item(&format!("D{index}"), None, false);
            deleted.sync.deleted_locally = true;
            state.insert(deleted);
        }
        let config = SyncConfig::default().with_max_delete_batch(2);
        let deletes = UploadBatcher::new(&config).delete_batches(&state, LIB, 4);

        assert_eq!(deletes.len(), 2);
        assert_eq!(deletes[1].keys, vec!["D2"]);
        assert_eq!(deletes[0].version, 4);
    }
}
