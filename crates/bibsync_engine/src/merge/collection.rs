//! Collection merge.

use std::collections::BTreeSet;

use bibsync_core::{ChangeOrigin, Collection, CoreError, StoreState, StoredObject, SyncState};
use bibsync_protocol::CollectionSnapshot;
use chrono::Utc;
use tracing::{debug, info};

use super::{library_of, MergedObject};
use crate::error::MergeError;

pub(super) fn merge(
    state: &mut StoreState,
    snapshot: &CollectionSnapshot,
) -> Result<MergedObject, MergeError> {
    let library = library_of::<Collection>(&snapshot.key, snapshot.library.as_ref())?;
    if let Some(parent) = snapshot.parent.as_deref() {
        if state.would_create_collection_cycle(library, &snapshot.key, parent) {
            return Err(CoreError::CollectionCycle {
                key: snapshot.key.clone(),
                parent: parent.to_owned(),
            }
            .into());
        }
    }

    let existing = state.collection(library, &snapshot.key);
    let created = existing.is_none();
    let mut collection = existing
        .cloned()
        .unwrap_or_else(|| Collection::new(library, snapshot.key.clone(), ""));

    let restored = collection.sync.deleted_locally;
    if restored {
        info!(library = %library, key = %snapshot.key, "restoring locally deleted collection");
        for key in state.collection_items(library, &snapshot.key) {
            if let Some(item) = state.item_mut(library, &key) {
                item.trash = false;
                item.sync.deleted_locally = false;
            }
        }
    }
    collection.sync.deleted_locally = false;
    collection.sync.clear_changes();

    collection.name.clone_from(&snapshot.name);
    collection.trash = snapshot.trash;
    collection.sync.version = snapshot.version;
    collection.sync.sync_state = SyncState::Synced;
    collection.sync.last_sync_attempt = None;
    collection.sync.change_origin = ChangeOrigin::Sync;

    collection.parent = None;
    if let Some(parent) = snapshot.parent.as_deref() {
        if state.collection(library, parent).is_none() {
            debug!(key = %snapshot.key, parent, "creating placeholder parent collection");
            state.insert(Collection::placeholder(library, parent, Utc::now()));
        }
        collection.parent = Some(parent.to_owned());
    }

    state.insert(collection);
    debug!(library = %library, key = %snapshot.key, version = snapshot.version, created, "merged collection");
    Ok(MergedObject {
        key: snapshot.key.clone(),
        created,
        restored,
    })
}

/// Orders a batch so that every collection follows its parent when the
/// parent is part of the same batch. Relative order is otherwise kept.
pub(super) fn parent_first(snapshots: &[CollectionSnapshot]) -> Vec<&CollectionSnapshot> {
    let mut pending: Vec<&CollectionSnapshot> = snapshots.iter().collect();
    let mut ordered = Vec::with_capacity(pending.len());

    while !pending.is_empty() {
        let waiting: BTreeSet<&str> = pending.iter().map(|snapshot| snapshot.key.as_str()).collect();
        let (ready, rest): (Vec<_>, Vec<_>) = pending.into_iter().partition(|snapshot| {
            snapshot
                .parent
                .as_deref()
                .map_or(true, |parent| parent == snapshot.key || !waiting.contains(parent))
        });
        if ready.is_empty() {
            // Remaining parents form a cycle; the merge rejects the closing link.
            ordered.extend(rest);
            break;
        }
        ordered.extend(ready);
        pending = rest;
    }
    ordered
}
