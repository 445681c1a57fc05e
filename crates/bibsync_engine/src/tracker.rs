//! Change Tracker: per-object change sets, sync state and their reset.
//!
//! Object-level operations work on a single [`Syncable`]; library-level
//! operations run inside a store transaction and address objects by key.
//! Unknown keys are skipped, so every library-level operation can be
//! repeated with the same input.

use std::collections::BTreeMap;

use bibsync_core::{
    ChangeFlags, ChangeOrigin, LibraryId, StoreState, StoredObject, SyncState, Syncable, Version,
};
use bibsync_protocol::VersionMap;
use chrono::{DateTime, Utc};
use tracing::{debug, warn};
use uuid::Uuid;

/// Outcome of reconciling local objects the remote no longer reports.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MissingRemotely {
    /// Locally deleted objects that were dropped.
    pub removed: Vec<String>,
    /// Objects re-marked for upload in full.
    pub marked: Vec<String>,
}

/// Change tracking operations.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChangeTracker;

impl ChangeTracker {
    /// Records a local change. Returns the provenance id of the change.
    pub fn mark_changed<T: Syncable>(
        object: &mut T,
        flags: ChangeFlags,
        origin: ChangeOrigin,
    ) -> Option<Uuid> {
        object.sync_mut().record_change(flags, origin)
    }

    /// Clears the change set after a successful upload round-trip.
    ///
    /// `deleted_locally` is only cleared when `deletion_synced` is set.
    /// Objects without pending changes are left untouched. Returns true if
    /// anything changed.
    pub fn reset<T: Syncable>(object: &mut T, deletion_synced: bool) -> bool {
        if !object.sync().is_changed() {
            return false;
        }
        object.clear_change_markers();
        let meta = object.sync_mut();
        meta.clear_changes();
        meta.sync_state = SyncState::Synced;
        if deletion_synced {
            meta.deleted_locally = false;
        }
        true
    }

    /// Forces a resync of an object without touching its change set.
    ///
    /// The store only notices changes to an object's own records; an
    /// object whose children changed is forced dirty so the next fetch
    /// revalidates it.
    pub fn force_dirty<T: Syncable>(object: &mut T) {
        object.sync_mut().sync_state = SyncState::Dirty;
    }

    /// Applies a write acknowledgement to the objects in `keys`.
    ///
    /// Only the changes whose ids were uploaded are dropped; changes made
    /// while the upload was in flight stay pending. Returns the keys that
    /// have no pending change left.
    pub fn mark_synced<'k, T: StoredObject>(
        state: &mut StoreState,
        library: LibraryId,
        keys: impl IntoIterator<Item = &'k str>,
        change_ids: &BTreeMap<String, Vec<Uuid>>,
        version: Version,
    ) -> Vec<String> {
        let mut clean = Vec::new();
        for key in keys {
            let Some(object) = state.get_mut::<T>(library, key) else {
                debug!(kind = %T::KIND, key, "acknowledged object no longer exists");
                continue;
            };
            let ids = change_ids.get(key).map(Vec::as_slice).unwrap_or_default();
            let meta = object.sync_mut();
            meta.version = version;
            meta.remove_changes(ids);
            if !meta.is_changed() {
                meta.sync_state = SyncState::Synced;
                meta.last_sync_attempt = None;
                object.clear_change_markers();
                clean.push(key.to_owned());
            }
        }
        clean
    }

    /// Records a failed fetch or write so the planner retries with backoff.
    ///
    /// Keys unknown locally get a placeholder so the failure is not lost.
    pub fn mark_for_resync<'k, T: StoredObject>(
        state: &mut StoreState,
        library: LibraryId,
        keys: impl IntoIterator<Item = &'k str>,
        now: DateTime<Utc>,
    ) -> usize {
        let mut count = 0;
        for key in keys {
            if state.get::<T>(library, key).is_none() {
                state.insert(T::placeholder(library, key, now));
            }
            if let Some(object) = state.get_mut::<T>(library, key) {
                let meta = object.sync_mut();
                meta.sync_state = meta.sync_state.with_retry();
                meta.last_sync_attempt = Some(now);
                count += 1;
            }
        }
        count
    }

    /// After a full sync, reconciles synced local objects the remote did
    /// not report: locally deleted ones are dropped, the rest are marked
    /// for upload in full.
    pub fn mark_missing_remotely<T: StoredObject>(
        state: &mut StoreState,
        library: LibraryId,
        remote: &VersionMap,
    ) -> MissingRemotely {
        let missing: Vec<(String, bool)> = state
            .all::<T>(library)
            .filter(|object| object.sync().sync_state.is_synced())
            .filter(|object| !remote.contains_key(object.key()))
            .map(|object| (object.key().to_owned(), object.sync().deleted_locally))
            .collect();

        let mut outcome = MissingRemotely::default();
        for (key, deleted) in missing {
            if deleted {
                outcome.removed.extend(state.delete::<T>(library, &key));
                continue;
            }
            if let Some(object) = state.get_mut::<T>(library, &key) {
                let flags = object.full_change_set();
                warn!(kind = %T::KIND, key = %key, "object missing remotely, marking for upload");
                object.sync_mut().record_change(flags, ChangeOrigin::User);
                outcome.marked.push(key);
            }
        }
        outcome
    }

    /// Removes objects whose deletion the remote acknowledged.
    ///
    /// Returns every removed key, including cascaded children.
    pub fn finish_deletions<'k, T: StoredObject>(
        state: &mut StoreState,
        library: LibraryId,
        keys: impl IntoIterator<Item = &'k str>,
    ) -> Vec<String> {
        let mut removed = Vec::new();
        for key in keys {
            let deleted = state
                .get::<T>(library, key)
                .is_some_and(|object| object.sync().deleted_locally);
            if deleted {
                removed.extend(state.delete::<T>(library, key));
            }
        }
        removed
    }
}
