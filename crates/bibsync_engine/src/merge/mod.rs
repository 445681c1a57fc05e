//! Remote Merge Engine: applies remote snapshots onto local objects.
//!
//! Each object is merged independently. A conflict or a malformed payload
//! fails that object only; batch entry points collect the failure and move
//! on. All checks that can fail run before the first mutation, so a failed
//! object leaves the store untouched.

mod collection;
mod item;
mod search;

use bibsync_core::{CoreError, KeyGenerator, LibraryId, StoreState, StoredObject, Syncable};
use bibsync_protocol::{
    CollectionSnapshot, Conflict, ItemSnapshot, LibrarySnapshot, MergePolicy, SearchSnapshot,
};
use tracing::{error, info};

use crate::config::SyncConfig;
use crate::error::MergeError;

/// Filename change detected while merging an attachment.
///
/// The caller must rename the stored file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilenameChange {
    /// Attachment key.
    pub key: String,
    /// Previous filename.
    pub old_name: String,
    /// New filename.
    pub new_name: String,
    /// Attachment media type.
    pub content_type: String,
}

/// Result of merging one item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergedItem {
    /// Item key.
    pub key: String,
    /// The item did not exist locally.
    pub created: bool,
    /// Attachment rename the caller must apply.
    pub filename_change: Option<FilenameChange>,
    /// Rects or paths were rewritten.
    pub geometry_changed: bool,
}

/// Result of merging one collection or search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergedObject {
    /// Object key.
    pub key: String,
    /// The object did not exist locally.
    pub created: bool,
    /// A local deletion was undone.
    pub restored: bool,
}

/// Collected result of merging a batch of snapshots.
#[derive(Debug, Clone, Default)]
pub struct MergeReport {
    /// Keys merged successfully.
    pub merged: Vec<String>,
    /// Attachment renames the caller must apply.
    pub filename_changes: Vec<FilenameChange>,
    /// Items whose geometry was rewritten; candidates for splitting.
    pub geometry_changed: Vec<String>,
    /// Objects blocked by local edits or deletions.
    pub conflicts: Vec<Conflict>,
    /// Objects that failed with a data-integrity error.
    pub failures: Vec<(String, CoreError)>,
}

impl MergeReport {
    /// Keys of every object that was not merged.
    pub fn unmerged_keys(&self) -> impl Iterator<Item = &str> {
        self.conflicts
            .iter()
            .map(Conflict::key)
            .chain(self.failures.iter().map(|(key, _)| key.as_str()))
    }

    /// Moves the contents of `other` into this report.
    pub fn append(&mut self, other: MergeReport) {
        self.merged.extend(other.merged);
        self.filename_changes.extend(other.filename_changes);
        self.geometry_changed.extend(other.geometry_changed);
        self.conflicts.extend(other.conflicts);
        self.failures.extend(other.failures);
    }

    fn record_failure(&mut self, key: &str, err: MergeError) {
        match err {
            MergeError::Conflict(conflict) => {
                info!(key, %conflict, "merge blocked by local state");
                self.conflicts.push(conflict);
            }
            MergeError::Integrity(err) => {
                error!(key, error = %err, "malformed remote payload");
                self.failures.push((key.to_owned(), err));
            }
        }
    }
}

/// Merges remote snapshots into the store.
#[derive(Debug, Clone)]
pub struct MergeEngine<'a> {
    config: &'a SyncConfig,
}

impl<'a> MergeEngine<'a> {
    /// Creates a merge engine.
    #[must_use]
    pub fn new(config: &'a SyncConfig) -> Self {
        Self { config }
    }

    /// Merges one item snapshot.
    pub fn merge_item(
        &self,
        state: &mut StoreState,
        snapshot: &ItemSnapshot,
        policy: MergePolicy,
    ) -> Result<MergedItem, MergeError> {
        item::merge(self.config, state, snapshot, policy)
    }

    /// Merges one collection snapshot.
    ///
    /// Collections have no conflict resolution: the remote always wins and
    /// a local deletion is undone.
    pub fn merge_collection(
        &self,
        state: &mut StoreState,
        snapshot: &CollectionSnapshot,
    ) -> Result<MergedObject, MergeError> {
        collection::merge(state, snapshot)
    }

    /// Merges one search snapshot. The remote always wins.
    pub fn merge_search(
        &self,
        state: &mut StoreState,
        snapshot: &SearchSnapshot,
    ) -> Result<MergedObject, MergeError> {
        search::merge(state, snapshot)
    }

    /// Merges a batch of item snapshots, collecting per-object failures.
    pub fn merge_items(
        &self,
        state: &mut StoreState,
        snapshots: &[ItemSnapshot],
        policy: MergePolicy,
    ) -> MergeReport {
        let mut report = MergeReport::default();
        for snapshot in snapshots {
            match self.merge_item(state, snapshot, policy) {
                Ok(merged) => {
                    if merged.geometry_changed {
                        report.geometry_changed.push(merged.key.clone());
                    }
                    report.filename_changes.extend(merged.filename_change);
                    report.merged.push(merged.key);
                }
                Err(err) => report.record_failure(&snapshot.key, err),
            }
        }
        report
    }

    /// Merges a batch of collection snapshots.
    ///
    /// Parents are merged before their children when both are in the batch,
    /// so a child never creates a placeholder for a parent that follows it.
    pub fn merge_collections(
        &self,
        state: &mut StoreState,
        snapshots: &[CollectionSnapshot],
    ) -> MergeReport {
        let mut report = MergeReport::default();
        for snapshot in collection::parent_first(snapshots) {
            match self.merge_collection(state, snapshot) {
                Ok(merged) => report.merged.push(merged.key),
                Err(err) => report.record_failure(&snapshot.key, err),
            }
        }
        report
    }

    /// Merges a batch of search snapshots.
    pub fn merge_searches(
        &self,
        state: &mut StoreState,
        snapshots: &[SearchSnapshot],
    ) -> MergeReport {
        let mut report = MergeReport::default();
        for snapshot in snapshots {
            match self.merge_search(state, snapshot) {
                Ok(merged) => report.merged.push(merged.key),
                Err(err) => report.record_failure(&snapshot.key, err),
            }
        }
        report
    }
}

/// Validates a payload key and resolves the library it belongs to.
fn library_of<T: StoredObject>(
    key: &str,
    library: Option<&LibrarySnapshot>,
) -> Result<LibraryId, CoreError> {
    if !KeyGenerator::is_valid(key) {
        return Err(CoreError::wrong_key_type(key, T::KIND));
    }
    library
        .and_then(LibrarySnapshot::library_id)
        .ok_or_else(|| CoreError::missing_library(key))
}

/// Fails with a conflict when local edits must not be overwritten.
fn check_conflict<T: StoredObject>(local: &T, policy: MergePolicy) -> Result<(), Conflict> {
    if policy == MergePolicy::PreferRemote {
        return Ok(());
    }
    let meta = local.sync();
    if meta.deleted_locally {
        return Err(Conflict::Deleted {
            kind: T::KIND,
            key: local.key().to_owned(),
        });
    }
    if meta.is_changed() {
        return Err(Conflict::Changed {
            kind: T::KIND,
            key: local.key().to_owned(),
        });
    }
    Ok(())
}
