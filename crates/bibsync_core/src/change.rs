//! Change metadata carried by every syncable object.
//!
//! A change set is the union of the flags of every pending [`ObjectChange`].
//! Each change carries its own provenance id, so an upload acknowledgement
//! can clear exactly the changes it covered while later edits stay pending.

use bitflags::bitflags;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::types::Version;

bitflags! {
    /// Logical groups of fields with pending local edits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ChangeFlags: u32 {
        /// Collection or search name.
        const NAME = 1 << 0;
        /// Parent item or parent collection.
        const PARENT = 1 << 1;
        /// Item type.
        const TYPE = 1 << 2;
        /// Item fields.
        const FIELDS = 1 << 3;
        /// Item creators.
        const CREATORS = 1 << 4;
        /// Item tags.
        const TAGS = 1 << 5;
        /// Item collection membership.
        const COLLECTIONS = 1 << 6;
        /// Trash flag.
        const TRASH = 1 << 7;
        /// Item relations.
        const RELATIONS = 1 << 8;
        /// Annotation rectangles.
        const RECTS = 1 << 9;
        /// Annotation ink paths.
        const PATHS = 1 << 10;
        /// Search conditions.
        const CONDITIONS = 1 << 11;
    }
}

impl Default for ChangeFlags {
    fn default() -> Self {
        Self::empty()
    }
}

/// Sync classification of an object relative to the remote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SyncState {
    /// Local copy matches the remote version.
    #[default]
    Synced,
    /// Local copy must be fetched again (placeholder or forced resync).
    Dirty,
    /// Fetching or applying failed `n` times.
    DirtyWithRetry(u32),
}

impl SyncState {
    /// Returns true if the object is synced.
    #[must_use]
    pub const fn is_synced(self) -> bool {
        matches!(self, SyncState::Synced)
    }

    /// Number of failed attempts recorded so far.
    #[must_use]
    pub const fn retry_count(self) -> u32 {
        match self {
            SyncState::DirtyWithRetry(n) => n,
            _ => 0,
        }
    }

    /// Returns the state after one more failed attempt.
    #[must_use]
    pub const fn with_retry(self) -> Self {
        SyncState::DirtyWithRetry(self.retry_count().saturating_add(1))
    }
}

/// Where the most recent change to an object came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ChangeOrigin {
    /// A local user edit.
    #[default]
    User,
    /// A remote snapshot merged during sync.
    Sync,
    /// An object created locally as a consequence of a sync response
    /// (e.g. an annotation split).
    SyncResponse,
}

/// One pending local change with its provenance id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectChange {
    /// Provenance id, echoed back through upload batches.
    pub id: Uuid,
    /// Groups touched by this change.
    pub flags: ChangeFlags,
}

impl ObjectChange {
    /// Creates a change with a fresh id.
    #[must_use]
    pub fn new(flags: ChangeFlags) -> Self {
        Self {
            id: Uuid::new_v4(),
            flags,
        }
    }
}

/// Sync metadata of a syncable object.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SyncMeta {
    /// Last version known from the remote.
    pub version: Version,
    /// Sync classification.
    pub sync_state: SyncState,
    /// Pending local changes, oldest first.
    pub changes: Vec<ObjectChange>,
    /// Origin of the last change.
    pub change_origin: ChangeOrigin,
    /// Deleted locally, waiting for the remote to acknowledge the delete.
    pub deleted_locally: bool,
    /// When fetching or applying this object last failed.
    pub last_sync_attempt: Option<DateTime<Utc>>,
    /// Changes must not be uploaded yet (multi-step local create in progress).
    pub changes_sync_paused: bool,
}

impl SyncMeta {
    /// Metadata of an object freshly received at `version`.
    #[must_use]
    pub fn synced(version: Version) -> Self {
        Self {
            version,
            change_origin: ChangeOrigin::Sync,
            ..Self::default()
        }
    }

    /// Union of all pending change flags.
    #[must_use]
    pub fn change_set(&self) -> ChangeFlags {
        self.changes
            .iter()
            .fold(ChangeFlags::empty(), |acc, change| acc | change.flags)
    }

    /// Returns true if any local change is pending.
    #[must_use]
    pub fn is_changed(&self) -> bool {
        self.changes.iter().any(|change| !change.flags.is_empty())
    }

    /// Provenance ids of pending changes.
    #[must_use]
    pub fn change_ids(&self) -> Vec<Uuid> {
        self.changes.iter().map(|change| change.id).collect()
    }

    /// Records a new change and returns its id.
    ///
    /// Empty flag sets are not recorded.
    pub fn record_change(&mut self, flags: ChangeFlags, origin: ChangeOrigin) -> Option<Uuid> {
        if flags.is_empty() {
            return None;
        }
        let change = ObjectChange::new(flags);
        self.changes.push(change);
        self.change_origin = origin;
        Some(change.id)
    }

    /// Drops every pending change.
    pub fn clear_changes(&mut self) {
        self.changes.clear();
    }

    /// Drops the changes with the given ids. Returns true if any was removed.
    pub fn remove_changes(&mut self, ids: &[Uuid]) -> bool {
        let before = self.changes.len();
        self.changes.retain(|change| !ids.contains(&change.id));
        self.changes.len() != before
    }

    /// Returns true when the object has no pending local edits.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        !self.is_changed() && self.sync_state.is_synced()
    }
}
