//! Conflicts and the policies that decide how they are handled.

use bibsync_core::ObjectKind;
use thiserror::Error;

/// A remote snapshot could not be applied without discarding local edits.
///
/// Conflicts are recoverable: they are reported to the caller, which picks
/// a policy and retries.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Conflict {
    /// The local object has pending changes.
    #[error("{kind} {key} has unsynced local changes")]
    Changed {
        /// Object kind.
        kind: ObjectKind,
        /// Object key.
        key: String,
    },

    /// The local object is marked as deleted.
    #[error("{kind} {key} was deleted locally")]
    Deleted {
        /// Object kind.
        kind: ObjectKind,
        /// Object key.
        key: String,
    },
}

impl Conflict {
    /// Key of the conflicting object.
    #[must_use]
    pub fn key(&self) -> &str {
        match self {
            Conflict::Changed { key, .. } | Conflict::Deleted { key, .. } => key,
        }
    }

    /// Kind of the conflicting object.
    #[must_use]
    pub fn kind(&self) -> ObjectKind {
        match self {
            Conflict::Changed { kind, .. } | Conflict::Deleted { kind, .. } => *kind,
        }
    }
}

/// A remotely deleted object that still has local edits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletionConflict {
    /// Object key.
    pub key: String,
    /// Title shown when asking the user.
    pub title: String,
}

/// How a remote snapshot treats local pending edits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MergePolicy {
    /// Remote wins: local edits and local deletion are discarded.
    PreferRemote,
    /// Local edits win: the merge fails with a [`Conflict`].
    #[default]
    PreferLocalOnConflict,
}

impl MergePolicy {
    /// Maps the boolean `prefer_remote` flag used by callers.
    #[must_use]
    pub const fn from_prefer_remote(prefer_remote: bool) -> Self {
        if prefer_remote {
            MergePolicy::PreferRemote
        } else {
            MergePolicy::PreferLocalOnConflict
        }
    }
}

/// How remote deletions of locally changed objects are handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeletionMode {
    /// Report changed objects as conflicts, delete the rest.
    #[default]
    ResolveConflicts,
    /// Delete everything; the user already confirmed.
    DeleteConflicts,
    /// Keep changed objects and re-upload them in full, delete the rest.
    RestoreConflicts,
}

/// How the fetch set is planned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncType {
    /// Fetch every remote key.
    Full,
    /// Fetch changed keys, honoring per-object retry backoff.
    #[default]
    Incremental,
    /// Fetch changed keys, ignoring per-object retry backoff.
    IgnoreIndividualDelays,
}
