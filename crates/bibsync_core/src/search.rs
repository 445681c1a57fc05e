//! Saved searches.

use chrono::{DateTime, Utc};

use crate::change::{ChangeFlags, SyncMeta};
use crate::types::{LibraryId, ObjectKind, Syncable};

/// One condition of a saved search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Condition {
    /// Condition name, e.g. `title`.
    pub condition: String,
    /// Operator, e.g. `contains`.
    pub operator: String,
    /// Operand.
    pub value: String,
}

impl Condition {
    /// Creates a condition.
    pub fn new(
        condition: impl Into<String>,
        operator: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            condition: condition.into(),
            operator: operator.into(),
            value: value.into(),
        }
    }
}

/// A saved search.
#[derive(Debug, Clone, PartialEq)]
pub struct Search {
    /// Owning library.
    pub library: LibraryId,
    /// Search key.
    pub key: String,
    /// Display name.
    pub name: String,
    /// Ordered conditions.
    pub conditions: Vec<Condition>,
    /// In trash.
    pub trash: bool,
    /// Last modification timestamp.
    pub date_modified: DateTime<Utc>,
    /// Sync metadata.
    pub sync: SyncMeta,
}

impl Search {
    /// Creates a search without conditions.
    pub fn new(
        library: LibraryId,
        key: impl Into<String>,
        name: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            library,
            key: key.into(),
            name: name.into(),
            conditions: Vec::new(),
            trash: false,
            date_modified: now,
            sync: SyncMeta::default(),
        }
    }
}

impl Syncable for Search {
    const KIND: ObjectKind = ObjectKind::Search;

    fn key(&self) -> &str {
        &self.key
    }

    fn library(&self) -> LibraryId {
        self.library
    }

    fn sync(&self) -> &SyncMeta {
        &self.sync
    }

    fn sync_mut(&mut self) -> &mut SyncMeta {
        &mut self.sync
    }

    fn in_trash(&self) -> bool {
        self.trash
    }

    fn full_change_set(&self) -> ChangeFlags {
        ChangeFlags::NAME | ChangeFlags::CONDITIONS | ChangeFlags::TRASH
    }

    fn display_title(&self) -> String {
        self.name.clone()
    }
}
