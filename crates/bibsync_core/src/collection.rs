//! Collections.

use crate::change::{ChangeFlags, SyncMeta};
use crate::types::{LibraryId, ObjectKind, Syncable};

/// A collection (folder) of items.
///
/// Membership is stored on the items. Parent collections are referenced by
/// key and must never form a cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct Collection {
    /// Owning library.
    pub library: LibraryId,
    /// Collection key.
    pub key: String,
    /// Display name.
    pub name: String,
    /// Parent collection key.
    pub parent: Option<String>,
    /// Collapsed in the collection tree.
    pub collapsed: bool,
    /// In trash.
    pub trash: bool,
    /// Sync metadata.
    pub sync: SyncMeta,
}

impl Collection {
    /// Creates a top-level collection.
    pub fn new(library: LibraryId, key: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            library,
            key: key.into(),
            name: name.into(),
            parent: None,
            collapsed: true,
            trash: false,
            sync: SyncMeta::default(),
        }
    }
}

impl Syncable for Collection {
    const KIND: ObjectKind = ObjectKind::Collection;

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
        ChangeFlags::NAME | ChangeFlags::PARENT
    }

    fn display_title(&self) -> String {
        self.name.clone()
    }

    fn parent_key(&self) -> Option<&str> {
        self.parent.as_deref()
    }
}
