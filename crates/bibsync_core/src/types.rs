//! Core type definitions for bibsync.

use crate::change::{ChangeFlags, SyncMeta};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Monotonically increasing version number assigned by the remote.
pub type Version = u32;

/// Identifier of a library (personal or group).
///
/// Every syncable object belongs to exactly one library.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum LibraryId {
    /// The user's own library.
    User,
    /// A group library, identified by its remote group id.
    Group(i64),
}

impl LibraryId {
    /// Returns the group id for group libraries.
    #[must_use]
    pub const fn group_id(self) -> Option<i64> {
        match self {
            LibraryId::User => None,
            LibraryId::Group(id) => Some(id),
        }
    }
}

impl fmt::Display for LibraryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LibraryId::User => write!(f, "user"),
            LibraryId::Group(id) => write!(f, "group:{id}"),
        }
    }
}

/// The three syncable object kinds.
///
/// The declaration order is the order in which deletions are uploaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ObjectKind {
    /// A collection (folder).
    Collection,
    /// A saved search.
    Search,
    /// An item (document, note, attachment, annotation).
    Item,
}

impl ObjectKind {
    /// All kinds in upload order.
    pub const ALL: [ObjectKind; 3] = [ObjectKind::Collection, ObjectKind::Search, ObjectKind::Item];

    /// Returns the lowercase singular name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            ObjectKind::Collection => "collection",
            ObjectKind::Search => "search",
            ObjectKind::Item => "item",
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unique address of an object: library plus key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectId {
    /// Owning library.
    pub library: LibraryId,
    /// Object key, unique within the library and kind.
    pub key: String,
}

impl ObjectId {
    /// Creates a new object id.
    pub fn new(library: LibraryId, key: impl Into<String>) -> Self {
        Self {
            library,
            key: key.into(),
        }
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.library, self.key)
    }
}

/// Common surface of the three syncable object kinds.
///
/// Planner, tracker and batcher code is written once against this trait.
pub trait Syncable: Clone {
    /// Kind of this object.
    const KIND: ObjectKind;

    /// Object key.
    fn key(&self) -> &str;

    /// Owning library.
    fn library(&self) -> LibraryId;

    /// Sync metadata.
    fn sync(&self) -> &SyncMeta;

    /// Mutable sync metadata.
    fn sync_mut(&mut self) -> &mut SyncMeta;

    /// Whether the object is in the trash.
    fn in_trash(&self) -> bool;

    /// Every change group that applies to this object.
    ///
    /// Used when an object must be re-uploaded in full.
    fn full_change_set(&self) -> ChangeFlags;

    /// Human-readable title, used for conflict reporting.
    fn display_title(&self) -> String;

    /// Key of the parent object of the same kind, if any.
    fn parent_key(&self) -> Option<&str> {
        None
    }

    /// Clears per-record change markers once every change is uploaded.
    fn clear_change_markers(&mut self) {}

    /// Returns the object's id.
    fn id(&self) -> ObjectId {
        ObjectId::new(self.library(), self.key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn library_display() {
        assert_eq!(LibraryId::User.to_string(), "user");
        assert_eq!(LibraryId::Group(42).to_string(), "group:42");
        assert_eq!(LibraryId::Group(42).group_id(), Some(42));
    }

    #[test]
    fn kind_order_matches_upload_order() {
        let mut kinds = vec![ObjectKind::Item, ObjectKind::Collection, ObjectKind::Search];
        kinds.sort();
        assert_eq!(kinds, ObjectKind::ALL.to_vec());
    }

    #[test]
    fn object_id_display() {
        let id = ObjectId::new(LibraryId::User, "ABCD2345");
        assert_eq!(id.to_string(), "user/ABCD2345");
    }
}
