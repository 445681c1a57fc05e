//! Library-wide base tags.

use crate::types::LibraryId;

/// Address of a base tag: library plus name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TagId {
    /// Owning library.
    pub library: LibraryId,
    /// Tag name.
    pub name: String,
}

impl TagId {
    /// Creates a tag id.
    pub fn new(library: LibraryId, name: impl Into<String>) -> Self {
        Self {
            library,
            name: name.into(),
        }
    }
}

/// A base tag shared by every item of a library.
///
/// Items link to base tags through [`crate::TypedTag`]. A base tag without
/// color and without links is garbage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    /// Owning library.
    pub library: LibraryId,
    /// Tag name.
    pub name: String,
    /// Assigned color, empty if none.
    pub color: String,
}

impl Tag {
    /// Creates an uncolored tag.
    pub fn new(library: LibraryId, name: impl Into<String>) -> Self {
        Self {
            library,
            name: name.into(),
            color: String::new(),
        }
    }

    /// Returns the tag's id.
    #[must_use]
    pub fn id(&self) -> TagId {
        TagId::new(self.library, self.name.clone())
    }

    /// Returns true if this tag may be pruned once it has `links` typed
    /// tags pointing at it.
    #[must_use]
    pub fn is_garbage(&self, links: usize) -> bool {
        links == 0 && self.color.is_empty()
    }
}
