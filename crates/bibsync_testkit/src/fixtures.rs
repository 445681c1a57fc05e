//! Test fixtures and store helpers.
//!
//! Builders for local objects and remote snapshots, with defaults that
//! keep the model invariants: local objects start synced, snapshots carry a
//! library block.

use std::sync::Arc;

use bibsync_core::{
    item_types, ChangeFlags, ChangeOrigin, Collection, Database, Field, FieldKey, Item, LibraryId,
    Rect, SyncMeta, TagKind, TypedTag, Version,
};
use bibsync_protocol::{
    CollectionSnapshot, FieldSnapshot, ItemSnapshot, LibrarySnapshot, TagSnapshot,
};
use chrono::{DateTime, TimeZone, Utc};

/// The personal library used by default in fixtures.
pub const USER_LIBRARY: LibraryId = LibraryId::User;

/// A fixed timestamp, so fixtures compare equal across calls.
pub fn fixed_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0)
        .single()
        .unwrap_or_default()
}

/// Library block of the personal library.
pub fn user_library() -> LibrarySnapshot {
    LibrarySnapshot {
        kind: "user".into(),
        id: 1,
        name: "My Library".into(),
    }
}

/// Library block of a group library.
pub fn group_library(id: i64) -> LibrarySnapshot {
    LibrarySnapshot {
        kind: "group".into(),
        id,
        name: format!("Group {id}"),
    }
}

/// Opens an empty in-memory store.
pub fn memory_db() -> Arc<Database> {
    Arc::new(Database::open_in_memory())
}

/// Opens an in-memory store holding `items`, with their base tags.
pub fn seeded_db(items: impl IntoIterator<Item = Item>) -> Arc<Database> {
    let db = memory_db();
    db.transaction(|txn| {
        for item in items {
            for tag in &item.tags {
                txn.ensure_tag(item.library, &tag.name);
            }
            txn.insert(item);
        }
        Ok(())
    })
    .expect("seeding an empty store cannot fail");
    db
}

/// Builds local items.
#[derive(Debug, Clone)]
pub struct ItemBuilder {
    item: Item,
}

impl ItemBuilder {
    /// Starts a synced `document` at version 1 in the personal library.
    pub fn new(key: &str) -> Self {
        let mut item = Item::new(USER_LIBRARY, key, item_types::DOCUMENT, fixed_time());
        item.sync = SyncMeta::synced(1);
        Self { item }
    }

    /// Starts an annotation of `kind` under `parent`.
    pub fn annotation(key: &str, parent: &str, kind: &str) -> Self {
        Self::new(key)
            .item_type(item_types::ANNOTATION)
            .parent(parent)
            .field(FieldKey::AnnotationType, kind)
    }

    /// Sets the library.
    pub fn library(mut self, library: LibraryId) -> Self {
        self.item.library = library;
        self
    }

    /// Sets the item type.
    pub fn item_type(mut self, item_type: &str) -> Self {
        self.item.item_type = item_type.into();
        self
    }

    /// Sets the parent item.
    pub fn parent(mut self, parent: &str) -> Self {
        self.item.parent = Some(parent.into());
        self
    }

    /// Adds a field.
    pub fn field(mut self, key: FieldKey, value: &str) -> Self {
        self.item.fields.push(Field::new(key, value));
        self
    }

    /// Adds a title field.
    pub fn title(self, title: &str) -> Self {
        self.field(FieldKey::Title, title)
    }

    /// Adds a manual tag.
    pub fn tag(mut self, name: &str) -> Self {
        self.item.tags.push(TypedTag::new(name, TagKind::Manual));
        self
    }

    /// Adds the item to a collection.
    pub fn collection(mut self, key: &str) -> Self {
        self.item.collections.insert(key.into());
        self
    }

    /// Sets the annotation rects.
    pub fn rects(mut self, rects: Vec<Rect>) -> Self {
        self.item.rects = rects;
        self
    }

    /// Sets the synced version.
    pub fn version(mut self, version: Version) -> Self {
        self.item.sync.version = version;
        self
    }

    /// Records a local user change.
    pub fn changed(mut self, flags: ChangeFlags) -> Self {
        self.item.sync.record_change(flags, ChangeOrigin::User);
        self
    }

    /// Marks the item as deleted locally.
    pub fn deleted_locally(mut self) -> Self {
        self.item.sync.deleted_locally = true;
        self
    }

    /// Moves the item to the trash.
    pub fn trashed(mut self, date_modified: DateTime<Utc>) -> Self {
        self.item.trash = true;
        self.item.date_modified = date_modified;
        self
    }

    /// Finishes the item with derived metadata computed.
    pub fn build(mut self) -> Item {
        self.item.update_metadata();
        self.item
    }
}

/// Builds remote item snapshots.
#[derive(Debug, Clone)]
pub struct SnapshotBuilder {
    snapshot: ItemSnapshot,
}

impl SnapshotBuilder {
    /// Starts a `document` snapshot in the personal library.
    pub fn new(key: &str, version: Version) -> Self {
        Self {
            snapshot: ItemSnapshot::new(
                Some(user_library()),
                key,
                version,
                item_types::DOCUMENT,
                fixed_time(),
            ),
        }
    }

    /// Sets the library block.
    pub fn library(mut self, library: Option<LibrarySnapshot>) -> Self {
        self.snapshot.library = library;
        self
    }

    /// Sets the item type.
    pub fn item_type(mut self, item_type: &str) -> Self {
        self.snapshot.item_type = item_type.into();
        self
    }

    /// Sets the parent key.
    pub fn parent(mut self, parent: &str) -> Self {
        self.snapshot.parent = Some(parent.into());
        self
    }

    /// Adds a field.
    pub fn field(mut self, key: FieldKey, value: &str) -> Self {
        self.snapshot.fields.push(FieldSnapshot::new(key, value));
        self
    }

    /// Adds a title field.
    pub fn title(self, title: &str) -> Self {
        self.field(FieldKey::Title, title)
    }

    /// Adds a manual tag.
    pub fn tag(mut self, name: &str) -> Self {
        self.snapshot.tags.push(TagSnapshot::new(name, TagKind::Manual));
        self
    }

    /// Adds a collection key.
    pub fn collection(mut self, key: &str) -> Self {
        self.snapshot.collections.push(key.into());
        self
    }

    /// Sets the annotation rects.
    pub fn rects(mut self, rects: Vec<Rect>) -> Self {
        self.snapshot.rects = rects;
        self
    }

    /// Finishes the snapshot.
    pub fn build(self) -> ItemSnapshot {
        self.snapshot
    }
}

/// A collection snapshot in the personal library.
pub fn collection_snapshot(
    key: &str,
    version: Version,
    name: &str,
    parent: Option<&str>,
) -> CollectionSnapshot {
    CollectionSnapshot {
        key: key.into(),
        version,
        library: Some(user_library()),
        name: name.into(),
        parent: parent.map(str::to_owned),
        trash: false,
    }
}

/// A synced local collection in the personal library.
pub fn collection(key: &str, name: &str, parent: Option<&str>) -> Collection {
    let mut collection = Collection::new(USER_LIBRARY, key, name);
    collection.parent = parent.map(str::to_owned);
    collection.sync = SyncMeta::synced(1);
    collection
}

/// `count` rects stacked top to bottom, each ten units high.
pub fn stacked_rects(count: usize) -> Vec<Rect> {
    (0..count)
        .map(|index| {
            let top = 1000.0 - 10.0 * index as f64;
            Rect::new(50.0, top - 8.0, 300.0, top)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn item_builder_defaults_to_synced() {
        let item = ItemBuilder::new("A").title("Dune").build();
        assert!(item.sync.is_clean());
        assert_eq!(item.metadata.display_title, "Dune");
    }

    #[test]
    fn seeded_db_creates_base_tags() {
        let db = seeded_db([ItemBuilder::new("A").tag("sf").build()]);
        assert!(db.read(|state| state.tag(USER_LIBRARY, "sf").is_some()));
    }

    #[test]
    fn snapshot_builder_sets_library() {
        let snapshot = SnapshotBuilder::new("A", 3).title("Dune").build();
        assert_eq!(snapshot.version, 3);
        assert_eq!(
            snapshot.library.and_then(|library| library.library_id()),
            Some(USER_LIBRARY)
        );
    }

    #[test]
    fn stacked_rects_are_distinct() {
        let rects = stacked_rects(3);
        assert_eq!(rects.len(), 3);
        assert!(rects[0].max_y > rects[1].max_y);
    }
}
