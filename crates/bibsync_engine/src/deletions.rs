//! Deletion Conflict Resolver: applies remote deletions to local objects.
//!
//! A remotely deleted object that still carries local edits is either
//! reported, deleted anyway or kept for re-upload, depending on the
//! [`DeletionMode`]. Items count edits on any descendant as their own;
//! collections and searches only look at themselves.

use std::time::Duration;

use bibsync_core::{
    ChangeOrigin, Collection, Item, LibraryId, Search, StoreState, StoredObject, Syncable,
};
use bibsync_protocol::{DeletionConflict, DeletionMode, Deletions};
use chrono::{DateTime, Utc};
use tracing::{debug, info};

/// Outcome of applying remote deletions for one object kind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeletionOutcome {
    /// Keys removed from the store, cascaded children included.
    pub deleted: Vec<String>,
    /// Keys kept and re-marked for upload in full.
    pub restored: Vec<String>,
    /// Changed objects left untouched until the user decides.
    pub conflicts: Vec<DeletionConflict>,
}

/// Outcome of applying a full remote deletion list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeletionReport {
    /// Collection outcome.
    pub collections: DeletionOutcome,
    /// Search outcome.
    pub searches: DeletionOutcome,
    /// Item outcome.
    pub items: DeletionOutcome,
    /// Removed tag names.
    pub tags: Vec<String>,
}

impl DeletionReport {
    /// All conflicts, collections first.
    pub fn conflicts(&self) -> impl Iterator<Item = &DeletionConflict> {
        self.collections
            .conflicts
            .iter()
            .chain(&self.searches.conflicts)
            .chain(&self.items.conflicts)
    }

    /// Number of conflicts that need a user decision.
    #[must_use]
    pub fn conflict_count(&self) -> usize {
        self.collections.conflicts.len() + self.searches.conflicts.len() + self.items.conflicts.len()
    }
}

/// Per-kind behavior of conflict detection and restoration.
trait Resolvable: StoredObject {
    /// Returns true if local edits block a silent deletion.
    fn has_local_changes(state: &StoreState, library: LibraryId, key: &str) -> bool;

    /// Re-marks the object for upload in full. Returns the restored keys.
    fn restore(state: &mut StoreState, library: LibraryId, key: &str) -> Vec<String>;
}

/// Marks an object as never synced, with every group of it pending.
fn mark_recreated<T: Syncable>(object: &mut T) {
    let flags = object.full_change_set();
    let meta = object.sync_mut();
    meta.deleted_locally = false;
    meta.version = 0;
    meta.record_change(flags, ChangeOrigin::User);
}

impl Resolvable for Item {
    fn has_local_changes(state: &StoreState, library: LibraryId, key: &str) -> bool {
        let changed = |key: &str| {
            state
                .item(library, key)
                .is_some_and(|item| item.sync.is_changed())
        };
        changed(key)
            || state
                .descendant_items(library, key)
                .iter()
                .any(|child| changed(child.as_str()))
    }

    fn restore(state: &mut StoreState, library: LibraryId, key: &str) -> Vec<String> {
        let mut keys = vec![key.to_owned()];
        keys.extend(state.descendant_items(library, key));
        for key in &keys {
            if let Some(item) = state.item_mut(library, key) {
                for field in &mut item.fields {
                    field.changed = true;
                }
                mark_recreated(item);
            }
        }
        keys
    }
}

impl Resolvable for Collection {
    fn has_local_changes(state: &StoreState, library: LibraryId, key: &str) -> bool {
        state
            .collection(library, key)
            .is_some_and(|collection| collection.sync.is_changed())
    }

    fn restore(state: &mut StoreState, library: LibraryId, key: &str) -> Vec<String> {
        state
            .collection_mut(library, key)
            .map(|collection| {
                mark_recreated(collection);
                vec![key.to_owned()]
            })
            .unwrap_or_default()
    }
}

impl Resolvable for Search {
    fn has_local_changes(state: &StoreState, library: LibraryId, key: &str) -> bool {
        state
            .search(library, key)
            .is_some_and(|search| search.sync.is_changed())
    }

    fn restore(state: &mut StoreState, library: LibraryId, key: &str) -> Vec<String> {
        state
            .search_mut(library, key)
            .map(|search| {
                mark_recreated(search);
                vec![key.to_owned()]
            })
            .unwrap_or_default()
    }
}

/// Remote deletion handling.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeletionResolver;

impl DeletionResolver {
    /// Applies remote item deletions.
    pub fn resolve_items(
        state: &mut StoreState,
        library: LibraryId,
        keys: &[String],
        mode: DeletionMode,
    ) -> DeletionOutcome {
        resolve::<Item>(state, library, keys, mode)
    }

    /// Applies remote collection deletions.
    pub fn resolve_collections(
        state: &mut StoreState,
        library: LibraryId,
        keys: &[String],
        mode: DeletionMode,
    ) -> DeletionOutcome {
        resolve::<Collection>(state, library, keys, mode)
    }

    /// Applies remote search deletions.
    pub fn resolve_searches(
        state: &mut StoreState,
        library: LibraryId,
        keys: &[String],
        mode: DeletionMode,
    ) -> DeletionOutcome {
        resolve::<Search>(state, library, keys, mode)
    }

    /// Removes remotely deleted tags from every item. Tags carry no sync
    /// state, so there is nothing to conflict with. Returns the names of
    /// tags that existed locally.
    pub fn resolve_tags(state: &mut StoreState, library: LibraryId, names: &[String]) -> Vec<String> {
        let mut removed = Vec::new();
        for name in names {
            let known = state.tag(library, name).is_some();
            let untagged = state.remove_tag(library, name);
            if known || !untagged.is_empty() {
                debug!(library = %library, tag = %name, items = untagged.len(), "removed tag");
                removed.push(name.clone());
            }
        }
        removed
    }

    /// Applies a full deletion list: collections, searches, items, tags.
    pub fn apply(
        state: &mut StoreState,
        library: LibraryId,
        deletions: &Deletions,
        mode: DeletionMode,
    ) -> DeletionReport {
        let report = DeletionReport {
            collections: Self::resolve_collections(state, library, &deletions.collections, mode),
            searches: Self::resolve_searches(state, library, &deletions.searches, mode),
            items: Self::resolve_items(state, library, &deletions.items, mode),
            tags: Self::resolve_tags(state, library, &deletions.tags),
        };
        if report.conflict_count() > 0 {
            info!(
                library = %library,
                conflicts = report.conflict_count(),
                "remote deletions conflict with local edits"
            );
        }
        report
    }

    /// Marks trashed items last modified before `now - threshold` as
    /// locally deleted, so the next push deletes them remotely.
    ///
    /// Returns the marked keys.
    pub fn empty_expired_trash(
        state: &mut StoreState,
        library: LibraryId,
        now: DateTime<Utc>,
        threshold: Duration,
    ) -> Vec<String> {
        let Ok(threshold) = chrono::Duration::from_std(threshold) else {
            return Vec::new();
        };
        let Some(cutoff) = now.checked_sub_signed(threshold) else {
            return Vec::new();
        };

        let mut marked = Vec::new();
        for item in state.all_mut::<Item>(library) {
            if item.trash && !item.sync.deleted_locally && item.date_modified < cutoff {
                item.sync.deleted_locally = true;
                marked.push(item.key.clone());
            }
        }
        if !marked.is_empty() {
            info!(library = %library, count = marked.len(), "emptied expired trash");
        }
        marked
    }
}

fn resolve<T: Resolvable>(
    state: &mut StoreState,
    library: LibraryId,
    keys: &[String],
    mode: DeletionMode,
) -> DeletionOutcome {
    let mut outcome = DeletionOutcome::default();
    for key in keys {
        let Some(object) = state.get::<T>(library, key) else {
            debug!(kind = %T::KIND, key = %key, "already removed");
            continue;
        };
        let title = object.display_title();
        let changed = T::has_local_changes(state, library, key);

        match (mode, changed) {
            (DeletionMode::ResolveConflicts, true) => {
                debug!(kind = %T::KIND, key = %key, "deletion conflicts with local edits");
                outcome.conflicts.push(DeletionConflict {
                    key: key.clone(),
                    title,
                });
            }
            (DeletionMode::RestoreConflicts, true) => {
                info!(kind = %T::KIND, key = %key, "restoring remotely deleted object");
                outcome.restored.extend(T::restore(state, library, key));
            }
            _ => outcome.deleted.extend(state.delete::<T>(library, key)),
        }
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use bibsync_core::{ChangeFlags, Field, FieldKey, SyncMeta, TagKind, TypedTag};

    const LIB: LibraryId = LibraryId::User;

    fn synced_item(key: &str, parent: Option<&str>) -> Item {
        let mut item = Item::new(LIB, key, "book", Utc::now());
        item.parent = parent.map(str::to_owned);
        item.fields.push(Field::new(FieldKey::Title, format!("Title {key}")));
        item.sync = SyncMeta::synced(3);
        item.update_metadata();
        item
    }

    fn edit(state: &mut StoreState, key: &str) {
        state
            .item_mut(LIB, key)
            .unwrap()
            .sync
            .record_change(ChangeFlags::FIELDS, ChangeOrigin::User);
    }

    fn tree() -> StoreState {
        let mut state = StoreState::new();
        state.insert(synced_item("A", None));
        state.insert(synced_item("B", Some("A")));
        state.insert(synced_item("C", None));
        state
    }

    fn keys(keys: &[&str]) -> Vec<String> {
        keys.iter().map(|key| (*key).to_owned()).collect()
    }

    #[test]
    fn resolve_mode_reports_changed_objects() {
        let mut state = tree();
        edit(&mut state, "A");

        let outcome = DeletionResolver::resolve_items(
            &mut state,
            LIB,
            &keys(&["A", "C"]),
            DeletionMode::ResolveConflicts,
        );

        assert_eq!(
            outcome.conflicts,
            vec![DeletionConflict {
                key: "A".into(),
                title: "Title A".into()
            }]
        );
        assert!(state.item(LIB, "A").is_some());
        assert_eq!(outcome.deleted, vec!["C"]);
        assert!(state.item(LIB, "C").is_none());
    }

    #[test]
    fn changed_child_counts_for_the_parent() {
        let mut state = tree();
        edit(&mut state, "B");

        let outcome = DeletionResolver::resolve_items(
            &mut state,
            LIB,
            &keys(&["A"]),
            DeletionMode::ResolveConflicts,
        );

        assert_eq!(outcome.conflicts.len(), 1);
        assert!(state.item(LIB, "B").is_some());
    }

    #[test]
    fn delete_mode_removes_regardless() {
        let mut state = tree();
        edit(&mut state, "A");

        let outcome = DeletionResolver::resolve_items(
            &mut state,
            LIB,
            &keys(&["A", "B"]),
            DeletionMode::DeleteConflicts,
        );

        assert!(outcome.conflicts.is_empty());
        let mut deleted = outcome.deleted;
        deleted.sort();
        assert_eq!(deleted, vec!["A", "B"]);
        assert!(state.item(LIB, "A").is_none());
    }

    #[test]
    fn restore_mode_marks_tree_for_upload() {
        let mut state = tree();
        edit(&mut state, "B");

        let outcome = DeletionResolver::resolve_items(
            &mut state,
            LIB,
            &keys(&["A", "C"]),
            DeletionMode::RestoreConflicts,
        );

        assert_eq!(outcome.restored, vec!["A", "B"]);
        assert_eq!(outcome.deleted, vec!["C"]);
        let a = state.item(LIB, "A").unwrap();
        assert_eq!(a.sync.version, 0);
        assert!(a.sync.change_set().contains(ChangeFlags::FIELDS | ChangeFlags::TYPE));
        assert!(a.fields.iter().all(|field| field.changed));
        assert!(state.item(LIB, "B").unwrap().sync.is_changed());
    }

    #[test]
    fn collections_ignore_member_changes() {
        let mut state = tree();
        let mut collection = Collection::new(LIB, "COLL", "Reading");
        collection.sync = SyncMeta::synced(2);
        state.insert(collection);
        state.item_mut(LIB, "A").unwrap().collections.insert("COLL".into());
        edit(&mut state, "A");

        let outcome = DeletionResolver::resolve_collections(
            &mut state,
            LIB,
            &keys(&["COLL"]),
            DeletionMode::ResolveConflicts,
        );

        assert!(outcome.conflicts.is_empty());
        assert!(state.collection(LIB, "COLL").is_none());
        assert!(state.item(LIB, "A").unwrap().collections.is_empty());
    }

    #[test]
    fn restored_collection_is_recreated() {
        let mut state = StoreState::new();
        let mut collection = Collection::new(LIB, "COLL", "Reading");
        collection.sync = SyncMeta::synced(2);
        collection
            .sync
            .record_change(ChangeFlags::NAME, ChangeOrigin::User);
        state.insert(collection);

        let outcome = DeletionResolver::resolve_collections(
            &mut state,
            LIB,
            &keys(&["COLL"]),
            DeletionMode::RestoreConflicts,
        );

        assert_eq!(outcome.restored, vec!["COLL"]);
        let collection = state.collection(LIB, "COLL").unwrap();
        assert_eq!(collection.sync.version, 0);
        assert_eq!(
            collection.sync.change_set(),
            ChangeFlags::NAME | ChangeFlags::PARENT
        );
    }

    #[test]
    fn cascaded_keys_are_skipped() {
        let mut state = tree();
        let outcome = DeletionResolver::resolve_items(
            &mut state,
            LIB,
            &keys(&["A", "B", "MISSING"]),
            DeletionMode::ResolveConflicts,
        );
        assert_eq!(outcome.deleted.len(), 2);
        assert!(outcome.conflicts.is_empty());
    }

    #[test]
    fn apply_handles_every_kind() {
        let mut state = tree();
        state.insert(Search::new(LIB, "S", "Recent", Utc::now()));
        state.item_mut(LIB, "C").unwrap().tags.push(TypedTag::new("old", TagKind::Manual));
        state.ensure_tag(LIB, "old");
        edit(&mut state, "A");

        let deletions = Deletions {
            searches: keys(&["S"]),
            items: keys(&["A"]),
            tags: keys(&["old", "unknown"]),
            version: 10,
            ..Deletions::default()
        };
        let report = DeletionResolver::apply(&mut state, LIB, &deletions, DeletionMode::ResolveConflicts);

        assert_eq!(report.conflict_count(), 1);
        assert_eq!(report.conflicts().next().map(|c| c.key.as_str()), Some("A"));
        assert_eq!(report.searches.deleted, vec!["S"]);
        assert_eq!(report.tags, vec!["old"]);
        assert!(state.item(LIB, "C").unwrap().tags.is_empty());
    }

    #[test]
    fn expired_trash_is_marked_deleted() {
        let mut state = StoreState::new();
        let now = Utc::now();
        let mut old = synced_item("OLD", None);
        old.trash = true;
        old.date_modified = now - chrono::Duration::days(40);
        let mut recent = synced_item("NEW", None);
        recent.trash = true;
        recent.date_modified = now - chrono::Duration::days(2);
        state.insert(old);
        state.insert(recent);
        state.insert(synced_item("LIVE", None));

        let marked = DeletionResolver::empty_expired_trash(
            &mut state,
            LIB,
            now,
            Duration::from_secs(30 * 24 * 60 * 60),
        );

        assert_eq!(marked, vec!["OLD"]);
        assert!(state.item(LIB, "OLD").unwrap().sync.deleted_locally);
        assert!(!state.item(LIB, "NEW").unwrap().sync.deleted_locally);
    }
}
