//! Saved search merge.

use bibsync_core::{ChangeOrigin, Condition, Search, StoreState, SyncState};
use bibsync_protocol::SearchSnapshot;
use tracing::{debug, info};

use super::{library_of, MergedObject};
use crate::error::MergeError;

pub(super) fn merge(
    state: &mut StoreState,
    snapshot: &SearchSnapshot,
) -> Result<MergedObject, MergeError> {
    let library = library_of::<Search>(&snapshot.key, snapshot.library.as_ref())?;

    let existing = state.search(library, &snapshot.key);
    let created = existing.is_none();
    let mut search = match existing.cloned() {
        Some(search) => search,
        None => Search::new(
            library,
            snapshot.key.clone(),
            "",
            snapshot.date_modified.unwrap_or_default(),
        ),
    };

    let restored = search.sync.deleted_locally;
    if restored {
        info!(library = %library, key = %snapshot.key, "restoring locally deleted search");
    }
    search.sync.deleted_locally = false;
    search.sync.clear_changes();

    search.name.clone_from(&snapshot.name);
    search.conditions = snapshot
        .conditions
        .iter()
        .map(|condition| {
            Condition::new(
                condition.condition.clone(),
                condition.operator.clone(),
                condition.value.clone(),
            )
        })
        .collect();
    search.trash = snapshot.trash;
    if let Some(date_modified) = snapshot.date_modified {
        search.date_modified = date_modified;
    }
    search.sync.version = snapshot.version;
    search.sync.sync_state = SyncState::Synced;
    search.sync.last_sync_attempt = None;
    search.sync.change_origin = ChangeOrigin::Sync;

    state.insert(search);
    debug!(library = %library, key = %snapshot.key, version = snapshot.version, created, "merged search");
    Ok(MergedObject {
        key: snapshot.key.clone(),
        created,
        restored,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bibsync_core::{ChangeFlags, CoreError, LibraryId};
    use bibsync_protocol::{ConditionSnapshot, LibrarySnapshot};

    fn snapshot(version: u32) -> SearchSnapshot {
        SearchSnapshot {
            key: "SSSSSSSS".into(),
            version,
            library: Some(LibrarySnapshot {
                kind: "group".into(),
                id: 9,
                name: "Lab".into(),
            }),
            name: "Unread".into(),
            conditions: vec![ConditionSnapshot {
                condition: "tag".into(),
                operator: "isNot".into(),
                value: "read".into(),
            }],
            trash: false,
            date_modified: None,
        }
    }

    #[test]
    fn overwrites_local_state() {
        let mut state = StoreState::new();
        merge(&mut state, &snapshot(1)).unwrap();
        let lib = LibraryId::Group(9);
        let local = state.search_mut(lib, "SSSSSSSS").unwrap();
        local.conditions.clear();
        local.sync.record_change(ChangeFlags::CONDITIONS, ChangeOrigin::User);
        local.sync.deleted_locally = true;

        let merged = merge(&mut state, &snapshot(2)).unwrap();

        assert!(merged.restored);
        let search = state.search(lib, "SSSSSSSS").unwrap();
        assert_eq!(search.conditions, vec![Condition::new("tag", "isNot", "read")]);
        assert_eq!(search.sync.version, 2);
        assert!(search.sync.is_clean());
        assert!(!search.sync.deleted_locally);
    }

    #[test]
    fn requires_library() {
        let mut state = StoreState::new();
        let mut payload = snapshot(1);
        payload.library = None;
        assert!(matches!(
            merge(&mut state, &payload),
            Err(MergeError::Integrity(CoreError::MissingLibraryIdentifier { .. }))
        ));
    }
}
