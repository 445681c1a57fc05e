//! Item merge.

use std::collections::{BTreeMap, BTreeSet};

use bibsync_core::{
    ChangeOrigin, Collection, CoreError, Creator, Field, FieldKey, Item, Link,
    StoreState, StoredObject, Syncable, SyncState, TagKind, TypedTag, User,
};
use bibsync_protocol::{ItemSnapshot, MergePolicy, UserSnapshot, NULL_SENTINEL};
use tracing::debug;

use super::{check_conflict, library_of, FilenameChange, MergedItem};
use crate::config::SyncConfig;
use crate::error::MergeError;

pub(super) fn merge(
    config: &SyncConfig,
    state: &mut StoreState,
    snapshot: &ItemSnapshot,
    policy: MergePolicy,
) -> Result<MergedItem, MergeError> {
    let library = library_of::<Item>(&snapshot.key, snapshot.library.as_ref())?;
    if config.deny_unknown_creator_types
        && snapshot
            .creators
            .iter()
            .any(|creator| creator.creator_type.is_empty())
    {
        return Err(CoreError::invalid_operation(format!(
            "item {} has a creator without type",
            snapshot.key
        ))
        .into());
    }
    let existing = state.item(library, &snapshot.key);
    if let Some(local) = existing {
        check_conflict(local, policy)?;
    }

    let created = existing.is_none();
    let mut item = existing.cloned().unwrap_or_else(|| {
        Item::new(
            library,
            snapshot.key.clone(),
            snapshot.item_type.clone(),
            snapshot.date_added,
        )
    });

    if policy == MergePolicy::PreferRemote {
        item.sync.deleted_locally = false;
        item.sync.clear_changes();
        item.clear_change_markers();
    }

    item.item_type.clone_from(&snapshot.item_type);
    item.trash = snapshot.trash;
    item.date_added = snapshot.date_added;
    item.date_modified = snapshot.date_modified;
    item.sync.version = snapshot.version;
    item.sync.sync_state = SyncState::Synced;
    item.sync.last_sync_attempt = None;
    item.sync.change_origin = ChangeOrigin::Sync;

    let filename_change = sync_fields(&mut item, snapshot);
    sync_parent(state, &mut item, snapshot);
    sync_collections(state, &mut item, snapshot);
    let removed_tags = sync_tags(state, &mut item, snapshot);
    sync_creators(&mut item, snapshot);
    sync_relations(&mut item, snapshot);
    sync_links(&mut item, snapshot);
    let previous_users = sync_users(state, &mut item, snapshot);
    let geometry_changed = sync_rects(&mut item, snapshot) | sync_paths(&mut item, snapshot);
    item.update_metadata();

    let key = item.key.clone();
    state.insert(item);
    state.prune_tags(library, removed_tags.iter().map(String::as_str));
    state.prune_users(previous_users);

    debug!(library = %library, key = %key, version = snapshot.version, created, "merged item");
    Ok(MergedItem {
        key,
        created,
        filename_change,
        geometry_changed,
    })
}

/// Merges fields and reports an attachment rename.
fn sync_fields(item: &mut Item, snapshot: &ItemSnapshot) -> Option<FilenameChange> {
    item.fields
        .retain(|field| snapshot.fields.iter().any(|remote| remote.key == field.key));

    let mut old_name = None;
    let mut new_name = None;
    let mut content_type = None;

    for remote in &snapshot.fields {
        let duplicated = snapshot
            .fields
            .iter()
            .filter(|field| field.key == remote.key)
            .count()
            > 1;
        let index = if duplicated {
            item.fields
                .iter()
                .position(|field| field.key == remote.key && field.base_key == remote.base_key)
        } else {
            item.fields.iter().position(|field| field.key == remote.key)
        };

        match index {
            Some(index) => {
                let field = &mut item.fields[index];
                if field.base_key.is_none() {
                    field.base_key.clone_from(&remote.base_key);
                }
                let keeps_known_value = remote.value == NULL_SENTINEL && !field.value.is_empty();
                if field.value != remote.value && !keeps_known_value {
                    if field.is(&FieldKey::Filename) {
                        old_name = Some(field.value.clone());
                        new_name = Some(remote.value.clone());
                    }
                    field.value.clone_from(&remote.value);
                }
                field.changed = false;
            }
            None => {
                let mut field = Field::new(remote.key.clone(), remote.value.clone());
                field.base_key.clone_from(&remote.base_key);
                item.fields.push(field);
            }
        }

        match remote.key {
            FieldKey::ContentType => content_type = Some(remote.value.clone()),
            FieldKey::Md5 if remote.value != NULL_SENTINEL => {
                item.metadata.backend_md5.clone_from(&remote.value);
            }
            _ => {}
        }
    }

    match (old_name, new_name, content_type) {
        (Some(old_name), Some(new_name), Some(content_type)) => Some(FilenameChange {
            key: item.key.clone(),
            old_name,
            new_name,
            content_type,
        }),
        _ => None,
    }
}

/// Attaches the item to its remote parent, creating a placeholder parent
/// that the next fetch fills in.
fn sync_parent(state: &mut StoreState, item: &mut Item, snapshot: &ItemSnapshot) {
    let Some(parent) = snapshot.parent.as_deref() else {
        item.parent = None;
        return;
    };
    if state.item(item.library, parent).is_none() {
        debug!(key = %item.key, parent, "creating placeholder parent item");
        state.insert(Item::placeholder(item.library, parent, snapshot.date_added));
    }
    item.parent = Some(parent.to_owned());
}

/// Aligns collection membership with the remote collection keys.
///
/// Child items never belong to collections directly.
fn sync_collections(state: &mut StoreState, item: &mut Item, snapshot: &ItemSnapshot) {
    if item.parent.is_some() {
        item.collections.clear();
        return;
    }
    let remote: BTreeSet<&str> = snapshot.collections.iter().map(String::as_str).collect();
    item.collections.retain(|key| remote.contains(key.as_str()));

    for key in remote {
        if state.collection(item.library, key).is_none() {
            debug!(key = %item.key, collection = key, "creating placeholder collection");
            state.insert(Collection::placeholder(item.library, key, snapshot.date_added));
        }
        if !item.collections.contains(key) {
            item.collections.insert(key.to_owned());
        }
    }
}

/// Aligns typed tags with the remote tag list. Returns the names of tags
/// removed from the item, whose base tags may now be garbage.
fn sync_tags(state: &mut StoreState, item: &mut Item, snapshot: &ItemSnapshot) -> Vec<String> {
    let mut remote: BTreeMap<&str, TagKind> = BTreeMap::new();
    for tag in &snapshot.tags {
        remote.entry(tag.tag.as_str()).or_insert_with(|| tag.tag_kind());
    }

    let mut removed = Vec::new();
    item.tags.retain(|tag| {
        let keep = remote.contains_key(tag.name.as_str());
        if !keep {
            removed.push(tag.name.clone());
        }
        keep
    });

    for tag in &mut item.tags {
        if let Some(kind) = remote.get(tag.name.as_str()) {
            if tag.kind != *kind {
                tag.kind = *kind;
            }
        }
    }

    for tag in &snapshot.tags {
        if item.tags.iter().any(|existing| existing.name == tag.tag) {
            continue;
        }
        state.ensure_tag(item.library, &tag.tag);
        item.tags.push(TypedTag::new(tag.tag.clone(), tag.tag_kind()));
    }
    removed
}

/// Replaces creators wholesale.
fn sync_creators(item: &mut Item, snapshot: &ItemSnapshot) {
    if item.ignores_creators() {
        return;
    }
    item.creators = snapshot
        .creators
        .iter()
        .enumerate()
        .map(|(order, creator)| Creator {
            order,
            creator_type: creator.creator_type.clone(),
            first_name: creator.first_name.clone(),
            last_name: creator.last_name.clone(),
            name: creator.name.clone(),
        })
        .collect();
}

/// Merges relations by predicate.
fn sync_relations(item: &mut Item, snapshot: &ItemSnapshot) {
    item.relations
        .retain(|predicate, _| snapshot.relations.contains_key(predicate));
    for (predicate, value) in &snapshot.relations {
        let joined = value.joined();
        if item.relations.get(predicate) != Some(&joined) {
            item.relations.insert(predicate.clone(), joined);
        }
    }
}

fn sync_links(item: &mut Item, snapshot: &ItemSnapshot) {
    item.links = snapshot
        .links
        .iter()
        .map(|link| Link {
            link_type: link.link_type,
            href: link.href.clone(),
            content_type: link.content_type.clone(),
            title: link.title.clone(),
            length: link.length,
        })
        .collect();
}

/// Points the item at its remote users. Returns ids previously referenced,
/// which may now be unreferenced.
fn sync_users(state: &mut StoreState, item: &mut Item, snapshot: &ItemSnapshot) -> Vec<i64> {
    let previous: Vec<i64> = item.created_by.into_iter().chain(item.modified_by).collect();
    item.created_by = snapshot.created_by.as_ref().map(|user| upsert_user(state, user));
    item.modified_by = snapshot.modified_by.as_ref().map(|user| upsert_user(state, user));
    previous
}

fn upsert_user(state: &mut StoreState, user: &UserSnapshot) -> i64 {
    let current = User {
        id: user.id,
        username: user.username.clone(),
        name: user.name.clone(),
    };
    if state.user(user.id) != Some(&current) {
        state.upsert_user(current);
    }
    user.id
}

/// Rewrites rects only when the remote set differs, ignoring order.
fn sync_rects(item: &mut Item, snapshot: &ItemSnapshot) -> bool {
    let differs = item.rects.len() != snapshot.rects.len()
        || snapshot.rects.iter().any(|rect| !item.rects.contains(rect));
    if differs {
        item.rects.clone_from(&snapshot.rects);
    }
    differs
}

/// Rewrites paths only when any path differs at the same index.
fn sync_paths(item: &mut Item, snapshot: &ItemSnapshot) -> bool {
    let differs = item.paths != snapshot.paths;
    if differs {
        item.paths.clone_from(&snapshot.paths);
    }
    differs
}
