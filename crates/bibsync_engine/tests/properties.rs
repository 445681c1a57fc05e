//! Property tests for change tracking, splitting, merging and batching.

use std::collections::BTreeMap;

use bibsync_core::{item_types, ChangeOrigin, Item, StoreState};
use bibsync_engine::{
    AnnotationSplitter, ChangeTracker, CountPartitioner, MergeEngine, PositionSizePartitioner,
    SyncConfig, UploadBatcher,
};
use bibsync_protocol::MergePolicy;
use bibsync_testkit::prelude::*;
use proptest::prelude::*;

fn highlight(rects: Vec<bibsync_core::Rect>, tags: &[String]) -> Item {
    let mut builder = ItemBuilder::annotation("SOURCE", "PARENT", item_types::HIGHLIGHT).rects(rects);
    for tag in tags {
        builder = builder.tag(tag);
    }
    builder.build()
}

fn store_with(items: impl IntoIterator<Item = Item>) -> StoreState {
    let mut state = StoreState::new();
    state.insert(ItemBuilder::new("PARENT").item_type(item_types::ATTACHMENT).build());
    for item in items {
        for tag in &item.tags {
            state.ensure_tag(item.library, &tag.name);
        }
        state.insert(item);
    }
    state
}

proptest! {
    #[test]
    fn reset_is_idempotent(flags in prop::collection::vec(change_flags_strategy(), 1..5)) {
        let mut item = ItemBuilder::new("A").title("Dune").build();
        for flags in flags {
            item.sync.record_change(flags, ChangeOrigin::User);
        }

        prop_assert!(ChangeTracker::reset(&mut item, false));
        let once = item.clone();
        prop_assert!(!ChangeTracker::reset(&mut item, false));
        prop_assert_eq!(&item, &once);
        prop_assert!(item.sync.is_clean());
    }

    #[test]
    fn count_split_conserves_rects_and_tags(
        rects in rects_strategy(1..120),
        tags in tag_names_strategy(),
        max in 1usize..20,
    ) {
        let count = rects.len();
        let mut state = store_with([highlight(rects, &tags)]);
        let splitter = AnnotationSplitter::new(CountPartitioner::new(max));

        match splitter.split(&mut state, USER_LIBRARY, "SOURCE") {
            Some(outcome) => {
                prop_assert!(state.item(USER_LIBRARY, "SOURCE").is_none());
                prop_assert_eq!(outcome.created.len(), count.div_ceil(max));
                let mut total = 0;
                for key in &outcome.created {
                    let copy = state.item(USER_LIBRARY, key).unwrap();
                    prop_assert!(copy.rects.len() <= max);
                    let names: Vec<&str> = copy.tags.iter().map(|tag| tag.name.as_str()).collect();
                    let expected: Vec<&str> = tags.iter().map(String::as_str).collect();
                    prop_assert_eq!(names, expected);
                    total += copy.rects.len();
                }
                prop_assert_eq!(total, count);
            }
            None => {
                prop_assert!(count <= max);
                prop_assert_eq!(state.item(USER_LIBRARY, "SOURCE").unwrap().rects.len(), count);
            }
        }
    }

    #[test]
    fn position_split_conserves_rects(rects in rects_strategy(1..150), limit in 60usize..600) {
        let count = rects.len();
        let mut state = store_with([highlight(rects, &[])]);
        let splitter = AnnotationSplitter::new(PositionSizePartitioner::new(limit));

        if let Some(outcome) = splitter.split(&mut state, USER_LIBRARY, "SOURCE") {
            prop_assert!(outcome.created.len() > 1);
            let total: usize = outcome
                .created
                .iter()
                .map(|key| state.item(USER_LIBRARY, key).map_or(0, |copy| copy.rects.len()))
                .sum();
            prop_assert_eq!(total, count);
        } else {
            prop_assert!(state.item(USER_LIBRARY, "SOURCE").is_some());
        }
    }

    #[test]
    fn prefer_remote_merge_leaves_item_clean(
        flags in change_flags_strategy(),
        title in "[A-Za-z ]{1,30}",
    ) {
        let config = SyncConfig::default();
        let mut state = store_with([ItemBuilder::new("REMOTE22").title("Local").changed(flags).build()]);
        let snapshot = SnapshotBuilder::new("REMOTE22", 7).title(&title).build();

        let merged = MergeEngine::new(&config).merge_item(&mut state, &snapshot, MergePolicy::PreferRemote);

        prop_assert!(merged.is_ok());
        let item = state.item(USER_LIBRARY, "REMOTE22").unwrap();
        prop_assert!(item.sync.is_clean());
        prop_assert_eq!(item.sync.version, 7);
        prop_assert_eq!(item.field_value(&bibsync_core::FieldKey::Title), Some(title.as_str()));
    }

    #[test]
    fn parents_are_uploaded_before_children(forest in item_forest_strategy(), batch in 1usize..8) {
        let config = SyncConfig::default().with_max_write_batch(batch);
        let mut state = StoreState::new();
        for (key, parent) in &forest {
            let mut builder = ItemBuilder::new(key).changed(bibsync_core::ChangeFlags::FIELDS);
            if let Some(parent) = parent {
                builder = builder.parent(parent);
            }
            state.insert(builder.build());
        }

        let batches = UploadBatcher::new(&config).write_batches(&state, USER_LIBRARY, 0);
        prop_assert!(batches.iter().all(|write| write.len() <= batch));
        let order: Vec<String> = batches.iter().flat_map(|write| write.keys()).collect();
        let position: BTreeMap<&str, usize> = order
            .iter()
            .enumerate()
            .map(|(index, key)| (key.as_str(), index))
            .collect();

        prop_assert_eq!(order.len(), forest.len());
        for (key, parent) in &forest {
            if let Some(parent) = parent {
                prop_assert!(position[parent.as_str()] < position[key.as_str()]);
            }
        }
    }
}
