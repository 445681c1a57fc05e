//! Property-based test generators using proptest.
//!
//! Provides strategies for generating random test data
//! that maintains required invariants.

use bibsync_core::{ChangeFlags, Rect};
use proptest::prelude::*;

/// Strategy for generating object keys in the remote's key alphabet.
pub fn key_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[23456789A-NP-Z]{8}").expect("Invalid regex")
}

/// Strategy for generating non-empty change sets.
pub fn change_flags_strategy() -> impl Strategy<Value = ChangeFlags> {
    (1u32..(1 << 12)).prop_map(ChangeFlags::from_bits_truncate)
}

/// Strategy for generating tag names.
pub fn tag_names_strategy() -> impl Strategy<Value = Vec<String>> {
    prop::collection::btree_set("[a-z]{1,12}", 0..6).prop_map(|names| names.into_iter().collect())
}

/// Strategy for generating page rects with coordinates below 1000.
pub fn rect_strategy() -> impl Strategy<Value = Rect> {
    (0.0..900.0f64, 0.0..900.0f64, 1.0..100.0f64, 1.0..100.0f64)
        .prop_map(|(x, y, width, height)| Rect::new(x, y, x + width, y + height))
}

/// Strategy for generating highlight geometry.
pub fn rects_strategy(count: std::ops::Range<usize>) -> impl Strategy<Value = Vec<Rect>> {
    prop::collection::vec(rect_strategy(), count)
}

/// Strategy for generating ink paths of flattened coordinate pairs.
pub fn paths_strategy() -> impl Strategy<Value = Vec<Vec<f64>>> {
    prop::collection::vec(
        prop::collection::vec((0.0..1000.0f64, 0.0..1000.0f64), 1..20)
            .prop_map(|points| points.into_iter().flat_map(|(x, y)| [x, y]).collect()),
        1..10,
    )
}

/// Strategy for generating an item forest.
///
/// Returns `(key, parent)` pairs in random order. Keys are `K0`, `K1`, ...;
/// a parent always has a lower index, so the forest is acyclic.
pub fn item_forest_strategy() -> impl Strategy<Value = Vec<(String, Option<String>)>> {
    (1usize..30)
        .prop_flat_map(|count| {
            let parents: Vec<BoxedStrategy<Option<usize>>> = (0..count)
                .map(|index| {
                    if index == 0 {
                        Just(None).boxed()
                    } else {
                        prop::option::of(0..index).boxed()
                    }
                })
                .collect();
            parents
        })
        .prop_map(|parents| {
            parents
                .into_iter()
                .enumerate()
                .map(|(index, parent)| {
                    (format!("K{index}"), parent.map(|parent| format!("K{parent}")))
                })
                .collect::<Vec<_>>()
        })
        .prop_shuffle()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bibsync_core::KeyGenerator;

    proptest! {
        #[test]
        fn generated_keys_are_valid(key in key_strategy()) {
            prop_assert!(KeyGenerator::is_valid(&key));
        }

        #[test]
        fn generated_flags_are_never_empty(flags in change_flags_strategy()) {
            prop_assert!(!flags.is_empty());
        }

        #[test]
        fn forest_parents_exist(forest in item_forest_strategy()) {
            let keys: Vec<&String> = forest.iter().map(|(key, _)| key).collect();
            for (_, parent) in &forest {
                if let Some(parent) = parent {
                    prop_assert!(keys.contains(&parent));
                }
            }
        }
    }
}
