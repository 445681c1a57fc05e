//! Version maps and deletion lists reported by the remote.

use std::collections::BTreeMap;

use bibsync_core::{ObjectKind, Version};
use serde::{Deserialize, Serialize};

/// Remote versions by object key.
pub type VersionMap = BTreeMap<String, Version>;

/// Remote versions of every object kind in one library.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LibraryVersions {
    /// Collection versions.
    pub collections: VersionMap,
    /// Search versions.
    pub searches: VersionMap,
    /// Item versions.
    pub items: VersionMap,
    /// Library version at which deletions were last reported.
    pub deletions: Version,
}

impl LibraryVersions {
    /// Versions of one object kind.
    #[must_use]
    pub fn for_kind(&self, kind: ObjectKind) -> &VersionMap {
        match kind {
            ObjectKind::Collection => &self.collections,
            ObjectKind::Search => &self.searches,
            ObjectKind::Item => &self.items,
        }
    }

    /// Versions of one object kind, mutably.
    pub fn for_kind_mut(&mut self, kind: ObjectKind) -> &mut VersionMap {
        match kind {
            ObjectKind::Collection => &mut self.collections,
            ObjectKind::Search => &mut self.searches,
            ObjectKind::Item => &mut self.items,
        }
    }

    /// Highest version of any object or deletion.
    #[must_use]
    pub fn max_version(&self) -> Version {
        [&self.collections, &self.searches, &self.items]
            .into_iter()
            .flat_map(|map| map.values().copied())
            .chain(std::iter::once(self.deletions))
            .max()
            .unwrap_or(0)
    }
}

/// Keys deleted on the remote since a given library version.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Deletions {
    /// Deleted collection keys.
    pub collections: Vec<String>,
    /// Deleted search keys.
    pub searches: Vec<String>,
    /// Deleted item keys.
    pub items: Vec<String>,
    /// Deleted tag names.
    pub tags: Vec<String>,
    /// Library version of this deletion list.
    pub version: Version,
}

impl Deletions {
    /// Deleted keys of one object kind.
    #[must_use]
    pub fn for_kind(&self, kind: ObjectKind) -> &[String] {
        match kind {
            ObjectKind::Collection => &self.collections,
            ObjectKind::Search => &self.searches,
            ObjectKind::Item => &self.items,
        }
    }

    /// Returns true if nothing was deleted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.collections.is_empty()
            && self.searches.is_empty()
            && self.items.is_empty()
            && self.tags.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_version_covers_all_maps() {
        let mut versions = LibraryVersions::default();
        versions.items.insert("A".into(), 4);
        versions.collections.insert("B".into(), 9);
        versions.deletions = 7;
        assert_eq!(versions.max_version(), 9);
        assert_eq!(LibraryVersions::default().max_version(), 0);
    }

    #[test]
    fn deletions_by_kind() {
        let deletions = Deletions {
            items: vec!["A".into()],
            ..Deletions::default()
        };
        assert_eq!(deletions.for_kind(ObjectKind::Item), ["A".to_owned()]);
        assert!(deletions.for_kind(ObjectKind::Search).is_empty());
        assert!(!deletions.is_empty());
    }

    proptest::proptest! {
        #[test]
        fn max_version_bounds_every_entry(
            items in proptest::collection::btree_map("[A-Z]{8}", 0u32..1000, 0..20),
            deletions in 0u32..1000,
        ) {
            let versions = LibraryVersions {
                items: items.clone(),
                deletions,
                ..LibraryVersions::default()
            };
            let max = versions.max_version();
            proptest::prop_assert!(items.values().all(|version| *version <= max));
            proptest::prop_assert!(deletions <= max);
        }
    }
}
