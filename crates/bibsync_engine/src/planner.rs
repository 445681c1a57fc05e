//! Version Planner: decides which remote keys must be fetched.

use std::collections::BTreeSet;

use bibsync_core::{LibraryId, StoreState, StoredObject, Syncable, SyncMeta};
use bibsync_protocol::{SyncType, VersionMap};
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::config::SyncConfig;

/// Plans fetches from a remote version map and local sync state.
///
/// Planning is read-only.
#[derive(Debug, Clone)]
pub struct VersionPlanner<'a> {
    config: &'a SyncConfig,
    sync_type: SyncType,
    trash: Option<bool>,
}

impl<'a> VersionPlanner<'a> {
    /// Creates a planner for one sync type.
    #[must_use]
    pub fn new(config: &'a SyncConfig, sync_type: SyncType) -> Self {
        Self {
            config,
            sync_type,
            trash: None,
        }
    }

    /// Only considers local objects whose trash flag equals `trash`.
    #[must_use]
    pub fn with_trash_filter(mut self, trash: bool) -> Self {
        self.trash = Some(trash);
        self
    }

    /// Returns the keys to fetch, in order: remote keys first, then unsynced
    /// local keys the remote did not report.
    ///
    /// - A full sync fetches every remote key.
    /// - A synced local object at the remote version is dropped.
    /// - An unsynced local object is fetched once its backoff delay has
    ///   elapsed; before that it is dropped even if the remote reported it.
    ///   `IgnoreIndividualDelays` skips the backoff check.
    pub fn plan<'o, T>(
        &self,
        remote: &VersionMap,
        local: impl IntoIterator<Item = &'o T>,
        now: DateTime<Utc>,
    ) -> Vec<String>
    where
        T: Syncable + 'o,
    {
        let mut keys: Vec<String> = remote.keys().cloned().collect();
        if self.sync_type == SyncType::Full {
            return keys;
        }

        let mut present: BTreeSet<String> = keys.iter().cloned().collect();
        let mut dropped = BTreeSet::new();

        for object in local {
            if self.trash.is_some_and(|trash| object.in_trash() != trash) {
                continue;
            }
            let meta = object.sync();
            let key = object.key();
            if meta.sync_state.is_synced() {
                if remote.get(key) == Some(&meta.version) {
                    dropped.insert(key.to_owned());
                }
                continue;
            }
            if !self.backoff_elapsed(meta, now) {
                debug!(key, retries = meta.sync_state.retry_count(), "fetch postponed by backoff");
                dropped.insert(key.to_owned());
                continue;
            }
            if present.insert(key.to_owned()) {
                keys.push(key.to_owned());
            }
        }

        keys.retain(|key| !dropped.contains(key));
        keys
    }

    /// Plans fetches for every object of one kind in a library.
    pub fn plan_library<T: StoredObject>(
        &self,
        state: &StoreState,
        library: LibraryId,
        remote: &VersionMap,
        now: DateTime<Utc>,
    ) -> Vec<String> {
        self.plan(remote, state.all::<T>(library), now)
    }

    fn backoff_elapsed(&self, meta: &SyncMeta, now: DateTime<Utc>) -> bool {
        if self.sync_type == SyncType::IgnoreIndividualDelays {
            return true;
        }
        let Some(last_attempt) = meta.last_sync_attempt else {
            return true;
        };
        let delay = self.config.delay_for_retry(meta.sync_state.retry_count());
        match (now - last_attempt).to_std() {
            Ok(elapsed) => elapsed >= delay,
            // Attempt stamped in the future: treat as just attempted.
            Err(_) => delay.is_zero(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bibsync_core::{Item, SyncState};
    use chrono::Duration as ChronoDuration;
    use std::time::Duration;

    fn item(key: &str, version: u32, state: SyncState) -> Item {
        let mut item = Item::new(LibraryId::User, key, "book", Utc::now());
        item.sync.version = version;
        item.sync.sync_state = state;
        item
    }

    fn remote(entries: &[(&str, u32)]) -> VersionMap {
        entries
            .iter()
            .map(|(key, version)| ((*key).to_owned(), *version))
            .collect()
    }

    fn backoff_config() -> SyncConfig {
        SyncConfig::new().with_delay_intervals(vec![
            Duration::ZERO,
            Duration::from_secs(60),
            Duration::from_secs(300),
        ])
    }

    #[test]
    fn current_synced_objects_are_skipped() {
        let config = SyncConfig::default();
        let planner = VersionPlanner::new(&config, SyncType::Incremental);
        let local = [
            item("A", 5, SyncState::Synced),
            item("B", 2, SyncState::Synced),
        ];

        let keys = planner.plan(&remote(&[("A", 5), ("B", 3)]), &local, Utc::now());
        assert_eq!(keys, vec!["B"]);
    }

    #[test]
    fn full_sync_returns_all_remote_keys() {
        let config = SyncConfig::default();
        let planner = VersionPlanner::new(&config, SyncType::Full);
        let local = [item("A", 5, SyncState::Synced), item("Z", 1, SyncState::Dirty)];

        let keys = planner.plan(&remote(&[("A", 5), ("B", 3)]), &local, Utc::now());
        assert_eq!(keys, vec!["A", "B"]);
    }

    #[test]
    fn unsynced_local_objects_are_appended_once() {
        let config = SyncConfig::default();
        let planner = VersionPlanner::new(&config, SyncType::Incremental);
        let local = [item("A", 5, SyncState::Dirty), item("C", 0, SyncState::Dirty)];

        let keys = planner.plan(&remote(&[("A", 5), ("B", 3)]), &local, Utc::now());
        assert_eq!(keys, vec!["A", "B", "C"]);
    }

    #[test]
    fn backoff_postpones_retries() {
        let config = backoff_config();
        let now = Utc::now();
        let mut failing = item("A", 1, SyncState::DirtyWithRetry(2));
        failing.sync.last_sync_attempt = Some(now - ChronoDuration::seconds(10));
        let local = [failing];
        let versions = remote(&[("A", 2)]);

        let incremental = VersionPlanner::new(&config, SyncType::Incremental);
        assert!(incremental.plan(&versions, &local, now).is_empty());

        let ignoring = VersionPlanner::new(&config, SyncType::IgnoreIndividualDelays);
        assert_eq!(ignoring.plan(&versions, &local, now), vec!["A"]);
    }

    #[test]
    fn elapsed_backoff_allows_retry() {
        let config = backoff_config();
        let now = Utc::now();
        let mut failing = item("A", 1, SyncState::DirtyWithRetry(1));
        failing.sync.last_sync_attempt = Some(now - ChronoDuration::seconds(61));

        let planner = VersionPlanner::new(&config, SyncType::Incremental);
        assert_eq!(planner.plan(&VersionMap::new(), &[failing], now), vec!["A"]);
    }

    #[test]
    fn trash_filter_limits_local_objects() {
        let config = SyncConfig::default();
        let mut trashed = item("T", 0, SyncState::Dirty);
        trashed.trash = true;
        let local = [trashed, item("N", 0, SyncState::Dirty)];

        let planner = VersionPlanner::new(&config, SyncType::Incremental).with_trash_filter(false);
        assert_eq!(planner.plan(&VersionMap::new(), &local, Utc::now()), vec!["N"]);
    }
}
