//! Configuration for the reconciliation engine.

use std::time::Duration;

use bibsync_protocol::MAX_BATCH_COUNT;

/// Limit on the serialized length of an annotation position, in bytes.
pub const POSITION_SIZE_LIMIT: usize = 65_000;

/// Configuration for sync operations.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Backoff table indexed by retry count, clamped to its last entry.
    pub delay_intervals: Vec<Duration>,
    /// Maximum objects per write batch.
    pub max_write_batch: usize,
    /// Maximum keys per delete batch.
    pub max_delete_batch: usize,
    /// Maximum serialized annotation position length before splitting.
    pub position_size_limit: usize,
    /// Trashed items older than this are emptied from the trash.
    pub trash_auto_empty_after: Option<Duration>,
    /// Reject creators whose type is empty.
    pub deny_unknown_creator_types: bool,
}

impl SyncConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the backoff table.
    #[must_use]
    pub fn with_delay_intervals(mut self, intervals: Vec<Duration>) -> Self {
        self.delay_intervals = intervals;
        self
    }

    /// Sets the maximum write batch size.
    #[must_use]
    pub fn with_max_write_batch(mut self, size: usize) -> Self {
        self.max_write_batch = size.max(1);
        self
    }

    /// Sets the maximum delete batch size.
    #[must_use]
    pub fn with_max_delete_batch(mut self, size: usize) -> Self {
        self.max_delete_batch = size.max(1);
        self
    }

    /// Sets the annotation position size limit.
    #[must_use]
    pub fn with_position_size_limit(mut self, limit: usize) -> Self {
        self.position_size_limit = limit;
        self
    }

    /// Sets the trash auto-empty threshold.
    #[must_use]
    pub fn with_trash_auto_empty_after(mut self, threshold: Duration) -> Self {
        self.trash_auto_empty_after = Some(threshold);
        self
    }

    /// Sets whether creators with an empty type are rejected.
    #[must_use]
    pub fn with_deny_unknown_creator_types(mut self, value: bool) -> Self {
        self.deny_unknown_creator_types = value;
        self
    }

    /// Backoff delay for an object that failed `retry_count` times.
    #[must_use]
    pub fn delay_for_retry(&self, retry_count: u32) -> Duration {
        let Some(last) = self.delay_intervals.len().checked_sub(1) else {
            return Duration::ZERO;
        };
        let index = usize::try_from(retry_count).map_or(last, |count| count.min(last));
        self.delay_intervals[index]
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        const MINUTE: u64 = 60;
        const HOUR: u64 = 60 * MINUTE;
        Self {
            delay_intervals: [0, MINUTE, 5 * MINUTE, 30 * MINUTE, HOUR, 6 * HOUR, 12 * HOUR, 24 * HOUR]
                .into_iter()
                .map(Duration::from_secs)
                .collect(),
            max_write_batch: MAX_BATCH_COUNT,
            max_delete_batch: MAX_BATCH_COUNT,
            position_size_limit: POSITION_SIZE_LIMIT,
            trash_auto_empty_after: None,
            deny_unknown_creator_types: false,
        }
    }
}
