//! Sync engine: drives one library through pull, deletion and push passes.
//!
//! Every fetched or uploaded batch is applied in its own store
//! transaction, and transport calls happen strictly between transactions.
//! Cancellation is checked before each batch; batches committed before a
//! cancellation stay committed and the next pass resumes from there.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bibsync_core::{
    Collection, Database, Item, LibraryId, ObjectKind, Search, StoreState, StoredObject, Version,
};
use bibsync_protocol::{
    CollectionSnapshot, DeleteBatch, DeletionConflict, DeletionMode, FailedWrite, ItemSnapshot,
    MergePolicy, SearchSnapshot, SyncType, VersionMap, WriteAck, WriteBatch, MAX_BATCH_COUNT,
};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::batcher::UploadBatcher;
use crate::config::SyncConfig;
use crate::deletions::{DeletionReport, DeletionResolver};
use crate::error::{SyncError, SyncResult};
use crate::merge::{MergeEngine, MergeReport};
use crate::planner::VersionPlanner;
use crate::splitter::{AnnotationSplitter, SplitOutcome};
use crate::tracker::{ChangeTracker, MissingRemotely};
use crate::transport::RemoteTransport;

/// The current state of the sync engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Engine is idle, not syncing.
    Idle,
    /// Engine is fetching and merging remote objects.
    Pulling,
    /// Engine is applying remote deletions.
    ApplyingDeletions,
    /// Engine is uploading local changes.
    Pushing,
    /// Engine has completed a sync cycle.
    Synced,
    /// Engine encountered an error.
    Error,
}

impl EngineState {
    /// Returns true if the engine is in an active sync state.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            EngineState::Pulling | EngineState::ApplyingDeletions | EngineState::Pushing
        )
    }

    /// Returns true if the engine can start a new sync.
    pub fn can_start_sync(&self) -> bool {
        matches!(
            self,
            EngineState::Idle | EngineState::Synced | EngineState::Error
        )
    }
}

/// Statistics about sync operations.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Total number of sync cycles completed.
    pub cycles_completed: u64,
    /// Total number of objects merged from the remote.
    pub objects_pulled: u64,
    /// Total number of objects uploaded.
    pub objects_pushed: u64,
    /// Total number of objects removed by remote deletions.
    pub objects_deleted: u64,
    /// Total number of merge and deletion conflicts encountered.
    pub conflicts_encountered: u64,
    /// Last sync time.
    pub last_sync_time: Option<Instant>,
    /// Last error message.
    pub last_error: Option<String>,
}

/// Library versions the engine has caught up to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LibraryCursor {
    /// Library version of the last complete pull or upload.
    pub version: Version,
    /// Library version of the last applied deletion list.
    pub deletions: Version,
}

/// Options for one sync cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncOptions {
    /// How the fetch set is planned.
    pub sync_type: SyncType,
    /// How remote snapshots treat local edits.
    pub merge_policy: MergePolicy,
    /// How remote deletions treat local edits.
    pub deletion_mode: DeletionMode,
}

impl SyncOptions {
    /// Sets the sync type.
    #[must_use]
    pub fn with_sync_type(mut self, sync_type: SyncType) -> Self {
        self.sync_type = sync_type;
        self
    }

    /// Sets the merge policy.
    #[must_use]
    pub fn with_merge_policy(mut self, policy: MergePolicy) -> Self {
        self.merge_policy = policy;
        self
    }

    /// Sets the deletion mode.
    #[must_use]
    pub fn with_deletion_mode(mut self, mode: DeletionMode) -> Self {
        self.deletion_mode = mode;
        self
    }
}

/// Result of a pull pass.
#[derive(Debug, Clone, Default)]
pub struct PullOutcome {
    /// Merge results of every fetched batch.
    pub merge: MergeReport,
    /// Annotations split after their geometry changed.
    pub splits: Vec<SplitOutcome>,
    /// Keys requested but not returned by the remote.
    pub missing: Vec<String>,
    /// Full-sync reconciliation of objects the remote did not report.
    pub missing_remotely: MissingRemotely,
    /// Library version reached.
    pub version: Version,
}

/// Result of a push pass.
#[derive(Debug, Clone, Default)]
pub struct PushOutcome {
    /// Keys whose changes were all acknowledged.
    pub written: Vec<String>,
    /// Writes the remote rejected.
    pub failed: Vec<FailedWrite>,
    /// Keys removed after the remote acknowledged their deletion.
    pub deleted: Vec<String>,
    /// Items marked deleted by trash auto-empty.
    pub trashed: Vec<String>,
    /// Library version reached.
    pub version: Version,
}

/// Result of a sync cycle.
#[derive(Debug, Clone)]
pub struct SyncCycleResult {
    /// Pull pass result.
    pub pull: PullOutcome,
    /// Deletion pass result.
    pub deletions: DeletionReport,
    /// Push pass result.
    pub push: PushOutcome,
    /// Whether the sync was successful.
    pub success: bool,
    /// Duration of the sync cycle.
    pub duration: Duration,
}

/// Shared cancellation flag.
///
/// Cloning the handle shares the flag; any clone can cancel a pass running
/// on another thread.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    /// Creates an unset flag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation at the next batch boundary.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Clears the flag.
    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    /// Returns true if cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// The sync engine reconciles one local store with a remote.
pub struct SyncEngine<T: RemoteTransport> {
    config: SyncConfig,
    db: Arc<Database>,
    transport: Arc<T>,
    state: RwLock<EngineState>,
    stats: RwLock<SyncStats>,
    cursors: RwLock<BTreeMap<LibraryId, LibraryCursor>>,
    deletion_conflicts: RwLock<Vec<DeletionConflict>>,
    cancelled: CancelHandle,
}

impl<T: RemoteTransport> SyncEngine<T> {
    /// Creates a new sync engine.
    pub fn new(config: SyncConfig, db: Arc<Database>, transport: T) -> Self {
        Self {
            config,
            db,
            transport: Arc::new(transport),
            state: RwLock::new(EngineState::Idle),
            stats: RwLock::new(SyncStats::default()),
            cursors: RwLock::new(BTreeMap::new()),
            deletion_conflicts: RwLock::new(Vec::new()),
            cancelled: CancelHandle::new(),
        }
    }

    /// Uses an externally created cancellation flag.
    #[must_use]
    pub fn with_cancel_handle(mut self, handle: CancelHandle) -> Self {
        self.cancelled = handle;
        self
    }

    /// Gets the current state.
    pub fn state(&self) -> EngineState {
        *self.state.read()
    }

    /// Gets the current stats.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// The engine configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// The local store.
    pub fn database(&self) -> &Database {
        &self.db
    }

    /// The transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Library versions reached for `library`.
    pub fn cursor(&self, library: LibraryId) -> LibraryCursor {
        self.cursors
            .read()
            .get(&library)
            .copied()
            .unwrap_or_default()
    }

    /// Restores the library versions of a previous session.
    pub fn set_cursor(&self, library: LibraryId, cursor: LibraryCursor) {
        self.cursors.write().insert(library, cursor);
    }

    /// Deletion conflicts that stopped the last sync cycle.
    pub fn deletion_conflicts(&self) -> Vec<DeletionConflict> {
        self.deletion_conflicts.read().clone()
    }

    /// Returns a handle that cancels the running pass.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancelled.clone()
    }

    /// Cancels any ongoing sync operation.
    pub fn cancel(&self) {
        self.cancelled.cancel();
    }

    /// Resets the cancelled flag.
    pub fn reset_cancel(&self) {
        self.cancelled.reset();
    }

    fn check_cancelled(&self) -> SyncResult<()> {
        if self.cancelled.is_cancelled() {
            info!("sync cancelled at batch boundary");
            Err(SyncError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn set_state(&self, state: EngineState) {
        *self.state.write() = state;
    }

    fn update_cursor(&self, library: LibraryId, update: impl FnOnce(&mut LibraryCursor)) {
        update(self.cursors.write().entry(library).or_default());
    }

    /// Performs a full sync cycle: pull, remote deletions, then push.
    ///
    /// Unresolved deletion conflicts stop the cycle before the push; they
    /// are available through [`SyncEngine::deletion_conflicts`].
    pub fn sync(&self, library: LibraryId, options: SyncOptions) -> SyncResult<SyncCycleResult> {
        let start = Instant::now();
        {
            let mut state = self.state.write();
            if !state.can_start_sync() {
                return Err(SyncError::InvalidStateTransition {
                    from: format!("{:?}", *state),
                    to: "sync".into(),
                });
            }
            *state = EngineState::Pulling;
        }
        self.reset_cancel();

        let result = self.run_cycle(library, options, start);
        match &result {
            Ok(result) => {
                self.set_state(EngineState::Synced);
                let mut stats = self.stats.write();
                stats.cycles_completed += 1;
                stats.objects_pulled += result.pull.merge.merged.len() as u64;
                stats.objects_pushed += result.push.written.len() as u64;
                stats.objects_deleted += (result.deletions.collections.deleted.len()
                    + result.deletions.searches.deleted.len()
                    + result.deletions.items.deleted.len()) as u64;
                stats.conflicts_encountered += result.pull.merge.conflicts.len() as u64;
                stats.last_sync_time = Some(Instant::now());
                stats.last_error = None;
            }
            Err(err) => self.handle_error(err),
        }
        result
    }

    fn run_cycle(
        &self,
        library: LibraryId,
        options: SyncOptions,
        start: Instant,
    ) -> SyncResult<SyncCycleResult> {
        let pull = self.pull(library, options.sync_type, options.merge_policy)?;
        self.check_cancelled()?;

        self.set_state(EngineState::ApplyingDeletions);
        let deletions = self.sync_deletions(library, options.deletion_mode)?;
        let conflicts: Vec<DeletionConflict> = deletions.conflicts().cloned().collect();
        let count = conflicts.len();
        *self.deletion_conflicts.write() = conflicts;
        if count > 0 {
            self.stats.write().conflicts_encountered += count as u64;
            return Err(SyncError::UnresolvedConflicts { count });
        }
        self.check_cancelled()?;

        self.set_state(EngineState::Pushing);
        let push = self.push(library)?;

        Ok(SyncCycleResult {
            pull,
            deletions,
            push,
            success: true,
            duration: start.elapsed(),
        })
    }

    /// Fetches and merges every remote object the planner selects.
    ///
    /// The library cursor only advances once every batch is merged.
    pub fn pull(
        &self,
        library: LibraryId,
        sync_type: SyncType,
        policy: MergePolicy,
    ) -> SyncResult<PullOutcome> {
        let since = match sync_type {
            SyncType::Full => 0,
            _ => self.cursor(library).version,
        };
        let versions = self.transport.versions(library, since)?;
        let mut outcome = PullOutcome::default();

        self.pull_kind::<Collection>(library, sync_type, policy, &versions.collections, &mut outcome)?;
        self.pull_kind::<Search>(library, sync_type, policy, &versions.searches, &mut outcome)?;
        self.pull_kind::<Item>(library, sync_type, policy, &versions.items, &mut outcome)?;

        if sync_type == SyncType::Full {
            self.check_cancelled()?;
            outcome.missing_remotely = self.db.transaction(|txn| {
                let mut missing =
                    ChangeTracker::mark_missing_remotely::<Collection>(txn, library, &versions.collections);
                for part in [
                    ChangeTracker::mark_missing_remotely::<Search>(txn, library, &versions.searches),
                    ChangeTracker::mark_missing_remotely::<Item>(txn, library, &versions.items),
                ] {
                    missing.removed.extend(part.removed);
                    missing.marked.extend(part.marked);
                }
                Ok(missing)
            })?;
        }

        let version = versions.max_version().max(since);
        self.update_cursor(library, |cursor| cursor.version = cursor.version.max(version));
        outcome.version = version;
        info!(
            library = %library,
            merged = outcome.merge.merged.len(),
            conflicts = outcome.merge.conflicts.len(),
            version,
            "pull complete"
        );
        Ok(outcome)
    }

    fn pull_kind<K: Pullable>(
        &self,
        library: LibraryId,
        sync_type: SyncType,
        policy: MergePolicy,
        remote: &VersionMap,
        outcome: &mut PullOutcome,
    ) -> SyncResult<()> {
        let planner = VersionPlanner::new(&self.config, sync_type);
        let keys = self
            .db
            .read(|state| planner.plan_library::<K>(state, library, remote, Utc::now()));
        if keys.is_empty() {
            return Ok(());
        }
        debug!(library = %library, kind = %K::KIND, count = keys.len(), "fetching");

        let merger = MergeEngine::new(&self.config);
        for chunk in keys.chunks(MAX_BATCH_COUNT) {
            self.check_cancelled()?;

            let snapshots = match K::fetch(&*self.transport, library, chunk) {
                Ok(snapshots) => snapshots,
                Err(err) => {
                    warn!(library = %library, kind = %K::KIND, error = %err, "fetch failed");
                    let now = Utc::now();
                    self.db.transaction(|txn| {
                        ChangeTracker::mark_for_resync::<K>(txn, library, chunk.iter().map(String::as_str), now);
                        Ok(())
                    })?;
                    return Err(err);
                }
            };

            let (report, splits, missing) = self.db.transaction(|txn| {
                let report = K::merge(&merger, txn, &snapshots, policy);
                let splits = K::split(&self.config, txn, library, &report);

                let returned: Vec<&str> = snapshots.iter().map(K::snapshot_key).collect();
                let missing: Vec<String> = chunk
                    .iter()
                    .filter(|key| !returned.contains(&key.as_str()))
                    .cloned()
                    .collect();
                let now = Utc::now();
                let failed = report.failures.iter().map(|(key, _)| key.as_str());
                ChangeTracker::mark_for_resync::<K>(txn, library, failed, now);
                ChangeTracker::mark_for_resync::<K>(txn, library, missing.iter().map(String::as_str), now);
                Ok((report, splits, missing))
            })?;

            if !missing.is_empty() {
                warn!(library = %library, kind = %K::KIND, count = missing.len(), "remote did not return requested objects");
            }
            outcome.merge.append(report);
            outcome.splits.extend(splits);
            outcome.missing.extend(missing);
        }
        Ok(())
    }

    /// Applies remote deletions reported since the last deletion pass.
    ///
    /// The deletion cursor does not advance while conflicts are pending, so
    /// the same deletions are offered again after the user decides.
    pub fn sync_deletions(
        &self,
        library: LibraryId,
        mode: DeletionMode,
    ) -> SyncResult<DeletionReport> {
        self.check_cancelled()?;
        let since = self.cursor(library).deletions;
        let deletions = self.transport.deletions(library, since)?;
        if deletions.is_empty() {
            self.update_cursor(library, |cursor| cursor.deletions = cursor.deletions.max(deletions.version));
            return Ok(DeletionReport::default());
        }

        let report = self
            .db
            .transaction(|txn| Ok(DeletionResolver::apply(txn, library, &deletions, mode)))?;
        if report.conflict_count() == 0 {
            self.update_cursor(library, |cursor| cursor.deletions = cursor.deletions.max(deletions.version));
        }
        Ok(report)
    }

    /// Empties expired trash when a threshold is configured.
    pub fn empty_trash(&self, library: LibraryId, now: DateTime<Utc>) -> SyncResult<Vec<String>> {
        let Some(threshold) = self.config.trash_auto_empty_after else {
            return Ok(Vec::new());
        };
        Ok(self
            .db
            .transaction(|txn| Ok(DeletionResolver::empty_expired_trash(txn, library, now, threshold)))?)
    }

    /// Uploads local changes, then local deletions.
    ///
    /// Each acknowledged batch is committed before the next is sent; the
    /// library version from each acknowledgement becomes the precondition of
    /// the next request.
    pub fn push(&self, library: LibraryId) -> SyncResult<PushOutcome> {
        let mut outcome = PushOutcome {
            trashed: self.empty_trash(library, Utc::now())?,
            ..PushOutcome::default()
        };
        let batcher = UploadBatcher::new(&self.config);
        let mut version = self.cursor(library).version;

        let writes = self
            .db
            .read(|state| batcher.write_batches(state, library, version));
        for mut batch in writes {
            self.check_cancelled()?;
            batch.version = version;
            let ack = self.transport.write(&batch)?;
            let now = Utc::now();
            let written = self
                .db
                .transaction(|txn| Ok(apply_ack(txn, &batch, &ack, now)))?;

            if !ack.failed.is_empty() {
                warn!(library = %library, kind = %batch.object, failed = ack.failed.len(), "remote rejected writes");
            }
            version = ack.version;
            self.update_cursor(library, |cursor| cursor.version = version);
            outcome.written.extend(written);
            outcome.failed.extend(ack.failed);
        }

        let deletes = self
            .db
            .read(|state| batcher.delete_batches(state, library, version));
        for mut batch in deletes {
            self.check_cancelled()?;
            batch.version = version;
            version = self.transport.delete(&batch)?;
            let removed = self
                .db
                .transaction(|txn| Ok(finish_deletions(txn, &batch)))?;
            self.update_cursor(library, |cursor| cursor.version = version);
            outcome.deleted.extend(removed);
        }

        outcome.version = version;
        info!(
            library = %library,
            written = outcome.written.len(),
            failed = outcome.failed.len(),
            deleted = outcome.deleted.len(),
            version,
            "push complete"
        );
        Ok(outcome)
    }

    fn handle_error(&self, error: &SyncError) {
        let state = if matches!(error, SyncError::Cancelled) {
            EngineState::Idle
        } else {
            EngineState::Error
        };
        self.set_state(state);
        self.stats.write().last_error = Some(error.to_string());
    }
}

/// Per-kind fetch, merge and post-merge steps of a pull.
trait Pullable: StoredObject {
    type Snapshot;

    fn fetch<T: RemoteTransport>(
        transport: &T,
        library: LibraryId,
        keys: &[String],
    ) -> SyncResult<Vec<Self::Snapshot>>;

    fn merge(
        merger: &MergeEngine<'_>,
        state: &mut StoreState,
        snapshots: &[Self::Snapshot],
        policy: MergePolicy,
    ) -> MergeReport;

    fn snapshot_key(snapshot: &Self::Snapshot) -> &str;

    fn split(
        _config: &SyncConfig,
        _state: &mut StoreState,
        _library: LibraryId,
        _report: &MergeReport,
    ) -> Vec<SplitOutcome> {
        Vec::new()
    }
}

impl Pullable for Item {
    type Snapshot = ItemSnapshot;

    fn fetch<T: RemoteTransport>(
        transport: &T,
        library: LibraryId,
        keys: &[String],
    ) -> SyncResult<Vec<ItemSnapshot>> {
        transport.fetch_items(library, keys)
    }

    fn merge(
        merger: &MergeEngine<'_>,
        state: &mut StoreState,
        snapshots: &[ItemSnapshot],
        policy: MergePolicy,
    ) -> MergeReport {
        merger.merge_items(state, snapshots, policy)
    }

    fn snapshot_key(snapshot: &ItemSnapshot) -> &str {
        &snapshot.key
    }

    fn split(
        config: &SyncConfig,
        state: &mut StoreState,
        library: LibraryId,
        report: &MergeReport,
    ) -> Vec<SplitOutcome> {
        AnnotationSplitter::from_config(config).split_all(
            state,
            library,
            report.geometry_changed.iter().map(String::as_str),
        )
    }
}

impl Pullable for Collection {
    type Snapshot = CollectionSnapshot;

    fn fetch<T: RemoteTransport>(
        transport: &T,
        library: LibraryId,
        keys: &[String],
    ) -> SyncResult<Vec<CollectionSnapshot>> {
        transport.fetch_collections(library, keys)
    }

    fn merge(
        merger: &MergeEngine<'_>,
        state: &mut StoreState,
        snapshots: &[CollectionSnapshot],
        _policy: MergePolicy,
    ) -> MergeReport {
        merger.merge_collections(state, snapshots)
    }

    fn snapshot_key(snapshot: &CollectionSnapshot) -> &str {
        &snapshot.key
    }
}

impl Pullable for Search {
    type Snapshot = SearchSnapshot;

    fn fetch<T: RemoteTransport>(
        transport: &T,
        library: LibraryId,
        keys: &[String],
    ) -> SyncResult<Vec<SearchSnapshot>> {
        transport.fetch_searches(library, keys)
    }

    fn merge(
        merger: &MergeEngine<'_>,
        state: &mut StoreState,
        snapshots: &[SearchSnapshot],
        _policy: MergePolicy,
    ) -> MergeReport {
        merger.merge_searches(state, snapshots)
    }

    fn snapshot_key(snapshot: &SearchSnapshot) -> &str {
        &snapshot.key
    }
}

/// Applies a write acknowledgement. Returns the keys left clean.
fn apply_ack(
    state: &mut StoreState,
    batch: &WriteBatch,
    ack: &WriteAck,
    now: DateTime<Utc>,
) -> Vec<String> {
    fn apply<K: StoredObject>(
        state: &mut StoreState,
        batch: &WriteBatch,
        ack: &WriteAck,
        now: DateTime<Utc>,
    ) -> Vec<String> {
        let failed = ack.failed.iter().map(|failure| failure.key.as_str());
        ChangeTracker::mark_for_resync::<K>(state, batch.library, failed, now);
        ChangeTracker::mark_synced::<K>(
            state,
            batch.library,
            ack.accepted_keys(),
            &batch.change_ids,
            ack.version,
        )
    }

    match batch.object {
        ObjectKind::Item => apply::<Item>(state, batch, ack, now),
        ObjectKind::Collection => apply::<Collection>(state, batch, ack, now),
        ObjectKind::Search => apply::<Search>(state, batch, ack, now),
    }
}

fn finish_deletions(state: &mut StoreState, batch: &DeleteBatch) -> Vec<String> {
    let keys = batch.keys.iter().map(String::as_str);
    match batch.object {
        ObjectKind::Item => ChangeTracker::finish_deletions::<Item>(state, batch.library, keys),
        ObjectKind::Collection => {
            ChangeTracker::finish_deletions::<Collection>(state, batch.library, keys)
        }
        ObjectKind::Search => ChangeTracker::finish_deletions::<Search>(state, batch.library, keys),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockTransport;

    #[test]
    fn engine_state_checks() {
        assert!(EngineState::Idle.can_start_sync());
        assert!(EngineState::Synced.can_start_sync());
        assert!(EngineState::Error.can_start_sync());
        assert!(!EngineState::Pulling.can_start_sync());
        assert!(!EngineState::Pushing.can_start_sync());

        assert!(EngineState::Pulling.is_active());
        assert!(EngineState::ApplyingDeletions.is_active());
        assert!(!EngineState::Idle.is_active());
    }

    #[test]
    fn engine_initial_state() {
        let engine = SyncEngine::new(
            SyncConfig::default(),
            Arc::new(Database::open_in_memory()),
            MockTransport::new(),
        );
        assert_eq!(engine.state(), EngineState::Idle);
        assert_eq!(engine.stats().cycles_completed, 0);
        assert_eq!(engine.cursor(LibraryId::User), LibraryCursor::default());
    }

    #[test]
    fn busy_engine_rejects_sync_and_keeps_cancel_request() {
        let engine = SyncEngine::new(
            SyncConfig::default(),
            Arc::new(Database::open_in_memory()),
            MockTransport::new(),
        );
        engine.set_state(EngineState::Pushing);
        engine.cancel();

        let err = engine.sync(LibraryId::User, SyncOptions::default()).unwrap_err();

        assert!(matches!(err, SyncError::InvalidStateTransition { .. }));
        assert_eq!(engine.state(), EngineState::Pushing);
        assert!(engine.cancel_handle().is_cancelled());
    }

    #[test]
    fn empty_sync_succeeds() {
        let engine = SyncEngine::new(
            SyncConfig::default(),
            Arc::new(Database::open_in_memory()),
            MockTransport::new(),
        );
        let result = engine.sync(LibraryId::User, SyncOptions::default()).unwrap();

        assert!(result.success);
        assert!(result.push.written.is_empty());
        assert_eq!(engine.state(), EngineState::Synced);
        assert_eq!(engine.stats().cycles_completed, 1);
    }

    #[test]
    fn transport_failure_sets_error_state() {
        let transport = MockTransport::new();
        transport.set_connected(false);
        let engine = SyncEngine::new(
            SyncConfig::default(),
            Arc::new(Database::open_in_memory()),
            transport,
        );

        let err = engine.sync(LibraryId::User, SyncOptions::default()).unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(engine.state(), EngineState::Error);
        assert!(engine.stats().last_error.is_some());
    }

    #[test]
    fn cancel_handle_is_shared() {
        let handle = CancelHandle::new();
        let engine = SyncEngine::new(
            SyncConfig::default(),
            Arc::new(Database::open_in_memory()),
            MockTransport::new(),
        )
        .with_cancel_handle(handle.clone());

        handle.cancel();
        assert!(engine.cancel_handle().is_cancelled());
        assert!(matches!(engine.check_cancelled(), Err(SyncError::Cancelled)));
        engine.reset_cancel();
        assert!(!handle.is_cancelled());
    }

    #[test]
    fn direct_pass_honors_cancellation() {
        let engine = SyncEngine::new(
            SyncConfig::default(),
            Arc::new(Database::open_in_memory()),
            MockTransport::new(),
        );
        engine.cancel();
        assert!(matches!(
            engine.sync_deletions(LibraryId::User, DeletionMode::ResolveConflicts),
            Err(SyncError::Cancelled)
        ));
    }
}
