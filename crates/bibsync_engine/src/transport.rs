//! Transport layer abstraction for reconciliation.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};

use bibsync_core::{LibraryId, ObjectKind, Version};
use bibsync_protocol::{
    CollectionSnapshot, DeleteBatch, Deletions, FailedWrite, ItemSnapshot, LibraryVersions,
    SearchSnapshot, WriteAck, WriteBatch,
};
use parking_lot::Mutex;

use crate::error::{SyncError, SyncResult};

/// A remote transport reports versions, serves snapshots and accepts
/// uploads.
///
/// This trait abstracts the network layer. Every call is made between
/// store transactions, never inside one.
pub trait RemoteTransport: Send + Sync {
    /// Versions of objects changed after library version `since`.
    fn versions(&self, library: LibraryId, since: Version) -> SyncResult<LibraryVersions>;

    /// Fetches item snapshots. Keys the remote does not know are omitted.
    fn fetch_items(&self, library: LibraryId, keys: &[String]) -> SyncResult<Vec<ItemSnapshot>>;

    /// Fetches collection snapshots.
    fn fetch_collections(
        &self,
        library: LibraryId,
        keys: &[String],
    ) -> SyncResult<Vec<CollectionSnapshot>>;

    /// Fetches search snapshots.
    fn fetch_searches(
        &self,
        library: LibraryId,
        keys: &[String],
    ) -> SyncResult<Vec<SearchSnapshot>>;

    /// Keys deleted after library version `since`.
    fn deletions(&self, library: LibraryId, since: Version) -> SyncResult<Deletions>;

    /// Uploads a write batch.
    fn write(&self, batch: &WriteBatch) -> SyncResult<WriteAck>;

    /// Uploads a delete batch. Returns the new library version.
    fn delete(&self, batch: &DeleteBatch) -> SyncResult<Version>;

    /// Checks if the transport is connected.
    fn is_connected(&self) -> bool;
}

#[derive(Debug, Default)]
struct RemoteLibrary {
    version: Version,
    items: BTreeMap<String, ItemSnapshot>,
    collections: BTreeMap<String, CollectionSnapshot>,
    searches: BTreeMap<String, SearchSnapshot>,
    /// Objects known only through uploads, with their version.
    uploaded: BTreeMap<(ObjectKind, String), Version>,
    deleted: Vec<(ObjectKind, String, Version)>,
    deleted_tags: Vec<(String, Version)>,
}

impl RemoteLibrary {
    fn bump(&mut self) -> Version {
        self.version += 1;
        self.version
    }

    fn remove(&mut self, kind: ObjectKind, key: &str, version: Version) {
        match kind {
            ObjectKind::Item => {
                self.items.remove(key);
            }
            ObjectKind::Collection => {
                self.collections.remove(key);
            }
            ObjectKind::Search => {
                self.searches.remove(key);
            }
        }
        self.uploaded.remove(&(kind, key.to_owned()));
        self.deleted.push((kind, key.to_owned(), version));
    }
}

#[derive(Debug, Default)]
struct MockState {
    libraries: BTreeMap<LibraryId, RemoteLibrary>,
    rejected: BTreeSet<String>,
    writes: Vec<WriteBatch>,
    deletes: Vec<DeleteBatch>,
    fetched: Vec<String>,
}

/// An in-memory remote for testing.
///
/// Snapshots are seeded with the `put_*` methods; uploads are recorded and
/// reflected in the reported versions.
#[derive(Debug)]
pub struct MockTransport {
    connected: AtomicBool,
    state: Mutex<MockState>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    /// Creates a new, connected mock transport.
    #[must_use]
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(true),
            state: Mutex::new(MockState::default()),
        }
    }

    /// Sets the connected state.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Stores an item snapshot at a new library version.
    ///
    /// Returns the version assigned to the snapshot.
    pub fn put_item(&self, library: LibraryId, mut snapshot: ItemSnapshot) -> Version {
        let mut state = self.state.lock();
        let remote = state.libraries.entry(library).or_default();
        let version = remote.bump();
        snapshot.version = version;
        remote.items.insert(snapshot.key.clone(), snapshot);
        version
    }

    /// Stores a collection snapshot at a new library version.
    pub fn put_collection(&self, library: LibraryId, mut snapshot: CollectionSnapshot) -> Version {
        let mut state = self.state.lock();
        let remote = state.libraries.entry(library).or_default();
        let version = remote.bump();
        snapshot.version = version;
        remote.collections.insert(snapshot.key.clone(), snapshot);
        version
    }

    /// Stores a search snapshot at a new library version.
    pub fn put_search(&self, library: LibraryId, mut snapshot: SearchSnapshot) -> Version {
        let mut state = self.state.lock();
        let remote = state.libraries.entry(library).or_default();
        let version = remote.bump();
        snapshot.version = version;
        remote.searches.insert(snapshot.key.clone(), snapshot);
        version
    }

    /// Deletes an object on the remote, as another client would.
    pub fn remove(&self, library: LibraryId, kind: ObjectKind, key: &str) -> Version {
        let mut state = self.state.lock();
        let remote = state.libraries.entry(library).or_default();
        let version = remote.bump();
        remote.remove(kind, key, version);
        version
    }

    /// Deletes a tag on the remote.
    pub fn remove_tag(&self, library: LibraryId, name: &str) -> Version {
        let mut state = self.state.lock();
        let remote = state.libraries.entry(library).or_default();
        let version = remote.bump();
        remote.deleted_tags.push((name.to_owned(), version));
        version
    }

    /// Makes every later write of `key` fail.
    pub fn reject_key(&self, key: impl Into<String>) {
        self.state.lock().rejected.insert(key.into());
    }

    /// Current version of a remote library.
    pub fn library_version(&self, library: LibraryId) -> Version {
        self.state
            .lock()
            .libraries
            .get(&library)
            .map_or(0, |remote| remote.version)
    }

    /// Write batches received so far.
    pub fn writes(&self) -> Vec<WriteBatch> {
        self.state.lock().writes.clone()
    }

    /// Delete batches received so far.
    pub fn deletes(&self) -> Vec<DeleteBatch> {
        self.state.lock().deletes.clone()
    }

    /// Keys fetched so far, in request order.
    pub fn fetched(&self) -> Vec<String> {
        self.state.lock().fetched.clone()
    }

    fn ensure_connected(&self) -> SyncResult<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(SyncError::transport_retryable("not connected"))
        }
    }

    fn fetch<S: Clone>(
        &self,
        library: LibraryId,
        keys: &[String],
        select: impl Fn(&RemoteLibrary) -> &BTreeMap<String, S>,
    ) -> SyncResult<Vec<S>> {
        self.ensure_connected()?;
        let mut state = self.state.lock();
        state.fetched.extend(keys.iter().cloned());
        let Some(remote) = state.libraries.get(&library) else {
            return Ok(Vec::new());
        };
        let objects = select(remote);
        Ok(keys
            .iter()
            .filter_map(|key| objects.get(key).cloned())
            .collect())
    }
}

impl RemoteTransport for MockTransport {
    fn versions(&self, library: LibraryId, since: Version) -> SyncResult<LibraryVersions> {
        self.ensure_connected()?;
        let state = self.state.lock();
        let mut versions = LibraryVersions::default();
        let Some(remote) = state.libraries.get(&library) else {
            return Ok(versions);
        };

        let newer = |version: Version| version > since;
        versions.items.extend(
            remote
                .items
                .values()
                .filter(|item| newer(item.version))
                .map(|item| (item.key.clone(), item.version)),
        );
        versions.collections.extend(
            remote
                .collections
                .values()
                .filter(|collection| newer(collection.version))
                .map(|collection| (collection.key.clone(), collection.version)),
        );
        versions.searches.extend(
            remote
                .searches
                .values()
                .filter(|search| newer(search.version))
                .map(|search| (search.key.clone(), search.version)),
        );
        for ((kind, key), version) in &remote.uploaded {
            if newer(*version) {
                versions.for_kind_mut(*kind).insert(key.clone(), *version);
            }
        }
        versions.deletions = remote.version;
        Ok(versions)
    }

    fn fetch_items(&self, library: LibraryId, keys: &[String]) -> SyncResult<Vec<ItemSnapshot>> {
        self.fetch(library, keys, |remote| &remote.items)
    }

    fn fetch_collections(
        &self,
        library: LibraryId,
        keys: &[String],
    ) -> SyncResult<Vec<CollectionSnapshot>> {
        self.fetch(library, keys, |remote| &remote.collections)
    }

    fn fetch_searches(
        &self,
        library: LibraryId,
        keys: &[String],
    ) -> SyncResult<Vec<SearchSnapshot>> {
        self.fetch(library, keys, |remote| &remote.searches)
    }

    fn deletions(&self, library: LibraryId, since: Version) -> SyncResult<Deletions> {
        self.ensure_connected()?;
        let state = self.state.lock();
        let mut deletions = Deletions::default();
        let Some(remote) = state.libraries.get(&library) else {
            return Ok(deletions);
        };
        for (kind, key, _) in remote.deleted.iter().filter(|(_, _, v)| *v > since) {
            let keys = match kind {
                ObjectKind::Item => &mut deletions.items,
                ObjectKind::Collection => &mut deletions.collections,
                ObjectKind::Search => &mut deletions.searches,
            };
            keys.push(key.clone());
        }
        deletions.tags = remote
            .deleted_tags
            .iter()
            .filter(|(_, version)| *version > since)
            .map(|(name, _)| name.clone())
            .collect();
        deletions.version = remote.version;
        Ok(deletions)
    }

    fn write(&self, batch: &WriteBatch) -> SyncResult<WriteAck> {
        self.ensure_connected()?;
        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.writes.push(batch.clone());
        let remote = state.libraries.entry(batch.library).or_default();
        if batch.version < remote.version {
            return Err(SyncError::VersionMismatch {
                expected: batch.version,
                actual: remote.version,
            });
        }

        let version = remote.bump();
        let mut ack = WriteAck {
            version,
            ..WriteAck::default()
        };
        for key in batch.keys() {
            if state.rejected.contains(&key) {
                ack.failed.push(FailedWrite {
                    key,
                    code: 400,
                    message: "rejected by mock".into(),
                });
                continue;
            }
            remote.uploaded.insert((batch.object, key.clone()), version);
            ack.successful.push(key);
        }
        Ok(ack)
    }

    fn delete(&self, batch: &DeleteBatch) -> SyncResult<Version> {
        self.ensure_connected()?;
        let mut state = self.state.lock();
        state.deletes.push(batch.clone());
        let remote = state.libraries.entry(batch.library).or_default();
        if batch.version < remote.version {
            return Err(SyncError::VersionMismatch {
                expected: batch.version,
                actual: remote.version,
            });
        }
        let version = remote.bump();
        for key in &batch.keys {
            remote.remove(batch.object, key, version);
        }
        Ok(version)
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
