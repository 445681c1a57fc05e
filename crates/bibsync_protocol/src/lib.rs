//! # bibsync Protocol
//!
//! Value types exchanged between the reconciliation engine and the transport.
//!
//! This crate provides:
//! - Version maps and deletion lists reported by the remote
//! - Remote object snapshots, with decoding from the remote's JSON shape
//! - Write and delete batches, and write acknowledgements
//! - Conflict values and the policy enums that drive merge, deletion and
//!   fetch planning
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod batch;
mod conflict;
mod error;
mod snapshot;
mod versions;

pub use batch::{
    DeleteBatch, FailedWrite, UpdateParameters, WriteAck, WriteBatch, MAX_BATCH_COUNT,
};
pub use conflict::{Conflict, DeletionConflict, DeletionMode, MergePolicy, SyncType};
pub use error::{ProtocolError, ProtocolResult};
pub use snapshot::{
    CollectionSnapshot, ConditionSnapshot, CreatorSnapshot, FieldSnapshot, ItemSnapshot,
    LibrarySnapshot, LinkSnapshot, RelationValue, SearchSnapshot, TagSnapshot, UserSnapshot,
    NULL_SENTINEL,
};
pub use versions::{Deletions, LibraryVersions, VersionMap};
