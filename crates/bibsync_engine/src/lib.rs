//! # bibsync Engine
//!
//! Local-remote reconciliation for bibsync libraries.
//!
//! This crate provides:
//! - Version planning: which remote keys must be fetched, with per-object
//!   retry backoff
//! - Change tracking: change sets, sync state and their reset after upload
//! - Remote merge of items, collections and searches with conflict detection
//! - Resolution of remote deletions against local edits
//! - Upload batching in ancestor-first order, and update-parameter
//!   serialization
//! - Splitting of annotations whose geometry exceeds the remote's limits
//! - A transport abstraction and a sync engine that composes the above
//!
//! ## Architecture
//!
//! A sync cycle for one library runs **pull, deletions, push**:
//! 1. Plan fetches from the remote version map and merge the snapshots
//! 2. Apply remote deletions, surfacing conflicts with local edits
//! 3. Upload local changes ancestors first, then local deletions
//!
//! ## Key Invariants
//!
//! - Local edits are never overwritten silently
//! - A merged object is synced at its remote version with an empty change set
//! - Network calls happen between store transactions, never inside one
//! - Every batch commits on its own; a cancelled pass resumes where it stopped
//! - Every operation can be repeated with the same input

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod batcher;
mod config;
mod deletions;
mod engine;
mod error;
mod merge;
mod params;
mod planner;
mod splitter;
mod tracker;
mod transport;

pub use batcher::UploadBatcher;
pub use config::{SyncConfig, POSITION_SIZE_LIMIT};
pub use deletions::{DeletionOutcome, DeletionReport, DeletionResolver};
pub use engine::{
    CancelHandle, EngineState, LibraryCursor, PullOutcome, PushOutcome, SyncCycleResult,
    SyncEngine, SyncOptions, SyncStats,
};
pub use error::{MergeError, SyncError, SyncResult};
pub use merge::{FilenameChange, MergeEngine, MergeReport, MergedItem, MergedObject};
pub use params::ToUpdateParameters;
pub use planner::VersionPlanner;
pub use splitter::{
    AnnotationSplitter, CountPartitioner, GeometryPartitioner, PositionSizePartitioner,
    SplitOutcome,
};
pub use tracker::{ChangeTracker, MissingRemotely};
pub use transport::{MockTransport, RemoteTransport};
