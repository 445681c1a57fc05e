//! # bibsync Core
//!
//! Library data model and single-writer object store for bibsync.
//!
//! This crate provides:
//! - Syncable objects (items, collections, searches) and their satellites
//!   (base tags, users)
//! - Change metadata: `ChangeFlags` bitsets, sync state, change provenance ids
//! - Object keys and key generation
//! - An in-memory object store with closure-scoped write transactions and
//!   consistent read snapshots
//! - Cascade deletion and the structural invariants of the model (acyclic
//!   collection parents, collection membership held by root items only)
//!
//! Relationships between objects (parent/child, item/collection, item/tag)
//! are stored as keys and resolved through the store, never as owning
//! pointers.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod change;
mod collection;
mod config;
mod error;
mod item;
mod key;
mod search;
mod store;
mod tag;
mod types;
mod user;

pub use change::{ChangeFlags, ChangeOrigin, ObjectChange, SyncMeta, SyncState};
pub use collection::Collection;
pub use config::StoreConfig;
pub use error::{CoreError, CoreResult};
pub use item::{
    item_types, path_points, Creator, Field, FieldKey, Item, ItemMetadata, Link, LinkType,
    PathPoint, Rect, TagKind, TypedTag,
};
pub use key::KeyGenerator;
pub use search::{Condition, Search};
pub use store::{Database, StoreState, StoredObject, Table, Transaction};
pub use tag::{Tag, TagId};
pub use types::{LibraryId, ObjectId, ObjectKind, Syncable, Version};
pub use user::User;
