//! # bibsync Testkit
//!
//! Test utilities for bibsync.
//!
//! This crate provides:
//! - Fixtures: library blocks, local object and remote snapshot builders,
//!   seeded in-memory stores
//! - Property-based test generators using proptest
//! - Tracing initialisation for tests
//!
//! ## Usage
//!
//! ```rust,ignore
//! use bibsync_testkit::prelude::*;
//!
//! #[test]
//! fn merges_a_book() {
//!     init_tracing();
//!     let snapshot = SnapshotBuilder::new("BOOK2222", 3).title("Dune").build();
//!     // ... merge and assert
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod logging;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::logging::*;
}

pub use fixtures::*;
pub use generators::*;
pub use logging::*;
