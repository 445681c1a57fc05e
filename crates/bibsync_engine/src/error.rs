//! Error types for the reconciliation engine.

use bibsync_core::CoreError;
use bibsync_protocol::{Conflict, ProtocolError};
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// Store error during sync.
    #[error("store error: {0}")]
    Core(#[from] CoreError),

    /// Remote payload could not be decoded.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The remote library moved on while a write was being prepared.
    #[error("library version mismatch: expected={expected}, actual={actual}")]
    VersionMismatch {
        /// Version the batch was built against.
        expected: u32,
        /// Version reported by the remote.
        actual: u32,
    },

    /// Remote deletions conflict with local edits and need a user decision.
    #[error("{count} deletion conflicts need resolution")]
    UnresolvedConflicts {
        /// Number of conflicting objects.
        count: usize,
    },

    /// Sync was cancelled.
    #[error("sync cancelled")]
    Cancelled,

    /// Invalid state transition.
    #[error("invalid state transition from {from} to {to}")]
    InvalidStateTransition {
        /// Current state.
        from: String,
        /// Attempted target state.
        to: String,
    },
}

impl SyncError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            SyncError::VersionMismatch { .. } => true,
            _ => false,
        }
    }
}

impl From<ProtocolError> for SyncError {
    fn from(err: ProtocolError) -> Self {
        SyncError::Protocol(err.to_string())
    }
}

/// Why a single object could not be merged.
///
/// Merge failures are collected per object; they never abort a batch.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MergeError {
    /// Local edits or a local deletion block the remote snapshot.
    #[error(transparent)]
    Conflict(#[from] Conflict),

    /// The payload is malformed or would break a store invariant.
    #[error(transparent)]
    Integrity(#[from] CoreError),
}

impl MergeError {
    /// Returns true for recoverable conflicts.
    pub fn is_conflict(&self) -> bool {
        matches!(self, MergeError::Conflict(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bibsync_core::ObjectKind;

    #[test]
    fn retryable_errors() {
        assert!(SyncError::transport_retryable("connection lost").is_retryable());
        assert!(!SyncError::transport_fatal("forbidden").is_retryable());
        assert!(SyncError::VersionMismatch {
            expected: 1,
            actual: 2
        }
        .is_retryable());
        assert!(!SyncError::Cancelled.is_retryable());
    }

    #[test]
    fn error_display() {
        let err = SyncError::UnresolvedConflicts { count: 3 };
        assert_eq!(err.to_string(), "3 deletion conflicts need resolution");

        let err = SyncError::from(CoreError::not_found(ObjectKind::Item, "AAAA2222"));
        assert!(err.to_string().contains("AAAA2222"));
    }

    #[test]
    fn merge_error_classification() {
        let conflict = MergeError::from(Conflict::Changed {
            kind: ObjectKind::Item,
            key: "AAAA2222".into(),
        });
        assert!(conflict.is_conflict());
        assert!(!MergeError::from(CoreError::missing_library("AAAA2222")).is_conflict());
    }
}
