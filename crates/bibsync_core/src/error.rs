//! Error types for bibsync core.

use crate::types::ObjectKind;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in core store operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// Object not found.
    #[error("{kind} not found: {key}")]
    ObjectNotFound {
        /// Kind of object searched for.
        kind: ObjectKind,
        /// Key that was not found.
        key: String,
    },

    /// A payload did not carry a usable library identifier.
    #[error("missing library identifier for object {key}")]
    MissingLibraryIdentifier {
        /// Key of the object whose payload was malformed.
        key: String,
    },

    /// A payload key is not a valid key for the expected object kind.
    #[error("primary key {key} has wrong type, expected {expected}")]
    PrimaryKeyWrongType {
        /// The offending key.
        key: String,
        /// The expected object kind.
        expected: ObjectKind,
    },

    /// Attaching a parent would make a collection its own ancestor.
    #[error("collection {key} cannot have {parent} as parent: cycle detected")]
    CollectionCycle {
        /// Collection being re-parented.
        key: String,
        /// Requested parent.
        parent: String,
    },

    /// Operation not permitted in current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why operation is invalid.
        message: String,
    },

    /// Transaction was aborted by its body.
    #[error("transaction aborted: {reason}")]
    TransactionAborted {
        /// Reason for abort.
        reason: String,
    },
}

impl CoreError {
    /// Creates an object-not-found error.
    pub fn not_found(kind: ObjectKind, key: impl Into<String>) -> Self {
        Self::ObjectNotFound {
            kind,
            key: key.into(),
        }
    }

    /// Creates a missing library identifier error.
    pub fn missing_library(key: impl Into<String>) -> Self {
        Self::MissingLibraryIdentifier { key: key.into() }
    }

    /// Creates a malformed primary key error.
    pub fn wrong_key_type(key: impl Into<String>, expected: ObjectKind) -> Self {
        Self::PrimaryKeyWrongType {
            key: key.into(),
            expected,
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Creates a transaction aborted error.
    pub fn transaction_aborted(reason: impl Into<String>) -> Self {
        Self::TransactionAborted {
            reason: reason.into(),
        }
    }

    /// Returns true for not-found errors.
    ///
    /// Idempotent read/update requests treat these as no-ops.
    pub fn is_not_found(&self) -> bool {
        matches!(self, CoreError::ObjectNotFound { .. })
    }

    /// Returns true for malformed-data errors.
    ///
    /// These abort processing of the affected object only.
    pub fn is_data_integrity(&self) -> bool {
        matches!(
            self,
            CoreError::MissingLibraryIdentifier { .. }
                | CoreError::PrimaryKeyWrongType { .. }
                | CoreError::CollectionCycle { .. }
        )
    }
}
