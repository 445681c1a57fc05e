//! Error types for payload decoding.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while decoding remote payloads.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// JSON could not be parsed or did not match the expected shape.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// A required attribute is missing.
    #[error("missing attribute `{attribute}` in {object} payload")]
    MissingAttribute {
        /// Object kind being decoded.
        object: &'static str,
        /// Attribute name.
        attribute: &'static str,
    },

    /// An attribute has an unexpected value.
    #[error("invalid attribute `{attribute}`: {message}")]
    InvalidAttribute {
        /// Attribute name.
        attribute: &'static str,
        /// Description of the problem.
        message: String,
    },
}

impl ProtocolError {
    /// Creates a missing attribute error.
    pub fn missing(object: &'static str, attribute: &'static str) -> Self {
        Self::MissingAttribute { object, attribute }
    }

    /// Creates an invalid attribute error.
    pub fn invalid(attribute: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidAttribute {
            attribute,
            message: message.into(),
        }
    }
}
