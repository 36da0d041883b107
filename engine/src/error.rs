//! Error types for the GardenSync engine.

use crate::{CollectionName, DocumentId};
use thiserror::Error;

/// All possible errors from the GardenSync engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // Lookup errors
    #[error("document not found: {collection}/{id}")]
    NotFound {
        collection: CollectionName,
        id: DocumentId,
    },

    #[error("document already exists: {collection}/{id}")]
    DuplicateKey {
        collection: CollectionName,
        id: DocumentId,
    },

    #[error("operation not found: {0}")]
    OperationNotFound(u64),

    // Validation errors
    #[error("validation failed for {collection}: {reason}")]
    ValidationFailed {
        collection: CollectionName,
        reason: String,
    },

    #[error("missing required field: {0}")]
    MissingRequiredField(String),

    #[error("type mismatch for field '{field}': expected {expected}, got {got}")]
    TypeMismatch {
        field: String,
        expected: String,
        got: String,
    },

    #[error("invalid recurrence pattern: {0}")]
    InvalidRecurrence(String),

    #[error("invalid status: {0}")]
    InvalidStatus(String),

    // State errors
    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),

    #[error("snapshot format mismatch: expected {expected}, got {actual}")]
    SnapshotVersionMismatch { expected: u32, actual: u32 },
}

impl Error {
    /// Shorthand for [`Error::NotFound`].
    pub fn not_found(collection: impl Into<CollectionName>, id: impl Into<DocumentId>) -> Self {
        Error::NotFound {
            collection: collection.into(),
            id: id.into(),
        }
    }

    /// Shorthand for [`Error::ValidationFailed`].
    pub fn validation(collection: impl Into<CollectionName>, reason: impl Into<String>) -> Self {
        Error::ValidationFailed {
            collection: collection.into(),
            reason: reason.into(),
        }
    }

    /// True for every error raised by a document validator.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Error::ValidationFailed { .. }
                | Error::MissingRequiredField(_)
                | Error::TypeMismatch { .. }
                | Error::InvalidRecurrence(_)
        )
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
