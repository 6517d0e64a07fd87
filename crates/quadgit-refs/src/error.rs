//! Error types for reference operations.

use quadgit_types::ObjectId;
use thiserror::Error;

/// Errors that can occur during reference operations.
#[derive(Debug, Error)]
pub enum RefError {
    /// The reference was not found.
    #[error("ref not found: {name}")]
    NotFound { name: String },

    /// The reference name is invalid.
    #[error("invalid ref name: {name}: {reason}")]
    InvalidRefName { name: String, reason: String },

    /// A tag is immutable and cannot be moved.
    #[error("tag is immutable: {name}")]
    TagImmutable { name: String },

    /// Cannot delete the branch HEAD names.
    #[error("cannot delete current branch: {name}")]
    DeleteCurrentBranch { name: String },

    /// References may only point at commits.
    #[error("{id} is not a commit")]
    NotACommit { id: ObjectId },

    /// An abbreviated hash matched more than one commit.
    #[error("ambiguous commit prefix {prefix}: {matches} candidates")]
    AmbiguousPrefix { prefix: String, matches: usize },

    /// Serialization or deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("store error: {0}")]
    Store(#[from] quadgit_store::StoreError),
}

impl RefError {
    /// Returns `true` if the operation may succeed when retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Store(e) if e.is_retryable())
    }
}

/// Convenience type alias for ref operations.
pub type Result<T> = std::result::Result<T, RefError>;
