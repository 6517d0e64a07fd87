//! Error types for history traversal.

use quadgit_store::StoreError;
use quadgit_types::ObjectId;

/// Errors that can occur while walking commit history.
#[derive(Debug, thiserror::Error)]
pub enum DagError {
    /// A commit named by the caller does not exist.
    #[error("commit not found: {0}")]
    NotFound(ObjectId),

    /// A commit lists a parent that does not exist.
    #[error("dangling parent reference: commit {commit} references missing parent {parent}")]
    DanglingParent {
        /// The commit containing the bad reference.
        commit: ObjectId,
        /// The missing parent.
        parent: ObjectId,
    },

    /// A cycle was found among parent edges.
    #[error("cycle detected involving commit {0}")]
    CycleDetected(ObjectId),

    /// The two commits share no history.
    #[error("no common ancestor between {a} and {b}")]
    NoCommonAncestor { a: ObjectId, b: ObjectId },

    /// The caller's cancellation token was triggered.
    #[error("operation cancelled")]
    Cancelled,

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl DagError {
    /// Returns `true` if the operation may succeed when retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Store(e) if e.is_retryable())
    }

    /// Map a missing object onto [`DagError::NotFound`].
    pub(crate) fn from_read(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => Self::NotFound(id),
            other => Self::Store(other),
        }
    }
}

/// Convenience alias for history results.
pub type DagResult<T> = Result<T, DagError>;
