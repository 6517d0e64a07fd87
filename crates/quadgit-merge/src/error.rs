//! Error types for the merge engine.
//!
//! Conflicts are not errors: they come back as data in
//! [`MergeOutcome::Conflicted`](crate::MergeOutcome::Conflicted).

use quadgit_dag::DagError;
use quadgit_diff::DiffError;
use quadgit_store::StoreError;

/// Fatal failures of a merge.
#[derive(Debug, thiserror::Error)]
pub enum MergeError {
    /// The caller's cancellation token was triggered.
    #[error("merge cancelled")]
    Cancelled,

    /// A schema provider could not produce an index.
    #[error("schema error: {0}")]
    Schema(String),

    #[error("history error: {0}")]
    Dag(#[from] DagError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl From<DiffError> for MergeError {
    fn from(err: DiffError) -> Self {
        match err {
            DiffError::Cancelled => Self::Cancelled,
            DiffError::Store(e) => Self::Store(e),
        }
    }
}

impl MergeError {
    /// Returns `true` if the operation may succeed when retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Store(e) => e.is_retryable(),
            Self::Dag(e) => e.is_retryable(),
            _ => false,
        }
    }
}

/// Convenience alias for merge results.
pub type MergeResult<T> = Result<T, MergeError>;
