//! Error types for blame.

use quadgit_dag::DagError;
use quadgit_diff::DiffError;
use quadgit_store::StoreError;

/// Errors that can occur while attributing quads.
#[derive(Debug, thiserror::Error)]
pub enum BlameError {
    /// The caller's cancellation token was triggered.
    #[error("blame cancelled")]
    Cancelled,

    #[error("history error: {0}")]
    Dag(DagError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl From<DagError> for BlameError {
    fn from(err: DagError) -> Self {
        match err {
            DagError::Cancelled => Self::Cancelled,
            other => Self::Dag(other),
        }
    }
}

impl From<DiffError> for BlameError {
    fn from(err: DiffError) -> Self {
        match err {
            DiffError::Cancelled => Self::Cancelled,
            DiffError::Store(e) => Self::Store(e),
        }
    }
}

impl BlameError {
    /// Returns `true` if the operation may succeed when retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Store(e) => e.is_retryable(),
            Self::Dag(e) => e.is_retryable(),
            Self::Cancelled => false,
        }
    }
}

/// Convenience alias for blame results.
pub type BlameResult<T> = Result<T, BlameError>;
