//! Error types for the diff crate.

use quadgit_store::StoreError;

/// Errors that can occur during diff operations.
#[derive(Debug, thiserror::Error)]
pub enum DiffError {
    /// The caller's cancellation token was triggered.
    #[error("diff cancelled")]
    Cancelled,

    /// Store operation failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl DiffError {
    /// Returns `true` if the operation may succeed when retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Store(e) if e.is_retryable())
    }
}

/// Convenience alias for diff results.
pub type DiffResult<T> = Result<T, DiffError>;
