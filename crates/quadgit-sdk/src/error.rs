use thiserror::Error;

#[derive(Debug, Error)]
pub enum SdkError {
    #[error("repository not initialized in namespace {0}")]
    NotInitialized(String),

    #[error("repository already initialized in namespace {0}")]
    AlreadyInitialized(String),

    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("backup error: {0}")]
    Backup(String),

    #[error("store error: {0}")]
    Store(#[from] quadgit_store::StoreError),

    #[error("ref error: {0}")]
    Ref(#[from] quadgit_refs::RefError),

    #[error("history error: {0}")]
    Dag(#[from] quadgit_dag::DagError),

    #[error("diff error: {0}")]
    Diff(#[from] quadgit_diff::DiffError),

    #[error("merge error: {0}")]
    Merge(#[from] quadgit_merge::MergeError),

    #[error("blame error: {0}")]
    Blame(#[from] quadgit_blame::BlameError),
}

impl SdkError {
    /// Returns `true` for optimistic-concurrency failures, which succeed
    /// when retried against a fresh read of the branch.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Store(e) => e.is_retryable(),
            Self::Ref(e) => e.is_retryable(),
            Self::Dag(e) => e.is_retryable(),
            Self::Diff(e) => e.is_retryable(),
            Self::Merge(e) => e.is_retryable(),
            Self::Blame(e) => e.is_retryable(),
            _ => false,
        }
    }
}

pub type SdkResult<T> = Result<T, SdkError>;
