use quadgit_types::{ObjectId, TypeError};

/// Errors from key-value and object store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The requested object was not found.
    #[error("object not found: {0}")]
    NotFound(ObjectId),

    /// Content hash mismatch on read (data corruption).
    #[error("hash mismatch for {id}: content hashes to {computed}")]
    HashMismatch { id: ObjectId, computed: ObjectId },

    /// The object data is malformed or of an unexpected kind.
    #[error("corrupt object {id}: {reason}")]
    CorruptObject { id: ObjectId, reason: String },

    /// A quad set violates blob rules (wrong graph, unsorted stream).
    #[error("invalid quad data: {0}")]
    InvalidQuads(String),

    /// Serialization or deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A key read by this transaction was modified after its snapshot.
    /// Retry with a fresh read of the base state.
    #[error("transaction conflict")]
    TransactionConflict,

    /// The key-value backend failed.
    #[error("backend error: {0}")]
    Backend(String),

    /// Signing or signature verification failed.
    #[error("signature error: {0}")]
    Signature(#[from] quadgit_crypto::SignatureError),

    #[error(transparent)]
    Type(#[from] TypeError),
}

impl StoreError {
    /// Returns `true` if the operation may succeed when retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransactionConflict)
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
