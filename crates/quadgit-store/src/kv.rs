//! The ordered key-value interface everything else is built on.
//!
//! Implementations must provide byte-ordered keys, point-in-time snapshots,
//! and optimistic transactions: a transaction's tracked reads are validated
//! at commit time and a concurrent modification of any of them fails the
//! commit with [`StoreError::TransactionConflict`].
//!
//! [`StoreError::TransactionConflict`]: crate::error::StoreError::TransactionConflict

use std::sync::Arc;

use crate::error::StoreResult;

/// A transactional, ordered key-value store.
pub trait KvBackend: Send + Sync {
    /// A consistent read view of the latest committed state.
    fn snapshot(&self) -> StoreResult<Arc<dyn KvSnapshot>>;

    /// Start an optimistic read-write transaction.
    fn begin(&self) -> StoreResult<Box<dyn KvTransaction>>;
}

/// Immutable point-in-time view of the store.
pub trait KvSnapshot: Send + Sync {
    /// Commit version this snapshot observes.
    fn version(&self) -> u64;

    fn get(&self, key: &[u8]) -> StoreResult<Option<Vec<u8>>>;

    /// Forward cursor over every key starting with `prefix`, positioned at
    /// the first such key. The cursor keeps the snapshot alive.
    fn cursor(self: Arc<Self>, prefix: &[u8]) -> StoreResult<Box<dyn KvCursor>>;
}

/// Prefix-bounded forward iterator.
///
/// `key` and `value` may only be called while `valid` returns `true`.
pub trait KvCursor: Send {
    /// Position at the first key `>= key` within the prefix.
    fn seek(&mut self, key: &[u8]) -> StoreResult<()>;

    fn valid(&self) -> bool;

    fn key(&self) -> &[u8];

    fn value(&self) -> &[u8];

    fn next(&mut self) -> StoreResult<()>;
}

/// Buffered read-write transaction under snapshot isolation.
///
/// Nothing is visible to other readers until [`KvTransaction::commit`]
/// succeeds. Dropping a transaction discards it.
pub trait KvTransaction: Send {
    /// Read a key and record it in the read set.
    fn get(&mut self, key: &[u8]) -> StoreResult<Option<Vec<u8>>>;

    /// Read a key without conflict tracking. Sees this transaction's writes.
    fn peek(&self, key: &[u8]) -> StoreResult<Option<Vec<u8>>>;

    fn set(&mut self, key: &[u8], value: &[u8]);

    fn delete(&mut self, key: &[u8]);

    /// The snapshot this transaction reads from. Cursors opened on it do
    /// not observe the transaction's own buffered writes.
    fn snapshot(&self) -> Arc<dyn KvSnapshot>;

    /// Number of buffered writes.
    fn pending(&self) -> usize;

    /// Validate the read set and apply the buffered writes atomically.
    /// Returns the new commit version.
    fn commit(self: Box<Self>) -> StoreResult<u64>;
}

/// Drain a cursor into owned `(key, value)` pairs. Test and backup helper.
pub fn collect_prefix(
    snapshot: Arc<dyn KvSnapshot>,
    prefix: &[u8],
) -> StoreResult<Vec<(Vec<u8>, Vec<u8>)>> {
    let mut cursor = snapshot.cursor(prefix)?;
    let mut out = Vec::new();
    while cursor.valid() {
        out.push((cursor.key().to_vec(), cursor.value().to_vec()));
        cursor.next()?;
    }
    Ok(out)
}
