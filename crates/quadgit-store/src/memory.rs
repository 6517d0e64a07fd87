//! In-memory multi-version key-value backend.
//!
//! [`MemoryKv`] keeps every committed version of every key in a `BTreeMap`
//! behind a `RwLock`. Snapshots pin a commit version and read the newest
//! value at or below it, so long-running readers never block writers and
//! never observe later commits. Cursors copy out a bounded page of entries
//! per lock acquisition.
//!
//! Every live snapshot (and every open transaction) pins its version. Versions
//! older than the oldest pin that have been superseded are unreachable and
//! are dropped: eagerly for the keys a commit writes, and for the whole map
//! by [`MemoryKv::compact`].

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::ops::Bound;
use std::sync::{Arc, RwLock};

use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::kv::{KvBackend, KvCursor, KvSnapshot, KvTransaction};

/// Default number of entries a cursor copies per lock acquisition.
pub const DEFAULT_PAGE_SIZE: usize = 256;

#[derive(Debug)]
struct Version {
    at: u64,
    value: Option<Arc<[u8]>>,
}

#[derive(Debug, Default)]
struct Inner {
    data: BTreeMap<Vec<u8>, Vec<Version>>,
    version: u64,
    writes: u64,
    /// Live snapshot versions and how many snapshots hold each.
    pins: BTreeMap<u64, usize>,
}

impl Inner {
    fn visible(&self, key: &[u8], at: u64) -> Option<Arc<[u8]>> {
        self.data.get(key).and_then(|versions| visible_in(versions, at))
    }

    fn modified_after(&self, key: &[u8], at: u64) -> bool {
        self.data
            .get(key)
            .and_then(|versions| versions.last())
            .is_some_and(|v| v.at > at)
    }

    /// Oldest version any live snapshot can read.
    fn watermark(&self) -> u64 {
        self.pins.keys().next().copied().unwrap_or(self.version)
    }

    fn pin(&mut self) -> u64 {
        let at = self.version;
        *self.pins.entry(at).or_default() += 1;
        at
    }

    fn unpin(&mut self, at: u64) {
        if let Some(count) = self.pins.get_mut(&at) {
            *count -= 1;
            if *count == 0 {
                self.pins.remove(&at);
            }
        }
    }

    /// Drop the versions of `key` no snapshot at or after `watermark` can
    /// see. Returns the number of versions removed.
    fn prune_key(&mut self, key: &[u8], watermark: u64) -> usize {
        let Some(versions) = self.data.get_mut(key) else {
            return 0;
        };
        let removed = prune_versions(versions, watermark);
        if versions.is_empty() {
            self.data.remove(key);
        }
        removed
    }
}

/// Keep the newest version at or below `watermark` and everything after it.
/// A kept deletion with nothing after it is dropped too.
fn prune_versions(versions: &mut Vec<Version>, watermark: u64) -> usize {
    let before = versions.len();
    if let Some(newest_visible) = versions.iter().rposition(|v| v.at <= watermark) {
        versions.drain(..newest_visible);
    }
    let tombstone_only = matches!(
        versions.as_slice(),
        [only] if only.value.is_none() && only.at <= watermark
    );
    if tombstone_only {
        versions.clear();
    }
    before - versions.len()
}

fn visible_in(versions: &[Version], at: u64) -> Option<Arc<[u8]>> {
    versions
        .iter()
        .rev()
        .find(|v| v.at <= at)
        .and_then(|v| v.value.clone())
}

type Shared = Arc<RwLock<Inner>>;

fn poisoned<E: std::fmt::Display>(e: E) -> StoreError {
    StoreError::Backend(format!("lock poisoned: {e}"))
}

/// Multi-version in-memory key-value store.
///
/// Memory is bounded by the live data plus the versions still visible to
/// open snapshots. A long-lived snapshot holds back pruning of every key
/// written after it.
///
/// Cheap to clone; clones share the same data.
#[derive(Clone)]
pub struct MemoryKv {
    inner: Shared,
    page_size: usize,
}

impl MemoryKv {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::with_page_size(DEFAULT_PAGE_SIZE)
    }

    /// Create a store whose cursors fetch `page_size` entries at a time.
    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner::default())),
            page_size: page_size.max(1),
        }
    }

    /// Latest committed version.
    pub fn version(&self) -> StoreResult<u64> {
        Ok(self.inner.read().map_err(poisoned)?.version)
    }

    /// Total number of key writes applied by committed transactions.
    pub fn write_count(&self) -> StoreResult<u64> {
        Ok(self.inner.read().map_err(poisoned)?.writes)
    }

    /// Number of keys with a live value at the latest version.
    pub fn live_keys(&self) -> StoreResult<usize> {
        let inner = self.inner.read().map_err(poisoned)?;
        let at = inner.version;
        Ok(inner
            .data
            .values()
            .filter(|versions| visible_in(versions, at).is_some())
            .count())
    }

    /// Number of versions held across all keys, deletions included.
    pub fn stored_versions(&self) -> StoreResult<usize> {
        let inner = self.inner.read().map_err(poisoned)?;
        Ok(inner.data.values().map(Vec::len).sum())
    }

    /// Drop every version no live snapshot can read. Returns how many were
    /// removed.
    pub fn compact(&self) -> StoreResult<usize> {
        let mut inner = self.inner.write().map_err(poisoned)?;
        let watermark = inner.watermark();
        let mut removed = 0;
        inner.data.retain(|_, versions| {
            removed += prune_versions(versions, watermark);
            !versions.is_empty()
        });
        debug!(watermark, removed, "compacted versions");
        Ok(removed)
    }

    fn pinned_snapshot(&self) -> StoreResult<Arc<MemorySnapshot>> {
        let version = self.inner.write().map_err(poisoned)?.pin();
        Ok(Arc::new(MemorySnapshot {
            inner: Arc::clone(&self.inner),
            version,
            page_size: self.page_size,
        }))
    }
}

impl Default for MemoryKv {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryKv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let version = self.version().ok();
        f.debug_struct("MemoryKv")
            .field("version", &version)
            .field("page_size", &self.page_size)
            .finish()
    }
}

impl KvBackend for MemoryKv {
    fn snapshot(&self) -> StoreResult<Arc<dyn KvSnapshot>> {
        Ok(self.pinned_snapshot()?)
    }

    fn begin(&self) -> StoreResult<Box<dyn KvTransaction>> {
        Ok(Box::new(MemoryTransaction {
            snapshot: self.pinned_snapshot()?,
            reads: BTreeSet::new(),
            writes: BTreeMap::new(),
        }))
    }
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

struct MemorySnapshot {
    inner: Shared,
    version: u64,
    page_size: usize,
}

impl KvSnapshot for MemorySnapshot {
    fn version(&self) -> u64 {
        self.version
    }

    fn get(&self, key: &[u8]) -> StoreResult<Option<Vec<u8>>> {
        let inner = self.inner.read().map_err(poisoned)?;
        Ok(inner.visible(key, self.version).map(|v| v.to_vec()))
    }

    fn cursor(self: Arc<Self>, prefix: &[u8]) -> StoreResult<Box<dyn KvCursor>> {
        let mut cursor = MemoryCursor {
            snapshot: self,
            prefix: prefix.to_vec(),
            page: VecDeque::new(),
            current: None,
            resume: Bound::Included(prefix.to_vec()),
            exhausted: false,
        };
        cursor.advance()?;
        Ok(Box::new(cursor))
    }
}

impl Drop for MemorySnapshot {
    fn drop(&mut self) {
        // A poisoned lock only delays pruning.
        if let Ok(mut inner) = self.inner.write() {
            inner.unpin(self.version);
        }
    }
}

// ---------------------------------------------------------------------------
// Cursor
// ---------------------------------------------------------------------------

struct MemoryCursor {
    snapshot: Arc<MemorySnapshot>,
    prefix: Vec<u8>,
    page: VecDeque<(Vec<u8>, Arc<[u8]>)>,
    current: Option<(Vec<u8>, Arc<[u8]>)>,
    resume: Bound<Vec<u8>>,
    exhausted: bool,
}

impl MemoryCursor {
    fn refill(&mut self) -> StoreResult<()> {
        let inner = self.snapshot.inner.read().map_err(poisoned)?;
        let range = inner
            .data
            .range::<Vec<u8>, _>((self.resume.clone(), Bound::Unbounded));
        let mut last = None;
        let mut reached_end = true;
        for (key, versions) in range {
            if !key.starts_with(&self.prefix) {
                break;
            }
            last = Some(key.clone());
            if let Some(value) = visible_in(versions, self.snapshot.version) {
                self.page.push_back((key.clone(), value));
                if self.page.len() >= self.snapshot.page_size {
                    reached_end = false;
                    break;
                }
            }
        }
        match last {
            Some(key) => self.resume = Bound::Excluded(key),
            None => reached_end = true,
        }
        self.exhausted = reached_end;
        Ok(())
    }

    fn advance(&mut self) -> StoreResult<()> {
        if self.page.is_empty() && !self.exhausted {
            self.refill()?;
        }
        self.current = self.page.pop_front();
        Ok(())
    }
}

impl KvCursor for MemoryCursor {
    fn seek(&mut self, key: &[u8]) -> StoreResult<()> {
        let start = if key < self.prefix.as_slice() {
            self.prefix.clone()
        } else {
            key.to_vec()
        };
        self.page.clear();
        self.resume = Bound::Included(start);
        self.exhausted = false;
        self.advance()
    }

    fn valid(&self) -> bool {
        self.current.is_some()
    }

    fn key(&self) -> &[u8] {
        self.current.as_ref().map(|(k, _)| k.as_slice()).unwrap_or(&[])
    }

    fn value(&self) -> &[u8] {
        self.current.as_ref().map(|(_, v)| &v[..]).unwrap_or(&[])
    }

    fn next(&mut self) -> StoreResult<()> {
        self.advance()
    }
}

// ---------------------------------------------------------------------------
// Transaction
// ---------------------------------------------------------------------------

struct MemoryTransaction {
    snapshot: Arc<MemorySnapshot>,
    reads: BTreeSet<Vec<u8>>,
    writes: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
}

impl KvTransaction for MemoryTransaction {
    fn get(&mut self, key: &[u8]) -> StoreResult<Option<Vec<u8>>> {
        self.reads.insert(key.to_vec());
        self.peek(key)
    }

    fn peek(&self, key: &[u8]) -> StoreResult<Option<Vec<u8>>> {
        if let Some(pending) = self.writes.get(key) {
            return Ok(pending.clone());
        }
        self.snapshot.get(key)
    }

    fn set(&mut self, key: &[u8], value: &[u8]) {
        self.writes.insert(key.to_vec(), Some(value.to_vec()));
    }

    fn delete(&mut self, key: &[u8]) {
        self.writes.insert(key.to_vec(), None);
    }

    fn snapshot(&self) -> Arc<dyn KvSnapshot> {
        Arc::clone(&self.snapshot) as Arc<dyn KvSnapshot>
    }

    fn pending(&self) -> usize {
        self.writes.len()
    }

    fn commit(self: Box<Self>) -> StoreResult<u64> {
        let MemoryTransaction {
            snapshot,
            reads,
            writes,
        } = *self;
        let shared = Arc::clone(&snapshot.inner);
        let mut inner = shared.write().map_err(poisoned)?;
        if let Some(key) = reads
            .iter()
            .find(|key| inner.modified_after(key, snapshot.version))
        {
            debug!(
                key = %String::from_utf8_lossy(key),
                snapshot = snapshot.version,
                "transaction conflict"
            );
            return Err(StoreError::TransactionConflict);
        }
        if writes.is_empty() {
            return Ok(inner.version);
        }

        inner.version += 1;
        let at = inner.version;
        let count = writes.len() as u64;
        let mut written = Vec::with_capacity(writes.len());
        for (key, value) in writes {
            inner.data.entry(key.clone()).or_default().push(Version {
                at,
                value: value.map(Arc::from),
            });
            written.push(key);
        }
        inner.writes += count;
        debug!(version = at, writes = count, "committed transaction");

        // Release this transaction's pin, then prune what it overwrote.
        drop(inner);
        drop(snapshot);
        if let Ok(mut inner) = shared.write() {
            let watermark = inner.watermark();
            let pruned: usize = written
                .iter()
                .map(|key| inner.prune_key(key, watermark))
                .sum();
            if pruned > 0 {
                debug!(watermark, pruned, "pruned superseded versions");
            }
        }
        Ok(at)
    }
}
