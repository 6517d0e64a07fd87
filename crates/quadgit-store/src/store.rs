use std::sync::Arc;

use tracing::debug;

use quadgit_types::{ObjectId, Quad, QuadKey};

use crate::error::{StoreError, StoreResult};
use crate::keyspace::Keyspace;
use crate::kv::{KvBackend, KvCursor, KvSnapshot, KvTransaction};
use crate::object::{
    Blob, BlobHasher, BlobHeader, Commit, Object, ObjectKind, StoredObject, Tree,
};

/// Content-addressed object store over a [`KvBackend`].
///
/// Invariants:
/// - Objects are immutable once written. The same content always produces
///   the same id, so a second write of it is a no-op with no KV writes.
/// - Trees and commits are verified against their id on every read.
/// - Reads use a fresh snapshot. Objects never change, so any snapshot that
///   contains an object sees the same bytes.
///
/// Cheap to clone.
#[derive(Clone)]
pub struct ObjectStore {
    backend: Arc<dyn KvBackend>,
    keys: Keyspace,
}

impl ObjectStore {
    pub fn new(backend: Arc<dyn KvBackend>, keys: Keyspace) -> Self {
        Self { backend, keys }
    }

    pub fn backend(&self) -> &Arc<dyn KvBackend> {
        &self.backend
    }

    pub fn keyspace(&self) -> &Keyspace {
        &self.keys
    }

    // ---- Writes ----

    /// Store an object in its own transaction and return its id.
    ///
    /// Idempotent: if the object already exists nothing is written.
    pub fn put(&self, object: &Object) -> StoreResult<ObjectId> {
        let mut txn = self.backend.begin()?;
        let id = self.put_in(txn.as_mut(), object)?;
        txn.commit()?;
        Ok(id)
    }

    /// Stage an object inside a caller's transaction.
    pub fn put_in(&self, txn: &mut dyn KvTransaction, object: &Object) -> StoreResult<ObjectId> {
        match object {
            Object::Blob(blob) => {
                let id = blob.id();
                if !blob.is_empty() && !self.exists_in(txn, &id)? {
                    self.write_rows(txn, &id, blob.quads().iter().map(Quad::key))?;
                    self.write_envelope(txn, &id, &blob.header().to_stored_object()?)?;
                }
                Ok(id)
            }
            Object::Tree(tree) => self.put_body(txn, tree.to_stored_object()?),
            Object::Commit(commit) => {
                let stored = commit.to_stored_object()?;
                let id = quadgit_crypto::ContentHasher::COMMIT.hash(&stored.data);
                if self.exists_in(txn, &id)? {
                    return Ok(id);
                }
                let mut generation = 0;
                for parent in &commit.parents {
                    if !self.exists_in(txn, parent)? {
                        return Err(StoreError::NotFound(*parent));
                    }
                    generation = generation.max(self.generation_in(txn, parent)?);
                }
                self.write_envelope(txn, &id, &stored)?;
                txn.set(&self.keys.generation(&id), &(generation + 1).to_be_bytes());
                Ok(id)
            }
        }
    }

    /// Write a graph's quads as a blob. Returns `None` for an empty set,
    /// since empty graphs are absent from trees.
    pub fn write_graph(
        &self,
        txn: &mut dyn KvTransaction,
        graph: &str,
        quads: Vec<Quad>,
    ) -> StoreResult<Option<ObjectId>> {
        let blob = Blob::new(graph, quads)?;
        if blob.is_empty() {
            return Ok(None);
        }
        self.put_in(txn, &Object::Blob(blob)).map(Some)
    }

    /// Write a blob from a sorted quad stream without materializing it.
    ///
    /// `source` is called up to twice: once to hash, and once more to write
    /// rows if the blob is new. Both calls must yield the same strictly
    /// ascending sequence of quads of `graph`. Returns `None` if the stream
    /// is empty.
    pub fn write_blob_from<F, I>(
        &self,
        txn: &mut dyn KvTransaction,
        graph: &str,
        mut source: F,
    ) -> StoreResult<Option<ObjectId>>
    where
        F: FnMut() -> StoreResult<I>,
        I: Iterator<Item = StoreResult<Quad>>,
    {
        let mut hasher = BlobHasher::new();
        for quad in source()? {
            let quad = quad?;
            if quad.graph != graph {
                return Err(StoreError::InvalidQuads(format!(
                    "quad {quad:?} does not belong to graph {graph}"
                )));
            }
            hasher.push(quad.key())?;
        }
        if hasher.count() == 0 {
            return Ok(None);
        }
        let id = hasher.finish();
        if self.exists_in(txn, &id)? {
            return Ok(Some(id));
        }

        for quad in source()? {
            txn.set(&self.keys.row(&id, &quad?.key()), &[]);
        }
        let header = BlobHeader {
            graph: graph.to_string(),
            quad_count: hasher.count(),
        };
        self.write_envelope(txn, &id, &header.to_stored_object()?)?;
        Ok(Some(id))
    }

    fn put_body(&self, txn: &mut dyn KvTransaction, stored: StoredObject) -> StoreResult<ObjectId> {
        let id = match stored.kind {
            ObjectKind::Tree => quadgit_crypto::ContentHasher::TREE.hash(&stored.data),
            ObjectKind::Commit => quadgit_crypto::ContentHasher::COMMIT.hash(&stored.data),
            ObjectKind::Blob => {
                return Err(StoreError::InvalidQuads(
                    "blob bodies are written from quads".into(),
                ))
            }
        };
        if !self.exists_in(txn, &id)? {
            self.write_envelope(txn, &id, &stored)?;
        }
        Ok(id)
    }

    fn write_rows(
        &self,
        txn: &mut dyn KvTransaction,
        id: &ObjectId,
        keys: impl Iterator<Item = QuadKey>,
    ) -> StoreResult<()> {
        for key in keys {
            txn.set(&self.keys.row(id, &key), &[]);
        }
        Ok(())
    }

    fn write_envelope(
        &self,
        txn: &mut dyn KvTransaction,
        id: &ObjectId,
        stored: &StoredObject,
    ) -> StoreResult<()> {
        txn.set(&self.keys.object(id), &stored.encode()?);
        debug!(object = %id.short_hex(), kind = %stored.kind, size = stored.size, "stored object");
        Ok(())
    }

    /// Whether `id` exists, as seen by `txn` (including its own writes).
    pub fn exists_in(&self, txn: &dyn KvTransaction, id: &ObjectId) -> StoreResult<bool> {
        Ok(txn.peek(&self.keys.object(id))?.is_some())
    }

    /// Generation number of commit `id` as seen by `txn`.
    pub fn generation_in(&self, txn: &dyn KvTransaction, id: &ObjectId) -> StoreResult<u64> {
        let bytes = txn.peek(&self.keys.generation(id))?;
        self.decode_generation(id, bytes, || self.exists_in(txn, id))
    }

    fn decode_generation(
        &self,
        id: &ObjectId,
        bytes: Option<Vec<u8>>,
        exists: impl FnOnce() -> StoreResult<bool>,
    ) -> StoreResult<u64> {
        match bytes {
            Some(bytes) => <[u8; 8]>::try_from(bytes.as_slice())
                .map(u64::from_be_bytes)
                .map_err(|_| StoreError::CorruptObject {
                    id: *id,
                    reason: format!("generation record of {} bytes", bytes.len()),
                }),
            None if exists()? => Err(StoreError::CorruptObject {
                id: *id,
                reason: "no generation record".into(),
            }),
            None => Err(StoreError::NotFound(*id)),
        }
    }

    /// Kind of `id` as seen by `txn`, or `None` if absent.
    pub fn kind_in(
        &self,
        txn: &dyn KvTransaction,
        id: &ObjectId,
    ) -> StoreResult<Option<ObjectKind>> {
        match txn.peek(&self.keys.object(id))? {
            Some(bytes) => Ok(Some(StoredObject::decode(id, &bytes)?.kind)),
            None => Ok(None),
        }
    }

    // ---- Reads ----

    pub fn contains(&self, id: &ObjectId) -> StoreResult<bool> {
        Ok(self.backend.snapshot()?.get(&self.keys.object(id))?.is_some())
    }

    /// Generation number of commit `id`: 1 for a root commit, else one more
    /// than its highest parent. A commit's descendants all have a higher
    /// generation.
    pub fn generation(&self, id: &ObjectId) -> StoreResult<u64> {
        let snapshot = self.backend.snapshot()?;
        let bytes = snapshot.get(&self.keys.generation(id))?;
        self.decode_generation(id, bytes, || {
            Ok(snapshot.get(&self.keys.object(id))?.is_some())
        })
    }

    /// Read and decode the envelope of `id`.
    pub fn read_stored(&self, id: &ObjectId) -> StoreResult<StoredObject> {
        let bytes = self
            .backend
            .snapshot()?
            .get(&self.keys.object(id))?
            .ok_or(StoreError::NotFound(*id))?;
        StoredObject::decode(id, &bytes)
    }

    pub fn kind_of(&self, id: &ObjectId) -> StoreResult<ObjectKind> {
        Ok(self.read_stored(id)?.kind)
    }

    /// Read any object. Blobs are materialized in full.
    pub fn get(&self, id: &ObjectId) -> StoreResult<Object> {
        let stored = self.read_stored(id)?;
        match stored.kind {
            ObjectKind::Tree => Ok(Object::Tree(Tree::from_stored_object(id, &stored)?)),
            ObjectKind::Commit => Ok(Object::Commit(Commit::from_stored_object(id, &stored)?)),
            ObjectKind::Blob => {
                let header = BlobHeader::from_stored_object(id, &stored)?;
                let quads = self.blob_cursor(id)?.collect::<StoreResult<Vec<_>>>()?;
                Ok(Object::Blob(Blob::from_parts(header.graph, quads)))
            }
        }
    }

    pub fn read_tree(&self, id: &ObjectId) -> StoreResult<Tree> {
        Tree::from_stored_object(id, &self.read_stored(id)?)
    }

    pub fn read_commit(&self, id: &ObjectId) -> StoreResult<Commit> {
        Commit::from_stored_object(id, &self.read_stored(id)?)
    }

    pub fn read_blob_header(&self, id: &ObjectId) -> StoreResult<BlobHeader> {
        BlobHeader::from_stored_object(id, &self.read_stored(id)?)
    }

    /// Tree of a commit, or the empty tree for `None`.
    pub fn commit_tree(&self, commit: Option<&ObjectId>) -> StoreResult<Tree> {
        match commit {
            Some(id) => {
                let commit = self.read_commit(id)?;
                self.read_tree(&commit.tree)
            }
            None => Ok(Tree::empty()),
        }
    }

    /// Lazy cursor over a blob's quads in canonical order.
    pub fn blob_cursor(&self, id: &ObjectId) -> StoreResult<BlobCursor> {
        let snapshot = self.backend.snapshot()?;
        if snapshot.get(&self.keys.object(id))?.is_none() {
            return Err(StoreError::NotFound(*id));
        }
        let prefix = self.keys.rows(id);
        let cursor = snapshot.cursor(&prefix)?;
        Ok(BlobCursor {
            cursor,
            prefix,
            blob: *id,
        })
    }

    /// Point lookup of one quad in a blob.
    pub fn blob_contains(&self, id: &ObjectId, quad: &Quad) -> StoreResult<bool> {
        let key = self.keys.row(id, &quad.key());
        Ok(self.backend.snapshot()?.get(&key)?.is_some())
    }

    /// Objects of every quad in blob `id` with this subject and predicate,
    /// in canonical order, stopping after `limit` values.
    pub fn slot_objects(
        &self,
        id: &ObjectId,
        subject: &str,
        predicate: &str,
        limit: usize,
    ) -> StoreResult<Vec<String>> {
        let mut cursor = self.blob_cursor(id)?;
        cursor.seek_slot(subject, predicate)?;
        let mut out = Vec::new();
        while out.len() < limit {
            match cursor.next() {
                Some(quad) => {
                    let quad = quad?;
                    if quad.subject != subject || quad.predicate != predicate {
                        break;
                    }
                    out.push(quad.object);
                }
                None => break,
            }
        }
        Ok(out)
    }

    /// Rescan a blob's rows and recompute its id.
    pub fn verify_blob(&self, id: &ObjectId) -> StoreResult<BlobHeader> {
        let header = self.read_blob_header(id)?;
        let mut hasher = BlobHasher::new();
        for quad in self.blob_cursor(id)? {
            let quad = quad?;
            if quad.graph != header.graph {
                return Err(StoreError::CorruptObject {
                    id: *id,
                    reason: format!("row {quad:?} outside graph {}", header.graph),
                });
            }
            hasher.push(quad.key())?;
        }
        let computed = hasher.finish();
        if computed != *id {
            return Err(StoreError::HashMismatch { id: *id, computed });
        }
        if hasher.count() != header.quad_count {
            return Err(StoreError::CorruptObject {
                id: *id,
                reason: format!(
                    "header records {} quads, found {}",
                    header.quad_count,
                    hasher.count()
                ),
            });
        }
        Ok(header)
    }

    /// Object ids whose hex form starts with `hex_prefix`, with their kinds.
    pub fn ids_with_prefix(&self, hex_prefix: &str) -> StoreResult<Vec<(ObjectId, ObjectKind)>> {
        let prefix = self.keys.object_prefix(&hex_prefix.to_ascii_lowercase());
        let mut cursor = self.backend.snapshot()?.cursor(&prefix)?;
        let mut out = Vec::new();
        while cursor.valid() {
            if let Some(id) = self.keys.object_id_of(cursor.key()) {
                out.push((id, StoredObject::decode(&id, cursor.value())?.kind));
            }
            cursor.next()?;
        }
        Ok(out)
    }

    /// Enumerate every object in the repository.
    pub fn objects(&self) -> StoreResult<Vec<(ObjectId, ObjectKind)>> {
        self.ids_with_prefix("")
    }
}

impl std::fmt::Debug for ObjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectStore")
            .field("namespace", &self.keys.namespace())
            .finish()
    }
}

/// Lazy, single-pass cursor over the quads of one blob.
pub struct BlobCursor {
    cursor: Box<dyn KvCursor>,
    prefix: Vec<u8>,
    blob: ObjectId,
}

impl BlobCursor {
    /// Reposition at the first quad with this subject and predicate, or the
    /// first quad after where it would be.
    pub fn seek_slot(&mut self, subject: &str, predicate: &str) -> StoreResult<()> {
        let mut key = self.prefix.clone();
        key.extend_from_slice(&QuadKey::slot_prefix(subject, predicate));
        self.cursor.seek(&key)
    }

    /// Reposition at `quad` or the first quad after it.
    pub fn seek(&mut self, quad: &Quad) -> StoreResult<()> {
        let mut key = self.prefix.clone();
        key.extend_from_slice(quad.key().as_bytes());
        self.cursor.seek(&key)
    }

    pub fn blob(&self) -> &ObjectId {
        &self.blob
    }
}

impl Iterator for BlobCursor {
    type Item = StoreResult<Quad>;

    fn next(&mut self) -> Option<Self::Item> {
        if !self.cursor.valid() {
            return None;
        }
        let decoded = self
            .cursor
            .key()
            .strip_prefix(self.prefix.as_slice())
            .ok_or_else(|| StoreError::CorruptObject {
                id: self.blob,
                reason: "row key outside blob prefix".into(),
            })
            .and_then(|raw| QuadKey::decode(raw).map_err(StoreError::from));
        if let Err(e) = self.cursor.next() {
            return Some(Err(e));
        }
        Some(decoded)
    }
}
