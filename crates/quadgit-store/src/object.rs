use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use quadgit_crypto::{CommitSigner, CommitVerifier, ContentHasher, SignatureError};
use quadgit_types::{Author, ObjectId, Quad, QuadKey};

use crate::error::{StoreError, StoreResult};

/// The kind of object stored.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectKind {
    /// A set of quads of one graph.
    Blob,
    /// Mapping from graph name to blob.
    Tree,
    /// A snapshot in history.
    Commit,
}

impl std::fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Blob => write!(f, "blob"),
            Self::Tree => write!(f, "tree"),
            Self::Commit => write!(f, "commit"),
        }
    }
}

/// A stored object envelope: kind tag + canonical body + cached size.
///
/// For trees and commits `data` is the canonical JSON body the id is
/// computed from. For blobs it is the [`BlobHeader`]; the blob's quads live
/// in separate row keys and its id is computed over them.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredObject {
    pub kind: ObjectKind,
    pub data: Vec<u8>,
    pub size: u64,
}

impl StoredObject {
    pub fn new(kind: ObjectKind, data: Vec<u8>) -> Self {
        let size = data.len() as u64;
        Self { kind, data, size }
    }

    /// Encode the envelope as the value stored under `obj/<id>`.
    pub fn encode(&self) -> StoreResult<Vec<u8>> {
        bincode::serialize(self).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    pub fn decode(id: &ObjectId, bytes: &[u8]) -> StoreResult<Self> {
        bincode::deserialize(bytes).map_err(|e| StoreError::CorruptObject {
            id: *id,
            reason: format!("undecodable envelope: {e}"),
        })
    }

    fn expect_kind(&self, id: &ObjectId, kind: ObjectKind) -> StoreResult<()> {
        if self.kind != kind {
            return Err(StoreError::CorruptObject {
                id: *id,
                reason: format!("expected {kind}, got {}", self.kind),
            });
        }
        Ok(())
    }

    /// Recompute the id of a tree or commit body and compare.
    fn verify_body(&self, id: &ObjectId) -> StoreResult<()> {
        let hasher = match self.kind {
            ObjectKind::Tree => &ContentHasher::TREE,
            ObjectKind::Commit => &ContentHasher::COMMIT,
            ObjectKind::Blob => return Ok(()),
        };
        let computed = hasher.hash(&self.data);
        if computed != *id {
            return Err(StoreError::HashMismatch { id: *id, computed });
        }
        Ok(())
    }
}

/// Decoded object, as returned by `ObjectStore::get`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Object {
    Blob(Blob),
    Tree(Tree),
    Commit(Commit),
}

impl Object {
    pub fn kind(&self) -> ObjectKind {
        match self {
            Self::Blob(_) => ObjectKind::Blob,
            Self::Tree(_) => ObjectKind::Tree,
            Self::Commit(_) => ObjectKind::Commit,
        }
    }

    pub fn id(&self) -> StoreResult<ObjectId> {
        match self {
            Self::Blob(blob) => Ok(blob.id()),
            Self::Tree(tree) => tree.id(),
            Self::Commit(commit) => commit.id(),
        }
    }
}

// ---------------------------------------------------------------------------
// Blob
// ---------------------------------------------------------------------------

/// Streaming blob id computation.
///
/// The id is the BLOB-domain hash of the concatenated [`QuadKey`]s of the
/// blob's quads in canonical order. Keys are self-delimiting, so the
/// concatenation is unambiguous.
pub struct BlobHasher {
    inner: quadgit_crypto::StreamingHasher,
    last: Option<QuadKey>,
    count: u64,
}

impl BlobHasher {
    pub fn new() -> Self {
        Self {
            inner: ContentHasher::BLOB.streaming(),
            last: None,
            count: 0,
        }
    }

    /// Feed the next key. Keys must be strictly ascending.
    pub fn push(&mut self, key: QuadKey) -> StoreResult<()> {
        if let Some(last) = &self.last {
            if key <= *last {
                return Err(StoreError::InvalidQuads(
                    "quad stream is not strictly ascending".into(),
                ));
            }
        }
        self.inner.update(key.as_bytes());
        self.last = Some(key);
        self.count += 1;
        Ok(())
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn finish(&self) -> ObjectId {
        self.inner.finalize()
    }
}

impl Default for BlobHasher {
    fn default() -> Self {
        Self::new()
    }
}

/// Metadata stored in a blob's envelope.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobHeader {
    pub graph: String,
    pub quad_count: u64,
}

/// A fully materialized quad set of one graph.
///
/// Quads are kept sorted and deduplicated. Use `ObjectStore::blob_cursor`
/// rather than materializing large graphs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Blob {
    graph: String,
    quads: Vec<Quad>,
}

impl Blob {
    /// Build a blob, sorting and deduplicating `quads`.
    ///
    /// Fails if any quad belongs to a graph other than `graph`.
    pub fn new(graph: impl Into<String>, mut quads: Vec<Quad>) -> StoreResult<Self> {
        let graph = graph.into();
        if let Some(stray) = quads.iter().find(|q| q.graph != graph) {
            return Err(StoreError::InvalidQuads(format!(
                "quad {stray:?} does not belong to graph {graph}"
            )));
        }
        quads.sort();
        quads.dedup();
        Ok(Self { graph, quads })
    }

    pub fn graph(&self) -> &str {
        &self.graph
    }

    pub fn quads(&self) -> &[Quad] {
        &self.quads
    }

    pub fn into_quads(self) -> Vec<Quad> {
        self.quads
    }

    pub fn len(&self) -> usize {
        self.quads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.quads.is_empty()
    }

    pub fn contains(&self, quad: &Quad) -> bool {
        self.quads.binary_search(quad).is_ok()
    }

    pub fn header(&self) -> BlobHeader {
        BlobHeader {
            graph: self.graph.clone(),
            quad_count: self.quads.len() as u64,
        }
    }

    pub fn id(&self) -> ObjectId {
        let mut hasher = ContentHasher::BLOB.streaming();
        for quad in &self.quads {
            hasher.update(quad.key().as_bytes());
        }
        hasher.finalize()
    }

    pub(crate) fn from_parts(graph: String, quads: Vec<Quad>) -> Self {
        Self { graph, quads }
    }
}

// ---------------------------------------------------------------------------
// Tree
// ---------------------------------------------------------------------------

/// Full snapshot of every named graph at a commit: graph name to blob id.
///
/// Graphs with no quads are absent. Backed by a `BTreeMap`, so the canonical
/// JSON body lists graphs in sorted order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tree {
    pub graphs: BTreeMap<String, ObjectId>,
}

impl Tree {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, graph: impl Into<String>, blob: ObjectId) {
        self.graphs.insert(graph.into(), blob);
    }

    pub fn remove(&mut self, graph: &str) -> Option<ObjectId> {
        self.graphs.remove(graph)
    }

    pub fn get(&self, graph: &str) -> Option<&ObjectId> {
        self.graphs.get(graph)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ObjectId)> {
        self.graphs.iter()
    }

    pub fn len(&self) -> usize {
        self.graphs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.graphs.is_empty()
    }

    pub fn to_stored_object(&self) -> StoreResult<StoredObject> {
        let data =
            serde_json::to_vec(self).map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(StoredObject::new(ObjectKind::Tree, data))
    }

    /// Decode and verify against `id`.
    pub fn from_stored_object(id: &ObjectId, obj: &StoredObject) -> StoreResult<Self> {
        obj.expect_kind(id, ObjectKind::Tree)?;
        obj.verify_body(id)?;
        serde_json::from_slice(&obj.data).map_err(|e| StoreError::CorruptObject {
            id: *id,
            reason: e.to_string(),
        })
    }

    pub fn id(&self) -> StoreResult<ObjectId> {
        Ok(ContentHasher::TREE.hash(&self.to_stored_object()?.data))
    }
}

// ---------------------------------------------------------------------------
// Commit
// ---------------------------------------------------------------------------

/// Quad counts recorded with each commit, relative to its first parent.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitStats {
    pub total_quads: u64,
    pub added: u64,
    pub deleted: u64,
}

/// An immutable node of history.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    pub tree: ObjectId,
    pub parents: Vec<ObjectId>,
    pub author: Author,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub stats: CommitStats,
    /// Hex-encoded detached signature over [`Commit::signing_payload`].
    pub signature: Option<String>,
}

impl Commit {
    pub fn is_root(&self) -> bool {
        self.parents.is_empty()
    }

    pub fn is_merge(&self) -> bool {
        self.parents.len() > 1
    }

    pub fn first_parent(&self) -> Option<&ObjectId> {
        self.parents.first()
    }

    /// Canonical body with the signature cleared. This is what gets signed.
    pub fn signing_payload(&self) -> StoreResult<Vec<u8>> {
        let unsigned = Commit {
            signature: None,
            ..self.clone()
        };
        serde_json::to_vec(&unsigned).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    /// Sign [`Commit::signing_payload`] and store the hex signature.
    pub fn sign(&mut self, signer: &dyn CommitSigner) -> StoreResult<()> {
        let signature = signer.sign(&self.signing_payload()?)?;
        self.signature = Some(hex::encode(signature));
        Ok(())
    }

    /// Check the stored signature. Unsigned commits fail with `Malformed`.
    pub fn verify_signature(&self, verifier: &dyn CommitVerifier) -> StoreResult<()> {
        let hex_sig = self
            .signature
            .as_deref()
            .ok_or_else(|| SignatureError::Malformed("commit is unsigned".into()))?;
        let bytes = hex::decode(hex_sig).map_err(|e| SignatureError::Malformed(e.to_string()))?;
        verifier.verify(&self.signing_payload()?, &bytes)?;
        Ok(())
    }

    pub fn to_stored_object(&self) -> StoreResult<StoredObject> {
        let data =
            serde_json::to_vec(self).map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(StoredObject::new(ObjectKind::Commit, data))
    }

    /// Decode and verify against `id`.
    pub fn from_stored_object(id: &ObjectId, obj: &StoredObject) -> StoreResult<Self> {
        obj.expect_kind(id, ObjectKind::Commit)?;
        obj.verify_body(id)?;
        serde_json::from_slice(&obj.data).map_err(|e| StoreError::CorruptObject {
            id: *id,
            reason: e.to_string(),
        })
    }

    pub fn id(&self) -> StoreResult<ObjectId> {
        Ok(ContentHasher::COMMIT.hash(&self.to_stored_object()?.data))
    }

    pub fn summary(&self) -> String {
        self.message.lines().next().unwrap_or_default().to_string()
    }
}

impl BlobHeader {
    pub fn to_stored_object(&self) -> StoreResult<StoredObject> {
        let data =
            serde_json::to_vec(self).map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(StoredObject::new(ObjectKind::Blob, data))
    }

    pub fn from_stored_object(id: &ObjectId, obj: &StoredObject) -> StoreResult<Self> {
        obj.expect_kind(id, ObjectKind::Blob)?;
        serde_json::from_slice(&obj.data).map_err(|e| StoreError::CorruptObject {
            id: *id,
            reason: e.to_string(),
        })
    }
}
