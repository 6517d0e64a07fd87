//! Key layout of a repository inside the key-value store.
//!
//! Every key of one repository lives under `ns/<namespace>/`:
//!
//! - `obj/<hex id>` -- object envelope (kind tag + canonical body)
//! - `row/<hex id>/<quad key>` -- one empty-valued row per quad of a blob
//! - `gen/<hex id>` -- generation number of a commit (8 bytes, big-endian)
//! - `ref/<name>` -- reference target
//!
//! Row keys end in the [`QuadKey`] encoding, so a prefix scan over
//! `row/<hex id>/` yields the blob's quads in canonical order.

use quadgit_types::{ObjectId, QuadKey};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Keyspace {
    namespace: String,
    root: Vec<u8>,
}

impl Keyspace {
    pub fn new(namespace: impl Into<String>) -> Self {
        let namespace = namespace.into();
        let root = format!("ns/{namespace}/").into_bytes();
        Self { namespace, root }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Prefix shared by every key of this repository.
    pub fn root(&self) -> &[u8] {
        &self.root
    }

    pub fn object(&self, id: &ObjectId) -> Vec<u8> {
        self.join(&["obj/", &id.to_hex()])
    }

    /// Prefix of all object keys whose hex id starts with `hex_prefix`.
    pub fn object_prefix(&self, hex_prefix: &str) -> Vec<u8> {
        self.join(&["obj/", hex_prefix])
    }

    /// Parse the object id back out of an object key.
    pub fn object_id_of(&self, key: &[u8]) -> Option<ObjectId> {
        let hex = key.strip_prefix(self.object_prefix("").as_slice())?;
        ObjectId::from_hex(std::str::from_utf8(hex).ok()?).ok()
    }

    /// Generation number of a commit: 1 for a root, else one more than
    /// its highest parent.
    pub fn generation(&self, commit: &ObjectId) -> Vec<u8> {
        self.join(&["gen/", &commit.to_hex()])
    }

    pub fn rows(&self, blob: &ObjectId) -> Vec<u8> {
        self.join(&["row/", &blob.to_hex(), "/"])
    }

    pub fn row(&self, blob: &ObjectId, key: &QuadKey) -> Vec<u8> {
        let mut out = self.rows(blob);
        out.extend_from_slice(key.as_bytes());
        out
    }

    pub fn reference(&self, name: &str) -> Vec<u8> {
        self.join(&["ref/", name])
    }

    pub fn reference_prefix(&self, prefix: &str) -> Vec<u8> {
        self.reference(prefix)
    }

    /// Parse the reference name back out of a reference key.
    pub fn reference_name_of(&self, key: &[u8]) -> Option<String> {
        let name = key.strip_prefix(self.reference("").as_slice())?;
        String::from_utf8(name.to_vec()).ok()
    }

    fn join(&self, parts: &[&str]) -> Vec<u8> {
        let mut out = self.root.clone();
        for part in parts {
            out.extend_from_slice(part.as_bytes());
        }
        out
    }
}

impl Default for Keyspace {
    fn default() -> Self {
        Self::new("default")
    }
}
