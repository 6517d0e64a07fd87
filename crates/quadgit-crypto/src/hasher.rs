use quadgit_types::ObjectId;

/// Domain-separated BLAKE3 content hasher.
///
/// Each hasher carries a domain tag (e.g., `"quadgit-blob-v1"`) that is
/// prepended to every hash computation. A blob and a tree with identical
/// bytes therefore never share an id.
pub struct ContentHasher {
    domain: &'static str,
}

impl ContentHasher {
    /// Hasher for quad blobs.
    pub const BLOB: Self = Self {
        domain: "quadgit-blob-v1",
    };
    /// Hasher for graph trees.
    pub const TREE: Self = Self {
        domain: "quadgit-tree-v1",
    };
    /// Hasher for commits.
    pub const COMMIT: Self = Self {
        domain: "quadgit-commit-v1",
    };

    /// Create a hasher with a custom domain tag.
    pub const fn new(domain: &'static str) -> Self {
        Self { domain }
    }

    /// Hash raw bytes with domain separation.
    pub fn hash(&self, data: &[u8]) -> ObjectId {
        let mut hasher = self.streaming();
        hasher.update(data);
        hasher.finalize()
    }

    /// Hash a serializable value as JSON with domain separation.
    pub fn hash_json<T: serde::Serialize>(&self, value: &T) -> Result<ObjectId, HasherError> {
        let data =
            serde_json::to_vec(value).map_err(|e| HasherError::Serialization(e.to_string()))?;
        Ok(self.hash(&data))
    }

    /// Start an incremental hash for content too large to buffer.
    ///
    /// Feeding the same bytes through any number of `update` calls yields the
    /// same id as [`ContentHasher::hash`] over their concatenation.
    pub fn streaming(&self) -> StreamingHasher {
        let mut inner = blake3::Hasher::new();
        inner.update(self.domain.as_bytes());
        inner.update(b":");
        StreamingHasher { inner }
    }

    /// Verify that data produces the expected object ID.
    pub fn verify(&self, data: &[u8], expected: &ObjectId) -> bool {
        self.hash(data) == *expected
    }

    /// The domain tag used by this hasher.
    pub fn domain(&self) -> &str {
        self.domain
    }
}

/// Incremental domain-separated hasher, see [`ContentHasher::streaming`].
pub struct StreamingHasher {
    inner: blake3::Hasher,
}

impl StreamingHasher {
    pub fn update(&mut self, data: &[u8]) -> &mut Self {
        self.inner.update(data);
        self
    }

    pub fn finalize(&self) -> ObjectId {
        ObjectId::from_hash(*self.inner.finalize().as_bytes())
    }
}

/// Errors from hashing operations.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum HasherError {
    #[error("serialization error: {0}")]
    Serialization(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_deterministic() {
        let id1 = ContentHasher::BLOB.hash(b"hello world");
        let id2 = ContentHasher::BLOB.hash(b"hello world");
        assert_eq!(id1, id2);
    }

    #[test]
    fn different_domains_produce_different_hashes() {
        let data = b"same content";
        let blob = ContentHasher::BLOB.hash(data);
        let tree = ContentHasher::TREE.hash(data);
        let commit = ContentHasher::COMMIT.hash(data);
        assert_ne!(blob, tree);
        assert_ne!(blob, commit);
        assert_ne!(tree, commit);
    }

    #[test]
    fn streaming_matches_one_shot() {
        let mut s = ContentHasher::BLOB.streaming();
        s.update(b"hello ").update(b"world");
        assert_eq!(s.finalize(), ContentHasher::BLOB.hash(b"hello world"));
    }

    #[test]
    fn verify_detects_tampering() {
        let id = ContentHasher::TREE.hash(b"original");
        assert!(ContentHasher::TREE.verify(b"original", &id));
        assert!(!ContentHasher::TREE.verify(b"tampered", &id));
    }

    #[test]
    fn hash_json_works() {
        let value = serde_json::json!({"graph": "ex:g", "n": 1});
        let id = ContentHasher::COMMIT.hash_json(&value).unwrap();
        assert!(!id.is_null());
        assert_eq!(ContentHasher::COMMIT.domain(), "quadgit-commit-v1");
    }
}
