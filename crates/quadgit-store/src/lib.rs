//! Content-addressed quad storage for quadgit.
//!
//! This crate implements a hash-keyed object store analogous to git's
//! `.git/objects/` directory, layered over an ordered key-value substrate.
//! Every blob, tree and commit is an immutable object identified by its
//! BLAKE3 hash (domain-separated by object kind).
//!
//! # Object Types
//!
//! - [`Blob`] -- sorted quad set of one named graph, stored as one row per quad
//! - [`Tree`] -- graph name to blob id, a full snapshot
//! - [`Commit`] -- tree, parents, author, message, timestamp, stats, signature
//!
//! # Storage
//!
//! - [`KvBackend`] -- the transactional ordered key-value interface
//! - [`MemoryKv`] -- multi-version in-memory backend for tests and embedding
//! - [`Keyspace`] -- namespace-prefixed key layout
//! - [`ObjectStore`] -- idempotent put, verified reads, blob cursors
//!
//! # Design Rules
//!
//! 1. Objects are immutable once written (content-addressing guarantees this).
//! 2. A duplicate write performs no key-value writes at all.
//! 3. Reads never block writers; cursors page through snapshots.
//! 4. All backend errors are propagated, never silently ignored.

pub mod error;
pub mod keyspace;
pub mod kv;
pub mod memory;
pub mod object;
pub mod store;

pub use error::{StoreError, StoreResult};
pub use keyspace::Keyspace;
pub use kv::{collect_prefix, KvBackend, KvCursor, KvSnapshot, KvTransaction};
pub use memory::MemoryKv;
pub use object::{
    Blob, BlobHasher, BlobHeader, Commit, CommitStats, Object, ObjectKind, StoredObject, Tree,
};
pub use store::{BlobCursor, ObjectStore};
