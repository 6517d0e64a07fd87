//! High-level SDK for quadgit.
//!
//! [`Repository`] ties the object store, references, history, diff, merge
//! and blame together behind one handle. This is the main entry point for
//! applications embedding quadgit.
//!
//! ```no_run
//! use std::sync::Arc;
//! use quadgit_sdk::{Author, CommitRequest, MemoryKv, Quad, Repository, RepositoryConfig};
//!
//! let repo = Repository::init(Arc::new(MemoryKv::new()), RepositoryConfig::default())?;
//! let alice = Quad::new("ex:alice", "ex:age", "30", "ex:people");
//! repo.commit(
//!     CommitRequest::new("main", Author::new("Ada", "ada@example.org"), "add alice")
//!         .with_graph("ex:people", vec![alice]),
//! )?;
//! # Ok::<(), quadgit_sdk::SdkError>(())
//! ```

pub mod backup;
pub mod commit;
pub mod config;
pub mod error;
pub mod repository;

pub use backup::BackupManifest;
pub use commit::{CommitRequest, CommitResult, RepoMergeOutcome};
pub use config::RepositoryConfig;
pub use error::{SdkError, SdkResult};
pub use repository::{with_retry, Repository};

// Re-export key types
pub use quadgit_blame::{Blame, BlameEntry};
pub use quadgit_dag::{AuditReport, LogMode};
pub use quadgit_diff::{Change, ChangeOp, DiffOptions};
pub use quadgit_merge::{
    Conflict, ConflictKind, DeletionPolicy, GraphSchemaProvider, MergeConfig, MergeMeta,
    SchemaIndex, StaticSchema,
};
pub use quadgit_store::{Commit, CommitStats, KvBackend, MemoryKv};
pub use quadgit_types::{Author, CancelToken, ObjectId, Quad};
