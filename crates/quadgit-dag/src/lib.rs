//! Commit history traversal for quadgit.
//!
//! Commits form a directed acyclic graph through their parent lists. This
//! crate answers ancestry questions over that graph, finds merge bases,
//! produces lazy history logs, and audits the graph offline.

pub mod error;
pub mod graph;
pub mod walker;

pub use error::{DagError, DagResult};
pub use graph::{audit, AuditReport, CommitGraph};
pub use walker::{CommitLog, HistoryWalker, LogMode};
