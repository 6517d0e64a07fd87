//! Diff engine for quadgit.
//!
//! Computes the quad-level difference between two snapshots without
//! materializing either side. Every blob is a sorted run of quads, so two
//! versions of a graph can be compared with a single merge-join pass.
//!
//! # Key Types
//!
//! - [`SyncWalk`] / [`Step`] -- generic merge-join over two sorted streams
//! - [`StreamDiff`] / [`Change`] -- lazy tree-to-tree diff
//! - [`DiffSummary`] -- added/deleted counts per graph

pub mod error;
pub mod stream;
pub mod sync_walk;

pub use error::{DiffError, DiffResult};
pub use stream::{
    blob_rows, diff_commits, stream_diff, Change, ChangeOp, DiffOptions, DiffSummary, QuadStream,
    StreamDiff,
};
pub use sync_walk::{Step, SyncWalk};
