//! Blame for quadgit graphs.
//!
//! Attributes every quad of a graph, as of some commit, to the commit that
//! introduced it. Built on the history walker for ordering and the diff
//! engine for per-commit changes.

pub mod blame;
pub mod error;

pub use blame::{Blame, BlameEngine, BlameEntry};
pub use error::{BlameError, BlameResult};
