//! Reference management for quadgit.
//!
//! This crate provides named references (branches, tags, HEAD) that point
//! at commits. References are the human-readable entry points into history
//! and the only mutable state of a repository, analogous to git refs.
//!
//! # Architecture
//!
//! - **Branches** (`refs/heads/*`) are mutable pointers that advance as
//!   commits and merges land.
//! - **Tags** (`refs/tags/*`) are immutable. Once created, a tag cannot be
//!   moved; delete and recreate if needed.
//! - **HEAD** is the single symbolic reference. It names the current branch,
//!   or is detached at a commit.
//!
//! # Modules
//!
//! - [`error`] -- Error types for ref operations
//! - [`types`] -- Core ref types: [`Reference`], [`RefTarget`], [`Head`]
//! - [`names`] -- Branch/tag name validation
//! - [`store`] -- [`RefStore`], backed by the key-value substrate

pub mod error;
pub mod names;
pub mod store;
pub mod types;

pub use error::{RefError, Result};
pub use names::{validate_branch_name, validate_ref_name, validate_tag_name};
pub use store::{RefStore, MIN_PREFIX_LEN};
pub use types::{branch_ref, tag_ref, Head, RefTarget, Reference, BRANCH_PREFIX, HEAD, TAG_PREFIX};
