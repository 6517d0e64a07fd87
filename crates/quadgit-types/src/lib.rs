//! Foundation types for quadgit.
//!
//! This crate provides the identifiers and value types shared by every other
//! quadgit crate: content-addressed object identifiers, the quad statement
//! and its order-preserving key encoding, commit authorship, and the
//! cancellation signal honored by streaming operations.
//!
//! # Key Types
//!
//! - [`ObjectId`] -- Content-addressed identifier (BLAKE3 hash)
//! - [`Quad`] -- A (subject, predicate, object, graph) statement
//! - [`QuadKey`] -- Byte encoding of a quad whose byte order equals quad order
//! - [`Author`] -- Commit author identity
//! - [`CancelToken`] -- Cooperative cancellation for lazy iterators

pub mod author;
pub mod cancel;
pub mod error;
pub mod object;
pub mod quad;

pub use author::Author;
pub use cancel::CancelToken;
pub use error::TypeError;
pub use object::ObjectId;
pub use quad::{Quad, QuadKey};
