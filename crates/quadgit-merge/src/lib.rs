//! Schema-aware three-way merge for quadgit.
//!
//! [`MergeEngine`] reconciles two commits against their merge base. Changes
//! are compared quad by quad and slot by slot; with a [`SchemaProvider`]
//! the combined result is also validated against functional properties,
//! cardinality bounds and disjoint classes. Irreconcilable changes come
//! back as [`Conflict`] values rather than errors.
//!
//! # Key Types
//!
//! - [`MergeEngine`] / [`MergeOutcome`] -- the merge itself
//! - [`MergeConfig`] / [`DeletionPolicy`] -- behaviour knobs
//! - [`Conflict`] -- direct quad, value and schema violation conflicts
//! - [`SchemaIndex`] / [`SchemaProvider`] -- constraint sets for validation

pub mod config;
pub mod conflict;
pub mod engine;
pub mod error;
pub mod schema;

pub use config::{DeletionPolicy, MergeConfig};
pub use conflict::{Conflict, ConflictKind, MergeSide, SchemaViolationKind};
pub use engine::{MergeEngine, MergeMeta, MergeOutcome};
pub use error::{MergeError, MergeResult};
pub use schema::{
    is_type_predicate, CardinalityKind, GraphSchemaProvider, SchemaIndex, SchemaProvider,
    SchemaSource, StaticSchema, OWL_NS, RDF_NS, RDF_TYPE, TYPE_PREDICATES,
};
