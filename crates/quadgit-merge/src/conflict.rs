//! Merge conflicts.
//!
//! A conflict is data, not an error: it describes one place where the two
//! sides of a merge cannot be reconciled automatically. Every variant names
//! its graph and carries enough context to be resolved by hand.

use std::fmt;

use serde::{Deserialize, Serialize};

use quadgit_types::Quad;

/// One side of a merge.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeSide {
    /// The branch being merged into.
    Target,
    /// The commit being merged.
    Source,
}

impl MergeSide {
    pub fn other(self) -> Self {
        match self {
            Self::Target => Self::Source,
            Self::Source => Self::Target,
        }
    }
}

impl fmt::Display for MergeSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Target => write!(f, "target"),
            Self::Source => write!(f, "source"),
        }
    }
}

/// Which schema constraint a merged state would break.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaViolationKind {
    /// More than one value for an `owl:FunctionalProperty`.
    FunctionalProperty,
    /// More values than an `owl:maxCardinality` bound allows.
    MaxCardinality { max: u64 },
    /// The subject would be typed with two disjoint classes.
    DisjointClasses { with: String },
}

/// Discriminant of a [`Conflict`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConflictKind {
    DirectQuad,
    Value,
    SchemaViolation,
}

impl fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DirectQuad => write!(f, "direct_quad"),
            Self::Value => write!(f, "value"),
            Self::SchemaViolation => write!(f, "schema_violation"),
        }
    }
}

/// A structured, non-fatal merge outcome requiring external resolution.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Conflict {
    /// One side deleted `quad` while the other still holds it.
    DirectQuad { quad: Quad, deleted_by: MergeSide },

    /// Both sides set different values for the same subject and predicate.
    Value {
        graph: String,
        subject: String,
        predicate: String,
        base_values: Vec<String>,
        target_values: Vec<String>,
        source_values: Vec<String>,
    },

    /// The combined changes break a schema constraint neither side broke
    /// on its own. `constraint` is the predicate for cardinality
    /// violations and the class for disjointness.
    SchemaViolation {
        violation: SchemaViolationKind,
        graph: String,
        subject: String,
        constraint: String,
        target_values: Vec<String>,
        source_values: Vec<String>,
    },
}

impl Conflict {
    pub fn kind(&self) -> ConflictKind {
        match self {
            Self::DirectQuad { .. } => ConflictKind::DirectQuad,
            Self::Value { .. } => ConflictKind::Value,
            Self::SchemaViolation { .. } => ConflictKind::SchemaViolation,
        }
    }

    pub fn graph(&self) -> &str {
        match self {
            Self::DirectQuad { quad, .. } => &quad.graph,
            Self::Value { graph, .. } | Self::SchemaViolation { graph, .. } => graph,
        }
    }
}

impl fmt::Display for Conflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DirectQuad { quad, deleted_by } => write!(
                f,
                "{quad} deleted by {deleted_by} but kept by {}",
                deleted_by.other()
            ),
            Self::Value {
                graph,
                subject,
                predicate,
                target_values,
                source_values,
                ..
            } => write!(
                f,
                "{subject} {predicate} in {graph}: target set {target_values:?}, source set {source_values:?}"
            ),
            Self::SchemaViolation {
                violation,
                graph,
                subject,
                constraint,
                ..
            } => match violation {
                SchemaViolationKind::FunctionalProperty => write!(
                    f,
                    "{subject} would have several values for functional property {constraint} in {graph}"
                ),
                SchemaViolationKind::MaxCardinality { max } => write!(
                    f,
                    "{subject} would exceed {max} values of {constraint} in {graph}"
                ),
                SchemaViolationKind::DisjointClasses { with } => write!(
                    f,
                    "{subject} would be both {constraint} and disjoint class {with} in {graph}"
                ),
            },
        }
    }
}
