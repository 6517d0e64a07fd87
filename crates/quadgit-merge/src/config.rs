use serde::{Deserialize, Serialize};

/// How a deletion on one side interacts with the other side.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeletionPolicy {
    /// A quad deleted on one side conflicts when the other side changed
    /// the same graph and still holds that quad.
    #[default]
    Strict,
    /// One-sided deletions apply cleanly, as in a textual three-way merge.
    ThreeWay,
}

/// Configuration for the merge engine.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeConfig {
    /// Deletion handling.
    pub deletion_policy: DeletionPolicy,
    /// Graph holding the repository's own schema axioms. When set, it is
    /// reconciled before any data graph and defines the schema version used
    /// for validation.
    pub schema_graph: Option<String>,
}

impl MergeConfig {
    /// Reconcile `graph` first and validate data against it.
    pub fn with_schema_graph(mut self, graph: impl Into<String>) -> Self {
        self.schema_graph = Some(graph.into());
        self
    }

    pub fn with_deletion_policy(mut self, policy: DeletionPolicy) -> Self {
        self.deletion_policy = policy;
        self
    }
}
