use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use quadgit_crypto::CommitSigner;
use quadgit_merge::Conflict;
use quadgit_store::CommitStats;
use quadgit_types::{Author, ObjectId, Quad};

/// A commit to be made on top of a branch.
///
/// Each graph listed in `graphs` replaces that graph's content; an empty
/// list removes the graph. Graphs not listed are carried over unchanged.
#[derive(Clone)]
pub struct CommitRequest {
    pub branch: String,
    pub author: Author,
    pub message: String,
    pub graphs: BTreeMap<String, Vec<Quad>>,
    pub timestamp: Option<DateTime<Utc>>,
    pub signer: Option<Arc<dyn CommitSigner>>,
}

impl CommitRequest {
    pub fn new(branch: impl Into<String>, author: Author, message: impl Into<String>) -> Self {
        Self {
            branch: branch.into(),
            author,
            message: message.into(),
            graphs: BTreeMap::new(),
            timestamp: None,
            signer: None,
        }
    }

    pub fn with_graph(mut self, graph: impl Into<String>, quads: Vec<Quad>) -> Self {
        self.graphs.insert(graph.into(), quads);
        self
    }

    pub fn delete_graph(self, graph: impl Into<String>) -> Self {
        self.with_graph(graph, Vec::new())
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn with_signer(mut self, signer: Arc<dyn CommitSigner>) -> Self {
        self.signer = Some(signer);
        self
    }
}

impl fmt::Debug for CommitRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommitRequest")
            .field("branch", &self.branch)
            .field("author", &self.author)
            .field("message", &self.message)
            .field("graphs", &self.graphs.keys().collect::<Vec<_>>())
            .field("signed", &self.signer.is_some())
            .finish()
    }
}

/// Result of a commit or revert.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitResult {
    pub commit: ObjectId,
    pub tree: ObjectId,
    pub stats: CommitStats,
}

/// Result of merging into a branch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RepoMergeOutcome {
    /// The source is already part of the branch's history.
    AlreadyUpToDate { head: ObjectId },
    /// The branch now points at a new merge commit.
    Merged {
        commit: ObjectId,
        tree: ObjectId,
        stats: CommitStats,
    },
    /// Nothing changed.
    Conflicted(Vec<Conflict>),
}

impl RepoMergeOutcome {
    pub fn conflicts(&self) -> &[Conflict] {
        match self {
            Self::Conflicted(conflicts) => conflicts,
            _ => &[],
        }
    }
}
