//! Attribution of each quad in a graph to the commit that introduced it.
//!
//! History is walked newest first in topological order. At every commit the
//! graph is diffed against the commit's first parent; an added quad still
//! awaiting attribution is credited to the commit unless another parent
//! already holds it. The first credit wins, so each quad lands on the
//! closest commit that introduced it.

use std::collections::{BTreeSet, VecDeque};

use serde::{Deserialize, Serialize};
use tracing::debug;

use quadgit_dag::{CommitLog, HistoryWalker, LogMode};
use quadgit_diff::{blob_rows, stream_diff, DiffOptions};
use quadgit_store::{Commit, ObjectStore, StoreResult};
use quadgit_types::{CancelToken, ObjectId, Quad};

use crate::error::{BlameError, BlameResult};

/// One attributed quad.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlameEntry {
    pub quad: Quad,
    pub commit_id: ObjectId,
    pub commit: Commit,
}

/// Entry point for blame queries.
#[derive(Clone, Debug)]
pub struct BlameEngine {
    store: ObjectStore,
    cancel: CancelToken,
}

impl BlameEngine {
    pub fn new(store: ObjectStore) -> Self {
        Self {
            store,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    /// Attribute every quad of `graph` as of commit `at`.
    ///
    /// The graph's content at `at` is read up front; history is read lazily
    /// as the returned iterator advances.
    pub fn blame(&self, graph: &str, at: &ObjectId) -> BlameResult<Blame> {
        let log = HistoryWalker::new(self.store.clone())
            .with_cancel(self.cancel.clone())
            .log(at, None, LogMode::AllParents)?;
        let tree = self.store.commit_tree(Some(at))?;
        let remaining = blob_rows(&self.store, tree.get(graph))?.collect::<StoreResult<BTreeSet<_>>>()?;
        debug!(graph, at = %at.short_hex(), quads = remaining.len(), "blaming graph");
        Ok(Blame {
            store: self.store.clone(),
            graph: graph.to_string(),
            cancel: self.cancel.clone(),
            log,
            remaining,
            ready: VecDeque::new(),
            last_root: None,
            done: false,
        })
    }
}

/// Lazy, finite, single-pass sequence of [`BlameEntry`]s.
///
/// Entries for one commit come out together, in canonical quad order.
pub struct Blame {
    store: ObjectStore,
    graph: String,
    cancel: CancelToken,
    log: CommitLog,
    remaining: BTreeSet<Quad>,
    ready: VecDeque<BlameEntry>,
    last_root: Option<(ObjectId, Commit)>,
    done: bool,
}

impl Blame {
    /// Number of quads not yet attributed.
    pub fn unattributed(&self) -> usize {
        self.remaining.len()
    }

    fn advance(&mut self) -> BlameResult<Option<BlameEntry>> {
        loop {
            if self.cancel.is_cancelled() {
                return Err(BlameError::Cancelled);
            }
            if let Some(entry) = self.ready.pop_front() {
                return Ok(Some(entry));
            }
            if self.remaining.is_empty() {
                return Ok(None);
            }
            match self.log.next() {
                Some(entry) => {
                    let (id, commit) = entry?;
                    self.attribute(id, commit)?;
                }
                None => {
                    let Some((id, commit)) = self.last_root.take() else {
                        return Ok(None);
                    };
                    let leftovers = std::mem::take(&mut self.remaining);
                    debug!(root = %id.short_hex(), quads = leftovers.len(), "attributing leftovers to root");
                    self.ready
                        .extend(leftovers.into_iter().map(|quad| BlameEntry {
                            quad,
                            commit_id: id,
                            commit: commit.clone(),
                        }));
                }
            }
        }
    }

    fn graph_blob(&self, commit: &ObjectId) -> StoreResult<Option<ObjectId>> {
        Ok(self.store.commit_tree(Some(commit))?.get(&self.graph).copied())
    }

    fn attribute(&mut self, id: ObjectId, commit: Commit) -> BlameResult<()> {
        if commit.is_root() {
            self.last_root = Some((id, commit.clone()));
        }
        let tree = self.store.read_tree(&commit.tree)?;
        if tree.get(&self.graph).is_none() {
            return Ok(());
        }

        let (first_tree, others) = match commit.parents.split_first() {
            Some((first, rest)) => {
                let mut others = Vec::new();
                for parent in rest.iter().filter(|p| *p != first) {
                    if let Some(blob) = self.graph_blob(parent)? {
                        others.push(blob);
                    }
                }
                (Some(self.store.commit_tree(Some(first))?), others)
            }
            None => (None, Vec::new()),
        };

        let options = DiffOptions::new()
            .graph(self.graph.clone())
            .cancel(self.cancel.clone());
        let mut credited = Vec::new();
        for change in stream_diff(&self.store, first_tree.as_ref(), &tree, options) {
            let change = change?;
            if !change.is_add() || !self.remaining.contains(&change.quad) {
                continue;
            }
            let mut inherited = false;
            for blob in &others {
                if self.store.blob_contains(blob, &change.quad)? {
                    inherited = true;
                    break;
                }
            }
            if !inherited {
                credited.push(change.quad);
            }
        }

        if !credited.is_empty() {
            debug!(commit = %id.short_hex(), quads = credited.len(), "attributed");
        }
        for quad in credited {
            self.remaining.remove(&quad);
            self.ready.push_back(BlameEntry {
                quad,
                commit_id: id,
                commit: commit.clone(),
            });
        }
        Ok(())
    }
}

impl Iterator for Blame {
    type Item = BlameResult<BlameEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.advance() {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
