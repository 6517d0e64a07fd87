//! Lazy quad-level diff between two trees.
//!
//! Graphs are compared by blob hash first; a graph whose blob is identical
//! on both sides costs no I/O at all. Every other graph is walked with two
//! blob cursors in lock step, so memory use is independent of graph size.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use serde::{Deserialize, Serialize};
use tracing::debug;

use quadgit_store::{ObjectStore, StoreResult, Tree};
use quadgit_types::{CancelToken, ObjectId, Quad};

use crate::error::{DiffError, DiffResult};
use crate::sync_walk::{Step, SyncWalk};

/// Direction of a change.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeOp {
    Add,
    Delete,
}

/// One quad added to or deleted from a graph.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Change {
    pub graph: String,
    pub quad: Quad,
    pub op: ChangeOp,
}

impl Change {
    pub fn add(quad: Quad) -> Self {
        Self {
            graph: quad.graph.clone(),
            quad,
            op: ChangeOp::Add,
        }
    }

    pub fn delete(quad: Quad) -> Self {
        Self {
            graph: quad.graph.clone(),
            quad,
            op: ChangeOp::Delete,
        }
    }

    /// The change that undoes this one.
    pub fn inverse(self) -> Self {
        let op = match self.op {
            ChangeOp::Add => ChangeOp::Delete,
            ChangeOp::Delete => ChangeOp::Add,
        };
        Self { op, ..self }
    }

    pub fn is_add(&self) -> bool {
        self.op == ChangeOp::Add
    }
}

/// Options for [`stream_diff`].
#[derive(Clone, Debug, Default)]
pub struct DiffOptions {
    /// Only diff this graph.
    pub graph: Option<String>,
    /// Checked on every advance.
    pub cancel: Option<CancelToken>,
}

impl DiffOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn graph(mut self, graph: impl Into<String>) -> Self {
        self.graph = Some(graph.into());
        self
    }

    pub fn cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

/// Boxed quad stream, as produced by a blob cursor.
pub type QuadStream = Box<dyn Iterator<Item = StoreResult<Quad>> + Send>;

/// Rows of `blob`, or nothing for an absent graph.
pub fn blob_rows(store: &ObjectStore, blob: Option<&ObjectId>) -> StoreResult<QuadStream> {
    Ok(match blob {
        Some(id) => Box::new(store.blob_cursor(id)?),
        None => Box::new(std::iter::empty()),
    })
}

/// Lazy, finite, single-pass sequence of [`Change`]s.
///
/// Graphs are visited in name order and each graph's changes come out in
/// canonical quad order. The first error ends the stream.
pub struct StreamDiff {
    store: ObjectStore,
    pending: VecDeque<(String, Option<ObjectId>, Option<ObjectId>)>,
    current: Option<SyncWalk<Quad, quadgit_store::StoreError, QuadStream, QuadStream>>,
    cancel: Option<CancelToken>,
    done: bool,
}

impl StreamDiff {
    /// Names of the graphs still to be walked.
    pub fn changed_graphs(&self) -> impl Iterator<Item = &str> {
        self.pending.iter().map(|(graph, _, _)| graph.as_str())
    }

    /// Consume the stream and count what it yields.
    pub fn summarize(self) -> DiffResult<DiffSummary> {
        DiffSummary::from_changes(self)
    }

    fn open(&mut self) -> DiffResult<bool> {
        let Some((graph, from, to)) = self.pending.pop_front() else {
            return Ok(false);
        };
        debug!(%graph, "walking graph");
        let left = blob_rows(&self.store, from.as_ref())?;
        let right = blob_rows(&self.store, to.as_ref())?;
        self.current = Some(SyncWalk::new(left, right));
        Ok(true)
    }

    fn advance(&mut self) -> DiffResult<Option<Change>> {
        loop {
            if self.cancel.as_ref().is_some_and(CancelToken::is_cancelled) {
                return Err(DiffError::Cancelled);
            }
            if let Some(walk) = self.current.as_mut() {
                match walk.next() {
                    Some(Ok(Step::Left(quad))) => return Ok(Some(Change::delete(quad))),
                    Some(Ok(Step::Right(quad))) => return Ok(Some(Change::add(quad))),
                    Some(Ok(Step::Both(_))) => continue,
                    Some(Err(e)) => return Err(e.into()),
                    None => self.current = None,
                }
            }
            if !self.open()? {
                return Ok(None);
            }
        }
    }
}

impl Iterator for StreamDiff {
    type Item = DiffResult<Change>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.advance() {
            Ok(Some(change)) => Some(Ok(change)),
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

/// Diff two trees. An absent `from` is the empty tree.
pub fn stream_diff(
    store: &ObjectStore,
    from: Option<&Tree>,
    to: &Tree,
    options: DiffOptions,
) -> StreamDiff {
    let empty = Tree::empty();
    let from = from.unwrap_or(&empty);

    let names: BTreeSet<&String> = from
        .graphs
        .keys()
        .chain(to.graphs.keys())
        .filter(|name| options.graph.as_ref().map_or(true, |g| g == *name))
        .collect();

    let pending = names
        .into_iter()
        .filter_map(|name| {
            let old = from.get(name).copied();
            let new = to.get(name).copied();
            (old != new).then(|| (name.clone(), old, new))
        })
        .collect();

    StreamDiff {
        store: store.clone(),
        pending,
        current: None,
        cancel: options.cancel,
        done: false,
    }
}

/// Diff the trees of two commits. An absent `from` is the empty tree.
pub fn diff_commits(
    store: &ObjectStore,
    from: Option<&ObjectId>,
    to: &ObjectId,
    options: DiffOptions,
) -> DiffResult<StreamDiff> {
    let from_tree = store.commit_tree(from)?;
    let to_tree = store.commit_tree(Some(to))?;
    Ok(stream_diff(store, Some(&from_tree), &to_tree, options))
}

/// Counts of a diff.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffSummary {
    pub added: u64,
    pub deleted: u64,
    /// Per graph: (added, deleted).
    pub graphs: BTreeMap<String, (u64, u64)>,
}

impl DiffSummary {
    pub fn from_changes<I>(changes: I) -> DiffResult<Self>
    where
        I: IntoIterator<Item = DiffResult<Change>>,
    {
        let mut summary = Self::default();
        for change in changes {
            summary.record(&change?);
        }
        Ok(summary)
    }

    pub fn record(&mut self, change: &Change) {
        let entry = self.graphs.entry(change.graph.clone()).or_default();
        match change.op {
            ChangeOp::Add => {
                self.added += 1;
                entry.0 += 1;
            }
            ChangeOp::Delete => {
                self.deleted += 1;
                entry.1 += 1;
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.added == 0 && self.deleted == 0
    }
}
