//! Ancestry queries, merge bases and history logs.
//!
//! [`HistoryWalker`] reads commits from the object store on demand. Parent
//! edges only point backwards, so every traversal here is a search from a
//! child towards its roots with a visited set. The topological log also
//! uses the generation number the store records for each commit.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use quadgit_store::{Commit, ObjectStore, StoreError};
use quadgit_types::{CancelToken, ObjectId};

use crate::error::{DagError, DagResult};

/// Which parent edges a log follows.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogMode {
    /// Follow parent 0 only: the mainline of a branch.
    #[default]
    FirstParent,
    /// Every reachable commit once, children before their ancestors.
    AllParents,
}

/// History traversal over an [`ObjectStore`].
///
/// Cheap to clone. A walker carries one [`CancelToken`]; every search
/// checks it once per step.
#[derive(Clone, Debug)]
pub struct HistoryWalker {
    store: ObjectStore,
    cancel: CancelToken,
}

impl HistoryWalker {
    pub fn new(store: ObjectStore) -> Self {
        Self {
            store,
            cancel: CancelToken::new(),
        }
    }

    /// Use `token` to abort long traversals.
    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn store(&self) -> &ObjectStore {
        &self.store
    }

    fn check_cancel(&self) -> DagResult<()> {
        if self.cancel.is_cancelled() {
            Err(DagError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Read `id`. A missing commit reached through `child`'s parent list is
    /// a dangling reference rather than a plain lookup failure.
    fn load(&self, id: &ObjectId, child: Option<&ObjectId>) -> DagResult<Commit> {
        match (self.store.read_commit(id), child) {
            (Ok(commit), _) => Ok(commit),
            (Err(StoreError::NotFound(_)), Some(child)) => Err(DagError::DanglingParent {
                commit: *child,
                parent: *id,
            }),
            (Err(e), _) => Err(DagError::from_read(e)),
        }
    }

    fn generation(&self, id: &ObjectId) -> DagResult<u64> {
        self.store.generation(id).map_err(DagError::from_read)
    }

    // ---------------------------------------------------------------
    // Ancestry
    // ---------------------------------------------------------------

    /// Whether `ancestor` is reachable from `descendant` over parent edges.
    /// A commit is its own ancestor.
    pub fn is_ancestor(&self, ancestor: &ObjectId, descendant: &ObjectId) -> DagResult<bool> {
        self.load(ancestor, None)?;
        if ancestor == descendant {
            return Ok(true);
        }

        let mut visited = HashSet::new();
        let mut queue = VecDeque::new();
        visited.insert(*descendant);
        queue.push_back((*descendant, None));

        while let Some((current, child)) = queue.pop_front() {
            self.check_cancel()?;
            let commit = self.load(&current, child.as_ref())?;
            for parent in commit.parents {
                if parent == *ancestor {
                    return Ok(true);
                }
                if visited.insert(parent) {
                    queue.push_back((parent, Some(current)));
                }
            }
        }
        Ok(false)
    }

    /// Lowest common ancestor of `a` and `b`.
    ///
    /// Both sides are searched breadth-first in lock step. Among common
    /// ancestors the one with the smallest combined distance wins, ties
    /// broken by the smaller hash. The search stops once no undiscovered
    /// node could still match the best candidate.
    pub fn lowest_common_ancestor(&self, a: &ObjectId, b: &ObjectId) -> DagResult<ObjectId> {
        self.load(a, None)?;
        self.load(b, None)?;
        if a == b {
            return Ok(*a);
        }

        let mut left = Frontier::new(*a);
        let mut right = Frontier::new(*b);
        let mut best: Option<(usize, ObjectId)> = None;

        loop {
            self.check_cancel()?;
            let bound = match (left.is_open(), right.is_open()) {
                (false, false) => break,
                (true, false) => left.depth + 1,
                (false, true) => right.depth + 1,
                (true, true) => left.depth.min(right.depth) + 1,
            };
            if best.is_some_and(|(distance, _)| distance < bound) {
                break;
            }
            let expand_left = left.is_open() && (!right.is_open() || left.depth <= right.depth);
            if expand_left {
                self.expand(&mut left, &right, &mut best)?;
            } else {
                self.expand(&mut right, &left, &mut best)?;
            }
        }

        match best {
            Some((distance, id)) => {
                debug!(a = %a.short_hex(), b = %b.short_hex(), base = %id.short_hex(), distance, "found merge base");
                Ok(id)
            }
            None => Err(DagError::NoCommonAncestor { a: *a, b: *b }),
        }
    }

    fn expand(
        &self,
        side: &mut Frontier,
        other: &Frontier,
        best: &mut Option<(usize, ObjectId)>,
    ) -> DagResult<()> {
        let depth = side.depth + 1;
        let mut next = Vec::new();
        for current in std::mem::take(&mut side.frontier) {
            let commit = self.load(&current, side.child_of.get(&current))?;
            for parent in commit.parents {
                if side.dist.contains_key(&parent) {
                    continue;
                }
                side.dist.insert(parent, depth);
                side.child_of.insert(parent, current);
                next.push(parent);
                if let Some(theirs) = other.dist.get(&parent) {
                    let candidate = (depth + theirs, parent);
                    if best.map_or(true, |b| candidate < b) {
                        *best = Some(candidate);
                    }
                }
            }
        }
        side.frontier = next;
        side.depth = depth;
        Ok(())
    }

    // ---------------------------------------------------------------
    // Log
    // ---------------------------------------------------------------

    /// Lazy history starting at `start`, newest first.
    ///
    /// `limit` caps the number of commits yielded. The returned iterator is
    /// single-pass; call `log` again to restart.
    pub fn log(&self, start: &ObjectId, limit: Option<usize>, mode: LogMode) -> DagResult<CommitLog> {
        let commit = self.load(start, None)?;
        let state = match mode {
            LogMode::FirstParent => LogState::FirstParent {
                next: Some((*start, None)),
            },
            LogMode::AllParents => {
                let generation = self.generation(start)?;
                LogState::Topological(Box::new(TopoState::new(*start, commit, generation)))
            }
        };
        Ok(CommitLog {
            walker: self.clone(),
            limit,
            emitted: 0,
            state,
            done: false,
        })
    }
}

/// One side of the merge-base search.
struct Frontier {
    dist: HashMap<ObjectId, usize>,
    child_of: HashMap<ObjectId, ObjectId>,
    frontier: Vec<ObjectId>,
    depth: usize,
}

impl Frontier {
    fn new(start: ObjectId) -> Self {
        Self {
            dist: HashMap::from([(start, 0)]),
            child_of: HashMap::new(),
            frontier: vec![start],
            depth: 0,
        }
    }

    fn is_open(&self) -> bool {
        !self.frontier.is_empty()
    }
}

// ---------------------------------------------------------------
// CommitLog
// ---------------------------------------------------------------

/// Lazy, finite, single-pass sequence of `(id, commit)` pairs.
///
/// Yields `Err(DagError::Cancelled)` once if the walker's token fires,
/// then ends.
pub struct CommitLog {
    walker: HistoryWalker,
    limit: Option<usize>,
    emitted: usize,
    state: LogState,
    done: bool,
}

enum LogState {
    FirstParent { next: Option<(ObjectId, Option<ObjectId>)> },
    Topological(Box<TopoState>),
}

/// Kahn's algorithm, discovering the subgraph as it goes.
///
/// A commit may be emitted once all its children have been. Its children
/// all have a higher generation, so once every loaded commit of a higher
/// generation has had its parents counted, its pending count is final.
/// Each step therefore loads only down to the generation of the commit it
/// emits. Among emittable commits the newest goes first, ties broken by
/// the smaller hash.
struct TopoState {
    /// Loaded, not yet emitted, with generation numbers.
    commits: HashMap<ObjectId, (Commit, u64)>,
    /// Counted child edges that have not been emitted, per parent.
    pending_children: HashMap<ObjectId, usize>,
    /// Loaded commits whose parents are not counted yet, highest first.
    unexpanded: BinaryHeap<(u64, ObjectId)>,
    /// Candidates with no pending children. An entry goes stale when a
    /// later expansion finds another child; stale entries are skipped.
    ready: BinaryHeap<(DateTime<Utc>, Reverse<ObjectId>)>,
}

impl TopoState {
    fn new(start: ObjectId, commit: Commit, generation: u64) -> Self {
        let ready = BinaryHeap::from([(commit.timestamp, Reverse(start))]);
        Self {
            commits: HashMap::from([(start, (commit, generation))]),
            pending_children: HashMap::new(),
            unexpanded: BinaryHeap::from([(generation, start)]),
            ready,
        }
    }

    fn pending(&self, id: &ObjectId) -> usize {
        self.pending_children.get(id).copied().unwrap_or(0)
    }

    /// Count the parent edges of the highest unexpanded commit, loading
    /// parents seen for the first time. Returns `false` when none is left.
    fn expand_next(&mut self, walker: &HistoryWalker) -> DagResult<bool> {
        let Some((child_generation, id)) = self.unexpanded.pop() else {
            return Ok(false);
        };
        let parents = match self.commits.get(&id) {
            Some((commit, _)) => distinct(&commit.parents),
            None => return Ok(true),
        };
        for parent in parents {
            *self.pending_children.entry(parent).or_default() += 1;
            if self.commits.contains_key(&parent) {
                continue;
            }
            let commit = walker.load(&parent, Some(&id))?;
            let generation = walker.generation(&parent)?;
            if generation >= child_generation {
                return Err(DagError::Store(StoreError::CorruptObject {
                    id: parent,
                    reason: format!(
                        "generation {generation} not below child {} at {child_generation}",
                        id.short_hex()
                    ),
                }));
            }
            self.commits.insert(parent, (commit, generation));
            self.unexpanded.push((generation, parent));
        }
        Ok(true)
    }

    fn step(&mut self, walker: &HistoryWalker) -> DagResult<Option<(ObjectId, Commit)>> {
        loop {
            walker.check_cancel()?;
            let Some(&(_, Reverse(id))) = self.ready.peek() else {
                if self.expand_next(walker)? {
                    continue;
                }
                return Ok(None);
            };
            let generation = match self.commits.get(&id) {
                Some((_, generation)) if self.pending(&id) == 0 => *generation,
                _ => {
                    self.ready.pop();
                    continue;
                }
            };
            if self
                .unexpanded
                .peek()
                .is_some_and(|(unexpanded, _)| *unexpanded >= generation)
            {
                self.expand_next(walker)?;
                continue;
            }

            self.ready.pop();
            let (commit, _) = self.commits.remove(&id).ok_or(DagError::NotFound(id))?;
            self.pending_children.remove(&id);
            for parent in distinct(&commit.parents) {
                if let Some(count) = self.pending_children.get_mut(&parent) {
                    *count -= 1;
                    if *count == 0 {
                        if let Some((p, _)) = self.commits.get(&parent) {
                            self.ready.push((p.timestamp, Reverse(parent)));
                        }
                    }
                }
            }
            debug!(
                commit = %id.short_hex(),
                generation,
                frontier = self.commits.len(),
                "emitted commit"
            );
            return Ok(Some((id, commit)));
        }
    }
}

fn distinct(parents: &[ObjectId]) -> Vec<ObjectId> {
    let mut seen = HashSet::new();
    parents.iter().copied().filter(|p| seen.insert(*p)).collect()
}

impl CommitLog {
    fn step(&mut self) -> DagResult<Option<(ObjectId, Commit)>> {
        match &mut self.state {
            LogState::FirstParent { next } => {
                let Some((id, child)) = next.take() else {
                    return Ok(None);
                };
                let commit = self.walker.load(&id, child.as_ref())?;
                *next = commit.first_parent().map(|p| (*p, Some(id)));
                Ok(Some((id, commit)))
            }
            LogState::Topological(topo) => topo.step(&self.walker),
        }
    }
}

impl Iterator for CommitLog {
    type Item = DagResult<(ObjectId, Commit)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if self.limit.is_some_and(|limit| self.emitted >= limit) {
            self.done = true;
            return None;
        }
        if let Err(e) = self.walker.check_cancel() {
            self.done = true;
            return Some(Err(e));
        }
        match self.step() {
            Ok(Some(entry)) => {
                self.emitted += 1;
                Some(Ok(entry))
            }
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
