use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use quadgit_blame::{Blame, BlameEngine};
use quadgit_crypto::{CommitSigner, CommitVerifier};
use quadgit_dag::{audit, AuditReport, CommitLog, HistoryWalker, LogMode};
use quadgit_diff::{
    blob_rows, diff_commits, ChangeOp, DiffOptions, QuadStream, Step, StreamDiff, SyncWalk,
};
use quadgit_merge::{MergeEngine, MergeMeta, MergeOutcome, SchemaProvider};
use quadgit_refs::{
    branch_ref, tag_ref, validate_branch_name, RefError, RefStore, Reference, HEAD,
};
use quadgit_store::{
    Blob, Commit, CommitStats, KvBackend, KvTransaction, Object, ObjectStore, StoreError,
    StoreResult, Tree,
};
use quadgit_types::{Author, ObjectId, Quad};

use crate::commit::{CommitRequest, CommitResult, RepoMergeOutcome};
use crate::config::RepositoryConfig;
use crate::error::{SdkError, SdkResult};

const ROOT_MESSAGE: &str = "Initial commit";

/// Handle to one repository inside a key-value backend.
///
/// Cheap to clone. Every mutating operation runs in a single backend
/// transaction whose first tracked read is the branch being moved, so two
/// writers racing on a branch cannot both win: the loser gets a retryable
/// error and nothing it staged becomes visible.
#[derive(Clone)]
pub struct Repository {
    config: RepositoryConfig,
    store: ObjectStore,
    refs: RefStore,
    schema: Option<Arc<dyn SchemaProvider>>,
}

impl std::fmt::Debug for Repository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("config", &self.config)
            .field("schema", &self.schema.is_some())
            .finish()
    }
}

impl Repository {
    fn handle(backend: Arc<dyn KvBackend>, config: RepositoryConfig) -> Self {
        let store = ObjectStore::new(backend, config.keyspace());
        Self {
            refs: RefStore::new(store.clone()),
            store,
            config,
            schema: None,
        }
    }

    /// Create a repository: an empty root commit on the default branch,
    /// with HEAD naming that branch.
    pub fn init(backend: Arc<dyn KvBackend>, config: RepositoryConfig) -> SdkResult<Self> {
        config.validate()?;
        let repo = Self::handle(backend, config);

        let mut txn = repo.store.backend().begin()?;
        if txn.get(&repo.store.keyspace().reference(HEAD))?.is_some() {
            return Err(SdkError::AlreadyInitialized(repo.config.namespace.clone()));
        }
        let tree = repo.store.put_in(txn.as_mut(), &Object::Tree(Tree::empty()))?;
        let root = Commit {
            tree,
            parents: Vec::new(),
            author: repo.config.author.clone(),
            message: ROOT_MESSAGE.into(),
            timestamp: Utc::now(),
            stats: CommitStats::default(),
            signature: None,
        };
        let root_id = repo.store.put_in(txn.as_mut(), &Object::Commit(root))?;
        let branch = &repo.config.default_branch;
        repo.refs.set_ref_in(txn.as_mut(), &branch_ref(branch), &root_id)?;
        repo.refs.set_head_in(txn.as_mut(), branch)?;
        txn.commit()?;

        info!(
            namespace = %repo.config.namespace,
            branch = %branch,
            root = %root_id.short_hex(),
            "initialized repository"
        );
        Ok(repo)
    }

    /// Open an existing repository.
    pub fn open(backend: Arc<dyn KvBackend>, config: RepositoryConfig) -> SdkResult<Self> {
        config.validate()?;
        let repo = Self::handle(backend, config);
        if repo.refs.head()?.is_none() {
            return Err(SdkError::NotInitialized(repo.config.namespace.clone()));
        }
        debug!(namespace = %repo.config.namespace, "opened repository");
        Ok(repo)
    }

    /// Validate merges against the given schema source.
    pub fn with_schema_provider(mut self, provider: Arc<dyn SchemaProvider>) -> Self {
        self.schema = Some(provider);
        self
    }

    pub fn config(&self) -> &RepositoryConfig {
        &self.config
    }

    pub fn store(&self) -> &ObjectStore {
        &self.store
    }

    pub fn refs(&self) -> &RefStore {
        &self.refs
    }

    /// Tip of `branch`, read through `txn` so a concurrent move of the
    /// branch fails the commit.
    fn branch_head_in(&self, txn: &mut dyn KvTransaction, branch: &str) -> SdkResult<ObjectId> {
        validate_branch_name(branch)?;
        let name = branch_ref(branch);
        self.refs
            .get_ref_in(txn, &name)?
            .ok_or_else(|| SdkError::from(RefError::NotFound { name }))
    }

    /// Write the commit, move `branch` to it and commit the transaction.
    fn publish(
        &self,
        mut txn: Box<dyn KvTransaction>,
        branch: &str,
        mut commit: Commit,
        signer: Option<&dyn CommitSigner>,
    ) -> SdkResult<CommitResult> {
        if let Some(signer) = signer {
            commit.sign(signer)?;
        }
        let (tree, stats) = (commit.tree, commit.stats);
        let id = self.store.put_in(txn.as_mut(), &Object::Commit(commit))?;
        self.refs.set_ref_in(txn.as_mut(), &branch_ref(branch), &id)?;
        txn.commit()?;

        info!(
            branch,
            commit = %id.short_hex(),
            added = stats.added,
            deleted = stats.deleted,
            total = stats.total_quads,
            "committed"
        );
        Ok(CommitResult {
            commit: id,
            tree,
            stats,
        })
    }

    // ---------------------------------------------------------------
    // Writes
    // ---------------------------------------------------------------

    /// Commit new contents for some graphs on top of a branch.
    pub fn commit(&self, request: CommitRequest) -> SdkResult<CommitResult> {
        let CommitRequest {
            branch,
            author,
            message,
            graphs,
            timestamp,
            signer,
        } = request;

        let mut txn = self.store.backend().begin()?;
        let parent = self.branch_head_in(txn.as_mut(), &branch)?;
        let parent_commit = self.store.read_commit(&parent)?;
        let mut tree = self.store.read_tree(&parent_commit.tree)?;
        let mut stats = CommitStats::default();

        for (graph, quads) in graphs {
            let blob = Blob::new(graph.clone(), quads)?;
            let old = tree.get(&graph).copied();
            let new = (!blob.is_empty()).then(|| blob.id());
            if old == new {
                continue;
            }
            // Staged blobs are invisible to cursors, so count against the
            // in-memory quads.
            let (added, deleted) = count_changes(&self.store, old.as_ref(), blob.quads())?;
            stats.added += added;
            stats.deleted += deleted;
            if new.is_some() {
                let id = self.store.put_in(txn.as_mut(), &Object::Blob(blob))?;
                tree.insert(graph, id);
            } else {
                tree.remove(&graph);
            }
        }
        stats.total_quads =
            (parent_commit.stats.total_quads + stats.added).saturating_sub(stats.deleted);

        let tree = self.store.put_in(txn.as_mut(), &Object::Tree(tree))?;
        let commit = Commit {
            tree,
            parents: vec![parent],
            author,
            message,
            timestamp: timestamp.unwrap_or_else(Utc::now),
            stats,
            signature: None,
        };
        self.publish(txn, &branch, commit, signer.as_deref())
    }

    /// Undo the changes `commit` made relative to its first parent, as a
    /// new commit on `branch`.
    pub fn revert(&self, branch: &str, commit: &ObjectId, author: Author) -> SdkResult<CommitResult> {
        let reverted = self.store.read_commit(commit)?;
        let mut changes: BTreeMap<String, (BTreeSet<Quad>, BTreeSet<Quad>)> = BTreeMap::new();
        for change in diff_commits(&self.store, reverted.first_parent(), commit, DiffOptions::new())? {
            let change = change?.inverse();
            let (adds, deletes) = changes.entry(change.graph).or_default();
            match change.op {
                ChangeOp::Add => adds.insert(change.quad),
                ChangeOp::Delete => deletes.insert(change.quad),
            };
        }

        let mut txn = self.store.backend().begin()?;
        let head = self.branch_head_in(txn.as_mut(), branch)?;
        let head_commit = self.store.read_commit(&head)?;
        let mut tree = self.store.read_tree(&head_commit.tree)?;
        let mut stats = CommitStats::default();

        for (graph, (adds, deletes)) in &changes {
            let current = tree.get(graph).copied();
            for quad in adds {
                if !self.holds(current.as_ref(), quad)? {
                    stats.added += 1;
                }
            }
            for quad in deletes {
                if self.holds(current.as_ref(), quad)? {
                    stats.deleted += 1;
                }
            }
            match self.apply_changes(txn.as_mut(), graph, current.as_ref(), adds, deletes)? {
                Some(id) => tree.insert(graph.clone(), id),
                None => {
                    tree.remove(graph);
                }
            }
        }
        stats.total_quads =
            (head_commit.stats.total_quads + stats.added).saturating_sub(stats.deleted);

        let tree = self.store.put_in(txn.as_mut(), &Object::Tree(tree))?;
        let revert = Commit {
            tree,
            parents: vec![head],
            author,
            message: format!(
                "Revert \"{}\"\n\nThis reverts commit {}.",
                reverted.message,
                commit.to_hex()
            ),
            timestamp: Utc::now(),
            stats,
            signature: None,
        };
        self.publish(txn, branch, revert, None)
    }

    /// Merge `source` (any resolvable name) into `target_branch`.
    ///
    /// Conflicts leave the branch untouched. A source already in the
    /// branch's history is a no-op.
    pub fn merge(
        &self,
        target_branch: &str,
        source: &str,
        meta: MergeMeta,
    ) -> SdkResult<RepoMergeOutcome> {
        let source_id = self.refs.resolve(source)?;
        let mut txn = self.store.backend().begin()?;
        let target_id = self.branch_head_in(txn.as_mut(), target_branch)?;

        if HistoryWalker::new(self.store.clone()).is_ancestor(&source_id, &target_id)? {
            debug!(branch = target_branch, source, "already up to date");
            return Ok(RepoMergeOutcome::AlreadyUpToDate { head: target_id });
        }

        let engine = self.merge_engine();
        let base = engine.merge_base(&target_id, &source_id)?;
        match engine.merge(txn.as_mut(), &base, &target_id, &source_id, &meta)? {
            MergeOutcome::Merged {
                commit,
                tree,
                stats,
            } => {
                self.refs
                    .set_ref_in(txn.as_mut(), &branch_ref(target_branch), &commit)?;
                txn.commit()?;
                info!(
                    branch = target_branch,
                    source,
                    commit = %commit.short_hex(),
                    "merged"
                );
                Ok(RepoMergeOutcome::Merged {
                    commit,
                    tree,
                    stats,
                })
            }
            MergeOutcome::Conflicted(conflicts) => {
                warn!(
                    branch = target_branch,
                    source,
                    conflicts = conflicts.len(),
                    "merge stopped on conflicts"
                );
                Ok(RepoMergeOutcome::Conflicted(conflicts))
            }
        }
    }

    fn merge_engine(&self) -> MergeEngine {
        let engine = MergeEngine::new(self.store.clone(), self.config.merge.clone());
        match &self.schema {
            Some(provider) => engine.with_schema_provider(Arc::clone(provider)),
            None => engine,
        }
    }

    fn holds(&self, blob: Option<&ObjectId>, quad: &Quad) -> StoreResult<bool> {
        match blob {
            Some(id) => self.store.blob_contains(id, quad),
            None => Ok(false),
        }
    }

    /// Write `current` plus `adds` minus `deletes` as a blob, streaming the
    /// existing rows.
    fn apply_changes(
        &self,
        txn: &mut dyn KvTransaction,
        graph: &str,
        current: Option<&ObjectId>,
        adds: &BTreeSet<Quad>,
        deletes: &BTreeSet<Quad>,
    ) -> StoreResult<Option<ObjectId>> {
        let store = &self.store;
        store.write_blob_from(txn, graph, || {
            let walk = SyncWalk::new(
                blob_rows(store, current)?,
                adds.iter().cloned().map(Ok::<Quad, StoreError>),
            );
            Ok(walk.filter_map(move |step| match step {
                Ok(Step::Left(quad) | Step::Right(quad) | Step::Both(quad)) => {
                    (!deletes.contains(&quad)).then_some(Ok(quad))
                }
                Err(e) => Some(Err(e)),
            }))
        })
    }

    // ---------------------------------------------------------------
    // Queries
    // ---------------------------------------------------------------

    /// Changes from `from` to `to`, both resolvable names.
    pub fn diff(&self, from: &str, to: &str) -> SdkResult<StreamDiff> {
        self.diff_with(from, to, DiffOptions::new())
    }

    pub fn diff_with(&self, from: &str, to: &str, options: DiffOptions) -> SdkResult<StreamDiff> {
        let from = self.refs.resolve(from)?;
        let to = self.refs.resolve(to)?;
        Ok(diff_commits(&self.store, Some(&from), &to, options)?)
    }

    /// Attribute every quad of `graph` as of `at`.
    pub fn blame(&self, graph: &str, at: &str) -> SdkResult<Blame> {
        let at = self.refs.resolve(at)?;
        Ok(BlameEngine::new(self.store.clone()).blame(graph, &at)?)
    }

    pub fn log(&self, start: &str, limit: Option<usize>, mode: LogMode) -> SdkResult<CommitLog> {
        let start = self.refs.resolve(start)?;
        Ok(HistoryWalker::new(self.store.clone()).log(&start, limit, mode)?)
    }

    pub fn read_commit(&self, id: &ObjectId) -> SdkResult<Commit> {
        Ok(self.store.read_commit(id)?)
    }

    /// Quads of `graph` as of `at`, in canonical order.
    pub fn graph_quads(&self, at: &str, graph: &str) -> SdkResult<QuadStream> {
        let at = self.refs.resolve(at)?;
        let tree = self.store.commit_tree(Some(&at))?;
        Ok(blob_rows(&self.store, tree.get(graph))?)
    }

    /// Graph names present as of `at`.
    pub fn graphs(&self, at: &str) -> SdkResult<Vec<String>> {
        let at = self.refs.resolve(at)?;
        let tree = self.store.commit_tree(Some(&at))?;
        Ok(tree.iter().map(|(graph, _)| graph.clone()).collect())
    }

    // ---------------------------------------------------------------
    // References
    // ---------------------------------------------------------------

    pub fn resolve(&self, name: &str) -> SdkResult<ObjectId> {
        Ok(self.refs.resolve(name)?)
    }

    /// Create `name` at the commit `at` resolves to. Existing branches are
    /// not moved.
    pub fn create_branch(&self, name: &str, at: &str) -> SdkResult<ObjectId> {
        validate_branch_name(name)?;
        let target = self.refs.resolve(at)?;
        let full = branch_ref(name);
        let mut txn = self.store.backend().begin()?;
        if self.refs.get_ref_in(txn.as_mut(), &full)?.is_some() {
            return Err(SdkError::InvalidOperation(format!(
                "branch {name} already exists"
            )));
        }
        self.refs.set_ref_in(txn.as_mut(), &full, &target)?;
        txn.commit()?;
        info!(branch = name, at = %target.short_hex(), "created branch");
        Ok(target)
    }

    pub fn delete_branch(&self, name: &str) -> SdkResult<()> {
        Ok(self.refs.delete_ref(&branch_ref(name))?)
    }

    pub fn create_tag(&self, name: &str, at: &str) -> SdkResult<ObjectId> {
        let target = self.refs.resolve(at)?;
        self.refs.set_ref(&tag_ref(name), &target)?;
        Ok(target)
    }

    pub fn switch_branch(&self, name: &str) -> SdkResult<()> {
        Ok(self.refs.set_head(name)?)
    }

    pub fn current_branch(&self) -> SdkResult<Option<String>> {
        Ok(self.refs.current_branch()?)
    }

    pub fn list_refs(&self, prefix: &str) -> SdkResult<Vec<Reference>> {
        Ok(self.refs.list_refs(prefix)?)
    }

    // ---------------------------------------------------------------
    // Integrity
    // ---------------------------------------------------------------

    pub fn verify_commit(&self, id: &ObjectId, verifier: &dyn CommitVerifier) -> SdkResult<()> {
        Ok(self.store.read_commit(id)?.verify_signature(verifier)?)
    }

    /// Check every object reachable from any reference.
    pub fn audit(&self) -> SdkResult<AuditReport> {
        let heads: Vec<ObjectId> = self
            .refs
            .list_refs("refs/")?
            .into_iter()
            .map(|r| r.target)
            .collect();
        let report = audit(&self.store, &heads)?;
        info!(
            commits = report.commits,
            trees = report.trees,
            blobs = report.blobs,
            quads = report.quads,
            "audit passed"
        );
        Ok(report)
    }
}

/// `(added, deleted)` between a stored blob and a sorted quad slice.
fn count_changes(
    store: &ObjectStore,
    old: Option<&ObjectId>,
    new: &[Quad],
) -> StoreResult<(u64, u64)> {
    let (mut added, mut deleted) = (0, 0);
    let walk = SyncWalk::new(
        blob_rows(store, old)?,
        new.iter().cloned().map(Ok::<Quad, StoreError>),
    );
    for step in walk {
        match step? {
            Step::Left(_) => deleted += 1,
            Step::Right(_) => added += 1,
            Step::Both(_) => {}
        }
    }
    Ok((added, deleted))
}

/// Run `op` until it succeeds, fails with a non-retryable error, or
/// `attempts` runs out.
pub fn with_retry<T, F>(attempts: usize, mut op: F) -> SdkResult<T>
where
    F: FnMut() -> SdkResult<T>,
{
    let mut attempt = 1;
    loop {
        match op() {
            Err(e) if e.is_retryable() && attempt < attempts => {
                warn!(attempt, error = %e, "retrying after conflict");
                attempt += 1;
            }
            result => return result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    use quadgit_blame::BlameEntry;
    use quadgit_crypto::SigningKey;
    use quadgit_diff::Change;
    use quadgit_merge::ConflictKind;
    use quadgit_store::MemoryKv;

    const PEOPLE: &str = "ex:people";

    fn q(s: &str, p: &str, o: &str) -> Quad {
        Quad::new(s, p, o, PEOPLE)
    }

    fn ada() -> Author {
        Author::new("Ada", "ada@example.org")
    }

    fn repo() -> Repository {
        Repository::init(Arc::new(MemoryKv::new()), RepositoryConfig::default()).unwrap()
    }

    fn commit(repo: &Repository, branch: &str, quads: Vec<Quad>) -> CommitResult {
        repo.commit(CommitRequest::new(branch, ada(), "update").with_graph(PEOPLE, quads))
            .unwrap()
    }

    fn quads(repo: &Repository, at: &str) -> Vec<Quad> {
        repo.graph_quads(at, PEOPLE)
            .unwrap()
            .collect::<StoreResult<Vec<_>>>()
            .unwrap()
    }

    // ---- Test 1: lifecycle ----

    #[test]
    fn init_then_open() {
        let backend: Arc<dyn KvBackend> = Arc::new(MemoryKv::new());
        let repo = Repository::init(backend.clone(), RepositoryConfig::default()).unwrap();
        assert_eq!(repo.current_branch().unwrap().as_deref(), Some("main"));

        let root = repo.resolve("main").unwrap();
        let commit = repo.read_commit(&root).unwrap();
        assert!(commit.is_root());
        assert_eq!(commit.message, ROOT_MESSAGE);
        assert_eq!(commit.stats, CommitStats::default());

        let reopened = Repository::open(backend.clone(), RepositoryConfig::default()).unwrap();
        assert_eq!(reopened.resolve("main").unwrap(), root);

        assert!(matches!(
            Repository::init(backend.clone(), RepositoryConfig::default()),
            Err(SdkError::AlreadyInitialized(_))
        ));
        assert!(matches!(
            Repository::open(backend, RepositoryConfig::new("other")),
            Err(SdkError::NotInitialized(_))
        ));
    }

    #[test]
    fn namespaces_are_isolated() {
        let backend: Arc<dyn KvBackend> = Arc::new(MemoryKv::new());
        let a = Repository::init(backend.clone(), RepositoryConfig::new("a")).unwrap();
        let b = Repository::init(backend, RepositoryConfig::new("b")).unwrap();
        commit(&a, "main", vec![q("ex:alice", "ex:age", "30")]);
        assert!(quads(&b, "main").is_empty());
        assert_eq!(quads(&a, "main").len(), 1);
    }

    // ---- Test 2: commits ----

    #[test]
    fn commit_replaces_graph_and_counts_changes() {
        let repo = repo();
        let first = commit(
            &repo,
            "main",
            vec![q("ex:alice", "ex:age", "30"), q("ex:bob", "ex:age", "40")],
        );
        assert_eq!(first.stats.added, 2);
        assert_eq!(first.stats.deleted, 0);
        assert_eq!(first.stats.total_quads, 2);

        let second = commit(
            &repo,
            "main",
            vec![q("ex:alice", "ex:age", "31"), q("ex:bob", "ex:age", "40")],
        );
        assert_eq!(second.stats.added, 1);
        assert_eq!(second.stats.deleted, 1);
        assert_eq!(second.stats.total_quads, 2);

        let commit = repo.read_commit(&second.commit).unwrap();
        assert_eq!(commit.parents, vec![first.commit]);
        assert_eq!(repo.resolve("main").unwrap(), second.commit);
        assert_eq!(
            quads(&repo, "main"),
            vec![q("ex:alice", "ex:age", "31"), q("ex:bob", "ex:age", "40")]
        );
    }

    #[test]
    fn unlisted_graphs_carry_over_and_empty_lists_delete() {
        let repo = repo();
        commit(&repo, "main", vec![q("ex:alice", "ex:age", "30")]);
        repo.commit(
            CommitRequest::new("main", ada(), "orgs")
                .with_graph("ex:orgs", vec![Quad::new("ex:acme", "ex:name", "Acme", "ex:orgs")]),
        )
        .unwrap();
        assert_eq!(repo.graphs("main").unwrap(), vec!["ex:orgs", PEOPLE]);

        let dropped = repo
            .commit(CommitRequest::new("main", ada(), "drop").delete_graph(PEOPLE))
            .unwrap();
        assert_eq!(dropped.stats.deleted, 1);
        assert_eq!(dropped.stats.total_quads, 1);
        assert_eq!(repo.graphs("main").unwrap(), vec!["ex:orgs"]);
    }

    #[test]
    fn unchanged_commit_keeps_tree() {
        let repo = repo();
        let first = commit(&repo, "main", vec![q("ex:alice", "ex:age", "30")]);
        let again = commit(&repo, "main", vec![q("ex:alice", "ex:age", "30")]);
        assert_ne!(first.commit, again.commit);
        assert_eq!(first.tree, again.tree);
        assert_eq!(again.stats.added + again.stats.deleted, 0);
    }

    #[test]
    fn commit_to_missing_branch_fails() {
        let repo = repo();
        let err = repo
            .commit(CommitRequest::new("nope", ada(), "x").with_graph(PEOPLE, vec![]))
            .unwrap_err();
        assert!(matches!(err, SdkError::Ref(RefError::NotFound { .. })));
    }

    #[test]
    fn quads_of_other_graphs_are_rejected() {
        let repo = repo();
        let err = repo
            .commit(
                CommitRequest::new("main", ada(), "x")
                    .with_graph(PEOPLE, vec![Quad::new("a", "b", "c", "ex:other")]),
            )
            .unwrap_err();
        assert!(matches!(err, SdkError::Store(StoreError::InvalidQuads(_))));
    }

    // ---- Test 3: revert ----

    #[test]
    fn revert_restores_parent_content() {
        let repo = repo();
        commit(&repo, "main", vec![q("ex:alice", "ex:age", "30")]);
        let bad = commit(
            &repo,
            "main",
            vec![q("ex:alice", "ex:age", "31"), q("ex:bob", "ex:age", "40")],
        );
        commit(
            &repo,
            "main",
            vec![
                q("ex:alice", "ex:age", "31"),
                q("ex:bob", "ex:age", "40"),
                q("ex:carol", "ex:age", "50"),
            ],
        );

        let reverted = repo.revert("main", &bad.commit, ada()).unwrap();
        assert_eq!(reverted.stats.added, 1);
        assert_eq!(reverted.stats.deleted, 2);
        assert_eq!(reverted.stats.total_quads, 2);
        assert_eq!(
            quads(&repo, "main"),
            vec![q("ex:alice", "ex:age", "30"), q("ex:carol", "ex:age", "50")]
        );
        let message = repo.read_commit(&reverted.commit).unwrap().message;
        assert!(message.starts_with("Revert \"update\""));
    }

    #[test]
    fn revert_of_graph_creation_removes_graph() {
        let repo = repo();
        let created = commit(&repo, "main", vec![q("ex:alice", "ex:age", "30")]);
        repo.revert("main", &created.commit, ada()).unwrap();
        assert!(repo.graphs("main").unwrap().is_empty());
        let head = repo.resolve("main").unwrap();
        assert_eq!(repo.read_commit(&head).unwrap().stats.total_quads, 0);
    }

    // ---- Test 4: merge ----

    #[test]
    fn clean_merge_then_up_to_date() {
        let repo = repo();
        commit(&repo, "main", vec![q("ex:alice", "ex:age", "30")]);
        repo.create_branch("feature", "main").unwrap();
        commit(
            &repo,
            "feature",
            vec![q("ex:alice", "ex:age", "30"), q("ex:bob", "ex:age", "40")],
        );
        commit(
            &repo,
            "main",
            vec![q("ex:alice", "ex:age", "30"), q("ex:carol", "ex:age", "50")],
        );

        let meta = MergeMeta::new(ada(), "merge feature");
        let merged = repo.merge("main", "feature", meta.clone()).unwrap();
        let RepoMergeOutcome::Merged { commit, stats, .. } = merged else {
            panic!("expected a merge, got {merged:?}");
        };
        assert_eq!(repo.resolve("main").unwrap(), commit);
        assert_eq!(stats.total_quads, 3);
        assert_eq!(quads(&repo, "main").len(), 3);

        assert_eq!(
            repo.merge("main", "feature", meta).unwrap(),
            RepoMergeOutcome::AlreadyUpToDate { head: commit }
        );
    }

    #[test]
    fn conflicting_merge_leaves_branch_alone() {
        let repo = repo();
        commit(&repo, "main", vec![q("ex:alice", "ex:age", "29")]);
        repo.create_branch("feature", "main").unwrap();
        commit(&repo, "feature", vec![q("ex:alice", "ex:age", "31")]);
        let head = commit(&repo, "main", vec![q("ex:alice", "ex:age", "30")]).commit;

        let outcome = repo
            .merge("main", "feature", MergeMeta::new(ada(), "merge"))
            .unwrap();
        assert_eq!(outcome.conflicts().len(), 1);
        assert_eq!(outcome.conflicts()[0].kind(), ConflictKind::Value);
        assert_eq!(repo.resolve("main").unwrap(), head);
    }

    #[test]
    fn schema_graph_drives_validation() {
        let config = RepositoryConfig::default()
            .with_merge(quadgit_merge::MergeConfig::default().with_schema_graph("ex:schema"));
        let repo = Repository::init(Arc::new(MemoryKv::new()), config)
            .unwrap()
            .with_schema_provider(Arc::new(quadgit_merge::GraphSchemaProvider::new()));

        let typed = |class: &str| q("ex:alice", "rdf:type", class);
        repo.commit(
            CommitRequest::new("main", ada(), "schema")
                .with_graph(
                    "ex:schema",
                    vec![Quad::new("ex:Cat", "owl:disjointWith", "ex:Dog", "ex:schema")],
                )
                .with_graph(PEOPLE, vec![typed("ex:Animal"), typed("ex:Pet")]),
        )
        .unwrap();
        repo.create_branch("feature", "main").unwrap();
        commit(
            &repo,
            "feature",
            vec![typed("ex:Animal"), typed("ex:Pet"), typed("ex:Dog")],
        );
        commit(
            &repo,
            "main",
            vec![typed("ex:Animal"), typed("ex:Pet"), typed("ex:Cat")],
        );

        let outcome = repo
            .merge("main", "feature", MergeMeta::new(ada(), "merge"))
            .unwrap();
        assert_eq!(outcome.conflicts().len(), 1);
        assert_eq!(outcome.conflicts()[0].kind(), ConflictKind::SchemaViolation);
    }

    // ---- Test 5: concurrency ----

    #[test]
    fn racing_writer_gets_retryable_conflict() {
        let repo = repo();
        let mut txn = repo.store().backend().begin().unwrap();
        let seen = repo.branch_head_in(txn.as_mut(), "main").unwrap();

        let winner = commit(&repo, "main", vec![q("ex:alice", "ex:age", "30")]);

        repo.refs()
            .set_ref_in(txn.as_mut(), &branch_ref("main"), &seen)
            .unwrap();
        let err = SdkError::from(txn.commit().unwrap_err());
        assert!(err.is_retryable());
        assert_eq!(repo.resolve("main").unwrap(), winner.commit);
    }

    #[test]
    fn retry_stops_on_success_or_hard_error() {
        let calls = Cell::new(0);
        let result = with_retry(3, || {
            calls.set(calls.get() + 1);
            if calls.get() < 3 {
                Err(SdkError::Store(StoreError::TransactionConflict))
            } else {
                Ok(calls.get())
            }
        });
        assert_eq!(result.unwrap(), 3);

        calls.set(0);
        let result: SdkResult<()> = with_retry(5, || {
            calls.set(calls.get() + 1);
            Err(SdkError::InvalidOperation("no".into()))
        });
        assert!(result.is_err());
        assert_eq!(calls.get(), 1);

        calls.set(0);
        let result: SdkResult<()> = with_retry(2, || {
            calls.set(calls.get() + 1);
            Err(SdkError::Store(StoreError::TransactionConflict))
        });
        assert!(result.unwrap_err().is_retryable());
        assert_eq!(calls.get(), 2);
    }

    // ---- Test 6: signing ----

    #[test]
    fn signed_commits_verify() {
        let repo = repo();
        let key = Arc::new(SigningKey::generate());
        let signed = repo
            .commit(
                CommitRequest::new("main", ada(), "signed")
                    .with_graph(PEOPLE, vec![q("ex:alice", "ex:age", "30")])
                    .with_signer(key.clone()),
            )
            .unwrap();
        repo.verify_commit(&signed.commit, &key.verifying_key()).unwrap();

        let unsigned = commit(&repo, "main", vec![]);
        assert!(repo
            .verify_commit(&unsigned.commit, &key.verifying_key())
            .is_err());
        assert!(repo
            .verify_commit(&signed.commit, &SigningKey::generate().verifying_key())
            .is_err());
    }

    // ---- Test 7: queries ----

    #[test]
    fn diff_log_and_blame() {
        let repo = repo();
        let first = commit(&repo, "main", vec![q("ex:alice", "ex:age", "30")]);
        repo.create_tag("v1", "main").unwrap();
        let second = commit(
            &repo,
            "main",
            vec![q("ex:alice", "ex:age", "30"), q("ex:bob", "ex:age", "40")],
        );

        let changes = repo
            .diff("v1", "main")
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        assert_eq!(
            changes,
            vec![Change::add(q("ex:bob", "ex:age", "40"))]
        );

        let log: Vec<ObjectId> = repo
            .log("main", Some(2), LogMode::FirstParent)
            .unwrap()
            .map(|entry| entry.map(|(id, _)| id))
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(log, vec![second.commit, first.commit]);

        let blame: Vec<BlameEntry> = repo
            .blame(PEOPLE, "main")
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(blame.len(), 2);
        for entry in blame {
            let expected = if entry.quad.subject == "ex:bob" {
                second.commit
            } else {
                first.commit
            };
            assert_eq!(entry.commit_id, expected);
        }
    }

    // ---- Test 8: references ----

    #[test]
    fn branch_management() {
        let repo = repo();
        repo.create_branch("feature", "main").unwrap();
        assert!(matches!(
            repo.create_branch("feature", "main"),
            Err(SdkError::InvalidOperation(_))
        ));
        repo.switch_branch("feature").unwrap();
        assert_eq!(repo.current_branch().unwrap().as_deref(), Some("feature"));
        assert!(repo.delete_branch("feature").is_err());
        repo.switch_branch("main").unwrap();
        repo.delete_branch("feature").unwrap();

        let names: Vec<String> = repo
            .list_refs("refs/heads/")
            .unwrap()
            .into_iter()
            .map(|r| r.name)
            .collect();
        assert_eq!(names, vec!["refs/heads/main"]);
    }

    #[test]
    fn audit_covers_all_refs() {
        let repo = repo();
        commit(&repo, "main", vec![q("ex:alice", "ex:age", "30")]);
        repo.create_branch("feature", "main").unwrap();
        commit(
            &repo,
            "feature",
            vec![q("ex:alice", "ex:age", "30"), q("ex:bob", "ex:age", "40")],
        );
        let report = repo.audit().unwrap();
        assert_eq!(report.commits, 3);
        assert_eq!(report.blobs, 2);
    }
}
