//! Three-way merge of two commits against their merge base.
//!
//! Both sides are diffed against the base. The two change sets are checked
//! for direct quad conflicts and value conflicts, then (with a schema
//! provider) every surviving addition is validated against the state the
//! merge would produce. Only when nothing conflicts are the merged blobs,
//! tree and commit staged into the caller's transaction.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use quadgit_crypto::CommitSigner;
use quadgit_dag::HistoryWalker;
use quadgit_diff::{blob_rows, stream_diff, ChangeOp, DiffOptions, Step, SyncWalk};
use quadgit_store::{
    Blob, Commit, CommitStats, KvTransaction, Object, ObjectStore, StoreError, StoreResult, Tree,
};
use quadgit_types::{Author, CancelToken, ObjectId, Quad};

use crate::config::{DeletionPolicy, MergeConfig};
use crate::conflict::{Conflict, MergeSide, SchemaViolationKind};
use crate::error::{MergeError, MergeResult};
use crate::schema::{
    is_type_predicate, CardinalityKind, SchemaIndex, SchemaProvider, SchemaSource,
    TYPE_PREDICATES,
};

/// Authorship of the merge commit.
#[derive(Clone)]
pub struct MergeMeta {
    pub author: Author,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub signer: Option<Arc<dyn CommitSigner>>,
}

impl MergeMeta {
    pub fn new(author: Author, message: impl Into<String>) -> Self {
        Self {
            author,
            message: message.into(),
            timestamp: Utc::now(),
            signer: None,
        }
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_signer(mut self, signer: Arc<dyn CommitSigner>) -> Self {
        self.signer = Some(signer);
        self
    }
}

impl fmt::Debug for MergeMeta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MergeMeta")
            .field("author", &self.author)
            .field("message", &self.message)
            .field("timestamp", &self.timestamp)
            .field("signed", &self.signer.is_some())
            .finish()
    }
}

/// Result of a merge that did not fail.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MergeOutcome {
    /// The merge commit was staged. Its parents are `[target, source]`.
    Merged {
        commit: ObjectId,
        tree: ObjectId,
        stats: CommitStats,
    },
    /// Nothing was staged.
    Conflicted(Vec<Conflict>),
}

impl MergeOutcome {
    pub fn is_merged(&self) -> bool {
        matches!(self, Self::Merged { .. })
    }

    pub fn conflicts(&self) -> &[Conflict] {
        match self {
            Self::Merged { .. } => &[],
            Self::Conflicted(conflicts) => conflicts,
        }
    }
}

/// Changes one side made to one graph, relative to the base.
#[derive(Debug, Default)]
struct SideChanges {
    adds: BTreeSet<Quad>,
    deletes: BTreeSet<Quad>,
}

impl SideChanges {
    fn is_empty(&self) -> bool {
        self.adds.is_empty() && self.deletes.is_empty()
    }

    /// Added objects grouped by subject and predicate.
    fn slots(&self) -> BTreeMap<(&str, &str), BTreeSet<&str>> {
        let mut slots: BTreeMap<(&str, &str), BTreeSet<&str>> = BTreeMap::new();
        for quad in &self.adds {
            slots
                .entry((quad.subject.as_str(), quad.predicate.as_str()))
                .or_default()
                .insert(quad.object.as_str());
        }
        slots
    }

    fn in_slot<'a>(
        set: &'a BTreeSet<Quad>,
        subject: &'a str,
        predicate: &'a str,
    ) -> impl Iterator<Item = &'a Quad> + 'a {
        set.iter()
            .filter(move |q| q.subject == subject && q.predicate == predicate)
    }
}

type Changes = BTreeMap<String, SideChanges>;

struct MergeInputs {
    base: Tree,
    target: Tree,
    source: Tree,
    target_changes: Changes,
    source_changes: Changes,
    unchanged: SideChanges,
}

impl MergeInputs {
    fn graphs(&self) -> BTreeSet<&str> {
        self.target_changes
            .keys()
            .chain(self.source_changes.keys())
            .map(String::as_str)
            .collect()
    }

    fn graph<'a>(&'a self, graph: &'a str) -> GraphMerge<'a> {
        GraphMerge {
            graph,
            base: self.base.get(graph),
            target: self.target.get(graph),
            source: self.source.get(graph),
            ours: self.target_changes.get(graph).unwrap_or(&self.unchanged),
            theirs: self.source_changes.get(graph).unwrap_or(&self.unchanged),
        }
    }
}

/// One graph as seen from the base and both sides.
struct GraphMerge<'a> {
    graph: &'a str,
    base: Option<&'a ObjectId>,
    target: Option<&'a ObjectId>,
    source: Option<&'a ObjectId>,
    ours: &'a SideChanges,
    theirs: &'a SideChanges,
}

/// Indices for the merged schema and each side's own schema.
struct Schemas {
    merged: Arc<SchemaIndex>,
    target: Option<Arc<SchemaIndex>>,
    source: Option<Arc<SchemaIndex>>,
}

/// Schema-aware three-way merge.
#[derive(Clone)]
pub struct MergeEngine {
    store: ObjectStore,
    config: MergeConfig,
    schema: Option<Arc<dyn SchemaProvider>>,
    cancel: Option<CancelToken>,
}

impl MergeEngine {
    pub fn new(store: ObjectStore, config: MergeConfig) -> Self {
        Self {
            store,
            config,
            schema: None,
            cancel: None,
        }
    }

    /// Validate merged data against the indices `provider` supplies.
    pub fn with_schema_provider(mut self, provider: Arc<dyn SchemaProvider>) -> Self {
        self.schema = Some(provider);
        self
    }

    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn config(&self) -> &MergeConfig {
        &self.config
    }

    /// Lowest common ancestor of `target` and `source`.
    pub fn merge_base(&self, target: &ObjectId, source: &ObjectId) -> MergeResult<ObjectId> {
        let mut walker = HistoryWalker::new(self.store.clone());
        if let Some(token) = &self.cancel {
            walker = walker.with_cancel(token.clone());
        }
        Ok(walker.lowest_common_ancestor(target, source)?)
    }

    /// Merge `source` into `target` over `base`.
    ///
    /// On success the blobs, tree and commit are staged in `txn`; advancing
    /// a reference is up to the caller. On conflict `txn` is left untouched.
    pub fn merge(
        &self,
        txn: &mut dyn KvTransaction,
        base: &ObjectId,
        target: &ObjectId,
        source: &ObjectId,
        meta: &MergeMeta,
    ) -> MergeResult<MergeOutcome> {
        let target_commit = self.store.read_commit(target)?;
        let base_tree = self.store.commit_tree(Some(base))?;
        let target_tree = self.store.read_tree(&target_commit.tree)?;
        let source_tree = self.store.commit_tree(Some(source))?;

        let inputs = MergeInputs {
            target_changes: self.collect_changes(&base_tree, &target_tree)?,
            source_changes: self.collect_changes(&base_tree, &source_tree)?,
            base: base_tree,
            target: target_tree,
            source: source_tree,
            unchanged: SideChanges::default(),
        };
        let graphs = inputs.graphs();
        debug!(
            base = %base.short_hex(),
            target = %target.short_hex(),
            source = %source.short_hex(),
            graphs = graphs.len(),
            "merging"
        );

        let mut conflicts = Vec::new();
        let schema_graph = self.config.schema_graph.as_deref();
        if let Some(graph) = schema_graph {
            let schema = inputs.graph(graph);
            self.check_deletions(&schema, &mut conflicts);
            self.check_values(&schema, &mut conflicts)?;
            if !conflicts.is_empty() {
                warn!(graph, conflicts = conflicts.len(), "schema graph conflicts, merge halted");
                return Ok(MergeOutcome::Conflicted(conflicts));
            }
        }
        let schemas = self.load_schemas(&inputs, schema_graph)?;

        for graph in graphs.iter().filter(|g| Some(**g) != schema_graph) {
            self.check_cancel()?;
            let view = inputs.graph(graph);
            self.check_deletions(&view, &mut conflicts);
            let contested = self.check_values(&view, &mut conflicts)?;
            if let Some(schemas) = &schemas {
                self.check_schema(&view, schemas, &contested, &mut conflicts)?;
            }
        }
        if !conflicts.is_empty() {
            warn!(
                target = %target.short_hex(),
                source = %source.short_hex(),
                conflicts = conflicts.len(),
                "merge conflicted"
            );
            return Ok(MergeOutcome::Conflicted(conflicts));
        }

        let mut tree = inputs.target.clone();
        let mut stats = CommitStats::default();
        for graph in &graphs {
            self.check_cancel()?;
            let view = inputs.graph(graph);
            if view.theirs.is_empty() {
                continue;
            }
            stats.added += view.theirs.adds.difference(&view.ours.adds).count() as u64;
            stats.deleted += view.theirs.deletes.difference(&view.ours.deletes).count() as u64;

            let blob = if view.ours.is_empty() || view.target == view.source {
                view.source.copied()
            } else {
                self.synthesize(txn, &view)?
            };
            match blob {
                Some(id) => tree.insert(*graph, id),
                None => {
                    tree.remove(graph);
                }
            }
        }
        stats.total_quads = (target_commit.stats.total_quads + stats.added)
            .saturating_sub(stats.deleted);

        let tree_id = self.store.put_in(txn, &Object::Tree(tree))?;
        let mut commit = Commit {
            tree: tree_id,
            parents: vec![*target, *source],
            author: meta.author.clone(),
            message: meta.message.clone(),
            timestamp: meta.timestamp,
            stats,
            signature: None,
        };
        if let Some(signer) = &meta.signer {
            commit.sign(signer.as_ref())?;
        }
        let commit_id = self.store.put_in(txn, &Object::Commit(commit))?;
        info!(
            commit = %commit_id.short_hex(),
            target = %target.short_hex(),
            source = %source.short_hex(),
            added = stats.added,
            deleted = stats.deleted,
            "merge staged"
        );
        Ok(MergeOutcome::Merged {
            commit: commit_id,
            tree: tree_id,
            stats,
        })
    }

    fn check_cancel(&self) -> MergeResult<()> {
        if self.cancel.as_ref().is_some_and(CancelToken::is_cancelled) {
            return Err(MergeError::Cancelled);
        }
        Ok(())
    }

    fn collect_changes(&self, from: &Tree, to: &Tree) -> MergeResult<Changes> {
        let mut options = DiffOptions::new();
        if let Some(token) = &self.cancel {
            options = options.cancel(token.clone());
        }
        let mut changes = Changes::new();
        for change in stream_diff(&self.store, Some(from), to, options) {
            let change = change?;
            let side = changes.entry(change.graph).or_default();
            let set = match change.op {
                ChangeOp::Add => &mut side.adds,
                ChangeOp::Delete => &mut side.deletes,
            };
            set.insert(change.quad);
        }
        Ok(changes)
    }

    // ---- Conflict detection ----

    fn check_deletions(&self, view: &GraphMerge<'_>, out: &mut Vec<Conflict>) {
        let sides = [
            (MergeSide::Source, view.theirs, view.ours),
            (MergeSide::Target, view.ours, view.theirs),
        ];
        for (deleted_by, deleter, holder) in sides {
            for quad in &deleter.deletes {
                let conflicted = match self.config.deletion_policy {
                    // The base held `quad`, so the holder keeps it unless it
                    // deleted it too, whatever else it changed.
                    DeletionPolicy::Strict => !holder.deletes.contains(quad),
                    // Base-relative additions never include a base quad.
                    DeletionPolicy::ThreeWay => false,
                };
                if conflicted {
                    out.push(Conflict::DirectQuad {
                        quad: quad.clone(),
                        deleted_by,
                    });
                }
            }
        }
    }

    /// Report slots both sides assigned differently. Returns the contested
    /// `(subject, predicate)` pairs.
    fn check_values(
        &self,
        view: &GraphMerge<'_>,
        out: &mut Vec<Conflict>,
    ) -> MergeResult<BTreeSet<(String, String)>> {
        let ours = view.ours.slots();
        let theirs = view.theirs.slots();
        let mut contested = BTreeSet::new();
        for (slot, target_values) in &ours {
            let Some(source_values) = theirs.get(slot) else {
                continue;
            };
            if target_values == source_values {
                continue;
            }
            let (subject, predicate) = *slot;
            let base_values = match view.base {
                Some(blob) => self.store.slot_objects(blob, subject, predicate, 2)?,
                None => Vec::new(),
            };
            if base_values.len() > 1 {
                continue;
            }
            out.push(Conflict::Value {
                graph: view.graph.to_string(),
                subject: subject.to_string(),
                predicate: predicate.to_string(),
                base_values,
                target_values: target_values.iter().map(|v| v.to_string()).collect(),
                source_values: source_values.iter().map(|v| v.to_string()).collect(),
            });
            contested.insert((subject.to_string(), predicate.to_string()));
        }
        Ok(contested)
    }

    // ---- Schema validation ----

    fn load_schemas(
        &self,
        inputs: &MergeInputs,
        schema_graph: Option<&str>,
    ) -> MergeResult<Option<Schemas>> {
        let Some(provider) = &self.schema else {
            return Ok(None);
        };
        let Some(graph) = schema_graph else {
            let index = provider.index_for(SchemaSource {
                version: None,
                quads: &[],
            })?;
            return Ok(index.map(|merged| Schemas {
                target: Some(merged.clone()),
                source: Some(merged.clone()),
                merged,
            }));
        };

        let view = inputs.graph(graph);
        let target_quads = read_quads(&self.store, view.target)?;
        let source_quads = read_quads(&self.store, view.source)?;
        let merged = Blob::new(
            graph,
            target_quads
                .iter()
                .filter(|q| !view.theirs.deletes.contains(*q))
                .chain(&view.theirs.adds)
                .cloned()
                .collect(),
        )?;
        let version = (!merged.is_empty()).then(|| merged.id());

        let Some(merged_index) = provider.index_for(SchemaSource {
            version: version.as_ref(),
            quads: merged.quads(),
        })?
        else {
            return Ok(None);
        };
        debug!(
            graph,
            version = ?version.map(|v| v.short_hex()),
            "validating against merged schema"
        );
        Ok(Some(Schemas {
            merged: merged_index,
            target: provider.index_for(SchemaSource {
                version: view.target,
                quads: &target_quads,
            })?,
            source: provider.index_for(SchemaSource {
                version: view.source,
                quads: &source_quads,
            })?,
        }))
    }

    fn check_schema(
        &self,
        view: &GraphMerge<'_>,
        schemas: &Schemas,
        contested: &BTreeSet<(String, String)>,
        out: &mut Vec<Conflict>,
    ) -> MergeResult<()> {
        let mut seen_slots = BTreeSet::new();
        let mut seen_pairs = BTreeSet::new();
        for quad in view.ours.adds.iter().chain(&view.theirs.adds) {
            let (subject, predicate) = (quad.subject.as_str(), quad.predicate.as_str());
            if contested.contains(&(subject.to_string(), predicate.to_string())) {
                continue;
            }
            if let Some((max, kind)) = schemas.merged.max_values(predicate) {
                if seen_slots.insert((subject, predicate)) {
                    self.check_cardinality(view, schemas, subject, predicate, max, kind, out)?;
                }
            }
            if is_type_predicate(predicate) {
                let class = quad.object.as_str();
                for other in schemas.merged.disjoint_with(class) {
                    let pair = if class < other.as_str() {
                        (class, other.as_str())
                    } else {
                        (other.as_str(), class)
                    };
                    if seen_pairs.insert((subject, pair)) {
                        self.check_disjoint(view, schemas, subject, class, other, out)?;
                    }
                }
            }
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn check_cardinality(
        &self,
        view: &GraphMerge<'_>,
        schemas: &Schemas,
        subject: &str,
        predicate: &str,
        max: u64,
        kind: CardinalityKind,
        out: &mut Vec<Conflict>,
    ) -> MergeResult<()> {
        let source_deletes = SideChanges::in_slot(&view.theirs.deletes, subject, predicate).count();
        // Enough target values to prove the bound is exceeded even after
        // every source deletion in the slot.
        let limit = bound_limit(max).saturating_add(source_deletes);
        let target_values = self.slot_values(view.target, subject, predicate, limit)?;

        let mut merged: BTreeSet<&str> = target_values
            .iter()
            .map(String::as_str)
            .filter(|object| {
                !SideChanges::in_slot(&view.theirs.deletes, subject, predicate)
                    .any(|q| q.object == *object)
            })
            .collect();
        merged.extend(
            SideChanges::in_slot(&view.theirs.adds, subject, predicate).map(|q| q.object.as_str()),
        );
        if merged.len() as u64 <= max {
            return Ok(());
        }

        if self.exceeds_own_bound(view.target, schemas.target.as_deref(), subject, predicate)?
            || self.exceeds_own_bound(view.source, schemas.source.as_deref(), subject, predicate)?
        {
            debug!(subject, predicate, "cardinality violation predates the merge");
            return Ok(());
        }
        let violation = match kind {
            CardinalityKind::Functional => SchemaViolationKind::FunctionalProperty,
            CardinalityKind::MaxCardinality => SchemaViolationKind::MaxCardinality { max },
        };
        out.push(Conflict::SchemaViolation {
            violation,
            graph: view.graph.to_string(),
            subject: subject.to_string(),
            constraint: predicate.to_string(),
            target_values,
            source_values: self.slot_values(view.source, subject, predicate, limit)?,
        });
        Ok(())
    }

    fn check_disjoint(
        &self,
        view: &GraphMerge<'_>,
        schemas: &Schemas,
        subject: &str,
        class: &str,
        other: &str,
        out: &mut Vec<Conflict>,
    ) -> MergeResult<()> {
        // `class` comes from a surviving addition, so the merged state holds it.
        if !self.merged_has_type(view, subject, other)? {
            return Ok(());
        }
        let target_classes = self.classes_of(view.target, view.graph, subject, [class, other])?;
        let source_classes = self.classes_of(view.source, view.graph, subject, [class, other])?;
        let violated_by = |classes: &Vec<String>, index: Option<&SchemaIndex>| {
            classes.len() == 2 && index.is_some_and(|i| i.are_disjoint(class, other))
        };
        if violated_by(&target_classes, schemas.target.as_deref())
            || violated_by(&source_classes, schemas.source.as_deref())
        {
            debug!(subject, class, other, "disjointness violation predates the merge");
            return Ok(());
        }
        out.push(Conflict::SchemaViolation {
            violation: SchemaViolationKind::DisjointClasses {
                with: other.to_string(),
            },
            graph: view.graph.to_string(),
            subject: subject.to_string(),
            constraint: class.to_string(),
            target_values: target_classes,
            source_values: source_classes,
        });
        Ok(())
    }

    fn slot_values(
        &self,
        blob: Option<&ObjectId>,
        subject: &str,
        predicate: &str,
        limit: usize,
    ) -> StoreResult<Vec<String>> {
        match blob {
            Some(id) => self.store.slot_objects(id, subject, predicate, limit),
            None => Ok(Vec::new()),
        }
    }

    fn exceeds_own_bound(
        &self,
        blob: Option<&ObjectId>,
        index: Option<&SchemaIndex>,
        subject: &str,
        predicate: &str,
    ) -> StoreResult<bool> {
        let Some((max, _)) = index.and_then(|i| i.max_values(predicate)) else {
            return Ok(false);
        };
        let values = self.slot_values(blob, subject, predicate, bound_limit(max))?;
        Ok(values.len() as u64 > max)
    }

    fn has_quad(&self, blob: Option<&ObjectId>, quad: &Quad) -> StoreResult<bool> {
        match blob {
            Some(id) => self.store.blob_contains(id, quad),
            None => Ok(false),
        }
    }

    fn merged_has_type(
        &self,
        view: &GraphMerge<'_>,
        subject: &str,
        class: &str,
    ) -> StoreResult<bool> {
        for predicate in TYPE_PREDICATES {
            let quad = Quad::new(subject, predicate, class, view.graph);
            if view.theirs.adds.contains(&quad) {
                return Ok(true);
            }
            if !view.theirs.deletes.contains(&quad) && self.has_quad(view.target, &quad)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Which of `classes` the subject is typed with in `blob`.
    fn classes_of(
        &self,
        blob: Option<&ObjectId>,
        graph: &str,
        subject: &str,
        classes: [&str; 2],
    ) -> StoreResult<Vec<String>> {
        let mut held = Vec::new();
        for class in classes {
            for predicate in TYPE_PREDICATES {
                if self.has_quad(blob, &Quad::new(subject, predicate, class, graph))? {
                    held.push(class.to_string());
                    break;
                }
            }
        }
        Ok(held)
    }

    // ---- Synthesis ----

    /// Apply the source's changes onto the target's blob in one streaming
    /// pass.
    fn synthesize(
        &self,
        txn: &mut dyn KvTransaction,
        view: &GraphMerge<'_>,
    ) -> MergeResult<Option<ObjectId>> {
        let store = &self.store;
        let target = view.target;
        let adds = &view.theirs.adds;
        let deletes = &view.theirs.deletes;
        let id = self.store.write_blob_from(txn, view.graph, move || {
            let rows = blob_rows(store, target)?;
            let walk = SyncWalk::new(rows, adds.iter().cloned().map(Ok::<Quad, StoreError>));
            Ok(walk.filter_map(move |step| match step {
                Ok(Step::Left(quad) | Step::Right(quad) | Step::Both(quad)) => {
                    (!deletes.contains(&quad)).then_some(Ok(quad))
                }
                Err(e) => Some(Err(e)),
            }))
        })?;
        debug!(
            graph = view.graph,
            blob = ?id.map(|id| id.short_hex()),
            "synthesized merged graph"
        );
        Ok(id)
    }
}

impl fmt::Debug for MergeEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MergeEngine")
            .field("config", &self.config)
            .field("schema", &self.schema.is_some())
            .finish()
    }
}

/// Values to fetch to tell whether a slot holds more than `max`.
fn bound_limit(max: u64) -> usize {
    usize::try_from(max).unwrap_or(usize::MAX).saturating_add(1)
}

fn read_quads(store: &ObjectStore, blob: Option<&ObjectId>) -> StoreResult<Vec<Quad>> {
    blob_rows(store, blob)?.collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use chrono::TimeZone;
    use quadgit_crypto::SigningKey;
    use quadgit_store::{Keyspace, MemoryKv};

    use crate::conflict::ConflictKind;
    use crate::schema::{GraphSchemaProvider, StaticSchema};

    struct Fixture {
        store: ObjectStore,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                store: ObjectStore::new(Arc::new(MemoryKv::new()), Keyspace::default()),
            }
        }

        /// Commit exactly `quads` (one blob per graph) on top of `parents`.
        fn commit(&self, parents: &[ObjectId], quads: &[Quad]) -> ObjectId {
            let mut by_graph: BTreeMap<String, Vec<Quad>> = BTreeMap::new();
            for quad in quads {
                by_graph.entry(quad.graph.clone()).or_default().push(quad.clone());
            }
            let mut txn = self.store.backend().begin().unwrap();
            let mut tree = Tree::empty();
            for (graph, quads) in by_graph {
                if let Some(id) = self.store.write_graph(txn.as_mut(), &graph, quads).unwrap() {
                    tree.insert(graph, id);
                }
            }
            let tree = self.store.put_in(txn.as_mut(), &Object::Tree(tree)).unwrap();
            let commit = Commit {
                tree,
                parents: parents.to_vec(),
                author: Author::new("Test", "test@example.org"),
                message: "test".into(),
                timestamp: Utc.timestamp_opt(1_700_000_000 + parents.len() as i64, 0).unwrap(),
                stats: CommitStats {
                    total_quads: quads.len() as u64,
                    ..Default::default()
                },
                signature: None,
            };
            let id = self.store.put_in(txn.as_mut(), &Object::Commit(commit)).unwrap();
            txn.commit().unwrap();
            id
        }

        /// Run a merge; returns the outcome and the number of staged writes.
        fn merge(
            &self,
            engine: &MergeEngine,
            base: ObjectId,
            target: ObjectId,
            source: ObjectId,
        ) -> (MergeOutcome, usize) {
            let mut txn = self.store.backend().begin().unwrap();
            let outcome = engine
                .merge(txn.as_mut(), &base, &target, &source, &meta())
                .unwrap();
            let pending = txn.pending();
            txn.commit().unwrap();
            (outcome, pending)
        }

        fn state(&self, commit: &ObjectId) -> BTreeSet<Quad> {
            let tree = self.store.commit_tree(Some(commit)).unwrap();
            tree.iter()
                .flat_map(|(_, blob)| self.store.blob_cursor(blob).unwrap())
                .map(Result::unwrap)
                .collect()
        }

        fn engine(&self) -> MergeEngine {
            MergeEngine::new(self.store.clone(), MergeConfig::default())
        }
    }

    fn meta() -> MergeMeta {
        MergeMeta::new(Author::new("Merger", "merge@example.org"), "merge")
            .with_timestamp(Utc.timestamp_opt(1_800_000_000, 0).unwrap())
    }

    fn q(s: &str, p: &str, o: &str) -> Quad {
        Quad::new(s, p, o, "ex:people")
    }

    fn merged_commit(outcome: &MergeOutcome) -> ObjectId {
        match outcome {
            MergeOutcome::Merged { commit, .. } => *commit,
            MergeOutcome::Conflicted(c) => panic!("unexpected conflicts: {c:?}"),
        }
    }

    // ---- Test 1: Clean merge ----

    #[test]
    fn disjoint_changes_merge_cleanly() {
        let f = Fixture::new();
        let alice = q("ex:alice", "ex:name", "\"Alice\"");
        let bob = q("ex:bob", "ex:name", "\"Bob\"");
        let dave = q("ex:dave", "ex:name", "\"Dave\"");
        let carol = Quad::new("ex:carol", "ex:name", "\"Carol\"", "ex:staff");

        let base = f.commit(&[], &[alice.clone()]);
        let target = f.commit(&[base], &[alice.clone(), bob.clone()]);
        let source = f.commit(&[base], &[alice.clone(), dave.clone(), carol.clone()]);

        let (outcome, _) = f.merge(&f.engine(), base, target, source);
        let commit = merged_commit(&outcome);
        assert_eq!(
            f.state(&commit),
            BTreeSet::from([alice, bob, dave, carol])
        );

        let stored = f.store.read_commit(&commit).unwrap();
        assert_eq!(stored.parents, vec![target, source]);
        assert_eq!(stored.stats.added, 2);
        assert_eq!(stored.stats.deleted, 0);
        assert_eq!(stored.stats.total_quads, 4);
    }

    // ---- Test 2: Value conflict ----

    #[test]
    fn differing_values_conflict_and_stage_nothing() {
        let f = Fixture::new();
        let alice = q("ex:alice", "ex:name", "\"Alice\"");
        let base = f.commit(&[], &[alice.clone()]);
        let target = f.commit(&[base], &[alice.clone(), q("ex:alice", "ex:age", "30")]);
        let source = f.commit(&[base], &[alice, q("ex:alice", "ex:age", "31")]);

        let (outcome, pending) = f.merge(&f.engine(), base, target, source);
        assert_eq!(pending, 0);
        let conflicts = outcome.conflicts();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(
            conflicts[0],
            Conflict::Value {
                graph: "ex:people".into(),
                subject: "ex:alice".into(),
                predicate: "ex:age".into(),
                base_values: vec![],
                target_values: vec!["30".into()],
                source_values: vec!["31".into()],
            }
        );
    }

    // ---- Test 3: Replacing a single base value ----

    #[test]
    fn replacing_a_single_value_differently_conflicts() {
        let f = Fixture::new();
        let base = f.commit(&[], &[q("ex:alice", "ex:age", "29")]);
        let target = f.commit(&[base], &[q("ex:alice", "ex:age", "30")]);
        let source = f.commit(&[base], &[q("ex:alice", "ex:age", "31")]);

        let (outcome, _) = f.merge(&f.engine(), base, target, source);
        let conflicts = outcome.conflicts();
        assert_eq!(conflicts.len(), 1);
        match &conflicts[0] {
            Conflict::Value { base_values, .. } => assert_eq!(base_values, &vec!["29".to_string()]),
            other => panic!("expected a value conflict, got {other:?}"),
        }
    }

    #[test]
    fn identical_replacements_merge() {
        let f = Fixture::new();
        let base = f.commit(&[], &[q("ex:alice", "ex:age", "29")]);
        let target = f.commit(&[base], &[q("ex:alice", "ex:age", "30")]);
        let source = f.commit(&[base], &[q("ex:alice", "ex:age", "30")]);

        let (outcome, _) = f.merge(&f.engine(), base, target, source);
        let commit = merged_commit(&outcome);
        assert_eq!(f.state(&commit), BTreeSet::from([q("ex:alice", "ex:age", "30")]));
    }

    #[test]
    fn multi_valued_base_slot_accepts_both_additions() {
        let f = Fixture::new();
        let a = q("ex:alice", "ex:nick", "\"a\"");
        let b = q("ex:alice", "ex:nick", "\"b\"");
        let c = q("ex:alice", "ex:nick", "\"c\"");
        let d = q("ex:alice", "ex:nick", "\"d\"");
        let base = f.commit(&[], &[a.clone(), b.clone()]);
        let target = f.commit(&[base], &[a.clone(), b.clone(), c.clone()]);
        let source = f.commit(&[base], &[a.clone(), b.clone(), d.clone()]);

        let (outcome, _) = f.merge(&f.engine(), base, target, source);
        let commit = merged_commit(&outcome);
        assert_eq!(f.state(&commit), BTreeSet::from([a, b, c, d]));
    }

    // ---- Test 4: Deletion policies ----

    #[test]
    fn strict_policy_flags_deletions_the_other_side_kept() {
        let f = Fixture::new();
        let x1 = q("ex:x", "ex:p", "1");
        let x2 = q("ex:x", "ex:p", "2");
        let x3 = q("ex:x", "ex:p", "3");
        let base = f.commit(&[], &[x1.clone(), x2.clone(), x3.clone()]);
        let target = f.commit(&[base], &[x2.clone(), x3.clone()]);
        let source = f.commit(&[base], &[x1.clone(), x3.clone()]);

        let (outcome, pending) = f.merge(&f.engine(), base, target, source);
        assert_eq!(pending, 0);
        let conflicts = outcome.conflicts();
        assert_eq!(conflicts.len(), 2);
        assert!(conflicts.contains(&Conflict::DirectQuad {
            quad: x2,
            deleted_by: MergeSide::Source,
        }));
        assert!(conflicts.contains(&Conflict::DirectQuad {
            quad: x1,
            deleted_by: MergeSide::Target,
        }));
    }

    #[test]
    fn three_way_policy_applies_both_deletions() {
        let f = Fixture::new();
        let x1 = q("ex:x", "ex:p", "1");
        let x2 = q("ex:x", "ex:p", "2");
        let x3 = q("ex:x", "ex:p", "3");
        let base = f.commit(&[], &[x1.clone(), x2.clone(), x3.clone()]);
        let target = f.commit(&[base], &[x2.clone(), x3.clone()]);
        let source = f.commit(&[base], &[x1, x3.clone()]);

        let engine = MergeEngine::new(
            f.store.clone(),
            MergeConfig::default().with_deletion_policy(DeletionPolicy::ThreeWay),
        );
        let (outcome, _) = f.merge(&engine, base, target, source);
        let commit = merged_commit(&outcome);
        assert_eq!(f.state(&commit), BTreeSet::from([x3]));
        let stats = f.store.read_commit(&commit).unwrap().stats;
        assert_eq!((stats.added, stats.deleted, stats.total_quads), (0, 1, 1));
    }

    // ---- Test 5: One-sided changes ----

    #[test]
    fn graph_deleted_on_one_side_conflicts_under_strict() {
        let f = Fixture::new();
        let kept = q("ex:alice", "ex:name", "\"Alice\"");
        let doomed = Quad::new("ex:tmp", "ex:p", "1", "ex:scratch");
        let bob = q("ex:bob", "ex:name", "\"Bob\"");
        let base = f.commit(&[], &[kept.clone(), doomed.clone()]);
        let target = f.commit(&[base], &[kept.clone(), doomed.clone(), bob.clone()]);
        let source = f.commit(&[base], &[kept.clone()]);

        let (outcome, _) = f.merge(&f.engine(), base, target, source);
        assert_eq!(
            outcome.conflicts(),
            &[Conflict::DirectQuad {
                quad: doomed,
                deleted_by: MergeSide::Source,
            }]
        );

        let engine = MergeEngine::new(
            f.store.clone(),
            MergeConfig::default().with_deletion_policy(DeletionPolicy::ThreeWay),
        );
        let (outcome, _) = f.merge(&engine, base, target, source);
        let commit = merged_commit(&outcome);
        let tree = f.store.commit_tree(Some(&commit)).unwrap();
        assert!(tree.get("ex:scratch").is_none());
        assert_eq!(f.state(&commit), BTreeSet::from([kept, bob]));
    }

    #[test]
    fn deletion_conflict_ignores_unrelated_edits() {
        let f = Fixture::new();
        let x1 = q("ex:x", "ex:p", "1");
        let y = q("ex:y", "ex:p", "1");
        let base = f.commit(&[], &[x1.clone(), y.clone()]);
        let target = f.commit(&[base], &[y.clone()]);
        let expected = [Conflict::DirectQuad {
            quad: x1.clone(),
            deleted_by: MergeSide::Target,
        }];

        // The unrelated addition lands in the same graph, then in another.
        for z in [
            q("ex:z", "ex:p", "1"),
            Quad::new("ex:z", "ex:p", "1", "ex:other"),
        ] {
            let source = f.commit(&[base], &[x1.clone(), y.clone(), z.clone()]);
            let (outcome, pending) = f.merge(&f.engine(), base, target, source);
            assert_eq!(pending, 0);
            assert_eq!(outcome.conflicts(), &expected, "addition in {}", z.graph);
        }
    }

    #[test]
    fn unchanged_target_takes_source_blob() {
        let f = Fixture::new();
        let base = f.commit(&[], &[q("ex:a", "ex:p", "1")]);
        let source = f.commit(&[base], &[q("ex:a", "ex:p", "2")]);

        let (outcome, _) = f.merge(&f.engine(), base, base, source);
        let commit = merged_commit(&outcome);
        let merged = f.store.commit_tree(Some(&commit)).unwrap();
        let theirs = f.store.commit_tree(Some(&source)).unwrap();
        assert_eq!(merged, theirs);
    }

    // ---- Test 6: Cardinality constraints ----

    #[test]
    fn combined_additions_exceeding_max_cardinality_conflict() {
        let f = Fixture::new();
        let mut index = SchemaIndex::new();
        index.add_max_cardinality("ex:nick", 3);
        let engine = f
            .engine()
            .with_schema_provider(Arc::new(StaticSchema::new(index)));

        let a = q("ex:alice", "ex:nick", "\"a\"");
        let b = q("ex:alice", "ex:nick", "\"b\"");
        let base = f.commit(&[], &[a.clone(), b.clone()]);
        let target = f.commit(&[base], &[a.clone(), b.clone(), q("ex:alice", "ex:nick", "\"c\"")]);
        let source = f.commit(&[base], &[a, b, q("ex:alice", "ex:nick", "\"d\"")]);

        let (outcome, pending) = f.merge(&engine, base, target, source);
        assert_eq!(pending, 0);
        let conflicts = outcome.conflicts();
        assert_eq!(conflicts.len(), 1);
        match &conflicts[0] {
            Conflict::SchemaViolation {
                violation,
                constraint,
                target_values,
                source_values,
                ..
            } => {
                assert_eq!(violation, &SchemaViolationKind::MaxCardinality { max: 3 });
                assert_eq!(constraint, "ex:nick");
                assert_eq!(target_values.len(), 3);
                assert_eq!(source_values.len(), 3);
            }
            other => panic!("expected a schema violation, got {other:?}"),
        }
    }

    #[test]
    fn schema_change_can_make_existing_data_invalid() {
        let f = Fixture::new();
        let schema = |s: &str, p: &str, o: &str| Quad::new(s, p, o, "ex:schema");
        let label = schema("ex:age", "rdfs:label", "\"age\"");
        let functional = schema("ex:age", "rdf:type", "owl:FunctionalProperty");
        let age30 = q("ex:alice", "ex:age", "30");
        let age31 = q("ex:alice", "ex:age", "31");

        let base = f.commit(&[], &[label.clone(), age30.clone()]);
        // Target records a second age, which its own schema allows.
        let target = f.commit(&[base], &[label.clone(), age30.clone(), age31]);
        // Source makes the property functional, which its own data satisfies.
        let source = f.commit(&[base], &[label, functional, age30]);

        let engine = MergeEngine::new(
            f.store.clone(),
            MergeConfig::default().with_schema_graph("ex:schema"),
        )
        .with_schema_provider(Arc::new(GraphSchemaProvider::new()));
        let (outcome, _) = f.merge(&engine, base, target, source);
        let conflicts = outcome.conflicts();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].kind(), ConflictKind::SchemaViolation);
        assert_eq!(conflicts[0].graph(), "ex:people");
        assert!(matches!(
            &conflicts[0],
            Conflict::SchemaViolation {
                violation: SchemaViolationKind::FunctionalProperty,
                ..
            }
        ));
    }

    #[test]
    fn violations_already_on_one_side_are_not_reported() {
        let f = Fixture::new();
        let mut index = SchemaIndex::new();
        index.add_functional("ex:age");
        let engine = f
            .engine()
            .with_schema_provider(Arc::new(StaticSchema::new(index)));

        let base = f.commit(&[], &[q("ex:alice", "ex:name", "\"Alice\"")]);
        let target = f.commit(
            &[base],
            &[
                q("ex:alice", "ex:name", "\"Alice\""),
                q("ex:alice", "ex:age", "30"),
                q("ex:alice", "ex:age", "31"),
            ],
        );
        let source = f.commit(
            &[base],
            &[
                q("ex:alice", "ex:name", "\"Alice\""),
                q("ex:bob", "ex:name", "\"Bob\""),
            ],
        );
        let (outcome, _) = f.merge(&engine, base, target, source);
        assert!(outcome.is_merged());
    }

    // ---- Test 7: Disjoint classes ----

    #[test]
    fn disjoint_types_from_both_sides_conflict() {
        let f = Fixture::new();
        let mut index = SchemaIndex::new();
        index.add_disjoint("ex:Cat", "ex:Dog");
        let engine = f
            .engine()
            .with_schema_provider(Arc::new(StaticSchema::new(index)));

        let person = q("ex:rex", "rdf:type", "ex:Pet");
        let agent = q("ex:rex", "rdf:type", "ex:Animal");
        let base = f.commit(&[], &[person.clone(), agent.clone()]);
        let target = f.commit(
            &[base],
            &[person.clone(), agent.clone(), q("ex:rex", "rdf:type", "ex:Cat")],
        );
        let source = f.commit(&[base], &[person, agent, q("ex:rex", "rdf:type", "ex:Dog")]);

        let (outcome, _) = f.merge(&engine, base, target, source);
        let conflicts = outcome.conflicts();
        assert_eq!(conflicts.len(), 1);
        match &conflicts[0] {
            Conflict::SchemaViolation {
                violation: SchemaViolationKind::DisjointClasses { with },
                subject,
                constraint,
                target_values,
                source_values,
                ..
            } => {
                assert_eq!(subject, "ex:rex");
                assert_eq!(
                    BTreeSet::from([constraint.as_str(), with.as_str()]),
                    BTreeSet::from(["ex:Cat", "ex:Dog"])
                );
                assert_eq!(target_values, &vec!["ex:Cat".to_string()]);
                assert_eq!(source_values, &vec!["ex:Dog".to_string()]);
            }
            other => panic!("expected a disjointness violation, got {other:?}"),
        }
    }

    // ---- Test 8: Schema first ----

    #[test]
    fn schema_conflict_halts_before_data() {
        let f = Fixture::new();
        let schema = |o: &str| Quad::new("ex:age", "rdfs:comment", o, "ex:schema");
        let base = f.commit(&[], &[q("ex:alice", "ex:name", "\"Alice\"")]);
        let target = f.commit(
            &[base],
            &[schema("\"years\""), q("ex:alice", "ex:age", "30")],
        );
        let source = f.commit(
            &[base],
            &[schema("\"age in years\""), q("ex:alice", "ex:age", "31")],
        );

        let engine = MergeEngine::new(
            f.store.clone(),
            MergeConfig::default().with_schema_graph("ex:schema"),
        );
        let (outcome, pending) = f.merge(&engine, base, target, source);
        assert_eq!(pending, 0);
        let conflicts = outcome.conflicts();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].graph(), "ex:schema");
    }

    // ---- Test 9: Merge commit metadata ----

    #[test]
    fn merge_commit_can_be_signed() {
        let f = Fixture::new();
        let base = f.commit(&[], &[q("ex:a", "ex:p", "1")]);
        let target = f.commit(&[base], &[q("ex:a", "ex:p", "1"), q("ex:b", "ex:p", "1")]);
        let source = f.commit(&[base], &[q("ex:a", "ex:p", "1"), q("ex:c", "ex:p", "1")]);

        let key = SigningKey::generate();
        let verifier = key.verifying_key();
        let meta = meta().with_signer(Arc::new(key));
        let mut txn = f.store.backend().begin().unwrap();
        let outcome = f
            .engine()
            .merge(txn.as_mut(), &base, &target, &source, &meta)
            .unwrap();
        txn.commit().unwrap();

        let commit = f.store.read_commit(&merged_commit(&outcome)).unwrap();
        assert!(commit.verify_signature(&verifier).is_ok());
        assert_eq!(commit.message, "merge");
    }

    #[test]
    fn merge_base_is_the_fork_point() {
        let f = Fixture::new();
        let root = f.commit(&[], &[]);
        let fork = f.commit(&[root], &[q("ex:a", "ex:p", "1")]);
        let left = f.commit(&[fork], &[q("ex:a", "ex:p", "2")]);
        let right = f.commit(&[fork], &[q("ex:a", "ex:p", "3")]);
        assert_eq!(f.engine().merge_base(&left, &right).unwrap(), fork);
    }

    // ---- Test 10: Cancellation ----

    #[test]
    fn cancelled_merge_stages_nothing() {
        let f = Fixture::new();
        let base = f.commit(&[], &[q("ex:a", "ex:p", "1")]);
        let target = f.commit(&[base], &[q("ex:b", "ex:p", "1")]);
        let source = f.commit(&[base], &[q("ex:c", "ex:p", "1")]);

        let token = CancelToken::new();
        token.cancel();
        let engine = f.engine().with_cancel(token);
        let mut txn = f.store.backend().begin().unwrap();
        let err = engine
            .merge(txn.as_mut(), &base, &target, &source, &meta())
            .unwrap_err();
        assert!(matches!(err, MergeError::Cancelled));
        assert_eq!(txn.pending(), 0);
    }
}
