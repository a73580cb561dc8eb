//! Transactional graph mutation.
//!
//! Every change to the graph goes through [`GraphUpdater`]: operations are
//! buffered into a [`Transaction`], validated by ordered conflict passes,
//! then applied under the store's write lock. A batch that fails validation
//! is `FAILED` (nothing applied); a batch that errors mid-apply is reversed
//! with the inverse operations recorded during forward application and ends
//! `ROLLED_BACK`.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::model::{AssetNode, DependencyEdge, EdgeKey, Guid};
use crate::store::{EdgeDelta, GraphStore};
use crate::{GraphError, Result};

/// A single buffered mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum GraphOp {
    AddNode(AssetNode),
    UpdateNode(AssetNode),
    /// Deactivates the node (lifecycle keeps history; nothing is hard-deleted).
    RemoveNode(Guid),
    AddEdge(DependencyEdge),
    RemoveEdge(EdgeKey),
}

impl GraphOp {
    fn describe(&self) -> String {
        match self {
            Self::AddNode(n) => format!("add_node {}", n.guid),
            Self::UpdateNode(n) => format!("update_node {}", n.guid),
            Self::RemoveNode(g) => format!("remove_node {g}"),
            Self::AddEdge(e) => format!("add_edge {} -> {}", e.source, e.target),
            Self::RemoveEdge(k) => format!("remove_edge {} -> {}", k.source, k.target),
        }
    }
}

/// Inverse bookkeeping captured while applying, consumed on rollback.
enum AppliedOp {
    AddedNode(Guid),
    UpdatedNode(AssetNode),
    DeactivatedNode(AssetNode, Vec<(EdgeKey, bool)>),
    AddedEdge(EdgeKey),
    RemovedEdge(DependencyEdge),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Pending,
    Committed,
    /// Rejected by conflict detection; nothing was applied.
    Failed,
    /// A mid-apply error forced reversal of already-applied operations.
    RolledBack,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    NodeExistence,
    EdgeValidity,
    CycleIntroduction,
    DataConsistency,
}

/// One detected conflict, pointing at the offending operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conflict {
    pub kind: ConflictKind,
    pub detail: String,
    pub operations: Vec<String>,
}

impl std::fmt::Display for Conflict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.detail)
    }
}

/// A buffered batch of operations with an assigned id.
#[derive(Debug)]
pub struct Transaction {
    pub id: u64,
    pub ops: Vec<GraphOp>,
    pub status: TransactionStatus,
    pub started_at: DateTime<Utc>,
}

impl Transaction {
    pub fn add_node(&mut self, node: AssetNode) -> &mut Self {
        self.ops.push(GraphOp::AddNode(node));
        self
    }

    pub fn update_node(&mut self, node: AssetNode) -> &mut Self {
        self.ops.push(GraphOp::UpdateNode(node));
        self
    }

    pub fn remove_node(&mut self, guid: Guid) -> &mut Self {
        self.ops.push(GraphOp::RemoveNode(guid));
        self
    }

    pub fn add_edge(&mut self, edge: DependencyEdge) -> &mut Self {
        self.ops.push(GraphOp::AddEdge(edge));
        self
    }

    pub fn remove_edge(&mut self, key: EdgeKey) -> &mut Self {
        self.ops.push(GraphOp::RemoveEdge(key));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Record of a finished transaction kept in the updater's history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub id: u64,
    pub status: TransactionStatus,
    pub operation_count: usize,
    pub conflicts: Vec<Conflict>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Mutation counters, updated once per commit attempt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdaterStats {
    pub total_operations: u64,
    pub successful_operations: u64,
    pub failed_operations: u64,
    pub conflicts_detected: u64,
    pub rollbacks: u64,
    pub cache_invalidations: u64,
}

/// Single-writer mutation front for a shared [`GraphStore`].
pub struct GraphUpdater {
    graph: Arc<RwLock<GraphStore>>,
    reject_new_cycles: bool,
    stats: UpdaterStats,
    history: Vec<TransactionRecord>,
    next_id: u64,
    /// Bumped on every commit; query caches key their entries to it.
    generation: Arc<AtomicU64>,
}

impl GraphUpdater {
    pub fn new(graph: Arc<RwLock<GraphStore>>, reject_new_cycles: bool) -> Self {
        Self {
            graph,
            reject_new_cycles,
            stats: UpdaterStats::default(),
            history: Vec::new(),
            next_id: 1,
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Handle for readers that must observe mutation commits.
    pub fn generation(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.generation)
    }

    pub fn stats(&self) -> UpdaterStats {
        self.stats
    }

    pub fn history(&self) -> &[TransactionRecord] {
        &self.history
    }

    /// Drop old history entries, keeping the most recent `keep_recent`.
    pub fn clear_history(&mut self, keep_recent: usize) {
        if self.history.len() > keep_recent {
            let drop = self.history.len() - keep_recent;
            self.history.drain(..drop);
        }
    }

    pub fn begin(&mut self) -> Transaction {
        let id = self.next_id;
        self.next_id += 1;
        Transaction {
            id,
            ops: Vec::new(),
            status: TransactionStatus::Pending,
            started_at: Utc::now(),
        }
    }

    /// Validate and apply a transaction.
    ///
    /// Conflicts reject the whole batch (`FAILED`, nothing applied). A store
    /// error mid-apply reverses the applied prefix (`ROLLED_BACK`).
    pub fn commit(&mut self, mut tx: Transaction) -> Result<()> {
        self.stats.total_operations += tx.ops.len() as u64;

        let conflicts = {
            let store = self.graph.read().expect("graph lock poisoned");
            self.detect_conflicts(&store, &tx.ops)
        };
        if !conflicts.is_empty() {
            tx.status = TransactionStatus::Failed;
            self.stats.failed_operations += tx.ops.len() as u64;
            self.stats.conflicts_detected += conflicts.len() as u64;
            warn!(tx = tx.id, conflicts = conflicts.len(), "Transaction rejected");
            self.record(&tx, conflicts.clone());
            return Err(GraphError::TransactionRejected { conflicts });
        }

        let apply_result = {
            let mut store = self.graph.write().expect("graph lock poisoned");
            Self::apply_all(&mut store, &tx.ops)
        };

        match apply_result {
            Ok(()) => {
                tx.status = TransactionStatus::Committed;
                self.stats.successful_operations += tx.ops.len() as u64;
                self.invalidate_caches();
                debug!(tx = tx.id, ops = tx.ops.len(), "Transaction committed");
                self.record(&tx, Vec::new());
                Ok(())
            }
            Err(err) => {
                tx.status = TransactionStatus::RolledBack;
                self.stats.failed_operations += tx.ops.len() as u64;
                self.stats.rollbacks += 1;
                warn!(tx = tx.id, error = %err, "Transaction rolled back");
                self.record(&tx, Vec::new());
                Err(err)
            }
        }
    }

    /// Convenience: rebuild the outgoing edge set of one source file.
    ///
    /// Computes the wholesale delta against the current edges and commits it
    /// as a single transaction. Returns the applied delta.
    pub fn replace_file_edges(
        &mut self,
        source: &Guid,
        new_edges: Vec<DependencyEdge>,
    ) -> Result<EdgeDelta> {
        let (mut tx, delta) = {
            let store = self.graph.read().expect("graph lock poisoned");
            if !store.contains(source) {
                return Err(GraphError::NodeMissing(source.to_string()));
            }
            let current: HashMap<EdgeKey, DependencyEdge> = store
                .neighbors_out(source)
                .into_iter()
                .map(|(e, _)| (e.key(), e.clone()))
                .collect();

            let mut delta = EdgeDelta::default();
            let mut tx_ops: Vec<GraphOp> = Vec::new();
            let mut keep: HashSet<EdgeKey> = HashSet::with_capacity(new_edges.len());

            for edge in new_edges {
                let key = edge.key();
                if current.contains_key(&key) {
                    delta.unchanged += 1;
                } else {
                    tx_ops.push(GraphOp::AddEdge(edge));
                    delta.added += 1;
                }
                keep.insert(key);
            }
            for key in current.keys() {
                if !keep.contains(key) {
                    tx_ops.push(GraphOp::RemoveEdge(key.clone()));
                    delta.removed += 1;
                }
            }

            let mut tx = Transaction {
                id: 0,
                ops: tx_ops,
                status: TransactionStatus::Pending,
                started_at: Utc::now(),
            };
            tx.id = self.next_id;
            (tx, delta)
        };
        self.next_id += 1;

        if tx.is_empty() {
            tx.status = TransactionStatus::Committed;
            return Ok(delta);
        }
        self.commit(tx)?;
        Ok(delta)
    }

    fn invalidate_caches(&mut self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.stats.cache_invalidations += 1;
    }

    fn record(&mut self, tx: &Transaction, conflicts: Vec<Conflict>) {
        self.history.push(TransactionRecord {
            id: tx.id,
            status: tx.status,
            operation_count: tx.ops.len(),
            conflicts,
            started_at: tx.started_at,
            finished_at: Utc::now(),
        });
    }

    // ── Conflict passes ────────────────────────────────────────────

    fn detect_conflicts(&self, store: &GraphStore, ops: &[GraphOp]) -> Vec<Conflict> {
        let mut conflicts = Vec::new();
        self.check_node_existence(store, ops, &mut conflicts);
        self.check_edge_validity(store, ops, &mut conflicts);
        if self.reject_new_cycles {
            self.check_cycle_introduction(store, ops, &mut conflicts);
        }
        self.check_data_consistency(store, ops, &mut conflicts);
        conflicts
    }

    fn check_node_existence(
        &self,
        store: &GraphStore,
        ops: &[GraphOp],
        conflicts: &mut Vec<Conflict>,
    ) {
        let mut added: HashSet<&Guid> = HashSet::new();
        for op in ops {
            match op {
                GraphOp::AddNode(node) => {
                    if let Some(existing) = store.node(&node.guid) {
                        // Re-adding an existing GUID merges (moves keep the
                        // GUID); a kind change cannot merge.
                        if existing.active && existing.kind != node.kind {
                            conflicts.push(Conflict {
                                kind: ConflictKind::NodeExistence,
                                detail: format!(
                                    "node {} exists with kind {}, cannot re-add as {}",
                                    node.guid, existing.kind, node.kind
                                ),
                                operations: vec![op.describe()],
                            });
                        }
                    }
                    added.insert(&node.guid);
                }
                GraphOp::UpdateNode(node) => {
                    if !store.contains(&node.guid) && !added.contains(&node.guid) {
                        conflicts.push(Conflict {
                            kind: ConflictKind::NodeExistence,
                            detail: format!("update of absent node {}", node.guid),
                            operations: vec![op.describe()],
                        });
                    }
                }
                GraphOp::RemoveNode(guid) => {
                    if !store.contains(guid) && !added.contains(guid) {
                        conflicts.push(Conflict {
                            kind: ConflictKind::NodeExistence,
                            detail: format!("removal of absent node {guid}"),
                            operations: vec![op.describe()],
                        });
                    }
                }
                _ => {}
            }
        }
    }

    fn check_edge_validity(
        &self,
        store: &GraphStore,
        ops: &[GraphOp],
        conflicts: &mut Vec<Conflict>,
    ) {
        let mut added: HashSet<&Guid> = HashSet::new();
        let mut removed: HashSet<&Guid> = HashSet::new();
        for op in ops {
            match op {
                GraphOp::AddNode(n) | GraphOp::UpdateNode(n) => {
                    added.insert(&n.guid);
                }
                GraphOp::RemoveNode(g) => {
                    removed.insert(g);
                }
                _ => {}
            }
        }

        let endpoint_ok = |guid: &Guid| -> bool {
            if removed.contains(guid) {
                return false;
            }
            if added.contains(guid) {
                return true;
            }
            store.node(guid).is_some_and(|n| n.active)
        };

        for op in ops {
            match op {
                GraphOp::AddEdge(edge) => {
                    for (end, label) in [(&edge.source, "source"), (&edge.target, "target")] {
                        if !endpoint_ok(end) {
                            conflicts.push(Conflict {
                                kind: ConflictKind::EdgeValidity,
                                detail: format!("edge {label} {end} is absent or inactive"),
                                operations: vec![op.describe()],
                            });
                        }
                    }
                }
                GraphOp::RemoveEdge(key) => {
                    if store
                        .edge(&key.source, &key.target, key.dep_kind, key.context_path.as_deref())
                        .is_none()
                    {
                        conflicts.push(Conflict {
                            kind: ConflictKind::EdgeValidity,
                            detail: format!("removal of absent edge {} -> {}", key.source, key.target),
                            operations: vec![op.describe()],
                        });
                    }
                }
                _ => {}
            }
        }
    }

    /// Tentatively apply the batch to an adjacency copy and reject if a new
    /// non-trivial SCC (size ≥ 2, or a self-loop) would form solely because
    /// of it.
    fn check_cycle_introduction(
        &self,
        store: &GraphStore,
        ops: &[GraphOp],
        conflicts: &mut Vec<Conflict>,
    ) {
        let adds_edges = ops.iter().any(|op| matches!(op, GraphOp::AddEdge(_)));
        if !adds_edges {
            return;
        }

        let mut edges: HashSet<(Guid, Guid)> = store
            .all_edges()
            .filter(|e| e.active)
            .map(|e| (e.source.clone(), e.target.clone()))
            .collect();
        let before = non_trivial_sccs(&edges);

        for op in ops {
            match op {
                GraphOp::AddEdge(e) => {
                    edges.insert((e.source.clone(), e.target.clone()));
                }
                GraphOp::RemoveEdge(k) => {
                    edges.remove(&(k.source.clone(), k.target.clone()));
                }
                _ => {}
            }
        }
        let after = non_trivial_sccs(&edges);

        for scc in &after {
            let pre_existing = before.iter().any(|b| scc.is_subset(b));
            if !pre_existing {
                let mut members: Vec<_> = scc.iter().map(ToString::to_string).collect();
                members.sort();
                conflicts.push(Conflict {
                    kind: ConflictKind::CycleIntroduction,
                    detail: format!("batch introduces a cycle over [{}]", members.join(", ")),
                    operations: ops
                        .iter()
                        .filter(|op| matches!(op, GraphOp::AddEdge(_)))
                        .map(GraphOp::describe)
                        .collect(),
                });
                return;
            }
        }
    }

    fn check_data_consistency(
        &self,
        store: &GraphStore,
        ops: &[GraphOp],
        conflicts: &mut Vec<Conflict>,
    ) {
        let mut batch_paths: HashMap<&str, &Guid> = HashMap::new();
        for op in ops {
            if let GraphOp::AddNode(node) | GraphOp::UpdateNode(node) = op {
                if let Some(owner) = store.resolve_path(&node.path) {
                    if owner != node.guid {
                        conflicts.push(Conflict {
                            kind: ConflictKind::DataConsistency,
                            detail: format!(
                                "path {} already owned by {owner}",
                                node.path
                            ),
                            operations: vec![op.describe()],
                        });
                    }
                }
                if let Some(prev) = batch_paths.insert(node.path.as_str(), &node.guid) {
                    if *prev != node.guid {
                        conflicts.push(Conflict {
                            kind: ConflictKind::DataConsistency,
                            detail: format!("path {} claimed twice in one batch", node.path),
                            operations: vec![op.describe()],
                        });
                    }
                }
            }
        }
    }

    // ── Application ────────────────────────────────────────────────

    fn apply_all(store: &mut GraphStore, ops: &[GraphOp]) -> Result<()> {
        let mut applied: Vec<AppliedOp> = Vec::with_capacity(ops.len());
        for op in ops {
            if let Err(err) = Self::apply_one(store, op, &mut applied) {
                Self::rollback(store, applied);
                return Err(err);
            }
        }
        Ok(())
    }

    fn apply_one(
        store: &mut GraphStore,
        op: &GraphOp,
        applied: &mut Vec<AppliedOp>,
    ) -> Result<()> {
        match op {
            GraphOp::AddNode(node) => {
                match store.node(&node.guid).cloned() {
                    Some(prev) => {
                        store.upsert_node(node.clone())?;
                        applied.push(AppliedOp::UpdatedNode(prev));
                    }
                    None => {
                        store.upsert_node(node.clone())?;
                        applied.push(AppliedOp::AddedNode(node.guid.clone()));
                    }
                }
                Ok(())
            }
            GraphOp::UpdateNode(node) => {
                let prev = store
                    .node(&node.guid)
                    .cloned()
                    .ok_or_else(|| GraphError::NodeMissing(node.guid.to_string()))?;
                store.upsert_node(node.clone())?;
                applied.push(AppliedOp::UpdatedNode(prev));
                Ok(())
            }
            GraphOp::RemoveNode(guid) => {
                let prev = store
                    .node(guid)
                    .cloned()
                    .ok_or_else(|| GraphError::NodeMissing(guid.to_string()))?;
                let prior_flags: Vec<(EdgeKey, bool)> = store
                    .neighbors_out(guid)
                    .into_iter()
                    .chain(store.neighbors_in(guid))
                    .map(|(e, _)| (e.key(), e.active))
                    .collect();
                store.deactivate_node(guid)?;
                applied.push(AppliedOp::DeactivatedNode(prev, prior_flags));
                Ok(())
            }
            GraphOp::AddEdge(edge) => {
                store.add_edge(edge.clone())?;
                applied.push(AppliedOp::AddedEdge(edge.key()));
                Ok(())
            }
            GraphOp::RemoveEdge(key) => {
                let prev = store.remove_edge(key)?;
                applied.push(AppliedOp::RemovedEdge(prev));
                Ok(())
            }
        }
    }

    fn rollback(store: &mut GraphStore, applied: Vec<AppliedOp>) {
        for op in applied.into_iter().rev() {
            let result = match op {
                AppliedOp::AddedNode(guid) => store.remove_node(&guid).map(|_| ()),
                AppliedOp::UpdatedNode(prev) => store.upsert_node(prev),
                AppliedOp::DeactivatedNode(prev, flags) => {
                    let res = store.upsert_node(prev);
                    for (key, active) in flags {
                        if let Some(edge) = store.edge_mut(&key) {
                            edge.active = active;
                        }
                    }
                    res
                }
                AppliedOp::AddedEdge(key) => store.remove_edge(&key).map(|_| ()),
                AppliedOp::RemovedEdge(edge) => store.add_edge(edge),
            };
            if let Err(err) = result {
                // Inverse ops operate on state this transaction produced;
                // a failure here is an invariant violation.
                warn!(error = %err, "Rollback step failed");
            }
        }
    }
}

/// SCCs of size ≥ 2, plus single nodes with a self-loop.
fn non_trivial_sccs(edges: &HashSet<(Guid, Guid)>) -> Vec<HashSet<Guid>> {
    use petgraph::graph::DiGraph;

    let mut indices: HashMap<&Guid, petgraph::graph::NodeIndex> = HashMap::new();
    let mut graph: DiGraph<&Guid, ()> = DiGraph::new();
    for (src, tgt) in edges {
        for g in [src, tgt] {
            indices.entry(g).or_insert_with(|| graph.add_node(g));
        }
        let s = indices[src];
        let t = indices[tgt];
        graph.add_edge(s, t, ());
    }

    petgraph::algo::tarjan_scc(&graph)
        .into_iter()
        .filter(|scc| {
            scc.len() >= 2
                || scc.len() == 1 && {
                    let g = graph[scc[0]];
                    edges.contains(&(g.clone(), g.clone()))
                }
        })
        .map(|scc| scc.into_iter().map(|idx| graph[idx].clone()).collect())
        .collect()
}

// ── Tests ──────────────────────────────────────────────────────────
