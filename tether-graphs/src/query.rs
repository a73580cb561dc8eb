//! Read-only traversals over the graph store.
//!
//! Every operation takes [`QueryOptions`] and filters candidates before
//! descending. Results are cached per `(operation, guid, options)` with a
//! TTL; the cache also keys entries to the updater's mutation generation, so
//! any commit evicts everything at once.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::model::{AssetKind, AssetNode, DependencyEdge, DependencyKind, Guid, Strength};
use crate::store::GraphStore;
use crate::{GraphError, Result};

/// Filters applied by every query before descending.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryOptions {
    pub max_depth: Option<usize>,
    pub asset_kinds: Option<Vec<AssetKind>>,
    pub dep_kinds: Option<Vec<DependencyKind>>,
    pub min_strength: Strength,
    pub include_inactive: bool,
    pub use_cache: bool,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            max_depth: None,
            asset_kinds: None,
            dep_kinds: None,
            min_strength: Strength::Weak,
            include_inactive: false,
            use_cache: true,
        }
    }
}

impl QueryOptions {
    /// Stable normalized form for cache keys: kinds sorted, fields ordered.
    fn cache_key(&self) -> String {
        let mut kinds: Vec<&str> = self
            .asset_kinds
            .as_deref()
            .unwrap_or(&[])
            .iter()
            .map(|k| k.as_str())
            .collect();
        kinds.sort_unstable();
        let mut deps: Vec<&str> = self
            .dep_kinds
            .as_deref()
            .unwrap_or(&[])
            .iter()
            .map(|k| k.as_str())
            .collect();
        deps.sort_unstable();
        format!(
            "d={:?};ak={};dk={};s={};ia={}",
            self.max_depth,
            kinds.join(","),
            deps.join(","),
            self.min_strength,
            self.include_inactive
        )
    }

    fn edge_passes(&self, edge: &DependencyEdge) -> bool {
        if !self.include_inactive && !edge.active {
            return false;
        }
        if edge.strength < self.min_strength {
            return false;
        }
        if let Some(kinds) = &self.dep_kinds {
            if !kinds.contains(&edge.dep_kind) {
                return false;
            }
        }
        true
    }

    fn node_passes(&self, node: &AssetNode) -> bool {
        if !self.include_inactive && !node.active {
            return false;
        }
        if let Some(kinds) = &self.asset_kinds {
            if !kinds.contains(&node.kind) {
                return false;
            }
        }
        true
    }
}

/// One neighbor hit: the connecting edge and the node on the far side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepEntry {
    pub edge: DependencyEdge,
    pub node: AssetNode,
}

/// Transitive closure result with per-node discovery depth.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TraversalResult {
    pub guids: Vec<Guid>,
    pub depths: HashMap<Guid, usize>,
}

/// A node in a dependency/reference tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeNode {
    pub guid: Guid,
    pub path: String,
    pub kind: AssetKind,
    pub depth: usize,
    /// True when this node already appears on the current branch; children
    /// are truncated here.
    pub circular: bool,
    pub children: Vec<TreeNode>,
}

/// What change is being assessed by [`QueryEngine::impact`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImpactOperation {
    Delete,
    Modify,
    Move,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ImpactSeverity {
    Low,
    Medium,
    High,
}

/// Reverse-closure impact assessment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImpactResult {
    pub operation: ImpactOperation,
    pub affected: Vec<Guid>,
    pub severity: ImpactSeverity,
    /// Strongest edge strength seen in the closure (modify weighting).
    pub max_strength: Option<Strength>,
}

/// Filter for [`QueryEngine::unused`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UnusedFilter {
    pub kinds: Option<Vec<AssetKind>>,
    /// Scenes act as graph roots; include them only on request.
    pub include_roots: bool,
}

/// One problem found by [`QueryEngine::validate_refs`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvalidRef {
    pub target: String,
    pub reason: String,
}

/// Edge sanity report for a single node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub checked: usize,
    pub invalid: Vec<InvalidRef>,
}

impl ValidationReport {
    pub fn is_clean(&self) -> bool {
        self.invalid.is_empty()
    }
}

#[derive(Clone)]
enum CachedResult {
    Entries(Vec<DepEntry>),
    Traversal(TraversalResult),
    Path(Option<Vec<Guid>>),
    Tree(TreeNode),
    Impact(ImpactResult),
    Unused(Vec<Guid>),
}

struct CacheEntry {
    value: CachedResult,
    inserted: Instant,
    generation: u64,
}

/// Read-only query front over a shared [`GraphStore`].
pub struct QueryEngine {
    graph: Arc<RwLock<GraphStore>>,
    generation: Arc<AtomicU64>,
    cache: Mutex<HashMap<String, CacheEntry>>,
    ttl: Duration,
}

impl QueryEngine {
    pub fn new(
        graph: Arc<RwLock<GraphStore>>,
        generation: Arc<AtomicU64>,
        cache_ttl: Duration,
    ) -> Self {
        Self {
            graph,
            generation,
            cache: Mutex::new(HashMap::new()),
            ttl: cache_ttl,
        }
    }

    fn store(&self) -> std::sync::RwLockReadGuard<'_, GraphStore> {
        self.graph.read().expect("graph lock poisoned")
    }

    fn cached(&self, key: &str, use_cache: bool) -> Option<CachedResult> {
        if !use_cache {
            return None;
        }
        let generation = self.generation.load(Ordering::SeqCst);
        let cache = self.cache.lock().expect("query cache poisoned");
        cache.get(key).and_then(|entry| {
            if entry.generation == generation && entry.inserted.elapsed() < self.ttl {
                Some(entry.value.clone())
            } else {
                None
            }
        })
    }

    fn remember(&self, key: String, value: CachedResult, use_cache: bool) {
        if !use_cache {
            return;
        }
        let generation = self.generation.load(Ordering::SeqCst);
        let mut cache = self.cache.lock().expect("query cache poisoned");
        // A commit invalidates everything at once; stale generations are
        // dropped lazily on the next write.
        cache.retain(|_, e| e.generation == generation);
        cache.insert(
            key,
            CacheEntry {
                value,
                inserted: Instant::now(),
                generation,
            },
        );
    }

    fn require_node(store: &GraphStore, guid: &Guid) -> Result<()> {
        if store.contains(guid) {
            Ok(())
        } else {
            Err(GraphError::NodeMissing(guid.to_string()))
        }
    }

    // ── One-hop queries ────────────────────────────────────────────

    /// Forward one-hop adjacency.
    pub fn direct_deps(&self, guid: &Guid, opts: &QueryOptions) -> Result<Vec<DepEntry>> {
        self.one_hop("direct_deps", guid, opts, true)
    }

    /// Reverse one-hop adjacency.
    pub fn direct_refs(&self, guid: &Guid, opts: &QueryOptions) -> Result<Vec<DepEntry>> {
        self.one_hop("direct_refs", guid, opts, false)
    }

    fn one_hop(
        &self,
        op: &str,
        guid: &Guid,
        opts: &QueryOptions,
        forward: bool,
    ) -> Result<Vec<DepEntry>> {
        let key = format!("{op}:{guid}:{}", opts.cache_key());
        if let Some(CachedResult::Entries(hit)) = self.cached(&key, opts.use_cache) {
            return Ok(hit);
        }

        let store = self.store();
        Self::require_node(&store, guid)?;
        let neighbors = if forward {
            store.neighbors_out(guid)
        } else {
            store.neighbors_in(guid)
        };
        let mut entries: Vec<DepEntry> = neighbors
            .into_iter()
            .filter(|(e, n)| opts.edge_passes(e) && opts.node_passes(n))
            .map(|(e, n)| DepEntry {
                edge: e.clone(),
                node: n.clone(),
            })
            .collect();
        entries.sort_by_key(|e| e.edge.key());
        drop(store);

        self.remember(key, CachedResult::Entries(entries.clone()), opts.use_cache);
        Ok(entries)
    }

    // ── Transitive closures ────────────────────────────────────────

    /// Forward transitive closure (DFS, cycle-safe, depth-capped).
    pub fn all_deps(&self, guid: &Guid, opts: &QueryOptions) -> Result<TraversalResult> {
        self.closure("all_deps", guid, opts, true)
    }

    /// Reverse transitive closure.
    pub fn all_refs(&self, guid: &Guid, opts: &QueryOptions) -> Result<TraversalResult> {
        self.closure("all_refs", guid, opts, false)
    }

    fn closure(
        &self,
        op: &str,
        guid: &Guid,
        opts: &QueryOptions,
        forward: bool,
    ) -> Result<TraversalResult> {
        let key = format!("{op}:{guid}:{}", opts.cache_key());
        if let Some(CachedResult::Traversal(hit)) = self.cached(&key, opts.use_cache) {
            return Ok(hit);
        }

        let store = self.store();
        Self::require_node(&store, guid)?;
        let result = Self::walk_closure(&store, guid, opts, forward);
        drop(store);

        self.remember(key, CachedResult::Traversal(result.clone()), opts.use_cache);
        Ok(result)
    }

    fn walk_closure(
        store: &GraphStore,
        start: &Guid,
        opts: &QueryOptions,
        forward: bool,
    ) -> TraversalResult {
        let mut result = TraversalResult::default();
        let mut visited: HashSet<Guid> = HashSet::new();
        visited.insert(start.clone());
        let mut stack: Vec<(Guid, usize)> = vec![(start.clone(), 0)];

        while let Some((current, depth)) = stack.pop() {
            if let Some(cap) = opts.max_depth {
                if depth >= cap {
                    continue;
                }
            }
            let neighbors = if forward {
                store.neighbors_out(&current)
            } else {
                store.neighbors_in(&current)
            };
            let mut next: Vec<(Guid, usize)> = neighbors
                .into_iter()
                .filter(|(e, n)| opts.edge_passes(e) && opts.node_passes(n))
                .map(|(_, n)| (n.guid.clone(), depth + 1))
                .collect();
            // Deterministic visit order for stable output.
            next.sort();
            for (guid, d) in next {
                if visited.insert(guid.clone()) {
                    result.guids.push(guid.clone());
                    result.depths.insert(guid.clone(), d);
                    stack.push((guid, d));
                }
            }
        }
        result.guids.sort();
        result
    }

    // ── Paths ──────────────────────────────────────────────────────

    /// BFS shortest forward path from `from` to `to`, inclusive of both ends.
    pub fn path(&self, from: &Guid, to: &Guid, opts: &QueryOptions) -> Result<Option<Vec<Guid>>> {
        let key = format!("path:{from}->{to}:{}", opts.cache_key());
        if let Some(CachedResult::Path(hit)) = self.cached(&key, opts.use_cache) {
            return Ok(hit);
        }

        let store = self.store();
        Self::require_node(&store, from)?;
        Self::require_node(&store, to)?;

        let mut parents: HashMap<Guid, Guid> = HashMap::new();
        let mut queue: VecDeque<(Guid, usize)> = VecDeque::new();
        queue.push_back((from.clone(), 0));
        let mut found = from == to;

        while let Some((current, depth)) = queue.pop_front() {
            if found {
                break;
            }
            if let Some(cap) = opts.max_depth {
                if depth >= cap {
                    continue;
                }
            }
            for (edge, node) in store.neighbors_out(&current) {
                if !opts.edge_passes(edge) || !opts.node_passes(node) {
                    continue;
                }
                if parents.contains_key(&node.guid) || node.guid == *from {
                    continue;
                }
                parents.insert(node.guid.clone(), current.clone());
                if node.guid == *to {
                    found = true;
                    break;
                }
                queue.push_back((node.guid.clone(), depth + 1));
            }
        }
        drop(store);

        let path = if found {
            let mut path = vec![to.clone()];
            let mut cursor = to.clone();
            while cursor != *from {
                match parents.get(&cursor) {
                    Some(parent) => {
                        path.push(parent.clone());
                        cursor = parent.clone();
                    }
                    None => break,
                }
            }
            path.reverse();
            Some(path)
        } else {
            None
        };

        self.remember(key, CachedResult::Path(path.clone()), opts.use_cache);
        Ok(path)
    }

    /// Enumerate simple forward paths from `from` to `to`, bounded by the
    /// depth cap (default 10) and a result limit.
    pub fn all_paths(
        &self,
        from: &Guid,
        to: &Guid,
        opts: &QueryOptions,
        limit: usize,
    ) -> Result<Vec<Vec<Guid>>> {
        let store = self.store();
        Self::require_node(&store, from)?;
        Self::require_node(&store, to)?;

        let cap = opts.max_depth.unwrap_or(10);
        let mut paths = Vec::new();
        let mut current = vec![from.clone()];
        let mut on_path: HashSet<Guid> = HashSet::from([from.clone()]);
        Self::dfs_paths(&store, to, opts, cap, limit, &mut current, &mut on_path, &mut paths);
        Ok(paths)
    }

    #[allow(clippy::too_many_arguments)]
    fn dfs_paths(
        store: &GraphStore,
        to: &Guid,
        opts: &QueryOptions,
        cap: usize,
        limit: usize,
        current: &mut Vec<Guid>,
        on_path: &mut HashSet<Guid>,
        paths: &mut Vec<Vec<Guid>>,
    ) {
        if paths.len() >= limit || current.len() > cap {
            return;
        }
        let tail = current.last().expect("path never empty").clone();
        if tail == *to && current.len() > 1 {
            paths.push(current.clone());
            return;
        }
        let mut neighbors: Vec<Guid> = store
            .neighbors_out(&tail)
            .into_iter()
            .filter(|(e, n)| opts.edge_passes(e) && opts.node_passes(n))
            .map(|(_, n)| n.guid.clone())
            .collect();
        neighbors.sort();
        for next in neighbors {
            if next == *to {
                current.push(next.clone());
                paths.push(current.clone());
                current.pop();
                continue;
            }
            if on_path.insert(next.clone()) {
                current.push(next.clone());
                Self::dfs_paths(store, to, opts, cap, limit, current, on_path, paths);
                current.pop();
                on_path.remove(&next);
            }
        }
    }

    // ── Trees ──────────────────────────────────────────────────────

    /// Forward dependency tree with cycle marking.
    pub fn dep_tree(&self, guid: &Guid, opts: &QueryOptions) -> Result<TreeNode> {
        self.tree("dep_tree", guid, opts, true)
    }

    /// Reverse reference tree with cycle marking.
    pub fn ref_tree(&self, guid: &Guid, opts: &QueryOptions) -> Result<TreeNode> {
        self.tree("ref_tree", guid, opts, false)
    }

    fn tree(&self, op: &str, guid: &Guid, opts: &QueryOptions, forward: bool) -> Result<TreeNode> {
        let key = format!("{op}:{guid}:{}", opts.cache_key());
        if let Some(CachedResult::Tree(hit)) = self.cached(&key, opts.use_cache) {
            return Ok(hit);
        }

        let store = self.store();
        let node = store
            .node(guid)
            .ok_or_else(|| GraphError::NodeMissing(guid.to_string()))?;
        let mut on_branch = HashSet::new();
        let tree = Self::build_tree(&store, node, opts, forward, 0, &mut on_branch);
        drop(store);

        self.remember(key, CachedResult::Tree(tree.clone()), opts.use_cache);
        Ok(tree)
    }

    fn build_tree(
        store: &GraphStore,
        node: &AssetNode,
        opts: &QueryOptions,
        forward: bool,
        depth: usize,
        on_branch: &mut HashSet<Guid>,
    ) -> TreeNode {
        let mut tree = TreeNode {
            guid: node.guid.clone(),
            path: node.path.clone(),
            kind: node.kind,
            depth,
            circular: false,
            children: Vec::new(),
        };
        if let Some(cap) = opts.max_depth {
            if depth >= cap {
                return tree;
            }
        }
        on_branch.insert(node.guid.clone());

        let neighbors = if forward {
            store.neighbors_out(&node.guid)
        } else {
            store.neighbors_in(&node.guid)
        };
        let mut next: Vec<&AssetNode> = neighbors
            .into_iter()
            .filter(|(e, n)| opts.edge_passes(e) && opts.node_passes(n))
            .map(|(_, n)| n)
            .collect();
        next.sort_by(|a, b| a.guid.cmp(&b.guid));

        for child in next {
            if on_branch.contains(&child.guid) {
                tree.children.push(TreeNode {
                    guid: child.guid.clone(),
                    path: child.path.clone(),
                    kind: child.kind,
                    depth: depth + 1,
                    circular: true,
                    children: Vec::new(),
                });
            } else {
                tree.children
                    .push(Self::build_tree(store, child, opts, forward, depth + 1, on_branch));
            }
        }
        on_branch.remove(&node.guid);
        tree
    }

    // ── Impact ─────────────────────────────────────────────────────

    /// What breaks if `guid` is deleted, modified, or moved.
    pub fn impact(
        &self,
        guid: &Guid,
        operation: ImpactOperation,
        opts: &QueryOptions,
    ) -> Result<ImpactResult> {
        let key = format!("impact:{guid}:{operation:?}:{}", opts.cache_key());
        if let Some(CachedResult::Impact(hit)) = self.cached(&key, opts.use_cache) {
            return Ok(hit);
        }

        // The reverse closure, then the operation-specific filter.
        let mut closure_opts = opts.clone();
        closure_opts.use_cache = false;
        match operation {
            ImpactOperation::Delete => {}
            ImpactOperation::Modify => {
                closure_opts.min_strength = closure_opts.min_strength.max(Strength::Strong);
            }
            ImpactOperation::Move => {
                closure_opts.dep_kinds = Some(vec![DependencyKind::PathReference]);
            }
        }
        let traversal = self.closure("impact_closure", guid, &closure_opts, false)?;

        let max_strength = {
            let store = self.store();
            traversal
                .guids
                .iter()
                .flat_map(|g| store.neighbors_out(g))
                .filter(|(e, _)| closure_opts.edge_passes(e))
                .map(|(e, _)| e.strength)
                .max()
        };

        let severity = match traversal.guids.len() {
            0 => ImpactSeverity::Low,
            1..=9 => ImpactSeverity::Medium,
            _ => ImpactSeverity::High,
        };
        let result = ImpactResult {
            operation,
            affected: traversal.guids,
            severity,
            max_strength,
        };

        self.remember(key, CachedResult::Impact(result.clone()), opts.use_cache);
        Ok(result)
    }

    // ── Unused assets ──────────────────────────────────────────────

    /// Active nodes with zero active incoming edges. Scenes are considered
    /// roots and excluded unless requested.
    pub fn unused(&self, filter: &UnusedFilter, opts: &QueryOptions) -> Result<Vec<Guid>> {
        let key = format!(
            "unused:{:?}:{}:{}",
            filter.kinds,
            filter.include_roots,
            opts.cache_key()
        );
        if let Some(CachedResult::Unused(hit)) = self.cached(&key, opts.use_cache) {
            return Ok(hit);
        }

        let store = self.store();
        let mut unused: Vec<Guid> = store
            .all_nodes()
            .filter(|n| n.active)
            .filter(|n| filter.include_roots || n.kind != AssetKind::Scene)
            .filter(|n| match &filter.kinds {
                Some(kinds) => kinds.contains(&n.kind),
                None => true,
            })
            .filter(|n| {
                !store
                    .neighbors_in(&n.guid)
                    .iter()
                    .any(|(e, src)| opts.edge_passes(e) && src.active)
            })
            .map(|n| n.guid.clone())
            .collect();
        unused.sort();
        drop(store);

        debug!(count = unused.len(), "Unused asset query");
        self.remember(key, CachedResult::Unused(unused.clone()), opts.use_cache);
        Ok(unused)
    }

    // ── Validation ─────────────────────────────────────────────────

    /// Sanity-check the outgoing edges of one node, including unresolved
    /// references the scan recorded on the node itself.
    pub fn validate_refs(&self, guid: &Guid) -> Result<ValidationReport> {
        let store = self.store();
        let node = store
            .node(guid)
            .ok_or_else(|| GraphError::NodeMissing(guid.to_string()))?;

        let mut report = ValidationReport::default();
        let mut seen: HashSet<crate::model::EdgeKey> = HashSet::new();

        for (edge, target) in store.neighbors_out(guid) {
            report.checked += 1;
            if !seen.insert(edge.key()) {
                report.invalid.push(InvalidRef {
                    target: edge.target.to_string(),
                    reason: "duplicate edge".into(),
                });
            }
            if edge.target.is_zero() {
                report.invalid.push(InvalidRef {
                    target: edge.target.to_string(),
                    reason: "zero GUID target".into(),
                });
            }
            if !target.active {
                report.invalid.push(InvalidRef {
                    target: edge.target.to_string(),
                    reason: "target is inactive".into(),
                });
            }
        }

        // References the parser saw but the scan could not resolve.
        if let Some(serde_json::Value::Array(unresolved)) =
            node.importer_metadata.get("unresolved_refs")
        {
            for value in unresolved {
                if let serde_json::Value::String(target) = value {
                    report.checked += 1;
                    report.invalid.push(InvalidRef {
                        target: target.clone(),
                        reason: "unresolved target GUID".into(),
                    });
                }
            }
        }
        Ok(report)
    }
}

// ── Tests ──────────────────────────────────────────────────────────
