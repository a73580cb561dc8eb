//! In-memory graph store: the arena owning all nodes, edges, and indexes.
//!
//! Nodes live in a [`StableDiGraph`] keyed through a `Guid → NodeIndex` map;
//! a second `path → Guid` index serves path lookups. Edges carry their full
//! attribute set as weights. All mutation goes through the
//! [updater](crate::updater) except during bulk load from a persisted dump.

use std::collections::HashMap;

use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use serde::{Deserialize, Serialize};

use crate::model::{AssetNode, DependencyEdge, DependencyKind, EdgeKey, Guid};
use crate::{GraphError, Result};

/// Normalize a path for graph keys: forward slashes, no leading `./`.
pub fn normalize_path(path: &str) -> String {
    let p = path.replace('\\', "/");
    p.strip_prefix("./").unwrap_or(&p).to_string()
}

/// The dependency graph plus its two indexes.
#[derive(Default)]
pub struct GraphStore {
    inner: StableDiGraph<AssetNode, DependencyEdge>,
    guid_index: HashMap<Guid, NodeIndex>,
    path_index: HashMap<String, Guid>,
}

impl std::fmt::Debug for GraphStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphStore")
            .field("nodes", &self.inner.node_count())
            .field("edges", &self.inner.edge_count())
            .finish()
    }
}

/// Outcome of [`GraphStore::replace_edges_from`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EdgeDelta {
    pub added: usize,
    pub removed: usize,
    pub unchanged: usize,
}

impl EdgeDelta {
    pub fn is_empty(&self) -> bool {
        self.added == 0 && self.removed == 0
    }
}

impl GraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node_count(&self) -> usize {
        self.inner.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.inner.edge_count()
    }

    pub fn active_node_count(&self) -> usize {
        self.all_nodes().filter(|n| n.active).count()
    }

    pub fn contains(&self, guid: &Guid) -> bool {
        self.guid_index.contains_key(guid)
    }

    /// Look up a node by GUID.
    pub fn node(&self, guid: &Guid) -> Option<&AssetNode> {
        self.guid_index
            .get(guid)
            .and_then(|&idx| self.inner.node_weight(idx))
    }

    /// Resolve a normalized project-relative path to the GUID of its active node.
    pub fn resolve_path(&self, path: &str) -> Option<Guid> {
        self.path_index.get(path).cloned()
    }

    /// Look up a specific edge by its identity tuple.
    pub fn edge(
        &self,
        source: &Guid,
        target: &Guid,
        dep_kind: DependencyKind,
        context_path: Option<&str>,
    ) -> Option<&DependencyEdge> {
        let src = *self.guid_index.get(source)?;
        self.inner
            .edges_directed(src, Direction::Outgoing)
            .map(|e| e.weight())
            .find(|e| {
                e.target == *target
                    && e.dep_kind == dep_kind
                    && e.context_path.as_deref() == context_path
            })
    }

    pub fn all_nodes(&self) -> impl Iterator<Item = &AssetNode> {
        self.inner.node_weights()
    }

    pub fn all_edges(&self) -> impl Iterator<Item = &DependencyEdge> {
        self.inner.edge_weights()
    }

    /// Outgoing edges of a node, paired with their target nodes.
    pub fn neighbors_out(&self, guid: &Guid) -> Vec<(&DependencyEdge, &AssetNode)> {
        self.neighbors(guid, Direction::Outgoing)
    }

    /// Incoming edges of a node, paired with their source nodes.
    pub fn neighbors_in(&self, guid: &Guid) -> Vec<(&DependencyEdge, &AssetNode)> {
        self.neighbors(guid, Direction::Incoming)
    }

    fn neighbors(&self, guid: &Guid, dir: Direction) -> Vec<(&DependencyEdge, &AssetNode)> {
        let Some(&idx) = self.guid_index.get(guid) else {
            return Vec::new();
        };
        self.inner
            .edges_directed(idx, dir)
            .filter_map(|e| {
                let other = match dir {
                    Direction::Outgoing => e.target(),
                    Direction::Incoming => e.source(),
                };
                self.inner.node_weight(other).map(|n| (e.weight(), n))
            })
            .collect()
    }

    /// Insert a node, or update the stored attributes of an existing GUID.
    ///
    /// Path uniqueness is enforced across active nodes; a collision with a
    /// different GUID is an error.
    pub fn upsert_node(&mut self, node: AssetNode) -> Result<()> {
        if node.active {
            if let Some(owner) = self.path_index.get(&node.path) {
                if *owner != node.guid {
                    return Err(GraphError::PathCollision {
                        path: node.path.clone(),
                        existing: owner.to_string(),
                        incoming: node.guid.to_string(),
                    });
                }
            }
        }

        match self.guid_index.get(&node.guid) {
            Some(&idx) => {
                let old = self
                    .inner
                    .node_weight_mut(idx)
                    .ok_or_else(|| GraphError::NodeMissing(node.guid.to_string()))?;
                // A moved asset vacates its old path slot.
                if old.path != node.path {
                    self.path_index.remove(&old.path);
                }
                let guid = node.guid.clone();
                let path = node.path.clone();
                let active = node.active;
                *old = node;
                if active {
                    self.path_index.insert(path, guid);
                } else {
                    self.path_index.remove(&path);
                }
            }
            None => {
                let guid = node.guid.clone();
                let path = node.path.clone();
                let active = node.active;
                let idx = self.inner.add_node(node);
                self.guid_index.insert(guid.clone(), idx);
                if active {
                    self.path_index.insert(path, guid);
                }
            }
        }
        Ok(())
    }

    /// Mark a node inactive, cascading `active = false` to its edges.
    ///
    /// Nothing is removed: the history stays queryable.
    pub fn deactivate_node(&mut self, guid: &Guid) -> Result<()> {
        let &idx = self
            .guid_index
            .get(guid)
            .ok_or_else(|| GraphError::NodeMissing(guid.to_string()))?;

        let path = {
            let node = self
                .inner
                .node_weight_mut(idx)
                .ok_or_else(|| GraphError::NodeMissing(guid.to_string()))?;
            node.active = false;
            node.path.clone()
        };
        self.path_index.remove(&path);

        let incident: Vec<_> = self
            .inner
            .edges_directed(idx, Direction::Outgoing)
            .chain(self.inner.edges_directed(idx, Direction::Incoming))
            .map(|e| e.id())
            .collect();
        for eid in incident {
            if let Some(edge) = self.inner.edge_weight_mut(eid) {
                edge.active = false;
            }
        }
        Ok(())
    }

    /// Physically remove a node and every incident edge. Used only by
    /// transaction rollback; ordinary deletion deactivates instead.
    pub(crate) fn remove_node(&mut self, guid: &Guid) -> Result<AssetNode> {
        let idx = self
            .guid_index
            .remove(guid)
            .ok_or_else(|| GraphError::NodeMissing(guid.to_string()))?;
        let node = self
            .inner
            .remove_node(idx)
            .ok_or_else(|| GraphError::NodeMissing(guid.to_string()))?;
        self.path_index.remove(&node.path);
        Ok(node)
    }

    /// Insert an edge. Both endpoints must exist; the identity tuple must be
    /// new.
    pub fn add_edge(&mut self, edge: DependencyEdge) -> Result<()> {
        let &src = self
            .guid_index
            .get(&edge.source)
            .ok_or_else(|| GraphError::NodeMissing(edge.source.to_string()))?;
        let &tgt = self
            .guid_index
            .get(&edge.target)
            .ok_or_else(|| GraphError::NodeMissing(edge.target.to_string()))?;
        if self
            .edge(
                &edge.source,
                &edge.target,
                edge.dep_kind,
                edge.context_path.as_deref(),
            )
            .is_some()
        {
            return Err(GraphError::DuplicateEdge(format!(
                "{} -> {} ({})",
                edge.source, edge.target, edge.dep_kind
            )));
        }
        self.inner.add_edge(src, tgt, edge);
        Ok(())
    }

    /// Remove an edge by identity tuple.
    pub fn remove_edge(&mut self, key: &EdgeKey) -> Result<DependencyEdge> {
        let &src = self
            .guid_index
            .get(&key.source)
            .ok_or_else(|| GraphError::NodeMissing(key.source.to_string()))?;
        let found = self
            .inner
            .edges_directed(src, Direction::Outgoing)
            .find(|e| e.weight().key() == *key)
            .map(|e| e.id());
        let eid = found.ok_or_else(|| {
            GraphError::EdgeMissing(format!("{} -> {}", key.source, key.target))
        })?;
        self.inner
            .remove_edge(eid)
            .ok_or_else(|| GraphError::EdgeMissing(format!("{} -> {}", key.source, key.target)))
    }

    /// Mutable access to an edge by identity tuple. Used by rollback to
    /// restore cascaded flags.
    pub(crate) fn edge_mut(&mut self, key: &EdgeKey) -> Option<&mut DependencyEdge> {
        let &src = self.guid_index.get(&key.source)?;
        let eid = self
            .inner
            .edges_directed(src, Direction::Outgoing)
            .find(|e| e.weight().key() == *key)
            .map(|e| e.id())?;
        self.inner.edge_weight_mut(eid)
    }

    /// Replace the full outgoing edge set of `source` with `new_edges`.
    ///
    /// Computes the delta against the current set keyed by
    /// `(source, target, dep_kind, context_path)`: missing edges are removed,
    /// new ones added, identical ones left untouched.
    pub fn replace_edges_from(
        &mut self,
        source: &Guid,
        new_edges: Vec<DependencyEdge>,
    ) -> Result<EdgeDelta> {
        let &src = self
            .guid_index
            .get(source)
            .ok_or_else(|| GraphError::NodeMissing(source.to_string()))?;

        let current: HashMap<EdgeKey, petgraph::stable_graph::EdgeIndex> = self
            .inner
            .edges_directed(src, Direction::Outgoing)
            .map(|e| (e.weight().key(), e.id()))
            .collect();

        let mut delta = EdgeDelta::default();
        let mut keep: std::collections::HashSet<EdgeKey> =
            std::collections::HashSet::with_capacity(new_edges.len());

        for edge in new_edges {
            let key = edge.key();
            match current.get(&key) {
                Some(&eid) => {
                    // Same identity; refresh attributes in place.
                    if let Some(existing) = self.inner.edge_weight_mut(eid) {
                        *existing = edge;
                    }
                    delta.unchanged += 1;
                    keep.insert(key);
                }
                None => {
                    self.add_edge(edge)?;
                    delta.added += 1;
                    keep.insert(key);
                }
            }
        }

        for (key, eid) in &current {
            if !keep.contains(key) {
                self.inner.remove_edge(*eid);
                delta.removed += 1;
            }
        }
        Ok(delta)
    }

    /// Serialize the graph for persistence or export. Output is sorted for
    /// stable diffs.
    pub fn dump(&self) -> GraphDump {
        let mut nodes: Vec<AssetNode> = self.all_nodes().cloned().collect();
        nodes.sort_by(|a, b| a.guid.cmp(&b.guid));
        let mut edges: Vec<DependencyEdge> = self.all_edges().cloned().collect();
        edges.sort_by_key(DependencyEdge::key);
        GraphDump {
            schema_version: GraphDump::SCHEMA_VERSION,
            nodes,
            edges,
        }
    }

    /// Rebuild a store from a dump (cold start, import).
    pub fn from_dump(dump: GraphDump) -> Result<Self> {
        if dump.schema_version > GraphDump::SCHEMA_VERSION
            || dump.schema_version + 1 < GraphDump::SCHEMA_VERSION
        {
            return Err(GraphError::SchemaVersion {
                found: dump.schema_version,
                supported: GraphDump::SCHEMA_VERSION,
            });
        }
        let mut store = Self::new();
        for node in dump.nodes {
            store.upsert_node(node)?;
        }
        for edge in dump.edges {
            store.add_edge(edge)?;
        }
        Ok(store)
    }
}

/// Durable representation of the graph.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GraphDump {
    pub schema_version: i64,
    pub nodes: Vec<AssetNode>,
    pub edges: Vec<DependencyEdge>,
}

impl GraphDump {
    pub const SCHEMA_VERSION: i64 = 1;
}

// ── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::AssetKind;

    fn guid(n: u8) -> Guid {
        Guid::parse(&format!("{:032x}", n)).unwrap()
    }

    fn node(n: u8, path: &str) -> AssetNode {
        AssetNode::new(guid(n), path, AssetKind::Prefab)
    }

    #[test]
    fn upsert_and_lookup() {
        let mut store = GraphStore::new();
        store.upsert_node(node(1, "Assets/A.prefab")).unwrap();
        assert!(store.contains(&guid(1)));
        assert_eq!(store.resolve_path("Assets/A.prefab"), Some(guid(1)));
        assert_eq!(store.node(&guid(1)).unwrap().path, "Assets/A.prefab");
    }

    #[test]
    fn upsert_rejects_path_collision() {
        let mut store = GraphStore::new();
        store.upsert_node(node(1, "Assets/A.prefab")).unwrap();
        let err = store.upsert_node(node(2, "Assets/A.prefab")).unwrap_err();
        assert!(matches!(err, GraphError::PathCollision { .. }));
    }

    #[test]
    fn upsert_move_updates_path_index() {
        let mut store = GraphStore::new();
        store.upsert_node(node(1, "Assets/A.prefab")).unwrap();
        store.upsert_node(node(1, "Assets/B.prefab")).unwrap();
        assert_eq!(store.resolve_path("Assets/A.prefab"), None);
        assert_eq!(store.resolve_path("Assets/B.prefab"), Some(guid(1)));
    }

    #[test]
    fn deactivate_cascades_and_frees_path() {
        let mut store = GraphStore::new();
        store.upsert_node(node(1, "Assets/A.prefab")).unwrap();
        store.upsert_node(node(2, "Assets/B.mat")).unwrap();
        store
            .add_edge(DependencyEdge::new(guid(1), guid(2), DependencyKind::Material))
            .unwrap();

        store.deactivate_node(&guid(2)).unwrap();
        assert!(!store.node(&guid(2)).unwrap().active);
        assert_eq!(store.resolve_path("Assets/B.mat"), None);
        let (edge, _) = store.neighbors_out(&guid(1))[0];
        assert!(!edge.active);
    }

    #[test]
    fn duplicate_edge_rejected() {
        let mut store = GraphStore::new();
        store.upsert_node(node(1, "a")).unwrap();
        store.upsert_node(node(2, "b")).unwrap();
        let edge = DependencyEdge::new(guid(1), guid(2), DependencyKind::Material);
        store.add_edge(edge.clone()).unwrap();
        assert!(matches!(
            store.add_edge(edge),
            Err(GraphError::DuplicateEdge(_))
        ));
    }

    #[test]
    fn neighbors_are_duals() {
        let mut store = GraphStore::new();
        store.upsert_node(node(1, "a")).unwrap();
        store.upsert_node(node(2, "b")).unwrap();
        store
            .add_edge(DependencyEdge::new(guid(1), guid(2), DependencyKind::Texture))
            .unwrap();

        let out = store.neighbors_out(&guid(1));
        let inc = store.neighbors_in(&guid(2));
        assert_eq!(out.len(), 1);
        assert_eq!(inc.len(), 1);
        assert_eq!(out[0].1.guid, guid(2));
        assert_eq!(inc[0].1.guid, guid(1));
    }

    #[test]
    fn replace_edges_computes_delta() {
        let mut store = GraphStore::new();
        for (n, p) in [(1, "a"), (2, "b"), (3, "c"), (4, "d")] {
            store.upsert_node(node(n, p)).unwrap();
        }
        store
            .replace_edges_from(
                &guid(1),
                vec![
                    DependencyEdge::new(guid(1), guid(2), DependencyKind::Material),
                    DependencyEdge::new(guid(1), guid(3), DependencyKind::Texture),
                ],
            )
            .unwrap();

        // Drop the edge to 3, keep 2, add 4.
        let delta = store
            .replace_edges_from(
                &guid(1),
                vec![
                    DependencyEdge::new(guid(1), guid(2), DependencyKind::Material),
                    DependencyEdge::new(guid(1), guid(4), DependencyKind::Mesh),
                ],
            )
            .unwrap();
        assert_eq!(delta.added, 1);
        assert_eq!(delta.removed, 1);
        assert_eq!(delta.unchanged, 1);
        assert_eq!(store.neighbors_out(&guid(1)).len(), 2);
    }

    #[test]
    fn replace_edges_identical_set_is_noop() {
        let mut store = GraphStore::new();
        store.upsert_node(node(1, "a")).unwrap();
        store.upsert_node(node(2, "b")).unwrap();
        let edges = vec![DependencyEdge::new(guid(1), guid(2), DependencyKind::Material)];
        store.replace_edges_from(&guid(1), edges.clone()).unwrap();
        let delta = store.replace_edges_from(&guid(1), edges).unwrap();
        assert!(delta.is_empty());
        assert_eq!(delta.unchanged, 1);
    }

    #[test]
    fn dump_round_trip_is_isomorphic() {
        let mut store = GraphStore::new();
        store.upsert_node(node(1, "a")).unwrap();
        store.upsert_node(node(2, "b")).unwrap();
        store
            .add_edge(DependencyEdge::new(guid(1), guid(2), DependencyKind::Shader))
            .unwrap();

        let dump = store.dump();
        let restored = GraphStore::from_dump(dump.clone()).unwrap();
        assert_eq!(restored.dump(), dump);
    }

    #[test]
    fn dump_rejects_future_schema() {
        let mut dump = GraphStore::new().dump();
        dump.schema_version = GraphDump::SCHEMA_VERSION + 1;
        assert!(matches!(
            GraphStore::from_dump(dump),
            Err(GraphError::SchemaVersion { .. })
        ));
    }

    #[test]
    fn normalize_path_forward_slashes() {
        assert_eq!(normalize_path("Assets\\Sub\\A.prefab"), "Assets/Sub/A.prefab");
        assert_eq!(normalize_path("./Assets/A.prefab"), "Assets/A.prefab");
    }

    #[test]
    fn path_index_bijective_over_active_nodes() {
        let mut store = GraphStore::new();
        for (n, p) in [(1, "a"), (2, "b"), (3, "c")] {
            store.upsert_node(node(n, p)).unwrap();
        }
        store.deactivate_node(&guid(3)).unwrap();

        let active: Vec<_> = store.all_nodes().filter(|n| n.active).collect();
        assert_eq!(active.len(), 2);
        for n in active {
            assert_eq!(store.resolve_path(&n.path), Some(n.guid.clone()));
        }
    }
}
