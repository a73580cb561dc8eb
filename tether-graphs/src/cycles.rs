//! Cycle detection and classification.
//!
//! Tarjan SCC narrows the search to non-trivial components; within each, a
//! Johnson-style bounded DFS enumerates simple cycles starting from their
//! lexicographically smallest node, which makes every cycle come out exactly
//! once in canonical rotation. Components larger than the length cap still
//! appear in the report even when their cycles are not enumerated.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, RwLock};
use std::time::Instant;

use chrono::{DateTime, Utc};
use petgraph::graph::DiGraph;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::model::{AssetKind, DependencyKind, Guid, Strength};
use crate::store::GraphStore;
use crate::Result;

pub const DEFAULT_MAX_CYCLE_LENGTH: usize = 20;

/// Fraction of the graph the incremental mode may touch before falling back
/// to a full pass.
const INCREMENTAL_FULL_THRESHOLD: f64 = 0.10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleType {
    SelfLoop,
    SimpleCycle,
    ComplexCycle,
    NestedCycle,
}

impl CycleType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SelfLoop => "self_loop",
            Self::SimpleCycle => "simple_cycle",
            Self::ComplexCycle => "complex_cycle",
            Self::NestedCycle => "nested_cycle",
        }
    }

    fn from_length(len: usize) -> Self {
        match len {
            1 => Self::SelfLoop,
            2..=3 => Self::SimpleCycle,
            4..=8 => Self::ComplexCycle,
            _ => Self::NestedCycle,
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum CycleSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl CycleSeverity {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
            Self::Critical => "CRITICAL",
        }
    }

    fn from_length(len: usize) -> Self {
        match len {
            1 => Self::Low,
            2..=3 => Self::Medium,
            4..=7 => Self::High,
            _ => Self::Critical,
        }
    }

    fn bump(self) -> Self {
        match self {
            Self::Low => Self::Medium,
            Self::Medium => Self::High,
            Self::High | Self::Critical => Self::Critical,
        }
    }
}

/// A directed edge inside a cycle, by endpoint GUIDs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleEdge {
    pub source: Guid,
    pub target: Guid,
    pub strength: Strength,
    pub dep_kind: DependencyKind,
}

/// One detected cycle in canonical rotation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleInfo {
    /// Nodes in traversal order, starting at the smallest GUID.
    pub nodes: Vec<Guid>,
    pub length: usize,
    pub cycle_type: CycleType,
    pub severity: CycleSeverity,
    /// Edges whose removal is suggested to break the cycle.
    pub break_edges: Vec<CycleEdge>,
    pub suggestions: Vec<String>,
}

/// A strongly connected component worth reporting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SccSummary {
    pub nodes: Vec<Guid>,
    pub size: usize,
    /// False when the component exceeded the cycle-length cap and its simple
    /// cycles were not enumerated.
    pub cycles_enumerated: bool,
}

/// Full analysis output. Field order is the stable JSON key order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleAnalysisReport {
    pub cycles: Vec<CycleInfo>,
    pub sccs: Vec<SccSummary>,
    pub counts_by_type: BTreeMap<String, usize>,
    pub counts_by_severity: BTreeMap<String, usize>,
    pub affected_nodes: Vec<Guid>,
    /// Nodes participating in two or more cycles, with occurrence counts.
    pub hotspot_nodes: BTreeMap<String, usize>,
    pub largest_cycle: Option<CycleInfo>,
    pub most_critical_cycle: Option<CycleInfo>,
    pub analysis_time_ms: u64,
    pub algorithm: String,
    pub analyzed_at: DateTime<Utc>,
}

/// Rotate a cycle into canonical form: traversal order, starting at the
/// lexicographically smallest node.
pub fn canonicalize_cycle(nodes: &[Guid]) -> Vec<Guid> {
    if nodes.is_empty() {
        return Vec::new();
    }
    let smallest = nodes
        .iter()
        .enumerate()
        .min_by_key(|(_, g)| *g)
        .map(|(i, _)| i)
        .unwrap_or(0);
    nodes[smallest..]
        .iter()
        .chain(nodes[..smallest].iter())
        .cloned()
        .collect()
}

/// Direction-insensitive dedup key: of the canonical rotation and the
/// canonical rotation of the reversed sequence, the lexicographically
/// smaller. Two traversals of the same ring collapse onto one key; the
/// reported cycle keeps its real traversal order.
fn canonical_key(nodes: &[Guid]) -> Vec<Guid> {
    let forward = canonicalize_cycle(nodes);
    let reversed_input: Vec<Guid> = nodes.iter().rev().cloned().collect();
    let reversed = canonicalize_cycle(&reversed_input);
    forward.min(reversed)
}

/// Adjacency snapshot the analyzer works on; taken under the read lock and
/// released before enumeration.
struct GraphView {
    nodes: Vec<Guid>,
    kinds: HashMap<Guid, AssetKind>,
    /// Strongest strength and the kinds present, per (source, target) pair.
    edges: HashMap<(Guid, Guid), (Strength, Vec<DependencyKind>)>,
    adjacency: HashMap<Guid, Vec<Guid>>,
}

impl GraphView {
    fn capture(store: &GraphStore) -> Self {
        let mut kinds = HashMap::new();
        let mut nodes = Vec::new();
        for node in store.all_nodes().filter(|n| n.active) {
            kinds.insert(node.guid.clone(), node.kind);
            nodes.push(node.guid.clone());
        }
        nodes.sort();

        let mut edges: HashMap<(Guid, Guid), (Strength, Vec<DependencyKind>)> = HashMap::new();
        let mut adjacency: HashMap<Guid, Vec<Guid>> = HashMap::new();
        for edge in store.all_edges().filter(|e| e.active) {
            if !kinds.contains_key(&edge.source) || !kinds.contains_key(&edge.target) {
                continue;
            }
            let entry = edges
                .entry((edge.source.clone(), edge.target.clone()))
                .or_insert((edge.strength, Vec::new()));
            entry.0 = entry.0.max(edge.strength);
            if !entry.1.contains(&edge.dep_kind) {
                entry.1.push(edge.dep_kind);
            }
            let targets = adjacency.entry(edge.source.clone()).or_default();
            if !targets.contains(&edge.target) {
                targets.push(edge.target.clone());
            }
        }
        for targets in adjacency.values_mut() {
            targets.sort();
        }
        Self {
            nodes,
            kinds,
            edges,
            adjacency,
        }
    }

    fn edge_info(&self, source: &Guid, target: &Guid) -> Option<&(Strength, Vec<DependencyKind>)> {
        self.edges.get(&(source.clone(), target.clone()))
    }

    fn cycle_edges(&self, cycle: &[Guid]) -> Vec<CycleEdge> {
        let mut out = Vec::with_capacity(cycle.len());
        for i in 0..cycle.len() {
            let source = &cycle[i];
            let target = &cycle[(i + 1) % cycle.len()];
            if let Some((strength, kinds)) = self.edge_info(source, target) {
                // Prefer the indirect kind for break-edge reporting when a
                // pair carries several edges.
                let dep_kind = kinds
                    .iter()
                    .copied()
                    .find(|k| *k == DependencyKind::Indirect)
                    .or_else(|| kinds.first().copied())
                    .unwrap_or(DependencyKind::Indirect);
                out.push(CycleEdge {
                    source: source.clone(),
                    target: target.clone(),
                    strength: *strength,
                    dep_kind,
                });
            }
        }
        out
    }
}

/// Enumerates and classifies cycles against a shared graph store.
pub struct CycleAnalyzer {
    graph: Arc<RwLock<GraphStore>>,
    max_cycle_length: usize,
}

impl CycleAnalyzer {
    pub fn new(graph: Arc<RwLock<GraphStore>>, max_cycle_length: usize) -> Self {
        Self {
            graph,
            max_cycle_length,
        }
    }

    /// Full analysis over the active graph.
    pub fn analyze(&self) -> Result<CycleAnalysisReport> {
        let start = Instant::now();
        let view = {
            let store = self.graph.read().expect("graph lock poisoned");
            GraphView::capture(&store)
        };
        let report = self.analyze_view(&view, &view.nodes, "tarjan+johnson", start);
        info!(
            cycles = report.cycles.len(),
            sccs = report.sccs.len(),
            elapsed_ms = report.analysis_time_ms,
            "Cycle analysis complete"
        );
        Ok(report)
    }

    /// Re-analysis scoped to the components touched by `changed` nodes plus
    /// a one-hop expansion. Falls back to a full pass when the affected
    /// region exceeds 10 % of the graph.
    pub fn analyze_incremental(&self, changed: &[Guid]) -> Result<CycleAnalysisReport> {
        let start = Instant::now();
        let view = {
            let store = self.graph.read().expect("graph lock poisoned");
            GraphView::capture(&store)
        };
        if view.nodes.is_empty() {
            return Ok(self.analyze_view(&view, &view.nodes, "incremental", start));
        }

        let sccs = compute_sccs(&view, &view.nodes);
        let mut affected: HashSet<Guid> = HashSet::new();
        for scc in &sccs {
            if scc.iter().any(|g| changed.contains(g)) {
                affected.extend(scc.iter().cloned());
            }
        }
        affected.extend(changed.iter().cloned());

        // One-hop expansion around the affected set.
        let hop: Vec<Guid> = view
            .nodes
            .iter()
            .filter(|g| {
                view.adjacency
                    .get(*g)
                    .is_some_and(|ts| ts.iter().any(|t| affected.contains(t)))
            })
            .cloned()
            .collect();
        affected.extend(hop);
        for guid in changed {
            if let Some(targets) = view.adjacency.get(guid) {
                affected.extend(targets.iter().cloned());
            }
        }

        let ratio = affected.len() as f64 / view.nodes.len() as f64;
        if ratio > INCREMENTAL_FULL_THRESHOLD {
            debug!(
                affected = affected.len(),
                total = view.nodes.len(),
                "Incremental region too large, running full analysis"
            );
            return Ok(self.analyze_view(&view, &view.nodes, "tarjan+johnson", start));
        }

        let mut scope: Vec<Guid> = affected.into_iter().collect();
        scope.sort();
        Ok(self.analyze_view(&view, &scope, "incremental", start))
    }

    fn analyze_view(
        &self,
        view: &GraphView,
        scope: &[Guid],
        algorithm: &str,
        start: Instant,
    ) -> CycleAnalysisReport {
        let sccs = compute_sccs(view, scope);
        let mut cycles: Vec<CycleInfo> = Vec::new();
        let mut scc_summaries: Vec<SccSummary> = Vec::new();

        for scc in &sccs {
            let has_self_loop = scc.len() == 1 && view.edge_info(&scc[0], &scc[0]).is_some();
            if scc.len() < 2 && !has_self_loop {
                continue;
            }
            let enumerable = scc.len() <= self.max_cycle_length;
            let mut sorted: Vec<Guid> = scc.clone();
            sorted.sort();
            scc_summaries.push(SccSummary {
                nodes: sorted.clone(),
                size: sorted.len(),
                cycles_enumerated: enumerable,
            });

            for raw in enumerate_cycles(view, &sorted, self.max_cycle_length) {
                let canonical = canonicalize_cycle(&raw);
                cycles.push(self.classify(view, canonical));
            }
        }

        // Dedup by the direction-insensitive key, then order for stable
        // reports.
        let mut seen: HashSet<Vec<Guid>> = HashSet::new();
        cycles.retain(|c| seen.insert(canonical_key(&c.nodes)));
        cycles.sort_by(|a, b| {
            b.severity
                .cmp(&a.severity)
                .then(b.length.cmp(&a.length))
                .then(a.nodes.cmp(&b.nodes))
        });
        scc_summaries.sort_by(|a, b| a.nodes.cmp(&b.nodes));

        let mut counts_by_type: BTreeMap<String, usize> = BTreeMap::new();
        let mut counts_by_severity: BTreeMap<String, usize> = BTreeMap::new();
        let mut occurrences: BTreeMap<String, usize> = BTreeMap::new();
        let mut affected: HashSet<Guid> = HashSet::new();
        for cycle in &cycles {
            *counts_by_type
                .entry(cycle.cycle_type.as_str().to_string())
                .or_default() += 1;
            *counts_by_severity
                .entry(cycle.severity.as_str().to_string())
                .or_default() += 1;
            for node in &cycle.nodes {
                affected.insert(node.clone());
                *occurrences.entry(node.to_string()).or_default() += 1;
            }
        }
        let hotspot_nodes: BTreeMap<String, usize> = occurrences
            .into_iter()
            .filter(|(_, count)| *count >= 2)
            .collect();

        let mut affected_nodes: Vec<Guid> = affected.into_iter().collect();
        affected_nodes.sort();

        let largest_cycle = cycles.iter().max_by_key(|c| c.length).cloned();
        let most_critical_cycle = cycles
            .iter()
            .max_by(|a, b| a.severity.cmp(&b.severity).then(a.length.cmp(&b.length)))
            .cloned();

        CycleAnalysisReport {
            cycles,
            sccs: scc_summaries,
            counts_by_type,
            counts_by_severity,
            affected_nodes,
            hotspot_nodes,
            largest_cycle,
            most_critical_cycle,
            analysis_time_ms: start.elapsed().as_millis() as u64,
            algorithm: algorithm.to_string(),
            analyzed_at: Utc::now(),
        }
    }

    fn classify(&self, view: &GraphView, nodes: Vec<Guid>) -> CycleInfo {
        let length = nodes.len();
        let cycle_type = CycleType::from_length(length);
        let edges = view.cycle_edges(&nodes);

        let mut severity = CycleSeverity::from_length(length);
        if edges.iter().any(|e| e.strength >= Strength::Critical) {
            severity = severity.bump();
        }
        let has_heavy_kind = nodes.iter().any(|g| {
            matches!(
                view.kinds.get(g),
                Some(AssetKind::Scene | AssetKind::Prefab | AssetKind::Script)
            )
        });
        if has_heavy_kind {
            severity = severity.bump();
        }

        let mut break_edges: Vec<CycleEdge> = edges
            .iter()
            .filter(|e| e.strength <= Strength::Weak || e.dep_kind == DependencyKind::Indirect)
            .cloned()
            .collect();
        if break_edges.is_empty() {
            if let Some(weakest) = edges.iter().min_by_key(|e| e.strength) {
                break_edges.push(weakest.clone());
            }
        }

        let suggestions = self.suggest_fixes(view, &nodes, &break_edges);

        CycleInfo {
            nodes,
            length,
            cycle_type,
            severity,
            break_edges,
            suggestions,
        }
    }

    fn suggest_fixes(
        &self,
        view: &GraphView,
        nodes: &[Guid],
        break_edges: &[CycleEdge],
    ) -> Vec<String> {
        let mut suggestions = Vec::new();
        let script_count = nodes
            .iter()
            .filter(|g| view.kinds.get(*g) == Some(&AssetKind::Script))
            .count();
        if script_count >= 2 {
            suggestions.push(
                "Multiple scripts reference each other; extract a shared interface or event \
                 channel to break the direct coupling"
                    .to_string(),
            );
        }
        if nodes.len() == 1 {
            suggestions.push("Asset references itself; drop the self reference".to_string());
        }
        for edge in break_edges {
            suggestions.push(format!(
                "Remove the {} reference {} -> {} (strength {})",
                edge.dep_kind, edge.source, edge.target, edge.strength
            ));
        }
        suggestions
    }
}

/// SCCs over the view restricted to `scope`.
fn compute_sccs(view: &GraphView, scope: &[Guid]) -> Vec<Vec<Guid>> {
    let scope_set: HashSet<&Guid> = scope.iter().collect();
    let mut indices: HashMap<&Guid, petgraph::graph::NodeIndex> = HashMap::new();
    let mut graph: DiGraph<&Guid, ()> = DiGraph::new();
    for guid in scope {
        indices.insert(guid, graph.add_node(guid));
    }
    for ((src, tgt), _) in &view.edges {
        if let (Some(&s), Some(&t)) = (indices.get(src), indices.get(tgt)) {
            if scope_set.contains(src) && scope_set.contains(tgt) {
                graph.add_edge(s, t, ());
            }
        }
    }
    petgraph::algo::tarjan_scc(&graph)
        .into_iter()
        .map(|scc| scc.into_iter().map(|i| graph[i].clone()).collect())
        .collect()
}

/// Johnson-style bounded enumeration of the simple cycles inside one SCC.
///
/// Nodes are processed in ascending order and the search never visits a node
/// smaller than the start, so each cycle is produced exactly once, already
/// rotated to its smallest node.
fn enumerate_cycles(view: &GraphView, scc: &[Guid], max_len: usize) -> Vec<Vec<Guid>> {
    let mut cycles = Vec::new();
    let members: HashSet<&Guid> = scc.iter().collect();

    for start in scc {
        // Self-loop first; the DFS below only finds cycles of length ≥ 2.
        if view.edge_info(start, start).is_some() {
            cycles.push(vec![start.clone()]);
        }
        let mut path = vec![start.clone()];
        let mut on_path: HashSet<Guid> = HashSet::from([start.clone()]);
        dfs_cycles(
            view, start, &members, max_len, &mut path, &mut on_path, &mut cycles,
        );
    }
    cycles
}

fn dfs_cycles(
    view: &GraphView,
    start: &Guid,
    members: &HashSet<&Guid>,
    max_len: usize,
    path: &mut Vec<Guid>,
    on_path: &mut HashSet<Guid>,
    cycles: &mut Vec<Vec<Guid>>,
) {
    let tail = path.last().expect("path never empty").clone();
    let Some(targets) = view.adjacency.get(&tail) else {
        return;
    };
    for target in targets {
        if target == start {
            if path.len() >= 2 && path.len() <= max_len {
                cycles.push(path.clone());
            }
            continue;
        }
        if !members.contains(target) || target < start {
            continue;
        }
        if path.len() >= max_len {
            continue;
        }
        if on_path.insert(target.clone()) {
            path.push(target.clone());
            dfs_cycles(view, start, members, max_len, path, on_path, cycles);
            path.pop();
            on_path.remove(target);
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────────
