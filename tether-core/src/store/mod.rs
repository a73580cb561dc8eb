//! Durable persistence for the graph and the signature cache.

pub mod schema;
pub mod sqlite;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::scan::SignatureCache;
use tether_graphs::{AssetNode, DependencyEdge, GraphDump, Guid};

pub use sqlite::SqliteStore;

/// Summary statistics for the store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreStats {
    pub total_assets: u64,
    pub active_assets: u64,
    pub total_dependencies: u64,
    pub assets_by_kind: HashMap<String, u64>,
    pub db_size_bytes: u64,
}

/// The persistence abstraction. The pipeline reads/writes through this
/// trait; the in-memory graph is reconstructed from [`AssetStore::load_graph`]
/// on cold start.
#[async_trait::async_trait]
pub trait AssetStore: Send + Sync {
    // ── Graph persistence ──────────────────────────────────────────

    /// Load the full durable graph for cold-start reconstruction.
    async fn load_graph(&self) -> Result<GraphDump>;

    /// Insert or update one asset node.
    async fn save_node(&self, node: &AssetNode) -> Result<()>;

    /// Mark an asset (and its edges) inactive.
    async fn deactivate_node(&self, guid: &Guid) -> Result<()>;

    /// Rebuild the outgoing edge rows of one source asset wholesale.
    async fn replace_dependencies(&self, source: &Guid, edges: &[DependencyEdge]) -> Result<()>;

    // ── Signature cache ────────────────────────────────────────────

    async fn load_signatures(&self) -> Result<SignatureCache>;

    /// Overwrite the signature table with the scan's final cache.
    async fn flush_signatures(&self, cache: &SignatureCache, scan_id: i64) -> Result<()>;

    // ── Scan history ───────────────────────────────────────────────

    /// Open a scan-history row; returns the scan id.
    async fn begin_scan(&self) -> Result<i64>;

    /// Close a scan-history row with a serialized summary.
    async fn finish_scan(&self, scan_id: i64, summary: &str) -> Result<()>;

    // ── Metrics ────────────────────────────────────────────────────

    async fn stats(&self) -> Result<StoreStats>;
}
