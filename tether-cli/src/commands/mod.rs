pub mod detect_circular;
pub mod export;
pub mod find_deps;
pub mod find_unused;
pub mod init;
pub mod scan;
pub mod stats;

use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicU64;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use anyhow::Context;
use clap::Subcommand;

use tether_core::config::TetherConfig;
use tether_core::store::SqliteStore;
use tether_graphs::{GraphStore, Guid, QueryEngine};

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Write default config and create empty persistent stores
    Init(init::InitArgs),
    /// Scan the project and update the dependency graph
    Scan(scan::ScanArgs),
    /// Show what an asset depends on (or what references it)
    FindDeps(find_deps::FindDepsArgs),
    /// List assets nothing references
    FindUnused(find_unused::FindUnusedArgs),
    /// Detect circular dependencies
    DetectCircular(detect_circular::DetectCircularArgs),
    /// Dump the graph as json, csv, or dot
    Export(export::ExportArgs),
    /// Summary statistics
    Stats(stats::StatsArgs),
}

pub async fn run(cmd: Command) -> anyhow::Result<()> {
    match cmd {
        Command::Init(args) => init::run(args).await,
        Command::Scan(args) => scan::run(args).await,
        Command::FindDeps(args) => find_deps::run(args).await,
        Command::FindUnused(args) => find_unused::run(args).await,
        Command::DetectCircular(args) => detect_circular::run(args).await,
        Command::Export(args) => export::run(args).await,
        Command::Stats(args) => stats::run(args).await,
    }
}

/// Resolve the project root and load its config and store.
pub fn open_project(path: &Path) -> anyhow::Result<(PathBuf, TetherConfig, SqliteStore)> {
    let root = std::fs::canonicalize(path)
        .with_context(|| format!("Cannot resolve path: {}", path.display()))?;
    let config = TetherConfig::load(&root).with_context(|| {
        format!(
            "tether is not initialized in {}. Run `tether init` first.",
            root.display()
        )
    })?;
    let db_path = config.db_path(&root);
    let store = SqliteStore::open(&db_path)
        .with_context(|| format!("Cannot open database: {}", db_path.display()))?;
    Ok((root, config, store))
}

/// Load the persisted graph into memory for read-only commands.
pub async fn load_graph(store: &SqliteStore) -> anyhow::Result<Arc<RwLock<GraphStore>>> {
    use tether_core::store::AssetStore;
    let dump = store.load_graph().await.context("Cannot load graph")?;
    let graph = GraphStore::from_dump(dump).context("Cannot rebuild graph")?;
    Ok(Arc::new(RwLock::new(graph)))
}

/// A query engine over a freshly loaded graph (no live updater, so the
/// generation counter is static).
pub fn query_engine(graph: Arc<RwLock<GraphStore>>, config: &TetherConfig) -> QueryEngine {
    QueryEngine::new(
        graph,
        Arc::new(AtomicU64::new(0)),
        Duration::from_secs(config.query.cache_ttl_s),
    )
}

/// Interpret a user-supplied asset identifier: a GUID, or a project path.
pub fn resolve_target(graph: &GraphStore, raw: &str) -> Option<Guid> {
    if let Ok(guid) = Guid::parse(raw) {
        if graph.contains(&guid) {
            return Some(guid);
        }
    }
    let normalized = tether_graphs::normalize_path(raw);
    graph.resolve_path(&normalized)
}
