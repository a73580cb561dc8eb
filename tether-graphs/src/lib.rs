//! Dependency graph engine for Unity asset references.
//!
//! Owns the in-memory [`GraphStore`], the transactional [`GraphUpdater`],
//! the read-only [`QueryEngine`], and the [`CycleAnalyzer`]. The scanning
//! and persistence layers live in `tether-core`; this crate knows nothing
//! about files.

pub mod cycles;
pub mod model;
pub mod query;
pub mod store;
pub mod updater;

pub use cycles::{CycleAnalysisReport, CycleAnalyzer, CycleSeverity, CycleType};
pub use model::{
    AssetKind, AssetNode, DependencyEdge, DependencyKind, EdgeKey, Guid, GuidError, Strength,
};
pub use query::{
    ImpactOperation, ImpactResult, ImpactSeverity, QueryEngine, QueryOptions, UnusedFilter,
};
pub use store::{normalize_path, EdgeDelta, GraphDump, GraphStore};
pub use updater::{
    Conflict, ConflictKind, GraphOp, GraphUpdater, Transaction, TransactionStatus, UpdaterStats,
};

/// Error type for the graph engine.
#[derive(thiserror::Error, Debug)]
pub enum GraphError {
    /// An operation referenced a GUID with no node in the graph.
    #[error("Node not found: {0}")]
    NodeMissing(String),

    /// An operation referenced an edge that does not exist.
    #[error("Edge not found: {0}")]
    EdgeMissing(String),

    /// An edge with the same identity tuple already exists.
    #[error("Duplicate edge: {0}")]
    DuplicateEdge(String),

    /// Two active nodes cannot share a path.
    #[error("Path {path} already owned by {existing}, cannot assign to {incoming}")]
    PathCollision {
        path: String,
        existing: String,
        incoming: String,
    },

    /// A persisted dump was written by an incompatible schema version.
    #[error("Unsupported graph schema version {found} (supported: {supported} and one before)")]
    SchemaVersion { found: i64, supported: i64 },

    /// A transaction was rejected by conflict detection; nothing was applied.
    #[error("Transaction rejected with {} conflict(s)", conflicts.len())]
    TransactionRejected { conflicts: Vec<updater::Conflict> },

    #[error("Invalid GUID: {0}")]
    Guid(#[from] model::GuidError),
}

/// Convenience alias for `Result<T, GraphError>`.
pub type Result<T> = std::result::Result<T, GraphError>;
