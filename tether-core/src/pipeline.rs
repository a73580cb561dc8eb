//! Scan orchestration.
//!
//! One scan runs as a small pipeline: a blocking walker/classifier task
//! feeds a bounded work queue, `N` blocking parser workers pull from it and
//! push parsed records over an MPSC channel, and this task — the single
//! updater — applies them to the graph in arrival order, one transaction at
//! a time. Meta records apply immediately so the path↔GUID index fills
//! before asset records resolve against it; asset and script records are
//! deferred until the channel drains. A shared cancellation flag is checked
//! at every queue boundary; on cancellation the signature cache is not
//! flushed, so no partial progress is committed.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use crate::config::TetherConfig;
use crate::error::{ParseError, Result, ScanError};
use crate::parse::{self, companion_path, ParsedRecord};
use crate::progress::ProgressReporter;
use crate::report::{IoFailure, ParseFailure, ResolveWarning, ScanReport, SkippedLarge};
use crate::scan::{
    ChangeDetector, ChangeKind, ChangeRecord, FileWalker, Signature, SignatureCache, WalkEvent,
};
use crate::store::AssetStore;
use tether_graphs::{
    AssetNode, DependencyEdge, GraphStore, GraphUpdater, Guid, UpdaterStats,
};

/// What kind of scan to run.
#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
    /// Ignore the signature cache and reprocess every candidate file.
    pub full: bool,
    /// Restrict the walk to these roots instead of the configured ones.
    pub paths: Option<Vec<String>>,
}

/// One unit of parser work.
struct WorkItem {
    abs_path: PathBuf,
    rel_path: String,
    new_sig: Option<Signature>,
}

/// Parser output heading for the updater.
struct RecordMsg {
    rel_path: String,
    abs_path: PathBuf,
    new_sig: Option<Signature>,
    result: std::result::Result<Option<ParsedRecord>, ParseError>,
}

/// Walker-side tallies, returned when the walk task joins.
#[derive(Default)]
struct WalkStats {
    walked: u64,
    new: u64,
    modified: u64,
    unchanged: u64,
    skipped: Vec<SkippedLarge>,
    io_errors: Vec<IoFailure>,
    cancelled: bool,
}

/// A scan session: the in-memory graph, its updater, and the config they
/// were built from. Construct once, run any number of scans, query through
/// [`ScanSession::graph`].
pub struct ScanSession {
    project_root: PathBuf,
    config: TetherConfig,
    graph: Arc<RwLock<GraphStore>>,
    updater: GraphUpdater,
}

impl ScanSession {
    /// Fresh session with an empty graph.
    pub fn new(project_root: &Path, config: TetherConfig) -> Self {
        let graph = Arc::new(RwLock::new(GraphStore::new()));
        let updater = GraphUpdater::new(Arc::clone(&graph), config.graph.reject_new_cycles);
        Self {
            project_root: project_root.to_path_buf(),
            config,
            graph,
            updater,
        }
    }

    /// Session bootstrapped from the persisted graph (cold start).
    pub async fn with_store(
        project_root: &Path,
        config: TetherConfig,
        store: &dyn AssetStore,
    ) -> Result<Self> {
        let dump = store.load_graph().await?;
        let graph = Arc::new(RwLock::new(GraphStore::from_dump(dump)?));
        let updater = GraphUpdater::new(Arc::clone(&graph), config.graph.reject_new_cycles);
        Ok(Self {
            project_root: project_root.to_path_buf(),
            config,
            graph,
            updater,
        })
    }

    pub fn graph(&self) -> Arc<RwLock<GraphStore>> {
        Arc::clone(&self.graph)
    }

    /// Mutation generation handle for query caches.
    pub fn generation(&self) -> Arc<AtomicU64> {
        self.updater.generation()
    }

    pub fn updater_stats(&self) -> UpdaterStats {
        self.updater.stats()
    }

    pub fn config(&self) -> &TetherConfig {
        &self.config
    }

    /// Run one scan.
    #[instrument(skip_all, fields(root = %self.project_root.display(), full = opts.full))]
    pub async fn scan(
        &mut self,
        store: &dyn AssetStore,
        opts: &ScanOptions,
        progress: &dyn ProgressReporter,
        cancel: Arc<AtomicBool>,
    ) -> Result<ScanReport> {
        let start = Instant::now();
        let scan_id = store.begin_scan().await?;
        let mut report = ScanReport {
            scan_id,
            full_scan: opts.full,
            ..Default::default()
        };

        let cache = if opts.full {
            SignatureCache::new()
        } else {
            store.load_signatures().await?
        };
        info!(cached_signatures = cache.len(), "Scan starting");
        progress.start("scan", None);

        // ── Walker / classifier ────────────────────────────────────
        let batch = self.config.performance.batch_size.max(1);
        let (work_tx, work_rx) = mpsc::channel::<WorkItem>(batch);
        let (rec_tx, mut rec_rx) = mpsc::channel::<RecordMsg>(batch);

        let mut scan_section = self.config.scan.clone();
        if let Some(paths) = &opts.paths {
            scan_section.paths = paths.clone();
        }
        let deep_check = scan_section.deep_check;
        let project_root = self.project_root.clone();
        let cancel_walk = Arc::clone(&cancel);

        let walker_handle = tokio::task::spawn_blocking(move || {
            let walker = FileWalker::new(&project_root, &scan_section);
            let mut detector = ChangeDetector::new(cache, deep_check);
            let mut stats = WalkStats::default();

            for event in walker.walk() {
                if cancel_walk.load(Ordering::Relaxed) {
                    stats.cancelled = true;
                    break;
                }
                match event {
                    WalkEvent::File(file) => {
                        stats.walked += 1;
                        let record = detector.classify(&file);
                        match record.kind {
                            ChangeKind::Unchanged => stats.unchanged += 1,
                            ChangeKind::New | ChangeKind::Modified => {
                                if record.kind == ChangeKind::New {
                                    stats.new += 1;
                                } else {
                                    stats.modified += 1;
                                }
                                let item = WorkItem {
                                    abs_path: file.abs_path,
                                    rel_path: file.rel_path,
                                    new_sig: record.new_sig,
                                };
                                // Backpressure: blocks when the queue is full.
                                if work_tx.blocking_send(item).is_err() {
                                    break;
                                }
                            }
                            ChangeKind::Deleted => unreachable!("classify never yields Deleted"),
                        }
                    }
                    WalkEvent::SkippedLarge { rel_path, size } => {
                        stats.skipped.push(SkippedLarge {
                            path: rel_path,
                            size,
                        });
                    }
                    WalkEvent::Error { path, error } => {
                        stats.io_errors.push(IoFailure {
                            path,
                            message: error.to_string(),
                        });
                    }
                }
            }
            let deleted = if stats.cancelled {
                Vec::new()
            } else {
                detector.finish()
            };
            (detector, deleted, stats)
        });

        // ── Parser workers ─────────────────────────────────────────
        let workers = self.config.performance.effective_workers();
        let timeout = Duration::from_secs(self.config.performance.per_file_timeout_s);
        let tree_threshold = self.config.performance.yaml_tree_threshold_bytes();
        let work_rx = Arc::new(Mutex::new(work_rx));
        let mut worker_handles = Vec::with_capacity(workers);
        for _ in 0..workers {
            let rx = Arc::clone(&work_rx);
            let tx = rec_tx.clone();
            let cancel = Arc::clone(&cancel);
            worker_handles.push(tokio::task::spawn_blocking(move || loop {
                let item = {
                    let mut rx = rx.lock().expect("work queue lock poisoned");
                    rx.blocking_recv()
                };
                let Some(item) = item else { break };
                if cancel.load(Ordering::Relaxed) {
                    // Drain the queue without opening further files.
                    continue;
                }
                let deadline = Instant::now() + timeout;
                let result =
                    parse::parse_file(&item.abs_path, &item.rel_path, Some(deadline), tree_threshold);
                let msg = RecordMsg {
                    rel_path: item.rel_path,
                    abs_path: item.abs_path,
                    new_sig: item.new_sig,
                    result,
                };
                if tx.blocking_send(msg).is_err() {
                    break;
                }
            }));
        }
        drop(rec_tx);

        // ── Updater: single consumer, one transaction at a time ────
        // Meta records apply immediately; asset and script records wait
        // until every meta has landed in the path index.
        let mut deferred: Vec<(RecordMsg, ParsedRecord)> = Vec::new();
        while let Some(msg) = rec_rx.recv().await {
            progress.advance(1);
            let RecordMsg {
                rel_path,
                abs_path,
                new_sig,
                result,
            } = msg;
            match result {
                Err(err) => self.record_parse_error(err, &mut report),
                Ok(None) => {}
                Ok(Some(ParsedRecord::Meta { meta, .. })) => {
                    let msg = RecordMsg {
                        rel_path,
                        abs_path,
                        new_sig,
                        result: Ok(None),
                    };
                    self.apply_meta(store, &msg, meta, &mut report).await;
                    report.files_parsed += 1;
                }
                Ok(Some(record)) => {
                    report.files_parsed += 1;
                    let msg = RecordMsg {
                        rel_path,
                        abs_path,
                        new_sig,
                        result: Ok(None),
                    };
                    deferred.push((msg, record));
                }
            }
        }

        let (detector, deleted, walk_stats) = walker_handle
            .await
            .map_err(|e| ScanError::State(format!("walker task panicked: {e}")))?;
        for handle in worker_handles {
            handle
                .await
                .map_err(|e| ScanError::State(format!("parser worker panicked: {e}")))?;
        }

        report.files_walked = walk_stats.walked;
        report.files_new = walk_stats.new;
        report.files_modified = walk_stats.modified;
        report.files_unchanged = walk_stats.unchanged;
        report.skipped_large = walk_stats.skipped;
        report.io_errors.extend(walk_stats.io_errors);
        report.cancelled = walk_stats.cancelled || cancel.load(Ordering::Relaxed);

        if !report.cancelled {
            self.recover_sources(store, &deferred, &mut report).await;
            for (msg, record) in deferred {
                match record {
                    ParsedRecord::Asset { refs, .. } => {
                        self.apply_asset(store, &msg, refs, &mut report).await;
                    }
                    ParsedRecord::Script { info, .. } => {
                        self.apply_script(store, &msg, info, &mut report).await;
                    }
                    ParsedRecord::Meta { .. } => {}
                }
            }

            report.files_deleted = deleted.len() as u64;
            for record in &deleted {
                self.apply_deleted(store, record, &mut report).await;
            }

            store
                .flush_signatures(&detector.into_cache(), scan_id)
                .await?;
        } else {
            warn!("Scan cancelled; signature cache not flushed");
        }

        report.duration_ms = start.elapsed().as_millis() as u64;
        store.finish_scan(scan_id, &report.summary_json()).await?;
        progress.finish();
        progress.message(&format!(
            "scan {scan_id}: {} files, {} new, {} modified, {} deleted, {} errors",
            report.files_walked,
            report.files_new,
            report.files_modified,
            report.files_deleted,
            report.error_count()
        ));
        info!(
            scan_id,
            walked = report.files_walked,
            parsed = report.files_parsed,
            errors = report.error_count(),
            duration_ms = report.duration_ms,
            "Scan complete"
        );
        Ok(report)
    }

    fn record_parse_error(&self, err: ParseError, report: &mut ScanReport) {
        // The streaming parser doesn't know the configured deadline; restore
        // it for the report.
        let err = match err {
            ParseError::Timeout { path, .. } => ParseError::Timeout {
                path,
                seconds: self.config.performance.per_file_timeout_s,
            },
            other => other,
        };
        warn!(path = %err.path(), error = %err, "Parse failed");
        report.parse_errors.push(ParseFailure {
            path: err.path().to_string(),
            kind: err.kind(),
            message: err.to_string(),
        });
    }

    /// Create or refresh the node described by a meta file.
    async fn apply_meta(
        &mut self,
        store: &dyn AssetStore,
        msg: &RecordMsg,
        meta: crate::parse::MetaFile,
        report: &mut ScanReport,
    ) {
        let Some(asset_path) = companion_path(&msg.rel_path) else {
            return;
        };
        report.parser_warnings += meta.warnings.len() as u64;

        let mut node = AssetNode::new(meta.guid.clone(), asset_path, meta.asset_kind(asset_path));
        node.importer_metadata = meta.importer_metadata;

        // Stat the companion asset for size/mtime; a meta without its asset
        // keeps zeros.
        let companion_abs = self.project_root.join(asset_path);
        if let Ok(fs_meta) = std::fs::metadata(&companion_abs) {
            node.size_bytes = fs_meta.len();
            node.last_modified = system_time_utc(fs_meta.modified().ok());
        }

        // Keep what only the asset parse knows.
        {
            let graph = self.graph.read().expect("graph lock poisoned");
            if let Some(existing) = graph.node(&meta.guid) {
                node.is_analyzed = existing.is_analyzed;
                node.content_hash = existing.content_hash;
                if let Some(unresolved) = existing.importer_metadata.get("unresolved_refs") {
                    node.importer_metadata
                        .insert("unresolved_refs".into(), unresolved.clone());
                }
                if *existing == node {
                    debug!(path = %asset_path, "Meta unchanged, no mutation");
                    return;
                }
            }
        }

        let mut tx = self.updater.begin();
        tx.add_node(node.clone());
        match self.updater.commit(tx) {
            Ok(()) => {
                report.nodes_upserted += 1;
                report.transactions_committed += 1;
                if let Err(err) = store.save_node(&node).await {
                    warn!(path = %asset_path, error = %err, "Failed to persist node");
                }
            }
            Err(err) => {
                report.transactions_failed += 1;
                warn!(path = %asset_path, error = %err, "Meta transaction rejected");
            }
        }
    }

    /// Rebuild the outgoing edges of one parsed asset file.
    async fn apply_asset(
        &mut self,
        store: &dyn AssetStore,
        msg: &RecordMsg,
        refs: crate::parse::UnityAssetRefs,
        report: &mut ScanReport,
    ) {
        report.parser_warnings += refs.fallback_documents as u64;
        let source = {
            let graph = self.graph.read().expect("graph lock poisoned");
            graph.resolve_path(&msg.rel_path)
        };
        let Some(source) = source else {
            report.resolve_warnings.push(ResolveWarning {
                source_path: msg.rel_path.clone(),
                target_guid: String::new(),
                reason: "asset has no meta file".into(),
            });
            return;
        };

        let mut edges: Vec<DependencyEdge> = Vec::with_capacity(refs.references.len());
        let mut unresolved: Vec<String> = Vec::new();
        {
            let graph = self.graph.read().expect("graph lock poisoned");
            for r in &refs.references {
                if graph.node(&r.target).is_some_and(|n| n.active) {
                    edges.push(DependencyEdge {
                        source: source.clone(),
                        target: r.target.clone(),
                        dep_kind: r.dep_kind,
                        strength: r.strength,
                        context_path: Some(r.context_path.clone()),
                        component_type: r.component_type.clone(),
                        property_name: r.property_name.clone(),
                        source_file_id: Some(r.source_file_id),
                        active: true,
                    });
                } else {
                    unresolved.push(r.target.to_string());
                    report.resolve_warnings.push(ResolveWarning {
                        source_path: msg.rel_path.clone(),
                        target_guid: r.target.to_string(),
                        reason: "reference target has no node".into(),
                    });
                }
            }
        }

        match self.updater.replace_file_edges(&source, edges) {
            Ok(delta) => {
                if !delta.is_empty() {
                    report.transactions_committed += 1;
                    report.edges_added += delta.added as u64;
                    report.edges_removed += delta.removed as u64;
                }
            }
            Err(err) => {
                report.transactions_failed += 1;
                warn!(path = %msg.rel_path, error = %err, "Edge transaction rejected");
                return;
            }
        }

        // Refresh node facts only the asset file provides.
        let updated = {
            let graph = self.graph.read().expect("graph lock poisoned");
            graph.node(&source).map(|existing| {
                let mut node = existing.clone();
                node.is_analyzed = true;
                if let Some(sig) = msg.new_sig {
                    node.size_bytes = sig.size;
                    node.last_modified = nanos_utc(sig.mtime_ns);
                    if sig.content_hash.is_some() {
                        node.content_hash = sig.content_hash;
                    }
                }
                if unresolved.is_empty() {
                    node.importer_metadata.remove("unresolved_refs");
                } else {
                    node.importer_metadata.insert(
                        "unresolved_refs".into(),
                        serde_json::Value::from(unresolved.clone()),
                    );
                }
                (existing.clone(), node)
            })
        };
        if let Some((existing, node)) = updated {
            if existing != node {
                let mut tx = self.updater.begin();
                tx.update_node(node.clone());
                match self.updater.commit(tx) {
                    Ok(()) => {
                        report.transactions_committed += 1;
                        if let Err(err) = store.save_node(&node).await {
                            warn!(path = %msg.rel_path, error = %err, "Failed to persist node");
                        }
                    }
                    Err(err) => {
                        report.transactions_failed += 1;
                        warn!(path = %msg.rel_path, error = %err, "Node update rejected");
                    }
                }
            }
        }

        // Persist the rebuilt edge rows.
        let current: Vec<DependencyEdge> = {
            let graph = self.graph.read().expect("graph lock poisoned");
            graph
                .neighbors_out(&source)
                .into_iter()
                .map(|(e, _)| e.clone())
                .collect()
        };
        if let Err(err) = store.replace_dependencies(&source, &current).await {
            warn!(path = %msg.rel_path, error = %err, "Failed to persist edges");
        }
    }

    /// Mark a script node analyzed and carry its attribute metadata.
    async fn apply_script(
        &mut self,
        store: &dyn AssetStore,
        msg: &RecordMsg,
        info: crate::parse::ScriptInfo,
        report: &mut ScanReport,
    ) {
        let node = {
            let graph = self.graph.read().expect("graph lock poisoned");
            graph.resolve_path(&msg.rel_path).and_then(|guid| {
                graph.node(&guid).map(|existing| {
                    let mut node = existing.clone();
                    node.is_analyzed = true;
                    if let Some(menu) = &info.create_asset_menu {
                        node.importer_metadata.insert(
                            "create_asset_menu".into(),
                            serde_json::Value::from(menu.clone()),
                        );
                    }
                    (existing.clone(), node)
                })
            })
        };
        let Some((existing, node)) = node else {
            report.resolve_warnings.push(ResolveWarning {
                source_path: msg.rel_path.clone(),
                target_guid: String::new(),
                reason: "script has no meta file".into(),
            });
            return;
        };
        if existing == node {
            return;
        }
        let mut tx = self.updater.begin();
        tx.update_node(node.clone());
        match self.updater.commit(tx) {
            Ok(()) => {
                report.transactions_committed += 1;
                if let Err(err) = store.save_node(&node).await {
                    warn!(path = %msg.rel_path, error = %err, "Failed to persist node");
                }
            }
            Err(err) => {
                report.transactions_failed += 1;
                warn!(path = %msg.rel_path, error = %err, "Script update rejected");
            }
        }
    }

    /// Deactivate the node behind a vanished file.
    async fn apply_deleted(
        &mut self,
        store: &dyn AssetStore,
        record: &ChangeRecord,
        report: &mut ScanReport,
    ) {
        let asset_path = companion_path(&record.rel_path).unwrap_or(&record.rel_path);
        let guid = {
            let graph = self.graph.read().expect("graph lock poisoned");
            graph.resolve_path(asset_path)
        };
        let Some(guid) = guid else {
            return; // companion already deactivated via its meta
        };
        let mut tx = self.updater.begin();
        tx.remove_node(guid.clone());
        match self.updater.commit(tx) {
            Ok(()) => {
                report.nodes_deactivated += 1;
                report.transactions_committed += 1;
                if let Err(err) = store.deactivate_node(&guid).await {
                    warn!(path = %asset_path, error = %err, "Failed to persist deactivation");
                }
            }
            Err(err) => {
                report.transactions_failed += 1;
                warn!(path = %asset_path, error = %err, "Deactivation rejected");
            }
        }
    }

    /// Safety net for asset records whose source path has no node: pull the
    /// GUID straight from the side-car with the bulk fast path. Covers a
    /// wiped graph store with an intact signature cache.
    async fn recover_sources(
        &mut self,
        store: &dyn AssetStore,
        deferred: &[(RecordMsg, ParsedRecord)],
        report: &mut ScanReport,
    ) {
        let missing: Vec<(String, PathBuf)> = {
            let graph = self.graph.read().expect("graph lock poisoned");
            deferred
                .iter()
                .filter(|(msg, record)| {
                    matches!(record, ParsedRecord::Asset { .. })
                        && graph.resolve_path(&msg.rel_path).is_none()
                })
                .map(|(msg, _)| {
                    let mut meta_abs = msg.abs_path.as_os_str().to_owned();
                    meta_abs.push(".meta");
                    (msg.rel_path.clone(), PathBuf::from(meta_abs))
                })
                .filter(|(_, meta_abs)| meta_abs.exists())
                .collect()
        };
        if missing.is_empty() {
            return;
        }
        debug!(count = missing.len(), "Recovering sources via guid fast path");

        let recovered: Vec<(String, Guid)> = missing
            .par_iter()
            .filter_map(|(rel, meta_abs)| {
                parse::extract_guid_only(meta_abs, rel)
                    .ok()
                    .flatten()
                    .map(|guid| (rel.clone(), guid))
            })
            .collect();

        for (rel, guid) in recovered {
            let node = AssetNode::new(guid, &rel, tether_graphs::AssetKind::from_path(&rel));
            let mut tx = self.updater.begin();
            tx.add_node(node.clone());
            match self.updater.commit(tx) {
                Ok(()) => {
                    report.nodes_upserted += 1;
                    report.transactions_committed += 1;
                    if let Err(err) = store.save_node(&node).await {
                        warn!(path = %rel, error = %err, "Failed to persist recovered node");
                    }
                }
                Err(err) => {
                    report.transactions_failed += 1;
                    warn!(path = %rel, error = %err, "Recovery transaction rejected");
                }
            }
        }
    }
}

fn system_time_utc(time: Option<std::time::SystemTime>) -> DateTime<Utc> {
    time.and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map_or_else(Utc::now, |d| {
            nanos_utc(d.as_nanos() as i64)
        })
}

fn nanos_utc(nanos: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(
        nanos.div_euclid(1_000_000_000),
        nanos.rem_euclid(1_000_000_000) as u32,
    )
    .unwrap_or_else(Utc::now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NoopReporter;
    use crate::store::SqliteStore;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    fn meta(guid: &str) -> String {
        format!("fileFormatVersion: 2\nguid: {guid}\nNativeFormatImporter:\n  mainObjectFileID: 0\n")
    }

    async fn run_scan(session: &mut ScanSession, store: &SqliteStore) -> ScanReport {
        session
            .scan(
                store,
                &ScanOptions::default(),
                &NoopReporter,
                Arc::new(AtomicBool::new(false)),
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn scan_builds_nodes_and_edges() {
        let dir = tempfile::tempdir().unwrap();
        let g_prefab = "0000000000000000000000000000aaaa";
        let g_mat = "0000000000000000000000000000bbbb";
        write(dir.path(), "Assets/Player.prefab.meta", &meta(g_prefab));
        write(dir.path(), "Assets/PlayerMat.mat.meta", &meta(g_mat));
        write(
            dir.path(),
            "Assets/Player.prefab",
            &format!(
                "--- !u!23 &2300000\nMeshRenderer:\n  m_Materials:\n  - {{fileID: 2100000, guid: {g_mat}, type: 2}}\n"
            ),
        );
        write(dir.path(), "Assets/PlayerMat.mat", "--- !u!21 &2100000\nMaterial:\n  m_Name: PlayerMat\n");

        let store = SqliteStore::in_memory().unwrap();
        let mut session = ScanSession::new(dir.path(), TetherConfig::default());
        let report = run_scan(&mut session, &store).await;

        assert_eq!(report.files_walked, 4);
        assert_eq!(report.files_new, 4);
        assert_eq!(report.error_count(), 0);
        assert_eq!(report.edges_added, 1);

        let graph = session.graph();
        let graph = graph.read().unwrap();
        let source = Guid::parse(g_prefab).unwrap();
        let deps = graph.neighbors_out(&source);
        assert_eq!(deps.len(), 1);
        assert_eq!(deps[0].0.target.as_str(), g_mat);
        assert_eq!(
            deps[0].0.dep_kind,
            tether_graphs::DependencyKind::Material
        );
    }

    #[tokio::test]
    async fn rescan_of_unchanged_tree_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        let g = "0000000000000000000000000000aaaa";
        write(dir.path(), "Assets/Thing.asset.meta", &meta(g));
        write(dir.path(), "Assets/Thing.asset", "--- !u!114 &1\nMonoBehaviour:\n  m_Name: T\n");

        let store = SqliteStore::in_memory().unwrap();
        let mut session = ScanSession::new(dir.path(), TetherConfig::default());
        run_scan(&mut session, &store).await;

        let report = run_scan(&mut session, &store).await;
        assert_eq!(report.files_unchanged, 2);
        assert_eq!(report.transactions_committed, 0);
        assert_eq!(report.edges_added, 0);
    }

    #[tokio::test]
    async fn unresolved_reference_is_warned_and_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let g = "0000000000000000000000000000aaaa";
        let ghost = "00000000000000000000000000009999";
        write(dir.path(), "Assets/P.asset.meta", &meta(g));
        write(
            dir.path(),
            "Assets/P.asset",
            &format!("--- !u!114 &1\nMonoBehaviour:\n  m_Ref: {{fileID: 1, guid: {ghost}, type: 2}}\n"),
        );

        let store = SqliteStore::in_memory().unwrap();
        let mut session = ScanSession::new(dir.path(), TetherConfig::default());
        let report = run_scan(&mut session, &store).await;

        assert_eq!(report.error_count(), 0, "scan completes without error");
        assert_eq!(report.resolve_warnings.len(), 1);
        assert_eq!(report.resolve_warnings[0].target_guid, ghost);
        assert_eq!(report.edges_added, 0);

        let graph = session.graph();
        let graph = graph.read().unwrap();
        let source = Guid::parse(g).unwrap();
        assert!(graph.neighbors_out(&source).is_empty());
        let node = graph.node(&source).unwrap();
        assert!(node.importer_metadata.contains_key("unresolved_refs"));
    }

    #[tokio::test]
    async fn deleted_file_deactivates_node() {
        let dir = tempfile::tempdir().unwrap();
        let g = "0000000000000000000000000000aaaa";
        write(dir.path(), "Assets/Gone.asset.meta", &meta(g));
        write(dir.path(), "Assets/Gone.asset", "--- !u!114 &1\nMonoBehaviour:\n  m_Name: G\n");

        let store = SqliteStore::in_memory().unwrap();
        let mut session = ScanSession::new(dir.path(), TetherConfig::default());
        run_scan(&mut session, &store).await;

        std::fs::remove_file(dir.path().join("Assets/Gone.asset")).unwrap();
        std::fs::remove_file(dir.path().join("Assets/Gone.asset.meta")).unwrap();
        let report = run_scan(&mut session, &store).await;

        assert_eq!(report.files_deleted, 2);
        assert_eq!(report.nodes_deactivated, 1);
        let graph = session.graph();
        let graph = graph.read().unwrap();
        let node = graph.node(&Guid::parse(g).unwrap()).unwrap();
        assert!(!node.active, "history retained, node inactive");
    }

    #[tokio::test]
    async fn bad_meta_is_recorded_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "Assets/Bad.asset.meta", "fileFormatVersion: 2\nguid: nope\n");
        write(
            dir.path(),
            "Assets/Good.asset.meta",
            &meta("0000000000000000000000000000aaaa"),
        );

        let store = SqliteStore::in_memory().unwrap();
        let mut session = ScanSession::new(dir.path(), TetherConfig::default());
        let report = run_scan(&mut session, &store).await;

        assert_eq!(report.parse_errors.len(), 1);
        assert_eq!(report.nodes_upserted, 1);
        assert!(report.success_rate() < 1.0);
    }

    #[tokio::test]
    async fn cancellation_skips_signature_flush() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "Assets/A.asset.meta",
            &meta("0000000000000000000000000000aaaa"),
        );

        let store = SqliteStore::in_memory().unwrap();
        let mut session = ScanSession::new(dir.path(), TetherConfig::default());
        let cancel = Arc::new(AtomicBool::new(true));
        let report = session
            .scan(&store, &ScanOptions::default(), &NoopReporter, cancel)
            .await
            .unwrap();

        assert!(report.cancelled);
        let sigs = store.load_signatures().await.unwrap();
        assert!(sigs.is_empty(), "no partial progress committed");
    }

    #[tokio::test]
    async fn cold_start_reuses_persisted_graph() {
        let dir = tempfile::tempdir().unwrap();
        let g = "0000000000000000000000000000aaaa";
        write(dir.path(), "Assets/Keep.asset.meta", &meta(g));
        write(dir.path(), "Assets/Keep.asset", "--- !u!114 &1\nMonoBehaviour:\n  m_Name: K\n");

        let store = SqliteStore::in_memory().unwrap();
        {
            let mut session = ScanSession::new(dir.path(), TetherConfig::default());
            run_scan(&mut session, &store).await;
        }

        // New session, same store: the graph comes back without reparsing.
        let session =
            ScanSession::with_store(dir.path(), TetherConfig::default(), &store)
                .await
                .unwrap();
        let graph = session.graph();
        let graph = graph.read().unwrap();
        assert!(graph.contains(&Guid::parse(g).unwrap()));
        assert_eq!(graph.resolve_path("Assets/Keep.asset"), Some(Guid::parse(g).unwrap()));
    }
}
