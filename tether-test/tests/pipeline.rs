use std::sync::atomic::AtomicU64;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tether_core::pipeline::ScanOptions;
use tether_test::{guid, run_scan, scan_project, scriptable_object, TestProject};
use tether_graphs::{
    AssetNode, CycleSeverity, CycleType, DependencyEdge, DependencyKind, GraphStore, GraphUpdater,
    Guid, ImpactOperation, ImpactSeverity, QueryEngine, QueryOptions,
};

fn engine_for(session: &tether_core::pipeline::ScanSession) -> QueryEngine {
    QueryEngine::new(session.graph(), session.generation(), Duration::from_secs(300))
}

// ── Scenario 1: direct reference extraction ──────────────────────

#[tokio::test]
async fn prefab_material_reference_extracted() {
    let project = TestProject::new();
    let g_prefab = guid("aaaa");
    let g_mat = guid("bbbb");
    project.write_meta("Assets/Player.prefab", &g_prefab);
    project.write_meta("Assets/PlayerMat.mat", &g_mat);
    project.write(
        "Assets/PlayerMat.mat",
        "--- !u!21 &2100000\nMaterial:\n  m_Name: PlayerMat\n",
    );
    project.write(
        "Assets/Player.prefab",
        &format!(
            "--- !u!23 &2300000\nMeshRenderer:\n  m_Materials:\n  - {{fileID: 2100000, guid: {g_mat}, type: 2}}\n"
        ),
    );

    let (report, session, _store) = scan_project(&project).await;
    assert_eq!(report.error_count(), 0);

    let engine = engine_for(&session);
    let deps = engine
        .direct_deps(&Guid::parse(&g_prefab).unwrap(), &QueryOptions::default())
        .unwrap();

    assert_eq!(deps.len(), 1, "exactly one outgoing edge");
    assert_eq!(deps[0].node.guid.as_str(), g_mat);
    assert_eq!(deps[0].edge.dep_kind, DependencyKind::Material);
    assert_eq!(
        deps[0].edge.context_path.as_deref(),
        Some("MeshRenderer.m_Materials[0]")
    );
}

// ── Scenario 2: cycle detection ──────────────────────────────────

#[tokio::test]
async fn three_asset_cycle_detected_once() {
    let project = TestProject::new();
    let a = guid("0001");
    let b = guid("0002");
    let c = guid("0003");
    for (rel, g, target) in [
        ("Assets/A.asset", &a, &b),
        ("Assets/B.asset", &b, &c),
        ("Assets/C.asset", &c, &a),
    ] {
        project.write_meta(rel, g);
        project.write(rel, &scriptable_object(&[target]));
    }

    let (report, session, _store) = scan_project(&project).await;
    assert_eq!(report.error_count(), 0);
    assert_eq!(report.edges_added, 3);

    let analyzer = tether_graphs::CycleAnalyzer::new(session.graph(), 20);
    let result = analyzer.analyze().unwrap();

    assert_eq!(result.cycles.len(), 1, "exactly one cycle");
    let cycle = &result.cycles[0];
    assert_eq!(cycle.nodes[0].as_str(), a, "canonical form starts at smallest");
    assert_eq!(cycle.cycle_type, CycleType::SimpleCycle);
    assert_eq!(cycle.severity, CycleSeverity::Medium);
}

// ── Scenario 3: incremental scan ─────────────────────────────────

#[tokio::test]
async fn touched_meta_with_deep_check_commits_nothing() {
    let project = TestProject::new();
    let g = guid("00c1");
    project.write_meta("Assets/Thing.asset", &g);
    project.write("Assets/Thing.asset", &scriptable_object(&[]));

    let (_, mut session, store) = scan_project(&project).await;

    project.touch("Assets/Thing.asset.meta");
    let report = run_scan(&mut session, &store, &ScanOptions::default()).await;

    assert_eq!(report.files_modified, 0, "hash confirms content identical");
    assert_eq!(report.transactions_committed, 0);
    assert_eq!(report.edges_added + report.edges_removed, 0);
}

#[tokio::test]
async fn touched_meta_without_deep_check_reparses_but_commits_nothing() {
    let project = TestProject::new();
    let g = guid("00c2");
    project.write_meta("Assets/Thing.asset", &g);
    project.write("Assets/Thing.asset", &scriptable_object(&[]));

    let mut config = tether_core::config::TetherConfig::default();
    config.scan.deep_check = false;
    let (_, mut session, store) =
        tether_test::scan_project_with_config(&project, config).await;

    project.touch("Assets/Thing.asset.meta");
    let report = run_scan(&mut session, &store, &ScanOptions::default()).await;

    assert_eq!(report.files_modified, 1, "shallow check reparses the file");
    assert_eq!(report.files_parsed, 1);
    assert_eq!(report.transactions_committed, 0, "no net mutations");
    assert_eq!(report.edges_added + report.edges_removed, 0);
}

// ── Scenario 4: impact of delete ─────────────────────────────────

#[tokio::test]
async fn delete_impact_is_reverse_closure() {
    let project = TestProject::new();
    let a = guid("000a");
    let b = guid("000b");
    let c = guid("000c");
    let d = guid("000d");
    let e = guid("000e");
    for (rel, g, targets) in [
        ("Assets/A.asset", &a, vec![b.as_str()]),
        ("Assets/B.asset", &b, vec![]),
        ("Assets/C.asset", &c, vec![b.as_str()]),
        ("Assets/D.asset", &d, vec![b.as_str()]),
        ("Assets/E.asset", &e, vec![d.as_str()]),
    ] {
        project.write_meta(rel, g);
        project.write(rel, &scriptable_object(&targets));
    }

    let (report, session, _store) = scan_project(&project).await;
    assert_eq!(report.error_count(), 0);

    let engine = engine_for(&session);
    let impact = engine
        .impact(
            &Guid::parse(&b).unwrap(),
            ImpactOperation::Delete,
            &QueryOptions::default(),
        )
        .unwrap();

    let affected: Vec<&str> = impact.affected.iter().map(Guid::as_str).collect();
    assert_eq!(affected, vec![a.as_str(), c.as_str(), d.as_str(), e.as_str()]);
    assert_eq!(impact.severity, ImpactSeverity::Medium);
}

// ── Scenario 5: unresolved reference ─────────────────────────────

#[tokio::test]
async fn unresolved_reference_warns_and_validates_invalid() {
    let project = TestProject::new();
    let p = guid("00f1");
    let ghost = guid("dead");
    project.write_meta("Assets/P.asset", &p);
    project.write("Assets/P.asset", &scriptable_object(&[ghost.as_str()]));

    let (report, session, _store) = scan_project(&project).await;

    assert_eq!(report.error_count(), 0, "scan completes without error");
    assert_eq!(report.resolve_warnings.len(), 1);
    assert_eq!(report.resolve_warnings[0].target_guid, ghost);
    assert_eq!(report.edges_added, 0, "the dangling edge is not added");

    let engine = engine_for(&session);
    let p_guid = Guid::parse(&p).unwrap();
    assert!(engine
        .direct_deps(&p_guid, &QueryOptions::default())
        .unwrap()
        .is_empty());

    let validation = engine.validate_refs(&p_guid).unwrap();
    assert!(!validation.is_clean());
    assert!(validation
        .invalid
        .iter()
        .any(|i| i.target == ghost && i.reason.contains("unresolved")));
}

// ── Scenario 6: transaction rollback ─────────────────────────────

#[tokio::test]
async fn rejected_batch_leaves_no_trace() {
    let graph = Arc::new(RwLock::new(GraphStore::new()));
    let mut updater = GraphUpdater::new(Arc::clone(&graph), false);

    let n = |tail: &str, path: &str| {
        AssetNode::new(
            Guid::parse(&guid(tail)).unwrap(),
            path,
            tether_graphs::AssetKind::ScriptableObject,
        )
    };
    let edge = |from: &str, to: &str| {
        DependencyEdge::new(
            Guid::parse(&guid(from)).unwrap(),
            Guid::parse(&guid(to)).unwrap(),
            DependencyKind::ScriptableObject,
        )
    };

    let mut tx = updater.begin();
    tx.add_node(n("n1", "Assets/N1.asset"))
        .add_node(n("n2", "Assets/N2.asset"))
        .add_node(n("n3", "Assets/N3.asset"))
        .add_edge(edge("n1", "n2"))
        .add_edge(edge("n2", "n4")); // N4 does not exist
    let err = updater.commit(tx).expect_err("batch must be rejected");
    assert!(err.to_string().contains("conflict"));

    // Nothing from the batch is visible to queries.
    let engine = QueryEngine::new(
        Arc::clone(&graph),
        Arc::new(AtomicU64::new(0)),
        Duration::from_secs(300),
    );
    for tail in ["n1", "n2", "n3"] {
        let g = Guid::parse(&guid(tail)).unwrap();
        assert!(
            engine.direct_deps(&g, &QueryOptions::default()).is_err(),
            "node {tail} must not exist"
        );
    }
    assert_eq!(graph.read().unwrap().node_count(), 0);
}

// ── Cross-scenario: export/import round trip ─────────────────────

#[tokio::test]
async fn export_import_is_isomorphic() {
    let project = TestProject::new();
    let a = guid("0a01");
    let b = guid("0b02");
    project.write_meta("Assets/A.asset", &a);
    project.write("Assets/A.asset", &scriptable_object(&[b.as_str()]));
    project.write_meta("Assets/B.asset", &b);
    project.write("Assets/B.asset", &scriptable_object(&[]));

    let (_, session, _store) = scan_project(&project).await;
    let dump = session.graph().read().unwrap().dump();

    let json = serde_json::to_string(&dump).unwrap();
    let parsed: tether_graphs::GraphDump = serde_json::from_str(&json).unwrap();
    let restored = GraphStore::from_dump(parsed).unwrap();

    assert_eq!(restored.dump(), dump, "same nodes, edges, and attributes");
}

// ── Cross-scenario: deletion keeps history but frees the path ────

#[tokio::test]
async fn deleted_asset_stops_appearing_in_queries() {
    let project = TestProject::new();
    let a = guid("0d01");
    let b = guid("0d02");
    project.write_meta("Assets/A.asset", &a);
    project.write("Assets/A.asset", &scriptable_object(&[b.as_str()]));
    project.write_meta("Assets/B.asset", &b);
    project.write("Assets/B.asset", &scriptable_object(&[]));

    let (_, mut session, store) = scan_project(&project).await;

    project.delete("Assets/B.asset");
    project.delete("Assets/B.asset.meta");
    let report = run_scan(&mut session, &store, &ScanOptions::default()).await;
    assert_eq!(report.nodes_deactivated, 1);

    let engine = engine_for(&session);
    let deps = engine
        .direct_deps(&Guid::parse(&a).unwrap(), &QueryOptions::default())
        .unwrap();
    assert!(deps.is_empty(), "inactive targets are filtered by default");

    let with_inactive = engine
        .direct_deps(
            &Guid::parse(&a).unwrap(),
            &QueryOptions {
                include_inactive: true,
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(with_inactive.len(), 1, "history is retained");
}
