use chrono::{Duration, TimeZone, Utc};
use mindmap_query::prelude::*;
use std::sync::Arc;
use tempfile::TempDir;

fn learned_engine(project: &str) -> (MindmapEngine, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 3, 4, 12, 0, 0).unwrap()));
    let config = EngineConfig::default().with_project(project);
    let engine = MindmapEngine::with_clock(config, clock.clone()).unwrap();

    for (id, kind) in [
        ("src/session.rs", NodeType::File),
        ("open_session", NodeType::Function),
        ("close_session", NodeType::Function),
        ("SessionToken", NodeType::Class),
    ] {
        engine.add_node(Node::new(id, kind, id)).unwrap();
    }
    engine.add_edge(Edge::new("src/session.rs", "open_session", EdgeType::Contains)).unwrap();
    engine.add_edge(Edge::new("src/session.rs", "close_session", EdgeType::Contains)).unwrap();
    engine.add_edge(Edge::new("open_session", "SessionToken", EdgeType::DependsOn)).unwrap();
    clock.advance(Duration::minutes(5));
    engine
        .update_edge(&EdgeId::from("open_session-depends_on->SessionToken"), &EdgeUpdate::confidence(0.6))
        .unwrap();

    engine.query("session", &QueryOptions::default()).unwrap();
    for _ in 0..3 {
        engine.report_outcome(
            &TaskOutcome::success("session lifecycle")
                .with_file("open_session")
                .with_file("close_session"),
            None,
        );
        clock.advance(Duration::seconds(30));
    }
    engine.report_outcome(
        &TaskOutcome::error("token refresh", "ExpiredToken: refresh rejected").with_file("SessionToken"),
        None,
    );
    (engine, clock)
}

#[test]
fn saved_state_loads_into_a_fresh_engine() {
    let dir = TempDir::new().unwrap();
    let store = SnapshotStore::new(dir.path());
    let (engine, clock) = learned_engine("billing");
    let metadata = engine.save(&store).unwrap();
    assert_eq!(metadata.project, "billing");
    assert!(store.exists("billing"));

    let fresh = MindmapEngine::with_clock(EngineConfig::default().with_project("billing"), clock).unwrap();
    let report = fresh.load(&store).unwrap();
    assert_eq!(report.nodes, 4);
    assert_eq!(report.edges, 3);
    assert!(report.rejected_edges.is_empty());
    assert!(report.disabled.is_empty());

    let before = engine.snapshot().unwrap();
    let after = fresh.snapshot().unwrap();
    assert_eq!(before.nodes, after.nodes);
    assert_eq!(before.edges, after.edges);
    assert_eq!(before.temporal, after.temporal);
    assert_eq!(before.hebbian, after.hebbian);
    assert_eq!(before.inhibitory, after.inhibitory);
    assert_eq!(fresh.graph_version(), engine.graph_version());
    assert_eq!(
        fresh.get_inhibitory_stats().pattern_count,
        engine.get_inhibitory_stats().pattern_count
    );
}

#[test]
fn unreadable_section_disables_only_its_subsystem() {
    let (engine, clock) = learned_engine("default");
    let mut snapshot = engine.snapshot().unwrap();
    snapshot.hebbian = serde_json::json!({ "connections": 17 });

    let fresh = MindmapEngine::with_clock(EngineConfig::default(), clock).unwrap();
    let report = fresh.restore(snapshot);
    assert_eq!(report.disabled, vec![Subsystem::Hebbian]);
    assert_eq!(fresh.disabled_subsystems(), vec![Subsystem::Hebbian]);
    assert_eq!(fresh.get_hebbian_stats().total_connections, 0);
    assert!(fresh.get_inhibitory_stats().pattern_count >= 1);

    // a disabled learner neither learns nor blocks queries
    fresh.report_outcome(
        &TaskOutcome::success("session lifecycle").with_file("open_session").with_file("close_session"),
        None,
    );
    assert_eq!(fresh.get_hebbian_stats().total_connections, 0);
    let response = fresh.query("session", &QueryOptions::default()).unwrap();
    assert!(!response.nodes.is_empty());

    assert!(fresh.enable_subsystem(Subsystem::Hebbian));
    assert!(fresh.disabled_subsystems().is_empty());
}

#[test]
fn lost_history_restarts_validity_from_now() {
    let (engine, clock) = learned_engine("default");
    let mut snapshot = engine.snapshot().unwrap();
    snapshot.temporal = serde_json::json!("garbage");

    let fresh = MindmapEngine::with_clock(EngineConfig::default(), clock).unwrap();
    let report = fresh.restore(snapshot);
    assert_eq!(report.disabled, vec![Subsystem::Temporal]);
    let stats = fresh.get_bi_temporal_stats();
    assert_eq!(stats.tracked_edges, 3);
    assert_eq!(stats.total_revisions, 0);
}

#[test]
fn dangling_snapshot_edges_are_rejected() {
    let (engine, clock) = learned_engine("default");
    let mut snapshot = engine.snapshot().unwrap();
    snapshot.edges.push(Edge::new("open_session", "ghost", EdgeType::Calls));

    let fresh = MindmapEngine::with_clock(EngineConfig::default(), clock).unwrap();
    let report = fresh.restore(snapshot);
    assert_eq!(report.edges, 3);
    assert_eq!(report.rejected_edges.len(), 1);
    assert_eq!(report.rejected_edges[0].0, EdgeId::from("open_session-calls->ghost"));
}

#[test]
fn out_of_bounds_snapshot_nodes_are_reported() {
    let (engine, clock) = learned_engine("default");
    let mut snapshot = engine.snapshot().unwrap();
    let mut broken = Node::new("broken_helper", NodeType::Function, "broken_helper");
    broken.confidence = 1.7;
    snapshot.nodes.push(broken);
    snapshot.edges.push(Edge::new("open_session", "broken_helper", EdgeType::Calls));

    let fresh = MindmapEngine::with_clock(EngineConfig::default(), clock).unwrap();
    let report = fresh.restore(snapshot);
    assert_eq!(report.nodes, 4);
    assert_eq!(report.rejected_nodes.len(), 1);
    assert_eq!(report.rejected_nodes[0].0, NodeId::from("broken_helper"));
    assert_eq!(report.rejected_edges.len(), 1);
    assert!(report.untracked_edges.is_empty());
    assert!(fresh.get_node(&NodeId::from("broken_helper")).is_none());
}

#[test]
fn loading_an_unknown_project_fails() {
    let dir = TempDir::new().unwrap();
    let store = SnapshotStore::new(dir.path());
    let engine = MindmapEngine::new(EngineConfig::default().with_project("nowhere")).unwrap();
    assert!(matches!(engine.load(&store), Err(PersistenceError::NotFound(_))));
}
