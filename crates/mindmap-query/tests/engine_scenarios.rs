//! End-to-end scenarios against the engine's public surface.

use chrono::{Duration, TimeZone, Utc};
use mindmap_query::prelude::*;
use parking_lot::Mutex;
use std::sync::Arc;

fn t0() -> Timestamp {
    Utc.with_ymd_and_hms(2024, 7, 1, 8, 0, 0).unwrap()
}

/// Moves forward by `step` every time it is read.
struct StepClock {
    now: Mutex<Timestamp>,
    step: Duration,
}

impl Clock for StepClock {
    fn now(&self) -> Timestamp {
        let mut now = self.now.lock();
        let t = *now;
        *now += self.step;
        t
    }
}

fn manual_engine() -> (MindmapEngine, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(t0()));
    let engine = MindmapEngine::with_clock(EngineConfig::default(), clock.clone()).unwrap();
    (engine, clock)
}

fn service_graph(engine: &MindmapEngine) {
    for (id, kind, name) in [
        ("src/payment.rs", NodeType::File, "payment.rs"),
        ("charge_card", NodeType::Function, "charge_card"),
        ("retry_handler", NodeType::Function, "retry_handler"),
        ("ledger_entry", NodeType::Class, "LedgerEntry"),
    ] {
        engine.add_node(Node::new(id, kind, name).with_timestamp(t0())).unwrap();
    }
    engine.add_edge(Edge::new("src/payment.rs", "charge_card", EdgeType::Contains)).unwrap();
    engine.add_edge(Edge::new("src/payment.rs", "retry_handler", EdgeType::Contains)).unwrap();
    engine.add_edge(Edge::new("charge_card", "retry_handler", EdgeType::Calls).with_confidence(0.9)).unwrap();
    engine.add_edge(Edge::new("charge_card", "ledger_entry", EdgeType::DependsOn)).unwrap();
}

#[test]
fn one_hop_activation_follows_edge_confidence() {
    let (engine, _) = manual_engine();
    engine.add_node(Node::new("fileA", NodeType::File, "fileA")).unwrap();
    engine.add_node(Node::new("fileB", NodeType::File, "fileB")).unwrap();
    engine.add_edge(Edge::new("fileA", "fileB", EdgeType::Imports).with_confidence(0.8)).unwrap();

    let options = QueryOptions::new().with_context(QueryContext::new().with_focus("fileA"));
    let response = engine.query("upstream", &options).unwrap();
    let activation = response.activation_results.unwrap();
    let b = activation
        .iter()
        .find(|r| r.node_id == NodeId::from("fileB"))
        .unwrap();
    assert_eq!(b.hop_distance, 1);
    assert!((b.activation_strength - 0.56).abs() < 1e-9);
}

#[test]
fn repeated_query_is_served_from_cache() {
    let (engine, _) = manual_engine();
    service_graph(&engine);
    let options = QueryOptions::new().with_context(QueryContext::new().with_task("card charge failures"));

    let first = engine.query("charge card", &options).unwrap();
    let second = engine.query("charge card", &options).unwrap();
    assert!(!first.cached);
    assert!(second.cached);
    assert_eq!(first.node_ids(), second.node_ids());
    assert_eq!(second.stages, vec![Stage::Received, Stage::CacheCheck, Stage::Done]);
    assert_eq!(first.stages.last(), Some(&Stage::Done));
    assert!(first.stages.contains(&Stage::HebbianRecord));
}

#[test]
fn mutating_a_dependency_misses_the_cache() {
    let (engine, _) = manual_engine();
    service_graph(&engine);
    let options = QueryOptions::default();

    let first = engine.query("charge card", &options).unwrap();
    assert!(first.node_ids().contains(&NodeId::from("retry_handler")));
    engine
        .update_edge(&EdgeId::from("charge_card-calls->retry_handler"), &EdgeUpdate::weight(0.5))
        .unwrap();

    let second = engine.query("charge card", &options).unwrap();
    assert!(!second.cached);
    assert!(engine.get_cache_stats().invalidations >= 1);
}

#[test]
fn failures_suppress_only_in_their_context() {
    let (engine, _) = manual_engine();
    service_graph(&engine);
    let failing = QueryContext::new()
        .with_task("checkout timeout fix")
        .with_error("TimeoutError: upstream gateway");
    let unrelated = QueryContext::new().with_task("render dashboard charts");

    for _ in 0..3 {
        let outcome = TaskOutcome::error("checkout timeout fix", "TimeoutError: upstream gateway")
            .with_file("retry_handler");
        engine.report_outcome(&outcome, Some(&failing));
    }

    let bypass = StageBypass {
        hebbian: true,
        ..StageBypass::none()
    };
    let target = NodeId::from("retry_handler");
    let under_failure = engine
        .query("retry handler", &QueryOptions::new().with_context(failing).with_bypass(bypass))
        .unwrap();
    let elsewhere = engine
        .query("retry handler", &QueryOptions::new().with_context(unrelated).with_bypass(bypass))
        .unwrap();

    assert!(under_failure.inhibition_applied >= 1);
    assert_eq!(elsewhere.inhibition_applied, 0);
    assert!(under_failure.score_of(&target).unwrap() < elsewhere.score_of(&target).unwrap());
}

#[test]
fn timeout_returns_partial_ranking_and_skips_cache() {
    let clock = Arc::new(StepClock {
        now: Mutex::new(t0()),
        step: Duration::seconds(1),
    });
    let engine = MindmapEngine::with_clock(EngineConfig::default(), clock).unwrap();
    service_graph(&engine);

    let options = QueryOptions::new().with_timeout_ms(3_500);
    let response = engine.query("charge card", &options).unwrap();
    assert!(response.partial);
    assert!(response.timed_out);
    assert!(!response.cancelled);
    assert!(!response.nodes.is_empty());
    assert_eq!(
        response.stages,
        vec![
            Stage::Received,
            Stage::CacheCheck,
            Stage::ContextResolve,
            Stage::ActivationSpread,
            Stage::RankLimit,
            Stage::Done,
        ]
    );
    assert_eq!(engine.get_cache_stats().entries, 0);
    assert_eq!(engine.get_hebbian_stats().total_co_activations, 0);
}

#[test]
fn cancelled_query_is_partial() {
    let (engine, _) = manual_engine();
    service_graph(&engine);
    let cancel = CancellationFlag::new();
    cancel.cancel();
    let response = engine
        .query_with_cancel("charge card", &QueryOptions::default(), &cancel)
        .unwrap();
    assert!(response.partial);
    assert!(response.cancelled);
    assert!(response.nodes.is_empty());
}

#[test]
fn bypassed_runs_are_deterministic() {
    let (engine, _) = manual_engine();
    service_graph(&engine);
    let bypass = StageBypass {
        cache: true,
        fusion: true,
        hebbian: true,
        ..StageBypass::none()
    };
    let options = QueryOptions::new().with_bypass(bypass);

    let a = engine.query("charge card", &options).unwrap();
    let b = engine.query("charge card", &options).unwrap();
    assert_eq!(a.node_ids(), b.node_ids());
    let scores = |r: &QueryResponse| r.nodes.iter().map(|n| n.score).collect::<Vec<_>>();
    assert_eq!(scores(&a), scores(&b));
    assert!(!b.cached);
    assert!(a.nodes.iter().all(|n| n.fusion.is_none()));

    let full = engine
        .query("charge card", &QueryOptions::new().with_bypass(StageBypass { cache: true, ..StageBypass::none() }))
        .unwrap();
    let mut ids = full.node_ids();
    let mut bypassed = a.node_ids();
    ids.sort();
    bypassed.sort();
    assert_eq!(ids, bypassed);
}

#[test]
fn options_are_validated() {
    let (engine, _) = manual_engine();
    assert!(matches!(
        engine.query("x", &QueryOptions::new().with_limit(5000)),
        Err(ValidationError::OutOfRange { field: "limit", .. })
    ));
    assert!(matches!(engine.query_json("x", "{not json"), Err(ValidationError::Malformed(_))));
    assert!(matches!(
        engine.query_json("x", r#"{"limit": 3, "speed": "fast"}"#),
        Err(ValidationError::Malformed(_))
    ));
    assert!(engine.query_json("x", "").is_ok());
}

#[test]
fn node_type_filter_and_limit() {
    let (engine, _) = manual_engine();
    service_graph(&engine);
    let options = QueryOptions::new()
        .with_node_types(vec![NodeType::Function])
        .with_limit(1);
    let response = engine.query("payment", &options).unwrap();
    assert_eq!(response.nodes.len(), 1);
    assert_eq!(response.total_matches, 2);
    assert_eq!(response.nodes[0].node.node_type, NodeType::Function);
}

#[test]
fn invalidated_edges_stop_carrying_activation() {
    let (engine, clock) = manual_engine();
    service_graph(&engine);
    let cut = t0() + Duration::hours(1);
    clock.set(cut + Duration::hours(1));
    engine
        .invalidate_edge(&EdgeId::from("charge_card-depends_on->ledger_entry"), Some(cut))
        .unwrap();

    let before = engine
        .query("charge card", &QueryOptions::new().with_valid_at(cut - Duration::seconds(1)))
        .unwrap();
    let after = engine
        .query("charge card", &QueryOptions::new().with_valid_at(cut + Duration::seconds(1)))
        .unwrap();
    let ledger = NodeId::from("ledger_entry");
    assert!(before.node_ids().contains(&ledger));
    assert!(!after.node_ids().contains(&ledger));
}

#[test]
fn re_added_edges_keep_their_earlier_validity() {
    let (engine, clock) = manual_engine();
    service_graph(&engine);
    let id = EdgeId::from("charge_card-depends_on->ledger_entry");
    let cut = t0() + Duration::hours(1);
    clock.set(cut);
    let removed = engine.remove_edge(&id).unwrap();
    clock.set(cut + Duration::hours(2));
    engine.add_edge(removed).unwrap();

    let ledger = NodeId::from("ledger_entry");
    let ids_at = |t: Timestamp| {
        engine
            .query("charge card", &QueryOptions::new().with_valid_at(t))
            .unwrap()
            .node_ids()
    };
    assert!(ids_at(cut - Duration::seconds(1)).contains(&ledger));
    assert!(!ids_at(cut + Duration::hours(1)).contains(&ledger));
    assert!(ids_at(cut + Duration::hours(3)).contains(&ledger));
}

#[test]
fn focus_nodes_are_part_of_the_cache_key() {
    let (engine, _) = manual_engine();
    service_graph(&engine);
    engine.add_node(Node::new("orphan_util", NodeType::Function, "orphan_util")).unwrap();

    let plain = engine.query("charge card", &QueryOptions::default()).unwrap();
    assert!(!plain.node_ids().contains(&NodeId::from("orphan_util")));

    let focused_options = QueryOptions::new().with_context(QueryContext::new().with_focus("orphan_util"));
    let focused = engine.query("charge card", &focused_options).unwrap();
    assert!(!focused.cached);
    assert!(focused.node_ids().contains(&NodeId::from("orphan_util")));

    let again = engine.query("charge card", &focused_options).unwrap();
    assert!(again.cached);
    assert_eq!(again.node_ids(), focused.node_ids());
}

#[test]
fn history_is_attached_on_request() {
    let (engine, clock) = manual_engine();
    service_graph(&engine);
    clock.advance(Duration::minutes(10));
    let id = EdgeId::from("src/payment.rs-contains->charge_card");
    engine.update_edge(&id, &EdgeUpdate::confidence(0.7)).unwrap();

    let response = engine
        .query("payment", &QueryOptions::new().with_history())
        .unwrap();
    let history = response.history.unwrap();
    let entry = history.get(&id).unwrap();
    assert_eq!(entry.revisions.len(), 1);
    assert!(entry.revisions[0].changes.contains_key("confidence"));
    assert!(entry.valid_time.end.is_none());
}

#[test]
fn success_outcomes_build_associations() {
    let (engine, clock) = manual_engine();
    service_graph(&engine);
    for _ in 0..5 {
        let outcome = TaskOutcome::success("charge flow")
            .with_file("src/payment.rs")
            .with_file("charge_card")
            .with_file("retry_handler");
        engine.report_outcome(&outcome, None);
        clock.advance(Duration::seconds(10));
    }
    let stats = engine.get_hebbian_stats();
    assert!(stats.total_connections >= 3);
    assert!(stats.average_strength > 0.0);
}

#[test]
fn ingest_is_idempotent() {
    let (engine, _) = manual_engine();
    let batch = IngestBatch::new("src/orders.rs", "rust")
        .with_node(NodeRecord::new("src/orders.rs", NodeType::File, "orders.rs").with_path("src/orders.rs"))
        .with_node(NodeRecord::new("place_order", NodeType::Function, "place_order"))
        .with_edge(EdgeRecord::new("src/orders.rs", "place_order", EdgeType::Contains))
        .with_edge(EdgeRecord::new("place_order", "nowhere", EdgeType::Calls));

    let first = engine.ingest_batch(batch.clone());
    assert_eq!(first.nodes_inserted, 2);
    assert_eq!(first.edges_inserted, 1);
    assert_eq!(first.failures.len(), 1);
    let version = engine.graph_version();

    let second = engine.ingest_batch(batch);
    assert_eq!(second.changed(), 0);
    assert_eq!(engine.graph_version(), version);
    assert_eq!(engine.get_bi_temporal_stats().tracked_edges, 1);
    assert_eq!(
        engine.get_node(&NodeId::from("place_order")).unwrap().metadata.get("source_file"),
        Some(&"src/orders.rs".to_string())
    );
}

#[tokio::test]
async fn scheduled_ingest_lands_every_item() {
    let engine = Arc::new(MindmapEngine::new(EngineConfig::default()).unwrap());
    let mut batches = Vec::new();
    for i in 0..30 {
        let file = format!("src/mod_{i}.rs");
        batches.push(
            IngestBatch::new(file.clone(), "rust")
                .with_node(NodeRecord::new(file.clone(), NodeType::File, format!("mod_{i}.rs")))
                .with_node(NodeRecord::new(format!("fn_{i}"), NodeType::Function, format!("fn_{i}")))
                .with_edge(EdgeRecord::new(file, format!("fn_{i}"), EdgeType::Contains)),
        );
    }
    let scheduler = engine.ingest_scheduler();
    let report = engine.ingest_batches(&scheduler, batches).await;
    assert_eq!(report.nodes_inserted, 60);
    assert_eq!(report.edges_inserted, 30);
    assert!(report.failures.is_empty());
    assert_eq!(engine.node_count(), 60);
}
