use std::{thread, time::Duration};

use cloudgraph::{Edge, GraphEngine, Node, ScanStatus};

fn bucket(id: &str) -> Node {
    Node::new(id, "aws_s3_bucket").with_region("us-east-1")
}

#[test]
fn test_start_scan_sets_current_and_tags_writes() {
    let engine = GraphEngine::open_in_memory().expect("engine");
    assert_eq!(engine.current_scan(), None);

    let session = engine
        .start_scan(Some("prod"), Some("us-east-1"))
        .expect("start");
    assert!(session.id.starts_with("scan_"));
    assert_eq!(session.status, ScanStatus::Running);
    assert_eq!(session.profile.as_deref(), Some("prod"));
    assert_eq!(engine.current_scan().as_deref(), Some(session.id.as_str()));

    engine.add_node(&bucket("logs")).expect("node");
    engine.add_node(&bucket("assets")).expect("node");
    engine.add_edge(&Edge::new("assets", "logs", "logs_to")).expect("edge");

    let stored = engine.get_node("logs").expect("get").expect("present");
    assert_eq!(stored.scan_id.as_deref(), Some(session.id.as_str()));
    let edge = engine
        .get_edge("assets", "logs", "logs_to")
        .expect("get")
        .expect("present");
    assert_eq!(edge.scan_id.as_deref(), Some(session.id.as_str()));
}

#[test]
fn test_explicit_scan_id_wins_over_current() {
    let engine = GraphEngine::open_in_memory().expect("engine");
    let older = engine.start_scan(None, None).expect("older");
    engine.end_scan(&older.id, true, None).expect("end");
    let _current = engine.start_scan(None, None).expect("current");

    engine
        .add_node(&bucket("pinned").with_scan(older.id.clone()))
        .expect("node");
    let stored = engine.get_node("pinned").expect("get").expect("present");
    assert_eq!(stored.scan_id.as_deref(), Some(older.id.as_str()));
}

#[test]
fn test_end_scan_records_outcome_and_count() {
    let engine = GraphEngine::open_in_memory().expect("engine");
    let session = engine.start_scan(Some("dev"), None).expect("start");
    engine
        .add_nodes(&[bucket("a"), bucket("b"), bucket("c")])
        .expect("nodes");

    assert!(engine.end_scan(&session.id, true, None).expect("end"));
    assert_eq!(engine.current_scan(), None);

    let stored = engine
        .get_scan_session(&session.id)
        .expect("get")
        .expect("present");
    assert_eq!(stored.status, ScanStatus::Completed);
    assert_eq!(stored.resource_count, 3);
    assert!(stored.completed_at.is_some_and(|done| done >= stored.started_at));
    assert_eq!(stored.error_message, None);
}

#[test]
fn test_end_scan_is_a_noop_for_ended_or_unknown_sessions() {
    let engine = GraphEngine::open_in_memory().expect("engine");
    let session = engine.start_scan(None, None).expect("start");
    assert!(
        engine
            .end_scan(&session.id, false, Some("throttled by the provider"))
            .expect("fail")
    );
    assert!(!engine.end_scan(&session.id, true, None).expect("again"));
    assert!(!engine.end_scan("scan_missing", true, None).expect("unknown"));

    let stored = engine
        .get_scan_session(&session.id)
        .expect("get")
        .expect("present");
    assert_eq!(stored.status, ScanStatus::Failed);
    assert_eq!(
        stored.error_message.as_deref(),
        Some("throttled by the provider")
    );
    assert!(engine.get_scan_session("scan_missing").expect("get").is_none());
}

#[test]
fn test_list_scan_sessions_newest_first() {
    let engine = GraphEngine::open_in_memory().expect("engine");
    let mut ids = Vec::new();
    for _ in 0..4 {
        let session = engine.start_scan(None, None).expect("start");
        engine.end_scan(&session.id, true, None).expect("end");
        ids.push(session.id);
        thread::sleep(Duration::from_millis(2));
    }
    let listed: Vec<String> = engine
        .list_scan_sessions(3)
        .expect("list")
        .into_iter()
        .map(|s| s.id)
        .collect();
    ids.reverse();
    assert_eq!(listed, ids[..3]);
}

#[test]
fn test_rescan_cleans_up_resources_that_disappeared() {
    let engine = GraphEngine::open_in_memory().expect("engine");

    let first = engine.start_scan(Some("prod"), None).expect("first scan");
    engine
        .add_nodes(&[bucket("kept"), bucket("deleted-upstream")])
        .expect("nodes");
    engine
        .add_edge(&Edge::new("deleted-upstream", "kept", "replicates_to"))
        .expect("edge");
    engine.end_scan(&first.id, true, None).expect("end first");

    let second = engine.start_scan(Some("prod"), None).expect("second scan");
    engine.add_node(&bucket("kept")).expect("rediscovered");
    let removed = engine
        .cleanup_stale_resources(&second.id)
        .expect("cleanup");
    engine.end_scan(&second.id, true, None).expect("end second");

    assert_eq!(removed, 1);
    assert!(engine.get_node("deleted-upstream").expect("get").is_none());
    assert!(engine.get_node("kept").expect("get").is_some());
    assert_eq!(engine.edge_count().expect("edges"), 0);
    assert_eq!(engine.get_node_degree("kept").expect("deg").total(), 0);
}

#[test]
fn test_cleanup_keeps_untagged_nodes() {
    let engine = GraphEngine::open_in_memory().expect("engine");
    engine.add_node(&bucket("imported-before-scans")).expect("node");
    let session = engine.start_scan(None, None).expect("scan");
    engine.add_node(&bucket("seen")).expect("node");
    assert_eq!(engine.cleanup_stale_resources(&session.id).expect("cleanup"), 0);
    assert_eq!(engine.node_count().expect("count"), 2);
}

#[test]
fn test_second_scan_removes_the_one_missing_resource() {
    let engine = GraphEngine::open_in_memory().expect("engine");
    let ids = ["b-1", "b-2", "b-3", "b-4", "b-5"];

    let first = engine.start_scan(None, None).expect("first");
    for id in ids {
        engine.add_node(&bucket(id)).expect("node");
    }
    assert!(engine.end_scan(&first.id, true, None).expect("end"));

    let second = engine.start_scan(None, None).expect("second");
    for id in &ids[..4] {
        engine.add_node(&bucket(id)).expect("node");
    }
    assert!(engine.end_scan(&second.id, true, None).expect("end"));

    assert_eq!(engine.cleanup_stale_resources(&second.id).expect("cleanup"), 1);
    assert!(engine.get_node("b-5").expect("get").is_none());
    assert_eq!(engine.node_count().expect("count"), 4);
    let latest = engine
        .get_scan_session(&second.id)
        .expect("get")
        .expect("present");
    assert_eq!(latest.resource_count, 4);
}
