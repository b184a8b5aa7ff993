use cloudgraph::{Edge, GraphEngine, Node};
use rusqlite::{Connection, params};
use tempfile::tempdir;

fn seeded(path: &std::path::Path) -> GraphEngine {
    let engine = GraphEngine::open_path(path).expect("engine");
    engine
        .add_nodes(&[Node::new("vpc", "aws_vpc"), Node::new("subnet", "aws_subnet")])
        .expect("nodes");
    engine
        .add_edge(&Edge::new("subnet", "vpc", "belongs_to"))
        .expect("edge");
    engine
        .add_phantom_node("peer", "aws_vpc", "cross account")
        .expect("phantom");
    engine
}

#[test]
fn test_clean_store_has_no_issues() {
    let dir = tempdir().expect("tempdir");
    let engine = seeded(&dir.path().join("graph.db"));
    let report = engine.check_integrity().expect("check");
    assert_eq!(report.total_nodes, 3);
    assert_eq!(report.total_edges, 1);
    assert_eq!(report.phantom_nodes, 1);
    assert!(!report.has_issues(), "{report:?}");
    assert!(engine.store().check_integrity_strict().is_ok());
}

#[test]
fn test_detects_damage_written_behind_the_store() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("graph.db");
    let engine = seeded(&path);
    {
        let raw = Connection::open(&path).expect("raw");
        raw.pragma_update(None, "foreign_keys", "OFF")
            .expect("foreign keys off");
        raw.execute(
            "UPDATE nodes SET attributes = ?1 WHERE id = 'vpc'",
            params![vec![0u8, 1, 2, 3]],
        )
        .expect("corrupt payload");
        raw.execute(
            "INSERT INTO edges (source_id, target_id, relation) VALUES ('subnet', 'gone', 'routes_to')",
            [],
        )
        .expect("orphan edge");
        raw.execute(
            "UPDATE nodes SET scan_id = 'scan_never_started' WHERE id = 'subnet'",
            [],
        )
        .expect("unknown scan");
    }

    let report = engine.check_integrity().expect("check");
    assert_eq!(report.corrupt_payloads, 1);
    assert_eq!(report.orphan_edges, 1);
    assert_eq!(report.unknown_scan_nodes, 1);
    assert!(report.stale_metrics >= 1);
    assert!(report.has_issues());

    let err = engine
        .store()
        .check_integrity_strict()
        .expect_err("damage must fail strict check");
    assert!(err.source.is_none());
    assert_eq!(err.report, report);

    let read = engine.get_node("vpc");
    assert!(read.is_err(), "corrupt payload must not decode silently");
}

#[test]
fn test_stale_metrics_are_repaired_by_refresh() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("graph.db");
    let engine = seeded(&path);
    {
        let raw = Connection::open(&path).expect("raw");
        raw.execute("UPDATE node_metrics SET in_degree = 7 WHERE node_id = 'vpc'", [])
            .expect("skew");
    }
    assert_eq!(engine.check_integrity().expect("check").stale_metrics, 1);
    engine.store().refresh_metrics().expect("refresh");
    assert!(!engine.check_integrity().expect("check").has_issues());
    assert_eq!(engine.get_node_degree("vpc").expect("deg").in_degree, 1);
}
