use cloudgraph::{
    CloudGraphError, GraphEngine, Node, SCHEMA_VERSION,
    schema::{self, BASE_SCHEMA_VERSION},
};
use rusqlite::{Connection, params};
use tempfile::tempdir;

/// Writes a store the way the first schema version laid it out, with one
/// node whose attributes are plain JSON text.
fn write_v1_store(path: &std::path::Path) {
    let conn = Connection::open(path).expect("open v1");
    assert!(schema::ensure_schema(&conn).expect("base schema"));
    conn.execute(
        "INSERT INTO nodes (id, type, name, attributes) VALUES (?1, ?2, ?3, ?4)",
        params!["vpc-legacy", "aws_vpc", "legacy", r#"{"cidr":"10.0.0.0/16"}"#],
    )
    .expect("legacy node");
}

#[test]
fn test_reopen_is_idempotent() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("graph.db");
    {
        let engine = GraphEngine::open_path(&path).expect("create");
        assert_eq!(engine.get_schema_version().expect("version"), SCHEMA_VERSION);
        engine.add_node(&Node::new("vpc", "aws_vpc")).expect("node");
        engine.close().expect("close");
    }
    let engine = GraphEngine::open_path(&path).expect("reopen");
    assert_eq!(engine.get_schema_version().expect("version"), SCHEMA_VERSION);
    assert_eq!(engine.node_count().expect("count"), 1);
}

#[test]
fn test_v1_store_is_migrated_on_open() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("legacy.db");
    write_v1_store(&path);

    let engine = GraphEngine::open_path(&path).expect("open legacy");
    assert_eq!(engine.get_schema_version().expect("version"), SCHEMA_VERSION);

    let node = engine.get_node("vpc-legacy").expect("get").expect("present");
    assert!(!node.is_phantom);
    assert_eq!(node.scan_id, None);
    assert_eq!(node.attributes["cidr"], "10.0.0.0/16");

    // the migrated store accepts the newer features
    let session = engine.start_scan(Some("legacy"), None).expect("scan");
    engine
        .add_phantom_node("peer", "aws_vpc", "peering")
        .expect("phantom");
    assert!(engine.end_scan(&session.id, true, None).expect("end"));
}

#[test]
fn test_dry_run_reports_pending_statements_without_applying() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("legacy.db");
    write_v1_store(&path);

    let conn = Connection::open(&path).expect("open");
    let report = schema::run_pending_migrations(&conn, true).expect("dry run");
    assert!(report.dry_run);
    assert_eq!(report.from_version, BASE_SCHEMA_VERSION);
    assert_eq!(report.to_version, SCHEMA_VERSION);
    assert!(!report.statements.is_empty());
    assert_eq!(
        schema::read_schema_version(&conn).expect("version"),
        BASE_SCHEMA_VERSION
    );

    let applied = schema::migrate(&conn).expect("migrate");
    assert!(!applied.dry_run);
    assert_eq!(applied.statements.len(), report.statements.len());
    let again = schema::migrate(&conn).expect("second migrate");
    assert!(again.is_noop());
}

#[test]
fn test_partially_applied_migration_completes() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("partial.db");
    write_v1_store(&path);
    {
        let conn = Connection::open(&path).expect("open");
        conn.execute("ALTER TABLE nodes ADD COLUMN scan_id TEXT", [])
            .expect("first statement only");
    }
    let conn = Connection::open(&path).expect("open");
    let report = schema::migrate(&conn).expect("migrate");
    assert_eq!(report.already_applied.len(), 1);
    assert_eq!(report.to_version, SCHEMA_VERSION);
}

#[test]
fn test_newer_schema_is_rejected() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("future.db");
    {
        let engine = GraphEngine::open_path(&path).expect("create");
        engine.close().expect("close");
    }
    {
        let conn = Connection::open(&path).expect("open");
        conn.execute(
            "UPDATE metadata SET value = ?1 WHERE key = 'schema_version'",
            params![(SCHEMA_VERSION + 1).to_string()],
        )
        .expect("bump");
    }
    match GraphEngine::open_path(&path) {
        Err(CloudGraphError::SchemaError(msg)) => assert!(msg.contains("newer"), "{msg}"),
        Err(other) => panic!("unexpected error {other:?}"),
        Ok(_) => panic!("newer schema opened"),
    }
}
