use std::fs;

use cloudgraph::{
    EngineConfig, GraphEngine, Node, StoreLocation, bench_utils::bulky_attributes,
};
use tempfile::tempdir;

fn config(compression: bool) -> EngineConfig {
    EngineConfig {
        compression,
        ..EngineConfig::default()
    }
}

fn heavy_nodes() -> Vec<Node> {
    (0..100)
        .map(|i| {
            Node::new(format!("policy-{i:03}"), "aws_iam_policy")
                .with_attributes(bulky_attributes(5 * 1024))
        })
        .collect()
}

#[test]
fn test_compressed_store_is_materially_smaller() {
    let dir = tempdir().expect("tempdir");
    let mut sizes = Vec::new();
    for compression in [true, false] {
        let path = dir.path().join(format!("graph-{compression}.db"));
        let engine = GraphEngine::open(StoreLocation::file(&path), config(compression))
            .expect("engine");
        engine.add_nodes(&heavy_nodes()).expect("nodes");
        engine.close().expect("close");
        sizes.push(fs::metadata(&path).expect("metadata").len());
    }
    let (compressed, plain) = (sizes[0], sizes[1]);
    assert!(
        (compressed as f64) < plain as f64 * 0.7,
        "compressed {compressed} vs plain {plain}"
    );
}

#[test]
fn test_stats_reflect_payload_size() {
    let mut sizes = Vec::new();
    for compression in [true, false] {
        let engine = GraphEngine::open(StoreLocation::Memory, config(compression)).expect("engine");
        engine.add_nodes(&heavy_nodes()).expect("nodes");
        let stats = engine.get_stats().expect("stats");
        assert_eq!(stats.compression, compression);
        sizes.push(stats.db_size_bytes);
    }
    assert!(sizes[0] < sizes[1], "{sizes:?}");
}

#[test]
fn test_payloads_decode_regardless_of_writer_setting() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("mixed.db");
    let plain_node = Node::new("written-plain", "aws_iam_policy")
        .with_attributes(bulky_attributes(2048));
    let packed_node = Node::new("written-packed", "aws_iam_policy")
        .with_attributes(bulky_attributes(2048));
    {
        let engine = GraphEngine::open(StoreLocation::file(&path), config(false)).expect("plain");
        engine.add_node(&plain_node).expect("node");
        engine.close().expect("close");
    }
    {
        let engine = GraphEngine::open(StoreLocation::file(&path), config(true)).expect("packed");
        engine.add_node(&packed_node).expect("node");
        assert_eq!(
            engine.get_node("written-plain").expect("get").expect("present"),
            plain_node
        );
        engine.close().expect("close");
    }
    let engine = GraphEngine::open(StoreLocation::file(&path), config(false)).expect("plain again");
    assert_eq!(
        engine.get_node("written-packed").expect("get").expect("present"),
        packed_node
    );
    assert!(!engine.check_integrity().expect("integrity").has_issues());
}

#[test]
fn test_empty_attributes_round_trip() {
    for compression in [true, false] {
        let engine = GraphEngine::open(StoreLocation::Memory, config(compression)).expect("engine");
        let node = Node::new("bare", "aws_vpc");
        engine.add_node(&node).expect("node");
        let stored = engine.get_node("bare").expect("get").expect("present");
        assert!(stored.attributes.is_empty());
    }
}
