use cloudgraph::{
    CentralityKind, CloudGraphError, Edge, EngineConfig, GraphEngine, Node, StoreLocation,
};

fn engine_with(edges: &[(&str, &str)]) -> GraphEngine {
    let engine = GraphEngine::open_in_memory().expect("engine");
    let mut ids: Vec<&str> = edges.iter().flat_map(|(s, t)| [*s, *t]).collect();
    ids.sort_unstable();
    ids.dedup();
    let nodes: Vec<Node> = ids.iter().map(|id| Node::new(*id, "resource")).collect();
    engine.add_nodes(&nodes).expect("nodes");
    let edges: Vec<Edge> = edges
        .iter()
        .map(|(s, t)| Edge::new(*s, *t, "depends_on"))
        .collect();
    engine.add_edges(&edges).expect("edges");
    engine
}

fn position(order: &[String], id: &str) -> usize {
    order
        .iter()
        .position(|x| x == id)
        .unwrap_or_else(|| panic!("{id} missing from {order:?}"))
}

#[test]
fn test_vpc_subnet_instance_apply_order() {
    let engine = GraphEngine::open_in_memory().expect("engine");
    engine.add_node(&Node::new("instance", "aws_instance")).expect("node");
    engine.add_node(&Node::new("subnet", "aws_subnet")).expect("node");
    engine.add_node(&Node::new("vpc", "aws_vpc")).expect("node");
    engine.add_edge(&Edge::new("subnet", "vpc", "belongs_to")).expect("edge");
    engine.add_edge(&Edge::new("instance", "subnet", "runs_in")).expect("edge");

    let order = engine.topological_sort().expect("sort");
    assert_eq!(order, ["vpc", "subnet", "instance"]);
    assert_eq!(engine.safe_apply_order().expect("apply"), order);
}

#[test]
fn test_destroy_order_reverses_apply_order() {
    let engine = engine_with(&[
        ("app", "db"),
        ("app", "cache"),
        ("db", "subnet"),
        ("cache", "subnet"),
        ("subnet", "vpc"),
    ]);
    let apply = engine.safe_apply_order().expect("apply");
    let mut destroy = engine.safe_destroy_order().expect("destroy");
    assert_eq!(apply.len(), 5);
    for edge in engine.get_all_edges().expect("edges") {
        assert!(position(&apply, &edge.target_id) < position(&apply, &edge.source_id));
    }
    destroy.reverse();
    assert_eq!(destroy, apply);
}

#[test]
fn test_cycle_detection_agrees_across_algorithms() {
    let engine = engine_with(&[("a", "b"), ("b", "c"), ("c", "a"), ("d", "a")]);

    assert!(engine.has_cycles().expect("has cycles"));
    let components = engine.strongly_connected_components().expect("scc");
    assert!(components.iter().any(|c| c == &["a", "b", "c"]));
    assert!(components.iter().any(|c| c == &["d"]));
    assert_eq!(
        engine.find_cycles(10).expect("cycles"),
        vec![vec!["a", "b", "c", "a"]]
    );

    let err = engine.topological_sort().expect_err("cyclic");
    match err {
        CloudGraphError::CycleDetected { from, to } => {
            assert!(["a", "b", "c"].contains(&from.as_str()));
            assert!(["a", "b", "c"].contains(&to.as_str()));
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert!(engine.safe_destroy_order().is_err());

    engine.remove_edge("c", "a", "depends_on").expect("break cycle");
    assert!(!engine.has_cycles().expect("acyclic"));
    assert!(engine.find_cycles(10).expect("cycles").is_empty());
    assert_eq!(engine.topological_sort().expect("sort").len(), 4);
}

#[test]
fn test_self_loop_is_a_cycle() {
    let engine = engine_with(&[("sg", "sg"), ("sg", "vpc")]);
    assert!(engine.has_cycles().expect("has cycles"));
    assert_eq!(engine.find_cycles(5).expect("cycles"), vec![vec!["sg", "sg"]]);
    assert!(matches!(
        engine.topological_sort(),
        Err(CloudGraphError::CycleDetected { .. })
    ));
}

#[test]
fn test_find_path_follows_dependencies() {
    let engine = engine_with(&[("app", "db"), ("db", "subnet"), ("subnet", "vpc"), ("app", "vpc")]);
    assert_eq!(
        engine.find_path("app", "vpc", 10).expect("path"),
        Some(vec!["app".to_string(), "vpc".to_string()])
    );
    assert_eq!(
        engine.find_path("db", "vpc", 10).expect("path"),
        Some(vec!["db".to_string(), "subnet".to_string(), "vpc".to_string()])
    );
    assert_eq!(engine.find_path("db", "vpc", 1).expect("too deep"), None);
    assert_eq!(engine.find_path("vpc", "app", 10).expect("reverse"), None);
    assert_eq!(engine.find_path("ghost", "app", 10).expect("unknown"), None);
    assert_eq!(
        engine.find_path("db", "db", 10).expect("same"),
        Some(vec!["db".to_string()])
    );
}

#[test]
fn test_cached_path_is_dropped_on_mutation() {
    let engine = engine_with(&[("a", "b"), ("b", "c")]);
    let first = engine.find_path("a", "c", 10).expect("path");
    assert_eq!(first.as_ref().map(Vec::len), Some(3));
    // second lookup is served from the cache and must agree
    assert_eq!(engine.find_path("a", "c", 10).expect("cached"), first);
    assert_eq!(engine.find_path("c", "a", 10).expect("none"), None);
    assert_eq!(engine.find_path("c", "a", 10).expect("cached none"), None);

    engine.add_edge(&Edge::new("a", "c", "depends_on")).expect("shortcut");
    assert_eq!(
        engine.find_path("a", "c", 10).expect("recomputed"),
        Some(vec!["a".to_string(), "c".to_string()])
    );
    engine.add_edge(&Edge::new("c", "a", "depends_on")).expect("back edge");
    assert_eq!(
        engine.find_path("c", "a", 10).expect("recomputed"),
        Some(vec!["c".to_string(), "a".to_string()])
    );
}

#[test]
fn test_path_length_cap_from_config() {
    let mut config = EngineConfig::default();
    config.traversal.max_path_length = 3;
    let engine = GraphEngine::open(StoreLocation::Memory, config).expect("engine");
    for id in ["a", "b", "c", "d"] {
        engine.add_node(&Node::new(id, "resource")).expect("node");
    }
    for (s, t) in [("a", "b"), ("b", "c"), ("c", "d")] {
        engine.add_edge(&Edge::new(s, t, "depends_on")).expect("edge");
    }
    assert!(engine.find_path("a", "c", 10).expect("short").is_some());
    assert!(engine.find_path("a", "d", 10).expect("long").is_none());
}

#[test]
fn test_reopen_with_tighter_cap_ignores_cached_paths() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("graph.db");
    let engine = GraphEngine::open_path(&path).expect("engine");
    for id in ["a", "b", "c", "d"] {
        engine.add_node(&Node::new(id, "resource")).expect("node");
    }
    for (s, t) in [("a", "b"), ("b", "c"), ("c", "d")] {
        engine.add_edge(&Edge::new(s, t, "depends_on")).expect("edge");
    }
    assert_eq!(
        engine.find_path("a", "d", 10).expect("path").map(|p| p.len()),
        Some(4)
    );
    engine.close().expect("close");

    let mut config = EngineConfig::default();
    config.traversal.max_path_length = 3;
    let engine = GraphEngine::open(StoreLocation::file(&path), config).expect("reopen");
    assert_eq!(engine.find_path("a", "d", 10).expect("capped"), None);
    assert!(engine.find_path("a", "c", 10).expect("short").is_some());
}

#[test]
fn test_connected_subgraph_blast_radius() {
    let engine = engine_with(&[
        ("web-1", "alb"),
        ("web-2", "alb"),
        ("alb", "subnet"),
        ("subnet", "vpc"),
        ("other", "vpc"),
    ]);
    let sub = engine.get_connected_subgraph("alb", 1).expect("subgraph");
    assert_eq!(sub.root, "alb");
    assert_eq!(sub.dependencies, ["subnet"]);
    assert_eq!(sub.dependents, ["web-1", "web-2"]);
    assert_eq!(sub.nodes, ["alb", "subnet", "web-1", "web-2"]);
    assert_eq!(sub.edges.len(), 3);
    assert_eq!(sub.blast_radius(), 2);

    let deep = engine.get_connected_subgraph("vpc", 10).expect("subgraph");
    assert_eq!(deep.blast_radius(), 5);
    assert!(deep.dependencies.is_empty());

    let missing = engine.get_connected_subgraph("nope", 3).expect("subgraph");
    assert!(missing.is_empty());
    assert_eq!(missing.root, "nope");
}

#[test]
fn test_most_critical_ranks_shared_dependency_first() {
    let engine = engine_with(&[
        ("svc-a", "kms"),
        ("svc-b", "kms"),
        ("svc-c", "kms"),
        ("svc-a", "logs"),
    ]);
    let degree = engine.get_centrality(CentralityKind::Degree).expect("degree");
    assert_eq!(degree.len(), 5);
    assert!((degree["kms"] - 0.75).abs() < 1e-9);

    let top = engine
        .get_most_critical(2, CentralityKind::Degree)
        .expect("critical");
    assert_eq!(top[0].0, "kms");
    assert_eq!(top[1].0, "svc-a");
    assert!(engine.get_most_critical(0, CentralityKind::Degree).expect("empty").is_empty());
}

#[cfg(feature = "centrality")]
#[test]
fn test_pagerank_favours_shared_dependency() {
    let engine = engine_with(&[("svc-a", "kms"), ("svc-b", "kms"), ("svc-c", "kms")]);
    let ranks = engine.get_centrality(CentralityKind::PageRank).expect("pagerank");
    let total: f64 = ranks.values().sum();
    assert!((total - 1.0).abs() < 1e-6);
    assert!(ranks["kms"] > ranks["svc-a"]);

    let top = engine
        .get_most_critical(1, CentralityKind::PageRank)
        .expect("critical");
    assert_eq!(top[0].0, "kms");
}

#[cfg(feature = "centrality")]
#[test]
fn test_betweenness_marks_bridge() {
    let engine = engine_with(&[("a", "bridge"), ("bridge", "b")]);
    let scores = engine
        .get_centrality(CentralityKind::Betweenness)
        .expect("betweenness");
    assert!(scores["bridge"] > 0.0);
    assert_eq!(scores["a"], 0.0);
    assert_eq!(scores["b"], 0.0);
}

#[test]
fn test_transitive_reduce_preview_and_apply() {
    let engine = engine_with(&[("app", "db"), ("db", "vpc"), ("app", "vpc")]);

    let preview = engine.transitive_reduce(false).expect("preview");
    assert!(!preview.applied);
    assert_eq!(preview.edges_before, 3);
    assert_eq!(preview.edges_after, 2);
    assert_eq!(preview.removed.len(), 1);
    assert_eq!(
        (preview.removed[0].source_id.as_str(), preview.removed[0].target_id.as_str()),
        ("app", "vpc")
    );
    assert_eq!(engine.edge_count().expect("untouched"), 3);

    let applied = engine.transitive_reduce(true).expect("apply");
    assert!(applied.applied);
    assert_eq!(engine.edge_count().expect("reduced"), 2);
    assert!(engine.get_edge("app", "vpc", "depends_on").expect("get").is_none());
    assert_eq!(engine.get_node_degree("vpc").expect("deg").in_degree, 1);
    // apply order is unchanged by the reduction
    assert_eq!(engine.safe_apply_order().expect("order"), ["vpc", "db", "app"]);
}

#[test]
fn test_algorithms_on_empty_graph() {
    let engine = GraphEngine::open_in_memory().expect("engine");
    assert!(engine.topological_sort().expect("sort").is_empty());
    assert!(!engine.has_cycles().expect("cycles"));
    assert!(engine.strongly_connected_components().expect("scc").is_empty());
    assert!(engine.get_centrality(CentralityKind::Degree).expect("degree").is_empty());
    assert_eq!(engine.transitive_reduce(true).expect("reduce").edges_before, 0);
}
