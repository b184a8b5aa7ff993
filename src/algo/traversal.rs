use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use super::GraphView;
use crate::config::TraversalConfig;
use crate::graph::EdgeKey;

/// Shortest dependency path from `source` to `target`, following edges in
/// their stored direction.
///
/// The path holds at most `min(max_depth, max_path_length - 1)` edges and the
/// search gives up after `max_expansions` visited nodes. Unknown ids and
/// unreachable targets yield `None`.
pub fn find_path(
    view: &GraphView,
    source: &str,
    target: &str,
    max_depth: usize,
    config: &TraversalConfig,
) -> Option<Vec<String>> {
    let start = view.index_of(source)?;
    let end = view.index_of(target)?;
    if start == end {
        return Some(vec![source.to_string()]);
    }
    let depth_cap = max_depth.min(config.max_path_length.saturating_sub(1));
    if depth_cap == 0 {
        return None;
    }

    let n = view.node_count();
    let mut parent = vec![usize::MAX; n];
    let mut depth = vec![0usize; n];
    let mut seen = vec![false; n];
    let mut queue = VecDeque::new();
    let mut expansions = 0usize;
    seen[start] = true;
    queue.push_back(start);

    while let Some(node) = queue.pop_front() {
        expansions += 1;
        if expansions > config.max_expansions {
            tracing::debug!(source, target, expansions, "algo.path.expansion_cap");
            return None;
        }
        if depth[node] >= depth_cap {
            continue;
        }
        for &next in view.outgoing(node) {
            if seen[next] {
                continue;
            }
            seen[next] = true;
            parent[next] = node;
            depth[next] = depth[node] + 1;
            if next == end {
                return Some(unwind(view, &parent, start, end));
            }
            queue.push_back(next);
        }
    }
    None
}

fn unwind(view: &GraphView, parent: &[usize], start: usize, end: usize) -> Vec<String> {
    let mut path = vec![end];
    let mut current = end;
    while current != start {
        current = parent[current];
        path.push(current);
    }
    path.reverse();
    view.names(&path)
}

/// A node with everything within a bounded number of hops in either
/// direction.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subgraph {
    pub root: String,
    /// Root, dependencies and dependents, sorted. Empty for an unknown root.
    pub nodes: Vec<String>,
    /// Edges with both endpoints in `nodes`.
    pub edges: Vec<EdgeKey>,
    /// Nodes the root depends on, directly or transitively.
    pub dependencies: Vec<String>,
    /// Nodes that depend on the root, directly or transitively.
    pub dependents: Vec<String>,
}

impl Subgraph {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Number of nodes affected by a change to the root.
    pub fn blast_radius(&self) -> usize {
        self.dependents.len()
    }
}

pub fn connected_subgraph(view: &GraphView, root: &str, max_depth: usize) -> Subgraph {
    let Some(start) = view.index_of(root) else {
        return Subgraph {
            root: root.to_string(),
            ..Subgraph::default()
        };
    };
    let dependencies = reach(view, start, max_depth, |i| view.outgoing(i));
    let dependents = reach(view, start, max_depth, |i| view.incoming(i));

    let mut member = vec![false; view.node_count()];
    member[start] = true;
    for &i in dependencies.iter().chain(&dependents) {
        member[i] = true;
    }
    let nodes: Vec<usize> = (0..view.node_count()).filter(|&i| member[i]).collect();
    let edges = view
        .edges()
        .iter()
        .filter(|(s, t, _)| member[*s] && member[*t])
        .map(|(s, t, relation)| view.edge_key(*s, *t, relation))
        .collect();

    Subgraph {
        root: root.to_string(),
        nodes: view.names(&nodes),
        edges,
        dependencies: view.names(&dependencies),
        dependents: view.names(&dependents),
    }
}

/// Nodes reachable from `start` within `max_depth` hops, excluding `start`,
/// sorted by index.
fn reach<'a, F>(view: &GraphView, start: usize, max_depth: usize, step: F) -> Vec<usize>
where
    F: Fn(usize) -> &'a [usize],
{
    let mut seen = vec![false; view.node_count()];
    let mut queue = VecDeque::new();
    let mut found = Vec::new();
    seen[start] = true;
    queue.push_back((start, 0usize));
    while let Some((node, depth)) = queue.pop_front() {
        if depth >= max_depth {
            continue;
        }
        for &next in step(node) {
            if !seen[next] {
                seen[next] = true;
                found.push(next);
                queue.push_back((next, depth + 1));
            }
        }
    }
    found.sort_unstable();
    found
}
