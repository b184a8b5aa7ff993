use std::collections::{BTreeSet, VecDeque};

use serde::{Deserialize, Serialize};

use super::GraphView;
use crate::graph::EdgeKey;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ReductionReport {
    /// Edges implied by a longer path between the same endpoints.
    pub removed: Vec<EdgeKey>,
    pub edges_before: usize,
    pub edges_after: usize,
    /// False for a preview that left the store untouched.
    pub applied: bool,
}

/// Computes which edges a transitive reduction removes.
///
/// An edge `u -> w` goes when `w` stays reachable from `u` through at least
/// one other node. Candidates are checked in edge order against the graph as
/// reduced so far, so on cyclic input each removal keeps reachability intact.
/// Parallel relations between the same pair are removed together and
/// self-loops are never removed.
pub fn transitive_reduction(view: &GraphView) -> ReductionReport {
    let n = view.node_count();
    let mut adjacency: Vec<BTreeSet<usize>> = (0..n)
        .map(|i| view.outgoing(i).iter().copied().collect())
        .collect();

    let mut redundant = BTreeSet::new();
    for u in 0..n {
        let targets: Vec<usize> = adjacency[u].iter().copied().filter(|&w| w != u).collect();
        for w in targets {
            if reachable_without_direct(&adjacency, u, w) {
                adjacency[u].remove(&w);
                redundant.insert((u, w));
            }
        }
    }

    let removed: Vec<EdgeKey> = view
        .edges()
        .iter()
        .filter(|(s, t, _)| redundant.contains(&(*s, *t)))
        .map(|(s, t, relation)| view.edge_key(*s, *t, relation))
        .collect();
    ReductionReport {
        edges_before: view.edge_count(),
        edges_after: view.edge_count() - removed.len(),
        removed,
        applied: false,
    }
}

fn reachable_without_direct(adjacency: &[BTreeSet<usize>], from: usize, to: usize) -> bool {
    let mut seen = vec![false; adjacency.len()];
    let mut queue = VecDeque::new();
    seen[from] = true;
    queue.push_back(from);
    while let Some(node) = queue.pop_front() {
        for &next in &adjacency[node] {
            if node == from && next == to {
                continue;
            }
            if next == to {
                return true;
            }
            if !seen[next] {
                seen[next] = true;
                queue.push_back(next);
            }
        }
    }
    false
}
