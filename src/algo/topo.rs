use std::cmp::Reverse;
use std::collections::BinaryHeap;

use super::{GraphView, cycles};
use crate::errors::{CloudGraphError, Result};

/// Orders every node so that each one comes after everything it depends on.
///
/// Ties are broken by id. A cyclic graph yields
/// [`CloudGraphError::CycleDetected`] naming one edge on a cycle; no partial
/// order is returned.
pub fn topological_sort(view: &GraphView) -> Result<Vec<String>> {
    let n = view.node_count();
    let mut pending: Vec<usize> = (0..n).map(|i| view.outgoing(i).len()).collect();
    let mut ready: BinaryHeap<Reverse<usize>> = pending
        .iter()
        .enumerate()
        .filter(|(_, deps)| **deps == 0)
        .map(|(i, _)| Reverse(i))
        .collect();

    let mut order = Vec::with_capacity(n);
    while let Some(Reverse(node)) = ready.pop() {
        order.push(node);
        for &dependent in view.incoming(node) {
            pending[dependent] -= 1;
            if pending[dependent] == 0 {
                ready.push(Reverse(dependent));
            }
        }
    }

    if order.len() < n {
        let (from, to) = cycles::cycle_edge(view).unwrap_or_else(|| {
            // Unreachable for a consistent view: leftover nodes imply a cycle.
            let stuck = (0..n).find(|&i| pending[i] > 0).unwrap_or(0);
            (stuck, view.outgoing(stuck).first().copied().unwrap_or(stuck))
        });
        return Err(CloudGraphError::cycle(view.id(from), view.id(to)));
    }
    Ok(view.names(&order))
}
