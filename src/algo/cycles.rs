use super::GraphView;

const UNVISITED: usize = usize::MAX;

/// Tarjan's algorithm without recursion. Components are returned with their
/// members sorted and ordered by smallest member.
pub(crate) fn tarjan(view: &GraphView) -> Vec<Vec<usize>> {
    let n = view.node_count();
    let mut index = vec![UNVISITED; n];
    let mut low = vec![0usize; n];
    let mut on_stack = vec![false; n];
    let mut stack = Vec::new();
    let mut call: Vec<(usize, usize)> = Vec::new();
    let mut next = 0usize;
    let mut components = Vec::new();

    for root in 0..n {
        if index[root] != UNVISITED {
            continue;
        }
        index[root] = next;
        low[root] = next;
        next += 1;
        stack.push(root);
        on_stack[root] = true;
        call.push((root, 0));

        while let Some(frame) = call.last_mut() {
            let v = frame.0;
            let successors = view.outgoing(v);
            if frame.1 < successors.len() {
                let w = successors[frame.1];
                frame.1 += 1;
                if index[w] == UNVISITED {
                    index[w] = next;
                    low[w] = next;
                    next += 1;
                    stack.push(w);
                    on_stack[w] = true;
                    call.push((w, 0));
                } else if on_stack[w] {
                    low[v] = low[v].min(index[w]);
                }
                continue;
            }
            call.pop();
            if let Some(&(parent, _)) = call.last() {
                low[parent] = low[parent].min(low[v]);
            }
            if low[v] == index[v] {
                let mut component = Vec::new();
                while let Some(w) = stack.pop() {
                    on_stack[w] = false;
                    component.push(w);
                    if w == v {
                        break;
                    }
                }
                component.sort_unstable();
                components.push(component);
            }
        }
    }
    components.sort_unstable_by_key(|c| c[0]);
    components
}

fn is_cyclic(view: &GraphView, component: &[usize]) -> bool {
    component.len() > 1 || view.has_self_loop(component[0])
}

/// Every strongly connected component, singletons included.
pub fn strongly_connected_components(view: &GraphView) -> Vec<Vec<String>> {
    tarjan(view).iter().map(|c| view.names(c)).collect()
}

pub fn has_cycles(view: &GraphView) -> bool {
    tarjan(view).iter().any(|c| is_cyclic(view, c))
}

/// One edge lying on a cycle, if the graph has any.
pub(crate) fn cycle_edge(view: &GraphView) -> Option<(usize, usize)> {
    tarjan(view)
        .into_iter()
        .find(|c| is_cyclic(view, c))
        .and_then(|component| {
            let from = component[0];
            view.outgoing(from)
                .iter()
                .copied()
                .find(|to| component.binary_search(to).is_ok())
                .map(|to| (from, to))
        })
}

/// Enumerates up to `limit` elementary cycles as closed id lists
/// (`[a, b, a]`). Each cycle is reported once, starting from its smallest id.
/// The search stops after `max_expansions` path extensions.
pub fn find_cycles(view: &GraphView, limit: usize, max_expansions: usize) -> Vec<Vec<String>> {
    if limit == 0 {
        return Vec::new();
    }
    let mut component_of = vec![0usize; view.node_count()];
    let mut cyclic = Vec::new();
    for (cid, component) in tarjan(view).into_iter().enumerate() {
        for &node in &component {
            component_of[node] = cid;
        }
        cyclic.push(is_cyclic(view, &component));
    }

    let mut cycles: Vec<Vec<usize>> = Vec::new();
    let mut expansions = 0usize;
    'starts: for start in 0..view.node_count() {
        if !cyclic[component_of[start]] {
            continue;
        }
        let mut stack = vec![(start, vec![start])];
        while let Some((node, path)) = stack.pop() {
            for &next in view.outgoing(node).iter().rev() {
                if next == start {
                    let mut cycle = path.clone();
                    cycle.push(start);
                    cycles.push(cycle);
                    if cycles.len() >= limit {
                        break 'starts;
                    }
                    continue;
                }
                if next < start
                    || component_of[next] != component_of[start]
                    || path.contains(&next)
                {
                    continue;
                }
                expansions += 1;
                if expansions > max_expansions {
                    break 'starts;
                }
                let mut extended = path.clone();
                extended.push(next);
                stack.push((next, extended));
            }
        }
    }
    cycles.sort();
    cycles.iter().map(|c| view.names(c)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algo::view_of;

    #[test]
    fn test_components_group_cycles() {
        let view = view_of(&[("a", "b"), ("b", "a"), ("b", "c"), ("c", "d"), ("d", "c")]);
        assert_eq!(
            strongly_connected_components(&view),
            vec![vec!["a", "b"], vec!["c", "d"]]
        );
        assert!(has_cycles(&view));
    }

    #[test]
    fn test_dag_has_only_singletons() {
        let view = view_of(&[("a", "b"), ("b", "c"), ("a", "c")]);
        let components = strongly_connected_components(&view);
        assert_eq!(components.len(), 3);
        assert!(components.iter().all(|c| c.len() == 1));
        assert!(!has_cycles(&view));
        assert!(cycle_edge(&view).is_none());
    }

    #[test]
    fn test_self_loop_counts() {
        let view = view_of(&[("a", "a"), ("a", "b")]);
        assert!(has_cycles(&view));
        assert_eq!(find_cycles(&view, 10, 1_000), vec![vec!["a", "a"]]);
    }

    #[test]
    fn test_find_cycles_reports_each_cycle_once() {
        let view = view_of(&[("a", "b"), ("b", "c"), ("c", "a"), ("b", "a")]);
        let cycles = find_cycles(&view, 10, 1_000);
        assert_eq!(cycles, vec![vec!["a", "b", "a"], vec!["a", "b", "c", "a"]]);
    }

    #[test]
    fn test_find_cycles_respects_limit() {
        let view = view_of(&[("a", "b"), ("b", "a"), ("c", "d"), ("d", "c")]);
        assert_eq!(find_cycles(&view, 1, 1_000).len(), 1);
        assert!(find_cycles(&view, 0, 1_000).is_empty());
    }
}
