//! Whole-graph algorithms over an in-memory adjacency snapshot.
//!
//! Every algorithm runs on a [`GraphView`], loaded from the store in one read
//! and cached until the next mutation. Node indices follow id order, so
//! iterating indices visits ids lexically and keeps every result
//! deterministic.

mod centrality;
mod cycles;
mod reduction;
mod topo;
mod traversal;

use ahash::AHashMap;
use rusqlite::Connection;

use crate::errors::{CloudGraphError, Result};
use crate::graph::EdgeKey;

pub use centrality::{CentralityKind, CentralityScores, centrality, rank_scores};
pub use cycles::{find_cycles, has_cycles, strongly_connected_components};
pub use reduction::{ReductionReport, transitive_reduction};
pub use topo::topological_sort;
pub use traversal::{Subgraph, connected_subgraph, find_path};

#[derive(Debug, Clone, Default)]
pub struct GraphView {
    ids: Vec<String>,
    index: AHashMap<String, usize>,
    /// Distinct successors per node: the nodes it depends on.
    outgoing: Vec<Vec<usize>>,
    /// Distinct predecessors per node: its dependents.
    incoming: Vec<Vec<usize>>,
    edges: Vec<(usize, usize, String)>,
}

impl GraphView {
    /// Reads every node id and edge triple.
    pub fn load(conn: &Connection) -> Result<Self> {
        let mut stmt = conn
            .prepare("SELECT id FROM nodes ORDER BY id")
            .map_err(CloudGraphError::from_sqlite)?;
        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(CloudGraphError::from_sqlite)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(CloudGraphError::from_sqlite)?;

        let mut stmt = conn
            .prepare("SELECT source_id, target_id, relation FROM edges")
            .map_err(CloudGraphError::from_sqlite)?;
        let edges = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })
            .map_err(CloudGraphError::from_sqlite)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(CloudGraphError::from_sqlite)?;
        Ok(Self::from_parts(ids, edges))
    }

    /// Builds a view from ids and `(source, target, relation)` triples.
    /// Endpoints missing from `ids` are added.
    pub fn from_parts<I, S>(ids: I, edges: Vec<(String, String, String)>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut all: Vec<String> = ids.into_iter().map(Into::into).collect();
        for (source, target, _) in &edges {
            all.push(source.clone());
            all.push(target.clone());
        }
        all.sort_unstable();
        all.dedup();
        let index: AHashMap<String, usize> = all
            .iter()
            .enumerate()
            .map(|(i, id)| (id.clone(), i))
            .collect();

        let mut outgoing = vec![Vec::new(); all.len()];
        let mut incoming = vec![Vec::new(); all.len()];
        let mut indexed = Vec::with_capacity(edges.len());
        for (source, target, relation) in edges {
            let (s, t) = (index[&source], index[&target]);
            outgoing[s].push(t);
            incoming[t].push(s);
            indexed.push((s, t, relation));
        }
        for list in outgoing.iter_mut().chain(incoming.iter_mut()) {
            list.sort_unstable();
            list.dedup();
        }
        indexed.sort_unstable();
        indexed.dedup();

        Self {
            ids: all,
            index,
            outgoing,
            incoming,
            edges: indexed,
        }
    }

    pub fn node_count(&self) -> usize {
        self.ids.len()
    }

    /// Number of edge triples, counting parallel relations separately.
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn id(&self, index: usize) -> &str {
        &self.ids[index]
    }

    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    pub fn outgoing(&self, index: usize) -> &[usize] {
        &self.outgoing[index]
    }

    pub fn incoming(&self, index: usize) -> &[usize] {
        &self.incoming[index]
    }

    pub fn has_self_loop(&self, index: usize) -> bool {
        self.outgoing[index].binary_search(&index).is_ok()
    }

    /// Edge triples sorted by source, target and relation indices.
    pub fn edges(&self) -> &[(usize, usize, String)] {
        &self.edges
    }

    pub(crate) fn edge_key(&self, source: usize, target: usize, relation: &str) -> EdgeKey {
        EdgeKey {
            source_id: self.ids[source].clone(),
            target_id: self.ids[target].clone(),
            relation: relation.to_string(),
        }
    }

    pub(crate) fn names(&self, indices: &[usize]) -> Vec<String> {
        indices.iter().map(|&i| self.ids[i].clone()).collect()
    }
}

#[cfg(test)]
pub(crate) fn view_of(edges: &[(&str, &str)]) -> GraphView {
    GraphView::from_parts(
        Vec::<String>::new(),
        edges
            .iter()
            .map(|(s, t)| (s.to_string(), t.to_string(), "depends_on".to_string()))
            .collect(),
    )
}
