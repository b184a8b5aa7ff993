//! Public entry point composing storage, scan sessions and algorithms.

use std::path::Path;

use rusqlite::{OptionalExtension, params};
use tracing::{debug, info, warn};

use crate::{
    algo::{self, CentralityKind, CentralityScores, ReductionReport, Subgraph},
    config::{EngineConfig, StoreLocation},
    errors::{CloudGraphError, Result},
    graph::{BatchOutcome, Direction, Edge, GraphStats, GraphStore, Node, NodeDegree},
    integrity::IntegrityReport,
    pool::ConnectionPool,
    scan::ScanSession,
};

pub struct GraphEngine {
    store: GraphStore,
}

impl GraphEngine {
    pub fn open(location: StoreLocation, config: EngineConfig) -> Result<Self> {
        let store = GraphStore::open(location, config)?;
        info!(location = ?store.location(), "engine.opened");
        Ok(Self { store })
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::open(StoreLocation::Memory, EngineConfig::default())
    }

    pub fn open_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open(StoreLocation::file(path), EngineConfig::default())
    }

    pub fn store(&self) -> &GraphStore {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        self.store.config()
    }

    /// Closes every connection. Dropping the engine has the same effect
    /// without reporting close errors.
    pub fn close(self) -> Result<()> {
        self.store.close()?;
        info!("engine.closed");
        Ok(())
    }

    pub fn clear(&self) -> Result<()> {
        self.store.clear()
    }

    // Mutation

    pub fn add_node(&self, node: &Node) -> Result<()> {
        self.store.add_node(node)
    }

    pub fn add_nodes(&self, nodes: &[Node]) -> Result<BatchOutcome> {
        self.store.add_nodes_batch(nodes)
    }

    pub fn add_edge(&self, edge: &Edge) -> Result<()> {
        self.store.add_edge(edge)
    }

    pub fn add_edges(&self, edges: &[Edge]) -> Result<BatchOutcome> {
        self.store.add_edges_batch(edges)
    }

    pub fn remove_node(&self, id: &str) -> Result<bool> {
        self.store.remove_node(id)
    }

    pub fn remove_edge(&self, source_id: &str, target_id: &str, relation: &str) -> Result<bool> {
        self.store.remove_edge(source_id, target_id, relation)
    }

    pub fn set_metadata(&self, key: &str, value: &str) -> Result<()> {
        self.store.set_metadata(key, value)
    }

    // Query

    pub fn get_node(&self, id: &str) -> Result<Option<Node>> {
        self.store.get_node(id)
    }

    pub fn get_nodes_by_type(&self, node_type: &str) -> Result<Vec<Node>> {
        self.store.get_nodes_by_type(node_type)
    }

    pub fn get_all_nodes(&self) -> Result<Vec<Node>> {
        self.store.get_all_nodes()
    }

    pub fn get_edge(&self, source_id: &str, target_id: &str, relation: &str) -> Result<Option<Edge>> {
        self.store.get_edge(source_id, target_id, relation)
    }

    pub fn get_edges_from(&self, id: &str) -> Result<Vec<Edge>> {
        self.store.get_edges_from(id)
    }

    pub fn get_edges_to(&self, id: &str) -> Result<Vec<Edge>> {
        self.store.get_edges_to(id)
    }

    pub fn get_all_edges(&self) -> Result<Vec<Edge>> {
        self.store.get_all_edges()
    }

    pub fn node_count(&self) -> Result<usize> {
        self.store.node_count()
    }

    pub fn edge_count(&self) -> Result<usize> {
        self.store.edge_count()
    }

    pub fn search(&self, query: &str, limit: usize) -> Result<Vec<Node>> {
        self.store.search_nodes(query, limit)
    }

    pub fn get_neighbors(&self, id: &str, direction: Direction) -> Result<Vec<Node>> {
        self.store.get_neighbors(id, direction)
    }

    pub fn get_node_degree(&self, id: &str) -> Result<NodeDegree> {
        self.store.get_node_degree(id)
    }

    pub fn get_metadata(&self, key: &str) -> Result<Option<String>> {
        self.store.get_metadata(key)
    }

    pub fn get_stats(&self) -> Result<GraphStats> {
        self.store.get_stats()
    }

    pub fn get_schema_version(&self) -> Result<i64> {
        self.store.schema_version()
    }

    pub fn check_integrity(&self) -> Result<IntegrityReport> {
        self.store.check_integrity()
    }

    // Scan sessions and phantoms

    pub fn start_scan(&self, profile: Option<&str>, region: Option<&str>) -> Result<ScanSession> {
        self.store.start_scan(profile, region)
    }

    pub fn end_scan(&self, id: &str, success: bool, error: Option<&str>) -> Result<bool> {
        self.store.end_scan(id, success, error)
    }

    pub fn get_scan_session(&self, id: &str) -> Result<Option<ScanSession>> {
        self.store.get_scan_session(id)
    }

    pub fn list_scan_sessions(&self, limit: usize) -> Result<Vec<ScanSession>> {
        self.store.list_scan_sessions(limit)
    }

    pub fn current_scan(&self) -> Option<String> {
        self.store.current_scan()
    }

    pub fn cleanup_stale_resources(&self, current_scan_id: &str) -> Result<usize> {
        self.store.cleanup_stale_resources(current_scan_id)
    }

    pub fn add_phantom_node(&self, id: &str, node_type: &str, reason: &str) -> Result<bool> {
        self.store.add_phantom_node(id, node_type, reason)
    }

    pub fn resolve_phantom(&self, id: &str, real: &Node) -> Result<bool> {
        self.store.resolve_phantom(id, real)
    }

    pub fn get_phantom_nodes(&self) -> Result<Vec<Node>> {
        self.store.get_phantom_nodes()
    }

    // Algorithms

    /// Every node id, dependencies before their dependents.
    pub fn topological_sort(&self) -> Result<Vec<String>> {
        let view = self.store.view()?;
        algo::topological_sort(&view)
    }

    pub fn has_cycles(&self) -> Result<bool> {
        let view = self.store.view()?;
        Ok(algo::has_cycles(&view))
    }

    pub fn find_cycles(&self, limit: usize) -> Result<Vec<Vec<String>>> {
        let view = self.store.view()?;
        Ok(algo::find_cycles(
            &view,
            limit,
            self.config().traversal.max_expansions,
        ))
    }

    pub fn strongly_connected_components(&self) -> Result<Vec<Vec<String>>> {
        let view = self.store.view()?;
        Ok(algo::strongly_connected_components(&view))
    }

    /// Fails with [`CloudGraphError::Unsupported`] when `kind` is not built in.
    pub fn get_centrality(&self, kind: CentralityKind) -> Result<CentralityScores> {
        let view = self.store.view()?;
        algo::centrality(&view, kind, &self.config().centrality)
    }

    /// The `top_n` highest scoring nodes. Falls back to degree centrality when
    /// `kind` is unavailable.
    pub fn get_most_critical(&self, top_n: usize, kind: CentralityKind) -> Result<Vec<(String, f64)>> {
        let scores = match self.get_centrality(kind) {
            Err(CloudGraphError::Unsupported(reason)) => {
                warn!(%kind, %reason, "engine.centrality.fallback");
                self.get_centrality(CentralityKind::Degree)?
            }
            other => other?,
        };
        Ok(algo::rank_scores(&scores, top_n))
    }

    /// Shortest path along dependency edges, memoized until the next
    /// mutation.
    pub fn find_path(&self, source: &str, target: &str, max_depth: usize) -> Result<Option<Vec<String>>> {
        let generation = self.store.view_generation();
        if let Some(cached) = self.cached_path(source, target, max_depth)? {
            debug!(source, target, "engine.path.cache_hit");
            return Ok(cached);
        }
        let view = self.store.view()?;
        let path = algo::find_path(&view, source, target, max_depth, &self.config().traversal);
        self.remember_path(generation, source, target, max_depth, &path);
        Ok(path)
    }

    pub fn get_connected_subgraph(&self, id: &str, max_depth: usize) -> Result<Subgraph> {
        let view = self.store.view()?;
        Ok(algo::connected_subgraph(&view, id, max_depth))
    }

    /// Order in which resources can be created: dependencies first.
    pub fn safe_apply_order(&self) -> Result<Vec<String>> {
        self.topological_sort()
    }

    /// Order in which resources can be deleted: the reverse of
    /// [`safe_apply_order`](Self::safe_apply_order).
    pub fn safe_destroy_order(&self) -> Result<Vec<String>> {
        let mut order = self.safe_apply_order()?;
        order.reverse();
        Ok(order)
    }

    /// Finds edges implied by longer paths and, when `apply` is set, deletes
    /// them.
    pub fn transitive_reduce(&self, apply: bool) -> Result<ReductionReport> {
        let view = self.store.view()?;
        let mut report = algo::transitive_reduction(&view);
        if apply {
            let removed = self.store.remove_edges(&report.removed)?;
            report.applied = true;
            info!(
                removed,
                before = report.edges_before,
                after = report.edges_after,
                "engine.reduction.applied"
            );
        }
        Ok(report)
    }

    // Durability

    /// Copies the whole store to `target` while writes are held off.
    pub fn snapshot<P: AsRef<Path>>(&self, target: P) -> Result<()> {
        self.store.pool().backup_to(target)
    }

    /// Loads a snapshot file into a fresh in-memory engine.
    pub fn load_snapshot<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::load_snapshot_into(path, StoreLocation::Memory, EngineConfig::default())
    }

    /// Loads a snapshot file into a store at `location`, replacing its
    /// content, and migrates it if the snapshot predates the current schema.
    pub fn load_snapshot_into<P: AsRef<Path>>(
        path: P,
        location: StoreLocation,
        config: EngineConfig,
    ) -> Result<Self> {
        let path = path.as_ref();
        let pool = ConnectionPool::open(location, config.pool.clone())?;
        pool.restore_from(path)?;
        let store = GraphStore::from_pool(pool, config)?;
        info!(source = %path.display(), "engine.snapshot.loaded");
        Ok(Self { store })
    }

    fn cached_path(
        &self,
        source: &str,
        target: &str,
        max_depth: usize,
    ) -> Result<Option<Option<Vec<String>>>> {
        let stored: Option<Option<String>> = self.store.pool().with_reader(|conn| {
            conn.query_row(
                "SELECT path FROM path_cache
                 WHERE source_id = ?1 AND target_id = ?2 AND max_depth = ?3",
                params![source, target, max_depth as i64],
                |row| row.get(0),
            )
            .optional()
            .map_err(CloudGraphError::from_sqlite)
        })?;
        match stored {
            None => Ok(None),
            Some(None) => Ok(Some(None)),
            Some(Some(text)) => match serde_json::from_str::<Vec<String>>(&text) {
                Ok(path) => Ok(Some(Some(path))),
                Err(err) => {
                    warn!(source, target, error = %err, "engine.path.cache_unreadable");
                    Ok(None)
                }
            },
        }
    }

    /// Stores a computed path unless the writer is busy or the graph changed
    /// since the computation started.
    fn remember_path(
        &self,
        generation: u64,
        source: &str,
        target: &str,
        max_depth: usize,
        path: &Option<Vec<String>>,
    ) {
        let encoded = match path.as_ref().map(serde_json::to_string).transpose() {
            Ok(encoded) => encoded,
            Err(err) => {
                warn!(error = %err, "engine.path.encode_failed");
                return;
            }
        };
        let outcome = self.store.pool().try_with_writer(|conn| {
            if generation != self.store.view_generation() {
                return Ok(());
            }
            conn.execute(
                "INSERT INTO path_cache (source_id, target_id, max_depth, path)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(source_id, target_id, max_depth) DO UPDATE SET
                    path = excluded.path,
                    computed_at = CURRENT_TIMESTAMP",
                params![source, target, max_depth as i64, encoded],
            )
            .map_err(CloudGraphError::from_sqlite)?;
            Ok(())
        });
        if let Some(Err(err)) = outcome {
            warn!(source, target, error = %err, "engine.path.cache_write_failed");
        }
    }
}
