//! Node/edge storage on top of the connection pool.

mod edge_ops;
mod metrics;
mod node_ops;
mod query;
mod types;

use std::sync::Arc;
use std::thread;

use rusqlite::Connection;
use tracing::{debug, info};

use crate::{
    algo::GraphView,
    cache::ViewCache,
    codec::Codec,
    config::{EngineConfig, StoreLocation},
    errors::{CloudGraphError, Result},
    pool::ConnectionPool,
    schema::{self, MigrationReport},
};

pub use types::{BatchOutcome, Direction, Edge, EdgeKey, GraphStats, Node, NodeDegree};
pub(crate) use types::{EDGE_COLUMNS, EdgeRow, NODE_COLUMNS, NodeRow};

/// Embedded SQLite-backed store of resource nodes and dependency edges.
pub struct GraphStore {
    pool: ConnectionPool,
    codec: Codec,
    config: EngineConfig,
    views: ViewCache,
}

impl GraphStore {
    pub fn open(location: StoreLocation, config: EngineConfig) -> Result<Self> {
        let pool = ConnectionPool::open(location, config.pool.clone())?;
        Self::from_pool(pool, config)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::open(StoreLocation::Memory, EngineConfig::default())
    }

    /// Wraps an open pool, creating or migrating its schema.
    pub fn from_pool(pool: ConnectionPool, config: EngineConfig) -> Result<Self> {
        // Cached paths were bounded by whatever traversal limits the previous
        // opener used.
        let report: MigrationReport = pool.write_transaction(|conn| {
            let report = schema::initialize(conn)?;
            conn.execute("DELETE FROM path_cache", [])
                .map_err(CloudGraphError::from_sqlite)?;
            Ok(report)
        })?;
        if !report.is_noop() {
            info!(
                from = report.from_version,
                to = report.to_version,
                skipped = report.already_applied.len(),
                "store.schema.migrated"
            );
        }
        Ok(Self {
            pool,
            codec: Codec::new(config.compression),
            config,
            views: ViewCache::new(),
        })
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    pub fn codec(&self) -> Codec {
        self.codec
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn location(&self) -> &StoreLocation {
        self.pool.location()
    }

    pub fn schema_version(&self) -> Result<i64> {
        self.read(schema::read_schema_version)
    }

    pub fn close(self) -> Result<()> {
        self.pool.close()
    }

    /// Adjacency view of the whole graph, cached until the next mutation.
    pub fn view(&self) -> Result<Arc<GraphView>> {
        if let Some(view) = self.views.get() {
            return Ok(view);
        }
        let generation = self.views.generation();
        let view = Arc::new(self.read(GraphView::load)?);
        debug!(
            nodes = view.node_count(),
            edges = view.edge_count(),
            "store.view.loaded"
        );
        self.views.insert(generation, Arc::clone(&view));
        Ok(view)
    }

    pub(crate) fn view_generation(&self) -> u64 {
        self.views.generation()
    }

    pub(crate) fn read<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&Connection) -> Result<R>,
    {
        self.pool.with_reader(f)
    }

    /// Runs a graph mutation in one writer transaction and drops every
    /// derived structure (path cache, adjacency view) before it commits.
    pub(crate) fn write<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&Connection) -> Result<R>,
    {
        let out = self.pool.write_transaction(|conn| {
            let out = f(conn)?;
            conn.execute("DELETE FROM path_cache", [])
                .map_err(CloudGraphError::from_sqlite)?;
            self.views.invalidate();
            Ok(out)
        })?;
        // A reader on another handle may have loaded the pre-commit state
        // under the bumped generation.
        self.views.invalidate();
        Ok(out)
    }

    /// Applies `write_one` to every item, committing every
    /// `batch.commit_every` items and sleeping `batch.yield_duration_ms`
    /// every `batch.yield_every` items with the writer lock released.
    pub(crate) fn write_batched<T, F>(&self, items: &[T], mut write_one: F) -> Result<BatchOutcome>
    where
        F: FnMut(&Connection, &T) -> Result<bool>,
    {
        let batch = &self.config.batch;
        let chunk_size = batch.commit_every.max(1);
        let mut outcome = BatchOutcome::default();
        let mut processed = 0usize;
        for chunk in items.chunks(chunk_size) {
            let (written, skipped) = self.write(|conn| {
                let mut written = 0;
                let mut skipped = 0;
                for item in chunk {
                    if write_one(conn, item)? {
                        written += 1;
                    } else {
                        skipped += 1;
                    }
                }
                Ok((written, skipped))
            })?;
            outcome.written += written;
            outcome.skipped += skipped;
            let before = processed;
            processed += chunk.len();
            if batch.yield_every > 0
                && processed < items.len()
                && processed / batch.yield_every > before / batch.yield_every
            {
                debug!(processed, total = items.len(), "store.batch.yield");
                thread::sleep(batch.yield_duration());
            }
        }
        Ok(outcome)
    }

    pub(crate) fn current_scan_or(&self, explicit: Option<&String>) -> Option<String> {
        explicit.cloned().or_else(|| self.pool.current_scan())
    }
}
