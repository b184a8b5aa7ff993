use rusqlite::{Connection, OptionalExtension, params};
use tracing::debug;

use super::{EDGE_COLUMNS, EdgeRow, GraphStore, metrics, types::validate_edge};
use crate::codec::Codec;
use crate::errors::{CloudGraphError, Result, is_foreign_key_violation};
use crate::graph::{BatchOutcome, Edge, EdgeKey};
use crate::phantom::{PHANTOM_NODE_TYPE, insert_phantom};

const INSERT_EDGE: &str = "INSERT INTO edges
        (source_id, target_id, relation, attributes, weight, scan_id)
     VALUES (?1, ?2, ?3, ?4, ?5, ?6)";

const INSERT_EDGE_OR_SKIP: &str = "INSERT INTO edges
        (source_id, target_id, relation, attributes, weight, scan_id)
     VALUES (?1, ?2, ?3, ?4, ?5, ?6)
     ON CONFLICT(source_id, target_id, relation) DO NOTHING";

enum Endpoints {
    Ready,
    Missing(String),
}

impl GraphStore {
    /// Inserts a single edge.
    ///
    /// A second edge with the same `(source, target, relation)` triple fails
    /// with [`CloudGraphError::UniqueViolation`]. Endpoints without a node row
    /// become phantom nodes when `auto_phantom` is on and are rejected as
    /// invalid input otherwise.
    pub fn add_edge(&self, edge: &Edge) -> Result<()> {
        validate_edge(edge)?;
        let scan_id = self.current_scan_or(edge.scan_id.as_ref());
        let config = self.config();
        self.write(|conn| {
            if let Endpoints::Missing(id) =
                prepare_endpoints(conn, edge, config.auto_phantom, scan_id.as_deref())?
            {
                return Err(CloudGraphError::invalid_input(format!(
                    "edge {} -> {} references unknown node {id}",
                    edge.source_id, edge.target_id
                )));
            }
            write_edge(conn, &self.codec(), INSERT_EDGE, edge, scan_id.as_deref()).map_err(
                |err| match err {
                    CloudGraphError::UniqueViolation(_) => CloudGraphError::unique(format!(
                        "edge {} -> {} ({}) already exists",
                        edge.source_id, edge.target_id, edge.relation
                    )),
                    other => other,
                },
            )?;
            if config.metrics {
                metrics::touch_degrees(conn, [edge.source_id.as_str(), edge.target_id.as_str()])?;
            }
            Ok(())
        })?;
        debug!(
            source = %edge.source_id,
            target = %edge.target_id,
            relation = %edge.relation,
            "store.edge.inserted"
        );
        Ok(())
    }

    /// Inserts many edges with periodic commits and backpressure pauses.
    ///
    /// Duplicate triples are skipped, as are edges with a missing endpoint when
    /// `auto_phantom` is off.
    pub fn add_edges_batch(&self, edges: &[Edge]) -> Result<BatchOutcome> {
        for edge in edges {
            validate_edge(edge)?;
        }
        let current = self.pool().current_scan();
        let codec = self.codec();
        let auto_phantom = self.config().auto_phantom;
        let outcome = self.write_batched(edges, |conn, edge| {
            let scan_id = edge.scan_id.as_deref().or(current.as_deref());
            if let Endpoints::Missing(id) = prepare_endpoints(conn, edge, auto_phantom, scan_id)? {
                debug!(missing = %id, relation = %edge.relation, "store.edge.skipped");
                return Ok(false);
            }
            write_edge(conn, &codec, INSERT_EDGE_OR_SKIP, edge, scan_id)
        })?;
        if self.config().metrics && outcome.written > 0 {
            self.refresh_metrics()?;
        }
        debug!(
            written = outcome.written,
            skipped = outcome.skipped,
            "store.edges.batch"
        );
        Ok(outcome)
    }

    /// Deletes one edge. Returns false when no such edge exists.
    pub fn remove_edge(&self, source_id: &str, target_id: &str, relation: &str) -> Result<bool> {
        let metrics = self.config().metrics;
        self.write(|conn| {
            let changed = conn
                .execute(
                    "DELETE FROM edges WHERE source_id = ?1 AND target_id = ?2 AND relation = ?3",
                    params![source_id, target_id, relation],
                )
                .map_err(CloudGraphError::from_sqlite)?;
            if changed > 0 && metrics {
                metrics::touch_degrees(conn, [source_id, target_id])?;
            }
            Ok(changed > 0)
        })
    }

    /// Deletes every listed edge in one transaction and returns how many
    /// existed.
    pub fn remove_edges(&self, keys: &[EdgeKey]) -> Result<usize> {
        if keys.is_empty() {
            return Ok(0);
        }
        let removed = self.write(|conn| {
            let mut stmt = conn
                .prepare_cached(
                    "DELETE FROM edges WHERE source_id = ?1 AND target_id = ?2 AND relation = ?3",
                )
                .map_err(CloudGraphError::from_sqlite)?;
            let mut removed = 0;
            for key in keys {
                removed += stmt
                    .execute(params![key.source_id, key.target_id, key.relation])
                    .map_err(CloudGraphError::from_sqlite)?;
            }
            Ok(removed)
        })?;
        if removed > 0 && self.config().metrics {
            self.refresh_metrics()?;
        }
        debug!(removed, "store.edges.removed");
        Ok(removed)
    }

    pub fn get_edge(&self, source_id: &str, target_id: &str, relation: &str) -> Result<Option<Edge>> {
        let codec = self.codec();
        self.read(|conn| {
            let row = conn
                .query_row(
                    &format!(
                        "SELECT {EDGE_COLUMNS} FROM edges
                         WHERE source_id = ?1 AND target_id = ?2 AND relation = ?3"
                    ),
                    params![source_id, target_id, relation],
                    EdgeRow::read,
                )
                .optional()
                .map_err(CloudGraphError::from_sqlite)?;
            row.map(|r| r.decode(&codec)).transpose()
        })
    }

    /// Edges leaving `id`, i.e. the things `id` depends on.
    pub fn get_edges_from(&self, id: &str) -> Result<Vec<Edge>> {
        self.select_edges(
            &format!(
                "SELECT {EDGE_COLUMNS} FROM edges WHERE source_id = ?1
                 ORDER BY target_id, relation"
            ),
            Some(id),
        )
    }

    /// Edges arriving at `id`, i.e. the things that depend on `id`.
    pub fn get_edges_to(&self, id: &str) -> Result<Vec<Edge>> {
        self.select_edges(
            &format!(
                "SELECT {EDGE_COLUMNS} FROM edges WHERE target_id = ?1
                 ORDER BY source_id, relation"
            ),
            Some(id),
        )
    }

    pub fn get_all_edges(&self) -> Result<Vec<Edge>> {
        self.select_edges(
            &format!("SELECT {EDGE_COLUMNS} FROM edges ORDER BY source_id, target_id, relation"),
            None,
        )
    }

    pub fn edge_count(&self) -> Result<usize> {
        self.read(|conn| {
            conn.query_row("SELECT COUNT(*) FROM edges", [], |row| row.get::<_, i64>(0))
                .map(|n| n as usize)
                .map_err(CloudGraphError::from_sqlite)
        })
    }

    fn select_edges(&self, sql: &str, id: Option<&str>) -> Result<Vec<Edge>> {
        let codec = self.codec();
        self.read(|conn| {
            let mut stmt = conn.prepare_cached(sql).map_err(CloudGraphError::from_sqlite)?;
            let rows = match id {
                Some(id) => stmt.query_map(params![id], EdgeRow::read),
                None => stmt.query_map([], EdgeRow::read),
            }
            .map_err(CloudGraphError::from_sqlite)?;
            let mut edges = Vec::new();
            for row in rows {
                edges.push(row.map_err(CloudGraphError::from_sqlite)?.decode(&codec)?);
            }
            Ok(edges)
        })
    }
}

fn prepare_endpoints(
    conn: &Connection,
    edge: &Edge,
    auto_phantom: bool,
    scan_id: Option<&str>,
) -> Result<Endpoints> {
    let sides = [
        (
            &edge.source_id,
            format!("referenced by {} edge to {}", edge.relation, edge.target_id),
        ),
        (
            &edge.target_id,
            format!("referenced by {} edge from {}", edge.relation, edge.source_id),
        ),
    ];
    for (id, reason) in sides {
        if node_exists(conn, id)? {
            continue;
        }
        if !auto_phantom {
            return Ok(Endpoints::Missing(id.clone()));
        }
        insert_phantom(conn, id, PHANTOM_NODE_TYPE, &reason, scan_id)?;
        debug!(id = %id, "store.phantom.auto_created");
    }
    Ok(Endpoints::Ready)
}

fn node_exists(conn: &Connection, id: &str) -> Result<bool> {
    conn.prepare_cached("SELECT 1 FROM nodes WHERE id = ?1")
        .and_then(|mut stmt| stmt.exists(params![id]))
        .map_err(CloudGraphError::from_sqlite)
}

/// Returns false when the statement skipped the row.
fn write_edge(
    conn: &Connection,
    codec: &Codec,
    sql: &str,
    edge: &Edge,
    scan_id: Option<&str>,
) -> Result<bool> {
    let attributes = codec.encode(&edge.attributes)?;
    let mut stmt = conn.prepare_cached(sql).map_err(CloudGraphError::from_sqlite)?;
    let changed = stmt
        .execute(params![
            edge.source_id,
            edge.target_id,
            edge.relation,
            attributes,
            edge.weight,
            scan_id,
        ])
        .map_err(|e| {
            if is_foreign_key_violation(&e) {
                CloudGraphError::invalid_input(format!(
                    "edge {} -> {} references an unknown node",
                    edge.source_id, edge.target_id
                ))
            } else {
                CloudGraphError::from_sqlite(e)
            }
        })?;
    Ok(changed > 0)
}
