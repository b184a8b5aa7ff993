//! Materialized per-node degree counts.

use rusqlite::{Connection, OptionalExtension, params};
use tracing::debug;

use super::GraphStore;
use crate::errors::{CloudGraphError, Result};
use crate::graph::NodeDegree;

const TOUCH_DEGREE: &str = "INSERT INTO node_metrics (node_id, in_degree, out_degree, updated_at)
     SELECT id,
            (SELECT COUNT(*) FROM edges WHERE target_id = nodes.id),
            (SELECT COUNT(*) FROM edges WHERE source_id = nodes.id),
            CURRENT_TIMESTAMP
     FROM nodes WHERE id = ?1
     ON CONFLICT(node_id) DO UPDATE SET
        in_degree = excluded.in_degree,
        out_degree = excluded.out_degree,
        updated_at = excluded.updated_at";

const REFRESH_ALL: &str = "
    DELETE FROM node_metrics;
    INSERT INTO node_metrics (node_id, in_degree, out_degree, updated_at)
    SELECT id,
           (SELECT COUNT(*) FROM edges WHERE target_id = nodes.id),
           (SELECT COUNT(*) FROM edges WHERE source_id = nodes.id),
           CURRENT_TIMESTAMP
    FROM nodes;
";

/// Recomputes the metrics rows of the given nodes. Ids without a node row
/// are ignored.
pub(crate) fn touch_degrees<'a, I>(conn: &Connection, ids: I) -> Result<()>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut stmt = conn
        .prepare_cached(TOUCH_DEGREE)
        .map_err(CloudGraphError::from_sqlite)?;
    for id in ids {
        stmt.execute(params![id])
            .map_err(CloudGraphError::from_sqlite)?;
    }
    Ok(())
}

pub(crate) fn refresh_all(conn: &Connection) -> Result<()> {
    conn.execute_batch(REFRESH_ALL)
        .map_err(CloudGraphError::from_sqlite)
}

pub(crate) fn compute_degree(conn: &Connection, id: &str) -> Result<NodeDegree> {
    conn.query_row(
        "SELECT (SELECT COUNT(*) FROM edges WHERE target_id = ?1),
                (SELECT COUNT(*) FROM edges WHERE source_id = ?1)",
        params![id],
        |row| {
            Ok(NodeDegree {
                in_degree: row.get::<_, i64>(0)? as usize,
                out_degree: row.get::<_, i64>(1)? as usize,
            })
        },
    )
    .map_err(CloudGraphError::from_sqlite)
}

fn stored_degree(conn: &Connection, id: &str) -> Result<Option<NodeDegree>> {
    conn.query_row(
        "SELECT in_degree, out_degree FROM node_metrics WHERE node_id = ?1",
        params![id],
        |row| {
            Ok(NodeDegree {
                in_degree: row.get::<_, i64>(0)? as usize,
                out_degree: row.get::<_, i64>(1)? as usize,
            })
        },
    )
    .optional()
    .map_err(CloudGraphError::from_sqlite)
}

impl GraphStore {
    /// Rebuilds the whole degree table from the edge table.
    pub fn refresh_metrics(&self) -> Result<()> {
        self.pool().write_transaction(refresh_all)?;
        debug!("store.metrics.refreshed");
        Ok(())
    }

    pub(crate) fn refresh_node_metrics(&self, id: &str) -> Result<()> {
        self.pool()
            .write_transaction(|conn| touch_degrees(conn, [id]))
    }

    /// In/out degree of `id`. Unknown ids report zero.
    pub fn get_node_degree(&self, id: &str) -> Result<NodeDegree> {
        let metrics = self.config().metrics;
        self.read(|conn| {
            if metrics {
                if let Some(degree) = stored_degree(conn, id)? {
                    return Ok(degree);
                }
            }
            compute_degree(conn, id)
        })
    }
}
