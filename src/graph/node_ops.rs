use rusqlite::{Connection, params};
use tracing::debug;

use super::{GraphStore, metrics, types::validate_node};
use crate::codec::Codec;
use crate::errors::{CloudGraphError, Result};
use crate::graph::{BatchOutcome, Node};

const UPSERT_NODE: &str = "INSERT INTO nodes
        (id, type, name, region, account_id, attributes, is_phantom, phantom_reason, scan_id)
     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
     ON CONFLICT(id) DO UPDATE SET
        type = excluded.type,
        name = excluded.name,
        region = excluded.region,
        account_id = excluded.account_id,
        attributes = excluded.attributes,
        is_phantom = excluded.is_phantom,
        phantom_reason = excluded.phantom_reason,
        scan_id = excluded.scan_id,
        updated_at = CURRENT_TIMESTAMP";

const INSERT_NODE: &str = "INSERT INTO nodes
        (id, type, name, region, account_id, attributes, is_phantom, phantom_reason, scan_id)
     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)";

impl GraphStore {
    /// Inserts `node`, or replaces every field of the node with the same id.
    ///
    /// A node without an explicit `scan_id` is tagged with the current scan.
    pub fn add_node(&self, node: &Node) -> Result<()> {
        validate_node(node)?;
        let scan_id = self.current_scan_or(node.scan_id.as_ref());
        let metrics = self.config().metrics;
        self.write(|conn| {
            write_node(conn, &self.codec(), UPSERT_NODE, node, scan_id.as_deref())?;
            if metrics {
                metrics::touch_degrees(conn, [node.id.as_str()])?;
            }
            Ok(())
        })?;
        debug!(id = %node.id, node_type = %node.node_type, "store.node.upserted");
        Ok(())
    }

    /// Inserts `node` without falling back to an update. An existing id is a
    /// [`CloudGraphError::UniqueViolation`].
    pub fn insert_node(&self, node: &Node) -> Result<()> {
        validate_node(node)?;
        let scan_id = self.current_scan_or(node.scan_id.as_ref());
        let metrics = self.config().metrics;
        self.write(|conn| {
            write_node(conn, &self.codec(), INSERT_NODE, node, scan_id.as_deref())?;
            if metrics {
                metrics::touch_degrees(conn, [node.id.as_str()])?;
            }
            Ok(())
        })
    }

    /// Upserts many nodes with periodic commits and backpressure pauses.
    pub fn add_nodes_batch(&self, nodes: &[Node]) -> Result<BatchOutcome> {
        for node in nodes {
            validate_node(node)?;
        }
        let current = self.pool().current_scan();
        let codec = self.codec();
        let outcome = self.write_batched(nodes, |conn, node| {
            let scan_id = node.scan_id.as_deref().or(current.as_deref());
            write_node(conn, &codec, UPSERT_NODE, node, scan_id)?;
            Ok(true)
        })?;
        if self.config().metrics && outcome.written > 0 {
            self.refresh_metrics()?;
        }
        debug!(written = outcome.written, "store.nodes.batch");
        Ok(outcome)
    }

    /// Deletes a node together with its edges. Returns false when absent.
    pub fn remove_node(&self, id: &str) -> Result<bool> {
        let metrics = self.config().metrics;
        let removed = self.write(|conn| {
            let neighbors = neighbor_ids(conn, id)?;
            let changed = conn
                .execute("DELETE FROM nodes WHERE id = ?1", params![id])
                .map_err(CloudGraphError::from_sqlite)?;
            if changed > 0 && metrics {
                metrics::touch_degrees(conn, neighbors.iter().map(String::as_str))?;
            }
            Ok(changed > 0)
        })?;
        if removed {
            debug!(id, "store.node.removed");
        }
        Ok(removed)
    }
}

fn write_node(
    conn: &Connection,
    codec: &Codec,
    sql: &str,
    node: &Node,
    scan_id: Option<&str>,
) -> Result<()> {
    let attributes = codec.encode(&node.attributes)?;
    let phantom_reason = if node.is_phantom {
        node.phantom_reason.as_deref()
    } else {
        None
    };
    let mut stmt = conn.prepare_cached(sql).map_err(CloudGraphError::from_sqlite)?;
    stmt.execute(params![
        node.id,
        node.node_type,
        node.name,
        node.region,
        node.account_id,
        attributes,
        node.is_phantom,
        phantom_reason,
        scan_id,
    ])
    .map_err(CloudGraphError::from_sqlite)?;
    Ok(())
}

fn neighbor_ids(conn: &Connection, id: &str) -> Result<Vec<String>> {
    let mut stmt = conn
        .prepare_cached(
            "SELECT target_id FROM edges WHERE source_id = ?1 AND target_id != ?1
             UNION
             SELECT source_id FROM edges WHERE target_id = ?1 AND source_id != ?1",
        )
        .map_err(CloudGraphError::from_sqlite)?;
    let rows = stmt
        .query_map(params![id], |row| row.get::<_, String>(0))
        .map_err(CloudGraphError::from_sqlite)?;
    rows.collect::<rusqlite::Result<Vec<_>>>()
        .map_err(CloudGraphError::from_sqlite)
}
