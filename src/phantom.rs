//! Placeholder nodes for resources referenced before they are discovered.

use rusqlite::{Connection, params};
use tracing::{debug, info};

use crate::errors::{CloudGraphError, Result};
use crate::graph::{GraphStore, NODE_COLUMNS, Node};

/// Type given to phantoms created for dangling edge endpoints.
pub const PHANTOM_NODE_TYPE: &str = "unknown";

const UPSERT_PHANTOM: &str = "INSERT INTO nodes (id, type, is_phantom, phantom_reason, scan_id)
     VALUES (?1, ?2, 1, ?3, ?4)
     ON CONFLICT(id) DO UPDATE SET
        type = excluded.type,
        phantom_reason = excluded.phantom_reason,
        updated_at = CURRENT_TIMESTAMP
     WHERE nodes.is_phantom = 1";

/// Creates or refreshes a phantom. A real node with the same id is left
/// untouched and `false` is returned.
pub(crate) fn insert_phantom(
    conn: &Connection,
    id: &str,
    node_type: &str,
    reason: &str,
    scan_id: Option<&str>,
) -> Result<bool> {
    let changed = conn
        .prepare_cached(UPSERT_PHANTOM)
        .and_then(|mut stmt| stmt.execute(params![id, node_type, reason, scan_id]))
        .map_err(CloudGraphError::from_sqlite)?;
    Ok(changed > 0)
}

impl GraphStore {
    /// Adds a placeholder node for a resource that has not been discovered.
    ///
    /// Returns false, without changing anything, when `id` already names a
    /// real node.
    pub fn add_phantom_node(&self, id: &str, node_type: &str, reason: &str) -> Result<bool> {
        if id.trim().is_empty() || node_type.trim().is_empty() {
            return Err(CloudGraphError::invalid_input(
                "phantom id and type must be set",
            ));
        }
        let scan_id = self.pool().current_scan();
        let created = self.write(|conn| insert_phantom(conn, id, node_type, reason, scan_id.as_deref()))?;
        if created && self.config().metrics {
            self.refresh_node_metrics(id)?;
        }
        debug!(id, created, "phantom.added");
        Ok(created)
    }

    /// Replaces a phantom's fields with `real` and marks it discovered.
    ///
    /// The stored id stays `id`. Returns false when `id` does not name a
    /// phantom; real nodes are never overwritten through this path.
    pub fn resolve_phantom(&self, id: &str, real: &Node) -> Result<bool> {
        if real.node_type.trim().is_empty() {
            return Err(CloudGraphError::invalid_input("node type must be set"));
        }
        let scan_id = self.current_scan_or(real.scan_id.as_ref());
        let attributes = self.codec().encode(&real.attributes)?;
        let resolved = self.write(|conn| {
            conn.execute(
                "UPDATE nodes SET
                    type = ?2, name = ?3, region = ?4, account_id = ?5, attributes = ?6,
                    is_phantom = 0, phantom_reason = NULL, scan_id = ?7,
                    updated_at = CURRENT_TIMESTAMP
                 WHERE id = ?1 AND is_phantom = 1",
                params![
                    id,
                    real.node_type,
                    real.name,
                    real.region,
                    real.account_id,
                    attributes,
                    scan_id,
                ],
            )
            .map(|changed| changed > 0)
            .map_err(CloudGraphError::from_sqlite)
        })?;
        if resolved {
            info!(id, node_type = %real.node_type, "phantom.resolved");
        } else {
            debug!(id, "phantom.resolve_skipped");
        }
        Ok(resolved)
    }

    pub fn get_phantom_nodes(&self) -> Result<Vec<Node>> {
        self.select_nodes(
            &format!("SELECT {NODE_COLUMNS} FROM nodes WHERE is_phantom = 1 ORDER BY id"),
            None,
        )
    }
}
