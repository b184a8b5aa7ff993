use std::cmp::Ordering;
use std::collections::BTreeMap;

use rusqlite::{Connection, OptionalExtension, params};
use tracing::{debug, warn};

use super::{GraphStore, NODE_COLUMNS, NodeRow};
use crate::codec::Codec;
use crate::errors::{CloudGraphError, Result};
use crate::graph::{Direction, GraphStats, Node};
use crate::schema;

/// Candidate rows pulled from the text index per requested result, so the
/// degree blend can reorder past the first page of text matches.
const SEARCH_OVERFETCH: usize = 4;

const SCHEMA_VERSION_KEY: &str = "schema_version";

impl GraphStore {
    pub fn get_node(&self, id: &str) -> Result<Option<Node>> {
        let codec = self.codec();
        self.read(|conn| {
            let row = conn
                .query_row(
                    &format!("SELECT {NODE_COLUMNS} FROM nodes WHERE id = ?1"),
                    params![id],
                    NodeRow::read,
                )
                .optional()
                .map_err(CloudGraphError::from_sqlite)?;
            row.map(|r| r.decode(&codec)).transpose()
        })
    }

    pub fn get_nodes_by_type(&self, node_type: &str) -> Result<Vec<Node>> {
        self.select_nodes(
            &format!("SELECT {NODE_COLUMNS} FROM nodes WHERE type = ?1 ORDER BY id"),
            Some(node_type),
        )
    }

    pub fn get_all_nodes(&self) -> Result<Vec<Node>> {
        self.select_nodes(&format!("SELECT {NODE_COLUMNS} FROM nodes ORDER BY id"), None)
    }

    pub fn node_count(&self) -> Result<usize> {
        self.read(|conn| count(conn, "SELECT COUNT(*) FROM nodes"))
    }

    /// Nodes adjacent to `id`, ordered by id. `Out` follows edges from `id`
    /// to what it depends on, `In` follows edges from its dependents.
    pub fn get_neighbors(&self, id: &str, direction: Direction) -> Result<Vec<Node>> {
        let filter = match direction {
            Direction::Out => "SELECT target_id FROM edges WHERE source_id = ?1",
            Direction::In => "SELECT source_id FROM edges WHERE target_id = ?1",
            Direction::Both => {
                "SELECT target_id FROM edges WHERE source_id = ?1
                 UNION SELECT source_id FROM edges WHERE target_id = ?1"
            }
        };
        self.select_nodes(
            &format!("SELECT {NODE_COLUMNS} FROM nodes WHERE id IN ({filter}) ORDER BY id"),
            Some(id),
        )
    }

    /// Full-text search over id, type and name.
    ///
    /// Text relevance (bm25) is blended with `ln(1 + degree)` so that well
    /// connected matches rank first. When the text index rejects the query or
    /// finds nothing, a case-insensitive substring match is used instead.
    pub fn search_nodes(&self, query: &str, limit: usize) -> Result<Vec<Node>> {
        let query = query.trim();
        if query.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }
        let codec = self.codec();
        let metrics = self.config().metrics;
        self.read(|conn| {
            match fts_search(conn, &codec, query, limit, metrics) {
                Ok(hits) if !hits.is_empty() => return Ok(hits),
                Ok(_) => debug!(query, "store.search.fts_empty"),
                Err(err) => warn!(query, error = %err, "store.search.fts_fallback"),
            }
            substring_search(conn, &codec, query, limit)
        })
    }

    pub fn get_stats(&self) -> Result<GraphStats> {
        let compression = self.codec().is_compressing();
        self.read(|conn| {
            let page_count: i64 = conn
                .pragma_query_value(None, "page_count", |row| row.get(0))
                .map_err(CloudGraphError::from_sqlite)?;
            let page_size: i64 = conn
                .pragma_query_value(None, "page_size", |row| row.get(0))
                .map_err(CloudGraphError::from_sqlite)?;
            let mut type_counts = BTreeMap::new();
            let mut stmt = conn
                .prepare_cached("SELECT type, COUNT(*) FROM nodes GROUP BY type")
                .map_err(CloudGraphError::from_sqlite)?;
            let rows = stmt
                .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))
                .map_err(CloudGraphError::from_sqlite)?;
            for row in rows {
                let (node_type, n) = row.map_err(CloudGraphError::from_sqlite)?;
                type_counts.insert(node_type, n as usize);
            }
            Ok(GraphStats {
                node_count: count(conn, "SELECT COUNT(*) FROM nodes")?,
                edge_count: count(conn, "SELECT COUNT(*) FROM edges")?,
                phantom_count: count(conn, "SELECT COUNT(*) FROM nodes WHERE is_phantom = 1")?,
                scan_session_count: count(conn, "SELECT COUNT(*) FROM scan_sessions")?,
                db_size_bytes: (page_count.max(0) * page_size.max(0)) as u64,
                type_counts,
                schema_version: schema::read_schema_version(conn)?,
                compression,
            })
        })
    }

    pub fn set_metadata(&self, key: &str, value: &str) -> Result<()> {
        if key == SCHEMA_VERSION_KEY {
            return Err(CloudGraphError::invalid_input(
                "schema_version is managed by migrations",
            ));
        }
        self.pool().write_transaction(|conn| {
            conn.execute(
                "INSERT INTO metadata(key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![key, value],
            )
            .map_err(CloudGraphError::from_sqlite)?;
            Ok(())
        })
    }

    pub fn get_metadata(&self, key: &str) -> Result<Option<String>> {
        self.read(|conn| {
            conn.query_row(
                "SELECT value FROM metadata WHERE key = ?1",
                params![key],
                |row| row.get::<_, Option<String>>(0),
            )
            .optional()
            .map(Option::flatten)
            .map_err(CloudGraphError::from_sqlite)
        })
    }

    /// Removes every node, edge, scan session and metadata entry. The schema
    /// version survives so the emptied store still reports it.
    pub fn clear(&self) -> Result<()> {
        self.write(|conn| {
            conn.execute_batch(
                "DELETE FROM edges;
                 DELETE FROM node_metrics;
                 DELETE FROM nodes;
                 DELETE FROM scan_sessions;
                 DELETE FROM metadata WHERE key != 'schema_version';",
            )
            .map_err(CloudGraphError::from_sqlite)
        })?;
        self.pool().set_current_scan(None);
        debug!("store.cleared");
        Ok(())
    }

    pub(crate) fn select_nodes(&self, sql: &str, arg: Option<&str>) -> Result<Vec<Node>> {
        let codec = self.codec();
        self.read(|conn| {
            let mut stmt = conn.prepare_cached(sql).map_err(CloudGraphError::from_sqlite)?;
            let rows = match arg {
                Some(arg) => stmt.query_map(params![arg], NodeRow::read),
                None => stmt.query_map([], NodeRow::read),
            }
            .map_err(CloudGraphError::from_sqlite)?;
            let mut nodes = Vec::new();
            for row in rows {
                nodes.push(row.map_err(CloudGraphError::from_sqlite)?.decode(&codec)?);
            }
            Ok(nodes)
        })
    }
}

fn count(conn: &Connection, sql: &str) -> Result<usize> {
    conn.query_row(sql, [], |row| row.get::<_, i64>(0))
        .map(|n| n as usize)
        .map_err(CloudGraphError::from_sqlite)
}

fn prefixed_node_columns(alias: &str) -> String {
    NODE_COLUMNS
        .split(", ")
        .map(|column| format!("{alias}.{column}"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Turns free text into an FTS5 query of quoted prefix terms.
fn fts_query(query: &str) -> Option<String> {
    let terms: Vec<String> = query
        .split_whitespace()
        .map(|token| token.replace('"', ""))
        .filter(|token| !token.is_empty())
        .map(|token| format!("\"{token}\"*"))
        .collect();
    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" "))
    }
}

fn fts_search(
    conn: &Connection,
    codec: &Codec,
    query: &str,
    limit: usize,
    metrics: bool,
) -> Result<Vec<Node>> {
    let Some(match_expr) = fts_query(query) else {
        return Ok(Vec::new());
    };
    let degree = if metrics {
        "COALESCE((SELECT in_degree + out_degree FROM node_metrics WHERE node_id = n.id), 0)"
    } else {
        "(SELECT COUNT(*) FROM edges WHERE source_id = n.id OR target_id = n.id)"
    };
    let sql = format!(
        "SELECT {}, bm25(nodes_fts), {degree}
         FROM nodes_fts JOIN nodes n ON n.rowid = nodes_fts.rowid
         WHERE nodes_fts MATCH ?1
         ORDER BY bm25(nodes_fts)
         LIMIT ?2",
        prefixed_node_columns("n")
    );
    let fetch = limit.saturating_mul(SEARCH_OVERFETCH) as i64;
    let mut stmt = conn.prepare(&sql).map_err(CloudGraphError::from_sqlite)?;
    let rows = stmt
        .query_map(params![match_expr, fetch], |row| {
            let rank: f64 = row.get(9)?;
            let degree: i64 = row.get(10)?;
            Ok((NodeRow::read(row)?, rank, degree))
        })
        .map_err(CloudGraphError::from_sqlite)?;

    let mut scored = Vec::new();
    for row in rows {
        let (node_row, rank, degree) = row.map_err(CloudGraphError::from_sqlite)?;
        // bm25 is negative, lower is better.
        let score = -rank + (degree.max(0) as f64).ln_1p();
        scored.push((score, node_row.decode(codec)?));
    }
    scored.sort_by(|(a, na), (b, nb)| {
        b.partial_cmp(a)
            .unwrap_or(Ordering::Equal)
            .then_with(|| na.id.cmp(&nb.id))
    });
    scored.truncate(limit);
    Ok(scored.into_iter().map(|(_, node)| node).collect())
}

fn substring_search(conn: &Connection, codec: &Codec, query: &str, limit: usize) -> Result<Vec<Node>> {
    let escaped = query
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    let pattern = format!("%{escaped}%");
    let sql = format!(
        "SELECT {NODE_COLUMNS} FROM nodes
         WHERE id LIKE ?1 ESCAPE '\\' OR type LIKE ?1 ESCAPE '\\' OR name LIKE ?1 ESCAPE '\\'
         ORDER BY id
         LIMIT ?2"
    );
    let mut stmt = conn.prepare_cached(&sql).map_err(CloudGraphError::from_sqlite)?;
    let rows = stmt
        .query_map(params![pattern, limit as i64], NodeRow::read)
        .map_err(CloudGraphError::from_sqlite)?;
    let mut nodes = Vec::new();
    for row in rows {
        nodes.push(row.map_err(CloudGraphError::from_sqlite)?.decode(codec)?);
    }
    Ok(nodes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fts_query_quotes_prefix_terms() {
        assert_eq!(fts_query("web  prod").as_deref(), Some("\"web\"* \"prod\"*"));
        assert_eq!(fts_query("a\"b").as_deref(), Some("\"ab\"*"));
        assert_eq!(fts_query("\"\"").as_deref(), None);
    }

    #[test]
    fn test_prefixed_columns() {
        let cols = prefixed_node_columns("n");
        assert!(cols.starts_with("n.id, n.type, n.name"));
        assert!(cols.ends_with("n.scan_id"));
    }
}
