use std::{fmt, result};

use rusqlite::{Connection, OptionalExtension, types::Value};
use serde::Serialize;
use tracing::warn;

use crate::codec::Codec;
use crate::errors::{CloudGraphError, Result};
use crate::graph::GraphStore;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct IntegrityReport {
    pub total_nodes: i64,
    pub total_edges: i64,
    /// Edges whose source or target row is missing.
    pub orphan_edges: i64,
    pub duplicate_edges: i64,
    pub phantom_nodes: i64,
    /// Nodes tagged with a scan id that has no session row.
    pub unknown_scan_nodes: i64,
    /// Node rows whose degree metrics disagree with the edge table.
    pub stale_metrics: i64,
    /// Attribute payloads that fail to decode.
    pub corrupt_payloads: i64,
}

impl IntegrityReport {
    /// Phantoms are expected and never count as an issue.
    pub fn has_issues(&self) -> bool {
        self.orphan_edges > 0
            || self.duplicate_edges > 0
            || self.unknown_scan_nodes > 0
            || self.stale_metrics > 0
            || self.corrupt_payloads > 0
    }
}

#[derive(Debug)]
pub struct IntegrityError {
    pub report: IntegrityReport,
    pub source: Option<CloudGraphError>,
}

impl fmt::Display for IntegrityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            Some(err) => write!(f, "integrity check failed: {err}"),
            None => write!(f, "integrity violations detected"),
        }
    }
}

impl std::error::Error for IntegrityError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|err| err as &dyn std::error::Error)
    }
}

impl GraphStore {
    pub fn check_integrity(&self) -> Result<IntegrityReport> {
        let codec = self.codec();
        let metrics = self.config().metrics;
        let report = self.read(|conn| {
            Ok(IntegrityReport {
                total_nodes: query_single(conn, "SELECT COUNT(*) FROM nodes")?,
                total_edges: query_single(conn, "SELECT COUNT(*) FROM edges")?,
                orphan_edges: query_single(
                    conn,
                    "SELECT COUNT(*) FROM edges e
                     LEFT JOIN nodes src ON src.id = e.source_id
                     LEFT JOIN nodes dst ON dst.id = e.target_id
                     WHERE src.id IS NULL OR dst.id IS NULL",
                )?,
                duplicate_edges: query_single(
                    conn,
                    "SELECT COALESCE(SUM(cnt - 1), 0) FROM (
                         SELECT COUNT(*) AS cnt FROM edges
                         GROUP BY source_id, target_id, relation
                         HAVING cnt > 1
                     )",
                )?,
                phantom_nodes: query_single(conn, "SELECT COUNT(*) FROM nodes WHERE is_phantom = 1")?,
                unknown_scan_nodes: query_single(
                    conn,
                    "SELECT COUNT(*) FROM nodes n
                     WHERE n.scan_id IS NOT NULL
                       AND NOT EXISTS (SELECT 1 FROM scan_sessions s WHERE s.id = n.scan_id)",
                )?,
                stale_metrics: if metrics {
                    query_single(
                        conn,
                        "SELECT COUNT(*) FROM nodes n
                         LEFT JOIN node_metrics m ON m.node_id = n.id
                         WHERE m.node_id IS NULL
                            OR m.in_degree != (SELECT COUNT(*) FROM edges WHERE target_id = n.id)
                            OR m.out_degree != (SELECT COUNT(*) FROM edges WHERE source_id = n.id)",
                    )?
                } else {
                    0
                },
                corrupt_payloads: count_corrupt(conn, &codec, "SELECT attributes FROM nodes")?
                    + count_corrupt(conn, &codec, "SELECT attributes FROM edges")?,
            })
        })?;
        if report.has_issues() {
            warn!(?report, "integrity.issues");
        }
        Ok(report)
    }

    /// Like [`check_integrity`](Self::check_integrity) but fails when any
    /// issue is found.
    pub fn check_integrity_strict(&self) -> result::Result<IntegrityReport, IntegrityError> {
        let report = self.check_integrity().map_err(|err| IntegrityError {
            report: IntegrityReport::default(),
            source: Some(err),
        })?;
        if report.has_issues() {
            Err(IntegrityError {
                report,
                source: None,
            })
        } else {
            Ok(report)
        }
    }
}

fn query_single(conn: &Connection, sql: &str) -> Result<i64> {
    conn.query_row(sql, [], |row| row.get(0))
        .optional()
        .map(|opt| opt.unwrap_or(0))
        .map_err(CloudGraphError::from_sqlite)
}

fn count_corrupt(conn: &Connection, codec: &Codec, sql: &str) -> Result<i64> {
    let mut stmt = conn.prepare(sql).map_err(CloudGraphError::from_sqlite)?;
    let rows = stmt
        .query_map([], |row| row.get::<_, Value>(0))
        .map_err(CloudGraphError::from_sqlite)?;
    let mut corrupt = 0;
    for value in rows {
        let value = value.map_err(CloudGraphError::from_sqlite)?;
        if codec.decode((&value).into()).is_err() {
            corrupt += 1;
        }
    }
    Ok(corrupt)
}
