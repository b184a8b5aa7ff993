//! Discovery sessions and ghost cleanup.
//!
//! A session moves from `running` to either `completed` or `failed` and never
//! leaves a terminal state. While a session is current, node and edge writes
//! that carry no scan id of their own are tagged with it.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::errors::{CloudGraphError, Result};
use crate::graph::GraphStore;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanStatus {
    Running,
    Completed,
    Failed,
}

impl ScanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanStatus::Running => "running",
            ScanStatus::Completed => "completed",
            ScanStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ScanStatus::Running)
    }
}

impl fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScanStatus {
    type Err = CloudGraphError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "running" => Ok(ScanStatus::Running),
            "completed" => Ok(ScanStatus::Completed),
            "failed" => Ok(ScanStatus::Failed),
            other => Err(CloudGraphError::corruption(format!(
                "unknown scan status {other:?}"
            ))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScanSession {
    pub id: String,
    pub profile: Option<String>,
    pub region: Option<String>,
    pub status: ScanStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub resource_count: usize,
    pub error_message: Option<String>,
}

const SESSION_COLUMNS: &str =
    "id, profile, region, status, started_at, completed_at, resource_count, error_message";

struct SessionRow {
    id: String,
    profile: Option<String>,
    region: Option<String>,
    status: String,
    started_at: String,
    completed_at: Option<String>,
    resource_count: i64,
    error_message: Option<String>,
}

impl SessionRow {
    fn read(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            profile: row.get(1)?,
            region: row.get(2)?,
            status: row.get(3)?,
            started_at: row.get(4)?,
            completed_at: row.get(5)?,
            resource_count: row.get(6)?,
            error_message: row.get(7)?,
        })
    }

    fn into_session(self) -> Result<ScanSession> {
        Ok(ScanSession {
            status: self.status.parse()?,
            started_at: parse_timestamp(&self.started_at)?,
            completed_at: self.completed_at.as_deref().map(parse_timestamp).transpose()?,
            resource_count: self.resource_count.max(0) as usize,
            id: self.id,
            profile: self.profile,
            region: self.region,
            error_message: self.error_message,
        })
    }
}

fn format_timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(text: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|e| CloudGraphError::corruption(format!("bad timestamp {text:?}: {e}")))
}

/// `scan_<UTC time to the microsecond>_<8 random hex digits>`.
fn new_session_id(now: &DateTime<Utc>) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("scan_{}_{}", now.format("%Y%m%dT%H%M%S%.6f"), &suffix[..8])
}

fn load_session(conn: &Connection, id: &str) -> Result<Option<ScanSession>> {
    conn.query_row(
        &format!("SELECT {SESSION_COLUMNS} FROM scan_sessions WHERE id = ?1"),
        params![id],
        SessionRow::read,
    )
    .optional()
    .map_err(CloudGraphError::from_sqlite)?
    .map(SessionRow::into_session)
    .transpose()
}

impl GraphStore {
    /// Opens a new running session and makes it the current one.
    pub fn start_scan(&self, profile: Option<&str>, region: Option<&str>) -> Result<ScanSession> {
        let started_at = Utc::now();
        let session = ScanSession {
            id: new_session_id(&started_at),
            profile: profile.map(str::to_owned),
            region: region.map(str::to_owned),
            status: ScanStatus::Running,
            started_at,
            completed_at: None,
            resource_count: 0,
            error_message: None,
        };
        self.pool().write_transaction(|conn| {
            conn.execute(
                "INSERT INTO scan_sessions (id, profile, region, status, started_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    session.id,
                    session.profile,
                    session.region,
                    session.status.as_str(),
                    format_timestamp(&session.started_at),
                ],
            )
            .map_err(CloudGraphError::from_sqlite)
        })?;
        if let Some(previous) = self.pool().current_scan() {
            warn!(previous = %previous, next = %session.id, "scan.current_replaced");
        }
        self.pool().set_current_scan(Some(session.id.clone()));
        info!(
            id = %session.id,
            profile = ?session.profile,
            region = ?session.region,
            "scan.started"
        );
        Ok(session)
    }

    /// Moves a running session to `completed` or `failed` and records how many
    /// nodes carry its id.
    ///
    /// Returns false for unknown ids and for sessions that already ended.
    pub fn end_scan(&self, id: &str, success: bool, error: Option<&str>) -> Result<bool> {
        let status = if success {
            ScanStatus::Completed
        } else {
            ScanStatus::Failed
        };
        let completed_at = format_timestamp(&Utc::now());
        let resource_count = self.pool().write_transaction(|conn| {
            match load_session(conn, id)? {
                Some(session) if !session.status.is_terminal() => {}
                Some(_) | None => return Ok(None),
            }
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM nodes WHERE scan_id = ?1",
                    params![id],
                    |row| row.get(0),
                )
                .map_err(CloudGraphError::from_sqlite)?;
            conn.execute(
                "UPDATE scan_sessions
                 SET status = ?2, completed_at = ?3, resource_count = ?4, error_message = ?5
                 WHERE id = ?1 AND status = 'running'",
                params![id, status.as_str(), completed_at, count, error],
            )
            .map_err(CloudGraphError::from_sqlite)?;
            Ok(Some(count))
        })?;
        self.pool().clear_current_scan_if(id);
        match resource_count {
            Some(count) => {
                info!(id, status = %status, resource_count = count, "scan.ended");
                Ok(true)
            }
            None => {
                debug!(id, "scan.end_ignored");
                Ok(false)
            }
        }
    }

    pub fn get_scan_session(&self, id: &str) -> Result<Option<ScanSession>> {
        self.read(|conn| load_session(conn, id))
    }

    /// Most recent sessions first.
    pub fn list_scan_sessions(&self, limit: usize) -> Result<Vec<ScanSession>> {
        self.read(|conn| {
            let mut stmt = conn
                .prepare_cached(&format!(
                    "SELECT {SESSION_COLUMNS} FROM scan_sessions
                     ORDER BY started_at DESC, id DESC LIMIT ?1"
                ))
                .map_err(CloudGraphError::from_sqlite)?;
            let rows = stmt
                .query_map(params![limit as i64], SessionRow::read)
                .map_err(CloudGraphError::from_sqlite)?;
            let mut sessions = Vec::new();
            for row in rows {
                sessions.push(row.map_err(CloudGraphError::from_sqlite)?.into_session()?);
            }
            Ok(sessions)
        })
    }

    pub fn current_scan(&self) -> Option<String> {
        self.pool().current_scan()
    }

    /// Deletes every real node last written by a session other than
    /// `current_scan_id`, along with its edges. Phantoms and untagged nodes
    /// are kept. Returns the number of nodes removed.
    pub fn cleanup_stale_resources(&self, current_scan_id: &str) -> Result<usize> {
        let removed = self.write(|conn| {
            conn.execute(
                "DELETE FROM nodes
                 WHERE scan_id IS NOT NULL AND scan_id != ?1 AND is_phantom = 0",
                params![current_scan_id],
            )
            .map_err(CloudGraphError::from_sqlite)
        })?;
        if removed > 0 && self.config().metrics {
            self.refresh_metrics()?;
        }
        info!(scan = current_scan_id, removed, "scan.cleanup");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_session_id_shape() {
        let at = Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        let id = new_session_id(&at);
        assert!(id.starts_with("scan_20240309T140507.000000_"), "{id}");
        let suffix = id.rsplit('_').next().unwrap();
        assert_eq!(suffix.len(), 8);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_timestamp_roundtrip_keeps_micros() {
        let at = Utc.timestamp_opt(1_700_000_000, 123_456_000).unwrap();
        assert_eq!(parse_timestamp(&format_timestamp(&at)).unwrap(), at);
    }

    #[test]
    fn test_status_parse() {
        assert_eq!("failed".parse::<ScanStatus>().unwrap(), ScanStatus::Failed);
        assert!(ScanStatus::Completed.is_terminal());
        assert!(!ScanStatus::Running.is_terminal());
        assert!("paused".parse::<ScanStatus>().is_err());
    }
}
