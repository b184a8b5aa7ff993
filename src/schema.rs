use rusqlite::{Connection, OptionalExtension, params};
use tracing::{debug, info};

use crate::errors::{CloudGraphError, Result};

pub const BASE_SCHEMA_VERSION: i64 = 1;

const BASE_SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS nodes (
        id          TEXT PRIMARY KEY,
        type        TEXT NOT NULL,
        name        TEXT,
        region      TEXT,
        account_id  TEXT,
        attributes  BLOB,
        created_at  TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
        updated_at  TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
    );
    CREATE INDEX IF NOT EXISTS idx_nodes_type ON nodes(type);
    CREATE INDEX IF NOT EXISTS idx_nodes_region ON nodes(region);

    CREATE TABLE IF NOT EXISTS edges (
        id          INTEGER PRIMARY KEY AUTOINCREMENT,
        source_id   TEXT NOT NULL REFERENCES nodes(id) ON DELETE CASCADE,
        target_id   TEXT NOT NULL REFERENCES nodes(id) ON DELETE CASCADE,
        relation    TEXT NOT NULL,
        attributes  BLOB,
        weight      REAL NOT NULL DEFAULT 1.0,
        created_at  TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
        UNIQUE(source_id, target_id, relation)
    );
    CREATE INDEX IF NOT EXISTS idx_edges_source ON edges(source_id);
    CREATE INDEX IF NOT EXISTS idx_edges_target ON edges(target_id);
    CREATE INDEX IF NOT EXISTS idx_edges_relation ON edges(relation);

    CREATE VIRTUAL TABLE IF NOT EXISTS nodes_fts USING fts5(
        id, type, name,
        content='nodes',
        content_rowid='rowid'
    );
    CREATE TRIGGER IF NOT EXISTS nodes_fts_insert AFTER INSERT ON nodes BEGIN
        INSERT INTO nodes_fts(rowid, id, type, name)
        VALUES (new.rowid, new.id, new.type, new.name);
    END;
    CREATE TRIGGER IF NOT EXISTS nodes_fts_delete AFTER DELETE ON nodes BEGIN
        INSERT INTO nodes_fts(nodes_fts, rowid, id, type, name)
        VALUES ('delete', old.rowid, old.id, old.type, old.name);
    END;
    CREATE TRIGGER IF NOT EXISTS nodes_fts_update AFTER UPDATE ON nodes BEGIN
        INSERT INTO nodes_fts(nodes_fts, rowid, id, type, name)
        VALUES ('delete', old.rowid, old.id, old.type, old.name);
        INSERT INTO nodes_fts(rowid, id, type, name)
        VALUES (new.rowid, new.id, new.type, new.name);
    END;

    CREATE TABLE IF NOT EXISTS node_metrics (
        node_id     TEXT PRIMARY KEY REFERENCES nodes(id) ON DELETE CASCADE,
        in_degree   INTEGER NOT NULL DEFAULT 0,
        out_degree  INTEGER NOT NULL DEFAULT 0,
        updated_at  TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
    );

    CREATE TABLE IF NOT EXISTS path_cache (
        source_id   TEXT NOT NULL,
        target_id   TEXT NOT NULL,
        max_depth   INTEGER NOT NULL,
        path        TEXT,
        computed_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
        PRIMARY KEY (source_id, target_id, max_depth)
    );

    CREATE TABLE IF NOT EXISTS metadata (
        key   TEXT PRIMARY KEY,
        value TEXT
    );
"#;

struct MigrationStep {
    target_version: i64,
    statements: &'static [&'static str],
}

const MIGRATION_STEPS: &[MigrationStep] = &[MigrationStep {
    target_version: 2,
    statements: &[
        "ALTER TABLE nodes ADD COLUMN scan_id TEXT",
        "ALTER TABLE nodes ADD COLUMN is_phantom INTEGER NOT NULL DEFAULT 0",
        "ALTER TABLE nodes ADD COLUMN phantom_reason TEXT",
        "ALTER TABLE edges ADD COLUMN scan_id TEXT",
        "CREATE TABLE scan_sessions (
            id             TEXT PRIMARY KEY,
            profile        TEXT,
            region         TEXT,
            status         TEXT NOT NULL CHECK (status IN ('running', 'completed', 'failed')),
            started_at     TEXT NOT NULL,
            completed_at   TEXT,
            resource_count INTEGER NOT NULL DEFAULT 0,
            error_message  TEXT
        )",
        "CREATE INDEX idx_nodes_scan_id ON nodes(scan_id)",
        "CREATE INDEX idx_nodes_phantom ON nodes(is_phantom)",
        "CREATE INDEX idx_edges_scan_id ON edges(scan_id)",
    ],
}];

pub const SCHEMA_VERSION: i64 = BASE_SCHEMA_VERSION + MIGRATION_STEPS.len() as i64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationReport {
    pub from_version: i64,
    pub to_version: i64,
    pub statements: Vec<&'static str>,
    /// Statements whose effect was already present in the store.
    pub already_applied: Vec<&'static str>,
    pub dry_run: bool,
}

impl MigrationReport {
    pub fn is_noop(&self) -> bool {
        self.from_version == self.to_version
    }
}

/// Creates the base schema when the node table is missing. Existing stores
/// are left untouched.
pub fn ensure_schema(conn: &Connection) -> Result<bool> {
    if table_exists(conn, "nodes")? {
        return Ok(false);
    }
    conn.execute_batch(BASE_SCHEMA)
        .map_err(|e| CloudGraphError::schema(e.to_string()))?;
    write_schema_version(conn, BASE_SCHEMA_VERSION)?;
    info!(version = BASE_SCHEMA_VERSION, "schema.created");
    Ok(true)
}

/// Creates the schema if needed and applies every pending migration.
/// Callers run this inside the writer transaction.
pub fn initialize(conn: &Connection) -> Result<MigrationReport> {
    ensure_schema(conn)?;
    migrate(conn)
}

pub fn migrate(conn: &Connection) -> Result<MigrationReport> {
    run_pending_migrations(conn, false)
}

pub fn read_schema_version(conn: &Connection) -> Result<i64> {
    let stored: Option<Option<String>> = conn
        .query_row(
            "SELECT value FROM metadata WHERE key='schema_version'",
            [],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| CloudGraphError::schema(e.to_string()))?;
    match stored.flatten() {
        Some(text) => text.trim().parse::<i64>().map_err(|e| {
            CloudGraphError::schema(format!("invalid schema_version {text:?}: {e}"))
        }),
        // Stores created before versioning carry the base tables only.
        None => Ok(BASE_SCHEMA_VERSION),
    }
}

pub fn run_pending_migrations(conn: &Connection, dry_run: bool) -> Result<MigrationReport> {
    let current = read_schema_version(conn)?;
    if current > SCHEMA_VERSION {
        return Err(CloudGraphError::schema(format!(
            "database schema version {current} is newer than supported {SCHEMA_VERSION}"
        )));
    }
    let mut report = MigrationReport {
        from_version: current,
        to_version: current,
        statements: Vec::new(),
        already_applied: Vec::new(),
        dry_run,
    };
    for step in MIGRATION_STEPS.iter().filter(|s| s.target_version > current) {
        report.to_version = step.target_version;
        if dry_run {
            report.statements.extend_from_slice(step.statements);
            continue;
        }
        for &sql in step.statements {
            match conn.execute(sql, []) {
                Ok(_) => report.statements.push(sql),
                Err(err) if is_already_applied(&err) => {
                    debug!(statement = sql, "schema.migration.already_applied");
                    report.already_applied.push(sql);
                }
                Err(err) => {
                    return Err(CloudGraphError::schema(format!(
                        "migration to v{} failed: {err}",
                        step.target_version
                    )));
                }
            }
        }
        write_schema_version(conn, step.target_version)?;
        info!(
            from = current,
            to = step.target_version,
            "schema.migration.applied"
        );
    }
    Ok(report)
}

fn is_already_applied(err: &rusqlite::Error) -> bool {
    let msg = err.to_string().to_ascii_lowercase();
    msg.contains("duplicate column") || msg.contains("already exists")
}

fn write_schema_version(conn: &Connection, version: i64) -> Result<()> {
    conn.execute(
        "INSERT INTO metadata(key, value) VALUES('schema_version', ?1)
         ON CONFLICT(key) DO UPDATE SET value=excluded.value",
        params![version.to_string()],
    )
    .map_err(|e| CloudGraphError::schema(e.to_string()))?;
    Ok(())
}

pub(crate) fn table_exists(conn: &Connection, name: &str) -> Result<bool> {
    conn.prepare_cached("SELECT 1 FROM sqlite_master WHERE type='table' AND name=?1")
        .and_then(|mut stmt| stmt.exists(params![name]))
        .map_err(|e| CloudGraphError::schema(e.to_string()))
}
