//! Writer/reader handle management.
//!
//! A pool owns exactly one writer connection, guarded by a mutex whose
//! acquisition is bounded by [`PoolConfig::lock_timeout_ms`]. File-backed
//! stores additionally hand out one read-only connection per calling thread,
//! cached for reuse and closed when that thread exits. An in-memory database
//! cannot be shared across handles, so for [`StoreLocation::Memory`] reads go
//! through the writer handle.

use std::cell::RefCell;
use std::path::Path;
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};
use std::time::Instant;

use ahash::AHashMap;
use parking_lot::{Mutex, RwLock};
use rusqlite::backup::Progress;
use rusqlite::{Connection, DatabaseName, OpenFlags, TransactionBehavior};
use tracing::{debug, info, warn};

use crate::config::{PoolConfig, StoreLocation};
use crate::errors::{CloudGraphError, Result};

type ReaderHandle = Arc<Mutex<Connection>>;
type ReaderMap = Mutex<AHashMap<ThreadId, ReaderHandle>>;

thread_local! {
    static READER_LEASES: RefCell<Vec<ReaderLease>> = const { RefCell::new(Vec::new()) };
}

/// Evicts one thread's reader from a pool when the thread's locals are torn
/// down.
struct ReaderLease {
    readers: Weak<ReaderMap>,
    thread: ThreadId,
}

impl Drop for ReaderLease {
    fn drop(&mut self) {
        if let Some(readers) = self.readers.upgrade() {
            if readers.lock().remove(&self.thread).is_some() {
                debug!(thread = ?self.thread, "pool.reader.reclaimed");
            }
        }
    }
}

fn register_lease(readers: &Arc<ReaderMap>, thread: ThreadId) {
    let readers = Arc::downgrade(readers);
    // Fails only while this thread's locals are being destroyed.
    let _ = READER_LEASES.try_with(|leases| {
        let mut leases = leases.borrow_mut();
        leases.retain(|lease| lease.readers.strong_count() > 0);
        if !leases.iter().any(|lease| Weak::ptr_eq(&lease.readers, &readers)) {
            leases.push(ReaderLease { readers, thread });
        }
    });
}

pub struct ConnectionPool {
    location: StoreLocation,
    config: PoolConfig,
    writer: Mutex<Connection>,
    readers: Arc<ReaderMap>,
    current_scan: RwLock<Option<String>>,
}

impl ConnectionPool {
    pub fn open(location: StoreLocation, config: PoolConfig) -> Result<Self> {
        let conn = match &location {
            StoreLocation::Memory => Connection::open_in_memory(),
            StoreLocation::File(path) => Connection::open(path),
        }
        .map_err(|e| CloudGraphError::connection(e.to_string()))?;
        configure_writer(&conn, &location, &config)?;
        info!(location = ?location, "pool.opened");
        Ok(Self {
            location,
            config,
            writer: Mutex::new(conn),
            readers: Arc::new(Mutex::new(AHashMap::new())),
            current_scan: RwLock::new(None),
        })
    }

    pub fn location(&self) -> &StoreLocation {
        &self.location
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Runs `f` with exclusive access to the writer handle.
    ///
    /// Fails with [`CloudGraphError::LockTimeout`] when the lock is not
    /// acquired within the configured window.
    pub fn with_writer<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut Connection) -> Result<R>,
    {
        let timeout = self.config.lock_timeout();
        let started = Instant::now();
        let mut guard = self.writer.try_lock_for(timeout).ok_or_else(|| {
            warn!(waited_ms = timeout.as_millis() as u64, "pool.writer.timeout");
            CloudGraphError::LockTimeout {
                waited_ms: timeout.as_millis() as u64,
            }
        })?;
        debug!(
            waited_us = started.elapsed().as_micros() as u64,
            "pool.writer.acquired"
        );
        f(&mut guard)
    }

    /// Like [`with_writer`](Self::with_writer) but gives up immediately when
    /// the writer is busy, returning `None`.
    pub fn try_with_writer<F, R>(&self, f: F) -> Option<Result<R>>
    where
        F: FnOnce(&mut Connection) -> Result<R>,
    {
        let mut guard = self.writer.try_lock()?;
        Some(f(&mut guard))
    }

    /// Runs `f` inside an IMMEDIATE transaction on the writer handle.
    ///
    /// The transaction commits when `f` returns `Ok` and rolls back otherwise.
    pub fn write_transaction<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&Connection) -> Result<R>,
    {
        self.with_writer(|conn| {
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(|e| CloudGraphError::transaction(e.to_string()))?;
            let out = f(&tx)?;
            tx.commit()
                .map_err(|e| CloudGraphError::transaction(e.to_string()))?;
            Ok(out)
        })
    }

    /// Runs `f` against this thread's read handle.
    pub fn with_reader<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&Connection) -> Result<R>,
    {
        match &self.location {
            StoreLocation::Memory => self.with_writer(|conn| f(conn)),
            StoreLocation::File(path) => {
                let handle = self.reader_for_current_thread(path)?;
                let conn = handle.lock();
                f(&conn)
            }
        }
    }

    /// Drops the read handle cached for the calling thread, if any.
    pub fn release_reader(&self) {
        let id = thread::current().id();
        if self.readers.lock().remove(&id).is_some() {
            debug!(thread = ?id, "pool.reader.released");
        }
    }

    pub fn reader_count(&self) -> usize {
        self.readers.lock().len()
    }

    pub fn current_scan(&self) -> Option<String> {
        self.current_scan.read().clone()
    }

    pub fn set_current_scan(&self, scan_id: Option<String>) {
        *self.current_scan.write() = scan_id;
    }

    /// Clears the current scan pointer when it still refers to `scan_id`.
    pub fn clear_current_scan_if(&self, scan_id: &str) -> bool {
        let mut current = self.current_scan.write();
        if current.as_deref() == Some(scan_id) {
            *current = None;
            true
        } else {
            false
        }
    }

    /// Copies the whole database to `target` while holding the writer lock,
    /// so no write can interleave with the copy.
    pub fn backup_to<P: AsRef<Path>>(&self, target: P) -> Result<()> {
        let target = target.as_ref();
        self.with_writer(|conn| {
            conn.backup(DatabaseName::Main, target, None::<fn(Progress)>)
                .map_err(|e| CloudGraphError::connection(format!("backup failed: {e}")))
        })?;
        info!(target = %target.display(), "pool.backup.completed");
        Ok(())
    }

    /// Replaces the database content with the content of the file at `source`.
    pub fn restore_from<P: AsRef<Path>>(&self, source: P) -> Result<()> {
        let source = source.as_ref();
        if !source.exists() {
            return Err(CloudGraphError::not_found(format!(
                "snapshot {}",
                source.display()
            )));
        }
        self.with_writer(|conn| {
            conn.restore(DatabaseName::Main, source, None::<fn(Progress)>)
                .map_err(|e| CloudGraphError::connection(format!("restore failed: {e}")))
        })?;
        self.readers.lock().clear();
        info!(source = %source.display(), "pool.restore.completed");
        Ok(())
    }

    /// Closes every handle. Readers are torn down before the writer.
    pub fn close(self) -> Result<()> {
        let readers: Vec<ReaderHandle> = self.readers.lock().drain().map(|(_, h)| h).collect();
        for handle in readers {
            if let Ok(mutex) = Arc::try_unwrap(handle) {
                if let Err((_, err)) = mutex.into_inner().close() {
                    warn!(error = %err, "pool.reader.close_failed");
                }
            }
        }
        self.writer
            .into_inner()
            .close()
            .map_err(|(_, e)| CloudGraphError::connection(e.to_string()))?;
        info!(location = ?self.location, "pool.closed");
        Ok(())
    }

    fn reader_for_current_thread(&self, path: &Path) -> Result<ReaderHandle> {
        let id = thread::current().id();
        if let Some(handle) = self.readers.lock().get(&id) {
            return Ok(Arc::clone(handle));
        }
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY
                | OpenFlags::SQLITE_OPEN_NO_MUTEX
                | OpenFlags::SQLITE_OPEN_URI,
        )
        .map_err(|e| CloudGraphError::connection(e.to_string()))?;
        apply_common_pragmas(&conn, &self.config)?;
        let handle = Arc::new(Mutex::new(conn));
        self.readers.lock().insert(id, Arc::clone(&handle));
        register_lease(&self.readers, id);
        debug!(thread = ?id, "pool.reader.opened");
        Ok(handle)
    }
}

fn configure_writer(conn: &Connection, location: &StoreLocation, config: &PoolConfig) -> Result<()> {
    if location.is_file() {
        let mode: String = conn
            .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))
            .map_err(|e| CloudGraphError::connection(e.to_string()))?;
        if !mode.eq_ignore_ascii_case("wal") {
            warn!(journal_mode = %mode, "pool.wal.unavailable");
        }
    }
    apply_common_pragmas(conn, config)?;
    conn.pragma_update(None, "foreign_keys", "ON")
        .map_err(|e| CloudGraphError::connection(e.to_string()))?;
    Ok(())
}

fn apply_common_pragmas(conn: &Connection, config: &PoolConfig) -> Result<()> {
    conn.set_prepared_statement_cache_capacity(config.statement_cache_capacity);
    conn.busy_timeout(config.busy_timeout())
        .map_err(|e| CloudGraphError::connection(e.to_string()))?;
    let pragmas: [(&str, String); 3] = [
        ("synchronous", "NORMAL".to_string()),
        ("cache_size", format!("-{}", config.cache_size_kib.abs())),
        ("temp_store", "MEMORY".to_string()),
    ];
    for (name, value) in pragmas {
        conn.pragma_update(None, name, &value)
            .map_err(|e| CloudGraphError::connection(format!("PRAGMA {name} = {value}: {e}")))?;
    }
    Ok(())
}
