//! Configuration for opening an engine and tuning its subsystems.
//!
//! Every structure here implements [`Default`] with the values the engine is
//! tuned for, and derives serde traits so collaborators can load the
//! configuration from whatever file format they already use.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Where the graph lives.
///
/// # Examples
///
/// ```rust
/// use cloudgraph::StoreLocation;
///
/// assert_eq!(StoreLocation::parse(":memory:"), StoreLocation::Memory);
/// assert!(StoreLocation::parse("graph.db").is_file());
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum StoreLocation {
    /// Private in-memory database owned by a single handle.
    #[default]
    Memory,
    /// SQLite database file, created when missing.
    File(PathBuf),
}

impl StoreLocation {
    /// Interprets `":memory:"` (or an empty string) as [`StoreLocation::Memory`]
    /// and anything else as a file path.
    pub fn parse(spec: &str) -> Self {
        let trimmed = spec.trim();
        if trimmed.is_empty() || trimmed == ":memory:" {
            StoreLocation::Memory
        } else {
            StoreLocation::File(PathBuf::from(trimmed))
        }
    }

    pub fn file<P: AsRef<Path>>(path: P) -> Self {
        StoreLocation::File(path.as_ref().to_path_buf())
    }

    pub fn is_file(&self) -> bool {
        matches!(self, StoreLocation::File(_))
    }

    pub fn path(&self) -> Option<&Path> {
        match self {
            StoreLocation::Memory => None,
            StoreLocation::File(path) => Some(path.as_path()),
        }
    }
}

/// Connection pool settings.
///
/// # Default Configuration
///
/// ```rust
/// use cloudgraph::PoolConfig;
/// let config = PoolConfig::default();
/// assert_eq!(config.lock_timeout_ms, 30_000);
/// assert_eq!(config.busy_timeout_ms, 5_000);
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Maximum time a writer waits for the writer lock
    ///
    /// **Default:** `30_000`
    ///
    /// A caller still blocked after this window receives
    /// [`CloudGraphError::LockTimeout`](crate::CloudGraphError::LockTimeout).
    pub lock_timeout_ms: u64,

    /// SQLite `busy_timeout` applied to every handle
    ///
    /// **Default:** `5_000`
    pub busy_timeout_ms: u64,

    /// SQLite page cache size in KiB (written as a negative `cache_size`)
    ///
    /// **Default:** `64_000`
    pub cache_size_kib: i64,

    /// Prepared statement cache capacity per handle
    ///
    /// **Default:** `128`
    pub statement_cache_capacity: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: 30_000,
            busy_timeout_ms: 5_000,
            cache_size_kib: 64_000,
            statement_cache_capacity: 128,
        }
    }
}

impl PoolConfig {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

/// Configuration for batch writes and their backpressure.
///
/// Batches commit every `commit_every` items. Every `yield_every` items the
/// writer sleeps for `yield_duration_ms` after committing, which releases the
/// writer lock and lets concurrent readers through.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Items per transaction
    ///
    /// **Default:** `1000`
    pub commit_every: usize,

    /// Items between voluntary yields, `0` disables yielding
    ///
    /// **Default:** `1000`
    pub yield_every: usize,

    /// Length of each voluntary yield
    ///
    /// **Default:** `1`
    pub yield_duration_ms: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            commit_every: 1000,
            yield_every: 1000,
            yield_duration_ms: 1,
        }
    }
}

impl BatchConfig {
    pub fn yield_duration(&self) -> Duration {
        Duration::from_millis(self.yield_duration_ms)
    }
}

/// Numeric parameters of the iterative centrality measures.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CentralityConfig {
    /// PageRank damping factor
    ///
    /// **Default:** `0.85`
    pub damping: f64,

    /// Convergence threshold on the L1 change between iterations
    ///
    /// **Default:** `1e-6`
    pub tolerance: f64,

    /// Iteration cap
    ///
    /// **Default:** `100`
    pub max_iterations: usize,
}

impl Default for CentralityConfig {
    fn default() -> Self {
        Self {
            damping: 0.85,
            tolerance: 1e-6,
            max_iterations: 100,
        }
    }
}

/// Limits for path finding and neighbourhood extraction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TraversalConfig {
    /// Depth used when a caller passes no explicit depth
    ///
    /// **Default:** `10`
    pub max_depth: usize,

    /// Longest path, counted in nodes, that `find_path` will return
    ///
    /// **Default:** `20`
    pub max_path_length: usize,

    /// Upper bound on queue expansions in one search
    ///
    /// **Default:** `100_000`
    pub max_expansions: usize,
}

impl Default for TraversalConfig {
    fn default() -> Self {
        Self {
            max_depth: 10,
            max_path_length: 20,
            max_expansions: 100_000,
        }
    }
}

/// Complete configuration for [`GraphEngine`](crate::GraphEngine).
///
/// # Examples
///
/// ```rust
/// use cloudgraph::EngineConfig;
///
/// let mut cfg = EngineConfig::default();
/// cfg.compression = false;
/// cfg.batch.yield_every = 0;
/// assert!(cfg.metrics);
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub pool: PoolConfig,
    pub batch: BatchConfig,

    /// Store attribute payloads zstd-compressed
    ///
    /// **Default:** `true`
    ///
    /// Reading never depends on this flag; payloads written either way decode.
    pub compression: bool,

    /// Maintain the materialized degree table
    ///
    /// **Default:** `true`
    pub metrics: bool,

    /// Create phantom nodes for edge endpoints that have no node row
    ///
    /// **Default:** `true`
    pub auto_phantom: bool,

    pub centrality: CentralityConfig,
    pub traversal: TraversalConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pool: PoolConfig::default(),
            batch: BatchConfig::default(),
            compression: true,
            metrics: true,
            auto_phantom: true,
            centrality: CentralityConfig::default(),
            traversal: TraversalConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Parses a JSON document, filling absent fields with defaults.
    pub fn from_json_str(json: &str) -> crate::Result<Self> {
        serde_json::from_str(json).map_err(|e| crate::CloudGraphError::invalid_input(e.to_string()))
    }
}
