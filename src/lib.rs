//! Embedded graph database of cloud resources and their dependencies.
//!
//! Nodes are resources, edges point from a resource to what it depends on.
//! Everything lives in one SQLite file (or in memory) with compressed
//! attribute payloads, full-text search over ids, types and names, scan
//! session tracking and a set of whole-graph algorithms for ordering and
//! impact analysis. [`GraphEngine`] is the entry point.
//!
//! Run Criterion benchmarks with `cargo bench` to inspect reports under `target/criterion`.

pub mod algo;
pub mod bench_utils;
pub mod cache;
pub mod codec;
pub mod config;
pub mod engine;
pub mod errors;
pub mod graph;
pub mod integrity;
pub mod phantom;
pub mod pool;
pub mod scan;
pub mod schema;

pub use crate::algo::{CentralityKind, CentralityScores, GraphView, ReductionReport, Subgraph};
pub use crate::codec::{Attributes, Codec};
pub use crate::config::{
    BatchConfig, CentralityConfig, EngineConfig, PoolConfig, StoreLocation, TraversalConfig,
};
pub use crate::engine::GraphEngine;
pub use crate::errors::{CloudGraphError, Result};
pub use crate::graph::{
    BatchOutcome, Direction, Edge, EdgeKey, GraphStats, GraphStore, Node, NodeDegree,
};
pub use crate::integrity::{IntegrityError, IntegrityReport};
pub use crate::phantom::PHANTOM_NODE_TYPE;
pub use crate::pool::ConnectionPool;
pub use crate::scan::{ScanSession, ScanStatus};
pub use crate::schema::{MigrationReport, SCHEMA_VERSION};
