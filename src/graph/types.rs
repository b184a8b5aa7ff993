use std::collections::BTreeMap;
use std::str::FromStr;

use rusqlite::types::{Value, ValueRef};
use serde::{Deserialize, Serialize};

use crate::codec::{Attributes, Codec};
use crate::errors::{CloudGraphError, Result};

/// A resource vertex.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Node {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: String,
    pub name: Option<String>,
    pub region: Option<String>,
    pub account_id: Option<String>,
    #[serde(default)]
    pub attributes: Attributes,
    #[serde(default)]
    pub is_phantom: bool,
    pub phantom_reason: Option<String>,
    pub scan_id: Option<String>,
}

impl Node {
    pub fn new<I: Into<String>, T: Into<String>>(id: I, node_type: T) -> Self {
        Self {
            id: id.into(),
            node_type: node_type.into(),
            name: None,
            region: None,
            account_id: None,
            attributes: Attributes::new(),
            is_phantom: false,
            phantom_reason: None,
            scan_id: None,
        }
    }

    pub fn with_name<S: Into<String>>(mut self, name: S) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_region<S: Into<String>>(mut self, region: S) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn with_account<S: Into<String>>(mut self, account_id: S) -> Self {
        self.account_id = Some(account_id.into());
        self
    }

    pub fn with_attributes(mut self, attributes: Attributes) -> Self {
        self.attributes = attributes;
        self
    }

    pub fn with_scan<S: Into<String>>(mut self, scan_id: S) -> Self {
        self.scan_id = Some(scan_id.into());
        self
    }
}

/// A directed relationship. `source_id` depends on `target_id`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Edge {
    pub source_id: String,
    pub target_id: String,
    pub relation: String,
    #[serde(default)]
    pub attributes: Attributes,
    #[serde(default = "default_weight")]
    pub weight: f64,
    pub scan_id: Option<String>,
}

fn default_weight() -> f64 {
    1.0
}

impl Edge {
    pub fn new<S: Into<String>, T: Into<String>, R: Into<String>>(
        source_id: S,
        target_id: T,
        relation: R,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            target_id: target_id.into(),
            relation: relation.into(),
            attributes: Attributes::new(),
            weight: default_weight(),
            scan_id: None,
        }
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_attributes(mut self, attributes: Attributes) -> Self {
        self.attributes = attributes;
        self
    }

    pub fn with_scan<S: Into<String>>(mut self, scan_id: S) -> Self {
        self.scan_id = Some(scan_id.into());
        self
    }

    pub fn key(&self) -> EdgeKey {
        EdgeKey {
            source_id: self.source_id.clone(),
            target_id: self.target_id.clone(),
            relation: self.relation.clone(),
        }
    }
}

/// The uniqueness triple of an edge.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EdgeKey {
    pub source_id: String,
    pub target_id: String,
    pub relation: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Nodes with an edge pointing at the subject.
    In,
    /// Nodes the subject points at.
    Out,
    Both,
}

impl FromStr for Direction {
    type Err = CloudGraphError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "in" | "incoming" => Ok(Direction::In),
            "out" | "outgoing" => Ok(Direction::Out),
            "both" | "any" => Ok(Direction::Both),
            other => Err(CloudGraphError::invalid_input(format!(
                "unknown direction {other:?}"
            ))),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeDegree {
    pub in_degree: usize,
    pub out_degree: usize,
}

impl NodeDegree {
    pub fn total(&self) -> usize {
        self.in_degree + self.out_degree
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphStats {
    pub node_count: usize,
    pub edge_count: usize,
    pub phantom_count: usize,
    pub scan_session_count: usize,
    /// `page_count * page_size` of the main database.
    pub db_size_bytes: u64,
    pub type_counts: BTreeMap<String, usize>,
    pub schema_version: i64,
    pub compression: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchOutcome {
    pub written: usize,
    pub skipped: usize,
}

pub(crate) const NODE_COLUMNS: &str =
    "id, type, name, region, account_id, attributes, is_phantom, phantom_reason, scan_id";

pub(crate) const EDGE_COLUMNS: &str =
    "source_id, target_id, relation, attributes, weight, scan_id";

/// A node row whose attribute payload has not been decoded yet.
pub(crate) struct NodeRow {
    node: Node,
    attributes: Value,
}

impl NodeRow {
    /// Maps a row selected with [`NODE_COLUMNS`].
    pub(crate) fn read(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        let is_phantom: i64 = row.get(6)?;
        Ok(Self {
            node: Node {
                id: row.get(0)?,
                node_type: row.get(1)?,
                name: row.get(2)?,
                region: row.get(3)?,
                account_id: row.get(4)?,
                attributes: Attributes::new(),
                is_phantom: is_phantom != 0,
                phantom_reason: row.get(7)?,
                scan_id: row.get(8)?,
            },
            attributes: row.get(5)?,
        })
    }

    pub(crate) fn decode(self, codec: &Codec) -> Result<Node> {
        let mut node = self.node;
        node.attributes = codec
            .decode(ValueRef::from(&self.attributes))
            .map_err(|e| annotate(e, &format!("node {}", node.id)))?;
        Ok(node)
    }
}

pub(crate) struct EdgeRow {
    edge: Edge,
    attributes: Value,
}

impl EdgeRow {
    /// Maps a row selected with [`EDGE_COLUMNS`].
    pub(crate) fn read(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            edge: Edge {
                source_id: row.get(0)?,
                target_id: row.get(1)?,
                relation: row.get(2)?,
                attributes: Attributes::new(),
                weight: row.get(4)?,
                scan_id: row.get(5)?,
            },
            attributes: row.get(3)?,
        })
    }

    pub(crate) fn decode(self, codec: &Codec) -> Result<Edge> {
        let mut edge = self.edge;
        edge.attributes = codec.decode(ValueRef::from(&self.attributes)).map_err(|e| {
            annotate(
                e,
                &format!("edge {} -> {} ({})", edge.source_id, edge.target_id, edge.relation),
            )
        })?;
        Ok(edge)
    }
}

fn annotate(err: CloudGraphError, context: &str) -> CloudGraphError {
    match err {
        CloudGraphError::DataCorruption(msg) => {
            CloudGraphError::corruption(format!("{context}: {msg}"))
        }
        other => other,
    }
}

pub(crate) fn validate_node(node: &Node) -> Result<()> {
    if node.id.trim().is_empty() {
        return Err(CloudGraphError::invalid_input("node id must be set"));
    }
    if node.node_type.trim().is_empty() {
        return Err(CloudGraphError::invalid_input("node type must be set"));
    }
    Ok(())
}

pub(crate) fn validate_edge(edge: &Edge) -> Result<()> {
    if edge.relation.trim().is_empty() {
        return Err(CloudGraphError::invalid_input("edge relation must be set"));
    }
    if edge.source_id.trim().is_empty() || edge.target_id.trim().is_empty() {
        return Err(CloudGraphError::invalid_input(
            "edge endpoints must be non-empty ids",
        ));
    }
    if !edge.weight.is_finite() {
        return Err(CloudGraphError::invalid_input("edge weight must be finite"));
    }
    Ok(())
}
