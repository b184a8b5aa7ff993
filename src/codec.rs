//! Attribute payload encoding.
//!
//! Payloads are the canonical compact JSON text of an attribute map, optionally
//! zstd-compressed. Stored values come in three shapes and are told apart
//! without a format flag:
//!
//! 1. zstd frames written by a compressing codec,
//! 2. plain JSON text written by a non-compressing codec or an older store,
//! 3. `NULL` or empty values, which decode to an empty map.

use std::io::Cursor;

use rusqlite::types::{ToSqlOutput, Value, ValueRef};
use serde_json::{Map, Value as JsonValue};

use crate::errors::{CloudGraphError, Result};

/// Attribute map carried by nodes and edges.
pub type Attributes = Map<String, JsonValue>;

/// zstd level used for every payload. Level 3 is zstd's own default and sits
/// well before the point of diminishing returns.
pub const COMPRESSION_LEVEL: i32 = 3;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Codec {
    compress: bool,
}

impl Codec {
    pub fn new(compress: bool) -> Self {
        Self { compress }
    }

    pub fn compressed() -> Self {
        Self::new(true)
    }

    pub fn plain() -> Self {
        Self::new(false)
    }

    pub fn is_compressing(&self) -> bool {
        self.compress
    }

    /// Encodes a map into the value written to the attributes column.
    pub fn encode(&self, attributes: &Attributes) -> Result<ToSqlOutput<'static>> {
        let text = to_canonical_json(attributes)?;
        if self.compress {
            Ok(ToSqlOutput::Owned(Value::Blob(compress(text.as_bytes())?)))
        } else {
            Ok(ToSqlOutput::Owned(Value::Text(text)))
        }
    }

    /// Decodes a stored attributes column regardless of how it was written.
    pub fn decode(&self, stored: ValueRef<'_>) -> Result<Attributes> {
        match stored {
            ValueRef::Null => Ok(Attributes::new()),
            ValueRef::Blob(bytes) | ValueRef::Text(bytes) => decode_bytes(bytes),
            other => Err(CloudGraphError::corruption(format!(
                "attributes column has unexpected type {:?}",
                other.data_type()
            ))),
        }
    }
}

impl Default for Codec {
    fn default() -> Self {
        Self::compressed()
    }
}

/// Serializes to compact JSON. Keys come out sorted because serde_json's map
/// is ordered, which keeps the text canonical.
pub fn to_canonical_json(attributes: &Attributes) -> Result<String> {
    serde_json::to_string(attributes).map_err(|e| CloudGraphError::invalid_input(e.to_string()))
}

pub fn compress(bytes: &[u8]) -> Result<Vec<u8>> {
    zstd::stream::encode_all(Cursor::new(bytes), COMPRESSION_LEVEL)
        .map_err(|e| CloudGraphError::query(format!("zstd encode failed: {e}")))
}

/// Decodes raw payload bytes: empty, compressed, or legacy plain text.
pub fn decode_bytes(bytes: &[u8]) -> Result<Attributes> {
    if bytes.iter().all(|b| b.is_ascii_whitespace()) {
        return Ok(Attributes::new());
    }
    match zstd::stream::decode_all(Cursor::new(bytes)) {
        Ok(plain) => parse_map(&plain).map_err(|e| {
            CloudGraphError::corruption(format!("decompressed payload is not a JSON object: {e}"))
        }),
        Err(zstd_err) => parse_map(bytes).map_err(|json_err| {
            CloudGraphError::corruption(format!(
                "payload is neither zstd ({zstd_err}) nor JSON ({json_err})"
            ))
        }),
    }
}

fn parse_map(bytes: &[u8]) -> std::result::Result<Attributes, serde_json::Error> {
    serde_json::from_slice(bytes)
}
