//! Source row representation.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Watermark;

/// Primary key of a watched row.
///
/// Keys are totally ordered so that rows sharing a timestamp can be
/// tie-broken deterministically. Integer keys order numerically, text keys
/// order by their UTF-8 bytes. A table only ever uses one of the two kinds.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RowKey {
    Int(i64),
    Text(String),
}

impl RowKey {
    /// Parse a key from its CLI representation.
    ///
    /// Anything that parses as a signed 64-bit integer becomes [`RowKey::Int`].
    pub fn parse(s: &str) -> Self {
        match s.parse::<i64>() {
            Ok(v) => RowKey::Int(v),
            Err(_) => RowKey::Text(s.to_string()),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            RowKey::Int(v) => serde_json::Value::from(*v),
            RowKey::Text(s) => serde_json::Value::from(s.as_str()),
        }
    }

    /// Recover a key from a JSON payload value (e.g. the `row_id` field).
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Number(n) => n.as_i64().map(RowKey::Int),
            serde_json::Value::String(s) => Some(RowKey::Text(s.clone())),
            _ => None,
        }
    }
}

impl fmt::Display for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowKey::Int(v) => write!(f, "{v}"),
            RowKey::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for RowKey {
    fn from(v: i64) -> Self {
        RowKey::Int(v)
    }
}

impl From<i32> for RowKey {
    fn from(v: i32) -> Self {
        RowKey::Int(i64::from(v))
    }
}

impl From<&str> for RowKey {
    fn from(s: &str) -> Self {
        RowKey::Text(s.to_string())
    }
}

impl From<String> for RowKey {
    fn from(s: String) -> Self {
        RowKey::Text(s)
    }
}

/// One source-table record relevant to embedding.
///
/// `columns` holds only the columns configured as embedding inputs. A `None`
/// value is a SQL NULL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchedRow {
    pub key: RowKey,
    pub columns: BTreeMap<String, Option<String>>,
    pub updated_at: DateTime<Utc>,
}

impl WatchedRow {
    pub fn new(key: impl Into<RowKey>, updated_at: DateTime<Utc>) -> Self {
        Self {
            key: key.into(),
            columns: BTreeMap::new(),
            updated_at,
        }
    }

    /// Builder-style helper to attach a column value.
    pub fn with_column(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.columns.insert(name.into(), Some(value.into()));
        self
    }

    /// Builder-style helper to attach a NULL column.
    pub fn with_null_column(mut self, name: impl Into<String>) -> Self {
        self.columns.insert(name.into(), None);
        self
    }

    /// The watermark that covers this row and everything ordered before it.
    pub fn position(&self) -> Watermark {
        Watermark::at(self.updated_at, self.key.clone())
    }

    /// Whether this row sorts strictly after the given watermark.
    pub fn is_after(&self, watermark: &Watermark) -> bool {
        self.position() > *watermark
    }
}
