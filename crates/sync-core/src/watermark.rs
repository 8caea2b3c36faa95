//! The sync cursor.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{RowKey, SyncError};

/// Durable cursor marking the latest `(timestamp, primary key)` already processed.
///
/// Ordering is lexicographic on `(last_timestamp, last_key)` with a missing key
/// sorting before every real key. A watermark without a key therefore covers
/// nothing at its own timestamp, which is what makes the epoch-zero default
/// include rows stamped exactly at the epoch.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Watermark {
    pub last_timestamp: DateTime<Utc>,
    pub last_key: Option<RowKey>,
}

impl Default for Watermark {
    fn default() -> Self {
        Self {
            last_timestamp: DateTime::<Utc>::UNIX_EPOCH,
            last_key: None,
        }
    }
}

impl Watermark {
    pub fn at(timestamp: DateTime<Utc>, key: impl Into<RowKey>) -> Self {
        Self {
            last_timestamp: timestamp,
            last_key: Some(key.into()),
        }
    }

    /// A watermark that admits every row stamped at or after `timestamp`.
    pub fn from_timestamp(timestamp: DateTime<Utc>) -> Self {
        Self {
            last_timestamp: timestamp,
            last_key: None,
        }
    }

    /// True for the epoch-zero watermark a fresh pipeline starts from.
    pub fn is_initial(&self) -> bool {
        *self == Self::default()
    }

    /// Convert to CLI-friendly string format: `<rfc3339>` or `<rfc3339>#<key>`.
    pub fn to_cli_string(&self) -> String {
        match &self.last_key {
            Some(key) => format!("{}#{}", self.last_timestamp.to_rfc3339(), key),
            None => self.last_timestamp.to_rfc3339(),
        }
    }

    /// Parse the format produced by [`Watermark::to_cli_string`].
    pub fn from_cli_string(s: &str) -> Result<Self, SyncError> {
        let (ts, key) = match s.split_once('#') {
            Some((ts, key)) => (ts, Some(key)),
            None => (s, None),
        };
        let last_timestamp = DateTime::parse_from_rfc3339(ts.trim())
            .map_err(|e| {
                SyncError::Configuration(format!("invalid watermark timestamp '{ts}': {e}"))
            })?
            .with_timezone(&Utc);
        let last_key = match key.map(str::trim) {
            Some("") => {
                return Err(SyncError::Configuration(format!(
                    "invalid watermark '{s}': empty key after '#'"
                )))
            }
            Some(k) => Some(RowKey::parse(k)),
            None => None,
        };
        Ok(Self {
            last_timestamp,
            last_key,
        })
    }
}

impl fmt::Display for Watermark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.last_key {
            Some(key) => write!(f, "({}, {})", self.last_timestamp.to_rfc3339(), key),
            None => write!(f, "({}, -)", self.last_timestamp.to_rfc3339()),
        }
    }
}
