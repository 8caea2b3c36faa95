//! On-disk watermark record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sync_core::{SyncError, Watermark};

/// Watermark wrapped with the identity of the collection it belongs to.
///
/// The collection field guards against pointing a pipeline at another
/// pipeline's state directory and silently inheriting its cursor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredWatermark {
    /// Collection/table identity the watermark belongs to
    pub collection: String,
    pub watermark: Watermark,
    /// When this record was written
    pub updated_at: DateTime<Utc>,
}

impl StoredWatermark {
    pub fn new(collection: impl Into<String>, watermark: Watermark) -> Self {
        Self {
            collection: collection.into(),
            watermark,
            updated_at: Utc::now(),
        }
    }

    /// Extract the watermark, validating that the record belongs to `collection`.
    pub fn into_watermark(self, collection: &str) -> Result<Watermark, SyncError> {
        if self.collection != collection {
            return Err(SyncError::StateStore(format!(
                "watermark record belongs to collection '{}', expected '{collection}'",
                self.collection
            )));
        }
        Ok(self.watermark)
    }

    pub fn to_json(&self) -> Result<String, SyncError> {
        serde_json::to_string_pretty(self)
            .map_err(|e| SyncError::StateStore(format!("failed to serialize watermark: {e}")))
    }

    pub fn from_json(content: &str) -> Result<Self, SyncError> {
        serde_json::from_str(content)
            .map_err(|e| SyncError::StateStore(format!("corrupt watermark record: {e}")))
    }
}
