//! Pipeline error taxonomy.

use std::fmt;

use crate::RowKey;

/// Identity of an embedding batch inside one sync cycle.
///
/// Carried by provider errors so the orchestrator can tell which rows to
/// mark failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchId {
    /// Zero-based batch index within the cycle.
    pub index: usize,
    /// Number of rows in the batch.
    pub size: usize,
    pub first_key: Option<RowKey>,
    pub last_key: Option<RowKey>,
}

impl BatchId {
    pub fn new(
        index: usize,
        size: usize,
        first_key: Option<RowKey>,
        last_key: Option<RowKey>,
    ) -> Self {
        Self {
            index,
            size,
            first_key,
            last_key,
        }
    }

    /// Identity used for ad-hoc query embeddings that are not part of a cycle.
    pub fn query() -> Self {
        Self::new(0, 1, None, None)
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.first_key, &self.last_key) {
            (Some(first), Some(last)) => write!(
                f,
                "#{} (keys {}..={}, {} rows)",
                self.index, first, last, self.size
            ),
            _ => write!(f, "#{} ({} rows)", self.index, self.size),
        }
    }
}

/// Errors surfaced by the sync pipeline and its collaborators.
///
/// Batch-local variants are isolated to the rows of one batch and never abort
/// a cycle. Cycle-fatal variants abort the cycle without touching persisted
/// state.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SyncError {
    /// The relational source cannot be reached or queried
    #[error("source unavailable: {0}")]
    SourceUnavailable(String),

    /// Embedding failed after the retry budget was exhausted
    #[error("embedding batch {batch} failed after {attempts} attempt(s): {message}")]
    TransientProvider {
        batch: BatchId,
        attempts: u32,
        message: String,
    },

    /// Embedding failed in a way retrying cannot fix
    #[error("embedding batch {batch} rejected: {message}")]
    PermanentProvider { batch: BatchId, message: String },

    /// The vector store could not be written or read
    #[error("vector store unavailable: {0}")]
    StoreUnavailable(String),

    /// The watermark could not be loaded or persisted
    #[error("state store error: {0}")]
    StateStore(String),

    /// Invalid template, missing column or other setup problem
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl SyncError {
    /// Errors that only affect the rows of one batch.
    pub fn is_batch_local(&self) -> bool {
        matches!(
            self,
            SyncError::TransientProvider { .. }
                | SyncError::PermanentProvider { .. }
                | SyncError::StoreUnavailable(_)
        )
    }

    /// Errors that abort the current cycle.
    pub fn is_cycle_fatal(&self) -> bool {
        !self.is_batch_local()
    }

    /// Errors that should stop watch mode entirely instead of waiting for the next poll.
    pub fn stops_watch(&self) -> bool {
        matches!(self, SyncError::Configuration(_))
    }
}

/// Whether a provider failure may succeed on retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    /// Rate limits, timeouts, 5xx responses, dropped connections
    Transient,
    /// Malformed input, rejected credentials, unknown model
    Permanent,
}

impl fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderErrorKind::Transient => f.write_str("transient"),
            ProviderErrorKind::Permanent => f.write_str("permanent"),
        }
    }
}

/// Raw failure reported by an embedding provider, before retry handling.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind} provider failure: {message}")]
pub struct ProviderError {
    pub kind: ProviderErrorKind,
    pub message: String,
}

impl ProviderError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: ProviderErrorKind::Transient,
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            kind: ProviderErrorKind::Permanent,
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind == ProviderErrorKind::Transient
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        let batch = BatchId::new(2, 3, Some(RowKey::Int(4)), Some(RowKey::Int(6)));
        let transient = SyncError::TransientProvider {
            batch: batch.clone(),
            attempts: 3,
            message: "429".to_string(),
        };
        let permanent = SyncError::PermanentProvider {
            batch,
            message: "bad input".to_string(),
        };

        assert!(transient.is_batch_local());
        assert!(permanent.is_batch_local());
        assert!(SyncError::StoreUnavailable("down".into()).is_batch_local());

        assert!(SyncError::SourceUnavailable("down".into()).is_cycle_fatal());
        assert!(SyncError::StateStore("disk full".into()).is_cycle_fatal());
        assert!(SyncError::Configuration("missing column".into()).is_cycle_fatal());

        assert!(SyncError::Configuration("x".into()).stops_watch());
        assert!(!SyncError::SourceUnavailable("x".into()).stops_watch());
    }

    #[test]
    fn test_batch_id_display() {
        let batch = BatchId::new(1, 2, Some(RowKey::Int(5)), Some(RowKey::Int(7)));
        assert_eq!(batch.to_string(), "#1 (keys 5..=7, 2 rows)");
        assert_eq!(BatchId::query().to_string(), "#0 (1 rows)");
    }

    #[test]
    fn test_provider_error_kind() {
        assert!(ProviderError::transient("timeout").is_transient());
        assert!(!ProviderError::permanent("401").is_transient());
        assert_eq!(
            ProviderError::permanent("401").to_string(),
            "permanent provider failure: 401"
        );
    }
}
