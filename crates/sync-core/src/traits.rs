//! Collaborator traits consumed by the sync pipeline.
//!
//! Each trait abstracts one external system so the pipeline can be compiled
//! against a single interface and exercised in tests with in-memory
//! implementations.

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::{ProviderError, RowKey, SyncError, WatchedRow, Watermark};

/// Parameters of one change-detection fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeQuery {
    pub table: String,
    pub key_column: String,
    pub timestamp_column: String,
    /// Embedding input columns, in configured order
    pub columns: Vec<String>,
    /// Only rows ordered strictly after this position are returned
    pub since: Watermark,
    /// Maximum rows per fetch
    pub limit: usize,
}

/// Source of watched rows.
///
/// Implementations must return rows that sort strictly after `query.since`,
/// ascending by `(timestamp, key)`, at most `query.limit` of them.
/// An empty result is the valid "no changes" answer; `SourceUnavailable` is
/// reserved for fetches that could not be performed at all.
#[async_trait]
pub trait RowSource: Send + Sync {
    /// Source type identifier, used in logs
    fn source_type(&self) -> &'static str;

    async fn fetch_changed(&self, query: &ChangeQuery) -> Result<Vec<WatchedRow>, SyncError>;
}

/// Text to vector function with a failure mode.
///
/// Must be free of hidden state: calling it twice with the same input is safe.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn provider_name(&self) -> &str;

    /// Embed `inputs`, returning one vector per input in the same order.
    async fn embed_batch(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, ProviderError>;
}

/// A vector with its identity and display payload.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorPoint {
    pub id: RowKey,
    pub vector: Vec<f32>,
    pub payload: Map<String, Value>,
}

/// One similarity search hit.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredPoint {
    pub id: RowKey,
    pub score: f32,
    pub payload: Map<String, Value>,
}

/// Searchable vector store with upsert semantics.
///
/// Re-upserting an existing id overwrites the previous vector and payload.
#[async_trait]
pub trait VectorSink: Send + Sync {
    async fn upsert_batch(&self, points: &[VectorPoint]) -> Result<(), SyncError>;

    async fn upsert(&self, point: VectorPoint) -> Result<(), SyncError> {
        self.upsert_batch(std::slice::from_ref(&point)).await
    }

    /// Top `k` points by descending similarity; `k` is capped at the store size.
    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<ScoredPoint>, SyncError>;

    /// Number of points currently stored.
    async fn count(&self) -> Result<usize, SyncError>;
}

/// Durable home of the pipeline watermark.
///
/// Assumes a single writer. `save` must not return before the watermark is
/// durable, and a crash mid-save must leave the previous value readable.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Returns the epoch-zero default when nothing was persisted yet.
    async fn load(&self) -> Result<Watermark, SyncError>;

    async fn save(&self, watermark: &Watermark) -> Result<(), SyncError>;

    /// Forget the persisted watermark so the next cycle starts from scratch.
    async fn clear(&self) -> Result<(), SyncError>;
}
