//! Test fixtures for exercising the whole pipeline without external services
//!
//! [`Harness`] wires an in-memory row source, a scriptable embeddings
//! provider, a recording local vector store and an in-memory state store into
//! a [`SyncPipeline`]. Failures and delays are injected by matching on the
//! rendered text of a batch, which always contains each row's title.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use checkpoint::MemoryStore;
use sync_core::{
    ColumnTemplate, EmbeddingProvider, MemoryRowSource, ProviderError, RowKey, ScoredPoint,
    SyncError, VectorPoint, VectorSink, WatchedRow,
};
use tokio::sync::Mutex;
use vector_sync_embedding::{EmbeddingGateway, FakeEmbeddings, RetryPolicy};
use vector_sync_vector_sink::LocalVectorStore;

use crate::detector::{ChangeDetector, WatchTarget};
use crate::sync::{PipelineOptions, SyncPipeline};

pub const TEST_TABLE: &str = "documents";
pub const TEST_DIMENSIONS: usize = 128;

/// 2024-01-01T00:00:00Z plus `sec` seconds.
pub fn ts(sec: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(1_704_067_200 + sec, 0).unwrap_or_default()
}

/// A row of the test table.
pub fn document(key: impl Into<RowKey>, sec: i64, title: &str, content: &str) -> WatchedRow {
    WatchedRow::new(key, ts(sec))
        .with_column("title", title)
        .with_column("content", content)
}

struct FailureRule {
    needle: String,
    remaining: Option<usize>,
    error: ProviderError,
}

/// Deterministic provider whose calls can be made to fail or stall.
pub struct ScriptedEmbeddings {
    inner: FakeEmbeddings,
    failures: Mutex<Vec<FailureRule>>,
    delays: Mutex<Vec<(String, Duration)>>,
    calls: AtomicUsize,
}

impl ScriptedEmbeddings {
    pub fn new(dimensions: usize) -> Self {
        Self {
            inner: FakeEmbeddings::new(dimensions),
            failures: Mutex::new(Vec::new()),
            delays: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }

    /// Fail calls whose input contains `needle`, `times` times or forever when `None`.
    pub async fn fail_when(&self, needle: &str, times: Option<usize>, error: ProviderError) {
        self.failures.lock().await.push(FailureRule {
            needle: needle.to_string(),
            remaining: times,
            error,
        });
    }

    /// Sleep before answering calls whose input contains `needle`.
    pub async fn delay_when(&self, needle: &str, delay: Duration) {
        self.delays.lock().await.push((needle.to_string(), delay));
    }

    pub async fn clear_failures(&self) {
        self.failures.lock().await.clear();
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// The vector a successful call produces for `text`.
    pub fn expected_vector(&self, text: &str) -> Vec<f32> {
        self.inner.embed_text(text)
    }
}

fn mentions(texts: &[String], needle: &str) -> bool {
    texts.iter().any(|t| t.contains(needle))
}

#[async_trait]
impl EmbeddingProvider for ScriptedEmbeddings {
    fn provider_name(&self) -> &str {
        "scripted"
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let delay = self
            .delays
            .lock()
            .await
            .iter()
            .find(|(needle, _)| mentions(texts, needle))
            .map(|(_, delay)| *delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        {
            let mut failures = self.failures.lock().await;
            for rule in failures.iter_mut() {
                if rule.remaining == Some(0) || !mentions(texts, &rule.needle) {
                    continue;
                }
                if let Some(remaining) = rule.remaining.as_mut() {
                    *remaining -= 1;
                }
                return Err(rule.error.clone());
            }
        }

        self.inner.embed_batch(texts).await
    }
}

/// Vector sink that records the order of upserted ids and can reject chosen keys.
pub struct RecordingSink {
    inner: LocalVectorStore,
    upserted: Mutex<Vec<RowKey>>,
    rejected: Mutex<HashSet<RowKey>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self {
            inner: LocalVectorStore::in_memory(TEST_TABLE),
            upserted: Mutex::new(Vec::new()),
            rejected: Mutex::new(HashSet::new()),
        }
    }

    /// Fail any batch containing `key` with `StoreUnavailable`.
    pub async fn reject(&self, key: impl Into<RowKey>) {
        self.rejected.lock().await.insert(key.into());
    }

    pub async fn accept_all(&self) {
        self.rejected.lock().await.clear();
    }

    /// Ids of every successfully upserted point, in upsert order.
    pub async fn upserted(&self) -> Vec<RowKey> {
        self.upserted.lock().await.clone()
    }

    pub async fn get(&self, key: impl Into<RowKey>) -> Option<VectorPoint> {
        self.inner.get(&key.into()).await
    }
}

impl Default for RecordingSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VectorSink for RecordingSink {
    async fn upsert_batch(&self, points: &[VectorPoint]) -> Result<(), SyncError> {
        {
            let rejected = self.rejected.lock().await;
            if let Some(point) = points.iter().find(|p| rejected.contains(&p.id)) {
                return Err(SyncError::StoreUnavailable(format!(
                    "point {} rejected",
                    point.id
                )));
            }
        }
        self.inner.upsert_batch(points).await?;
        self.upserted
            .lock()
            .await
            .extend(points.iter().map(|p| p.id.clone()));
        Ok(())
    }

    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<ScoredPoint>, SyncError> {
        self.inner.query(vector, k).await
    }

    async fn count(&self) -> Result<usize, SyncError> {
        self.inner.count().await
    }
}

/// A pipeline over in-memory collaborators, with handles to each of them.
pub struct Harness {
    pub source: Arc<MemoryRowSource>,
    pub embeddings: Arc<ScriptedEmbeddings>,
    pub sink: Arc<RecordingSink>,
    pub state: Arc<MemoryStore>,
    pub pipeline: SyncPipeline,
}

impl Harness {
    pub fn new(batch_size: usize) -> Result<Self, SyncError> {
        Self::with_options(
            PipelineOptions {
                batch_size,
                poll_interval: Duration::from_secs(1),
                ..PipelineOptions::default()
            },
            100,
        )
    }

    pub fn with_options(options: PipelineOptions, page_size: usize) -> Result<Self, SyncError> {
        Self::build(options, page_size, Arc::new(MemoryStore::new()))
    }

    /// Same collaborators, fresh pipeline; models a process restart.
    pub fn restart(self) -> Result<Self, SyncError> {
        let Harness {
            source,
            embeddings,
            sink,
            state,
            pipeline,
        } = self;
        let options = pipeline.options().clone();
        Self::assemble(options, 100, source, embeddings, sink, state)
    }

    fn build(
        options: PipelineOptions,
        page_size: usize,
        state: Arc<MemoryStore>,
    ) -> Result<Self, SyncError> {
        Self::assemble(
            options,
            page_size,
            Arc::new(MemoryRowSource::new()),
            Arc::new(ScriptedEmbeddings::new(TEST_DIMENSIONS)),
            Arc::new(RecordingSink::new()),
            state,
        )
    }

    fn assemble(
        options: PipelineOptions,
        page_size: usize,
        source: Arc<MemoryRowSource>,
        embeddings: Arc<ScriptedEmbeddings>,
        sink: Arc<RecordingSink>,
        state: Arc<MemoryStore>,
    ) -> Result<Self, SyncError> {
        let columns = vec!["title".to_string(), "content".to_string()];
        let target = WatchTarget {
            table: TEST_TABLE.to_string(),
            key_column: "id".to_string(),
            timestamp_column: "updated_at".to_string(),
            columns: columns.clone(),
        };
        let detector = ChangeDetector::new(source.clone(), target, page_size);
        let template = ColumnTemplate::parse("{columns}", &columns)?;
        let gateway = EmbeddingGateway::new(
            embeddings.clone(),
            RetryPolicy::new(2, Duration::from_millis(1)),
        );
        let pipeline = SyncPipeline::new(
            detector,
            template,
            gateway,
            sink.clone(),
            state.clone(),
            options,
        )?;
        Ok(Self {
            source,
            embeddings,
            sink,
            state,
            pipeline,
        })
    }

    /// Insert or update a row of the test table.
    pub async fn put(&self, key: impl Into<RowKey>, sec: i64, title: &str, content: &str) {
        self.source.put(document(key, sec, title, content)).await;
    }
}
