//! Build pipeline components from a [`SyncConfig`].

use std::sync::Arc;

use anyhow::Context;
use checkpoint::CheckpointStorage;
use sync_core::{EmbeddingProvider, RowSource, StateStore, SyncError, VectorSink};
use vector_sync_embedding::{
    EmbeddingGateway, FakeEmbeddings, OpenAiConfig, OpenAiProvider, RetryPolicy,
};
use vector_sync_postgresql_source::{PostgresRowSource, SourceOpts};
use vector_sync_vector_sink::{Distance, LocalVectorStore, QdrantConfig, QdrantStore};

use crate::config::{ProviderKind, StorageKind, SyncConfig, OPENAI_API_KEY_ENV};
use crate::detector::{ChangeDetector, WatchTarget};
use crate::sync::{PipelineOptions, SyncPipeline};

/// Dimensions of the `fake` provider when `embeddings.dimensions` is unset.
const FAKE_DIMENSIONS: usize = 64;

pub fn watch_target(config: &SyncConfig) -> WatchTarget {
    WatchTarget {
        table: config.watch.table.clone(),
        key_column: config.watch.primary_key.clone(),
        timestamp_column: config.watch.updated_at_column.clone(),
        columns: config.watch.columns.clone(),
    }
}

/// PostgreSQL source for the watched table. Does not connect.
pub fn postgres_source(config: &SyncConfig) -> anyhow::Result<Arc<PostgresRowSource>> {
    let connection_string = config.source_connection_string()?;
    let opts = SourceOpts {
        connection_string,
        schema: config.watch.schema.clone(),
        fetch_timeout: config.source.fetch_timeout,
    };
    Ok(Arc::new(PostgresRowSource::new(opts)))
}

/// Connect and check the watched table against the configuration.
pub async fn verify_source(source: &PostgresRowSource, config: &SyncConfig) -> anyhow::Result<()> {
    check_source(source, config)
        .await
        .with_context(|| format!("Failed to initialize source table '{}'", config.watch.table))
}

/// Startup check for `watch`.
///
/// An unreachable database is logged and left to the poll loop, which keeps
/// trying every interval. A table that does not match the configuration still
/// stops startup.
pub async fn verify_source_for_watch(
    source: &PostgresRowSource,
    config: &SyncConfig,
) -> anyhow::Result<()> {
    let result = check_source(source, config).await;
    tolerate_unavailable_source(result, &config.watch.table)
}

fn tolerate_unavailable_source(result: Result<(), SyncError>, table: &str) -> anyhow::Result<()> {
    match result {
        Err(e) if !e.stops_watch() => {
            tracing::warn!("Source table '{table}' could not be checked, watching anyway: {e}");
            Ok(())
        }
        result => result.with_context(|| format!("Failed to initialize source table '{table}'")),
    }
}

async fn check_source(source: &PostgresRowSource, config: &SyncConfig) -> Result<(), SyncError> {
    let watch = &config.watch;
    let key_kind = source
        .initialize(
            &watch.table,
            &watch.primary_key,
            &watch.updated_at_column,
            &watch.columns,
        )
        .await?;
    tracing::info!(
        "Watching {}.{} (key {} as {key_kind:?}, timestamp {})",
        watch.schema,
        watch.table,
        watch.primary_key,
        watch.updated_at_column
    );
    Ok(())
}

pub fn embedding_provider(config: &SyncConfig) -> anyhow::Result<Arc<dyn EmbeddingProvider>> {
    let embeddings = &config.embeddings;
    match config.provider_kind()? {
        ProviderKind::Fake => Ok(Arc::new(FakeEmbeddings::new(
            embeddings.dimensions.unwrap_or(FAKE_DIMENSIONS),
        ))),
        ProviderKind::OpenAi => {
            let api_key = std::env::var(OPENAI_API_KEY_ENV).unwrap_or_default();
            let mut openai = OpenAiConfig::new(api_key)
                .with_model(&embeddings.model)
                .with_base_url(&embeddings.base_url);
            openai.dimensions = embeddings.dimensions;
            openai.timeout = embeddings.request_timeout;
            let provider =
                OpenAiProvider::new(openai).context("Failed to create OpenAI embeddings provider")?;
            Ok(Arc::new(provider))
        }
    }
}

pub fn embedding_gateway(config: &SyncConfig) -> anyhow::Result<EmbeddingGateway> {
    let embeddings = &config.embeddings;
    let policy = RetryPolicy::new(embeddings.max_attempts, embeddings.backoff_base)
        .with_max_delay(embeddings.max_backoff);
    Ok(EmbeddingGateway::new(embedding_provider(config)?, policy)
        .with_timeout(embeddings.request_timeout))
}

pub fn vector_sink(config: &SyncConfig) -> anyhow::Result<Arc<dyn VectorSink>> {
    let storage = &config.storage;
    let distance: Distance = storage.distance.parse()?;
    let collection = config.collection();
    match config.storage_kind()? {
        StorageKind::Local => {
            let store = LocalVectorStore::open(&storage.path, collection)
                .with_context(|| {
                    format!("Failed to open local vector store at {}", storage.path.display())
                })?
                .with_distance(distance);
            Ok(Arc::new(store))
        }
        StorageKind::Qdrant => {
            let url = storage.url.clone().unwrap_or_default();
            let mut qdrant = QdrantConfig::new(url, collection);
            qdrant.api_key = storage.api_key.clone();
            qdrant.distance = distance;
            qdrant.timeout = storage.upsert_timeout;
            let store = QdrantStore::new(qdrant).context("Failed to create Qdrant client")?;
            Ok(Arc::new(store))
        }
    }
}

pub fn state_store(config: &SyncConfig) -> Arc<dyn StateStore> {
    CheckpointStorage::filesystem(&config.sync.state_dir).open(config.collection())
}

pub fn pipeline_options(config: &SyncConfig) -> PipelineOptions {
    PipelineOptions {
        batch_size: config.embeddings.batch_size,
        concurrency: config.embeddings.concurrency,
        upsert_timeout: config.storage.upsert_timeout,
        poll_interval: config.sync.poll_interval,
    }
}

/// Assemble a pipeline reading from `source`.
pub fn build_pipeline(
    config: &SyncConfig,
    source: Arc<dyn RowSource>,
    options: PipelineOptions,
) -> anyhow::Result<SyncPipeline> {
    let detector = ChangeDetector::new(source, watch_target(config), config.sync.page_size);
    let pipeline = SyncPipeline::new(
        detector,
        config.template()?,
        embedding_gateway(config)?,
        vector_sink(config)?,
        state_store(config),
        options,
    )?;
    Ok(pipeline)
}
