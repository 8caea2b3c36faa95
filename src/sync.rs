//! The sync orchestrator.
//!
//! One cycle walks `Idle → Detecting → Batching → Embedding → Upserting →
//! Advancing → Idle`, or ends in `Failed` when a cycle-fatal error occurs:
//!
//! 1. Load the watermark and lazily detect rows positioned after it.
//! 2. Cut the rows into fixed-size batches, preserving their order.
//! 3. Render and embed each batch. Up to `concurrency` batches embed at once,
//!    but results are consumed strictly in batch order.
//! 4. Upsert each embedded batch. When the provider rejects a batch outright,
//!    its rows are embedded one at a time so a single bad row only fails
//!    itself. Rows that render to empty text are skipped without a provider
//!    call. Failed rows are counted and the cycle moves on.
//! 5. Persist the position of the last row of the contiguous run of
//!    successful rows. A failed row freezes the watermark for the rest of
//!    the cycle, so it is detected again next time. Later rows are still
//!    upserted; re-upserting them next cycle is harmless.
//!
//! Cancellation is honoured between batches only: nothing new is started,
//! in-flight batches finish and step 5 runs for what was committed.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{FuturesOrdered, StreamExt};
use serde_json::{Map, Value};
use sync_core::{
    BatchFailure, BatchId, ColumnTemplate, RowKey, ScoredPoint, StateStore, SyncError,
    SyncOutcome, VectorPoint, VectorSink, WatchedRow, Watermark,
};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use vector_sync_embedding::EmbeddingGateway;

use crate::detector::ChangeDetector;

/// Tunables of the orchestrator.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineOptions {
    pub batch_size: usize,
    /// Batches embedding at the same time
    pub concurrency: usize,
    pub upsert_timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            batch_size: 64,
            concurrency: 1,
            upsert_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_secs(5),
        }
    }
}

/// Where the current cycle is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CyclePhase {
    Idle,
    Detecting,
    Batching,
    Embedding,
    Upserting,
    Advancing,
    Failed(String),
}

impl fmt::Display for CyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CyclePhase::Idle => f.write_str("idle"),
            CyclePhase::Detecting => f.write_str("detecting"),
            CyclePhase::Batching => f.write_str("batching"),
            CyclePhase::Embedding => f.write_str("embedding"),
            CyclePhase::Upserting => f.write_str("upserting"),
            CyclePhase::Advancing => f.write_str("advancing"),
            CyclePhase::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

/// Totals over a watch session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WatchReport {
    pub cycles: usize,
    pub failed_cycles: usize,
    pub fetched: usize,
    pub upserted: usize,
    pub failed: usize,
    pub watermark: Watermark,
}

impl WatchReport {
    fn record(&mut self, outcome: &SyncOutcome) {
        self.fetched += outcome.fetched;
        self.upserted += outcome.upserted;
        self.failed += outcome.failed;
        self.watermark = outcome.watermark.clone();
    }
}

impl fmt::Display for WatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cycles={} failed_cycles={} fetched={} upserted={} failed={} watermark={}",
            self.cycles, self.failed_cycles, self.fetched, self.upserted, self.failed, self.watermark
        )
    }
}

/// Persisted watermark and sink size.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineStatus {
    pub watermark: Watermark,
    pub points: usize,
}

/// A batch ready for embedding.
struct PreparedBatch {
    id: BatchId,
    rows: Vec<WatchedRow>,
    texts: Vec<String>,
}

impl PreparedBatch {
    /// Rendered texts worth sending to the provider, in row order.
    fn inputs(&self) -> Vec<String> {
        self.texts.iter().filter(|t| !t.is_empty()).cloned().collect()
    }

    /// Keys of the rows that were sent to the provider.
    fn embeddable_keys(&self) -> Vec<RowKey> {
        self.rows
            .iter()
            .zip(&self.texts)
            .filter(|(_, text)| !text.is_empty())
            .map(|(row, _)| row.key.clone())
            .collect()
    }
}

/// What happened to one row of a batch.
enum RowResult {
    Embedded(Vec<f32>),
    Skipped,
    Failed(String),
}

pub struct SyncPipeline {
    detector: ChangeDetector,
    template: ColumnTemplate,
    gateway: EmbeddingGateway,
    sink: Arc<dyn VectorSink>,
    state: Arc<dyn StateStore>,
    options: PipelineOptions,
    phase: watch::Sender<CyclePhase>,
}

impl SyncPipeline {
    pub fn new(
        detector: ChangeDetector,
        template: ColumnTemplate,
        gateway: EmbeddingGateway,
        sink: Arc<dyn VectorSink>,
        state: Arc<dyn StateStore>,
        options: PipelineOptions,
    ) -> Result<Self, SyncError> {
        if template.columns() != detector.target().columns.as_slice() {
            return Err(SyncError::Configuration(format!(
                "template columns ({}) differ from watched columns ({})",
                template.columns().join(", "),
                detector.target().columns.join(", ")
            )));
        }
        if options.batch_size == 0 || options.concurrency == 0 {
            return Err(SyncError::Configuration(
                "batch size and concurrency must be greater than zero".to_string(),
            ));
        }
        let (phase, _) = watch::channel(CyclePhase::Idle);
        Ok(Self {
            detector,
            template,
            gateway,
            sink,
            state,
            options,
            phase,
        })
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    pub fn phase(&self) -> CyclePhase {
        self.phase.borrow().clone()
    }

    /// Observe phase transitions.
    pub fn subscribe_phase(&self) -> watch::Receiver<CyclePhase> {
        self.phase.subscribe()
    }

    fn set_phase(&self, phase: CyclePhase) {
        tracing::trace!("Pipeline phase: {phase}");
        self.phase.send_replace(phase);
    }

    /// Run exactly one cycle.
    pub async fn run_once(&self, cancel: &CancellationToken) -> Result<SyncOutcome, SyncError> {
        let result = self.run_cycle(cancel).await;
        match &result {
            Ok(_) => self.set_phase(CyclePhase::Idle),
            Err(e) => self.set_phase(CyclePhase::Failed(e.to_string())),
        }
        result
    }

    /// Run cycles every poll interval until `cancel` fires or a configuration error occurs.
    ///
    /// Row-level failures and cycle-level failures other than configuration
    /// errors are logged and the next cycle runs as scheduled.
    pub async fn watch(&self, cancel: &CancellationToken) -> Result<WatchReport, SyncError> {
        let mut report = WatchReport::default();
        tracing::info!(
            "Watching {} ({}) every {:?}",
            self.detector.target().table,
            self.detector.source_type(),
            self.options.poll_interval
        );

        while !cancel.is_cancelled() {
            report.cycles += 1;
            match self.run_once(cancel).await {
                Ok(outcome) => {
                    if outcome.is_empty() {
                        tracing::debug!("Cycle {}: {outcome}", report.cycles);
                    } else {
                        tracing::info!("Cycle {}: {outcome}", report.cycles);
                    }
                    report.record(&outcome);
                }
                Err(e) if e.stops_watch() => {
                    tracing::error!("Cycle {} failed, stopping: {e}", report.cycles);
                    return Err(e);
                }
                Err(e) => {
                    report.failed_cycles += 1;
                    tracing::error!("Cycle {} failed: {e}", report.cycles);
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.options.poll_interval) => {}
            }
        }

        tracing::info!("Watch stopped: {report}");
        Ok(report)
    }

    async fn run_cycle(&self, cancel: &CancellationToken) -> Result<SyncOutcome, SyncError> {
        self.set_phase(CyclePhase::Detecting);
        let previous = self.state.load().await?;
        let mut stream = self.detector.detect(previous.clone());
        let first = stream.next_batch(self.options.batch_size).await?;
        if first.is_empty() {
            tracing::debug!("No changes after {previous}");
            return Ok(SyncOutcome::no_changes(previous));
        }

        let mut outcome = SyncOutcome::no_changes(previous.clone());
        let mut committed = previous.clone();
        let mut frozen = false;
        let mut pending = Some(first);
        let mut exhausted = false;
        let mut next_index = 0;
        let mut in_flight = FuturesOrdered::new();

        loop {
            while in_flight.len() < self.options.concurrency && !exhausted {
                if cancel.is_cancelled() {
                    tracing::info!("Cancellation requested, finishing in-flight batches");
                    outcome.interrupted = true;
                    exhausted = true;
                    break;
                }
                let rows = match pending.take() {
                    Some(rows) => rows,
                    None => {
                        self.set_phase(CyclePhase::Detecting);
                        stream.next_batch(self.options.batch_size).await?
                    }
                };
                if rows.is_empty() {
                    exhausted = true;
                    break;
                }

                self.set_phase(CyclePhase::Batching);
                outcome.fetched += rows.len();
                let batch = self.prepare(next_index, rows)?;
                next_index += 1;
                self.set_phase(CyclePhase::Embedding);
                in_flight.push_back(self.embed(batch));
            }

            let Some((batch, embedded)) = in_flight.next().await else {
                break;
            };
            outcome.batches += 1;

            let results = match embedded {
                Ok(vectors) => row_results(&batch, vectors),
                Err(e @ SyncError::PermanentProvider { .. })
                    if batch.embeddable_keys().len() > 1 =>
                {
                    tracing::warn!(
                        "Batch {} rejected, embedding its rows one at a time: {e}",
                        batch.id
                    );
                    self.embed_each(&batch).await
                }
                Err(e) if e.is_batch_local() => {
                    let keys = batch.embeddable_keys();
                    outcome.skipped += batch.rows.len() - keys.len();
                    Self::record_failure(&mut outcome, &batch, keys, &e.to_string());
                    frozen = true;
                    continue;
                }
                Err(e) => return Err(e),
            };

            let mut points = Vec::new();
            let mut failed_keys = Vec::new();
            let mut reason = None;
            let mut clean_through = None;
            for ((row, text), result) in batch.rows.iter().zip(&batch.texts).zip(results) {
                match result {
                    RowResult::Embedded(vector) => points.push(VectorPoint {
                        id: row.key.clone(),
                        vector,
                        payload: row_payload(row, text),
                    }),
                    RowResult::Skipped => {
                        tracing::warn!("Row {} renders to empty text, skipping", row.key);
                        outcome.skipped += 1;
                    }
                    RowResult::Failed(message) => {
                        failed_keys.push(row.key.clone());
                        reason.get_or_insert(message);
                    }
                }
                if failed_keys.is_empty() {
                    clean_through = Some(row.position());
                }
            }
            outcome.embedded += points.len();

            if !points.is_empty() {
                self.set_phase(CyclePhase::Upserting);
                match self.upsert(&points).await {
                    Ok(()) => {
                        outcome.upserted += points.len();
                        tracing::debug!("Batch {} upserted {} rows", batch.id, points.len());
                    }
                    Err(e) if e.is_batch_local() => {
                        let keys = batch.embeddable_keys();
                        Self::record_failure(&mut outcome, &batch, keys, &e.to_string());
                        frozen = true;
                        continue;
                    }
                    Err(e) => return Err(e),
                }
            }

            if !frozen {
                if let Some(position) = clean_through {
                    committed = position;
                }
            }
            if !failed_keys.is_empty() {
                let reason = reason.unwrap_or_default();
                Self::record_failure(&mut outcome, &batch, failed_keys, &reason);
                frozen = true;
            }
        }

        if committed > previous {
            self.set_phase(CyclePhase::Advancing);
            self.state.save(&committed).await?;
            tracing::debug!("Watermark advanced {previous} -> {committed}");
        } else if outcome.failed > 0 {
            tracing::warn!("Watermark held at {previous}: the earliest changed row failed");
        }
        outcome.watermark = committed;
        Ok(outcome)
    }

    /// Assign the batch identity and render the embedding inputs.
    fn prepare(&self, index: usize, rows: Vec<WatchedRow>) -> Result<PreparedBatch, SyncError> {
        let texts = rows
            .iter()
            .map(|row| self.template.render(row))
            .collect::<Result<Vec<_>, _>>()?;
        let id = BatchId::new(
            index,
            rows.len(),
            rows.first().map(|r| r.key.clone()),
            rows.last().map(|r| r.key.clone()),
        );
        Ok(PreparedBatch { id, rows, texts })
    }

    async fn embed(
        &self,
        batch: PreparedBatch,
    ) -> (PreparedBatch, Result<Vec<Vec<f32>>, SyncError>) {
        let result = self.gateway.embed(&batch.id, &batch.inputs()).await;
        (batch, result)
    }

    /// Embed the rows of a rejected batch individually.
    async fn embed_each(&self, batch: &PreparedBatch) -> Vec<RowResult> {
        let mut results = Vec::with_capacity(batch.rows.len());
        for (row, text) in batch.rows.iter().zip(&batch.texts) {
            if text.is_empty() {
                results.push(RowResult::Skipped);
                continue;
            }
            let key = Some(row.key.clone());
            let id = BatchId::new(batch.id.index, 1, key.clone(), key);
            let result = match self.gateway.embed(&id, std::slice::from_ref(text)).await {
                Ok(mut vectors) => match vectors.pop() {
                    Some(vector) => RowResult::Embedded(vector),
                    None => RowResult::Failed(format!("no vector returned for row {}", row.key)),
                },
                Err(e) => RowResult::Failed(e.to_string()),
            };
            results.push(result);
        }
        results
    }

    async fn upsert(&self, points: &[VectorPoint]) -> Result<(), SyncError> {
        let timeout = self.options.upsert_timeout;
        tokio::time::timeout(timeout, self.sink.upsert_batch(points))
            .await
            .map_err(|_| SyncError::StoreUnavailable(format!("upsert timed out after {timeout:?}")))?
    }

    fn record_failure(
        outcome: &mut SyncOutcome,
        batch: &PreparedBatch,
        keys: Vec<RowKey>,
        reason: &str,
    ) {
        if keys.is_empty() {
            return;
        }
        tracing::warn!(
            "Batch {}: {} row(s) failed, will be retried next cycle: {reason}",
            batch.id,
            keys.len()
        );
        outcome.failed += keys.len();
        outcome.failures.push(BatchFailure {
            batch: batch.id.index,
            keys,
            reason: reason.to_string(),
        });
    }

    /// Embed `text` and return the `limit` most similar points.
    pub async fn query(&self, text: &str, limit: usize) -> Result<Vec<ScoredPoint>, SyncError> {
        let vector = self.gateway.embed_query(text).await?;
        self.sink.query(&vector, limit).await
    }

    pub async fn status(&self) -> Result<PipelineStatus, SyncError> {
        Ok(PipelineStatus {
            watermark: self.state.load().await?,
            points: self.sink.count().await?,
        })
    }

    /// Forget the watermark, or move it to `to`.
    pub async fn reset(&self, to: Option<Watermark>) -> Result<Watermark, SyncError> {
        match to {
            Some(watermark) => {
                self.state.save(&watermark).await?;
                Ok(watermark)
            }
            None => {
                self.state.clear().await?;
                Ok(Watermark::default())
            }
        }
    }
}

/// Pair the vectors of a successful call with the rows that were sent.
fn row_results(batch: &PreparedBatch, vectors: Vec<Vec<f32>>) -> Vec<RowResult> {
    let mut vectors = vectors.into_iter();
    batch
        .texts
        .iter()
        .map(|text| {
            if text.is_empty() {
                return RowResult::Skipped;
            }
            match vectors.next() {
                Some(vector) => RowResult::Embedded(vector),
                None => RowResult::Failed("provider returned too few vectors".to_string()),
            }
        })
        .collect()
}

/// `{row_id, <columns>, updated_at, text}`
fn row_payload(row: &WatchedRow, text: &str) -> Map<String, Value> {
    let mut payload = Map::new();
    for (name, value) in &row.columns {
        let value = value.as_deref().map_or(Value::Null, Value::from);
        payload.insert(name.clone(), value);
    }
    payload.insert("row_id".to_string(), row.key.to_json());
    payload.insert(
        "updated_at".to_string(),
        Value::from(row.updated_at.to_rfc3339()),
    );
    payload.insert("text".to_string(), Value::from(text));
    payload
}
