//! Qdrant sink over the REST API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use sync_core::{RowKey, ScoredPoint, SyncError, VectorPoint, VectorSink};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::Distance;

#[derive(Debug, Clone)]
pub struct QdrantConfig {
    pub url: String,
    pub api_key: Option<String>,
    pub collection: String,
    pub distance: Distance,
    pub timeout: Duration,
}

impl QdrantConfig {
    pub fn new(url: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            api_key: None,
            collection: collection.into(),
            distance: Distance::Cosine,
            timeout: Duration::from_secs(30),
        }
    }
}

pub struct QdrantStore {
    client: Client,
    base_url: String,
    collection: String,
    distance: Distance,
    /// Set once the collection is known to exist
    ready: Mutex<bool>,
}

impl QdrantStore {
    pub fn new(config: QdrantConfig) -> Result<Self, SyncError> {
        if !(config.url.starts_with("http://") || config.url.starts_with("https://")) {
            return Err(SyncError::Configuration(format!(
                "Qdrant url must be an http(s) URL, got '{}'",
                config.url
            )));
        }

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(key) = config.api_key.as_deref().filter(|k| !k.trim().is_empty()) {
            let value = HeaderValue::from_str(key.trim())
                .map_err(|e| SyncError::Configuration(format!("invalid Qdrant API key: {e}")))?;
            headers.insert("api-key", value);
        }
        let client = Client::builder()
            .timeout(config.timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| {
                SyncError::Configuration(format!("failed to build Qdrant HTTP client: {e}"))
            })?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            collection: config.collection,
            distance: config.distance,
            ready: Mutex::new(false),
        })
    }

    fn collection_url(&self) -> String {
        format!("{}/collections/{}", self.base_url, self.collection)
    }

    /// Create the collection with `dimensions`-sized vectors unless it already exists.
    async fn ensure_collection(&self, dimensions: usize) -> Result<(), SyncError> {
        let mut ready = self.ready.lock().await;
        if *ready {
            return Ok(());
        }

        let url = self.collection_url();
        let response = self.client.get(&url).send().await.map_err(unavailable)?;
        match response.status() {
            status if status.is_success() => {}
            StatusCode::NOT_FOUND => {
                tracing::info!(
                    "Creating Qdrant collection '{}' ({dimensions} dims, {})",
                    self.collection,
                    self.distance
                );
                let body = json!({
                    "vectors": { "size": dimensions, "distance": self.distance.to_string() }
                });
                let response = self
                    .client
                    .put(&url)
                    .json(&body)
                    .send()
                    .await
                    .map_err(unavailable)?;
                check(response, "create collection").await?;
            }
            _ => {
                check(response, "inspect collection").await?;
            }
        }
        *ready = true;
        Ok(())
    }
}

#[async_trait]
impl VectorSink for QdrantStore {
    async fn upsert_batch(&self, points: &[VectorPoint]) -> Result<(), SyncError> {
        let Some(first) = points.first() else {
            return Ok(());
        };
        self.ensure_collection(first.vector.len()).await?;

        let body = upsert_body(points);
        let response = self
            .client
            .put(format!("{}/points?wait=true", self.collection_url()))
            .json(&body)
            .send()
            .await
            .map_err(unavailable)?;
        check(response, "upsert points").await?;
        Ok(())
    }

    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<ScoredPoint>, SyncError> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let body = json!({ "vector": vector, "limit": k, "with_payload": true });
        let response = self
            .client
            .post(format!("{}/points/search", self.collection_url()))
            .json(&body)
            .send()
            .await
            .map_err(unavailable)?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        let response = check(response, "search").await?;
        let parsed: SearchResponse = response.json().await.map_err(unavailable)?;
        Ok(parsed.result.into_iter().map(SearchHit::into_scored).collect())
    }

    async fn count(&self) -> Result<usize, SyncError> {
        let response = self
            .client
            .post(format!("{}/points/count", self.collection_url()))
            .json(&json!({ "exact": true }))
            .send()
            .await
            .map_err(unavailable)?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(0);
        }
        let response = check(response, "count").await?;
        let parsed: CountResponse = response.json().await.map_err(unavailable)?;
        Ok(parsed.result.count)
    }
}

/// Qdrant point id for a row key.
///
/// Qdrant only accepts unsigned integers and UUIDs, so non-negative integer
/// keys are used as-is and every other key maps to a stable UUIDv5.
pub fn point_id(key: &RowKey) -> Value {
    match key {
        RowKey::Int(i) if *i >= 0 => json!(i),
        RowKey::Int(i) => json!(key_uuid(&format!("int:{i}")).to_string()),
        RowKey::Text(s) => json!(key_uuid(&format!("text:{s}")).to_string()),
    }
}

fn key_uuid(name: &str) -> Uuid {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes())
}

fn upsert_body(points: &[VectorPoint]) -> Value {
    let points: Vec<Value> = points
        .iter()
        .map(|p| {
            json!({
                "id": point_id(&p.id),
                "vector": p.vector,
                "payload": p.payload,
            })
        })
        .collect();
    json!({ "points": points })
}

async fn check(response: Response, action: &str) -> Result<Response, SyncError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "<body unavailable>".to_string());
    Err(SyncError::StoreUnavailable(format!(
        "Qdrant {action} failed ({status}): {body}"
    )))
}

fn unavailable(e: reqwest::Error) -> SyncError {
    SyncError::StoreUnavailable(format!("Qdrant request failed: {e}"))
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    result: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    id: Value,
    score: f32,
    #[serde(default)]
    payload: Option<Map<String, Value>>,
}

impl SearchHit {
    /// The row key comes from the payload, since UUID point ids cannot be reversed.
    fn into_scored(self) -> ScoredPoint {
        let payload = self.payload.unwrap_or_default();
        let id = payload
            .get("row_id")
            .and_then(RowKey::from_json)
            .or_else(|| RowKey::from_json(&self.id))
            .unwrap_or_else(|| RowKey::Text(self.id.to_string()));
        ScoredPoint {
            id,
            score: self.score,
            payload,
        }
    }
}

#[derive(Debug, Deserialize)]
struct CountResponse {
    result: CountResult,
}

#[derive(Debug, Deserialize)]
struct CountResult {
    count: usize,
}
