//! OpenAI-compatible embeddings provider.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use sync_core::{EmbeddingProvider, ProviderError, SyncError};

/// Connection settings for an OpenAI-compatible `/embeddings` endpoint.
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    /// Requested output dimensions, for models that support shortening
    pub dimensions: Option<usize>,
    pub timeout: Duration,
}

impl OpenAiConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: "text-embedding-3-small".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            dimensions: None,
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

pub struct OpenAiProvider {
    client: Client,
    endpoint: String,
    model: String,
    dimensions: Option<usize>,
}

impl OpenAiProvider {
    pub fn new(config: OpenAiConfig) -> Result<Self, SyncError> {
        if config.api_key.trim().is_empty() {
            return Err(SyncError::Configuration(
                "missing OpenAI API key (set OPENAI_API_KEY)".to_string(),
            ));
        }
        if config.model.trim().is_empty() {
            return Err(SyncError::Configuration(
                "missing embedding model name".to_string(),
            ));
        }

        let mut headers = HeaderMap::new();
        let auth = HeaderValue::from_str(&format!("Bearer {}", config.api_key.trim()))
            .map_err(|e| SyncError::Configuration(format!("invalid OpenAI API key: {e}")))?;
        headers.insert(AUTHORIZATION, auth);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .timeout(config.timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| {
                SyncError::Configuration(format!("failed to build OpenAI HTTP client: {e}"))
            })?;

        Ok(Self {
            client,
            endpoint: embeddings_endpoint(&config.base_url),
            model: config.model,
            dimensions: config.dimensions,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiProvider {
    fn provider_name(&self) -> &str {
        "openai"
    }

    async fn embed_batch(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        let request = EmbeddingRequest {
            model: &self.model,
            input: inputs,
            dimensions: self.dimensions,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(classify_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            let message = format!("OpenAI embeddings request failed ({status}): {body}");
            return Err(if is_retryable_status(status) {
                ProviderError::transient(message)
            } else {
                ProviderError::permanent(message)
            });
        }

        let parsed: EmbeddingResponse = response.json().await.map_err(|e| {
            ProviderError::transient(format!("failed to parse OpenAI embedding response: {e}"))
        })?;
        Ok(into_ordered_vectors(parsed))
    }
}

fn embeddings_endpoint(base_url: &str) -> String {
    format!("{}/embeddings", base_url.trim_end_matches('/'))
}

fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
}

fn classify_transport_error(err: reqwest::Error) -> ProviderError {
    if err.is_builder() {
        ProviderError::permanent(format!("invalid OpenAI request: {err}"))
    } else {
        ProviderError::transient(format!("OpenAI request failed: {err}"))
    }
}

/// The API may return entries out of order; `index` is authoritative.
fn into_ordered_vectors(mut response: EmbeddingResponse) -> Vec<Vec<f32>> {
    response.data.sort_by_key(|entry| entry.index);
    response.data.into_iter().map(|entry| entry.embedding).collect()
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}
