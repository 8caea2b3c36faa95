//! Retrying, timeout-bounded front of an embedding provider.

use std::sync::Arc;
use std::time::Duration;

use sync_core::{BatchId, EmbeddingProvider, ProviderError, SyncError};

use crate::RetryPolicy;

/// Turns batches of rendered text into vectors for the pipeline.
///
/// Every provider call is bounded by `timeout`; a timeout counts as a
/// transient failure. A response whose vector count does not match the input
/// count is treated the same way, so no input is ever silently dropped.
#[derive(Clone)]
pub struct EmbeddingGateway {
    provider: Arc<dyn EmbeddingProvider>,
    policy: RetryPolicy,
    timeout: Duration,
}

impl EmbeddingGateway {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, policy: RetryPolicy) -> Self {
        Self {
            provider,
            policy,
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn provider_name(&self) -> &str {
        self.provider.provider_name()
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Embed one batch, same order as `inputs`.
    ///
    /// Returns `TransientProvider` once the retry budget is spent and
    /// `PermanentProvider` immediately for failures the policy's classifier
    /// refuses to retry, both tagged with `batch`.
    pub async fn embed(
        &self,
        batch: &BatchId,
        inputs: &[String],
    ) -> Result<Vec<Vec<f32>>, SyncError> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }

        let mut attempt = 1;
        loop {
            let error = match self.call(inputs).await {
                Ok(vectors) => {
                    if attempt > 1 {
                        tracing::debug!("Batch {batch} embedded on attempt {attempt}");
                    }
                    return Ok(vectors);
                }
                Err(e) => e,
            };

            match self.policy.next_delay(attempt, &error) {
                Some(delay) => {
                    tracing::warn!(
                        "Embedding batch {batch} failed (attempt {attempt}/{}), retrying in {delay:?}: {}",
                        self.policy.max_attempts,
                        error.message
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                None if self.policy.is_retryable(&error) => {
                    return Err(SyncError::TransientProvider {
                        batch: batch.clone(),
                        attempts: attempt,
                        message: error.message,
                    })
                }
                None => {
                    return Err(SyncError::PermanentProvider {
                        batch: batch.clone(),
                        message: error.message,
                    })
                }
            }
        }
    }

    /// Embed a single search query.
    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>, SyncError> {
        let mut vectors = self.embed(&BatchId::query(), &[text.to_string()]).await?;
        vectors.pop().ok_or_else(|| SyncError::PermanentProvider {
            batch: BatchId::query(),
            message: "provider returned no vector for the query".to_string(),
        })
    }

    async fn call(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        let vectors = tokio::time::timeout(self.timeout, self.provider.embed_batch(inputs))
            .await
            .map_err(|_| {
                ProviderError::transient(format!(
                    "{} request timed out after {:?}",
                    self.provider.provider_name(),
                    self.timeout
                ))
            })??;

        if vectors.len() != inputs.len() {
            return Err(ProviderError::transient(format!(
                "{} returned {} vectors for {} inputs",
                self.provider.provider_name(),
                vectors.len(),
                inputs.len()
            )));
        }
        Ok(vectors)
    }
}
