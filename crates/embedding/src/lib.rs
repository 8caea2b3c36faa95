//! Embedding gateway and providers for vector-sync
//!
//! The [`EmbeddingGateway`] wraps any [`sync_core::EmbeddingProvider`] with a
//! per-call timeout and a [`RetryPolicy`], and converts provider failures into
//! the pipeline's batch-scoped errors.
//!
//! Providers:
//! - [`OpenAiProvider`] - OpenAI-compatible `/embeddings` endpoint
//! - [`FakeEmbeddings`] - Deterministic hashed bag-of-words vectors

mod fake;
mod gateway;
mod openai;
mod retry;

pub use fake::FakeEmbeddings;
pub use gateway::EmbeddingGateway;
pub use openai::{OpenAiConfig, OpenAiProvider};
pub use retry::RetryPolicy;
