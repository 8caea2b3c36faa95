//! vector-sync library
//!
//! Keeps a vector index in step with a relational table: rows whose
//! last-modified timestamp moved past a persisted watermark are rendered to
//! text, embedded, and upserted into a vector store keyed by primary key.
//!
//! # Features
//!
//! - Incremental change detection on `(updated_at, primary key)` with keyset pagination
//! - Batched embedding with bounded parallelism, retry and backoff
//! - Failure isolation: a failed batch is retried next cycle without blocking the rest
//! - Durable watermark that only advances past rows that reached the vector store
//! - One-shot (`sync`) and continuous (`watch`) modes with graceful shutdown
//!
//! # Component Crates
//!
//! - `sync_core` - Data model, error taxonomy and collaborator traits
//! - `checkpoint` - Watermark persistence
//! - `vector_sync_postgresql_source` - PostgreSQL row source
//! - `vector_sync_embedding` - Embedding gateway and providers
//! - `vector_sync_vector_sink` - Local and Qdrant vector stores
//!
//! # CLI Usage
//!
//! ```bash
//! # Write a starter config
//! vector-sync init
//!
//! # One cycle
//! vector-sync sync
//!
//! # Poll every 10 seconds until Ctrl+C
//! vector-sync watch --interval 10s
//!
//! # Similarity search
//! vector-sync query "rust async runtimes" --limit 5
//! ```

pub mod config;
pub mod connect;
pub mod detector;
pub mod report;
pub mod shutdown;
pub mod sync;
pub mod testing;

pub use config::SyncConfig;
pub use detector::{ChangeDetector, ChangeStream, WatchTarget};
pub use sync::{CyclePhase, PipelineOptions, PipelineStatus, SyncPipeline, WatchReport};
