//! Core types for the vector-sync framework.
//!
//! This crate provides the foundational types shared by every stage of the
//! table-to-vector-index pipeline:
//!
//! - [`WatchedRow`] / [`RowKey`] - Source rows relevant to embedding
//! - [`Watermark`] - The durable sync cursor
//! - [`SyncOutcome`] - Summary of one sync cycle
//! - [`SyncError`] / [`ProviderError`] - The pipeline error taxonomy
//! - [`ColumnTemplate`] - Rendering of configured columns into embedding text
//! - Collaborator traits: [`RowSource`], [`EmbeddingProvider`], [`VectorSink`], [`StateStore`]
//!
//! # Architecture
//!
//! ```text
//! sync-core (this crate)
//!    │
//!    ├─── checkpoint                     (implements StateStore)
//!    ├─── vector-sync-postgresql-source  (implements RowSource)
//!    ├─── vector-sync-embedding          (implements EmbeddingProvider, retrying gateway)
//!    └─── vector-sync-vector-sink        (implements VectorSink)
//! ```

pub mod error;
pub mod memory;
pub mod naming;
pub mod outcome;
pub mod row;
pub mod template;
pub mod traits;
pub mod watermark;

pub use error::{BatchId, ProviderError, ProviderErrorKind, SyncError};
pub use memory::MemoryRowSource;
pub use naming::sanitize_file_stem;
pub use outcome::{BatchFailure, SyncOutcome};
pub use row::{RowKey, WatchedRow};
pub use template::ColumnTemplate;
pub use traits::{
    ChangeQuery, EmbeddingProvider, RowSource, ScoredPoint, StateStore, VectorPoint, VectorSink,
};
pub use watermark::Watermark;

/// Result alias used throughout the pipeline crates.
pub type Result<T, E = SyncError> = std::result::Result<T, E>;
