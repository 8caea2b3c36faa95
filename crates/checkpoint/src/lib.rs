//! Watermark persistence for vector-sync
//!
//! Provides the durable side of the sync cursor: a [`StateStore`] keeps the
//! last fully committed `(timestamp, key)` position of a pipeline so that it
//! resumes where it stopped after a restart.
//!
//! # Storage Backends
//!
//! - [`FilesystemStore`] - One JSON record per collection, replaced atomically
//!   (write to a temporary file in the same directory, fsync, rename)
//! - [`MemoryStore`] - Process-local store for tests and dry runs
//!
//! Both assume a single writer; running two pipelines against the same
//! record is not supported.
//!
//! # File Format
//!
//! ```json
//! {
//!     "collection": "documents",
//!     "watermark": {
//!         "last_timestamp": "2024-01-01T00:00:00Z",
//!         "last_key": 42
//!     },
//!     "updated_at": "2024-01-01T00:00:05Z"
//! }
//! ```

mod config;
mod file;
mod filesystem;
mod memory;


pub use config::CheckpointStorage;
pub use file::StoredWatermark;
pub use filesystem::FilesystemStore;
pub use memory::MemoryStore;

// The trait lives in sync-core so the pipeline does not depend on this crate's backends
pub use sync_core::StateStore;
