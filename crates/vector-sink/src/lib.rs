//! Vector store sinks for vector-sync
//!
//! Both sinks implement [`sync_core::VectorSink`] with upsert-by-row-key
//! semantics:
//!
//! - [`LocalVectorStore`] - Brute-force scan over points kept in memory,
//!   optionally persisted as one JSON snapshot per collection
//! - [`QdrantStore`] - Qdrant over its REST API

mod distance;
mod local;
mod qdrant;

pub use distance::Distance;
pub use local::LocalVectorStore;
pub use qdrant::{point_id, QdrantConfig, QdrantStore};
