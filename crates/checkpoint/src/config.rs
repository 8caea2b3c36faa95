//! Storage selection for watermark persistence.

use std::path::PathBuf;
use std::sync::Arc;

use sync_core::StateStore;

use crate::{FilesystemStore, MemoryStore};

/// Where the pipeline watermark is kept.
#[derive(Debug, Clone, PartialEq)]
pub enum CheckpointStorage {
    /// JSON record per collection under `dir`
    Filesystem { dir: PathBuf },
    /// Process-local; lost on exit
    Memory,
}

impl Default for CheckpointStorage {
    fn default() -> Self {
        Self::Filesystem {
            dir: PathBuf::from(".vector-sync/state"),
        }
    }
}

impl CheckpointStorage {
    pub fn filesystem(dir: impl Into<PathBuf>) -> Self {
        Self::Filesystem { dir: dir.into() }
    }

    /// Open the store holding the watermark of `collection`.
    pub fn open(&self, collection: &str) -> Arc<dyn StateStore> {
        match self {
            Self::Filesystem { dir } => Arc::new(FilesystemStore::new(dir.clone(), collection)),
            Self::Memory => Arc::new(MemoryStore::new()),
        }
    }
}
