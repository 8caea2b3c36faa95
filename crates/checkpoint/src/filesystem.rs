//! Filesystem-based watermark storage.

use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sync_core::{sanitize_file_stem, StateStore, SyncError, Watermark};
use tempfile::NamedTempFile;

use crate::StoredWatermark;

/// Stores the watermark of one collection as `{dir}/{collection}.json`.
///
/// Saves go through a temporary file in the same directory that is fsynced
/// and then renamed over the previous record, so readers observe either the
/// old or the new watermark and never a torn write.
#[derive(Debug, Clone)]
pub struct FilesystemStore {
    dir: PathBuf,
    collection: String,
}

impl FilesystemStore {
    pub fn new(dir: impl Into<PathBuf>, collection: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            collection: collection.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the record file for this store's collection.
    pub fn path(&self) -> PathBuf {
        self.dir
            .join(format!("{}.json", sanitize_file_stem(&self.collection)))
    }

    fn write_atomic(&self, content: &str) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(content.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(self.path()).map_err(|e| e.error)?;
        sync_dir(&self.dir);
        Ok(())
    }
}

#[async_trait]
impl StateStore for FilesystemStore {
    async fn load(&self) -> Result<Watermark, SyncError> {
        let path = self.path();
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("No watermark at {}, starting from scratch", path.display());
                return Ok(Watermark::default());
            }
            Err(e) => {
                return Err(SyncError::StateStore(format!(
                    "failed to read {}: {e}",
                    path.display()
                )))
            }
        };
        let watermark = StoredWatermark::from_json(&content)?.into_watermark(&self.collection)?;
        tracing::debug!("Loaded watermark {watermark} from {}", path.display());
        Ok(watermark)
    }

    async fn save(&self, watermark: &Watermark) -> Result<(), SyncError> {
        let record = StoredWatermark::new(self.collection.clone(), watermark.clone());
        let content = record.to_json()?;
        self.write_atomic(&content).map_err(|e| {
            SyncError::StateStore(format!(
                "failed to persist watermark to {}: {e}",
                self.path().display()
            ))
        })?;
        tracing::debug!("Saved watermark {watermark} to {}", self.path().display());
        Ok(())
    }

    async fn clear(&self) -> Result<(), SyncError> {
        let path = self.path();
        match std::fs::remove_file(&path) {
            Ok(()) => {
                tracing::info!("Removed watermark {}", path.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SyncError::StateStore(format!(
                "failed to remove {}: {e}",
                path.display()
            ))),
        }
    }
}

/// Best effort: make the rename itself durable.
#[cfg(unix)]
fn sync_dir(dir: &Path) {
    if let Ok(handle) = std::fs::File::open(dir) {
        if let Err(e) = handle.sync_all() {
            tracing::debug!("Directory fsync of {} failed: {e}", dir.display());
        }
    }
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) {}
