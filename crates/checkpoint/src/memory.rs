//! In-memory watermark storage.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use sync_core::{StateStore, SyncError, Watermark};
use tokio::sync::Mutex;

/// Keeps the watermark in process memory along with every saved value.
///
/// Save failures can be injected with [`MemoryStore::fail_saves`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    current: Mutex<Option<Watermark>>,
    history: Mutex<Vec<Watermark>>,
    fail_saves: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an already persisted watermark.
    pub fn with_watermark(watermark: Watermark) -> Self {
        Self {
            current: Mutex::new(Some(watermark)),
            ..Self::default()
        }
    }

    /// Make subsequent saves fail (or succeed again).
    pub fn fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    /// Every watermark successfully saved, oldest first.
    pub async fn history(&self) -> Vec<Watermark> {
        self.history.lock().await.clone()
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn load(&self) -> Result<Watermark, SyncError> {
        Ok(self.current.lock().await.clone().unwrap_or_default())
    }

    async fn save(&self, watermark: &Watermark) -> Result<(), SyncError> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(SyncError::StateStore(
                "watermark store rejected the write".to_string(),
            ));
        }
        *self.current.lock().await = Some(watermark.clone());
        self.history.lock().await.push(watermark.clone());
        Ok(())
    }

    async fn clear(&self) -> Result<(), SyncError> {
        *self.current.lock().await = None;
        Ok(())
    }
}
