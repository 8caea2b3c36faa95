//! In-memory row source.
//!
//! Applies the same predicate and ordering contract as the SQL adapters, which
//! makes it usable for offline runs and for exercising the pipeline in tests.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::{ChangeQuery, RowKey, RowSource, SyncError, WatchedRow};

#[derive(Debug, Clone)]
struct StoredRow {
    columns: BTreeMap<String, Option<String>>,
    updated_at: DateTime<Utc>,
}

/// Table held in memory, keyed by primary key.
#[derive(Debug, Default)]
pub struct MemoryRowSource {
    rows: RwLock<BTreeMap<RowKey, StoredRow>>,
    unavailable: AtomicBool,
    fetches: AtomicUsize,
}

impl MemoryRowSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a row. The caller owns bumping `updated_at`.
    pub async fn put(&self, row: WatchedRow) {
        self.rows.write().await.insert(
            row.key,
            StoredRow {
                columns: row.columns,
                updated_at: row.updated_at,
            },
        );
    }

    pub async fn remove(&self, key: &RowKey) -> bool {
        self.rows.write().await.remove(key).is_some()
    }

    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }

    /// Simulate the source going away (or coming back).
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    /// Number of `fetch_changed` calls served so far.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RowSource for MemoryRowSource {
    fn source_type(&self) -> &'static str {
        "memory"
    }

    async fn fetch_changed(&self, query: &ChangeQuery) -> Result<Vec<WatchedRow>, SyncError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(SyncError::SourceUnavailable(format!(
                "table '{}' is unreachable",
                query.table
            )));
        }

        let rows = self.rows.read().await;
        let mut changed = Vec::new();
        for (key, stored) in rows.iter() {
            let mut columns = BTreeMap::new();
            for column in &query.columns {
                let value = stored.columns.get(column).ok_or_else(|| {
                    SyncError::Configuration(format!(
                        "column '{column}' does not exist in table '{}'",
                        query.table
                    ))
                })?;
                columns.insert(column.clone(), value.clone());
            }
            let row = WatchedRow {
                key: key.clone(),
                columns,
                updated_at: stored.updated_at,
            };
            if row.is_after(&query.since) {
                changed.push(row);
            }
        }

        changed.sort_by(|a, b| {
            a.updated_at
                .cmp(&b.updated_at)
                .then_with(|| a.key.cmp(&b.key))
        });
        changed.truncate(query.limit);
        Ok(changed)
    }
}
