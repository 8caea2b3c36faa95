//! Local vector store.
//!
//! Scores every point on each query, which is fine for the table sizes a
//! single-node sync tool targets. With a path configured, the full point set
//! is rewritten as a JSON snapshot after every batch.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sync_core::{sanitize_file_stem, RowKey, ScoredPoint, SyncError, VectorPoint, VectorSink};
use tempfile::NamedTempFile;
use tokio::sync::RwLock;

use crate::Distance;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct StoredPoint {
    vector: Vec<f32>,
    payload: Map<String, Value>,
}

#[derive(Serialize, Deserialize)]
struct Snapshot {
    collection: String,
    distance: Distance,
    points: Vec<SnapshotPoint>,
}

#[derive(Serialize, Deserialize)]
struct SnapshotPoint {
    id: RowKey,
    vector: Vec<f32>,
    payload: Map<String, Value>,
}

pub struct LocalVectorStore {
    collection: String,
    distance: Distance,
    path: Option<PathBuf>,
    points: RwLock<BTreeMap<RowKey, StoredPoint>>,
    unavailable: AtomicBool,
}

impl LocalVectorStore {
    /// Store that lives only as long as the process.
    pub fn in_memory(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            distance: Distance::Cosine,
            path: None,
            points: RwLock::new(BTreeMap::new()),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Open (or create on first write) the snapshot `{dir}/{collection}.json`.
    ///
    /// The file stem is the collection name with anything outside
    /// `[A-Za-z0-9_-]` replaced by `_`, the same rule the watermark store uses.
    pub fn open(dir: impl AsRef<Path>, collection: impl Into<String>) -> Result<Self, SyncError> {
        let collection = collection.into();
        let path = dir
            .as_ref()
            .join(format!("{}.json", sanitize_file_stem(&collection)));
        let mut store = Self::in_memory(collection);

        match std::fs::read_to_string(&path) {
            Ok(content) => {
                let snapshot: Snapshot = serde_json::from_str(&content).map_err(|e| {
                    SyncError::StoreUnavailable(format!(
                        "corrupt vector snapshot {}: {e}",
                        path.display()
                    ))
                })?;
                store.distance = snapshot.distance;
                let points = snapshot
                    .points
                    .into_iter()
                    .map(|p| {
                        (
                            p.id,
                            StoredPoint {
                                vector: p.vector,
                                payload: p.payload,
                            },
                        )
                    })
                    .collect();
                store.points = RwLock::new(points);
                tracing::debug!("Loaded vector snapshot {}", path.display());
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(SyncError::StoreUnavailable(format!(
                    "failed to read {}: {e}",
                    path.display()
                )))
            }
        }

        store.path = Some(path);
        Ok(store)
    }

    pub fn with_distance(mut self, distance: Distance) -> Self {
        self.distance = distance;
        self
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Simulate the store going away (or coming back).
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    pub async fn get(&self, id: &RowKey) -> Option<VectorPoint> {
        self.points.read().await.get(id).map(|p| VectorPoint {
            id: id.clone(),
            vector: p.vector.clone(),
            payload: p.payload.clone(),
        })
    }

    fn check_available(&self) -> Result<(), SyncError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(SyncError::StoreUnavailable(format!(
                "collection '{}' is unreachable",
                self.collection
            )));
        }
        Ok(())
    }

    fn persist(&self, points: &BTreeMap<RowKey, StoredPoint>) -> Result<(), SyncError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let snapshot = Snapshot {
            collection: self.collection.clone(),
            distance: self.distance,
            points: points
                .iter()
                .map(|(id, p)| SnapshotPoint {
                    id: id.clone(),
                    vector: p.vector.clone(),
                    payload: p.payload.clone(),
                })
                .collect(),
        };
        let content = serde_json::to_vec(&snapshot).map_err(|e| {
            SyncError::StoreUnavailable(format!("failed to serialize vector snapshot: {e}"))
        })?;
        write_atomic(path, &content).map_err(|e| {
            SyncError::StoreUnavailable(format!("failed to write {}: {e}", path.display()))
        })
    }
}

#[async_trait]
impl VectorSink for LocalVectorStore {
    async fn upsert_batch(&self, points: &[VectorPoint]) -> Result<(), SyncError> {
        self.check_available()?;
        let mut guard = self.points.write().await;

        let expected = guard
            .values()
            .next()
            .map(|p| p.vector.len())
            .or_else(|| points.first().map(|p| p.vector.len()));
        if let Some(dim) = expected {
            if let Some(bad) = points.iter().find(|p| p.vector.len() != dim) {
                return Err(SyncError::StoreUnavailable(format!(
                    "vector for {} has {} dimensions, collection '{}' expects {dim}",
                    bad.id,
                    bad.vector.len(),
                    self.collection
                )));
            }
        }

        let mut next = guard.clone();
        for point in points {
            next.insert(
                point.id.clone(),
                StoredPoint {
                    vector: point.vector.clone(),
                    payload: point.payload.clone(),
                },
            );
        }
        self.persist(&next)?;
        *guard = next;
        Ok(())
    }

    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<ScoredPoint>, SyncError> {
        self.check_available()?;
        let points = self.points.read().await;
        let mut scored: Vec<ScoredPoint> = points
            .iter()
            .map(|(id, p)| ScoredPoint {
                id: id.clone(),
                score: self.distance.score(vector, &p.vector),
                payload: p.payload.clone(),
            })
            .collect();
        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        scored.truncate(k);
        Ok(scored)
    }

    async fn count(&self) -> Result<usize, SyncError> {
        self.check_available()?;
        Ok(self.points.read().await.len())
    }
}

fn write_atomic(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(content)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
