//! Change detection over a [`RowSource`].
//!
//! [`ChangeDetector::detect`] yields every row positioned strictly after a
//! watermark, ascending by `(timestamp, key)`. Rows are fetched lazily in pages
//! using keyset pagination: each page starts after the last row of the previous
//! one, so the sequence never skips or repeats a row even when many rows share
//! a timestamp. The cursor lives only in memory; calling `detect` again with the
//! same watermark restarts the sequence from the beginning.

use std::collections::VecDeque;
use std::sync::Arc;

use sync_core::{ChangeQuery, RowSource, SyncError, WatchedRow, Watermark};

/// Which table and columns to watch.
#[derive(Debug, Clone, PartialEq)]
pub struct WatchTarget {
    pub table: String,
    pub key_column: String,
    pub timestamp_column: String,
    pub columns: Vec<String>,
}

#[derive(Clone)]
pub struct ChangeDetector {
    source: Arc<dyn RowSource>,
    target: WatchTarget,
    page_size: usize,
}

impl ChangeDetector {
    pub fn new(source: Arc<dyn RowSource>, target: WatchTarget, page_size: usize) -> Self {
        Self {
            source,
            target,
            page_size: page_size.max(1),
        }
    }

    pub fn target(&self) -> &WatchTarget {
        &self.target
    }

    pub fn source_type(&self) -> &'static str {
        self.source.source_type()
    }

    /// Start a change sequence after `watermark`.
    pub fn detect(&self, watermark: Watermark) -> ChangeStream {
        ChangeStream {
            detector: self.clone(),
            cursor: watermark,
            buffer: VecDeque::new(),
            exhausted: false,
        }
    }

    fn query(&self, since: Watermark) -> ChangeQuery {
        ChangeQuery {
            table: self.target.table.clone(),
            key_column: self.target.key_column.clone(),
            timestamp_column: self.target.timestamp_column.clone(),
            columns: self.target.columns.clone(),
            since,
            limit: self.page_size,
        }
    }
}

/// Lazily paged, finite sequence of changed rows.
///
/// The sequence ends at the first page shorter than the page size.
pub struct ChangeStream {
    detector: ChangeDetector,
    /// Position of the last row fetched (not yet necessarily yielded)
    cursor: Watermark,
    buffer: VecDeque<WatchedRow>,
    exhausted: bool,
}

impl ChangeStream {
    /// Next changed row, or `None` once the sequence is exhausted.
    pub async fn next(&mut self) -> Option<Result<WatchedRow, SyncError>> {
        if self.buffer.is_empty() && !self.exhausted {
            if let Err(e) = self.fill().await {
                self.exhausted = true;
                return Some(Err(e));
            }
        }
        self.buffer.pop_front().map(Ok)
    }

    /// Up to `max` next rows; an empty vector means the sequence is exhausted.
    pub async fn next_batch(&mut self, max: usize) -> Result<Vec<WatchedRow>, SyncError> {
        let mut batch = Vec::with_capacity(max);
        while batch.len() < max {
            match self.next().await {
                Some(row) => batch.push(row?),
                None => break,
            }
        }
        Ok(batch)
    }

    async fn fill(&mut self) -> Result<(), SyncError> {
        let query = self.detector.query(self.cursor.clone());
        let rows = self.detector.source.fetch_changed(&query).await?;
        tracing::debug!(
            "Fetched {} changed row(s) from {} after {}",
            rows.len(),
            self.detector.target.table,
            self.cursor
        );

        if rows.len() < query.limit {
            self.exhausted = true;
        }
        for row in rows {
            let position = row.position();
            // Guards against a source that ignores the predicate or ordering
            if position <= self.cursor {
                tracing::warn!(
                    "Source returned row {} at {} which is not after {}, skipping",
                    row.key,
                    row.updated_at,
                    self.cursor
                );
                continue;
            }
            self.cursor = position;
            self.buffer.push_back(row);
        }
        if self.buffer.is_empty() {
            self.exhausted = true;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};
    use sync_core::{MemoryRowSource, RowKey};

    fn ts(sec: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, sec).unwrap()
    }

    fn target() -> WatchTarget {
        WatchTarget {
            table: "documents".to_string(),
            key_column: "id".to_string(),
            timestamp_column: "updated_at".to_string(),
            columns: vec!["title".to_string()],
        }
    }

    async fn source_with(rows: &[(i64, u32)]) -> Arc<MemoryRowSource> {
        let source = Arc::new(MemoryRowSource::new());
        for (key, sec) in rows {
            source
                .put(WatchedRow::new(*key, ts(*sec)).with_column("title", format!("row {key}")))
                .await;
        }
        source
    }

    async fn collect(stream: &mut ChangeStream) -> Vec<(DateTime<Utc>, RowKey)> {
        let mut out = Vec::new();
        while let Some(row) = stream.next().await {
            let row = row.unwrap();
            out.push((row.updated_at, row.key));
        }
        out
    }

    #[tokio::test]
    async fn test_orders_by_timestamp_then_key() {
        let source = source_with(&[(4, 3), (3, 2), (1, 1), (2, 2)]).await;
        let detector = ChangeDetector::new(source, target(), 100);
        let rows = collect(&mut detector.detect(Watermark::default())).await;
        assert_eq!(
            rows,
            vec![
                (ts(1), RowKey::Int(1)),
                (ts(2), RowKey::Int(2)),
                (ts(2), RowKey::Int(3)),
                (ts(3), RowKey::Int(4)),
            ]
        );
    }

    #[tokio::test]
    async fn test_pages_across_shared_timestamp() {
        // Five rows at the same instant, page size two
        let source = source_with(&[(1, 5), (2, 5), (3, 5), (4, 5), (5, 5)]).await;
        let detector = ChangeDetector::new(source.clone(), target(), 2);
        let rows = collect(&mut detector.detect(Watermark::default())).await;
        let keys: Vec<_> = rows.into_iter().map(|(_, k)| k).collect();
        assert_eq!(keys, (1..=5).map(RowKey::Int).collect::<Vec<_>>());
        // 2 + 2 + 1 rows, the short page ends the sequence
        assert_eq!(source.fetch_count(), 3);
    }

    #[tokio::test]
    async fn test_restartable_from_same_watermark() {
        let source = source_with(&[(1, 1), (2, 2), (3, 3)]).await;
        let detector = ChangeDetector::new(source, target(), 2);
        let since = Watermark::at(ts(1), 1);
        let first = collect(&mut detector.detect(since.clone())).await;
        let second = collect(&mut detector.detect(since)).await;
        assert_eq!(first, second);
        assert_eq!(first.len(), 2);
    }

    #[tokio::test]
    async fn test_tie_break_keeps_later_keys() {
        let source = source_with(&[(5, 7), (7, 7)]).await;
        let detector = ChangeDetector::new(source, target(), 10);
        let rows = collect(&mut detector.detect(Watermark::at(ts(7), 5))).await;
        assert_eq!(rows, vec![(ts(7), RowKey::Int(7))]);
    }

    #[tokio::test]
    async fn test_next_batch_and_empty() {
        let source = source_with(&[(1, 1), (2, 2), (3, 3)]).await;
        let detector = ChangeDetector::new(source, target(), 10);
        let mut stream = detector.detect(Watermark::default());
        assert_eq!(stream.next_batch(2).await.unwrap().len(), 2);
        assert_eq!(stream.next_batch(2).await.unwrap().len(), 1);
        assert!(stream.next_batch(2).await.unwrap().is_empty());

        let mut after_all = detector.detect(Watermark::at(ts(3), 3));
        assert!(after_all.next().await.is_none());
    }

    #[tokio::test]
    async fn test_source_unavailable_surfaces_once() {
        let source = source_with(&[(1, 1)]).await;
        source.set_available(false);
        let detector = ChangeDetector::new(source, target(), 10);
        let mut stream = detector.detect(Watermark::default());
        assert!(matches!(
            stream.next().await,
            Some(Err(SyncError::SourceUnavailable(_)))
        ));
        assert!(stream.next().await.is_none());
    }
}
