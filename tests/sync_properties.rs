//! End-to-end behaviour of the sync pipeline over in-memory collaborators.

use std::time::Duration;

use sync_core::{ProviderError, RowKey, StateStore, SyncError, VectorSink, WatchedRow, Watermark};
use tokio_util::sync::CancellationToken;
use vector_sync::testing::{ts, Harness};
use vector_sync::{CyclePhase, PipelineOptions};

fn keys(ids: &[i64]) -> Vec<RowKey> {
    ids.iter().copied().map(RowKey::Int).collect()
}

/// Rows `doc-1..=doc-n`, row `k` modified at second `k`.
async fn seeded(batch_size: usize, n: i64) -> Harness {
    let h = Harness::new(batch_size).unwrap();
    for k in 1..=n {
        h.put(k, k, &format!("doc-{k}"), "about cats").await;
    }
    h
}

#[tokio::test]
async fn test_first_sync_then_incremental_then_update() {
    let h = seeded(2, 3).await;
    let cancel = CancellationToken::new();

    let first = h.pipeline.run_once(&cancel).await.unwrap();
    assert_eq!(first.fetched, 3);
    assert_eq!(first.upserted, 3);
    assert!(first.is_clean());
    assert_eq!(first.watermark, Watermark::at(ts(3), 3));
    assert_eq!(h.sink.count().await.unwrap(), 3);

    h.put(4, 4, "doc-4", "about dogs").await;
    let second = h.pipeline.run_once(&cancel).await.unwrap();
    assert_eq!(second.fetched, 1);
    assert_eq!(second.upserted, 1);
    assert_eq!(h.sink.count().await.unwrap(), 4);

    let before = h.sink.get(2).await.unwrap().vector;
    h.put(2, 10, "doc-2", "about submarines").await;
    let third = h.pipeline.run_once(&cancel).await.unwrap();
    assert_eq!(third.fetched, 1);
    assert_eq!(third.watermark, Watermark::at(ts(10), 2));

    let point = h.sink.get(2).await.unwrap();
    assert_ne!(point.vector, before);
    assert_eq!(
        point.vector,
        h.embeddings.expected_vector("doc-2\nabout submarines")
    );
    assert_eq!(point.payload["text"], "doc-2\nabout submarines");
    assert_eq!(point.payload["row_id"], 2);
    assert_eq!(h.sink.count().await.unwrap(), 4);

    let hits = h
        .pipeline
        .query("doc-2\nabout submarines", 2)
        .await
        .unwrap();
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].id, RowKey::Int(2));
    assert!((hits[0].score - 1.0).abs() < 1e-5);
}

#[tokio::test]
async fn test_second_run_without_changes_is_a_no_op() {
    let h = seeded(2, 3).await;
    let cancel = CancellationToken::new();
    let first = h.pipeline.run_once(&cancel).await.unwrap();
    let calls = h.embeddings.calls();

    let second = h.pipeline.run_once(&cancel).await.unwrap();
    assert!(second.is_empty());
    assert_eq!(second.upserted, 0);
    assert_eq!(second.watermark, first.watermark);
    assert!(!second.advanced());
    assert_eq!(h.embeddings.calls(), calls);
    assert_eq!(h.sink.count().await.unwrap(), 3);
    assert_eq!(h.state.history().await.len(), 1);
}

#[tokio::test]
async fn test_resume_after_restart() {
    let h = seeded(2, 3).await;
    let cancel = CancellationToken::new();
    h.pipeline.run_once(&cancel).await.unwrap();

    let h = h.restart().unwrap();
    let outcome = h.pipeline.run_once(&cancel).await.unwrap();
    assert!(outcome.is_empty());
    assert_eq!(outcome.watermark, Watermark::at(ts(3), 3));
}

#[tokio::test]
async fn test_watermark_never_decreases() {
    let h = seeded(1, 3).await;
    let cancel = CancellationToken::new();
    h.pipeline.run_once(&cancel).await.unwrap();
    h.put(4, 4, "doc-4", "about dogs").await;
    h.put(5, 5, "doc-5", "about owls").await;
    h.pipeline.run_once(&cancel).await.unwrap();
    h.pipeline.run_once(&cancel).await.unwrap();

    let history = h.state.history().await;
    assert_eq!(history.len(), 2);
    assert!(history.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(history[1], Watermark::at(ts(5), 5));
}

#[tokio::test]
async fn test_failed_row_holds_watermark_at_last_good_row() {
    let h = seeded(2, 4).await;
    let cancel = CancellationToken::new();
    h.embeddings
        .fail_when("doc-3", None, ProviderError::permanent("input rejected"))
        .await;

    let first = h.pipeline.run_once(&cancel).await.unwrap();
    assert_eq!(first.fetched, 4);
    assert_eq!(first.upserted, 3);
    assert_eq!(first.failed, 1);
    assert_eq!(first.failures.len(), 1);
    assert_eq!(first.failures[0].batch, 1);
    assert_eq!(first.failures[0].keys, keys(&[3]));
    assert_eq!(first.watermark, Watermark::at(ts(2), 2));

    h.embeddings.clear_failures().await;
    let second = h.pipeline.run_once(&cancel).await.unwrap();
    assert_eq!(second.fetched, 2);
    assert_eq!(second.upserted, 2);
    assert_eq!(second.watermark, Watermark::at(ts(4), 4));
    assert_eq!(h.sink.count().await.unwrap(), 4);
}

#[tokio::test]
async fn test_failure_in_first_batch_keeps_later_rows_but_not_the_watermark() {
    let h = seeded(2, 4).await;
    let cancel = CancellationToken::new();
    h.embeddings
        .fail_when("doc-1", None, ProviderError::permanent("bad input"))
        .await;

    let first = h.pipeline.run_once(&cancel).await.unwrap();
    assert_eq!(first.failed, 1);
    assert_eq!(first.upserted, 3);
    assert!(first.watermark.is_initial());
    assert!(!first.advanced());
    assert_eq!(h.sink.upserted().await, keys(&[2, 3, 4]));
    assert!(h.state.history().await.is_empty());

    // Rows 2 to 4 are detected again and harmlessly re-upserted
    h.embeddings.clear_failures().await;
    let second = h.pipeline.run_once(&cancel).await.unwrap();
    assert_eq!(second.fetched, 4);
    assert!(second.is_clean());
    assert_eq!(h.sink.count().await.unwrap(), 4);
    assert_eq!(second.watermark, Watermark::at(ts(4), 4));
}

#[tokio::test]
async fn test_rejected_row_does_not_sink_its_batch() {
    let h = seeded(4, 4).await;
    let cancel = CancellationToken::new();
    h.embeddings
        .fail_when("doc-2", None, ProviderError::permanent("400 input rejected"))
        .await;

    let first = h.pipeline.run_once(&cancel).await.unwrap();
    assert_eq!(first.fetched, 4);
    assert_eq!(first.batches, 1);
    assert_eq!(first.embedded, 3);
    assert_eq!(first.upserted, 3);
    assert_eq!(first.failed, 1);
    assert_eq!(first.failures.len(), 1);
    assert_eq!(first.failures[0].keys, keys(&[2]));
    assert!(first.failures[0].reason.contains("400 input rejected"));
    assert_eq!(first.watermark, Watermark::at(ts(1), 1));
    // One rejected batch call, then one call per row
    assert_eq!(h.embeddings.calls(), 5);
    assert!(h.sink.get(2).await.is_none());
    assert_eq!(h.sink.count().await.unwrap(), 3);

    // The row keeps failing on its own while its neighbours stay current
    let second = h.pipeline.run_once(&cancel).await.unwrap();
    assert_eq!(second.fetched, 3);
    assert_eq!(second.upserted, 2);
    assert_eq!(second.failures[0].keys, keys(&[2]));
    assert_eq!(second.watermark, Watermark::at(ts(1), 1));
    assert_eq!(h.state.history().await.len(), 1);

    // Editing the row clears it
    h.put(2, 20, "fixed", "about cats").await;
    let third = h.pipeline.run_once(&cancel).await.unwrap();
    assert!(third.is_clean());
    assert_eq!(third.fetched, 3);
    assert_eq!(third.watermark, Watermark::at(ts(20), 2));
    assert_eq!(h.sink.count().await.unwrap(), 4);
}

#[tokio::test]
async fn test_rows_rendering_to_empty_text_are_skipped() {
    let h = Harness::new(4).unwrap();
    h.put(1, 1, "doc-1", "about cats").await;
    h.put(2, 2, "  ", "").await;
    h.put(3, 3, "doc-3", "about cats").await;

    let outcome = h
        .pipeline
        .run_once(&CancellationToken::new())
        .await
        .unwrap();
    assert!(outcome.is_clean());
    assert_eq!(outcome.fetched, 3);
    assert_eq!(outcome.skipped, 1);
    assert_eq!(outcome.embedded, 2);
    assert_eq!(outcome.upserted, 2);
    assert_eq!(outcome.watermark, Watermark::at(ts(3), 3));
    assert_eq!(h.embeddings.calls(), 1);
    assert_eq!(h.sink.upserted().await, keys(&[1, 3]));
    assert!(h.sink.get(2).await.is_none());
}

#[tokio::test]
async fn test_batch_of_only_empty_rows_advances_watermark() {
    let h = Harness::new(2).unwrap();
    h.put(1, 1, "", "").await;
    h.put(2, 2, "", "").await;

    let outcome = h
        .pipeline
        .run_once(&CancellationToken::new())
        .await
        .unwrap();
    assert!(outcome.is_clean());
    assert_eq!(outcome.skipped, 2);
    assert_eq!(outcome.upserted, 0);
    assert_eq!(outcome.watermark, Watermark::at(ts(2), 2));
    assert_eq!(h.embeddings.calls(), 0);
    assert_eq!(h.sink.count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_tie_break_on_shared_timestamp() {
    let h = Harness::new(1).unwrap();
    h.put(5, 7, "doc-5", "same instant").await;
    h.put(7, 7, "doc-7", "same instant").await;
    h.embeddings
        .fail_when("doc-7", Some(1), ProviderError::permanent("rejected"))
        .await;
    let cancel = CancellationToken::new();

    let first = h.pipeline.run_once(&cancel).await.unwrap();
    assert_eq!(first.upserted, 1);
    assert_eq!(first.watermark, Watermark::at(ts(7), 5));

    let second = h.pipeline.run_once(&cancel).await.unwrap();
    assert_eq!(second.fetched, 1);
    assert_eq!(h.sink.upserted().await, keys(&[5, 7]));
    assert_eq!(second.watermark, Watermark::at(ts(7), 7));
}

#[tokio::test]
async fn test_transient_failure_is_retried_within_the_cycle() {
    let h = seeded(3, 3).await;
    h.embeddings
        .fail_when("doc-2", Some(1), ProviderError::transient("429 too many requests"))
        .await;

    let outcome = h
        .pipeline
        .run_once(&CancellationToken::new())
        .await
        .unwrap();
    assert!(outcome.is_clean());
    assert_eq!(outcome.upserted, 3);
    assert_eq!(h.embeddings.calls(), 2);
}

#[tokio::test]
async fn test_exhausted_retries_fail_the_batch() {
    let h = seeded(3, 3).await;
    h.embeddings
        .fail_when("doc-2", None, ProviderError::transient("503 unavailable"))
        .await;

    let outcome = h
        .pipeline
        .run_once(&CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(outcome.failed, 3);
    assert!(outcome.failures[0].reason.contains("503 unavailable"));
    // Harness policy allows two attempts
    assert_eq!(h.embeddings.calls(), 2);
    assert_eq!(h.sink.count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_store_failure_is_isolated_to_its_batch() {
    let h = seeded(2, 4).await;
    h.sink.reject(4).await;
    let cancel = CancellationToken::new();

    let outcome = h.pipeline.run_once(&cancel).await.unwrap();
    assert_eq!(outcome.embedded, 4);
    assert_eq!(outcome.upserted, 2);
    assert_eq!(outcome.failed, 2);
    assert_eq!(outcome.watermark, Watermark::at(ts(2), 2));

    h.sink.accept_all().await;
    let retry = h.pipeline.run_once(&cancel).await.unwrap();
    assert_eq!(retry.fetched, 2);
    assert!(retry.is_clean());
}

#[tokio::test]
async fn test_reupserting_does_not_duplicate_points() {
    let h = seeded(2, 3).await;
    let cancel = CancellationToken::new();
    h.pipeline.run_once(&cancel).await.unwrap();
    h.pipeline.reset(None).await.unwrap();
    let again = h.pipeline.run_once(&cancel).await.unwrap();
    assert_eq!(again.upserted, 3);
    assert_eq!(h.sink.count().await.unwrap(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_batches_upsert_in_order() {
    let options = PipelineOptions {
        batch_size: 1,
        concurrency: 3,
        ..PipelineOptions::default()
    };
    let h = Harness::with_options(options, 100).unwrap();
    for k in 1..=6 {
        h.put(k, k, &format!("doc-{k}"), "about cats").await;
    }
    // The first batches finish last
    h.embeddings
        .delay_when("doc-1", Duration::from_millis(300))
        .await;
    h.embeddings
        .delay_when("doc-2", Duration::from_millis(200))
        .await;

    let outcome = h
        .pipeline
        .run_once(&CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(outcome.batches, 6);
    assert_eq!(h.sink.upserted().await, keys(&[1, 2, 3, 4, 5, 6]));
    assert_eq!(outcome.watermark, Watermark::at(ts(6), 6));
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_failure_freezes_watermark() {
    let options = PipelineOptions {
        batch_size: 1,
        concurrency: 2,
        ..PipelineOptions::default()
    };
    let h = Harness::with_options(options, 100).unwrap();
    for k in 1..=4 {
        h.put(k, k, &format!("doc-{k}"), "about cats").await;
    }
    h.embeddings
        .fail_when("doc-2", Some(1), ProviderError::permanent("rejected"))
        .await;

    let outcome = h
        .pipeline
        .run_once(&CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(outcome.failed, 1);
    assert_eq!(outcome.upserted, 3);
    assert_eq!(outcome.watermark, Watermark::at(ts(1), 1));
}

#[tokio::test]
async fn test_state_save_failure_fails_the_cycle() {
    let h = seeded(2, 3).await;
    h.state.fail_saves(true);
    let cancel = CancellationToken::new();

    let err = h.pipeline.run_once(&cancel).await.unwrap_err();
    assert!(matches!(err, SyncError::StateStore(_)));
    assert!(matches!(h.pipeline.phase(), CyclePhase::Failed(_)));
    assert!(h.state.load().await.unwrap().is_initial());
    // Vectors already written stay; the rows are simply processed again
    assert_eq!(h.sink.count().await.unwrap(), 3);

    h.state.fail_saves(false);
    let retry = h.pipeline.run_once(&cancel).await.unwrap();
    assert_eq!(retry.fetched, 3);
    assert_eq!(h.sink.count().await.unwrap(), 3);
    assert_eq!(h.pipeline.phase(), CyclePhase::Idle);
}

#[tokio::test]
async fn test_source_unavailable_aborts_without_side_effects() {
    let h = seeded(2, 3).await;
    h.source.set_available(false);

    let err = h
        .pipeline
        .run_once(&CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::SourceUnavailable(_)));
    assert!(err.is_cycle_fatal());
    assert_eq!(h.embeddings.calls(), 0);
    assert_eq!(h.sink.count().await.unwrap(), 0);
    assert!(h.state.history().await.is_empty());
}

#[tokio::test]
async fn test_missing_column_aborts_the_cycle() {
    let h = Harness::new(2).unwrap();
    h.source
        .put(WatchedRow::new(1, ts(1)).with_column("title", "no content column"))
        .await;

    let err = h
        .pipeline
        .run_once(&CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Configuration(_)));
    assert!(err.stops_watch());
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_finishes_in_flight_batch() {
    let h = seeded(2, 6).await;
    h.embeddings
        .delay_when("doc-1", Duration::from_millis(100))
        .await;
    let cancel = CancellationToken::new();

    let stop = async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
    };
    let (outcome, ()) = tokio::join!(h.pipeline.run_once(&cancel), stop);
    let outcome = outcome.unwrap();
    assert!(outcome.interrupted);
    assert_eq!(outcome.upserted, 2);
    assert_eq!(outcome.watermark, Watermark::at(ts(2), 2));
    assert_eq!(h.state.load().await.unwrap(), Watermark::at(ts(2), 2));

    let rest = h
        .pipeline
        .run_once(&CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(rest.fetched, 4);
    assert!(!rest.interrupted);
}

#[tokio::test(start_paused = true)]
async fn test_watch_polls_until_cancelled() {
    let h = seeded(2, 3).await;
    let cancel = CancellationToken::new();

    // Poll interval is one second: cycles at 0s, 1s and 2s
    let stop = async {
        tokio::time::sleep(Duration::from_millis(2500)).await;
        cancel.cancel();
    };
    let (report, ()) = tokio::join!(h.pipeline.watch(&cancel), stop);
    let report = report.unwrap();
    assert_eq!(report.cycles, 3);
    assert_eq!(report.failed_cycles, 0);
    assert_eq!(report.fetched, 3);
    assert_eq!(report.upserted, 3);
    assert_eq!(report.watermark, Watermark::at(ts(3), 3));
}

#[tokio::test(start_paused = true)]
async fn test_watch_survives_source_outage() {
    let h = seeded(2, 3).await;
    h.source.set_available(false);
    let cancel = CancellationToken::new();

    let stop = async {
        tokio::time::sleep(Duration::from_millis(1500)).await;
        h.source.set_available(true);
        tokio::time::sleep(Duration::from_millis(1000)).await;
        cancel.cancel();
    };
    let (report, ()) = tokio::join!(h.pipeline.watch(&cancel), stop);
    let report = report.unwrap();
    assert_eq!(report.cycles, 3);
    assert_eq!(report.failed_cycles, 2);
    assert_eq!(report.upserted, 3);
}

#[tokio::test(start_paused = true)]
async fn test_watch_stops_on_configuration_error() {
    let h = Harness::new(2).unwrap();
    h.source
        .put(WatchedRow::new(1, ts(1)).with_column("title", "no content column"))
        .await;

    let result = tokio::time::timeout(
        Duration::from_secs(60),
        h.pipeline.watch(&CancellationToken::new()),
    )
    .await
    .expect("watch should stop by itself");
    assert!(matches!(result, Err(SyncError::Configuration(_))));
}

#[tokio::test]
async fn test_status_and_reset() {
    let h = seeded(2, 3).await;
    h.pipeline
        .run_once(&CancellationToken::new())
        .await
        .unwrap();

    let status = h.pipeline.status().await.unwrap();
    assert_eq!(status.points, 3);
    assert_eq!(status.watermark, Watermark::at(ts(3), 3));

    let moved = h
        .pipeline
        .reset(Some(Watermark::at(ts(1), 1)))
        .await
        .unwrap();
    assert_eq!(h.state.load().await.unwrap(), moved);
    let outcome = h
        .pipeline
        .run_once(&CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(outcome.fetched, 2);

    h.pipeline.reset(None).await.unwrap();
    assert!(h.state.load().await.unwrap().is_initial());
}
