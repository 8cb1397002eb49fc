//! End-to-end pipeline tests over the in-memory source, warehouse and
//! checkpoint store.

use engine_core::Error;
use integration_tests::fixtures::{order_event, order_event_for};
use integration_tests::setup::{pipeline_config, PipelineHarness};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use worker::{MissPolicy, StreamingJob};

#[tokio::test]
async fn test_duplicate_in_batch_is_emitted_once() {
    let harness = PipelineHarness::new(pipeline_config(20, 5));
    harness.source.push(0, &order_event("A", "order-a", 10));
    harness.source.push(0, &order_event("A", "order-a", 10));
    harness.source.push(1, &order_event("B", "order-b", 12));

    let report = harness.pipeline.run_once().await.unwrap();

    assert_eq!(report.polled, 3);
    assert_eq!(report.novel, 2);
    assert_eq!(report.duplicates, 1);
    assert_eq!(report.written, 2);
    assert_eq!(harness.warehouse.row_count(), 2);
    assert_eq!(report.batch_id.as_deref(), Some("orders-test-1"));
}

#[tokio::test]
async fn test_record_behind_watermark_is_late_dropped() {
    let harness = PipelineHarness::new(pipeline_config(20, 5));
    harness.source.push(0, &order_event("X", "order-x", 55));
    harness.pipeline.run_once().await.unwrap();

    harness.source.push(0, &order_event("C", "order-c", 1));
    let report = harness.pipeline.run_once().await.unwrap();

    assert_eq!(report.late_dropped, 1);
    assert_eq!(report.novel, 0);
    assert!(harness.warehouse.row("order-c").is_none());
    assert_eq!(harness.source.committed(0), Some(2));
}

#[tokio::test]
async fn test_enrichment_joins_reference_attributes() {
    let harness = PipelineHarness::new(pipeline_config(600, 30));
    harness.source.push(0, &order_event_for("e1", "o1", 10, "c1", "r1"));

    harness.pipeline.run_once().await.unwrap();

    let row = harness.warehouse.row("o1").unwrap();
    assert_eq!(row.customer_name.as_deref(), Some("Ada"));
    assert_eq!(row.restaurant_name.as_deref(), Some("Noodle Bar"));
    assert_eq!(row.city.as_deref(), Some("Lisbon"));
}

#[tokio::test]
async fn test_reference_miss_is_quarantined_by_default() {
    let harness = PipelineHarness::new(pipeline_config(600, 30));
    harness.source.push(0, &order_event_for("e1", "o1", 10, "c1", "r1"));
    harness.source.push(0, &order_event_for("e2", "o2", 11, "c404", "r1"));

    let report = harness.pipeline.run_once().await.unwrap();

    assert_eq!(report.written, 1);
    assert_eq!(report.quarantined, 1);
    let quarantined = harness.warehouse.quarantined();
    assert_eq!(quarantined.len(), 1);
    assert_eq!(quarantined[0].order_id, "o2");
    assert_eq!(quarantined[0].reason, "unknown customer c404");
}

#[tokio::test]
async fn test_null_fill_policy_writes_partial_rows() {
    let mut config = pipeline_config(600, 30);
    config.miss_policy = MissPolicy::NullFill;
    let harness = PipelineHarness::new(config);
    harness.source.push(0, &order_event_for("e1", "o1", 10, "c1", "r404"));

    harness.pipeline.run_once().await.unwrap();

    let row = harness.warehouse.row("o1").unwrap();
    assert_eq!(row.customer_name.as_deref(), Some("Ada"));
    assert_eq!(row.restaurant_name, None);
    assert!(harness.warehouse.quarantined().is_empty());
}

#[tokio::test]
async fn test_malformed_records_are_skipped_and_committed() {
    let harness = PipelineHarness::new(pipeline_config(600, 30));
    harness.source.push_raw(0, Some(b"{not json".to_vec()));
    harness.source.push_raw(0, None);
    harness.source.push(0, &order_event("e1", "o1", 10));

    let report = harness.pipeline.run_once().await.unwrap();

    assert_eq!(report.malformed, 2);
    assert_eq!(report.written, 1);
    assert_eq!(harness.source.committed(0), Some(3));
}

#[tokio::test]
async fn test_failed_checkpoint_replays_batch_without_duplicates() {
    let harness = PipelineHarness::new(pipeline_config(600, 30));
    harness.source.push(0, &order_event("e1", "o1", 10));
    harness.source.push(1, &order_event("e2", "o2", 12));

    // Rows land, the checkpoint does not: offsets stay uncommitted.
    harness.checkpoints.fail_next_saves(1);
    let err = harness.pipeline.run_once().await.unwrap_err();
    assert!(matches!(err, Error::Checkpoint(_)));
    assert_eq!(harness.source.committed(0), None);
    let before = harness.warehouse.rows();

    // The retry re-reads the same records and classifies them as novel
    // again, because the dedup state rolled back with the checkpoint.
    let report = harness.pipeline.run_once().await.unwrap();
    assert_eq!(report.novel, 2);
    assert_eq!(report.batch_id.as_deref(), Some("orders-test-1"));

    assert_eq!(harness.warehouse.rows(), before);
    assert_eq!(harness.warehouse.row_count(), 2);
    assert_eq!(
        harness.warehouse.committed_batches(),
        vec!["orders-test-1".to_string(), "orders-test-1".to_string()]
    );
    assert_eq!(harness.source.committed(0), Some(1));
    assert_eq!(harness.source.committed(1), Some(1));
    assert_eq!(harness.checkpoints.save_count(), 1);
}

#[tokio::test]
async fn test_sink_retries_then_succeeds() {
    let harness = PipelineHarness::new(pipeline_config(600, 30));
    harness.source.push(0, &order_event("e1", "o1", 10));
    harness.warehouse.fail_next_writes(2);

    let report = harness.pipeline.run_once().await.unwrap();

    assert_eq!(report.written, 1);
    assert_eq!(harness.warehouse.write_calls(), 3);
}

#[tokio::test]
async fn test_sink_exhaustion_is_fatal_and_keeps_offsets() {
    let harness = PipelineHarness::new(pipeline_config(600, 30));
    harness.source.push(0, &order_event("e1", "o1", 10));
    harness.warehouse.fail_next_writes(3);

    let err = harness.pipeline.run_once().await.unwrap_err();

    assert!(err.is_fatal());
    match err {
        Error::SinkExhausted {
            batch_id,
            records,
            attempts,
            ..
        } => {
            assert_eq!(batch_id, "orders-test-1");
            assert_eq!(records, 1);
            assert_eq!(attempts, 3);
        }
        other => panic!("expected SinkExhausted, got {other:?}"),
    }
    assert_eq!(harness.source.committed(0), None);
    assert_eq!(harness.checkpoints.save_count(), 0);

    let report = harness.pipeline.run_once().await.unwrap();
    assert_eq!(report.written, 1);
}

#[tokio::test]
async fn test_quarantine_write_retries_then_succeeds() {
    let harness = PipelineHarness::new(pipeline_config(600, 30));
    harness.source.push(0, &order_event_for("e1", "o1", 10, "c404", "r1"));
    harness.warehouse.fail_next_quarantine_writes(2);

    let report = harness.pipeline.run_once().await.unwrap();

    assert_eq!(report.quarantined, 1);
    assert_eq!(harness.warehouse.quarantined().len(), 1);
    assert_eq!(harness.source.committed(0), Some(1));
}

#[tokio::test]
async fn test_quarantine_exhaustion_is_fatal_and_keeps_offsets() {
    let harness = PipelineHarness::new(pipeline_config(600, 30));
    harness.source.push(0, &order_event_for("e1", "o1", 10, "c404", "r1"));
    harness.warehouse.fail_next_quarantine_writes(u32::MAX);

    let err = harness.pipeline.run_once().await.unwrap_err();

    assert!(err.is_fatal());
    match err {
        Error::SinkExhausted {
            batch_id,
            records,
            attempts,
            ..
        } => {
            assert_eq!(batch_id, "orders-test-1");
            assert_eq!(records, 1);
            assert_eq!(attempts, 3);
        }
        other => panic!("expected SinkExhausted, got {other:?}"),
    }
    assert_eq!(harness.source.committed(0), None);
    assert_eq!(harness.checkpoints.save_count(), 0);

    let err = harness
        .pipeline
        .run(CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::SinkExhausted { .. }));
}

#[tokio::test]
async fn test_saturated_partition_does_not_starve_others() {
    let mut config = pipeline_config(20, 5);
    config.max_batch_records = 2;
    let harness = PipelineHarness::new(config);
    harness.source.push(1, &order_event("p1", "order-p1", 1));

    for round in 0..20i64 {
        harness
            .source
            .push(0, &order_event(&format!("a{round}"), &format!("o{round}a"), 10 + round * 10));
        harness
            .source
            .push(0, &order_event(&format!("b{round}"), &format!("o{round}b"), 10 + round * 10));
        harness.pipeline.run_once().await.unwrap();
    }

    assert_eq!(harness.source.committed(1), Some(1));
    assert!(harness.warehouse.row("order-p1").is_some());
}

#[tokio::test]
async fn test_restart_resumes_from_checkpoint() {
    let mut harness = PipelineHarness::new(pipeline_config(600, 30));
    harness.source.push(0, &order_event("e1", "o1", 10));
    harness.source.push(0, &order_event("e2", "o2", 20));
    harness.pipeline.run_once().await.unwrap();

    harness.restart();
    harness.pipeline.recover().await.unwrap();
    assert_eq!(harness.pipeline.sequence().await, 1);

    // A producer retry redelivers e1 at a new offset alongside a new event.
    harness.source.push(0, &order_event("e1", "o1", 10));
    harness.source.push(0, &order_event("e3", "o3", 30));
    let report = harness.pipeline.run_once().await.unwrap();

    assert_eq!(report.polled, 2);
    assert_eq!(report.duplicates, 1);
    assert_eq!(report.novel, 1);
    assert_eq!(report.batch_id.as_deref(), Some("orders-test-2"));
    assert_eq!(harness.warehouse.row_count(), 3);
    assert_eq!(harness.source.committed(0), Some(4));
}

#[tokio::test]
async fn test_newer_event_for_same_order_replaces_row() {
    let harness = PipelineHarness::new(pipeline_config(600, 30));
    let mut placed = order_event("e1", "o1", 10);
    placed.payload.order_status = "placed".into();
    let mut delivered = order_event("e2", "o1", 40);
    delivered.payload.order_status = "delivered".into();

    harness.source.push(0, &placed);
    harness.pipeline.run_once().await.unwrap();
    harness.source.push(0, &delivered);
    harness.pipeline.run_once().await.unwrap();

    assert_eq!(harness.warehouse.row_count(), 1);
    assert_eq!(harness.warehouse.row("o1").unwrap().order_status, "delivered");
}

#[tokio::test]
async fn test_corrupt_checkpoint_refuses_to_start() {
    let harness = PipelineHarness::new(pipeline_config(600, 30));
    harness
        .checkpoints
        .put_raw("orders-test", b"{\"version\": 1, \"pipeline_id\": ".to_vec());
    harness.source.push(0, &order_event("e1", "o1", 10));

    let err = harness.pipeline.recover().await.unwrap_err();
    assert!(matches!(err, Error::StateCorruption(_)));

    let err = harness
        .pipeline
        .run(CancellationToken::new())
        .await
        .unwrap_err();
    assert!(err.is_fatal());
    assert_eq!(harness.warehouse.row_count(), 0);
}

#[tokio::test]
async fn test_run_pauses_on_source_outage_and_resumes() {
    let harness = PipelineHarness::new(pipeline_config(600, 30));
    harness.source.push(0, &order_event("e1", "o1", 10));
    harness.source.fail_next_polls(2);

    let cancel = CancellationToken::new();
    let pipeline = harness.pipeline.clone();
    let token = cancel.clone();
    let job = tokio::spawn(async move { pipeline.run(token).await });

    let mut written = false;
    for _ in 0..200 {
        if harness.warehouse.row("o1").is_some() {
            written = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    cancel.cancel();

    job.await.unwrap().unwrap();
    assert!(written);
    assert!(harness.source.poll_count() >= 3);
}
