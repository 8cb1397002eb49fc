//! ClickHouse sink against a real server.
//!
//! Requires Docker to be running for testcontainers, or
//! PIPELINE_TEST_CLICKHOUSE_URL pointing at an existing server.

use clickhouse_client::{
    count_orders, count_quarantined, fetch_order, truncate_orders, ClickHouseSink,
    QuarantineRecord, WarehouseSink,
};
use engine_core::EnrichedRecord;
use integration_tests::fixtures::order_event;
use integration_tests::setup::ClickHouseContext;

fn enriched(event_id: &str, order_id: &str, secs: i64, status: &str) -> EnrichedRecord {
    enriched_with(event_id, order_id, secs, status, "Ada")
}

fn enriched_with(
    event_id: &str,
    order_id: &str,
    secs: i64,
    status: &str,
    customer: &str,
) -> EnrichedRecord {
    let mut event = order_event(event_id, order_id, secs);
    event.payload.order_status = status.to_string();
    let mut record = EnrichedRecord::unmatched(&event, 1);
    record.customer_name = Some(customer.into());
    record.restaurant_name = Some("Noodle Bar".into());
    record
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_repeated_batch_leaves_one_row_per_order() {
    let ctx = ClickHouseContext::new().await;
    truncate_orders(&ctx.clickhouse).await.unwrap();
    let sink = ClickHouseSink::new(ctx.clickhouse.clone());

    let batch = vec![
        enriched("e1", "o1", 10, "placed"),
        enriched("e2", "o2", 12, "placed"),
    ];

    let first = sink.write_batch("b-1", &batch).await.unwrap();
    assert_eq!(first.rows_written, 2);
    sink.write_batch("b-1", &batch).await.unwrap();

    assert_eq!(count_orders(&ctx.clickhouse).await.unwrap(), 2);

    let row = fetch_order(&ctx.clickhouse, "o1").await.unwrap().unwrap();
    assert_eq!(row.order_status, "placed");
    assert_eq!(row.customer_name.as_deref(), Some("Ada"));
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_replayed_batch_applies_only_its_own_rows() {
    let ctx = ClickHouseContext::new().await;
    truncate_orders(&ctx.clickhouse).await.unwrap();
    let sink = ClickHouseSink::new(ctx.clickhouse.clone());

    // Same batch id and event, enriched against newer reference data on
    // the second attempt.
    sink.write_batch("b-1", &[enriched_with("e1", "o1", 10, "placed", "Ada")])
        .await
        .unwrap();
    sink.write_batch("b-1", &[enriched_with("e1", "o1", 10, "placed", "Ada L.")])
        .await
        .unwrap();

    assert_eq!(count_orders(&ctx.clickhouse).await.unwrap(), 1);
    let row = fetch_order(&ctx.clickhouse, "o1").await.unwrap().unwrap();
    assert_eq!(row.customer_name.as_deref(), Some("Ada L."));
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_newer_event_in_same_millisecond_wins() {
    let ctx = ClickHouseContext::new().await;
    truncate_orders(&ctx.clickhouse).await.unwrap();
    let sink = ClickHouseSink::new(ctx.clickhouse.clone());

    let placed = enriched("e1", "o1", 10, "placed");
    let mut delivered = enriched("e2", "o1", 10, "delivered");
    delivered.event_time = placed.event_time + chrono::Duration::microseconds(200);

    sink.write_batch("b-1", &[delivered]).await.unwrap();
    sink.write_batch("b-2", &[placed]).await.unwrap();

    let row = fetch_order(&ctx.clickhouse, "o1").await.unwrap().unwrap();
    assert_eq!(row.order_status, "delivered");
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_newer_event_replaces_order_row() {
    let ctx = ClickHouseContext::new().await;
    truncate_orders(&ctx.clickhouse).await.unwrap();
    let sink = ClickHouseSink::new(ctx.clickhouse.clone());

    sink.write_batch("b-1", &[enriched("e1", "o1", 10, "placed")])
        .await
        .unwrap();
    sink.write_batch("b-2", &[enriched("e2", "o1", 40, "delivered")])
        .await
        .unwrap();

    assert_eq!(count_orders(&ctx.clickhouse).await.unwrap(), 1);
    let row = fetch_order(&ctx.clickhouse, "o1").await.unwrap().unwrap();
    assert_eq!(row.order_status, "delivered");
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_quarantine_is_idempotent_per_event() {
    let ctx = ClickHouseContext::new().await;
    truncate_orders(&ctx.clickhouse).await.unwrap();
    let sink = ClickHouseSink::new(ctx.clickhouse.clone());

    let event = order_event("e9", "o9", 10);
    let records = vec![QuarantineRecord {
        event_key: "e9".into(),
        order_id: "o9".into(),
        event_time: event.event_time,
        reason: "unknown customer c404".into(),
        payload: serde_json::to_string(&event).unwrap(),
    }];

    sink.write_quarantine("b-1", &records).await.unwrap();
    sink.write_quarantine("b-1", &records).await.unwrap();

    assert_eq!(count_quarantined(&ctx.clickhouse).await.unwrap(), 1);
    assert!(fetch_order(&ctx.clickhouse, "o9").await.unwrap().is_none());
}
