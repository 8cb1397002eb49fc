//! Row types and insert helpers for ClickHouse.

use crate::client::ClickHouseClient;
use crate::sink::QuarantineRecord;
use chrono::{DateTime, Utc};
use clickhouse::Row;
use engine_core::{EnrichedRecord, Error, Result};
use serde::{Deserialize, Serialize};
use telemetry::MetricsSnapshot;
use tracing::debug;

/// Row in `orders_enriched_staging`.
#[derive(Debug, Clone, Row, Serialize, Deserialize)]
pub struct StagingRow {
    pub batch_id: String,
    /// Unique per write attempt, so a retried batch never picks up rows
    /// staged by an earlier attempt.
    pub attempt_id: String,
    pub order_id: String,
    pub event_key: String,
    pub event_id: Option<String>,
    pub event_time: i64, // DateTime64(3) as milliseconds
    pub customer_id: String,
    pub restaurant_id: String,
    pub order_status: String,
    pub order_value: f64,
    pub item_count: u32,
    pub customer_name: Option<String>,
    pub customer_tier: Option<String>,
    pub restaurant_name: Option<String>,
    pub cuisine: Option<String>,
    pub city: Option<String>,
    pub reference_version: u64,
    pub version: u64,
}

impl StagingRow {
    pub fn from_record(batch_id: &str, attempt_id: &str, record: &EnrichedRecord) -> Self {
        let millis = record.event_time.timestamp_millis();
        Self {
            batch_id: batch_id.to_string(),
            attempt_id: attempt_id.to_string(),
            order_id: record.order_id.clone(),
            event_key: record.event_key.clone(),
            event_id: record.event_id.clone(),
            event_time: millis,
            customer_id: record.customer_id.clone(),
            restaurant_id: record.restaurant_id.clone(),
            order_status: record.order_status.clone(),
            order_value: record.order_value,
            item_count: record.item_count,
            customer_name: record.customer_name.clone(),
            customer_tier: record.customer_tier.clone(),
            restaurant_name: record.restaurant_name.clone(),
            cuisine: record.cuisine.clone(),
            city: record.city.clone(),
            reference_version: record.reference_version,
            version: event_version(record.event_time),
        }
    }
}

/// Merge version of an order row: event time in nanoseconds, so the later
/// event wins. Equal versions fall back to the most recent insert. Times
/// before the epoch sort first, times past the nanosecond range sort last.
pub fn event_version(event_time: DateTime<Utc>) -> u64 {
    match event_time.timestamp_nanos_opt() {
        Some(nanos) => u64::try_from(nanos).unwrap_or(0),
        None if event_time.timestamp() > 0 => u64::MAX,
        None => 0,
    }
}

/// Row in `orders_quarantine`.
#[derive(Debug, Clone, Row, Serialize, Deserialize)]
pub struct QuarantineRow {
    pub event_key: String,
    pub order_id: String,
    pub event_time: i64,
    pub reason: String,
    pub payload: String,
    pub batch_id: String,
    pub quarantined_at: i64,
}

impl QuarantineRow {
    pub fn from_record(batch_id: &str, record: &QuarantineRecord) -> Self {
        Self {
            event_key: record.event_key.clone(),
            order_id: record.order_id.clone(),
            event_time: record.event_time.timestamp_millis(),
            reason: record.reason.clone(),
            payload: record.payload.clone(),
            batch_id: batch_id.to_string(),
            quarantined_at: chrono::Utc::now().timestamp_millis(),
        }
    }
}

/// Row in `pipeline_metrics`.
#[derive(Debug, Clone, Row, Serialize)]
pub struct MetricsRow {
    pub timestamp: i64,
    pub records_polled: u64,
    pub records_malformed: u64,
    pub records_novel: u64,
    pub records_duplicate: u64,
    pub records_late_dropped: u64,
    pub enrichment_misses: u64,
    pub records_quarantined: u64,
    pub rows_written: u64,
    pub sink_write_errors: u64,
    pub batches_committed: u64,
    pub runs_succeeded: u64,
    pub runs_failed: u64,
    pub runs_rejected: u64,
    pub batch_latency_mean_ms: f64,
    pub sink_latency_mean_ms: f64,
    pub checkpoint_latency_mean_ms: f64,
    pub watermark_ms: i64,
    pub dedup_state_size: i64,
    pub source_paused: u8,
}

impl From<MetricsSnapshot> for MetricsRow {
    fn from(snapshot: MetricsSnapshot) -> Self {
        Self {
            timestamp: snapshot.timestamp.timestamp_millis(),
            records_polled: snapshot.records_polled,
            records_malformed: snapshot.records_malformed,
            records_novel: snapshot.records_novel,
            records_duplicate: snapshot.records_duplicate,
            records_late_dropped: snapshot.records_late_dropped,
            enrichment_misses: snapshot.enrichment_misses,
            records_quarantined: snapshot.records_quarantined,
            rows_written: snapshot.rows_written,
            sink_write_errors: snapshot.sink_write_errors,
            batches_committed: snapshot.batches_committed,
            runs_succeeded: snapshot.runs_succeeded,
            runs_failed: snapshot.runs_failed,
            runs_rejected: snapshot.runs_rejected,
            batch_latency_mean_ms: snapshot.batch_latency_mean_ms,
            sink_latency_mean_ms: snapshot.sink_latency_mean_ms,
            checkpoint_latency_mean_ms: snapshot.checkpoint_latency_mean_ms,
            watermark_ms: snapshot.watermark_ms,
            dedup_state_size: snapshot.dedup_state_size,
            source_paused: if snapshot.source_paused { 1 } else { 0 },
        }
    }
}

/// Insert `rows` into `table` in a single INSERT.
pub async fn insert_rows<T>(client: &ClickHouseClient, table: &str, rows: &[T]) -> Result<usize>
where
    T: Row + Serialize,
{
    if rows.is_empty() {
        return Ok(0);
    }

    let mut insert = client
        .inner()
        .insert::<T>(table)
        .map_err(|e| Error::sink(format!("insert into {} failed: {}", table, e)))?;

    for row in rows {
        insert
            .write(row)
            .await
            .map_err(|e| Error::sink(format!("write to {} failed: {}", table, e)))?;
    }

    insert
        .end()
        .await
        .map_err(|e| Error::sink(format!("insert into {} not confirmed: {}", table, e)))?;

    debug!(table, rows = rows.len(), "Inserted rows");
    Ok(rows.len())
}

/// Insert a metrics snapshot.
pub async fn insert_metrics(client: &ClickHouseClient, snapshot: MetricsSnapshot) -> Result<()> {
    let row = MetricsRow::from(snapshot);
    insert_rows(client, &client.table("pipeline_metrics"), &[row]).await?;
    Ok(())
}
