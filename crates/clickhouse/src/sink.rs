//! Warehouse sink.
//!
//! A batch is committed in three steps:
//! 1. rows are inserted into `orders_enriched_staging` tagged with the batch id
//!    and a fresh attempt id
//! 2. one `INSERT … SELECT` moves that attempt's rows into `orders_enriched`
//! 3. the staged rows are deleted
//!
//! Deletes are asynchronous mutations, so rows from an earlier attempt of
//! the same batch may still be staged; keying apply on the attempt id keeps
//! them out.
//!
//! `orders_enriched` is a ReplacingMergeTree keyed by `order_id`, so applying
//! the same batch twice (a retry after a lost acknowledgement, or a replay
//! after restart) leaves one row per order.

use crate::client::ClickHouseClient;
use crate::insert::{insert_rows, QuarantineRow, StagingRow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use engine_core::{EnrichedRecord, Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use telemetry::metrics;
use tracing::{debug, warn};
use uuid::Uuid;

/// Acknowledgement that a batch is durable in the warehouse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitConfirmation {
    pub batch_id: String,
    pub rows_written: usize,
    pub committed_at: DateTime<Utc>,
}

/// A record set aside because its reference join missed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuarantineRecord {
    pub event_key: String,
    pub order_id: String,
    pub event_time: DateTime<Utc>,
    pub reason: String,
    /// Original record as JSON.
    pub payload: String,
}

#[async_trait]
pub trait WarehouseSink: Send + Sync {
    /// Durably upsert `records` by business key. Safe to call again with the
    /// same batch id and records.
    async fn write_batch(
        &self,
        batch_id: &str,
        records: &[EnrichedRecord],
    ) -> Result<CommitConfirmation>;

    /// Store records that could not be enriched. Idempotent per event key.
    async fn write_quarantine(&self, batch_id: &str, records: &[QuarantineRecord])
        -> Result<usize>;

    async fn health_check(&self) -> bool {
        true
    }
}

/// ClickHouse implementation of [`WarehouseSink`].
#[derive(Clone)]
pub struct ClickHouseSink {
    client: ClickHouseClient,
}

const ENRICHED_COLUMNS: &str = "order_id, event_key, event_id, event_time, customer_id, \
    restaurant_id, order_status, order_value, item_count, customer_name, customer_tier, \
    restaurant_name, cuisine, city, reference_version, version";

impl ClickHouseSink {
    pub fn new(client: ClickHouseClient) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &ClickHouseClient {
        &self.client
    }

    async fn apply_staged(&self, batch_id: &str, attempt_id: &str) -> Result<()> {
        let sql = format!(
            "INSERT INTO {target} ({cols}, batch_id) SELECT {cols}, batch_id FROM {staging} WHERE attempt_id = ?",
            target = self.client.table("orders_enriched"),
            staging = self.client.table("orders_enriched_staging"),
            cols = ENRICHED_COLUMNS,
        );
        self.client
            .inner()
            .query(&sql)
            .bind(attempt_id)
            .execute()
            .await
            .map_err(|e| Error::sink(format!("apply of batch {} failed: {}", batch_id, e)))
    }

    /// Drop staged rows. The batch is already applied, so a failure here only
    /// leaves rows for the staging TTL to remove.
    async fn clear_staged(&self, batch_id: &str, attempt_id: &str) {
        let sql = format!(
            "ALTER TABLE {} DELETE WHERE attempt_id = ?",
            self.client.table("orders_enriched_staging")
        );
        if let Err(e) = self.client.inner().query(&sql).bind(attempt_id).execute().await {
            warn!(batch_id, attempt_id, error = %e, "Failed to clear staged rows");
        }
    }
}

#[async_trait]
impl WarehouseSink for ClickHouseSink {
    async fn write_batch(
        &self,
        batch_id: &str,
        records: &[EnrichedRecord],
    ) -> Result<CommitConfirmation> {
        let start = Instant::now();

        if !records.is_empty() {
            let attempt_id = Uuid::new_v4().to_string();
            let rows: Vec<StagingRow> = records
                .iter()
                .map(|r| StagingRow::from_record(batch_id, &attempt_id, r))
                .collect();

            let staged = insert_rows(
                &self.client,
                &self.client.table("orders_enriched_staging"),
                &rows,
            )
            .await;
            if let Err(e) = staged {
                metrics().sink_write_errors.inc();
                return Err(e);
            }

            if let Err(e) = self.apply_staged(batch_id, &attempt_id).await {
                metrics().sink_write_errors.inc();
                return Err(e);
            }
            self.clear_staged(batch_id, &attempt_id).await;
        }

        let elapsed = start.elapsed();
        metrics().sink_latency_ms.observe(elapsed.as_millis() as u64);
        metrics().rows_written.inc_by(records.len() as u64);

        debug!(
            batch_id,
            rows = records.len(),
            latency_ms = %elapsed.as_millis(),
            "Batch upserted to ClickHouse"
        );

        Ok(CommitConfirmation {
            batch_id: batch_id.to_string(),
            rows_written: records.len(),
            committed_at: Utc::now(),
        })
    }

    async fn write_quarantine(
        &self,
        batch_id: &str,
        records: &[QuarantineRecord],
    ) -> Result<usize> {
        let rows: Vec<QuarantineRow> = records
            .iter()
            .map(|r| QuarantineRow::from_record(batch_id, r))
            .collect();
        insert_rows(&self.client, &self.client.table("orders_quarantine"), &rows).await
    }

    async fn health_check(&self) -> bool {
        crate::health::check_connection(&self.client).await
    }
}
