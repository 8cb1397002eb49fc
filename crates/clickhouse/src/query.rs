//! Query functions for reading data back (used in tests and admin).
//!
//! Reads use `FINAL` so rows not yet merged by ReplacingMergeTree are
//! collapsed at query time.

use crate::client::ClickHouseClient;
use clickhouse::Row;
use engine_core::{Error, Result};
use serde::Deserialize;

/// Query result for order verification.
#[derive(Debug, Clone, Row, Deserialize)]
pub struct QueryOrderRow {
    pub order_id: String,
    pub event_key: String,
    pub order_status: String,
    pub order_value: f64,
    pub customer_name: Option<String>,
    pub restaurant_name: Option<String>,
    pub version: u64,
}

/// Count distinct orders in the enriched table.
pub async fn count_orders(client: &ClickHouseClient) -> Result<u64> {
    let sql = format!(
        "SELECT count() FROM {} FINAL",
        client.table("orders_enriched")
    );
    client
        .inner()
        .query(&sql)
        .fetch_one::<u64>()
        .await
        .map_err(|e| Error::sink(format!("query error: {}", e)))
}

/// Fetch the current row for one order.
pub async fn fetch_order(client: &ClickHouseClient, order_id: &str) -> Result<Option<QueryOrderRow>> {
    let sql = format!(
        "SELECT order_id, event_key, order_status, order_value, customer_name, restaurant_name, version \
         FROM {} FINAL WHERE order_id = ?",
        client.table("orders_enriched")
    );
    let rows: Vec<QueryOrderRow> = client
        .inner()
        .query(&sql)
        .bind(order_id)
        .fetch_all()
        .await
        .map_err(|e| Error::sink(format!("query error: {}", e)))?;
    Ok(rows.into_iter().next())
}

/// Count quarantined records.
pub async fn count_quarantined(client: &ClickHouseClient) -> Result<u64> {
    let sql = format!(
        "SELECT count() FROM {} FINAL",
        client.table("orders_quarantine")
    );
    client
        .inner()
        .query(&sql)
        .fetch_one::<u64>()
        .await
        .map_err(|e| Error::sink(format!("query error: {}", e)))
}

/// Truncate the order tables (test cleanup).
pub async fn truncate_orders(client: &ClickHouseClient) -> Result<()> {
    for table in ["orders_enriched", "orders_enriched_staging", "orders_quarantine"] {
        let sql = format!("TRUNCATE TABLE IF EXISTS {}", client.table(table));
        client
            .inner()
            .query(&sql)
            .execute()
            .await
            .map_err(|e| Error::sink(format!("truncate error: {}", e)))?;
    }
    Ok(())
}
