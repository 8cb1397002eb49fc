//! ClickHouse table schemas.
//!
//! `{db}` is replaced with the configured database name.
//! - `orders_enriched` collapses rows per `order_id`, keeping the highest
//!   `version` (event time in nanos), so re-applied batches converge
//! - `orders_enriched_staging` holds rows of one write attempt until they
//!   are applied
//! - DateTime64(3) for millisecond precision

pub const CREATE_DATABASE: &str = r#"
CREATE DATABASE IF NOT EXISTS {db}
"#;

/// Final enriched orders, one logical row per business key.
pub const CREATE_ORDERS_ENRICHED_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS {db}.orders_enriched (
    order_id String,
    event_key String,
    event_id Nullable(String),
    event_time DateTime64(3),
    customer_id String,
    restaurant_id String,
    order_status LowCardinality(String),
    order_value Float64,
    item_count UInt32,

    -- Reference attributes (NULL when the join missed)
    customer_name Nullable(String),
    customer_tier LowCardinality(Nullable(String)),
    restaurant_name Nullable(String),
    cuisine LowCardinality(Nullable(String)),
    city LowCardinality(Nullable(String)),
    reference_version UInt64,

    version UInt64,
    batch_id String,
    written_at DateTime64(3) DEFAULT now64(3)
)
ENGINE = ReplacingMergeTree(version)
ORDER BY order_id
SETTINGS index_granularity = 8192
"#;

/// Staging area for one batch at a time.
pub const CREATE_ORDERS_STAGING_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS {db}.orders_enriched_staging (
    batch_id String,
    attempt_id String,
    order_id String,
    event_key String,
    event_id Nullable(String),
    event_time DateTime64(3),
    customer_id String,
    restaurant_id String,
    order_status LowCardinality(String),
    order_value Float64,
    item_count UInt32,
    customer_name Nullable(String),
    customer_tier LowCardinality(Nullable(String)),
    restaurant_name Nullable(String),
    cuisine LowCardinality(Nullable(String)),
    city LowCardinality(Nullable(String)),
    reference_version UInt64,
    version UInt64,
    staged_at DateTime64(3) DEFAULT now64(3)
)
ENGINE = MergeTree()
ORDER BY (attempt_id, order_id)
TTL toDateTime(staged_at) + INTERVAL 1 DAY
"#;

/// Records whose reference join missed under the quarantine policy.
pub const CREATE_QUARANTINE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS {db}.orders_quarantine (
    event_key String,
    order_id String,
    event_time DateTime64(3),
    reason LowCardinality(String),
    payload String,
    batch_id String,
    quarantined_at DateTime64(3)
)
ENGINE = ReplacingMergeTree(quarantined_at)
ORDER BY event_key
TTL toDateTime(quarantined_at) + INTERVAL 30 DAY
"#;

/// Pipeline self-metrics flushed by the housekeeping scheduler.
pub const CREATE_METRICS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS {db}.pipeline_metrics (
    timestamp DateTime64(3),
    records_polled UInt64,
    records_malformed UInt64,
    records_novel UInt64,
    records_duplicate UInt64,
    records_late_dropped UInt64,
    enrichment_misses UInt64,
    records_quarantined UInt64,
    rows_written UInt64,
    sink_write_errors UInt64,
    batches_committed UInt64,
    runs_succeeded UInt64,
    runs_failed UInt64,
    runs_rejected UInt64,
    batch_latency_mean_ms Float64,
    sink_latency_mean_ms Float64,
    checkpoint_latency_mean_ms Float64,
    watermark_ms Int64,
    dedup_state_size Int64,
    source_paused UInt8
)
ENGINE = MergeTree()
PARTITION BY toYYYYMM(timestamp)
ORDER BY timestamp
TTL toDateTime(timestamp) + INTERVAL 30 DAY
SETTINGS index_granularity = 8192
"#;

/// All DDL statements for `database`, database first.
pub fn all_tables(database: &str) -> Vec<String> {
    [
        CREATE_DATABASE,
        CREATE_ORDERS_ENRICHED_TABLE,
        CREATE_ORDERS_STAGING_TABLE,
        CREATE_QUARANTINE_TABLE,
        CREATE_METRICS_TABLE,
    ]
    .iter()
    .map(|ddl| ddl.replace("{db}", database))
    .collect()
}
