//! Housekeeping scheduler: metrics flush and component health checks.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use clickhouse_client::insert::insert_metrics;
use clickhouse_client::{ClickHouseClient, WarehouseSink};
use redpanda::RedpandaConfig;
use telemetry::{health, metrics};

/// Housekeeping intervals.
#[derive(Debug, Clone)]
pub struct HousekeepingConfig {
    /// Metrics flush interval
    pub metrics_flush_interval: Duration,
    /// Health check interval
    pub health_check_interval: Duration,
}

impl Default for HousekeepingConfig {
    fn default() -> Self {
        Self {
            metrics_flush_interval: Duration::from_secs(60), // 1 minute
            health_check_interval: Duration::from_secs(15),
        }
    }
}

/// Periodic background work beside the pipeline.
pub struct Housekeeping {
    config: HousekeepingConfig,
    clickhouse: Arc<ClickHouseClient>,
    sink: Arc<dyn WarehouseSink>,
    redpanda: Option<RedpandaConfig>,
    shutdown: CancellationToken,
}

impl Housekeeping {
    pub fn new(
        config: HousekeepingConfig,
        clickhouse: Arc<ClickHouseClient>,
        sink: Arc<dyn WarehouseSink>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            config,
            clickhouse,
            sink,
            redpanda: None,
            shutdown,
        }
    }

    /// Also probe the broker on each health tick.
    pub fn with_source(mut self, redpanda: RedpandaConfig) -> Self {
        self.redpanda = Some(redpanda);
        self
    }

    /// Starts all housekeeping loops. They exit when the shutdown token fires.
    pub fn start(self: Arc<Self>) -> Vec<tokio::task::JoinHandle<()>> {
        let mut handles = Vec::new();

        let scheduler = self.clone();
        handles.push(tokio::spawn(async move {
            scheduler.run_metrics_flush().await;
        }));

        let scheduler = self.clone();
        handles.push(tokio::spawn(async move {
            scheduler.run_health_checks().await;
        }));

        info!("Housekeeping started");
        handles
    }

    async fn run_metrics_flush(&self) {
        let mut ticker = interval(self.config.metrics_flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let snapshot = metrics().snapshot();
            info!(
                polled = snapshot.records_polled,
                novel = snapshot.records_novel,
                duplicates = snapshot.records_duplicate,
                late_dropped = snapshot.records_late_dropped,
                quarantined = snapshot.records_quarantined,
                rows_written = snapshot.rows_written,
                batches = snapshot.batches_committed,
                watermark_ms = snapshot.watermark_ms,
                state_size = snapshot.dedup_state_size,
                "Pipeline metrics"
            );
            if let Err(e) = insert_metrics(&self.clickhouse, snapshot).await {
                error!("Failed to flush metrics: {}", e);
            }
        }
    }

    async fn run_health_checks(&self) {
        let mut ticker = interval(self.config.health_check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }
            self.check_once().await;
        }
    }

    /// One round of health probes.
    pub async fn check_once(&self) {
        if self.sink.health_check().await {
            health().warehouse.set_healthy();
        } else {
            warn!("Warehouse health check failed");
            health().warehouse.set_unhealthy("health check failed");
        }

        // A paused pipeline owns the source status until it resumes.
        if let Some(redpanda) = &self.redpanda {
            if metrics().source_paused.get() == 0 {
                if redpanda::health::check_connection(redpanda).await {
                    health().source.set_healthy();
                } else {
                    warn!(brokers = %redpanda.broker_string(), "Source health check failed");
                    health().source.set_unhealthy("broker unreachable");
                }
            }
        }
    }
}
