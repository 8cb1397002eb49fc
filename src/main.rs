//! Order Pipeline
//!
//! Deduplicating, enriching stream pipeline for order events:
//! - Redpanda source with checkpointed partition positions
//! - Watermark-driven dedup with bounded state
//! - Reference-data enrichment and idempotent ClickHouse upserts
//! - Dependency-graph orchestrator for setup, submission and monitoring

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use api::{router, AppState};
use checkpoint::FileCheckpointStore;
use clickhouse_client::{ClickHouseClient, ClickHouseConfig, ClickHouseSink, WarehouseSink};
use orchestrator::{Orchestrator, Trigger};
use redpanda::{Consumer, RedpandaConfig};
use telemetry::{health, init_tracing_from_env, metrics};
use worker::{
    pipeline_graph, Housekeeping, HousekeepingConfig, JobSlot, OrchestratorConfig, Pipeline,
    PipelineConfig, ReferenceConfig, ReferenceStore, UriReferenceLoader, PIPELINE_GRAPH,
};

/// HTTP server settings.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct ServerConfig {
    #[serde(default = "default_host")]
    host: String,
    #[serde(default = "default_port")]
    port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Application configuration.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
struct Config {
    #[serde(default)]
    server: ServerConfig,

    #[serde(default)]
    redpanda: RedpandaConfig,

    #[serde(default)]
    clickhouse: ClickHouseConfig,

    #[serde(default)]
    pipeline: PipelineConfig,

    #[serde(default)]
    orchestrator: OrchestratorConfig,

    #[serde(default)]
    reference: ReferenceConfig,
}

impl Config {
    fn validate(&self) -> Result<()> {
        self.pipeline.validate()?;
        self.orchestrator.validate()?;
        if self.redpanda.brokers.is_empty() {
            return Err(anyhow!("redpanda.brokers must not be empty"));
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // rustls 0.23+ requires an explicit crypto provider before any TLS use
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install rustls crypto provider"))?;

    dotenvy::dotenv().ok();

    init_tracing_from_env();

    info!("Starting Order Pipeline v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config()?;
    config.validate().context("Invalid configuration")?;

    info!(
        brokers = ?config.redpanda.brokers,
        topic = %config.redpanda.topic,
        partitions = ?config.redpanda.partitions,
        pipeline_id = %config.pipeline.pipeline_id,
        window_secs = ?config.pipeline.window_secs,
        allowed_lateness_secs = ?config.pipeline.allowed_lateness_secs,
        miss_policy = ?config.pipeline.miss_policy,
        "Loaded configuration"
    );

    // Warehouse
    let clickhouse = Arc::new(ClickHouseClient::new(config.clickhouse.clone()));
    if config.clickhouse.init_schema {
        if let Err(e) = clickhouse_client::health::init_schema(&clickhouse).await {
            // The tables may already exist; writes will surface real problems.
            error!("Failed to initialize ClickHouse schema: {}", e);
        }
    }
    let sink: Arc<dyn WarehouseSink> = Arc::new(ClickHouseSink::new((*clickhouse).clone()));

    check_health(&config, &clickhouse).await;

    // Pipeline
    let checkpoints = Arc::new(
        FileCheckpointStore::open(&config.pipeline.checkpoint_dir)
            .await
            .context("Failed to open checkpoint store")?,
    );
    let source = Arc::new(Consumer::new(config.redpanda.clone()));
    let references = Arc::new(ReferenceStore::new());
    let loader = Arc::new(
        UriReferenceLoader::new(config.reference.clone())
            .context("Failed to create reference loader")?,
    );

    let pipeline = Arc::new(
        Pipeline::new(
            &config.pipeline,
            source,
            sink.clone(),
            checkpoints,
            references.clone(),
        )
        .context("Failed to create pipeline")?,
    );
    let job = JobSlot::new(pipeline);

    // Orchestrator
    let orchestrator = Orchestrator::new(config.orchestrator.max_run_history);
    orchestrator
        .register(
            pipeline_graph(&config.orchestrator, loader, references, job.clone())
                .context("Failed to build pipeline graph")?,
        )
        .context("Failed to register pipeline graph")?;

    if config.orchestrator.run_on_start {
        let run = orchestrator
            .trigger(PIPELINE_GRAPH, Trigger::Manual)
            .context("Failed to trigger pipeline graph")?;
        info!(run_id = %run.run_id, graph = PIPELINE_GRAPH, "Initial run triggered");
    }
    let _schedule_handles = orchestrator.spawn_schedules();

    // Housekeeping
    let housekeeping_shutdown = CancellationToken::new();
    let housekeeping = Arc::new(
        Housekeeping::new(
            HousekeepingConfig::default(),
            clickhouse.clone(),
            sink,
            housekeeping_shutdown.clone(),
        )
        .with_source(config.redpanda.clone()),
    );
    let housekeeping_handles = housekeeping.start();

    // HTTP
    let state = AppState::new(orchestrator.clone()).with_job(job.clone());
    let app = router(state);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid server address")?;

    info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Shutting down...");

    orchestrator.shutdown().await;
    job.stop().await;

    housekeeping_shutdown.cancel();
    for handle in housekeeping_handles {
        if let Err(e) = handle.await {
            warn!("Housekeeping task did not exit cleanly: {}", e);
        }
    }

    if let Err(e) = clickhouse_client::insert::insert_metrics(&clickhouse, metrics().snapshot()).await
    {
        error!("Failed to flush final metrics: {}", e);
    }

    info!("Shutdown complete");
    Ok(())
}

/// Load configuration from files and environment.
fn load_config() -> Result<Config> {
    let config = config::Config::builder()
        // Start with defaults
        .add_source(config::Config::try_from(&Config::default())?)
        // Load from config file if exists
        .add_source(
            config::File::with_name("config/default")
                .required(false)
                .format(config::FileFormat::Toml),
        )
        // Override with environment variables, e.g. PIPELINE__PIPELINE__WINDOW_SECS
        .add_source(
            config::Environment::default()
                .separator("__")
                .prefix("PIPELINE")
                .try_parsing(true),
        )
        .build()
        .context("Failed to build configuration")?;

    let mut config: Config = config
        .try_deserialize()
        .context("Failed to deserialize configuration")?;

    // List-valued settings are easier to pass comma-separated
    if let Ok(brokers) = std::env::var("PIPELINE_REDPANDA_BROKERS") {
        config.redpanda.brokers = brokers.split(',').map(|s| s.trim().to_string()).collect();
    }
    if let Ok(partitions) = std::env::var("PIPELINE_REDPANDA_PARTITIONS") {
        config.redpanda.partitions = partitions
            .split(',')
            .map(|s| s.trim().parse::<i32>())
            .collect::<std::result::Result<_, _>>()
            .context("PIPELINE_REDPANDA_PARTITIONS must be comma-separated integers")?;
    }
    if let Ok(username) = std::env::var("PIPELINE_REDPANDA_SASL_USERNAME") {
        config.redpanda.sasl_username = Some(username);
    }
    if let Ok(password) = std::env::var("PIPELINE_REDPANDA_SASL_PASSWORD") {
        config.redpanda.sasl_password = Some(password);
    }
    if let Ok(password) = std::env::var("PIPELINE_CLICKHOUSE_PASSWORD") {
        config.clickhouse.password = Some(password);
    }

    Ok(config)
}

/// Check component health on startup.
async fn check_health(config: &Config, clickhouse: &ClickHouseClient) {
    let redpanda_healthy = redpanda::health::check_connection(&config.redpanda).await;
    if redpanda_healthy {
        health().source.set_healthy();
        info!("Redpanda connection: healthy");
    } else {
        health().source.set_unhealthy("Connection failed");
        error!("Redpanda connection: unhealthy");
    }

    let missing = redpanda::health::missing_partitions(&config.redpanda).await;
    if !missing.is_empty() {
        warn!(topic = %config.redpanda.topic, missing = ?missing, "Configured partitions not found");
    }

    let ch_healthy = clickhouse_client::health::check_connection(clickhouse).await;
    if ch_healthy {
        health().warehouse.set_healthy();
        info!("ClickHouse connection: healthy");
    } else {
        health().warehouse.set_unhealthy("Connection failed");
        error!("ClickHouse connection: unhealthy");
    }
}

/// Graceful shutdown signal handler.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received terminate signal");
        }
    }
}
