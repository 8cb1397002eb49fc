//! Common test setup functions.

use api::{router, AppState};
use axum::Router;
use checkpoint::MemoryCheckpointStore;
use clickhouse_client::{health::init_schema, ClickHouseClient, ClickHouseConfig};
use orchestrator::Orchestrator;
use std::sync::Arc;
use telemetry::{init_tracing, TracingConfig};
use worker::{
    pipeline_graph, JobSlot, MissPolicy, OrchestratorConfig, Pipeline, PipelineConfig,
    ReferenceStore,
};

use crate::containers::TestContainers;
use crate::fixtures::{customers, restaurants};
use crate::mocks::{MockLoader, MockSource, MockWarehouse};

/// Quiet tracing for tests; `RUST_LOG` overrides.
pub fn init_test_tracing() {
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "warn".to_string());
    init_tracing(TracingConfig::new().with_filter(filter));
}

/// Pipeline settings with short backoffs.
pub fn pipeline_config(window_secs: u64, lateness_secs: u64) -> PipelineConfig {
    PipelineConfig {
        pipeline_id: "orders-test".into(),
        window_secs: Some(window_secs),
        allowed_lateness_secs: Some(lateness_secs),
        max_batch_records: 100,
        miss_policy: MissPolicy::Quarantine,
        sink_max_attempts: 3,
        sink_retry_backoff_ms: 1,
        sink_max_backoff_ms: 5,
        pause_backoff_ms: 5,
        max_pause_backoff_ms: 20,
        ..Default::default()
    }
}

/// Orchestrator settings with short backoffs and no startup trigger.
pub fn orchestrator_config() -> OrchestratorConfig {
    OrchestratorConfig {
        task_max_attempts: 3,
        task_retry_backoff_ms: 1,
        task_max_backoff_ms: 5,
        task_timeout_secs: 5,
        schedule_secs: None,
        run_on_start: false,
        monitor_interval_ms: 20,
        max_run_history: 20,
    }
}

/// A pipeline over in-memory source, warehouse and checkpoint store.
///
/// The components outlive the pipeline, so `restart` models a process
/// restart that keeps the broker, the warehouse and the checkpoint.
pub struct PipelineHarness {
    pub config: PipelineConfig,
    pub source: Arc<MockSource>,
    pub warehouse: Arc<MockWarehouse>,
    pub checkpoints: Arc<MemoryCheckpointStore>,
    pub references: Arc<ReferenceStore>,
    pub pipeline: Arc<Pipeline>,
}

impl PipelineHarness {
    pub fn new(config: PipelineConfig) -> Self {
        init_test_tracing();
        let source = Arc::new(MockSource::new(&[0, 1]));
        let warehouse = Arc::new(MockWarehouse::new());
        let checkpoints = Arc::new(MemoryCheckpointStore::new());
        let references = Arc::new(ReferenceStore::new());
        references.apply(customers());
        references.apply(restaurants());

        let pipeline = Arc::new(
            Pipeline::new(
                &config,
                source.clone(),
                warehouse.clone(),
                checkpoints.clone(),
                references.clone(),
            )
            .expect("valid pipeline config"),
        );

        Self {
            config,
            source,
            warehouse,
            checkpoints,
            references,
            pipeline,
        }
    }

    /// Replace the pipeline with a fresh instance over the same components.
    pub fn restart(&mut self) {
        self.pipeline = Arc::new(
            Pipeline::new(
                &self.config,
                self.source.clone(),
                self.warehouse.clone(),
                self.checkpoints.clone(),
                self.references.clone(),
            )
            .expect("valid pipeline config"),
        );
    }
}

/// Orchestrator with the pipeline graph registered over mocks.
pub struct OrchestratorHarness {
    pub pipeline: PipelineHarness,
    pub loader: Arc<MockLoader>,
    pub job: Arc<JobSlot>,
    pub orchestrator: Arc<Orchestrator>,
}

impl OrchestratorHarness {
    pub fn new() -> Self {
        Self::with_config(orchestrator_config())
    }

    pub fn with_config(config: OrchestratorConfig) -> Self {
        let pipeline = PipelineHarness::new(pipeline_config(600, 30));
        let loader = Arc::new(MockLoader::new(customers(), restaurants()));
        let references = pipeline.references.clone();
        let job = JobSlot::new(pipeline.pipeline.clone());

        let orchestrator = Orchestrator::new(config.max_run_history);
        orchestrator
            .register(
                pipeline_graph(&config, loader.clone(), references, job.clone())
                    .expect("pipeline graph builds"),
            )
            .expect("graph registers");

        Self {
            pipeline,
            loader,
            job,
            orchestrator,
        }
    }

    /// The HTTP router over this orchestrator.
    pub fn router(&self) -> Router {
        router(AppState::new(self.orchestrator.clone()).with_job(self.job.clone()))
    }

    pub async fn shutdown(&self) {
        self.orchestrator.shutdown().await;
        self.job.stop().await;
    }
}

impl Default for OrchestratorHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Test context with a real ClickHouse.
pub struct ClickHouseContext {
    pub containers: TestContainers,
    pub clickhouse: ClickHouseClient,
}

impl ClickHouseContext {
    /// Start (or connect to) ClickHouse and create the schema.
    pub async fn new() -> Self {
        let containers = TestContainers::start().await;

        let clickhouse = ClickHouseClient::new(ClickHouseConfig {
            url: containers.clickhouse_url.clone(),
            database: containers.clickhouse_database.clone(),
            username: containers.clickhouse_username.clone(),
            password: containers.clickhouse_password.clone(),
            init_schema: true,
        });

        init_schema(&clickhouse)
            .await
            .expect("Failed to initialize schema");

        Self {
            containers,
            clickhouse,
        }
    }
}
