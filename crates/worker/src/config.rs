//! Pipeline, orchestrator and reference-data configuration.

use crate::enrichment::MissPolicy;
use engine_core::{Backoff, DedupConfig, Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Streaming pipeline configuration.
///
/// `window_secs` and `allowed_lateness_secs` have no default: a pipeline
/// without them refuses to start.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Identity of this pipeline's checkpoint
    #[serde(default = "default_pipeline_id")]
    pub pipeline_id: String,
    /// Dedup window behind the watermark, in seconds
    #[serde(default)]
    pub window_secs: Option<u64>,
    /// Allowed event-time lateness, in seconds
    #[serde(default)]
    pub allowed_lateness_secs: Option<u64>,
    /// Upper bound on records per micro-batch
    #[serde(default = "default_max_batch_records")]
    pub max_batch_records: usize,
    #[serde(default)]
    pub miss_policy: MissPolicy,
    /// Total sink write attempts per batch before the pipeline halts
    #[serde(default = "default_sink_max_attempts")]
    pub sink_max_attempts: u32,
    #[serde(default = "default_sink_retry_backoff_ms")]
    pub sink_retry_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub sink_max_backoff_ms: u64,
    /// Initial pause after the source is unavailable
    #[serde(default = "default_pause_backoff_ms")]
    pub pause_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_pause_backoff_ms: u64,
    /// Directory of the file checkpoint store
    #[serde(default = "default_checkpoint_dir")]
    pub checkpoint_dir: String,
}

fn default_pipeline_id() -> String {
    "orders-enriched".to_string()
}

fn default_max_batch_records() -> usize {
    5000
}

fn default_sink_max_attempts() -> u32 {
    5
}

fn default_sink_retry_backoff_ms() -> u64 {
    200
}

fn default_pause_backoff_ms() -> u64 {
    1_000
}

fn default_max_backoff_ms() -> u64 {
    30_000
}

fn default_checkpoint_dir() -> String {
    "data/checkpoints".to_string()
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            pipeline_id: default_pipeline_id(),
            window_secs: None,
            allowed_lateness_secs: None,
            max_batch_records: default_max_batch_records(),
            miss_policy: MissPolicy::default(),
            sink_max_attempts: default_sink_max_attempts(),
            sink_retry_backoff_ms: default_sink_retry_backoff_ms(),
            sink_max_backoff_ms: default_max_backoff_ms(),
            pause_backoff_ms: default_pause_backoff_ms(),
            max_pause_backoff_ms: default_max_backoff_ms(),
            checkpoint_dir: default_checkpoint_dir(),
        }
    }
}

impl PipelineConfig {
    /// Dedup parameters; fails when the window or lateness is not configured.
    pub fn dedup_config(&self) -> Result<DedupConfig> {
        let window = self
            .window_secs
            .ok_or_else(|| Error::config("pipeline.window_secs is required"))?;
        let lateness = self
            .allowed_lateness_secs
            .ok_or_else(|| Error::config("pipeline.allowed_lateness_secs is required"))?;
        DedupConfig::from_secs(window, lateness)
    }

    pub fn validate(&self) -> Result<()> {
        self.dedup_config()?;
        if self.pipeline_id.trim().is_empty() {
            return Err(Error::config("pipeline.pipeline_id must not be empty"));
        }
        if self.max_batch_records == 0 {
            return Err(Error::config("pipeline.max_batch_records must be at least 1"));
        }
        if self.sink_max_attempts == 0 {
            return Err(Error::config("pipeline.sink_max_attempts must be at least 1"));
        }
        Ok(())
    }

    pub fn sink_backoff(&self) -> Backoff {
        Backoff::from_millis(self.sink_retry_backoff_ms, self.sink_max_backoff_ms)
    }

    pub fn pause_backoff(&self) -> Backoff {
        Backoff::from_millis(self.pause_backoff_ms, self.max_pause_backoff_ms)
    }
}

/// Orchestrator configuration for the built-in pipeline graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Total attempts per setup task
    #[serde(default = "default_task_max_attempts")]
    pub task_max_attempts: u32,
    #[serde(default = "default_task_retry_backoff_ms")]
    pub task_retry_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub task_max_backoff_ms: u64,
    /// Per-attempt timeout for setup tasks
    #[serde(default = "default_task_timeout_secs")]
    pub task_timeout_secs: u64,
    /// Re-trigger the pipeline graph on this interval
    #[serde(default)]
    pub schedule_secs: Option<u64>,
    /// Trigger the pipeline graph once at startup
    #[serde(default = "default_run_on_start")]
    pub run_on_start: bool,
    /// How often the monitor task checks the streaming job
    #[serde(default = "default_monitor_interval_ms")]
    pub monitor_interval_ms: u64,
    /// Finished runs kept per graph
    #[serde(default = "default_max_run_history")]
    pub max_run_history: usize,
}

fn default_task_max_attempts() -> u32 {
    3
}

fn default_task_retry_backoff_ms() -> u64 {
    1_000
}

fn default_task_timeout_secs() -> u64 {
    300
}

fn default_run_on_start() -> bool {
    true
}

fn default_monitor_interval_ms() -> u64 {
    5_000
}

fn default_max_run_history() -> usize {
    100
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            task_max_attempts: default_task_max_attempts(),
            task_retry_backoff_ms: default_task_retry_backoff_ms(),
            task_max_backoff_ms: default_max_backoff_ms(),
            task_timeout_secs: default_task_timeout_secs(),
            schedule_secs: None,
            run_on_start: default_run_on_start(),
            monitor_interval_ms: default_monitor_interval_ms(),
            max_run_history: default_max_run_history(),
        }
    }
}

impl OrchestratorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.task_max_attempts == 0 {
            return Err(Error::config(
                "orchestrator.task_max_attempts must be at least 1",
            ));
        }
        if self.schedule_secs == Some(0) {
            return Err(Error::config("orchestrator.schedule_secs must be positive"));
        }
        Ok(())
    }

    pub fn task_backoff(&self) -> Backoff {
        Backoff::from_millis(self.task_retry_backoff_ms, self.task_max_backoff_ms)
    }

    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_secs)
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_millis(self.monitor_interval_ms)
    }
}

/// Where reference dimensions are loaded from. A URI starting with
/// `http://` or `https://` is fetched over HTTP; anything else is a file path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferenceConfig {
    #[serde(default = "default_customers_uri")]
    pub customers_uri: String,
    #[serde(default = "default_restaurants_uri")]
    pub restaurants_uri: String,
    /// HTTP request timeout
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
}

fn default_customers_uri() -> String {
    "data/reference/customers.json".to_string()
}

fn default_restaurants_uri() -> String {
    "data/reference/restaurants.json".to_string()
}

fn default_http_timeout_secs() -> u64 {
    30
}

impl Default for ReferenceConfig {
    fn default() -> Self {
        Self {
            customers_uri: default_customers_uri(),
            restaurants_uri: default_restaurants_uri(),
            http_timeout_secs: default_http_timeout_secs(),
        }
    }
}
