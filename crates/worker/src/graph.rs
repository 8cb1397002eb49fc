//! The built-in pipeline graph.
//!
//! ```text
//! load_customers ─┐
//!                 ├─> submit_streaming_job ─> monitor_streaming_job
//! load_restaurants┘
//! ```

use crate::config::OrchestratorConfig;
use crate::jobs::{JobSlot, LoadReferenceTask, MonitorStreamingJobTask, SubmitStreamingJobTask};
use crate::reference::{ReferenceLoader, ReferenceStore};
use engine_core::ReferenceTable;
use orchestrator::{GraphBuilder, RetryPolicy, TaskGraph, TaskSpec};
use std::sync::Arc;
use std::time::Duration;

pub const PIPELINE_GRAPH: &str = "order_pipeline";
pub const REFERENCE_SETUP: &str = "reference_setup";
pub const LOAD_CUSTOMERS: &str = "load_customers";
pub const LOAD_RESTAURANTS: &str = "load_restaurants";
pub const SUBMIT_STREAMING_JOB: &str = "submit_streaming_job";
pub const MONITOR_STREAMING_JOB: &str = "monitor_streaming_job";

pub fn pipeline_graph(
    config: &OrchestratorConfig,
    loader: Arc<dyn ReferenceLoader>,
    references: Arc<ReferenceStore>,
    slot: Arc<JobSlot>,
) -> orchestrator::Result<TaskGraph> {
    let retry = RetryPolicy::new(config.task_max_attempts, config.task_backoff())?;
    let timeout = config.task_timeout();

    let load = |id: &str, table: ReferenceTable| {
        TaskSpec::new(
            id,
            Arc::new(LoadReferenceTask::new(table, loader.clone(), references.clone())),
        )
        .in_group(REFERENCE_SETUP)
        .with_retry(retry)
        .with_timeout(timeout)
    };

    let mut builder = GraphBuilder::new(PIPELINE_GRAPH)
        .task(load(LOAD_CUSTOMERS, ReferenceTable::Customers))
        .task(load(LOAD_RESTAURANTS, ReferenceTable::Restaurants))
        .task(
            TaskSpec::new(SUBMIT_STREAMING_JOB, Arc::new(SubmitStreamingJobTask::new(slot.clone())))
                .depends_on([REFERENCE_SETUP])
                .with_retry(retry)
                .with_timeout(timeout),
        )
        .task(
            // Runs as long as the job does: no timeout, and a failed job is
            // a failed run rather than something to retry in place.
            TaskSpec::new(
                MONITOR_STREAMING_JOB,
                Arc::new(MonitorStreamingJobTask::new(slot, config.monitor_interval())),
            )
            .depends_on([SUBMIT_STREAMING_JOB])
            .with_retry(RetryPolicy::once()),
        );

    if let Some(secs) = config.schedule_secs {
        builder = builder.schedule(Duration::from_secs(secs));
    }

    builder.build()
}
