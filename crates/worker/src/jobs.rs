//! Streaming job slot and the task actions of the pipeline graph.

use crate::pipeline::StreamingJob;
use crate::reference::{ReferenceLoader, ReferenceStore};
use anyhow::{anyhow, bail, Context};
use async_trait::async_trait;
use engine_core::ReferenceTable;
use orchestrator::{TaskAction, TaskContext};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Lifecycle of the streaming job held by a [`JobSlot`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "error", rename_all = "snake_case")]
pub enum JobStatus {
    NotSubmitted,
    Running,
    /// Stopped on request.
    Finished,
    /// Halted on a fatal error.
    Failed(String),
}

/// What `submit` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    Launched,
    /// A copy was already running; nothing new was started.
    Attached,
}

struct Running {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Holds at most one running copy of a streaming job.
pub struct JobSlot {
    job: Arc<dyn StreamingJob>,
    status: watch::Sender<JobStatus>,
    running: Mutex<Option<Running>>,
    shutdown: CancellationToken,
}

impl JobSlot {
    pub fn new(job: Arc<dyn StreamingJob>) -> Arc<Self> {
        let (status, _) = watch::channel(JobStatus::NotSubmitted);
        Arc::new(Self {
            job,
            status,
            running: Mutex::new(None),
            shutdown: CancellationToken::new(),
        })
    }

    pub fn name(&self) -> &str {
        self.job.name()
    }

    pub fn status(&self) -> JobStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<JobStatus> {
        self.status.subscribe()
    }

    /// Launch the job unless a copy is already running.
    pub fn submit(&self) -> anyhow::Result<Submission> {
        if self.shutdown.is_cancelled() {
            bail!("job slot {} is shut down", self.name());
        }

        let mut running = self.running.lock();
        if *self.status.borrow() == JobStatus::Running {
            info!(job = %self.name(), "Streaming job already running, attaching");
            return Ok(Submission::Attached);
        }

        let cancel = self.shutdown.child_token();
        let job = self.job.clone();
        let status = self.status.clone();
        let token = cancel.clone();
        self.status.send_replace(JobStatus::Running);

        let handle = tokio::spawn(async move {
            let outcome = tokio::spawn({
                let job = job.clone();
                async move { job.run(token).await }
            })
            .await;

            let next = match outcome {
                Ok(Ok(())) => {
                    info!(job = %job.name(), "Streaming job finished");
                    JobStatus::Finished
                }
                Ok(Err(e)) => {
                    error!(job = %job.name(), code = e.error_code(), error = %e, "Streaming job failed");
                    JobStatus::Failed(e.to_string())
                }
                Err(e) => {
                    error!(job = %job.name(), error = %e, "Streaming job panicked");
                    JobStatus::Failed(format!("job panicked: {}", e))
                }
            };
            status.send_replace(next);
        });

        *running = Some(Running { cancel, handle });
        info!(job = %self.name(), "Streaming job launched");
        Ok(Submission::Launched)
    }

    /// Stop the job and wait for it to exit. The slot refuses new
    /// submissions afterwards.
    pub async fn stop(&self) {
        self.shutdown.cancel();
        let running = self.running.lock().take();
        if let Some(running) = running {
            running.cancel.cancel();
            if let Err(e) = running.handle.await {
                warn!(job = %self.name(), error = %e, "Streaming job did not exit cleanly");
            }
        }
    }
}

/// Loads one reference table and swaps it into the store.
pub struct LoadReferenceTask {
    table: ReferenceTable,
    loader: Arc<dyn ReferenceLoader>,
    store: Arc<ReferenceStore>,
}

impl LoadReferenceTask {
    pub fn new(
        table: ReferenceTable,
        loader: Arc<dyn ReferenceLoader>,
        store: Arc<ReferenceStore>,
    ) -> Self {
        Self {
            table,
            loader,
            store,
        }
    }
}

#[async_trait]
impl TaskAction for LoadReferenceTask {
    async fn run(&self, ctx: &TaskContext) -> anyhow::Result<()> {
        let rows = self
            .loader
            .load(self.table)
            .await
            .with_context(|| format!("loading {}", self.table.as_str()))?;
        let version = self.store.apply(rows);
        info!(
            run_id = %ctx.run_id,
            table = self.table.as_str(),
            version,
            "Reference data ready"
        );
        Ok(())
    }
}

/// Submits the streaming job, attaching when it is already running.
pub struct SubmitStreamingJobTask {
    slot: Arc<JobSlot>,
}

impl SubmitStreamingJobTask {
    pub fn new(slot: Arc<JobSlot>) -> Self {
        Self { slot }
    }
}

#[async_trait]
impl TaskAction for SubmitStreamingJobTask {
    async fn run(&self, ctx: &TaskContext) -> anyhow::Result<()> {
        let submission = self.slot.submit()?;
        info!(
            run_id = %ctx.run_id,
            job = %self.slot.name(),
            submission = ?submission,
            "Streaming job submitted"
        );
        Ok(())
    }
}

/// Watches the streaming job. Succeeds when the job stops on request or the
/// run is cancelled, fails when the job halts on an error.
pub struct MonitorStreamingJobTask {
    slot: Arc<JobSlot>,
    interval: Duration,
}

impl MonitorStreamingJobTask {
    pub fn new(slot: Arc<JobSlot>, interval: Duration) -> Self {
        Self { slot, interval }
    }
}

#[async_trait]
impl TaskAction for MonitorStreamingJobTask {
    async fn run(&self, ctx: &TaskContext) -> anyhow::Result<()> {
        let mut status = self.slot.subscribe();
        let mut ticker = tokio::time::interval(self.interval);

        loop {
            let current = status.borrow_and_update().clone();
            match current {
                JobStatus::Running => {}
                JobStatus::Finished => {
                    info!(run_id = %ctx.run_id, job = %self.slot.name(), "Streaming job finished");
                    return Ok(());
                }
                JobStatus::Failed(e) => {
                    return Err(anyhow!("streaming job {} failed: {}", self.slot.name(), e));
                }
                JobStatus::NotSubmitted => {
                    bail!("streaming job {} was never submitted", self.slot.name());
                }
            }

            tokio::select! {
                _ = ctx.cancel.cancelled() => {
                    info!(run_id = %ctx.run_id, job = %self.slot.name(), "Monitoring stopped");
                    return Ok(());
                }
                changed = status.changed() => {
                    changed.context("job slot dropped")?;
                }
                _ = ticker.tick() => {
                    info!(run_id = %ctx.run_id, job = %self.slot.name(), "Streaming job running");
                }
            }
        }
    }
}
