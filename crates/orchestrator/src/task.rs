//! Task declarations, retry policy and per-node state.

use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use engine_core::Backoff;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// What a task gets to see while it runs.
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub run_id: Uuid,
    pub graph: String,
    pub task_id: String,
    /// 1-based attempt number.
    pub attempt: u32,
    /// Fires when the run is cancelled or the orchestrator shuts down.
    pub cancel: CancellationToken,
}

/// The unit of work behind a task node.
///
/// Actions must be idempotent: a retried attempt may follow one that did
/// part of its work before failing or timing out.
#[async_trait]
pub trait TaskAction: Send + Sync {
    async fn run(&self, ctx: &TaskContext) -> anyhow::Result<()>;
}

/// Retry policy for a task node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Backoff) -> Result<Self> {
        if max_attempts == 0 {
            return Err(Error::InvalidRetryPolicy(
                "max_attempts must be at least 1".into(),
            ));
        }
        Ok(Self {
            max_attempts,
            backoff,
        })
    }

    /// A single attempt, no retries.
    pub fn once() -> Self {
        Self {
            max_attempts: 1,
            backoff: Backoff::default(),
        }
    }

    /// Delay after failed attempt number `attempt`.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.backoff.delay(attempt)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Backoff::from_millis(1_000, 60_000),
        }
    }
}

/// How long a cancelled attempt may run on after `ctx.cancel` fires before
/// it is aborted.
pub const DEFAULT_CANCEL_GRACE: Duration = Duration::from_secs(5);

/// A node declaration.
#[derive(Clone)]
pub struct TaskSpec {
    pub id: String,
    pub action: Arc<dyn TaskAction>,
    /// Task ids or group names this task waits for.
    pub depends_on: Vec<String>,
    pub group: Option<String>,
    pub retry: RetryPolicy,
    pub timeout: Option<Duration>,
    pub cancel_grace: Duration,
}

impl TaskSpec {
    pub fn new(id: impl Into<String>, action: Arc<dyn TaskAction>) -> Self {
        Self {
            id: id.into(),
            action,
            depends_on: Vec::new(),
            group: None,
            retry: RetryPolicy::default(),
            timeout: None,
            cancel_grace: DEFAULT_CANCEL_GRACE,
        }
    }

    pub fn depends_on<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on.extend(deps.into_iter().map(Into::into));
        self
    }

    pub fn in_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_cancel_grace(mut self, grace: Duration) -> Self {
        self.cancel_grace = grace;
        self
    }
}

impl fmt::Debug for TaskSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskSpec")
            .field("id", &self.id)
            .field("depends_on", &self.depends_on)
            .field("group", &self.group)
            .field("retry", &self.retry)
            .field("timeout", &self.timeout)
            .field("cancel_grace", &self.cancel_grace)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    Running,
    Succeeded,
    Failed,
    /// Never started: an upstream did not succeed or the run was cancelled.
    Skipped,
    /// In flight when the run was cancelled.
    Cancelled,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending | Self::Running)
    }

    /// Terminal without success; downstream tasks must not run.
    pub fn blocks_downstream(&self) -> bool {
        matches!(self, Self::Failed | Self::Skipped | Self::Cancelled)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Observable state of one node within a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeStatus {
    pub task_id: String,
    pub group: Option<String>,
    pub state: TaskState,
    pub attempts: u32,
    pub max_attempts: u32,
    pub last_error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl NodeStatus {
    pub fn pending(spec: &TaskSpec) -> Self {
        Self {
            task_id: spec.id.clone(),
            group: spec.group.clone(),
            state: TaskState::Pending,
            attempts: 0,
            max_attempts: spec.retry.max_attempts,
            last_error: None,
            started_at: None,
            finished_at: None,
        }
    }
}
