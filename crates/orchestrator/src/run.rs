//! Graph runs and their observable state.

use crate::dag::TaskGraph;
use crate::task::{NodeStatus, TaskState};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// What started a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Trigger {
    Manual,
    Scheduled,
    /// A successful run of another graph.
    Upstream { graph: String, run_id: Uuid },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// A node that ended the run in failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedNode {
    pub task_id: String,
    pub attempts: u32,
    pub error: Option<String>,
}

/// Point-in-time view of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub graph: String,
    pub trigger: Trigger,
    pub state: RunState,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// In execution order.
    pub nodes: Vec<NodeStatus>,
    pub failed_nodes: Vec<FailedNode>,
}

impl RunReport {
    pub fn node(&self, task_id: &str) -> Option<&NodeStatus> {
        self.nodes.iter().find(|n| n.task_id == task_id)
    }
}

/// Shared handle to a live run. The executor mutates it; readers take
/// reports.
#[derive(Debug)]
pub struct RunHandle {
    run_id: Uuid,
    graph: String,
    report: RwLock<RunReport>,
    cancel: CancellationToken,
    done: watch::Sender<bool>,
}

impl RunHandle {
    pub fn new(graph: &TaskGraph, trigger: Trigger, parent: &CancellationToken) -> Self {
        let run_id = Uuid::new_v4();
        let nodes = graph
            .order()
            .iter()
            .map(|&pos| NodeStatus::pending(graph.task(pos)))
            .collect();
        let (done, _) = watch::channel(false);

        Self {
            run_id,
            graph: graph.name().to_string(),
            report: RwLock::new(RunReport {
                run_id,
                graph: graph.name().to_string(),
                trigger,
                state: RunState::Pending,
                created_at: Utc::now(),
                started_at: None,
                finished_at: None,
                nodes,
                failed_nodes: Vec::new(),
            }),
            cancel: parent.child_token(),
            done,
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn graph(&self) -> &str {
        &self.graph
    }

    pub fn report(&self) -> RunReport {
        self.report.read().clone()
    }

    pub fn state(&self) -> RunState {
        self.report.read().state
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub(crate) fn start(&self) {
        let mut report = self.report.write();
        report.state = RunState::Running;
        report.started_at = Some(Utc::now());
    }

    pub(crate) fn update_node(&self, task_id: &str, f: impl FnOnce(&mut NodeStatus)) {
        let mut report = self.report.write();
        if let Some(node) = report.nodes.iter_mut().find(|n| n.task_id == task_id) {
            f(node);
        }
    }

    /// Settle the final state and wake waiters.
    pub(crate) fn finish(&self) -> RunReport {
        let report = {
            let mut report = self.report.write();
            report.failed_nodes = report
                .nodes
                .iter()
                .filter(|n| n.state == TaskState::Failed)
                .map(|n| FailedNode {
                    task_id: n.task_id.clone(),
                    attempts: n.attempts,
                    error: n.last_error.clone(),
                })
                .collect();

            report.state = if self.cancel.is_cancelled() {
                RunState::Cancelled
            } else if report
                .nodes
                .iter()
                .all(|n| n.state == TaskState::Succeeded)
            {
                RunState::Succeeded
            } else {
                RunState::Failed
            };
            report.finished_at = Some(Utc::now());
            report.clone()
        };

        self.done.send_replace(true);
        report
    }

    /// Resolves once the run reached a terminal state.
    pub async fn wait(&self) -> RunReport {
        let mut rx = self.done.subscribe();
        // Err means the sender is gone, which only happens with the handle.
        let _ = rx.wait_for(|done| *done).await;
        self.report()
    }
}
