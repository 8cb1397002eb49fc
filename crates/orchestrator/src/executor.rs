//! Runs one graph run to completion.
//!
//! The control loop settles every pending node whose upstreams are terminal:
//! nodes with a blocked upstream are skipped, nodes whose upstreams all
//! succeeded are spawned. It then waits for one in-flight node to finish and
//! repeats. Independent branches therefore run concurrently, and a failed
//! branch never stops its siblings.

use crate::dag::TaskGraph;
use crate::run::{RunHandle, RunReport};
use crate::task::{TaskContext, TaskSpec, TaskState};
use chrono::Utc;
use std::sync::Arc;
use telemetry::metrics;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

struct NodeOutcome {
    pos: usize,
    state: TaskState,
}

/// Execute `run` against `graph`, returning the final report.
pub async fn execute(graph: Arc<TaskGraph>, run: Arc<RunHandle>) -> RunReport {
    run.start();
    info!(run_id = %run.run_id(), graph = %graph.name(), "Run started");

    let mut states = vec![TaskState::Pending; graph.len()];
    let mut in_flight: JoinSet<NodeOutcome> = JoinSet::new();

    loop {
        for &pos in graph.order() {
            if states[pos] != TaskState::Pending {
                continue;
            }
            let task = graph.task(pos);
            let ups = graph.upstream(pos);

            if run.is_cancelled() || ups.iter().any(|&u| states[u].blocks_downstream()) {
                states[pos] = TaskState::Skipped;
                run.update_node(&task.id, |n| {
                    n.state = TaskState::Skipped;
                    n.finished_at = Some(Utc::now());
                });
                info!(
                    run_id = %run.run_id(),
                    task = %task.id,
                    state = %TaskState::Skipped,
                    "Task state changed"
                );
                continue;
            }

            if ups.iter().all(|&u| states[u] == TaskState::Succeeded) {
                states[pos] = TaskState::Running;
                let task = task.clone();
                let run = run.clone();
                in_flight.spawn(async move {
                    let state = run_task(&task, &run).await;
                    NodeOutcome { pos, state }
                });
            }
        }

        match in_flight.join_next().await {
            Some(Ok(outcome)) => states[outcome.pos] = outcome.state,
            Some(Err(e)) => {
                // run_task isolates panics in actions, so this is a bug in
                // the executor itself.
                error!(run_id = %run.run_id(), error = %e, "Task driver aborted");
                for state in states.iter_mut() {
                    if *state == TaskState::Running {
                        *state = TaskState::Failed;
                    }
                }
            }
            None => break,
        }
    }

    let report = run.finish();
    info!(
        run_id = %report.run_id,
        graph = %report.graph,
        state = %report.state,
        failed = ?report.failed_nodes.iter().map(|n| &n.task_id).collect::<Vec<_>>(),
        "Run finished"
    );
    report
}

/// Attempt loop for one node. Returns its terminal state.
async fn run_task(task: &TaskSpec, run: &RunHandle) -> TaskState {
    let cancel = run.cancel_token().clone();
    run.update_node(&task.id, |n| {
        n.state = TaskState::Running;
        n.started_at = Some(Utc::now());
    });
    info!(
        run_id = %run.run_id(),
        task = %task.id,
        state = %TaskState::Running,
        "Task state changed"
    );

    let mut attempt = 0;
    let state = loop {
        attempt += 1;
        run.update_node(&task.id, |n| n.attempts = attempt);

        let ctx = TaskContext {
            run_id: run.run_id(),
            graph: run.graph().to_string(),
            task_id: task.id.clone(),
            attempt,
            cancel: cancel.clone(),
        };
        let action = task.action.clone();
        let mut handle = tokio::spawn(async move { action.run(&ctx).await });

        let result: Result<(), String> = tokio::select! {
            _ = cancel.cancelled() => {
                // The action sees the same token; give it time to wind down.
                if tokio::time::timeout(task.cancel_grace, &mut handle).await.is_err() {
                    warn!(
                        run_id = %run.run_id(),
                        task = %task.id,
                        grace_ms = %task.cancel_grace.as_millis(),
                        "Task ignored cancellation, aborting"
                    );
                    handle.abort();
                }
                break TaskState::Cancelled;
            }
            joined = async {
                match task.timeout {
                    Some(limit) => tokio::time::timeout(limit, &mut handle).await.ok(),
                    None => Some((&mut handle).await),
                }
            } => match joined {
                Some(Ok(Ok(()))) => Ok(()),
                Some(Ok(Err(e))) => Err(format!("{:#}", e)),
                Some(Err(join_err)) => Err(format!("task panicked: {}", join_err)),
                None => {
                    handle.abort();
                    Err(format!("timed out after {:?}", task.timeout.unwrap_or_default()))
                }
            },
        };

        match result {
            Ok(()) => break TaskState::Succeeded,
            Err(message) => {
                run.update_node(&task.id, |n| n.last_error = Some(message.clone()));
                if attempt >= task.retry.max_attempts {
                    error!(
                        run_id = %run.run_id(),
                        task = %task.id,
                        attempts = attempt,
                        error = %message,
                        "Task failed, retries exhausted"
                    );
                    break TaskState::Failed;
                }

                let delay = task.retry.delay_after(attempt);
                metrics().task_retries.inc();
                warn!(
                    run_id = %run.run_id(),
                    task = %task.id,
                    attempt,
                    max_attempts = task.retry.max_attempts,
                    delay_ms = %delay.as_millis(),
                    error = %message,
                    "Task attempt failed, retrying"
                );

                tokio::select! {
                    _ = cancel.cancelled() => break TaskState::Cancelled,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    };

    run.update_node(&task.id, |n| {
        n.state = state;
        n.finished_at = Some(Utc::now());
    });
    info!(
        run_id = %run.run_id(),
        task = %task.id,
        state = %state,
        attempts = attempt,
        "Task state changed"
    );
    state
}
