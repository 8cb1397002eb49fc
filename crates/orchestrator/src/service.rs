//! Orchestrator service: graph registry, triggers, status and cancellation.

use crate::dag::TaskGraph;
use crate::error::{Error, Result};
use crate::executor::execute;
use crate::registry::RunRegistry;
use crate::run::{RunHandle, RunReport, RunState, Trigger};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use telemetry::metrics;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

pub struct Orchestrator {
    graphs: RwLock<BTreeMap<String, Arc<TaskGraph>>>,
    registry: RunRegistry,
    shutdown: CancellationToken,
}

impl Orchestrator {
    pub fn new(max_history: usize) -> Arc<Self> {
        Arc::new(Self {
            graphs: RwLock::new(BTreeMap::new()),
            registry: RunRegistry::new(max_history),
            shutdown: CancellationToken::new(),
        })
    }

    pub fn register(&self, graph: TaskGraph) -> Result<()> {
        let mut graphs = self.graphs.write();
        if graphs.contains_key(graph.name()) {
            return Err(Error::DuplicateGraph {
                graph: graph.name().to_string(),
            });
        }
        info!(graph = %graph.name(), tasks = ?graph.task_ids(), "Graph registered");
        graphs.insert(graph.name().to_string(), Arc::new(graph));
        Ok(())
    }

    fn graph(&self, name: &str) -> Result<Arc<TaskGraph>> {
        self.graphs
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UnknownGraph {
                graph: name.to_string(),
            })
    }

    /// Start a run of `graph`. Rejected with `DuplicateRun` while another run
    /// of the same graph is active.
    pub fn trigger(self: &Arc<Self>, graph: &str, trigger: Trigger) -> Result<RunReport> {
        let task_graph = self.graph(graph)?;
        let handle = Arc::new(RunHandle::new(&task_graph, trigger.clone(), &self.shutdown));

        let handle = match self.registry.admit(handle) {
            Ok(handle) => handle,
            Err(e) => {
                metrics().runs_rejected.inc();
                warn!(graph, trigger = ?trigger, error = %e, "Trigger rejected");
                return Err(e);
            }
        };

        metrics().runs_started.inc();
        metrics().active_runs.inc();
        info!(
            run_id = %handle.run_id(),
            graph,
            trigger = ?trigger,
            "Run admitted"
        );

        let report = handle.report();
        let this = self.clone();
        tokio::spawn(async move { this.drive(task_graph, handle).await });
        Ok(report)
    }

    async fn drive(self: Arc<Self>, graph: Arc<TaskGraph>, handle: Arc<RunHandle>) {
        let report = execute(graph.clone(), handle.clone()).await;
        self.registry.release(graph.name(), report.run_id);
        metrics().active_runs.dec();

        match report.state {
            RunState::Succeeded => {
                metrics().runs_succeeded.inc();
                for next in graph.on_success() {
                    let trigger = Trigger::Upstream {
                        graph: graph.name().to_string(),
                        run_id: report.run_id,
                    };
                    if let Err(e) = self.trigger(next, trigger) {
                        warn!(
                            graph = %graph.name(),
                            next = %next,
                            error = %e,
                            "Downstream graph not triggered"
                        );
                    }
                }
            }
            RunState::Failed => metrics().runs_failed.inc(),
            _ => {}
        }
    }

    pub fn run(&self, run_id: Uuid) -> Result<RunReport> {
        self.registry
            .get(run_id)
            .map(|h| h.report())
            .ok_or(Error::UnknownRun { run_id })
    }

    /// Runs of `graph`, newest first.
    pub fn runs(&self, graph: &str) -> Result<Vec<RunReport>> {
        self.graph(graph)?;
        Ok(self
            .registry
            .runs_of(graph)
            .iter()
            .map(|h| h.report())
            .collect())
    }

    pub fn active_run(&self, graph: &str) -> Option<Uuid> {
        self.registry.active_run(graph)
    }

    /// Wait for `run_id` to finish.
    pub async fn wait(&self, run_id: Uuid) -> Result<RunReport> {
        let handle = self
            .registry
            .get(run_id)
            .ok_or(Error::UnknownRun { run_id })?;
        Ok(handle.wait().await)
    }

    /// Request cancellation. In-flight tasks are told to stop; tasks not yet
    /// started are skipped.
    pub fn cancel(&self, run_id: Uuid) -> Result<RunReport> {
        let handle = self
            .registry
            .get(run_id)
            .ok_or(Error::UnknownRun { run_id })?;
        if handle.state().is_terminal() {
            return Err(Error::RunFinished { run_id });
        }
        handle.cancel();
        info!(run_id = %run_id, graph = %handle.graph(), "Run cancellation requested");
        Ok(handle.report())
    }

    /// Trigger every graph that has a schedule at its interval until
    /// shutdown. Ticks that land on an active run are rejected like any
    /// other duplicate trigger.
    pub fn spawn_schedules(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        let scheduled: Vec<(String, std::time::Duration)> = self
            .graphs
            .read()
            .values()
            .filter_map(|g| g.schedule().map(|every| (g.name().to_string(), every)))
            .collect();

        scheduled
            .into_iter()
            .map(|(name, every)| {
                let this = self.clone();
                tokio::spawn(async move {
                    info!(graph = %name, interval_secs = every.as_secs(), "Schedule started");
                    let mut ticker = interval(every);
                    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                    loop {
                        tokio::select! {
                            _ = this.shutdown.cancelled() => break,
                            _ = ticker.tick() => {
                                let _ = this.trigger(&name, Trigger::Scheduled);
                            }
                        }
                    }
                })
            })
            .collect()
    }

    /// Cancel all active runs and stop schedules, then wait for the runs.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        for handle in self.registry.active_runs() {
            let report = handle.wait().await;
            info!(run_id = %report.run_id, state = %report.state, "Run stopped for shutdown");
        }
    }
}
