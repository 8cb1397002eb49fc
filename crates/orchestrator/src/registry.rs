//! Run registry: at most one active run per graph name.

use crate::error::{Error, Result};
use crate::run::RunHandle;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug)]
pub struct RunRegistry {
    /// Graph name → active run id. Admission is a compare-and-set on this map.
    active: Mutex<HashMap<String, Uuid>>,
    runs: RwLock<HashMap<Uuid, Arc<RunHandle>>>,
    /// Graph name → run ids, oldest first.
    history: RwLock<HashMap<String, VecDeque<Uuid>>>,
    max_history: usize,
}

impl RunRegistry {
    pub fn new(max_history: usize) -> Self {
        Self {
            active: Mutex::new(HashMap::new()),
            runs: RwLock::new(HashMap::new()),
            history: RwLock::new(HashMap::new()),
            max_history: max_history.max(1),
        }
    }

    /// Admit `handle` as the active run of its graph, or reject it when
    /// another run of that graph is still active.
    pub fn admit(&self, handle: Arc<RunHandle>) -> Result<Arc<RunHandle>> {
        let graph = handle.graph().to_string();
        {
            let mut active = self.active.lock();
            if let Some(&active_run_id) = active.get(&graph) {
                return Err(Error::DuplicateRun {
                    graph,
                    active_run_id,
                });
            }
            active.insert(graph.clone(), handle.run_id());
        }

        self.runs.write().insert(handle.run_id(), handle.clone());

        let evicted: Vec<Uuid> = {
            let mut history = self.history.write();
            let ids = history.entry(graph).or_default();
            ids.push_back(handle.run_id());
            let excess = ids.len().saturating_sub(self.max_history);
            ids.drain(..excess).collect()
        };
        if !evicted.is_empty() {
            let mut runs = self.runs.write();
            for id in evicted {
                runs.remove(&id);
            }
        }

        Ok(handle)
    }

    /// Release the graph slot held by `run_id`. A no-op if another run holds it.
    pub fn release(&self, graph: &str, run_id: Uuid) {
        let mut active = self.active.lock();
        if active.get(graph) == Some(&run_id) {
            active.remove(graph);
        }
    }

    pub fn get(&self, run_id: Uuid) -> Option<Arc<RunHandle>> {
        self.runs.read().get(&run_id).cloned()
    }

    pub fn active_run(&self, graph: &str) -> Option<Uuid> {
        self.active.lock().get(graph).copied()
    }

    pub fn active_runs(&self) -> Vec<Arc<RunHandle>> {
        let ids: Vec<Uuid> = self.active.lock().values().copied().collect();
        let runs = self.runs.read();
        ids.iter().filter_map(|id| runs.get(id).cloned()).collect()
    }

    /// Runs of `graph`, newest first.
    pub fn runs_of(&self, graph: &str) -> Vec<Arc<RunHandle>> {
        let history = self.history.read();
        let runs = self.runs.read();
        history
            .get(graph)
            .map(|ids| ids.iter().rev().filter_map(|id| runs.get(id).cloned()).collect())
            .unwrap_or_default()
    }
}

impl Default for RunRegistry {
    fn default() -> Self {
        Self::new(100)
    }
}
