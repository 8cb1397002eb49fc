//! Application state shared across handlers.

use orchestrator::Orchestrator;
use std::sync::Arc;
use worker::JobSlot;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Graph registry, triggers and run status
    pub orchestrator: Arc<Orchestrator>,
    /// Streaming job, reported by the health endpoint when present
    pub job: Option<Arc<JobSlot>>,
}

impl AppState {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            orchestrator,
            job: None,
        }
    }

    pub fn with_job(mut self, job: Arc<JobSlot>) -> Self {
        self.job = Some(job);
        self
    }
}
