//! Error types for the orchestrator.

use uuid::Uuid;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The dependency declarations contain a cycle.
    #[error("cycle detected in graph {graph} involving task {task}")]
    CycleDetected { graph: String, task: String },

    /// A task depends on a name that is neither a task nor a group.
    #[error("task {task} depends on unknown task or group {dependency}")]
    UnknownDependency { task: String, dependency: String },

    /// Two tasks (or a task and a group) share an id.
    #[error("duplicate task id {task} in graph {graph}")]
    DuplicateTask { graph: String, task: String },

    #[error("graph {graph} has no tasks")]
    EmptyGraph { graph: String },

    #[error("graph {graph} is already registered")]
    DuplicateGraph { graph: String },

    #[error("unknown graph {graph}")]
    UnknownGraph { graph: String },

    /// A run for the same graph is still active. Triggers are rejected, not queued.
    #[error("graph {graph} already has an active run {active_run_id}")]
    DuplicateRun { graph: String, active_run_id: Uuid },

    #[error("unknown run {run_id}")]
    UnknownRun { run_id: Uuid },

    #[error("run {run_id} already finished")]
    RunFinished { run_id: Uuid },

    #[error("invalid retry policy: {0}")]
    InvalidRetryPolicy(String),
}

impl Error {
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::CycleDetected { .. } => "DAG_001",
            Self::UnknownDependency { .. } => "DAG_002",
            Self::DuplicateTask { .. } => "DAG_003",
            Self::EmptyGraph { .. } => "DAG_004",
            Self::DuplicateGraph { .. } => "DAG_005",
            Self::UnknownGraph { .. } => "RUN_001",
            Self::DuplicateRun { .. } => "RUN_002",
            Self::UnknownRun { .. } => "RUN_003",
            Self::RunFinished { .. } => "RUN_004",
            Self::InvalidRetryPolicy(_) => "CFG_002",
        }
    }
}
