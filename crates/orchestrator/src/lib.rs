//! Dependency-graph orchestrator.
//!
//! Graphs are declared with [`GraphBuilder`], resolved once into a
//! [`TaskGraph`], and registered with the [`Orchestrator`], which admits at
//! most one active run per graph, executes independent branches
//! concurrently, and chains graphs on success.

pub mod dag;
pub mod error;
pub mod executor;
pub mod registry;
pub mod run;
pub mod service;
pub mod task;

pub use dag::{GraphBuilder, TaskGraph};
pub use error::{Error, Result};
pub use registry::RunRegistry;
pub use run::{FailedNode, RunHandle, RunReport, RunState, Trigger};
pub use service::Orchestrator;
pub use task::{NodeStatus, RetryPolicy, TaskAction, TaskContext, TaskSpec, TaskState};
