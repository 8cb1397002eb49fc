//! Streaming pipeline and the work around it.
//!
//! - Pipeline (source → dedup → enrichment → warehouse, checkpointed)
//! - Reference data store and loaders
//! - Job slot and task actions for the orchestrator
//! - Built-in pipeline graph
//! - Housekeeping (metrics flush, health checks)

pub mod config;
pub mod enrichment;
pub mod graph;
pub mod jobs;
pub mod pipeline;
pub mod reference;
pub mod scheduler;

pub use config::*;
pub use enrichment::{enrich, enrich_batch, EnrichedBatch, EnrichmentMiss, MissPolicy};
pub use graph::*;
pub use jobs::*;
pub use pipeline::*;
pub use reference::*;
pub use scheduler::*;
