//! HTTP API layer for the order pipeline.
//!
//! Exposes the orchestrator's trigger surface (run-now, status, cancel) and
//! the health probes.

pub mod response;
pub mod routes;
pub mod state;

pub use routes::router;
pub use state::AppState;
