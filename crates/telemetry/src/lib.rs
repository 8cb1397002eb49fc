//! Telemetry for the order pipeline.
//!
//! Structured logs are the monitoring feed: every batch commit, node
//! transition, and run transition is a `tracing` event. Counters are kept
//! in-process and flushed to ClickHouse by the housekeeping scheduler.

pub mod health;
pub mod metrics;
pub mod tracing_setup;

pub use health::*;
pub use metrics::*;
pub use tracing_setup::*;
