//! Redpanda event source for the order pipeline.

pub mod client;
pub mod config;
pub mod consumer;
pub mod health;
pub mod source;

pub use config::*;
pub use consumer::*;
pub use source::*;
