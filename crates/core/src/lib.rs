//! Core types, deduplication, and checkpoint model for the order pipeline.

pub mod backoff;
pub mod checkpoint;
pub mod dedup;
pub mod error;
pub mod events;
pub mod reference;
pub mod watermark;

pub use backoff::Backoff;
pub use checkpoint::*;
pub use dedup::*;
pub use error::{Error, Result};
pub use events::*;
pub use reference::*;
pub use watermark::WatermarkTracker;
