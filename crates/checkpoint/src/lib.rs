//! Durable checkpoint storage.
//!
//! A store keeps exactly one checkpoint per pipeline id and replaces it
//! atomically: a reader sees either the previous checkpoint or the new one,
//! never a partial write.

pub mod file;
pub mod memory;

pub use file::FileCheckpointStore;
pub use memory::MemoryCheckpointStore;

use async_trait::async_trait;
use engine_core::{Checkpoint, Result};

#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Latest checkpoint for `pipeline_id`, or `None` on first start.
    ///
    /// An unreadable or foreign checkpoint is `Error::StateCorruption`.
    async fn load(&self, pipeline_id: &str) -> Result<Option<Checkpoint>>;

    /// Replace the checkpoint for `checkpoint.pipeline_id`.
    async fn save(&self, checkpoint: &Checkpoint) -> Result<()>;
}
