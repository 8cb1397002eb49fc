//! In-process checkpoint store for tests and single-run tooling.

use crate::CheckpointStore;
use async_trait::async_trait;
use engine_core::{Checkpoint, Error, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};

/// Stores serialized checkpoints so loads go through the same parsing and
/// validation as the file store.
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    entries: Mutex<HashMap<String, Vec<u8>>>,
    failing_saves: AtomicU32,
    saves: AtomicU32,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite the stored bytes for `pipeline_id` as-is.
    pub fn put_raw(&self, pipeline_id: &str, bytes: Vec<u8>) {
        self.entries.lock().insert(pipeline_id.to_string(), bytes);
    }

    /// Make the next `n` saves fail with a checkpoint error.
    pub fn fail_next_saves(&self, n: u32) {
        self.failing_saves.store(n, Ordering::SeqCst);
    }

    /// Successful saves so far.
    pub fn save_count(&self) -> u32 {
        self.saves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn load(&self, pipeline_id: &str) -> Result<Option<Checkpoint>> {
        let bytes = self.entries.lock().get(pipeline_id).cloned();
        match bytes {
            Some(bytes) => {
                let checkpoint = Checkpoint::from_bytes(&bytes)?;
                checkpoint.verify_owner(pipeline_id)?;
                Ok(Some(checkpoint))
            }
            None => Ok(None),
        }
    }

    async fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        let failing = self
            .failing_saves
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if failing.is_ok() {
            return Err(Error::checkpoint("checkpoint store unavailable"));
        }

        let bytes = checkpoint.to_bytes()?;
        self.entries
            .lock()
            .insert(checkpoint.pipeline_id.clone(), bytes);
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
