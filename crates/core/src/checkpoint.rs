//! Checkpoint model for crash recovery.
//!
//! One checkpoint per pipeline instance holds the stream positions, the
//! watermark, and the dedup state as of the last committed micro-batch.
//! It is written after the sink confirmed the batch and before the source
//! offsets are committed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::dedup::{DedupEntry, DedupSnapshot};
use crate::error::{Error, Result};

/// Format version written by this build. Anything else is refused.
pub const CHECKPOINT_VERSION: u32 = 1;

/// Partition id → next offset to read.
pub type PartitionPositions = BTreeMap<i32, i64>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub version: u32,
    pub pipeline_id: String,
    /// Number of micro-batches committed so far.
    pub sequence: u64,
    pub positions: PartitionPositions,
    pub watermark: Option<DateTime<Utc>>,
    pub dedup_state: Vec<DedupEntry>,
    pub created_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn new(
        pipeline_id: impl Into<String>,
        sequence: u64,
        positions: PartitionPositions,
        snapshot: DedupSnapshot,
    ) -> Self {
        Self {
            version: CHECKPOINT_VERSION,
            pipeline_id: pipeline_id.into(),
            sequence,
            positions,
            watermark: snapshot.watermark,
            dedup_state: snapshot.entries,
            created_at: Utc::now(),
        }
    }

    pub fn dedup_snapshot(&self) -> DedupSnapshot {
        DedupSnapshot {
            watermark: self.watermark,
            entries: self.dedup_state.clone(),
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parse a stored checkpoint. Any problem is a state corruption: the
    /// pipeline must not guess its way past an unreadable checkpoint.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let raw: serde_json::Value = serde_json::from_slice(bytes)
            .map_err(|e| Error::state_corruption(format!("checkpoint unreadable: {}", e)))?;

        let version = raw
            .get("version")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| Error::state_corruption("checkpoint has no version"))?;
        if version != u64::from(CHECKPOINT_VERSION) {
            return Err(Error::state_corruption(format!(
                "checkpoint version {} is incompatible with supported version {}",
                version, CHECKPOINT_VERSION
            )));
        }

        serde_json::from_value(raw)
            .map_err(|e| Error::state_corruption(format!("checkpoint malformed: {}", e)))
    }

    /// Check that this checkpoint belongs to `pipeline_id`.
    pub fn verify_owner(&self, pipeline_id: &str) -> Result<()> {
        if self.pipeline_id != pipeline_id {
            return Err(Error::state_corruption(format!(
                "checkpoint belongs to pipeline {}, not {}",
                self.pipeline_id, pipeline_id
            )));
        }
        Ok(())
    }
}
