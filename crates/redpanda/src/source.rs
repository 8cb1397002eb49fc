//! Event source contract.
//!
//! Delivery is at-least-once: after a restart the source resumes from the
//! last committed position of each partition and may hand out records that
//! were already processed. Deduplication downstream absorbs that.

use async_trait::async_trait;
use engine_core::{PartitionPositions, Result, SourceRecord};

/// Records returned by one poll.
#[derive(Debug, Default)]
pub struct PolledBatch {
    /// Decoded records, ordered by (partition, offset).
    pub records: Vec<SourceRecord>,
    /// Next offset per partition once this batch is processed. Covers
    /// malformed records too so they are not fetched again.
    pub next_positions: PartitionPositions,
    /// Records skipped because they could not be decoded or validated.
    pub malformed: usize,
}

impl PolledBatch {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty() && self.malformed == 0
    }
}

/// A partitioned, ordered-per-partition stream of order events.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Name used in logs and errors.
    fn name(&self) -> &str;

    /// Fetch up to `max_records`, waiting at most the configured bound when
    /// nothing is available. Transient failures are retried internally; a
    /// sustained outage is `Error::SourceUnavailable`.
    async fn poll(&self, max_records: usize) -> Result<PolledBatch>;

    /// Advance the durable read position of `partition` to `offset` (the
    /// next offset to read). Only called after the batch was persisted.
    async fn commit(&self, partition: i32, offset: i64) -> Result<()>;

    /// Resume from checkpointed positions.
    async fn seek(&self, positions: &PartitionPositions) -> Result<()>;

    /// Drop uncommitted read progress, so the next poll re-reads from the
    /// committed positions.
    async fn rewind(&self);

    /// Last committed position per partition.
    fn committed_positions(&self) -> PartitionPositions;

    /// Drop cached connections after an error.
    async fn reset_connection(&self) {}
}
