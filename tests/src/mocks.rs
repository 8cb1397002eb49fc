//! Mock implementations for testing.

use async_trait::async_trait;
use clickhouse_client::{CommitConfirmation, QuarantineRecord, WarehouseSink};
use engine_core::{
    EnrichedRecord, Error, EventRecord, PartitionPositions, ReferenceRows, ReferenceTable,
    Result,
};
use parking_lot::Mutex;
use redpanda::{assemble_batch, EventSource, PartitionFetch, PolledBatch};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use worker::ReferenceLoader;

const IDLE_WAIT: Duration = Duration::from_millis(5);

#[derive(Default)]
struct SourceState {
    log: BTreeMap<i32, Vec<Option<Vec<u8>>>>,
    read: PartitionPositions,
    committed: PartitionPositions,
}

/// In-memory partitioned log implementing `EventSource`.
///
/// Positions behave like the Redpanda consumer: polls advance the read
/// position, commits advance the durable one, and `rewind` drops the gap.
#[derive(Default)]
pub struct MockSource {
    state: Mutex<SourceState>,
    failing_polls: AtomicU32,
    polls: AtomicU32,
}

impl MockSource {
    pub fn new(partitions: &[i32]) -> Self {
        let source = Self::default();
        {
            let mut state = source.state.lock();
            for &p in partitions {
                state.log.insert(p, Vec::new());
            }
        }
        source
    }

    /// Append a record to `partition`. Returns its offset.
    pub fn push(&self, partition: i32, record: &EventRecord) -> i64 {
        let bytes = serde_json::to_vec(record).expect("record serializes");
        self.push_raw(partition, Some(bytes))
    }

    /// Append raw bytes (or a tombstone) to `partition`.
    pub fn push_raw(&self, partition: i32, value: Option<Vec<u8>>) -> i64 {
        let mut state = self.state.lock();
        let log = state.log.entry(partition).or_default();
        log.push(value);
        (log.len() - 1) as i64
    }

    /// Make the next `n` polls fail as if the broker were unreachable.
    pub fn fail_next_polls(&self, n: u32) {
        self.failing_polls.store(n, Ordering::SeqCst);
    }

    pub fn poll_count(&self) -> u32 {
        self.polls.load(Ordering::SeqCst)
    }

    /// Committed position of `partition`, if any.
    pub fn committed(&self, partition: i32) -> Option<i64> {
        self.state.lock().committed.get(&partition).copied()
    }

    fn fetch(&self, max_records: usize) -> PolledBatch {
        let mut state = self.state.lock();
        let fetched: Vec<PartitionFetch> = state
            .log
            .iter()
            .map(|(&partition, log)| {
                let start = state.read.get(&partition).copied().unwrap_or(0);
                PartitionFetch {
                    partition,
                    start,
                    records: log
                        .iter()
                        .enumerate()
                        .skip(start.max(0) as usize)
                        .map(|(offset, value)| (offset as i64, value.clone()))
                        .collect(),
                }
            })
            .collect();

        let batch = assemble_batch(fetched, max_records);
        for (&partition, &next) in &batch.next_positions {
            state.read.insert(partition, next);
        }
        batch
    }
}

#[async_trait]
impl EventSource for MockSource {
    fn name(&self) -> &str {
        "mock"
    }

    async fn poll(&self, max_records: usize) -> Result<PolledBatch> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failing_polls
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if failing.is_ok() {
            return Err(Error::source_unavailable("mock", 1, "broker unreachable"));
        }

        let batch = self.fetch(max_records);
        if batch.is_empty() {
            // Stand-in for the broker's bounded fetch wait.
            tokio::time::sleep(IDLE_WAIT).await;
        }
        Ok(batch)
    }

    async fn commit(&self, partition: i32, offset: i64) -> Result<()> {
        let mut state = self.state.lock();
        let committed = state.committed.entry(partition).or_insert(offset);
        if offset < *committed {
            return Err(Error::source_failed("commit moved backwards"));
        }
        *committed = offset;
        Ok(())
    }

    async fn seek(&self, positions: &PartitionPositions) -> Result<()> {
        let mut state = self.state.lock();
        for (&partition, &offset) in positions {
            state.read.insert(partition, offset);
            state.committed.insert(partition, offset);
        }
        Ok(())
    }

    async fn rewind(&self) {
        let mut state = self.state.lock();
        state.read = state.committed.clone();
    }

    fn committed_positions(&self) -> PartitionPositions {
        self.state.lock().committed.clone()
    }
}

/// Warehouse that upserts by order id, keeping the row with the highest
/// event time like `ReplacingMergeTree(version)` read with `FINAL`.
#[derive(Default)]
pub struct MockWarehouse {
    rows: Mutex<HashMap<String, EnrichedRecord>>,
    quarantine: Mutex<HashMap<String, QuarantineRecord>>,
    batches: Mutex<Vec<String>>,
    failing_writes: AtomicU32,
    failing_quarantine: AtomicU32,
    write_calls: AtomicU32,
}

impl MockWarehouse {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` batch writes fail.
    pub fn fail_next_writes(&self, n: u32) {
        self.failing_writes.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` quarantine writes fail.
    pub fn fail_next_quarantine_writes(&self, n: u32) {
        self.failing_quarantine.store(n, Ordering::SeqCst);
    }

    pub fn row(&self, order_id: &str) -> Option<EnrichedRecord> {
        self.rows.lock().get(order_id).cloned()
    }

    pub fn row_count(&self) -> usize {
        self.rows.lock().len()
    }

    /// Snapshot of every row, sorted by order id.
    pub fn rows(&self) -> Vec<EnrichedRecord> {
        let mut rows: Vec<_> = self.rows.lock().values().cloned().collect();
        rows.sort_by(|a, b| a.order_id.cmp(&b.order_id));
        rows
    }

    pub fn quarantined(&self) -> Vec<QuarantineRecord> {
        self.quarantine.lock().values().cloned().collect()
    }

    /// Batch ids of successful writes, in order.
    pub fn committed_batches(&self) -> Vec<String> {
        self.batches.lock().clone()
    }

    /// Write attempts, including failed ones.
    pub fn write_calls(&self) -> u32 {
        self.write_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WarehouseSink for MockWarehouse {
    async fn write_batch(
        &self,
        batch_id: &str,
        records: &[EnrichedRecord],
    ) -> Result<CommitConfirmation> {
        self.write_calls.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failing_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if failing.is_ok() {
            return Err(Error::sink("mock warehouse unavailable"));
        }

        let mut rows = self.rows.lock();
        for record in records {
            let replace = rows
                .get(&record.order_id)
                .map(|existing| record.event_time >= existing.event_time)
                .unwrap_or(true);
            if replace {
                rows.insert(record.order_id.clone(), record.clone());
            }
        }
        self.batches.lock().push(batch_id.to_string());

        Ok(CommitConfirmation {
            batch_id: batch_id.to_string(),
            rows_written: records.len(),
            committed_at: chrono::Utc::now(),
        })
    }

    async fn write_quarantine(
        &self,
        _batch_id: &str,
        records: &[QuarantineRecord],
    ) -> Result<usize> {
        let failing = self
            .failing_quarantine
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if failing.is_ok() {
            return Err(Error::sink("mock quarantine table unavailable"));
        }

        let mut quarantine = self.quarantine.lock();
        for record in records {
            quarantine.insert(record.event_key.clone(), record.clone());
        }
        Ok(records.len())
    }
}

/// Reference loader serving fixed rows, with scripted failures per table.
pub struct MockLoader {
    customers: ReferenceRows,
    restaurants: ReferenceRows,
    failing: Mutex<HashMap<ReferenceTable, u32>>,
    loads: Mutex<HashMap<ReferenceTable, u32>>,
}

impl MockLoader {
    pub fn new(customers: ReferenceRows, restaurants: ReferenceRows) -> Self {
        Self {
            customers,
            restaurants,
            failing: Mutex::new(HashMap::new()),
            loads: Mutex::new(HashMap::new()),
        }
    }

    /// Make the next `n` loads of `table` fail.
    pub fn fail_next_loads(&self, table: ReferenceTable, n: u32) {
        self.failing.lock().insert(table, n);
    }

    /// Load attempts of `table`, including failed ones.
    pub fn load_count(&self, table: ReferenceTable) -> u32 {
        self.loads.lock().get(&table).copied().unwrap_or(0)
    }
}

#[async_trait]
impl ReferenceLoader for MockLoader {
    async fn load(&self, table: ReferenceTable) -> Result<ReferenceRows> {
        *self.loads.lock().entry(table).or_insert(0) += 1;
        {
            let mut failing = self.failing.lock();
            if let Some(n) = failing.get_mut(&table) {
                if *n > 0 {
                    *n -= 1;
                    return Err(Error::source_failed(format!(
                        "{} endpoint unavailable",
                        table.as_str()
                    )));
                }
            }
        }
        Ok(match table {
            ReferenceTable::Customers => self.customers.clone(),
            ReferenceTable::Restaurants => self.restaurants.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::order_event;

    #[tokio::test]
    async fn test_mock_source_rewind_replays_uncommitted() {
        let source = MockSource::new(&[0]);
        source.push(0, &order_event("a", "o1", 10));
        source.push(0, &order_event("b", "o2", 11));

        let batch = source.poll(1).await.unwrap();
        assert_eq!(batch.records.len(), 1);
        source.commit(0, 1).await.unwrap();

        let batch = source.poll(10).await.unwrap();
        assert_eq!(batch.records[0].offset, 1);

        source.rewind().await;
        let batch = source.poll(10).await.unwrap();
        assert_eq!(batch.records[0].offset, 1);
        assert_eq!(batch.next_positions.get(&0), Some(&2));
    }

    #[tokio::test]
    async fn test_mock_warehouse_upsert_keeps_latest() {
        let warehouse = MockWarehouse::new();
        let newer = EnrichedRecord::unmatched(&order_event("b", "o1", 20), 0);
        let older = EnrichedRecord::unmatched(&order_event("a", "o1", 10), 0);

        warehouse.write_batch("b1", &[newer.clone()]).await.unwrap();
        warehouse.write_batch("b2", &[older]).await.unwrap();

        assert_eq!(warehouse.row_count(), 1);
        assert_eq!(warehouse.row("o1").unwrap().event_key, newer.event_key);
    }
}
