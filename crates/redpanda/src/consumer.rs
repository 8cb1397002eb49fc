//! Redpanda consumer for order events.
//!
//! Uses rskafka with manual position tracking:
//! - One partition client per configured partition, fetched concurrently
//! - Read positions advance on poll, committed positions only on `commit`
//! - Malformed payloads are counted and skipped but still consume offsets
//! - Transient fetch failures retry with exponential backoff before the
//!   source is reported unavailable

use crate::client::connect;
use crate::config::{RedpandaConfig, StartFrom};
use crate::source::{EventSource, PolledBatch};
use async_trait::async_trait;
use engine_core::{Error, EventRecord, PartitionPositions, Result, SourceRecord};
use parking_lot::Mutex;
use rskafka::client::partition::{OffsetAt, PartitionClient, UnknownTopicHandling};
use std::collections::HashMap;
use std::sync::Arc;
use telemetry::metrics;
use tokio::sync::RwLock;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Raw fetch result for one partition: the position the fetch started at and
/// the (offset, value) pairs returned.
#[derive(Debug, Default)]
pub struct PartitionFetch {
    pub partition: i32,
    pub start: i64,
    pub records: Vec<(i64, Option<Vec<u8>>)>,
}

#[derive(Debug, Default)]
struct Positions {
    /// Next offset to read per partition.
    read: PartitionPositions,
    /// Next offset after the last durably processed record per partition.
    committed: PartitionPositions,
}

/// Consumer for reading order events from Redpanda.
pub struct Consumer {
    config: RedpandaConfig,
    name: String,
    clients: RwLock<HashMap<i32, Arc<PartitionClient>>>,
    positions: Mutex<Positions>,
}

impl Consumer {
    /// Creates a consumer. Connections are opened lazily on first poll.
    pub fn new(config: RedpandaConfig) -> Self {
        info!(
            topic = %config.topic,
            partitions = ?config.partitions,
            start_from = ?config.start_from,
            "Creating Redpanda consumer"
        );

        let name = format!("redpanda:{}", config.topic);
        Self {
            config,
            name,
            clients: RwLock::new(HashMap::new()),
            positions: Mutex::new(Positions::default()),
        }
    }

    pub fn config(&self) -> &RedpandaConfig {
        &self.config
    }

    /// Returns cached partition clients, connecting and resolving start
    /// offsets for partitions that have no position yet.
    async fn ensure_connected(&self) -> Result<HashMap<i32, Arc<PartitionClient>>> {
        {
            let clients = self.clients.read().await;
            if clients.len() == self.config.partitions.len() {
                return Ok(clients.clone());
            }
        }

        let client = connect(&self.config).await?;
        let mut connected = HashMap::with_capacity(self.config.partitions.len());

        for &partition in &self.config.partitions {
            let partition_client = client
                .partition_client(
                    self.config.topic.clone(),
                    partition,
                    UnknownTopicHandling::Error,
                )
                .await
                .map_err(|e| {
                    Error::source_failed(format!(
                        "failed to get partition client for {}/{}: {}",
                        self.config.topic, partition, e
                    ))
                })?;
            let partition_client = Arc::new(partition_client);

            let known = self.positions.lock().read.contains_key(&partition);
            if !known {
                let at = match self.config.start_from {
                    StartFrom::Earliest => OffsetAt::Earliest,
                    StartFrom::Latest => OffsetAt::Latest,
                };
                let offset = partition_client.get_offset(at).await.map_err(|e| {
                    Error::source_failed(format!("failed to get offset: {}", e))
                })?;

                let mut positions = self.positions.lock();
                positions.read.entry(partition).or_insert(offset);
                positions.committed.entry(partition).or_insert(offset);

                info!(
                    topic = %self.config.topic,
                    partition,
                    offset,
                    "Partition initialized at offset"
                );
            }

            connected.insert(partition, partition_client);
        }

        let mut clients = self.clients.write().await;
        *clients = connected.clone();
        Ok(connected)
    }

    /// One fetch round over all partitions.
    async fn fetch_once(&self) -> Result<Vec<PartitionFetch>> {
        let clients = self.ensure_connected().await?;
        let read = self.positions.lock().read.clone();
        let max_wait_ms = i32::try_from(self.config.max_wait_ms).unwrap_or(i32::MAX);
        let max_bytes = self.config.max_bytes.max(1);

        let mut set = JoinSet::new();
        for (partition, client) in clients {
            let start = read.get(&partition).copied().unwrap_or(0);
            set.spawn(async move {
                let result = client
                    .fetch_records(start, 1..max_bytes, max_wait_ms)
                    .await
                    .map(|(records, _high_watermark)| PartitionFetch {
                        partition,
                        start,
                        records: records
                            .into_iter()
                            .map(|r| (r.offset, r.record.value))
                            .collect(),
                    });
                (partition, result)
            });
        }

        let mut fetched = Vec::new();
        while let Some(joined) = set.join_next().await {
            let (partition, result) =
                joined.map_err(|e| Error::internal(format!("fetch task failed: {}", e)))?;
            let fetch = result.map_err(|e| {
                Error::source_failed(format!("fetch from partition {} failed: {}", partition, e))
            })?;
            fetched.push(fetch);
        }
        Ok(fetched)
    }

    /// Drops cached partition clients.
    async fn drop_clients(&self) {
        self.clients.write().await.clear();
    }
}

/// Turns raw partition fetches into a batch of at most `max_records` decoded
/// records. Offsets below a partition's start position are ignored since a
/// fetch can return the whole compressed record batch around it.
///
/// The record budget is dealt round-robin across partitions, one record per
/// partition per turn, so a saturated partition cannot starve the others.
/// Records of one partition stay in offset order.
pub fn assemble_batch(mut fetched: Vec<PartitionFetch>, max_records: usize) -> PolledBatch {
    fetched.sort_by_key(|f| f.partition);

    let mut queues: Vec<(i32, std::vec::IntoIter<(i64, Option<Vec<u8>>)>)> = fetched
        .into_iter()
        .map(|fetch| {
            let mut records = fetch.records;
            records.retain(|(offset, _)| *offset >= fetch.start);
            records.sort_by_key(|(offset, _)| *offset);
            (fetch.partition, records.into_iter())
        })
        .collect();

    let mut batch = PolledBatch::default();
    let mut taken = 0usize;

    while taken < max_records && !queues.is_empty() {
        queues.retain_mut(|(partition, records)| {
            if taken >= max_records {
                return true;
            }
            let Some((offset, value)) = records.next() else {
                return false;
            };
            taken += 1;
            take_record(&mut batch, *partition, offset, value);
            true
        });
    }

    batch
}

fn take_record(batch: &mut PolledBatch, partition: i32, offset: i64, value: Option<Vec<u8>>) {
    batch.next_positions.insert(partition, offset + 1);

    let decoded = match value {
        Some(bytes) => EventRecord::decode(&bytes),
        None => Err(Error::invalid_record("empty record value")),
    };
    match decoded {
        Ok(record) => batch.records.push(SourceRecord {
            partition,
            offset,
            record,
        }),
        Err(e) => {
            batch.malformed += 1;
            warn!(
                partition,
                offset,
                error = %e,
                "Skipping malformed record"
            );
        }
    }
}

#[async_trait]
impl EventSource for Consumer {
    fn name(&self) -> &str {
        &self.name
    }

    async fn poll(&self, max_records: usize) -> Result<PolledBatch> {
        let start = std::time::Instant::now();
        let backoff = self.config.backoff();
        let attempts = self.config.retries.max(1);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            match self.fetch_once().await {
                Ok(fetched) => {
                    let batch = assemble_batch(fetched, max_records);
                    {
                        let mut positions = self.positions.lock();
                        for (&partition, &next) in &batch.next_positions {
                            positions.read.insert(partition, next);
                        }
                    }

                    metrics().records_polled.inc_by(batch.records.len() as u64);
                    if batch.malformed > 0 {
                        metrics().records_malformed.inc_by(batch.malformed as u64);
                    }

                    debug!(
                        records = batch.records.len(),
                        malformed = batch.malformed,
                        positions = ?batch.next_positions,
                        latency_ms = %start.elapsed().as_millis(),
                        "Polled batch from Redpanda"
                    );
                    return Ok(batch);
                }
                Err(e) => {
                    metrics().source_errors.inc();
                    last_error = e.to_string();
                    self.drop_clients().await;

                    if attempt < attempts {
                        let delay = backoff.delay(attempt);
                        warn!(
                            attempt,
                            max_attempts = attempts,
                            delay_ms = %delay.as_millis(),
                            error = %e,
                            "Redpanda fetch failed, retrying"
                        );
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        Err(Error::source_unavailable(&self.name, attempts, last_error))
    }

    async fn commit(&self, partition: i32, offset: i64) -> Result<()> {
        let mut positions = self.positions.lock();
        let committed = positions.committed.entry(partition).or_insert(offset);
        if offset < *committed {
            return Err(Error::source_failed(format!(
                "refusing to move partition {} back from {} to {}",
                partition, committed, offset
            )));
        }
        let prev = std::mem::replace(committed, offset);

        let read = positions.read.entry(partition).or_insert(offset);
        if *read < offset {
            *read = offset;
        }

        debug!(partition, prev_offset = prev, new_offset = offset, "Committed offset");
        Ok(())
    }

    async fn seek(&self, positions: &PartitionPositions) -> Result<()> {
        let mut current = self.positions.lock();
        for (&partition, &offset) in positions {
            if !self.config.partitions.contains(&partition) {
                warn!(partition, "Checkpoint names a partition this consumer does not read");
                continue;
            }
            current.read.insert(partition, offset);
            current.committed.insert(partition, offset);
        }
        info!(positions = ?current.committed, "Consumer positioned from checkpoint");
        Ok(())
    }

    async fn rewind(&self) {
        let mut positions = self.positions.lock();
        positions.read = positions.committed.clone();
    }

    fn committed_positions(&self) -> PartitionPositions {
        self.positions.lock().committed.clone()
    }

    async fn reset_connection(&self) {
        self.drop_clients().await;
        info!("Consumer connection reset");
    }
}
