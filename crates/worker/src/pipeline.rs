//! Streaming pipeline driver.
//!
//! Each micro-batch goes through:
//! 1. Poll the source
//! 2. Classify records with the dedup engine
//! 3. Enrich novel records against one reference snapshot
//! 4. Upsert into the warehouse, retrying with backoff
//! 5. Write the checkpoint (positions + dedup state)
//! 6. Commit source offsets
//!
//! Steps 2-5 hold the engine lock. If anything fails after step 2 the
//! in-memory engine is discarded and rebuilt from the last checkpoint, and
//! the source is rewound to its committed positions, so the batch is
//! reprocessed against exactly the state it was first seen with.

use crate::config::PipelineConfig;
use crate::enrichment::{enrich_batch, MissPolicy};
use crate::reference::ReferenceStore;
use async_trait::async_trait;
use checkpoint::CheckpointStore;
use clickhouse_client::WarehouseSink;
use engine_core::{
    Backoff, Checkpoint, DedupConfig, DedupEngine, Error, Result,
};
use redpanda::EventSource;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use telemetry::{health, metrics};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Counts for one processed micro-batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub batch_id: Option<String>,
    pub polled: usize,
    pub malformed: usize,
    pub novel: usize,
    pub duplicates: usize,
    pub late_dropped: usize,
    pub written: usize,
    pub quarantined: usize,
    pub miss_dropped: usize,
}

#[derive(Debug, Default)]
struct EngineState {
    /// `None` until recovered, and again after a failed batch.
    engine: Option<DedupEngine>,
    sequence: u64,
}

/// Long-running unit of work the orchestrator submits and monitors.
#[async_trait]
pub trait StreamingJob: Send + Sync {
    fn name(&self) -> &str;

    /// Run until `cancel` fires (`Ok`) or a fatal error occurs (`Err`).
    async fn run(&self, cancel: CancellationToken) -> Result<()>;
}

pub struct Pipeline {
    pipeline_id: String,
    dedup: DedupConfig,
    max_batch_records: usize,
    miss_policy: MissPolicy,
    sink_max_attempts: u32,
    sink_backoff: Backoff,
    pause_backoff: Backoff,
    source: Arc<dyn EventSource>,
    sink: Arc<dyn WarehouseSink>,
    checkpoints: Arc<dyn CheckpointStore>,
    references: Arc<ReferenceStore>,
    state: Mutex<EngineState>,
}

impl Pipeline {
    pub fn new(
        config: &PipelineConfig,
        source: Arc<dyn EventSource>,
        sink: Arc<dyn WarehouseSink>,
        checkpoints: Arc<dyn CheckpointStore>,
        references: Arc<ReferenceStore>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            pipeline_id: config.pipeline_id.clone(),
            dedup: config.dedup_config()?,
            max_batch_records: config.max_batch_records,
            miss_policy: config.miss_policy,
            sink_max_attempts: config.sink_max_attempts,
            sink_backoff: config.sink_backoff(),
            pause_backoff: config.pause_backoff(),
            source,
            sink,
            checkpoints,
            references,
            state: Mutex::new(EngineState::default()),
        })
    }

    pub fn pipeline_id(&self) -> &str {
        &self.pipeline_id
    }

    /// Number of committed micro-batches.
    pub async fn sequence(&self) -> u64 {
        self.state.lock().await.sequence
    }

    /// Load the checkpoint and position the source. Fails with
    /// `StateCorruption` when the checkpoint cannot be trusted.
    pub async fn recover(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        self.recover_locked(&mut state).await
    }

    async fn recover_locked(&self, state: &mut EngineState) -> Result<()> {
        match self.checkpoints.load(&self.pipeline_id).await? {
            Some(checkpoint) => {
                let engine = DedupEngine::restore(self.dedup, checkpoint.dedup_snapshot())?;
                self.source.seek(&checkpoint.positions).await?;
                info!(
                    pipeline_id = %self.pipeline_id,
                    sequence = checkpoint.sequence,
                    positions = ?checkpoint.positions,
                    watermark = ?checkpoint.watermark,
                    state_size = engine.state_size(),
                    "Recovered from checkpoint"
                );
                state.sequence = checkpoint.sequence;
                state.engine = Some(engine);
            }
            None => {
                self.source.rewind().await;
                info!(pipeline_id = %self.pipeline_id, "No checkpoint, starting fresh");
                state.sequence = 0;
                state.engine = Some(DedupEngine::new(self.dedup));
            }
        }
        Ok(())
    }

    /// Process one micro-batch end to end.
    pub async fn run_once(&self) -> Result<BatchReport> {
        let mut state = self.state.lock().await;
        if state.engine.is_none() {
            self.recover_locked(&mut state).await?;
        }

        let result = self.process(&mut state).await;
        if result.is_err() {
            // Forget uncommitted progress; the batch will be re-read and
            // re-classified from the last checkpoint.
            state.engine = None;
            self.source.rewind().await;
        }
        result
    }

    async fn process(&self, state: &mut EngineState) -> Result<BatchReport> {
        let start = Instant::now();
        let polled = self.source.poll(self.max_batch_records).await?;
        if polled.is_empty() {
            return Ok(BatchReport::default());
        }

        let mut report = BatchReport {
            polled: polled.records.len(),
            malformed: polled.malformed,
            ..Default::default()
        };

        let engine = state
            .engine
            .as_mut()
            .ok_or_else(|| Error::internal("dedup engine not recovered"))?;
        let outcome = engine.process_batch(polled.records);
        report.novel = outcome.novel.len();
        report.duplicates = outcome.duplicates;
        report.late_dropped = outcome.late_dropped;

        metrics().records_novel.inc_by(outcome.novel.len() as u64);
        metrics().records_duplicate.inc_by(outcome.duplicates as u64);
        metrics().records_late_dropped.inc_by(outcome.late_dropped as u64);
        metrics().dedup_evictions.inc_by(outcome.evicted as u64);

        let snapshot = self.references.snapshot();
        let enriched = enrich_batch(
            outcome.novel.iter().map(|r| &r.record),
            &snapshot,
            self.miss_policy,
        )?;
        report.quarantined = enriched.quarantined.len();
        report.miss_dropped = enriched.dropped;

        let sequence = state.sequence + 1;
        let batch_id = format!("{}-{}", self.pipeline_id, sequence);

        if !enriched.quarantined.is_empty() {
            let quarantined = &enriched.quarantined;
            self.with_sink_retry(&batch_id, "quarantine", quarantined.len(), || {
                self.sink.write_quarantine(&batch_id, quarantined)
            })
            .await?;
        }
        let records = &enriched.records;
        let confirmation = self
            .with_sink_retry(&batch_id, "upsert", records.len(), || {
                self.sink.write_batch(&batch_id, records)
            })
            .await?;
        report.written = confirmation.rows_written;

        let mut positions = self.source.committed_positions();
        positions.extend(polled.next_positions.iter().map(|(&p, &o)| (p, o)));

        let checkpoint_start = Instant::now();
        let checkpoint = Checkpoint::new(&self.pipeline_id, sequence, positions, engine.snapshot());
        self.checkpoints.save(&checkpoint).await?;
        metrics()
            .checkpoint_latency_ms
            .observe(checkpoint_start.elapsed().as_millis() as u64);
        metrics().checkpoints_written.inc();
        state.sequence = sequence;

        for (&partition, &offset) in &polled.next_positions {
            self.source.commit(partition, offset).await?;
        }

        metrics().batches_committed.inc();
        metrics().batch_latency_ms.observe(start.elapsed().as_millis() as u64);
        if let Some(wm) = outcome.watermark {
            metrics().watermark_ms.set(wm.timestamp_millis());
        }
        metrics().dedup_state_size.set(outcome.state_size as i64);

        info!(
            batch_id = %batch_id,
            polled = report.polled,
            malformed = report.malformed,
            novel = report.novel,
            duplicates = report.duplicates,
            late_dropped = report.late_dropped,
            written = report.written,
            quarantined = report.quarantined,
            watermark = ?outcome.watermark,
            state_size = outcome.state_size,
            latency_ms = %start.elapsed().as_millis(),
            "Committed batch"
        );

        report.batch_id = Some(batch_id);
        Ok(report)
    }

    /// Run a sink write with exponential backoff. Exhaustion is fatal.
    async fn with_sink_retry<T, F, Fut>(
        &self,
        batch_id: &str,
        write: &'static str,
        records: usize,
        mut op: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt >= self.sink_max_attempts => {
                    error!(
                        batch_id,
                        write,
                        records,
                        attempts = attempt,
                        error = %e,
                        "Sink retries exhausted"
                    );
                    return Err(Error::sink_exhausted(
                        batch_id,
                        records,
                        attempt,
                        format!("{} failed: {}", write, e),
                    ));
                }
                Err(e) => {
                    let delay = self.sink_backoff.delay(attempt);
                    metrics().sink_retries.inc();
                    warn!(
                        batch_id,
                        write,
                        attempt,
                        max_attempts = self.sink_max_attempts,
                        delay_ms = %delay.as_millis(),
                        error = %e,
                        "Sink write failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

#[async_trait]
impl StreamingJob for Pipeline {
    fn name(&self) -> &str {
        &self.pipeline_id
    }

    async fn run(&self, cancel: CancellationToken) -> Result<()> {
        info!(
            pipeline_id = %self.pipeline_id,
            source = %self.source.name(),
            window_secs = self.dedup.window.num_seconds(),
            allowed_lateness_secs = self.dedup.allowed_lateness.num_seconds(),
            miss_policy = ?self.miss_policy,
            "Pipeline starting"
        );
        self.recover().await?;
        health().source.set_healthy();

        let mut paused_for = 0u32;
        loop {
            if cancel.is_cancelled() {
                break;
            }

            let result = tokio::select! {
                _ = cancel.cancelled() => break,
                result = self.run_once() => result,
            };

            match result {
                Ok(report) => {
                    if paused_for > 0 {
                        info!(pipeline_id = %self.pipeline_id, "Source recovered, resuming");
                        paused_for = 0;
                        metrics().source_paused.set(0);
                        health().source.set_healthy();
                    }
                    if report.polled == 0 && report.malformed == 0 {
                        debug!("Idle poll");
                    }
                }
                Err(e) if e.is_fatal() => {
                    error!(
                        pipeline_id = %self.pipeline_id,
                        code = e.error_code(),
                        error = %e,
                        "Pipeline halted"
                    );
                    return Err(e);
                }
                Err(e) => {
                    paused_for += 1;
                    let delay = self.pause_backoff.delay(paused_for);
                    if matches!(e, Error::SourceUnavailable { .. }) {
                        if paused_for == 1 {
                            metrics().source_pauses.inc();
                        }
                        metrics().source_paused.set(1);
                        health().source.set_unhealthy(format!("paused: {}", e));
                    }
                    warn!(
                        pipeline_id = %self.pipeline_id,
                        code = e.error_code(),
                        error = %e,
                        delay_ms = %delay.as_millis(),
                        "Pipeline paused"
                    );
                    self.source.reset_connection().await;
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        info!(pipeline_id = %self.pipeline_id, "Pipeline stopped");
        Ok(())
    }
}
