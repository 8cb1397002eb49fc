//! Watermark-driven deduplication.
//!
//! Each micro-batch goes through:
//! 1. watermark = max(watermark, max(event_time in batch) - allowed_lateness)
//! 2. per record, in batch order:
//!    - `event_time < watermark - window` → late-drop
//!    - key seen with `event_time <= stored_time` → duplicate
//!    - otherwise novel; `state[key] = event_time`
//! 3. evict every key with `stored_time < watermark - window`
//!
//! A key that was evicted and then re-delivered below the floor is a
//! late-drop, never novel. Records that arrive later than that cannot be
//! deduplicated against anything and are lost on purpose.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::{BTreeSet, HashMap};

use crate::error::{Error, Result};
use crate::events::{EventRecord, SourceRecord};
use crate::watermark::WatermarkTracker;

/// Anything the engine can deduplicate.
pub trait DedupItem {
    fn dedup_key(&self) -> Cow<'_, str>;
    fn event_time(&self) -> DateTime<Utc>;
}

impl DedupItem for EventRecord {
    fn dedup_key(&self) -> Cow<'_, str> {
        EventRecord::dedup_key(self)
    }

    fn event_time(&self) -> DateTime<Utc> {
        self.event_time
    }
}

impl DedupItem for SourceRecord {
    fn dedup_key(&self) -> Cow<'_, str> {
        self.record.dedup_key()
    }

    fn event_time(&self) -> DateTime<Utc> {
        self.record.event_time
    }
}

/// Window sizing for the engine. Both values come from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DedupConfig {
    pub window: Duration,
    pub allowed_lateness: Duration,
}

impl DedupConfig {
    pub fn new(window: Duration, allowed_lateness: Duration) -> Result<Self> {
        if window < Duration::zero() {
            return Err(Error::config("dedup window must not be negative"));
        }
        if allowed_lateness < Duration::zero() {
            return Err(Error::config("allowed lateness must not be negative"));
        }
        Ok(Self {
            window,
            allowed_lateness,
        })
    }

    pub fn from_secs(window_secs: u64, allowed_lateness_secs: u64) -> Result<Self> {
        let window = i64::try_from(window_secs)
            .ok()
            .and_then(Duration::try_seconds)
            .ok_or_else(|| Error::config("dedup window out of range"))?;
        let lateness = i64::try_from(allowed_lateness_secs)
            .ok()
            .and_then(Duration::try_seconds)
            .ok_or_else(|| Error::config("allowed lateness out of range"))?;
        Self::new(window, lateness)
    }
}

/// How a single record was classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Novel,
    Duplicate,
    LateDrop,
}

/// Result of one micro-batch.
#[derive(Debug)]
pub struct BatchOutcome<T> {
    /// Records to emit downstream, in input order.
    pub novel: Vec<T>,
    pub duplicates: usize,
    pub late_dropped: usize,
    pub evicted: usize,
    pub watermark: Option<DateTime<Utc>>,
    pub state_size: usize,
}

impl<T> BatchOutcome<T> {
    pub fn total(&self) -> usize {
        self.novel.len() + self.duplicates + self.late_dropped
    }
}

/// One entry of the persisted dedup state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DedupEntry {
    pub key: String,
    pub event_time: DateTime<Utc>,
}

/// Serializable point-in-time copy of the engine, taken between batches.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DedupSnapshot {
    pub watermark: Option<DateTime<Utc>>,
    /// Sorted by key.
    pub entries: Vec<DedupEntry>,
}

/// Bounded-memory dedup state keyed by event time.
#[derive(Debug)]
pub struct DedupEngine {
    config: DedupConfig,
    watermark: WatermarkTracker,
    seen: HashMap<String, DateTime<Utc>>,
    /// (stored_time, key), for eviction in time order.
    by_time: BTreeSet<(DateTime<Utc>, String)>,
}

impl DedupEngine {
    pub fn new(config: DedupConfig) -> Self {
        Self {
            watermark: WatermarkTracker::new(config.allowed_lateness),
            config,
            seen: HashMap::new(),
            by_time: BTreeSet::new(),
        }
    }

    /// Rebuild an engine from a checkpointed snapshot.
    pub fn restore(config: DedupConfig, snapshot: DedupSnapshot) -> Result<Self> {
        let mut engine = Self {
            watermark: WatermarkTracker::restore(config.allowed_lateness, snapshot.watermark),
            config,
            seen: HashMap::with_capacity(snapshot.entries.len()),
            by_time: BTreeSet::new(),
        };

        for entry in snapshot.entries {
            if engine.seen.contains_key(&entry.key) {
                return Err(Error::state_corruption(format!(
                    "dedup snapshot contains key {} twice",
                    entry.key
                )));
            }
            engine.by_time.insert((entry.event_time, entry.key.clone()));
            engine.seen.insert(entry.key, entry.event_time);
        }

        Ok(engine)
    }

    /// Run one micro-batch through the engine.
    pub fn process_batch<T: DedupItem>(&mut self, batch: Vec<T>) -> BatchOutcome<T> {
        if let Some(max_time) = batch.iter().map(|r| r.event_time()).max() {
            self.watermark.advance(max_time);
        }
        let floor = self.eviction_floor();

        let mut novel = Vec::with_capacity(batch.len());
        let mut duplicates = 0;
        let mut late_dropped = 0;

        for item in batch {
            let classification = {
                let key = item.dedup_key();
                self.observe(&key, item.event_time(), floor)
            };
            match classification {
                Classification::Novel => novel.push(item),
                Classification::Duplicate => duplicates += 1,
                Classification::LateDrop => late_dropped += 1,
            }
        }

        let evicted = match floor {
            Some(floor) => self.evict_below(floor),
            None => 0,
        };

        BatchOutcome {
            novel,
            duplicates,
            late_dropped,
            evicted,
            watermark: self.watermark.current(),
            state_size: self.seen.len(),
        }
    }

    fn observe(
        &mut self,
        key: &str,
        event_time: DateTime<Utc>,
        floor: Option<DateTime<Utc>>,
    ) -> Classification {
        if matches!(floor, Some(floor) if event_time < floor) {
            return Classification::LateDrop;
        }

        match self.seen.get(key).copied() {
            // Ties count as duplicates.
            Some(stored) if event_time <= stored => Classification::Duplicate,
            Some(stored) => {
                self.by_time.remove(&(stored, key.to_string()));
                self.by_time.insert((event_time, key.to_string()));
                self.seen.insert(key.to_string(), event_time);
                Classification::Novel
            }
            None => {
                self.by_time.insert((event_time, key.to_string()));
                self.seen.insert(key.to_string(), event_time);
                Classification::Novel
            }
        }
    }

    fn evict_below(&mut self, floor: DateTime<Utc>) -> usize {
        let keep = self.by_time.split_off(&(floor, String::new()));
        let evicted = std::mem::replace(&mut self.by_time, keep);
        for (_, key) in &evicted {
            self.seen.remove(key);
        }
        evicted.len()
    }

    /// `watermark - window`, or `None` before the first record. Saturates at
    /// the earliest representable time.
    pub fn eviction_floor(&self) -> Option<DateTime<Utc>> {
        self.watermark.current().map(|wm| {
            wm.checked_sub_signed(self.config.window)
                .unwrap_or(DateTime::<Utc>::MIN_UTC)
        })
    }

    pub fn watermark(&self) -> Option<DateTime<Utc>> {
        self.watermark.current()
    }

    pub fn state_size(&self) -> usize {
        self.seen.len()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.seen.contains_key(key)
    }

    pub fn config(&self) -> DedupConfig {
        self.config
    }

    pub fn snapshot(&self) -> DedupSnapshot {
        let mut entries: Vec<DedupEntry> = self
            .seen
            .iter()
            .map(|(key, &event_time)| DedupEntry {
                key: key.clone(),
                event_time,
            })
            .collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));

        DedupSnapshot {
            watermark: self.watermark.current(),
            entries,
        }
    }
}
