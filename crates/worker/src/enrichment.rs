//! Enrichment stage: joins novel records with reference dimensions.
//!
//! The join itself is pure. What happens to a record whose customer or
//! restaurant is unknown is decided by the configured [`MissPolicy`]; a miss
//! never fails the batch. Only a record that cannot be serialized for the
//! quarantine table does.

use clickhouse_client::QuarantineRecord;
use engine_core::{EnrichedRecord, EventRecord, ReferenceSnapshot, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use telemetry::metrics;
use tracing::debug;

/// Handling of records whose reference join missed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissPolicy {
    /// Write the record with the missing attributes left null.
    NullFill,
    /// Divert the record to the quarantine table.
    #[default]
    Quarantine,
    /// Count and discard the record.
    Drop,
}

/// A join that found no customer, no restaurant, or neither.
#[derive(Debug, Clone, PartialEq)]
pub struct EnrichmentMiss {
    pub missing_customer: Option<String>,
    pub missing_restaurant: Option<String>,
    /// The record with whatever attributes did match.
    pub partial: EnrichedRecord,
}

impl EnrichmentMiss {
    pub fn reason(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for EnrichmentMiss {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.missing_customer, &self.missing_restaurant) {
            (Some(c), Some(r)) => write!(f, "unknown customer {} and restaurant {}", c, r),
            (Some(c), None) => write!(f, "unknown customer {}", c),
            (None, Some(r)) => write!(f, "unknown restaurant {}", r),
            (None, None) => f.write_str("no miss"),
        }
    }
}

/// Join one record against `snapshot`.
pub fn enrich(
    record: &EventRecord,
    snapshot: &ReferenceSnapshot,
) -> std::result::Result<EnrichedRecord, EnrichmentMiss> {
    let mut enriched = EnrichedRecord::unmatched(record, snapshot.version());

    let customer = snapshot.customer(&record.payload.customer_id);
    if let Some(c) = customer {
        enriched.customer_name = Some(c.name.clone());
        enriched.customer_tier = c.tier.clone();
    }

    let restaurant = snapshot.restaurant(&record.payload.restaurant_id);
    if let Some(r) = restaurant {
        enriched.restaurant_name = Some(r.name.clone());
        enriched.cuisine = r.cuisine.clone();
        enriched.city = r.city.clone();
    }

    if customer.is_some() && restaurant.is_some() {
        return Ok(enriched);
    }

    Err(EnrichmentMiss {
        missing_customer: customer
            .is_none()
            .then(|| record.payload.customer_id.clone()),
        missing_restaurant: restaurant
            .is_none()
            .then(|| record.payload.restaurant_id.clone()),
        partial: enriched,
    })
}

/// Result of enriching one batch.
#[derive(Debug, Default)]
pub struct EnrichedBatch {
    pub records: Vec<EnrichedRecord>,
    pub quarantined: Vec<QuarantineRecord>,
    pub misses: usize,
    pub dropped: usize,
}

/// Original record as stored in the quarantine table.
pub fn quarantine_payload<T: Serialize>(record: &T) -> Result<String> {
    Ok(serde_json::to_string(record)?)
}

/// Enrich `records` with one snapshot, applying `policy` to misses.
pub fn enrich_batch<'a, I>(
    records: I,
    snapshot: &ReferenceSnapshot,
    policy: MissPolicy,
) -> Result<EnrichedBatch>
where
    I: IntoIterator<Item = &'a EventRecord>,
{
    let mut batch = EnrichedBatch::default();

    for record in records {
        match enrich(record, snapshot) {
            Ok(enriched) => batch.records.push(enriched),
            Err(miss) => {
                batch.misses += 1;
                debug!(
                    order_id = %record.payload.order_id,
                    reason = %miss,
                    policy = ?policy,
                    "Enrichment miss"
                );
                match policy {
                    MissPolicy::NullFill => batch.records.push(miss.partial),
                    MissPolicy::Quarantine => batch.quarantined.push(QuarantineRecord {
                        event_key: miss.partial.event_key.clone(),
                        order_id: record.payload.order_id.clone(),
                        event_time: record.event_time,
                        reason: miss.reason(),
                        payload: quarantine_payload(record)?,
                    }),
                    MissPolicy::Drop => batch.dropped += 1,
                }
            }
        }
    }

    metrics().enrichment_misses.inc_by(batch.misses as u64);
    metrics().records_quarantined.inc_by(batch.quarantined.len() as u64);
    metrics().records_miss_dropped.inc_by(batch.dropped as u64);
    Ok(batch)
}
