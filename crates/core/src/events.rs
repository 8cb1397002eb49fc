//! Order event records as they travel through the pipeline.
//!
//! Raw records arrive as JSON from the stream with the order payload
//! flattened into the envelope:
//!
//! ```json
//! {
//!   "event_id": "evt-1",
//!   "event_time": "2024-05-01T12:00:00.250Z",
//!   "partition_key": "rest-9",
//!   "order_id": "ord-1",
//!   "customer_id": "cust-3",
//!   "restaurant_id": "rest-9",
//!   "order_status": "placed",
//!   "order_value": 23.5,
//!   "item_count": 2
//! }
//! ```

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use validator::Validate;

use crate::error::{Error, Result};

/// Business fields of an order event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct OrderPayload {
    #[validate(length(min = 1, max = 128))]
    pub order_id: String,
    #[validate(length(min = 1, max = 128))]
    pub customer_id: String,
    #[validate(length(min = 1, max = 128))]
    pub restaurant_id: String,
    #[validate(length(min = 1, max = 64))]
    pub order_status: String,
    #[validate(range(min = 0.0))]
    pub order_value: f64,
    #[serde(default)]
    pub item_count: u32,
}

/// An immutable event record read from the stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct EventRecord {
    /// Producer-assigned identity. Absent on some legacy producers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    /// Business time of the event (not the arrival time).
    pub event_time: DateTime<Utc>,
    #[serde(default)]
    pub partition_key: String,
    #[serde(flatten)]
    #[validate(nested)]
    pub payload: OrderPayload,
}

impl EventRecord {
    /// Decode and validate a raw record from the wire.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let record: EventRecord = serde_json::from_slice(bytes)
            .map_err(|e| Error::invalid_record(format!("undecodable payload: {}", e)))?;
        record
            .validate()
            .map_err(|e| Error::invalid_record(e.to_string()))?;
        Ok(record)
    }

    /// Identity used for deduplication.
    ///
    /// `event_id` when present, otherwise a composite of the business fields
    /// at full timestamp precision.
    pub fn dedup_key(&self) -> Cow<'_, str> {
        match self.event_id.as_deref() {
            Some(id) if !id.trim().is_empty() => Cow::Borrowed(id),
            _ => Cow::Owned(format!(
                "{}|{}|{}",
                self.payload.order_id,
                self.payload.order_status,
                self.event_time.to_rfc3339_opts(SecondsFormat::AutoSi, true)
            )),
        }
    }

    /// Natural key of the row this record lands in.
    pub fn business_key(&self) -> &str {
        &self.payload.order_id
    }
}

/// A record together with its position in the stream.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceRecord {
    pub partition: i32,
    pub offset: i64,
    pub record: EventRecord,
}

/// A deduplicated record joined with reference attributes.
///
/// Reference fields are `None` when the join missed and the miss policy
/// is null-fill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedRecord {
    pub event_key: String,
    pub event_id: Option<String>,
    pub event_time: DateTime<Utc>,
    pub order_id: String,
    pub customer_id: String,
    pub restaurant_id: String,
    pub order_status: String,
    pub order_value: f64,
    pub item_count: u32,
    pub customer_name: Option<String>,
    pub customer_tier: Option<String>,
    pub restaurant_name: Option<String>,
    pub cuisine: Option<String>,
    pub city: Option<String>,
    /// Version of the reference snapshot used for the join.
    pub reference_version: u64,
}

impl EnrichedRecord {
    /// Start an enriched record with all reference attributes unset.
    pub fn unmatched(record: &EventRecord, reference_version: u64) -> Self {
        Self {
            event_key: record.dedup_key().into_owned(),
            event_id: record.event_id.clone(),
            event_time: record.event_time,
            order_id: record.payload.order_id.clone(),
            customer_id: record.payload.customer_id.clone(),
            restaurant_id: record.payload.restaurant_id.clone(),
            order_status: record.payload.order_status.clone(),
            order_value: record.payload.order_value,
            item_count: record.payload.item_count,
            customer_name: None,
            customer_tier: None,
            restaurant_name: None,
            cuisine: None,
            city: None,
            reference_version,
        }
    }

    pub fn business_key(&self) -> &str {
        &self.order_id
    }
}
