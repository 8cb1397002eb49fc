//! Event-time watermark.
//!
//! watermark = max(event_time observed) - allowed_lateness, never decreasing.

use chrono::{DateTime, Duration, Utc};

#[derive(Debug, Clone)]
pub struct WatermarkTracker {
    allowed_lateness: Duration,
    current: Option<DateTime<Utc>>,
}

impl WatermarkTracker {
    pub fn new(allowed_lateness: Duration) -> Self {
        Self {
            allowed_lateness,
            current: None,
        }
    }

    /// Resume from a persisted watermark.
    pub fn restore(allowed_lateness: Duration, current: Option<DateTime<Utc>>) -> Self {
        Self {
            allowed_lateness,
            current,
        }
    }

    /// Fold in the largest event time of a batch. Returns the new watermark.
    /// Saturates at the earliest representable time.
    pub fn advance(&mut self, max_event_time: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let candidate = max_event_time
            .checked_sub_signed(self.allowed_lateness)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        self.current = match self.current {
            Some(wm) if wm >= candidate => Some(wm),
            _ => Some(candidate),
        };
        self.current
    }

    pub fn current(&self) -> Option<DateTime<Utc>> {
        self.current
    }

    pub fn allowed_lateness(&self) -> Duration {
        self.allowed_lateness
    }
}
