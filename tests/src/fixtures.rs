//! Test fixtures and event generators.

use chrono::{DateTime, Utc};
use engine_core::{Customer, EventRecord, OrderPayload, ReferenceRows, Restaurant};

/// Event time `secs` seconds after a fixed epoch.
pub fn ts(secs: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(1_700_000_000 + secs, 0).expect("valid timestamp")
}

/// An order event for customer `c1` at restaurant `r1`.
pub fn order_event(event_id: &str, order_id: &str, secs: i64) -> EventRecord {
    order_event_for(event_id, order_id, secs, "c1", "r1")
}

/// An order event for the given customer and restaurant.
pub fn order_event_for(
    event_id: &str,
    order_id: &str,
    secs: i64,
    customer_id: &str,
    restaurant_id: &str,
) -> EventRecord {
    EventRecord {
        event_id: Some(event_id.to_string()),
        event_time: ts(secs),
        partition_key: restaurant_id.to_string(),
        payload: OrderPayload {
            order_id: order_id.to_string(),
            customer_id: customer_id.to_string(),
            restaurant_id: restaurant_id.to_string(),
            order_status: "placed".to_string(),
            order_value: 25.0,
            item_count: 2,
        },
    }
}

/// Customers `c1` and `c2`.
pub fn customers() -> ReferenceRows {
    ReferenceRows::Customers(vec![
        Customer {
            customer_id: "c1".into(),
            name: "Ada".into(),
            tier: Some("gold".into()),
        },
        Customer {
            customer_id: "c2".into(),
            name: "Grace".into(),
            tier: None,
        },
    ])
}

/// Restaurant `r1`.
pub fn restaurants() -> ReferenceRows {
    ReferenceRows::Restaurants(vec![Restaurant {
        restaurant_id: "r1".into(),
        name: "Noodle Bar".into(),
        cuisine: Some("ramen".into()),
        city: Some("Lisbon".into()),
    }])
}
