//! Reference (dimension) data used to enrich order events.
//!
//! A [`ReferenceSnapshot`] is immutable. Loaders build a new snapshot with
//! one table replaced and the store swaps it in whole, so readers never see
//! a half-loaded table.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Customer dimension row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    pub customer_id: String,
    pub name: String,
    #[serde(default)]
    pub tier: Option<String>,
}

/// Restaurant dimension row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Restaurant {
    pub restaurant_id: String,
    pub name: String,
    #[serde(default)]
    pub cuisine: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
}

/// Reference tables known to the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceTable {
    Customers,
    Restaurants,
}

impl ReferenceTable {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Customers => "customers",
            Self::Restaurants => "restaurants",
        }
    }
}

/// Rows of one reference table, as produced by a loader.
#[derive(Debug, Clone, PartialEq)]
pub enum ReferenceRows {
    Customers(Vec<Customer>),
    Restaurants(Vec<Restaurant>),
}

impl ReferenceRows {
    pub fn table(&self) -> ReferenceTable {
        match self {
            Self::Customers(_) => ReferenceTable::Customers,
            Self::Restaurants(_) => ReferenceTable::Restaurants,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Customers(rows) => rows.len(),
            Self::Restaurants(rows) => rows.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A consistent view of all reference tables.
#[derive(Debug, Clone, Default)]
pub struct ReferenceSnapshot {
    version: u64,
    loaded_at: Option<DateTime<Utc>>,
    customers: HashMap<String, Customer>,
    restaurants: HashMap<String, Restaurant>,
    loaded_tables: Vec<ReferenceTable>,
}

impl ReferenceSnapshot {
    /// Empty snapshot (version 0). Every join misses.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Returns a new snapshot with `rows` replacing their table.
    pub fn with_rows(&self, rows: ReferenceRows) -> Self {
        let mut next = self.clone();
        let table = rows.table();
        match rows {
            ReferenceRows::Customers(rows) => {
                next.customers = rows
                    .into_iter()
                    .map(|c| (c.customer_id.clone(), c))
                    .collect();
            }
            ReferenceRows::Restaurants(rows) => {
                next.restaurants = rows
                    .into_iter()
                    .map(|r| (r.restaurant_id.clone(), r))
                    .collect();
            }
        }
        if !next.loaded_tables.contains(&table) {
            next.loaded_tables.push(table);
        }
        next.version = self.version + 1;
        next.loaded_at = Some(Utc::now());
        next
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn loaded_at(&self) -> Option<DateTime<Utc>> {
        self.loaded_at
    }

    pub fn is_loaded(&self, table: ReferenceTable) -> bool {
        self.loaded_tables.contains(&table)
    }

    pub fn customer(&self, customer_id: &str) -> Option<&Customer> {
        self.customers.get(customer_id)
    }

    pub fn restaurant(&self, restaurant_id: &str) -> Option<&Restaurant> {
        self.restaurants.get(restaurant_id)
    }

    pub fn customer_count(&self) -> usize {
        self.customers.len()
    }

    pub fn restaurant_count(&self) -> usize {
        self.restaurants.len()
    }
}
