//! Reference data store and loaders.

use crate::config::ReferenceConfig;
use async_trait::async_trait;
use engine_core::{
    Customer, Error, ReferenceRows, ReferenceSnapshot, ReferenceTable, Restaurant, Result,
};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Holds the current snapshot. Readers clone the `Arc` once per batch, so a
/// swap mid-batch is not observed until the next batch.
#[derive(Debug, Default)]
pub struct ReferenceStore {
    current: RwLock<Arc<ReferenceSnapshot>>,
}

impl ReferenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Arc<ReferenceSnapshot> {
        self.current.read().clone()
    }

    /// Replace one table. Returns the new snapshot version.
    pub fn apply(&self, rows: ReferenceRows) -> u64 {
        let table = rows.table();
        let count = rows.len();
        let mut current = self.current.write();
        let next = Arc::new(current.with_rows(rows));
        let version = next.version();
        *current = next;

        info!(table = table.as_str(), rows = count, version, "Reference table swapped");
        version
    }
}

#[async_trait]
pub trait ReferenceLoader: Send + Sync {
    async fn load(&self, table: ReferenceTable) -> Result<ReferenceRows>;
}

/// Loads JSON arrays from a file path or an HTTP(S) URL.
pub struct UriReferenceLoader {
    config: ReferenceConfig,
    http: reqwest::Client,
}

impl UriReferenceLoader {
    pub fn new(config: ReferenceConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.http_timeout_secs))
            .build()
            .map_err(|e| Error::config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { config, http })
    }

    fn uri(&self, table: ReferenceTable) -> &str {
        match table {
            ReferenceTable::Customers => &self.config.customers_uri,
            ReferenceTable::Restaurants => &self.config.restaurants_uri,
        }
    }

    async fn fetch<T: DeserializeOwned>(&self, uri: &str) -> Result<Vec<T>> {
        if uri.starts_with("http://") || uri.starts_with("https://") {
            let response = self
                .http
                .get(uri)
                .send()
                .await
                .and_then(|r| r.error_for_status())
                .map_err(|e| Error::source_failed(format!("GET {} failed: {}", uri, e)))?;
            response
                .json::<Vec<T>>()
                .await
                .map_err(|e| Error::invalid_record(format!("bad reference data from {}: {}", uri, e)))
        } else {
            let bytes = tokio::fs::read(uri)
                .await
                .map_err(|e| Error::source_failed(format!("failed to read {}: {}", uri, e)))?;
            serde_json::from_slice(&bytes)
                .map_err(|e| Error::invalid_record(format!("bad reference data in {}: {}", uri, e)))
        }
    }
}

#[async_trait]
impl ReferenceLoader for UriReferenceLoader {
    async fn load(&self, table: ReferenceTable) -> Result<ReferenceRows> {
        let uri = self.uri(table);
        let rows = match table {
            ReferenceTable::Customers => ReferenceRows::Customers(self.fetch::<Customer>(uri).await?),
            ReferenceTable::Restaurants => {
                ReferenceRows::Restaurants(self.fetch::<Restaurant>(uri).await?)
            }
        };
        info!(table = table.as_str(), uri, rows = rows.len(), "Reference table loaded");
        Ok(rows)
    }
}
