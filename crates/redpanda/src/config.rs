//! Redpanda source configuration.

use engine_core::Backoff;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Where to start reading a partition that has no checkpointed position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StartFrom {
    #[default]
    Earliest,
    Latest,
}

/// Redpanda consumer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedpandaConfig {
    /// Broker addresses
    pub brokers: Vec<String>,
    /// Topic carrying order events
    #[serde(default = "default_topic")]
    pub topic: String,
    /// Partitions consumed by this pipeline instance
    #[serde(default = "default_partitions")]
    pub partitions: Vec<i32>,
    /// Maximum time a poll waits for data, in milliseconds
    #[serde(default = "default_max_wait_ms")]
    pub max_wait_ms: u64,
    /// Upper bound on bytes fetched per partition per poll
    #[serde(default = "default_max_bytes")]
    pub max_bytes: i32,
    #[serde(default)]
    pub start_from: StartFrom,
    /// Attempts per poll before reporting the source unavailable
    #[serde(default = "default_retries")]
    pub retries: u32,
    /// Initial retry backoff in milliseconds
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    /// Retry backoff cap in milliseconds
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    /// SASL username (for cloud authentication)
    #[serde(default)]
    pub sasl_username: Option<String>,
    /// SASL password (for cloud authentication)
    #[serde(default)]
    pub sasl_password: Option<String>,
}

fn default_topic() -> String {
    "orders".to_string()
}

fn default_partitions() -> Vec<i32> {
    vec![0]
}

fn default_max_wait_ms() -> u64 {
    1000
}

fn default_max_bytes() -> i32 {
    4 * 1024 * 1024
}

fn default_retries() -> u32 {
    5
}

fn default_retry_backoff_ms() -> u64 {
    200
}

fn default_max_backoff_ms() -> u64 {
    10_000
}

impl Default for RedpandaConfig {
    fn default() -> Self {
        Self {
            brokers: vec!["localhost:9092".to_string()],
            topic: default_topic(),
            partitions: default_partitions(),
            max_wait_ms: default_max_wait_ms(),
            max_bytes: default_max_bytes(),
            start_from: StartFrom::default(),
            retries: default_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            sasl_username: None,
            sasl_password: None,
        }
    }
}

impl RedpandaConfig {
    /// Returns the broker list as a comma-separated string.
    pub fn broker_string(&self) -> String {
        self.brokers.join(",")
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms)
    }

    pub fn backoff(&self) -> Backoff {
        Backoff::from_millis(self.retry_backoff_ms, self.max_backoff_ms)
    }
}
