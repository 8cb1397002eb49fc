//! Redpanda health checks.

use crate::client::connect;
use crate::config::RedpandaConfig;
use tracing::{debug, error};

/// Check Redpanda connection health.
pub async fn check_connection(config: &RedpandaConfig) -> bool {
    let client = match connect(config).await {
        Ok(client) => client,
        Err(e) => {
            error!("Redpanda health check failed: {}", e);
            return false;
        }
    };

    match client.list_topics().await {
        Ok(topics) => {
            debug!(topics = topics.len(), "Redpanda connection healthy");
            true
        }
        Err(e) => {
            error!("Failed to list Redpanda topics: {}", e);
            false
        }
    }
}

/// Returns the configured partitions that the topic does not have. A missing
/// topic reports every partition.
pub async fn missing_partitions(config: &RedpandaConfig) -> Vec<i32> {
    let Ok(client) = connect(config).await else {
        return config.partitions.clone();
    };
    let Ok(topics) = client.list_topics().await else {
        return config.partitions.clone();
    };

    match topics.iter().find(|t| t.name == config.topic) {
        Some(topic) => config
            .partitions
            .iter()
            .copied()
            .filter(|p| !topic.partitions.contains(p))
            .collect(),
        None => config.partitions.clone(),
    }
}
