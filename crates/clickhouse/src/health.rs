//! ClickHouse health checks.

use crate::client::ClickHouseClient;
use crate::schema::all_tables;
use engine_core::{Error, Result};
use tracing::{debug, error, info};

/// Check ClickHouse connection health.
pub async fn check_connection(client: &ClickHouseClient) -> bool {
    match client.inner().query("SELECT 1").fetch_one::<u8>().await {
        Ok(_) => {
            debug!("ClickHouse connection healthy");
            true
        }
        Err(e) => {
            error!("ClickHouse health check failed: {}", e);
            false
        }
    }
}

/// Create the database and tables if they do not exist.
pub async fn init_schema(client: &ClickHouseClient) -> Result<()> {
    let database = &client.config().database;
    for ddl in all_tables(database) {
        client
            .inner()
            .query(&ddl)
            .execute()
            .await
            .map_err(|e| Error::sink(format!("failed to execute DDL: {}", e)))?;
    }

    info!(database = %database, "ClickHouse schema initialized");
    Ok(())
}
