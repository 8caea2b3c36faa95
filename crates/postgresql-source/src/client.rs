//! PostgreSQL client utilities

use sync_core::SyncError;
use tokio_postgres::{Client, NoTls};

/// Create a new PostgreSQL client with connection handling
pub async fn new_postgresql_client(connection_string: &str) -> Result<Client, SyncError> {
    let (client, connection) = tokio_postgres::connect(connection_string, NoTls)
        .await
        .map_err(|e| SyncError::SourceUnavailable(format!("failed to connect to PostgreSQL: {e}")))?;

    // Spawn connection handler
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            tracing::error!("PostgreSQL connection error: {e}");
        }
    });

    Ok(client)
}
