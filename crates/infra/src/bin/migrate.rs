//! Applies the embedded schema to the configured Postgres database.

use anyhow::Context;
use lotkeeper_infra::{InfraConfig, PostgresStore, StorageConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    lotkeeper_observability::init();

    let config = InfraConfig::from_env().context("invalid configuration")?;
    match config.storage {
        StorageConfig::InMemory => {
            tracing::info!("USE_PERSISTENT_STORES is off; nothing to migrate");
        }
        StorageConfig::Postgres {
            database_url,
            max_connections,
        } => {
            let store = PostgresStore::connect(&database_url, max_connections)
                .await
                .context("failed to connect to DATABASE_URL")?;
            store.migrate().await.context("migration failed")?;
            tracing::info!("schema is up to date");
        }
    }
    Ok(())
}
