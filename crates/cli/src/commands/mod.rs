pub mod db;
pub mod migrate;

use anyhow::Context;
use migra::{connect, MigrateConfig, MigrationStore};

/// Open a pool and bind the configured history table to it
pub(crate) async fn open_store(config: &MigrateConfig) -> anyhow::Result<MigrationStore> {
    tracing::debug!(url = %config.database.masked_url(), "connecting");
    let pool = connect(&config.database, &config.pool)
        .await
        .with_context(|| format!("could not connect to {}", config.database.masked_url()))?;
    Ok(MigrationStore::with_table(
        pool,
        config.database.dialect,
        &config.history_table,
    )?)
}
