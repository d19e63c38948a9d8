use anyhow::Context;
use migra::{
    new_migration_file, MigrateConfig, MigrationExecutor, MigrationSet, MigrationState, MigrationStatus, MigrationStore,
    Version,
};
use serde_json::json;

use super::open_store;

fn load_catalog(config: &MigrateConfig) -> anyhow::Result<MigrationSet> {
    MigrationSet::from_dir(&config.migrations_dir)
        .with_context(|| format!("loading migrations from {}", config.migrations_dir.display()))
}

/// `migra migrate up`
pub async fn up(config: &MigrateConfig, dry_run: bool) -> anyhow::Result<()> {
    let set = load_catalog(config)?;
    if set.is_empty() {
        println!("No migrations found in {}", config.migrations_dir.display());
        return Ok(());
    }

    let executor = MigrationExecutor::new(open_store(config).await?);
    let plan = executor.plan(&set).await?;

    let current = plan
        .current_version
        .as_ref()
        .map(ToString::to_string)
        .unwrap_or_else(|| "none".to_string());

    if plan.is_empty() {
        println!("Database is up to date (version {})", current);
        return Ok(());
    }

    if dry_run {
        println!("Current version: {}", current);
        println!("Would apply {} migration(s):", plan.pending.len());
        for step in &plan.pending {
            println!("  {}  {}", step.version, step.name);
        }
        return Ok(());
    }

    let result = executor.apply(plan).await?;

    for version in &result.applied {
        println!("Applied {}", version);
    }
    for version in &result.already_applied {
        println!("Skipped {} (already recorded)", version);
    }
    for version in &result.skipped {
        println!("Skipped {} (older than the current version)", version);
    }
    println!(
        "Applied {} migration(s) in {}ms, now at version {}",
        result.applied_count(),
        result.execution_time_ms,
        result.current_version.as_deref().unwrap_or("none")
    );
    Ok(())
}

/// `migra migrate status`
pub async fn status(config: &MigrateConfig, as_json: bool) -> anyhow::Result<()> {
    let set = load_catalog(config)?;
    let store = open_store(config).await?;

    let statuses = store.status(&set).await?;
    let current = current_version(&store).await?;

    if as_json {
        let entries: Vec<_> = statuses.iter().map(status_json).collect();
        let report = json!({
            "current_version": current.as_ref().map(ToString::to_string),
            "migrations": entries,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("Migration Status");
    println!("================");
    println!(
        "Current version: {}",
        current.as_ref().map(ToString::to_string).unwrap_or_else(|| "none".to_string())
    );
    println!();

    if statuses.is_empty() {
        println!("No migrations found");
        return Ok(());
    }

    for status in &statuses {
        let (label, detail) = match &status.state {
            MigrationState::Applied { applied_at } => ("applied", applied_at.to_rfc3339()),
            MigrationState::Pending => ("pending", String::new()),
            MigrationState::Skipped => ("skipped", "older than current version".to_string()),
            MigrationState::Orphaned { applied_at } => ("orphaned", format!("no file, applied {}", applied_at.to_rfc3339())),
        };
        println!("  {:<9} {:<16} {:<32} {}", label, status.version, status.name, detail);
    }

    Ok(())
}

/// Read-only: an absent history table means nothing has been applied
async fn current_version(store: &MigrationStore) -> anyhow::Result<Option<Version>> {
    if !store.table_exists().await? {
        return Ok(None);
    }
    Ok(store.current_version().await?)
}

fn status_json(status: &MigrationStatus) -> serde_json::Value {
    let (state, applied_at) = match &status.state {
        MigrationState::Applied { applied_at } => ("applied", Some(applied_at.to_rfc3339())),
        MigrationState::Pending => ("pending", None),
        MigrationState::Skipped => ("skipped", None),
        MigrationState::Orphaned { applied_at } => ("orphaned", Some(applied_at.to_rfc3339())),
    };
    json!({
        "version": status.version.to_string(),
        "name": status.name,
        "state": state,
        "applied_at": applied_at,
    })
}

/// `migra migrate create`
pub fn create(config: &MigrateConfig, version: &str, name: &str) -> anyhow::Result<()> {
    let path = new_migration_file(&config.migrations_dir, version, name)?;
    println!("Created migration: {}", path.display());
    Ok(())
}

/// `migra migrate current`
pub async fn current(config: &MigrateConfig) -> anyhow::Result<()> {
    let store = open_store(config).await?;
    match current_version(&store).await? {
        Some(version) => println!("{}", version),
        None => println!("none"),
    }
    Ok(())
}
