use anyhow::bail;
use migra::{admin_for, connect, MigrateConfig};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

/// `migra db reset`
///
/// Drops every table in the configured schema, the history table included.
/// Without `--force` the user is asked to confirm on stdin.
pub async fn reset(config: &MigrateConfig, force: bool) -> anyhow::Result<()> {
    let admin = admin_for(config.database.dialect)?;
    let schema = config.effective_schema();
    let target = config.database.masked_url();

    if !force && !confirm(&schema, &target).await? {
        println!("Reset cancelled");
        return Ok(());
    }

    let pool = connect(&config.database, &config.pool).await?;
    tracing::warn!(schema = %schema, url = %target, "dropping all tables");
    admin.drop_all_tables(&pool, &schema).await?;
    pool.close().await;

    println!("Dropped all tables in schema '{}'", schema);
    Ok(())
}

async fn confirm(schema: &str, target: &str) -> anyhow::Result<bool> {
    let mut stdout = tokio::io::stdout();
    stdout
        .write_all(
            format!(
                "WARNING: this drops every table in schema '{}' on {}.\n   Continue? (y/N): ",
                schema, target
            )
            .as_bytes(),
        )
        .await?;
    stdout.flush().await?;

    let mut line = String::new();
    let read = BufReader::new(tokio::io::stdin()).read_line(&mut line).await?;
    if read == 0 {
        bail!("no confirmation received; pass --force to reset non-interactively");
    }
    Ok(matches!(line.trim().to_lowercase().as_str(), "y" | "yes"))
}
