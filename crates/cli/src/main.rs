mod commands;
mod logging;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use commands::*;
use logging::{init_logging, LogFormat, LoggingConfig};
use migra::MigrateConfig;

#[derive(Parser)]
#[command(name = "migra")]
#[command(version, about = "Forward-only SQL schema migrations")]
struct Cli {
    /// YAML configuration file; MIGRA_* environment variables override it
    #[arg(long, short, global = true, env = "MIGRA_CONFIG")]
    config: Option<PathBuf>,

    /// Log output format (text, pretty, json)
    #[arg(long, global = true, default_value = "text")]
    log_format: LogFormat,

    /// Enable debug logging
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Database migration management
    Migrate {
        #[command(subcommand)]
        migrate_command: MigrateCommands,
    },

    /// Database administration
    Db {
        #[command(subcommand)]
        db_command: DbCommands,
    },
}

#[derive(Subcommand)]
enum MigrateCommands {
    /// Apply every migration newer than the current version
    Up {
        /// Print the plan without executing anything
        #[arg(long)]
        dry_run: bool,
    },

    /// Show migration status
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Create a new migration file
    Create {
        /// Semantic version of the migration (e.g. 1.2.0)
        version: String,

        /// Migration name
        name: String,
    },

    /// Print the current schema version
    Current,
}

#[derive(Subcommand)]
enum DbCommands {
    /// Drop every table in the configured schema
    Reset {
        /// Required; the reset cannot be undone
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = MigrateConfig::load(cli.config.as_deref())?;

    let mut logging = LoggingConfig::new(config.log_level.clone(), cli.log_format);
    if cli.verbose {
        logging = logging.verbose();
    }
    init_logging(&logging)?;

    match cli.command {
        Commands::Migrate { migrate_command } => match migrate_command {
            MigrateCommands::Up { dry_run } => {
                migrate::up(&config, dry_run).await?;
            }
            MigrateCommands::Status { json } => {
                migrate::status(&config, json).await?;
            }
            MigrateCommands::Create { version, name } => {
                migrate::create(&config, &version, &name)?;
            }
            MigrateCommands::Current => {
                migrate::current(&config).await?;
            }
        },
        Commands::Db { db_command } => match db_command {
            DbCommands::Reset { force } => {
                db::reset(&config, force).await?;
            }
        },
    }

    Ok(())
}
