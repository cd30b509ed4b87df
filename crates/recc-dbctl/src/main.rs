//! recc-dbctl: operator entry point for the recc database.
//!
//! Creates, resets and tears down the schema of the configured database.
//! Each subcommand opens its own pool and closes it before exiting.

mod config;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use recc_db::{create_schema, drop_schema, schema_version, BootstrapOutcome, Database, DbError};
use tracing_subscriber::EnvFilter;

use crate::config::{Config, LoggingConfig};

/// Schema bootstrap and teardown for the recc database.
#[derive(Parser, Debug)]
#[command(name = "recc-dbctl", version, about)]
struct Cli {
    /// Path to the TOML configuration file. A missing file means defaults.
    #[arg(long, env = "RECC_CONFIG_PATH", default_value = "recc.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    /// Create the database if needed, then create and seed the schema.
    Init,
    /// Drop the schema and bootstrap it again. All data is lost.
    Reset,
    /// Drop every table, view, index and function of the schema.
    DropSchema,
    /// Drop the whole database.
    DropDatabase,
    /// Print the installed schema version.
    Version,
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_new(&logging.level).unwrap_or_else(|_| EnvFilter::new("info"));

    if logging.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

/// Opens a pool for the configured target, runs `f`, and closes the pool
/// whatever `f` returned.
fn with_database<T>(
    config: &Config,
    f: impl FnOnce(&Database) -> Result<T, DbError>,
) -> Result<T> {
    let db = Database::new(config.database.clone(), config.pool);
    db.open()
        .with_context(|| format!("failed to open database '{}'", config.database.database))?;

    let result = f(&db);
    if let Err(e) = db.close() {
        tracing::warn!(error = %e, "failed to close database pool");
    }
    Ok(result?)
}

fn describe(outcome: &BootstrapOutcome) -> String {
    match outcome {
        BootstrapOutcome::Initialized { version } => {
            format!("schema initialized at version {version}")
        }
        BootstrapOutcome::AlreadyInitialized {
            version,
            installed_at,
        } => format!("schema already at version {version} (installed {installed_at})"),
    }
}

fn run(command: Command, config: &Config) -> Result<()> {
    match command {
        Command::Init => {
            let outcome = with_database(config, create_schema).context("bootstrap failed")?;
            println!("{}", describe(&outcome));
        }
        Command::Reset => {
            let outcome = with_database(config, |db| {
                drop_schema(db)?;
                create_schema(db)
            })
            .context("reset failed")?;
            println!("{}", describe(&outcome));
        }
        Command::DropSchema => {
            with_database(config, drop_schema).context("drop schema failed")?;
            println!("schema dropped");
        }
        Command::DropDatabase => {
            // Opening a pool would recreate the database; go straight to the
            // maintenance database instead.
            recc_db::drop_database(&config.database).with_context(|| {
                format!("failed to drop database '{}'", config.database.database)
            })?;
            println!("database '{}' dropped", config.database.database);
        }
        Command::Version => match with_database(config, schema_version)? {
            Some(marker) => println!(
                "{} (installed {})",
                marker.value.as_deref().unwrap_or("<unknown>"),
                marker.created_at
            ),
            None => println!("schema not initialized"),
        },
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = config::load_config(Some(cli.config.as_path()))
        .with_context(|| format!("failed to load configuration from {}", cli.config.display()))?;
    init_tracing(&config.logging);

    tracing::info!(
        path = %cli.config.display(),
        host = %config.database.host,
        database = %config.database.database,
        command = ?cli.command,
        "resolved startup configuration"
    );

    run(cli.command, &config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn subcommands_parse_in_kebab_case() {
        let cli = Cli::try_parse_from(["recc-dbctl", "drop-schema"]).expect("should parse");
        assert_eq!(cli.command, Command::DropSchema);

        let cli = Cli::try_parse_from(["recc-dbctl", "--config", "/etc/recc.toml", "init"])
            .expect("should parse");
        assert_eq!(cli.command, Command::Init);
        assert_eq!(cli.config, PathBuf::from("/etc/recc.toml"));

        assert!(Cli::try_parse_from(["recc-dbctl"]).is_err());
        assert!(Cli::try_parse_from(["recc-dbctl", "migrate"]).is_err());
    }

    #[test]
    fn outcomes_are_described() {
        let text = describe(&BootstrapOutcome::Initialized {
            version: "0.1.0".to_string(),
        });
        assert_eq!(text, "schema initialized at version 0.1.0");
    }
}
