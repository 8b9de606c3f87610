//! db-utils - command-line entry point.
//!
//! Runs one statement against any supported backend and prints the returned
//! rows as JSON lines, or creates and compacts Access database files.

use clap::Parser;
use db_utils::automation::PowerShellAutomation;
use db_utils::config::{
    AccessConfig, AutomationConfig, CompactAccessArgs, Command, Config, CreateAccessArgs,
    ExecArgs, PostgresConfig, SqliteConfig, TeradataConfig,
};
use db_utils::db::{
    AccessDatabase, PostgresDatabase, RowValues, SqliteDatabase, TeradataDatabase,
};
use db_utils::models::Backend;
use db_utils::{Database, DbResult, scoped};
use std::io::Write;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber for logging.
///
/// Logs go to stderr so stdout carries only result rows.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        subscriber
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::parse();

    init_tracing(&config);

    info!("Starting db-utils v{}", env!("CARGO_PKG_VERSION"));

    let result = match config.command {
        Command::Exec(args) => run_exec(args).await,
        Command::CreateAccess(args) => run_create_access(args).await,
        Command::CompactAccess(args) => run_compact_access(args).await,
    };

    if let Err(e) = result {
        error!(error = %e, "Command failed");
        if let Some(suggestion) = e.suggestion() {
            eprintln!("Hint: {}", suggestion);
        }
        return Err(e.into());
    }

    Ok(())
}

async fn run_exec(args: ExecArgs) -> DbResult<()> {
    let settings = args.settings_object()?;
    match args.backend {
        Backend::Access => {
            let db = AccessDatabase::new(AccessConfig::from_value(settings)?)?;
            exec_and_print(db, &args).await
        }
        Backend::PostgreSQL => {
            let url = settings
                .get("url")
                .and_then(|v| v.as_str())
                .map(str::to_string);
            let config = match url {
                Some(url) => PostgresConfig::from_url(&url)?,
                None => PostgresConfig::from_value(settings)?,
            };
            exec_and_print(PostgresDatabase::new(config)?, &args).await
        }
        Backend::SQLite => {
            let db = SqliteDatabase::new(SqliteConfig::from_value(settings)?)?;
            exec_and_print(db, &args).await
        }
        Backend::Teradata => {
            let db = TeradataDatabase::new(TeradataConfig::from_value(settings)?)?;
            exec_and_print(db, &args).await
        }
    }
}

async fn exec_and_print<D>(db: D, args: &ExecArgs) -> DbResult<()>
where
    D: Database,
    D::Row: RowValues,
{
    let params = args.statement_params();
    scoped(db, async |db: &mut D| {
        let result = db.execute(&args.sql, params.as_deref()).await?;
        if args.commit {
            db.commit().await?;
        }
        let mut out = std::io::stdout().lock();
        for row in &result.rows {
            writeln!(out, "{}", serde_json::Value::Object(row.to_json_map()))?;
        }
        info!(
            rows = result.len(),
            rows_affected = result.rows_affected,
            "Statement complete"
        );
        Ok(())
    })
    .await
}

fn automation(program: String) -> PowerShellAutomation {
    PowerShellAutomation::new(AutomationConfig {
        program,
        ..AutomationConfig::default()
    })
}

async fn run_create_access(args: CreateAccessArgs) -> DbResult<()> {
    let automation = automation(args.automation_program);
    let db = AccessDatabase::create_database(&args.path, args.force, &automation).await?;
    println!("{}", db.path().display());
    Ok(())
}

async fn run_compact_access(args: CompactAccessArgs) -> DbResult<()> {
    let automation = automation(args.automation_program);
    let mut db = AccessDatabase::open(&args.path)?;
    db.compact_database(&automation).await
}
