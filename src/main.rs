//! multi-db command-line entry point.
//!
//! Builds a connection manager from flags, environment or a JSON record file,
//! runs one subcommand and prints the result as JSON on stdout.

use clap::Parser;
use multi_db::config::{Command, Config, descriptor};
use multi_db::{ConnectionManager, DbError, DbResult};
use serde_json::json;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber for logging. Logs go to stderr so stdout
/// carries only results.
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

async fn run(manager: &ConnectionManager, command: &Command) -> DbResult<serde_json::Value> {
    match command {
        Command::Ping => Ok(json!({ "ok": manager.test_connectivity().await })),
        Command::TableExists { name } => {
            let exists = manager.table_exists(name).await?;
            Ok(json!({ "table": name, "exists": exists }))
        }
        Command::Query {
            sql,
            args,
            max_rows,
            all,
        } => {
            let records = manager
                .query(&descriptor(sql, args), *max_rows, false, !*all)
                .await?;
            serde_json::to_value(&records).map_err(|e| DbError::internal(e.to_string()))
        }
        Command::Exec { sql, args, expect } => {
            let statement = descriptor(sql, args);
            let rows_affected = match expect {
                Some(class) => {
                    manager
                        .execute_validated(std::slice::from_ref(&statement), *class, false)
                        .await?
                }
                None => manager.execute_one(&statement, false).await?,
            };
            Ok(json!({ "rows_affected": rows_affected }))
        }
        Command::Backup { file } => {
            let script = tokio::fs::read_to_string(file).await.map_err(|e| {
                DbError::invalid_configuration(format!(
                    "Cannot read script {}: {}",
                    file.display(),
                    e
                ))
            })?;
            manager.set_backup_script(script).await;
            manager.exec_backup().await?;
            Ok(json!({ "applied": true }))
        }
        Command::Dsn => {
            let target = manager.connection_target().await?;
            Ok(json!({
                "kind": target.kind,
                "driver": target.driver,
                "dsn": target.masked(),
            }))
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::parse();
    init_tracing(&config);

    info!(version = env!("CARGO_PKG_VERSION"), "Starting multi-db");

    let manager = config.connection_manager()?;
    let result = run(&manager, &config.command).await;
    manager.close().await;

    match result {
        Ok(output) => {
            println!("{}", serde_json::to_string_pretty(&output)?);
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Command failed");
            if let Some(suggestion) = e.suggestion() {
                eprintln!("hint: {}", suggestion);
            }
            Err(e.into())
        }
    }
}
