//! Configuration handling for multi-db.
//!
//! Connection records come from a JSON file or from CLI arguments and
//! environment variables. Tuning knobs live in [`ManagerOptions`], which can
//! also be carried as query parameters on an override DSN.

use crate::db::ConnectionManager;
use crate::error::{DbError, DbResult};
use crate::models::{BackendKind, ConnectionRecord, OperationClass, QueryArg, QueryDescriptor};
use clap::{Args, Parser, Subcommand};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_STATEMENT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_CLI_MAX_ROWS: i64 = 100;

// Pool configuration defaults
pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;
pub const DEFAULT_MAX_CONNECTIONS_SQLITE: u32 = 1;
pub const DEFAULT_MIN_CONNECTIONS: u32 = 0;
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 600;

/// Connection and execution tuning for a [`ConnectionManager`].
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ManagerOptions {
    /// Maximum connections in pool (default: 10, 1 for SQLite)
    pub max_connections: Option<u32>,
    /// Minimum connections in pool (default: 0)
    pub min_connections: Option<u32>,
    /// Connect timeout in seconds (default: 10)
    pub connect_timeout_secs: Option<u64>,
    /// Per-statement timeout in seconds (default: 30)
    pub statement_timeout_secs: Option<u64>,
    /// Idle timeout in seconds (default: 600)
    pub idle_timeout_secs: Option<u64>,
}

impl ManagerOptions {
    /// Option keys that may be carried as DSN query parameters.
    const URL_OPTION_KEYS: &'static [&'static str] = &[
        "max_connections",
        "min_connections",
        "connect_timeout",
        "statement_timeout",
        "idle_timeout",
    ];

    /// Get max_connections with default value based on database type.
    pub fn max_connections_or_default(&self, is_sqlite: bool) -> u32 {
        self.max_connections.unwrap_or(if is_sqlite {
            DEFAULT_MAX_CONNECTIONS_SQLITE
        } else {
            DEFAULT_MAX_CONNECTIONS
        })
    }

    pub fn min_connections_or_default(&self) -> u32 {
        self.min_connections.unwrap_or(DEFAULT_MIN_CONNECTIONS)
    }

    pub fn connect_timeout_or_default(&self) -> u64 {
        self.connect_timeout_secs
            .unwrap_or(DEFAULT_CONNECT_TIMEOUT_SECS)
    }

    pub fn statement_timeout_or_default(&self) -> u64 {
        self.statement_timeout_secs
            .unwrap_or(DEFAULT_STATEMENT_TIMEOUT_SECS)
    }

    pub fn idle_timeout_or_default(&self) -> u64 {
        self.idle_timeout_secs.unwrap_or(DEFAULT_IDLE_TIMEOUT_SECS)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_or_default())
    }

    pub fn statement_timeout(&self) -> Duration {
        Duration::from_secs(self.statement_timeout_or_default())
    }

    /// Validate options and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_connections == Some(0) {
            return Err("max_connections must be greater than 0".to_string());
        }
        if let (Some(min), Some(max)) = (self.min_connections, self.max_connections) {
            if min > max {
                return Err(format!(
                    "min_connections ({}) cannot exceed max_connections ({})",
                    min, max
                ));
            }
        }
        if self.connect_timeout_secs == Some(0) || self.statement_timeout_secs == Some(0) {
            return Err("timeouts must be greater than 0".to_string());
        }
        Ok(())
    }

    /// Strip option parameters from a URL-style DSN.
    ///
    /// Returns the DSN without those parameters and the options they carried.
    /// Unparseable values are ignored. DSNs that are not URLs (SQL Server ADO
    /// strings) come back unchanged.
    pub fn split_url(dsn: &str) -> (String, ManagerOptions) {
        let Ok(mut url) = Url::parse(dsn) else {
            return (dsn.to_string(), ManagerOptions::default());
        };
        if url.query().is_none() {
            return (dsn.to_string(), ManagerOptions::default());
        }

        let mut extracted = HashMap::new();
        let kept: Vec<(String, String)> = url
            .query_pairs()
            .filter_map(|(k, v)| {
                if Self::URL_OPTION_KEYS.contains(&k.as_ref()) {
                    extracted.insert(k.into_owned(), v.into_owned());
                    None
                } else {
                    Some((k.into_owned(), v.into_owned()))
                }
            })
            .collect();

        if kept.is_empty() {
            url.set_query(None);
        } else {
            url.query_pairs_mut().clear().extend_pairs(kept);
        }

        let options = ManagerOptions {
            max_connections: extracted.get("max_connections").and_then(|v| v.parse().ok()),
            min_connections: extracted.get("min_connections").and_then(|v| v.parse().ok()),
            connect_timeout_secs: extracted.get("connect_timeout").and_then(|v| v.parse().ok()),
            statement_timeout_secs: extracted
                .get("statement_timeout")
                .and_then(|v| v.parse().ok()),
            idle_timeout_secs: extracted.get("idle_timeout").and_then(|v| v.parse().ok()),
        };
        (url.to_string(), options)
    }

    /// Fill unset fields from `other`.
    pub fn or(self, other: ManagerOptions) -> ManagerOptions {
        ManagerOptions {
            max_connections: self.max_connections.or(other.max_connections),
            min_connections: self.min_connections.or(other.min_connections),
            connect_timeout_secs: self.connect_timeout_secs.or(other.connect_timeout_secs),
            statement_timeout_secs: self.statement_timeout_secs.or(other.statement_timeout_secs),
            idle_timeout_secs: self.idle_timeout_secs.or(other.idle_timeout_secs),
        }
    }
}

impl ConnectionRecord {
    /// Parse and validate a record from JSON.
    pub fn from_json_str(json: &str) -> DbResult<Self> {
        let record: ConnectionRecord = serde_json::from_str(json).map_err(|e| {
            DbError::invalid_configuration(format!("Invalid connection JSON: {}", e))
        })?;
        record.validate()
    }

    /// Read, parse and validate a record from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> DbResult<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            DbError::invalid_configuration(format!(
                "Cannot read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_json_str(&json)
    }
}

/// Connection record fields taken from flags or the environment.
#[derive(Debug, Clone, Default, Args)]
pub struct RecordArgs {
    /// Backend kind (postgres, mysql, sqlserver, sqlite)
    #[arg(long = "kind", value_name = "KIND", env = "DB_KIND")]
    pub kind: Option<BackendKind>,

    #[arg(long, env = "DB_HOST")]
    pub host: Option<String>,

    /// Port (defaults to the backend's standard port)
    #[arg(long, env = "DB_PORT")]
    pub port: Option<u16>,

    #[arg(long, env = "DB_USER")]
    pub user: Option<String>,

    /// Password (prefer the environment variable)
    #[arg(long, env = "DB_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    #[arg(long = "database", env = "DB_NAME")]
    pub database: Option<String>,

    /// PostgreSQL sslmode (default: disable)
    #[arg(long = "sslmode", env = "DB_SSLMODE")]
    pub ssl_mode: Option<String>,

    /// SQLite database file
    #[arg(long, env = "DB_FILE")]
    pub file: Option<String>,
}

impl RecordArgs {
    /// Build a record when a backend kind was given.
    pub fn to_record(&self) -> Option<ConnectionRecord> {
        let kind = self.kind?;
        let text = |v: &Option<String>| v.clone().unwrap_or_default();
        Some(ConnectionRecord {
            kind,
            host: text(&self.host),
            port: self.port.or(kind.default_port()).unwrap_or_default(),
            user: text(&self.user),
            password: text(&self.password),
            database: text(&self.database),
            ssl_mode: text(&self.ssl_mode),
            file: text(&self.file),
        })
    }
}

/// Command-line configuration for the multi-db binary.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "multi-db",
    about = "Run statements against PostgreSQL, MySQL, SQL Server or SQLite through one interface",
    version
)]
pub struct Config {
    #[command(flatten)]
    pub record: RecordArgs,

    /// JSON file holding a connection record (takes precedence over record flags)
    #[arg(long = "config", value_name = "PATH", env = "DB_CONFIG")]
    pub config_file: Option<PathBuf>,

    /// Native DSN used verbatim instead of one built from the record
    #[arg(long, value_name = "URL", env = "DATABASE_URL", hide_env_values = true)]
    pub url: Option<String>,

    /// Connect timeout in seconds [default: 10]
    #[arg(long, env = "DB_CONNECT_TIMEOUT")]
    pub connect_timeout: Option<u64>,

    /// Statement timeout in seconds [default: 30]
    #[arg(long, env = "DB_STATEMENT_TIMEOUT")]
    pub statement_timeout: Option<u64>,

    /// Maximum pooled connections
    #[arg(long, env = "DB_MAX_CONNECTIONS")]
    pub max_connections: Option<u32>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn", env = "DB_LOG_LEVEL")]
    pub log_level: String,

    /// Enable JSON logging format
    #[arg(long, env = "DB_JSON_LOGS")]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Check that the database answers `SELECT 1`
    Ping,
    /// Report whether a table exists
    TableExists { name: String },
    /// Run a query and print its rows as JSON
    Query {
        sql: String,
        /// Named argument; the value is parsed as JSON, falling back to text
        #[arg(long = "arg", value_name = "NAME=VALUE", value_parser = parse_named_arg)]
        args: Vec<(String, QueryArg)>,
        #[arg(long, default_value_t = DEFAULT_CLI_MAX_ROWS)]
        max_rows: i64,
        /// Return every row
        #[arg(long)]
        all: bool,
    },
    /// Execute a statement in a transaction and print the affected rows
    Exec {
        sql: String,
        #[arg(long = "arg", value_name = "NAME=VALUE", value_parser = parse_named_arg)]
        args: Vec<(String, QueryArg)>,
        /// Require the statement to be of this kind (insert, update, delete)
        #[arg(long = "expect")]
        expect: Option<OperationClass>,
    },
    /// Apply a bootstrap script from a file
    Backup { file: PathBuf },
    /// Print the resolved connection target with credentials masked
    Dsn,
}

impl Config {
    /// Options from flags, with DSN query parameters filling the gaps.
    pub fn manager_options(&self) -> ManagerOptions {
        let from_flags = ManagerOptions {
            max_connections: self.max_connections,
            connect_timeout_secs: self.connect_timeout,
            statement_timeout_secs: self.statement_timeout,
            ..ManagerOptions::default()
        };
        match &self.url {
            Some(url) => from_flags.or(ManagerOptions::split_url(url).1),
            None => from_flags,
        }
    }

    /// The configured record: the JSON file if given, else the record flags.
    pub fn connection_record(&self) -> DbResult<Option<ConnectionRecord>> {
        if let Some(path) = &self.config_file {
            return ConnectionRecord::from_json_file(path).map(Some);
        }
        self.record.to_record().map(|r| r.validate()).transpose()
    }

    /// Build a manager from the record, the override DSN and the options.
    pub fn connection_manager(&self) -> DbResult<ConnectionManager> {
        let options = self.manager_options();
        options.validate().map_err(DbError::invalid_configuration)?;

        let url = self.url.as_deref().map(|u| ManagerOptions::split_url(u).0);
        let manager = match (self.connection_record()?, url) {
            (Some(record), Some(url)) => ConnectionManager::new(record)?.with_url(url),
            (Some(record), None) => ConnectionManager::new(record)?,
            (None, Some(url)) => ConnectionManager::from_url(url),
            (None, None) => {
                return Err(DbError::invalid_configuration(
                    "No connection configured: pass --config, --url or --kind with its fields",
                ));
            }
        };
        Ok(manager.with_options(options))
    }
}

/// Parse `name=value` where value is JSON (numbers, booleans, null, arrays)
/// or plain text.
pub fn parse_named_arg(s: &str) -> Result<(String, QueryArg), String> {
    let (name, raw) = s
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got '{}'", s))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("argument name is empty in '{}'", s));
    }
    let value = match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(json) => QueryArg::try_from(json).map_err(|e| e.to_string())?,
        Err(_) => QueryArg::from(raw),
    };
    Ok((name.to_string(), value))
}

/// Build a descriptor from CLI arguments.
pub fn descriptor(sql: &str, args: &[(String, QueryArg)]) -> QueryDescriptor {
    QueryDescriptor::with_args(sql, args.iter().cloned().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SqlValue;

    fn parse(args: &[&str]) -> Config {
        Config::try_parse_from(std::iter::once("multi-db").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_options_defaults() {
        let opts = ManagerOptions::default();
        assert_eq!(opts.max_connections_or_default(false), 10);
        assert_eq!(opts.max_connections_or_default(true), 1);
        assert_eq!(opts.min_connections_or_default(), 0);
        assert_eq!(opts.idle_timeout_or_default(), 600);
        assert_eq!(opts.connect_timeout(), Duration::from_secs(10));
        assert_eq!(opts.statement_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_options_validation() {
        assert!(ManagerOptions::default().validate().is_ok());
        let opts = ManagerOptions {
            max_connections: Some(0),
            ..Default::default()
        };
        assert!(opts.validate().unwrap_err().contains("max_connections"));
        let opts = ManagerOptions {
            max_connections: Some(2),
            min_connections: Some(5),
            ..Default::default()
        };
        assert!(opts.validate().unwrap_err().contains("cannot exceed"));
        let opts = ManagerOptions {
            statement_timeout_secs: Some(0),
            ..Default::default()
        };
        assert!(opts.validate().is_err());
    }

    #[test]
    fn test_split_url_extracts_options() {
        let (dsn, opts) = ManagerOptions::split_url(
            "postgres://u:p@host/db?sslmode=require&max_connections=4&statement_timeout=5",
        );
        assert_eq!(dsn, "postgres://u:p@host/db?sslmode=require");
        assert_eq!(opts.max_connections, Some(4));
        assert_eq!(opts.statement_timeout_secs, Some(5));

        let (dsn, opts) = ManagerOptions::split_url("mysql://u:p@host/db?idle_timeout=abc");
        assert_eq!(dsn, "mysql://u:p@host/db");
        assert_eq!(opts.idle_timeout_secs, None);
    }

    #[test]
    fn test_split_url_leaves_ado_strings() {
        let ado = "server=tcp:h,1433;user id=sa;password=x;database=db";
        assert_eq!(ManagerOptions::split_url(ado).0, ado);
    }

    #[test]
    fn test_record_from_json_with_legacy_names() {
        let record = ConnectionRecord::from_json_str(
            r#"{"tp":"post","host":" db ","port":5432,"userName":"app","pass":"s3cret","name":"shop"}"#,
        )
        .unwrap();
        assert_eq!(record.kind, BackendKind::Postgres);
        assert_eq!(record.host, "db");
        assert_eq!(record.password, "s3cret");

        let record = ConnectionRecord::from_json_str(r#"{"tp":"sqllite","filedb":"a.db"}"#).unwrap();
        assert_eq!(record.kind, BackendKind::Sqlite);
        assert_eq!(record.file, "a.db");
    }

    #[test]
    fn test_record_from_json_rejects_invalid() {
        let err = ConnectionRecord::from_json_str(r#"{"kind":"mysql","host":"h"}"#).unwrap_err();
        assert!(matches!(err, DbError::InvalidConfiguration { .. }));
        let err = ConnectionRecord::from_json_str("not json").unwrap_err();
        assert!(matches!(err, DbError::InvalidConfiguration { .. }));
    }

    #[test]
    fn test_record_from_json_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut file, br#"{"kind":"sqlite","file":"x.db"}"#).unwrap();
        let record = ConnectionRecord::from_json_file(file.path()).unwrap();
        assert_eq!(record.file, "x.db");

        let err = ConnectionRecord::from_json_file("/nonexistent/dir/conn.json").unwrap_err();
        assert!(matches!(err, DbError::InvalidConfiguration { .. }));
    }

    #[test]
    fn test_parse_named_arg() {
        let (name, value) = parse_named_arg("ids=[1,2,3]").unwrap();
        assert_eq!(name, "ids");
        assert!(value.is_list());

        let (_, value) = parse_named_arg("n=42").unwrap();
        assert_eq!(value, QueryArg::Value(SqlValue::Int(42)));

        let (_, value) = parse_named_arg("name=alice").unwrap();
        assert_eq!(value, QueryArg::Value(SqlValue::Text("alice".into())));

        let (_, value) = parse_named_arg("q=a=b").unwrap();
        assert_eq!(value, QueryArg::Value(SqlValue::Text("a=b".into())));

        assert!(parse_named_arg("novalue").is_err());
        assert!(parse_named_arg("=1").is_err());
        assert!(parse_named_arg(r#"o={"a":1}"#).is_err());
    }

    #[test]
    fn test_cli_record_flags() {
        let config = parse(&["--kind", "mysql", "--host", "h", "--user", "u", "--password", "p", "--database", "d", "ping"]);
        let record = config.connection_record().unwrap().unwrap();
        assert_eq!(record.kind, BackendKind::MySql);
        assert_eq!(record.port, 3306);
        assert!(matches!(config.command, Command::Ping));
    }

    #[test]
    fn test_cli_query_command() {
        let config = parse(&[
            "--url", "sqlite::memory:", "query", "SELECT * FROM t WHERE id IN (:ids)",
            "--arg", "ids=[1,2]", "--max-rows", "5",
        ]);
        match &config.command {
            Command::Query { sql, args, max_rows, all } => {
                let descriptor = descriptor(sql, args);
                assert!(descriptor.args["ids"].is_list());
                assert_eq!(*max_rows, 5);
                assert!(!all);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_cli_exec_expect() {
        let config = parse(&["--url", "sqlite::memory:", "exec", "DELETE FROM t", "--expect", "delete"]);
        match config.command {
            Command::Exec { expect, .. } => assert_eq!(expect, Some(OperationClass::Delete)),
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_connection_manager_requires_target() {
        let config = parse(&["dsn"]);
        if std::env::var_os("DATABASE_URL").is_none() && std::env::var_os("DB_KIND").is_none() {
            assert!(config.connection_manager().is_err());
        }
    }

    #[tokio::test]
    async fn test_connection_manager_url_options() {
        let config = parse(&["--url", "sqlite::memory:?max_connections=1", "--statement-timeout", "7", "dsn"]);
        let manager = config.connection_manager().unwrap();
        assert_eq!(manager.options().max_connections, Some(1));
        assert_eq!(manager.options().statement_timeout_secs, Some(7));
        let target = manager.connection_target().await.unwrap();
        assert_eq!(target.kind, BackendKind::Sqlite);
        assert_eq!(target.dsn, "sqlite::memory:");
    }

    #[test]
    fn test_dsn_timeouts_apply_without_flags() {
        if std::env::var_os("DB_CONNECT_TIMEOUT").is_some()
            || std::env::var_os("DB_STATEMENT_TIMEOUT").is_some()
        {
            return;
        }
        let url = "postgres://u@host/db?statement_timeout=5&connect_timeout=3";
        let opts = parse(&["--url", url, "dsn"]).manager_options();
        assert_eq!(opts.statement_timeout_secs, Some(5));
        assert_eq!(opts.connect_timeout_secs, Some(3));

        // an explicit flag still wins over the DSN
        let opts = parse(&["--url", url, "--statement-timeout", "9", "dsn"]).manager_options();
        assert_eq!(opts.statement_timeout_secs, Some(9));
        assert_eq!(opts.connect_timeout_secs, Some(3));

        // neither set: the built-in defaults
        let opts = parse(&["--url", "sqlite::memory:", "dsn"]).manager_options();
        assert_eq!(opts.statement_timeout(), Duration::from_secs(DEFAULT_STATEMENT_TIMEOUT_SECS));
    }
}
