//! Connection-related data models.
//!
//! This module defines the backend kind enumeration and the configuration
//! record describing a single backend connection.

use crate::db::dialect::DEFAULT_POSTGRES_SSL_MODE;
use crate::error::{DbError, DbResult};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Supported database backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum BackendKind {
    Postgres,
    /// Includes MariaDB
    MySql,
    SqlServer,
    Sqlite,
}

impl BackendKind {
    /// All supported backends, in dialect-table order.
    pub const ALL: [BackendKind; 4] = [
        BackendKind::Postgres,
        BackendKind::MySql,
        BackendKind::SqlServer,
        BackendKind::Sqlite,
    ];

    /// Infer the backend from a connection string's scheme.
    pub fn from_connection_string(connection_string: &str) -> Option<Self> {
        let lower = connection_string.trim().to_lowercase();
        if lower.starts_with("postgres://") || lower.starts_with("postgresql://") {
            Some(Self::Postgres)
        } else if lower.starts_with("mysql://") || lower.starts_with("mariadb://") {
            Some(Self::MySql)
        } else if lower.starts_with("sqlite://") || lower.starts_with("sqlite:") {
            Some(Self::Sqlite)
        } else if lower.starts_with("sqlserver://")
            || lower.starts_with("mssql://")
            || lower.starts_with("server=")
        {
            Some(Self::SqlServer)
        } else {
            None
        }
    }

    /// Get the display name for this backend.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Postgres => "PostgreSQL",
            Self::MySql => "MySQL",
            Self::SqlServer => "SQL Server",
            Self::Sqlite => "SQLite",
        }
    }

    /// Get the default port for this backend.
    pub fn default_port(&self) -> Option<u16> {
        match self {
            Self::Postgres => Some(5432),
            Self::MySql => Some(3306),
            Self::SqlServer => Some(1433),
            Self::Sqlite => None,
        }
    }

    /// Whether the backend stores its data in a local file.
    pub fn is_file_based(&self) -> bool {
        matches!(self, Self::Sqlite)
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

impl FromStr for BackendKind {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "post" | "postgres" | "postgresql" | "pg" => Ok(Self::Postgres),
            "mysql" | "mariadb" => Ok(Self::MySql),
            "sqlser" | "sqlserver" | "sql server" | "mssql" => Ok(Self::SqlServer),
            "sqllite" | "sqlite" | "sqlite3" => Ok(Self::Sqlite),
            _ => Err(DbError::unsupported_backend(s.trim())),
        }
    }
}

impl TryFrom<String> for BackendKind {
    type Error = DbError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<BackendKind> for String {
    fn from(kind: BackendKind) -> Self {
        match kind {
            BackendKind::Postgres => "postgres",
            BackendKind::MySql => "mysql",
            BackendKind::SqlServer => "sqlserver",
            BackendKind::Sqlite => "sqlite",
        }
        .to_string()
    }
}

/// Configuration for one backend connection.
///
/// Network backends use host, port, user, password and database; SQLite uses
/// only `file`. Field aliases accept the legacy JSON names.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionRecord {
    #[serde(alias = "tp")]
    pub kind: BackendKind,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub port: u16,
    #[serde(default, alias = "userName")]
    pub user: String,
    /// Contains sensitive data - never log
    #[serde(default, alias = "pass", skip_serializing)]
    pub password: String,
    #[serde(default, alias = "name")]
    pub database: String,
    #[serde(default, alias = "sslmode")]
    pub ssl_mode: String,
    #[serde(default, alias = "filedb")]
    pub file: String,
}

impl ConnectionRecord {
    fn network(
        kind: BackendKind,
        host: impl Into<String>,
        port: u16,
        user: impl Into<String>,
        password: impl Into<String>,
        database: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            host: host.into(),
            port,
            user: user.into(),
            password: password.into(),
            database: database.into(),
            ssl_mode: String::new(),
            file: String::new(),
        }
    }

    /// Create a PostgreSQL record.
    pub fn postgres(
        host: impl Into<String>,
        port: u16,
        user: impl Into<String>,
        password: impl Into<String>,
        database: impl Into<String>,
    ) -> Self {
        Self::network(BackendKind::Postgres, host, port, user, password, database)
    }

    /// Create a MySQL record.
    pub fn mysql(
        host: impl Into<String>,
        port: u16,
        user: impl Into<String>,
        password: impl Into<String>,
        database: impl Into<String>,
    ) -> Self {
        Self::network(BackendKind::MySql, host, port, user, password, database)
    }

    /// Create a SQL Server record.
    pub fn sql_server(
        host: impl Into<String>,
        port: u16,
        user: impl Into<String>,
        password: impl Into<String>,
        database: impl Into<String>,
    ) -> Self {
        Self::network(BackendKind::SqlServer, host, port, user, password, database)
    }

    /// Create a SQLite record for the given database file.
    pub fn sqlite(file: impl Into<String>) -> Self {
        Self {
            kind: BackendKind::Sqlite,
            host: String::new(),
            port: 0,
            user: String::new(),
            password: String::new(),
            database: String::new(),
            ssl_mode: String::new(),
            file: file.into(),
        }
    }

    /// Set the SSL mode.
    pub fn with_ssl_mode(mut self, ssl_mode: impl Into<String>) -> Self {
        self.ssl_mode = ssl_mode.into();
        self
    }

    /// Return a copy with every text field trimmed and the Postgres SSL mode defaulted.
    pub fn normalized(&self) -> Self {
        let mut record = Self {
            kind: self.kind,
            host: self.host.trim().to_string(),
            port: self.port,
            user: self.user.trim().to_string(),
            password: self.password.trim().to_string(),
            database: self.database.trim().to_string(),
            ssl_mode: self.ssl_mode.trim().to_string(),
            file: self.file.trim().to_string(),
        };
        if record.kind == BackendKind::Postgres && record.ssl_mode.is_empty() {
            record.ssl_mode = DEFAULT_POSTGRES_SSL_MODE.to_string();
        }
        record
    }

    /// Check the record against the validity rules for its backend kind.
    pub fn is_valid(&self) -> bool {
        self.invalid_reason().is_none()
    }

    /// Validate the record, returning its normalized form.
    pub fn validate(&self) -> DbResult<Self> {
        let record = self.normalized();
        match record.invalid_reason() {
            Some(reason) => Err(DbError::invalid_configuration(reason)),
            None => Ok(record),
        }
    }

    fn invalid_reason(&self) -> Option<String> {
        let record = self.normalized();
        if record.kind.is_file_based() {
            if record.file.is_empty() {
                return Some(format!("{} requires a database file path", record.kind));
            }
            return None;
        }

        let missing: Vec<&str> = [
            ("host", record.host.is_empty()),
            ("user", record.user.is_empty()),
            ("password", record.password.is_empty()),
            ("database", record.database.is_empty()),
        ]
        .into_iter()
        .filter_map(|(field, empty)| empty.then_some(field))
        .collect();

        if !missing.is_empty() {
            return Some(format!(
                "{} requires non-empty {}",
                record.kind,
                missing.join(", ")
            ));
        }
        if record.port == 0 {
            return Some(format!("{} requires a port greater than 0", record.kind));
        }
        None
    }
}

impl std::fmt::Debug for ConnectionRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionRecord")
            .field("kind", &self.kind)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"****")
            .field("database", &self.database)
            .field("ssl_mode", &self.ssl_mode)
            .field("file", &self.file)
            .finish()
    }
}

/// Display-safe summary (password masked).
impl std::fmt::Display for ConnectionRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.kind.is_file_based() {
            return write!(f, "{} file={}", self.kind, self.file);
        }
        write!(
            f,
            "{} user={} password=**** host={} port={} database={}",
            self.kind, self.user, self.host, self.port, self.database
        )?;
        if !self.ssl_mode.is_empty() {
            write!(f, " sslmode={}", self.ssl_mode)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pg() -> ConnectionRecord {
        ConnectionRecord::postgres("localhost", 5432, "app", "secret", "shop")
    }

    #[test]
    fn test_backend_kind_from_connection_string() {
        assert_eq!(
            BackendKind::from_connection_string("postgres://localhost/db"),
            Some(BackendKind::Postgres)
        );
        assert_eq!(
            BackendKind::from_connection_string("postgresql://localhost/db"),
            Some(BackendKind::Postgres)
        );
        assert_eq!(
            BackendKind::from_connection_string("mysql://localhost/db"),
            Some(BackendKind::MySql)
        );
        assert_eq!(
            BackendKind::from_connection_string("sqlite:test.db"),
            Some(BackendKind::Sqlite)
        );
        assert_eq!(
            BackendKind::from_connection_string("server=tcp:db,1433;user id=sa"),
            Some(BackendKind::SqlServer)
        );
        assert_eq!(
            BackendKind::from_connection_string("unknown://localhost"),
            None
        );
    }

    #[test]
    fn test_backend_kind_parses_legacy_names() {
        assert_eq!("POST".parse::<BackendKind>().unwrap(), BackendKind::Postgres);
        assert_eq!("MYSQL".parse::<BackendKind>().unwrap(), BackendKind::MySql);
        assert_eq!(
            "SQLSER".parse::<BackendKind>().unwrap(),
            BackendKind::SqlServer
        );
        assert_eq!("SQLLITE".parse::<BackendKind>().unwrap(), BackendKind::Sqlite);
        assert_eq!(" sqlite3 ".parse::<BackendKind>().unwrap(), BackendKind::Sqlite);
    }

    #[test]
    fn test_backend_kind_unknown_is_unsupported() {
        let err = "oracle".parse::<BackendKind>().unwrap_err();
        assert!(matches!(err, DbError::UnsupportedBackend { .. }));
    }

    #[test]
    fn test_network_record_valid() {
        assert!(pg().is_valid());
        assert!(ConnectionRecord::mysql("db", 3306, "root", "pw", "app").is_valid());
        assert!(ConnectionRecord::sql_server("db", 1433, "sa", "pw", "app").is_valid());
    }

    #[test]
    fn test_network_record_requires_every_field() {
        let cases = [
            ConnectionRecord { host: " ".into(), ..pg() },
            ConnectionRecord { user: String::new(), ..pg() },
            ConnectionRecord { password: String::new(), ..pg() },
            ConnectionRecord { database: String::new(), ..pg() },
            ConnectionRecord { port: 0, ..pg() },
        ];
        for record in cases {
            assert!(!record.is_valid(), "should be invalid: {record:?}");
        }
    }

    #[test]
    fn test_sqlite_record_ignores_network_fields() {
        assert!(ConnectionRecord::sqlite("data.db").is_valid());
        assert!(!ConnectionRecord::sqlite("   ").is_valid());

        let with_noise = ConnectionRecord {
            host: "ignored".into(),
            port: 0,
            ..ConnectionRecord::sqlite("data.db")
        };
        assert!(with_noise.is_valid());
    }

    #[test]
    fn test_validate_returns_normalized_record() {
        let record = ConnectionRecord::postgres(" localhost ", 5432, " app", "secret ", "shop")
            .validate()
            .unwrap();
        assert_eq!(record.host, "localhost");
        assert_eq!(record.user, "app");
        assert_eq!(record.password, "secret");
        assert_eq!(record.ssl_mode, DEFAULT_POSTGRES_SSL_MODE);
    }

    #[test]
    fn test_validate_keeps_explicit_ssl_mode() {
        let record = pg().with_ssl_mode("require").validate().unwrap();
        assert_eq!(record.ssl_mode, "require");

        // Only Postgres gets a default SSL mode
        let mysql = ConnectionRecord::mysql("db", 3306, "root", "pw", "app")
            .validate()
            .unwrap();
        assert!(mysql.ssl_mode.is_empty());
    }

    #[test]
    fn test_validate_reports_missing_fields() {
        let err = ConnectionRecord { user: String::new(), ..pg() }
            .validate()
            .unwrap_err();
        assert!(matches!(err, DbError::InvalidConfiguration { .. }));
        assert!(err.to_string().contains("user"));
    }

    #[test]
    fn test_display_masks_password() {
        let shown = pg().to_string();
        assert!(!shown.contains("secret"));
        assert!(shown.contains("****"));
        assert!(!format!("{:?}", pg()).contains("secret"));
    }

    #[test]
    fn test_deserialize_legacy_field_names() {
        let record: ConnectionRecord = serde_json::from_str(
            r#"{"tp":"POST","host":"localhost","port":5432,"userName":"app","pass":"secret","name":"shop","sslmode":""}"#,
        )
        .unwrap();
        assert_eq!(record, pg());
    }

    #[test]
    fn test_deserialize_unknown_kind_fails() {
        let result =
            serde_json::from_str::<ConnectionRecord>(r#"{"kind":"oracle","host":"localhost"}"#);
        assert!(result.is_err());
    }
}
