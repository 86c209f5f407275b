//! SQL Server backend over `tiberius`.
//!
//! Unlike the sqlx backends this is a single client connection, not a pool.
//! Transactions are driven with `BEGIN TRAN` / `COMMIT TRAN` / `ROLLBACK TRAN`
//! on that connection.

use crate::db::rewrite::RewrittenQuery;
use crate::db::types::{Record, RecordRow, RowLimit, Value, collect_records, decode_binary_value};
use crate::error::{DbError, DbResult};
use crate::models::SqlValue;
use tiberius::{Client, ColumnType, Config, Query, Row};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::debug;

pub type MssqlClient = Client<Compat<TcpStream>>;

/// Parse an ADO (`server=tcp:host,port;...`) or URL-style DSN.
fn parse_config(dsn: &str) -> DbResult<Config> {
    let lower = dsn.to_ascii_lowercase();
    let parsed = if lower.starts_with("jdbc:") {
        Config::from_jdbc_string(dsn)
    } else if let Some(rest) = lower
        .starts_with("sqlserver://")
        .then(|| &dsn["sqlserver://".len()..])
        .or_else(|| lower.starts_with("mssql://").then(|| &dsn["mssql://".len()..]))
    {
        Config::from_jdbc_string(&format!("jdbc:sqlserver://{}", rest))
    } else {
        Config::from_ado_string(dsn)
    };
    parsed.map_err(|e| {
        DbError::invalid_configuration(format!("Invalid SQL Server connection string: {}", e))
    })
}

/// Open a client connection.
pub async fn connect(dsn: &str) -> DbResult<MssqlClient> {
    let config = parse_config(dsn)?;
    let tcp = TcpStream::connect(config.get_addr()).await.map_err(|e| {
        DbError::connection(
            format!("Failed to connect: {}", e),
            "Check that the SQL Server instance is running and accessible",
        )
    })?;
    tcp.set_nodelay(true).map_err(|e| {
        DbError::connection(format!("Failed to configure socket: {}", e), "Retry the connection")
    })?;

    Client::connect(config, tcp.compat_write())
        .await
        .map_err(|e| {
            let message = e.to_string();
            let suggestion = if message.to_lowercase().contains("login failed") {
                "Verify the username and password in the connection string"
            } else {
                "Verify the connection string format: server=tcp:host,1433;user id=..;password=..;database=.."
            };
            DbError::connection(format!("Failed to connect: {}", message), suggestion)
        })
}

/// Run a statement that returns no rows we care about.
async fn simple(client: &mut MssqlClient, sql: &str) -> DbResult<()> {
    client.simple_query(sql).await?.into_results().await?;
    Ok(())
}

pub async fn ping(client: &mut MssqlClient) -> DbResult<()> {
    simple(client, "SELECT 1").await
}

pub async fn begin(client: &mut MssqlClient) -> DbResult<()> {
    simple(client, "BEGIN TRAN").await
}

pub async fn commit(client: &mut MssqlClient) -> DbResult<()> {
    simple(client, "COMMIT TRAN").await
}

pub async fn rollback(client: &mut MssqlClient) -> DbResult<()> {
    simple(client, "IF @@TRANCOUNT > 0 ROLLBACK TRAN").await
}

fn build_query(query: &RewrittenQuery) -> Query<'_> {
    let mut q = Query::new(query.sql.as_str());
    for param in &query.params {
        match param {
            SqlValue::Null => q.bind(Option::<String>::None),
            SqlValue::Bool(v) => q.bind(*v),
            SqlValue::Int(v) => q.bind(*v),
            SqlValue::Float(v) => q.bind(*v),
            SqlValue::Text(v) => q.bind(v.as_str()),
            SqlValue::Bytes(v) => q.bind(v.as_slice()),
        }
    }
    q
}

/// Execute a statement and return the number of affected rows.
pub async fn execute(client: &mut MssqlClient, query: &RewrittenQuery) -> DbResult<u64> {
    let result = if query.params.is_empty() {
        client.execute(query.sql.as_str(), &[]).await?
    } else {
        build_query(query).execute(client).await?
    };
    Ok(result.total())
}

/// Run a query and materialize its first result set.
pub async fn fetch_records(
    client: &mut MssqlClient,
    query: &RewrittenQuery,
    limit: RowLimit,
) -> DbResult<Vec<Record>> {
    debug!(params = query.params.len(), "Running SQL Server query");
    let stream = build_query(query).query(client).await?;
    collect_records(stream.into_row_stream(), limit).await
}

/// Try each type in turn until one converts. The error of the last type is
/// the one reported.
macro_rules! try_cells {
    ($row:expr, $idx:expr, $err:expr, [$ty:ty => $conv:expr $(,)?]) => {
        $row.try_get::<$ty, _>($idx).map(|v| v.map($conv)).map_err($err)
    };
    ($row:expr, $idx:expr, $err:expr, [$ty:ty => $conv:expr, $($rest:tt)+]) => {{
        if let Ok(v) = $row.try_get::<$ty, _>($idx) {
            return Ok(v.map($conv));
        }
        try_cells!($row, $idx, $err, [$($rest)+])
    }};
}

impl RecordRow for Row {
    fn column_names(&self) -> DbResult<Vec<String>> {
        Ok(self.columns().iter().map(|c| c.name().to_string()).collect())
    }

    fn cell(&self, idx: usize) -> DbResult<Option<Value>> {
        let column = self.columns().get(idx).ok_or_else(|| {
            DbError::columns_unavailable(format!("Column index {} out of bounds", idx))
        })?;
        let err = |e: tiberius::error::Error| DbError::row_decode(column.name(), e.to_string());

        match column.column_type() {
            ColumnType::Null => Ok(None),
            ColumnType::Bit | ColumnType::Bitn => {
                try_cells!(self, idx, err, [bool => Value::Bool])
            }
            ColumnType::Int1
            | ColumnType::Int2
            | ColumnType::Int4
            | ColumnType::Int8
            | ColumnType::Intn => try_cells!(self, idx, err, [
                i64 => Value::Int,
                i32 => |v| Value::Int(v.into()),
                i16 => |v| Value::Int(v.into()),
                u8 => |v| Value::Int(v.into()),
            ]),
            ColumnType::Float4
            | ColumnType::Float8
            | ColumnType::Floatn
            | ColumnType::Money
            | ColumnType::Money4 => try_cells!(self, idx, err, [
                f64 => Value::Float,
                f32 => |v| Value::Float(v.into()),
            ]),
            ColumnType::Decimaln | ColumnType::Numericn => {
                try_cells!(self, idx, err, [tiberius::numeric::Numeric => |v| Value::Text(v.to_string())])
            }
            ColumnType::Guid => {
                try_cells!(self, idx, err, [uuid::Uuid => |v| Value::Text(v.to_string())])
            }
            ColumnType::Daten => {
                try_cells!(self, idx, err, [chrono::NaiveDate => |v| Value::Text(v.to_string())])
            }
            ColumnType::Timen => {
                try_cells!(self, idx, err, [chrono::NaiveTime => |v| Value::Text(v.to_string())])
            }
            ColumnType::Datetime
            | ColumnType::Datetime4
            | ColumnType::Datetimen
            | ColumnType::Datetime2 => try_cells!(self, idx, err, [
                chrono::NaiveDateTime => |v| Value::Text(v.to_string()),
            ]),
            ColumnType::DatetimeOffsetn => try_cells!(self, idx, err, [
                chrono::DateTime<chrono::FixedOffset> => |v| Value::Text(v.to_rfc3339()),
            ]),
            ColumnType::BigVarBin | ColumnType::BigBinary | ColumnType::Image => {
                try_cells!(self, idx, err, [&[u8] => |v: &[u8]| decode_binary_value(v.to_vec())])
            }
            _ => try_cells!(self, idx, err, [&str => |v: &str| Value::Text(v.to_string())]),
        }
    }
}
