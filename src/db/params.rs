//! Parameter binding utilities for database queries.
//!
//! Binds positional [`SqlValue`]s produced by the rewriter to backend-specific
//! sqlx query objects, in marker order.
//!
//! Postgres needs one extra step. sqlx sends every parameter in binary form
//! with a declared type, so NULL and text values declared as TEXT are rejected
//! by non-text columns. Before such a statement runs, [`postgres_untyped_casts`]
//! asks the server which types it infers for those parameters, and the markers
//! are wrapped in `CAST($n AS type)` so the text is converted server-side.

use crate::db::rewrite::cast_markers;
use crate::models::SqlValue;
use sqlx::mysql::MySqlArguments;
use sqlx::postgres::{PgArguments, PgConnection};
use sqlx::query::Query;
use sqlx::sqlite::SqliteArguments;
use sqlx::{Executor, MySql, Postgres, Row, Sqlite};
use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

/// Savepoint guarding type inference inside an open transaction.
const INFERENCE_SAVEPOINT: &str = "multi_db_param_types";

static NEXT_INFERENCE_ID: AtomicU64 = AtomicU64::new(0);

/// Bind a parameter to a MySQL query.
pub(crate) fn bind_mysql_param<'q>(
    query: Query<'q, MySql, MySqlArguments>,
    param: &'q SqlValue,
) -> Query<'q, MySql, MySqlArguments> {
    match param {
        SqlValue::Null => query.bind(None::<String>),
        SqlValue::Bool(v) => query.bind(*v),
        SqlValue::Int(v) => query.bind(*v),
        SqlValue::Float(v) => query.bind(*v),
        SqlValue::Text(v) => query.bind(v.as_str()),
        SqlValue::Bytes(v) => query.bind(v.as_slice()),
    }
}

/// Bind a parameter to a PostgreSQL query.
pub(crate) fn bind_postgres_param<'q>(
    query: Query<'q, Postgres, PgArguments>,
    param: &'q SqlValue,
) -> Query<'q, Postgres, PgArguments> {
    match param {
        SqlValue::Null => query.bind(None::<String>),
        SqlValue::Bool(v) => query.bind(*v),
        SqlValue::Int(v) => query.bind(*v),
        SqlValue::Float(v) => query.bind(*v),
        SqlValue::Text(v) => query.bind(v.as_str()),
        SqlValue::Bytes(v) => query.bind(v.as_slice()),
    }
}

/// Bind a parameter to a SQLite query.
pub(crate) fn bind_sqlite_param<'q>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    param: &'q SqlValue,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    match param {
        SqlValue::Null => query.bind(None::<String>),
        SqlValue::Bool(v) => query.bind(*v),
        SqlValue::Int(v) => query.bind(*v),
        SqlValue::Float(v) => query.bind(*v),
        SqlValue::Text(v) => query.bind(v.as_str()),
        SqlValue::Bytes(v) => query.bind(v.as_slice()),
    }
}

/// Build a MySQL query with every parameter bound.
pub(crate) fn mysql_query<'q>(
    sql: &'q str,
    params: &'q [SqlValue],
) -> Query<'q, MySql, MySqlArguments> {
    params.iter().fold(sqlx::query(sql), bind_mysql_param)
}

/// Build a PostgreSQL query with every parameter bound.
///
/// The statement is not kept in the connection's statement cache: that cache
/// is keyed by SQL text alone, and the same text may be bound with different
/// value kinds from one call to the next.
pub(crate) fn postgres_query<'q>(
    sql: &'q str,
    params: &'q [SqlValue],
) -> Query<'q, Postgres, PgArguments> {
    params
        .iter()
        .fold(sqlx::query(sql).persistent(false), bind_postgres_param)
}

/// Rewrite `sql` so NULL and text parameters reach non-text targets through an
/// explicit cast. Returns `sql` unchanged when no cast is needed or when the
/// server cannot infer the parameter types, in which case they stay TEXT.
///
/// `in_transaction` wraps the inference in a savepoint so a failure does not
/// abort the surrounding transaction.
pub(crate) async fn postgres_untyped_casts<'s>(
    conn: &mut PgConnection,
    sql: &'s str,
    params: &[SqlValue],
    in_transaction: bool,
) -> Cow<'s, str> {
    if !params.iter().any(is_untyped) {
        return Cow::Borrowed(sql);
    }
    match infer_parameter_types(conn, sql, params, in_transaction).await {
        Some(inferred) => {
            let casts = untyped_param_casts(params, &inferred);
            if casts.is_empty() {
                Cow::Borrowed(sql)
            } else {
                debug!(casts = casts.len(), "Casting untyped parameters");
                Cow::Owned(cast_markers(sql, &casts))
            }
        }
        None => Cow::Borrowed(sql),
    }
}

fn is_untyped(param: &SqlValue) -> bool {
    matches!(param, SqlValue::Null | SqlValue::Text(_))
}

/// Prepare the statement server-side with NULL and text parameters left
/// `unknown`, and read back the type the server settled on for each one.
async fn infer_parameter_types(
    conn: &mut PgConnection,
    sql: &str,
    params: &[SqlValue],
    in_transaction: bool,
) -> Option<Vec<String>> {
    let name = format!(
        "multi_db_param_types_{}",
        NEXT_INFERENCE_ID.fetch_add(1, Ordering::Relaxed)
    );
    let script = parameter_type_script(&name, sql, params);

    if in_transaction {
        let savepoint = format!("SAVEPOINT {}", INFERENCE_SAVEPOINT);
        if let Err(e) = (&mut *conn).execute(savepoint.as_str()).await {
            debug!(error = %e, "Could not open savepoint for parameter inference");
            return None;
        }
    }

    let result = (&mut *conn).fetch_all(sqlx::raw_sql(&script)).await;

    if in_transaction {
        let close = if result.is_ok() {
            format!("RELEASE SAVEPOINT {}", INFERENCE_SAVEPOINT)
        } else {
            format!(
                "ROLLBACK TO SAVEPOINT {0}; RELEASE SAVEPOINT {0}",
                INFERENCE_SAVEPOINT
            )
        };
        if let Err(e) = (&mut *conn).execute(close.as_str()).await {
            warn!(error = %e, "Failed to close parameter inference savepoint");
        }
    }

    let rows = match result {
        Ok(rows) => rows,
        Err(e) => {
            debug!(error = %e, "Parameter types not inferred, binding as text");
            return None;
        }
    };
    let inferred = rows
        .iter()
        .map(|row| row.try_get::<String, _>("type_name").ok())
        .collect::<Option<Vec<_>>>()?;
    (inferred.len() == params.len()).then_some(inferred)
}

/// Script that prepares `sql` as `name`, lists its parameter types in order
/// and drops the prepared statement again.
fn parameter_type_script(name: &str, sql: &str, params: &[SqlValue]) -> String {
    let declared: Vec<&str> = params
        .iter()
        .map(|param| match param {
            SqlValue::Null | SqlValue::Text(_) => "unknown",
            SqlValue::Bool(_) => "boolean",
            SqlValue::Int(_) => "bigint",
            SqlValue::Float(_) => "double precision",
            SqlValue::Bytes(_) => "bytea",
        })
        .collect();
    let body = sql.trim_end().trim_end_matches(';');
    // the newline ends any trailing line comment before the terminator
    format!(
        "PREPARE {name} ({types}) AS {body}\n;\n\
         SELECT p.type_name::text AS type_name \
         FROM pg_prepared_statements s, \
         unnest(s.parameter_types) WITH ORDINALITY AS p(type_name, pos) \
         WHERE s.name = '{name}' ORDER BY p.pos;\n\
         DEALLOCATE {name}",
        types = declared.join(", "),
    )
}

/// Casts for NULL and text parameters whose inferred type is not text, keyed
/// by 1-based marker number.
fn untyped_param_casts(params: &[SqlValue], inferred: &[String]) -> HashMap<usize, String> {
    params
        .iter()
        .zip(inferred)
        .enumerate()
        .filter(|(_, (param, type_name))| {
            is_untyped(param) && !matches!(type_name.as_str(), "text" | "unknown")
        })
        .map(|(idx, (_, type_name))| (idx + 1, type_name.clone()))
        .collect()
}

/// Build a SQLite query with every parameter bound.
pub(crate) fn sqlite_query<'q>(
    sql: &'q str,
    params: &'q [SqlValue],
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    params.iter().fold(sqlx::query(sql), bind_sqlite_param)
}
