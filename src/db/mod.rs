//! Database access layer.
//!
//! - `dialect`: per-backend DSN synthesis, bind style and catalog queries
//! - `rewrite`: named placeholders and IN-list expansion to positional SQL
//! - `validator`: statement-kind checks for write batches
//! - `pool` / `mssql`: live backend handles and transactions
//! - `types`: row materialization into generic records
//! - `manager`: the connection manager tying these together

pub mod dialect;
pub mod manager;
#[cfg(feature = "mssql")]
pub mod mssql;
pub mod params;
pub mod pool;
pub mod rewrite;
pub mod types;
pub mod validator;

pub use dialect::{BindStyle, ConnectionTarget, Dialect};
pub use manager::ConnectionManager;
pub use pool::{DbHandle, DbTransaction};
pub use rewrite::{RewrittenQuery, StringEscapes, rewrite};
pub use types::{Record, RowLimit, Value};
pub use validator::validate_statement_kind;
