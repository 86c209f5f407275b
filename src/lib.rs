//! multi-db
//!
//! One connection manager over PostgreSQL, MySQL, SQLite and (with the `mssql`
//! feature) SQL Server: named-parameter queries, atomic write batches,
//! statement-kind validation and results as generic records.

pub mod config;
pub mod db;
pub mod error;
pub mod models;

pub use config::{Config, ManagerOptions};
pub use db::{ConnectionManager, Record, Value};
pub use error::{DbError, DbResult};
pub use models::{BackendKind, ConnectionRecord, OperationClass, QueryArg, QueryDescriptor, SqlValue};
