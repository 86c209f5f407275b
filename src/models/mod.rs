//! Data models for the database access layer.
//!
//! This module re-exports all model types used throughout the crate.

pub mod connection;
pub mod query;

// Re-export commonly used types
pub use connection::{BackendKind, ConnectionRecord};
pub use query::{OperationClass, QueryArg, QueryDescriptor, SqlValue};
