//! Query-related data models.
//!
//! This module defines query descriptors, their arguments and the operation
//! classes statements can be validated against.

use crate::error::DbError;
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::str::FromStr;

/// A scalar parameter value bound to a positional placeholder.
///
/// Input from JSON goes through `TryFrom<serde_json::Value>`, where every
/// string is text.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SqlValue {
    /// NULL value
    Null,
    /// Boolean value
    Bool(bool),
    /// Integer value (stored as i64 for maximum range)
    Int(i64),
    /// Floating point value
    Float(f64),
    /// String value
    Text(String),
    /// Binary data (base64 encoded in JSON output)
    #[serde(with = "base64_bytes")]
    Bytes(Vec<u8>),
}

impl SqlValue {
    /// Check if this value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Get the type name of this value for debugging.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Text(_) => "text",
            Self::Bytes(_) => "bytes",
        }
    }
}

/// Serialization of binary data as base64.
pub(crate) mod base64_bytes {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    use serde::{Serialize, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        STANDARD.encode(bytes).serialize(serializer)
    }
}

/// Implements `From<$ty>` for both `SqlValue` and `QueryArg`.
macro_rules! impl_from_scalar {
    ($($ty:ty => $variant:ident),+ $(,)?) => {
        $(
            impl From<$ty> for SqlValue {
                fn from(v: $ty) -> Self {
                    SqlValue::$variant(v.into())
                }
            }

            impl From<$ty> for QueryArg {
                fn from(v: $ty) -> Self {
                    QueryArg::Value(SqlValue::from(v))
                }
            }
        )+
    };
}

impl_from_scalar! {
    bool => Bool,
    i32 => Int,
    i64 => Int,
    u32 => Int,
    f64 => Float,
    String => Text,
    &str => Text,
    Vec<u8> => Bytes,
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(SqlValue::Null)
    }
}

/// An argument bound to a named placeholder.
///
/// A `List` expands into one positional placeholder per element, for use in
/// `IN (...)` clauses.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryArg {
    Value(SqlValue),
    List(Vec<SqlValue>),
}

impl QueryArg {
    /// Build a list argument from any iterator of values.
    pub fn list<I, T>(values: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<SqlValue>,
    {
        QueryArg::List(values.into_iter().map(Into::into).collect())
    }

    /// Whether this argument is a sequence.
    pub fn is_list(&self) -> bool {
        matches!(self, Self::List(_))
    }
}

impl From<SqlValue> for QueryArg {
    fn from(v: SqlValue) -> Self {
        QueryArg::Value(v)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for QueryArg {
    fn from(v: Option<T>) -> Self {
        QueryArg::Value(SqlValue::from(v))
    }
}

impl From<Vec<SqlValue>> for QueryArg {
    fn from(v: Vec<SqlValue>) -> Self {
        QueryArg::List(v)
    }
}

impl TryFrom<JsonValue> for SqlValue {
    type Error = DbError;

    fn try_from(value: JsonValue) -> Result<Self, Self::Error> {
        match value {
            JsonValue::Null => Ok(SqlValue::Null),
            JsonValue::Bool(b) => Ok(SqlValue::Bool(b)),
            JsonValue::Number(n) => match n.as_i64() {
                Some(i) => Ok(SqlValue::Int(i)),
                None => n.as_f64().map(SqlValue::Float).ok_or_else(|| {
                    DbError::malformed_query(format!("Number out of range: {}", n))
                }),
            },
            JsonValue::String(s) => Ok(SqlValue::Text(s)),
            other @ (JsonValue::Array(_) | JsonValue::Object(_)) => Err(
                DbError::malformed_query(format!("Expected a scalar value, got: {}", other)),
            ),
        }
    }
}

impl TryFrom<JsonValue> for QueryArg {
    type Error = DbError;

    fn try_from(value: JsonValue) -> Result<Self, Self::Error> {
        match value {
            JsonValue::Array(items) => items
                .into_iter()
                .map(SqlValue::try_from)
                .collect::<Result<Vec<_>, _>>()
                .map(QueryArg::List),
            other => SqlValue::try_from(other).map(QueryArg::Value),
        }
    }
}

/// A query template with named placeholders and its arguments.
///
/// The template is kept verbatim; rewriting into positional SQL happens once
/// per execution and never feeds back into the descriptor.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct QueryDescriptor {
    pub template: String,
    pub args: HashMap<String, QueryArg>,
}

impl QueryDescriptor {
    /// Create a descriptor with no arguments.
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
            args: HashMap::new(),
        }
    }

    /// Create a descriptor from a template and an argument map.
    pub fn with_args(template: impl Into<String>, args: HashMap<String, QueryArg>) -> Self {
        Self {
            template: template.into(),
            args,
        }
    }

    /// Bind a named argument.
    pub fn arg(mut self, name: impl Into<String>, value: impl Into<QueryArg>) -> Self {
        self.args.insert(name.into(), value.into());
        self
    }
}

/// Declared category a write statement is validated against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationClass {
    Insert,
    Update,
    Delete,
}

impl OperationClass {
    /// Keyword used in messages for this class.
    pub fn keyword(&self) -> &'static str {
        match self {
            Self::Insert => "INSERT",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
        }
    }
}

impl std::fmt::Display for OperationClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.keyword())
    }
}

impl FromStr for OperationClass {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "INSERT" => Ok(Self::Insert),
            "UPDATE" => Ok(Self::Update),
            "DELETE" => Ok(Self::Delete),
            other => Err(DbError::statement_kind_mismatch(other, "<no statement>")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sql_value_types() {
        assert!(SqlValue::Null.is_null());
        assert!(!SqlValue::Bool(true).is_null());
        assert_eq!(SqlValue::Int(42).type_name(), "int");
        assert_eq!(SqlValue::from("hello").type_name(), "text");
        assert_eq!(SqlValue::from(None::<i64>), SqlValue::Null);
        assert_eq!(SqlValue::from(Some(7_i32)), SqlValue::Int(7));
    }

    #[test]
    fn test_query_arg_list() {
        let arg = QueryArg::list([1_i64, 2, 3]);
        assert!(arg.is_list());
        assert_eq!(
            arg,
            QueryArg::List(vec![SqlValue::Int(1), SqlValue::Int(2), SqlValue::Int(3)])
        );
        assert!(!QueryArg::from("x").is_list());
    }

    #[test]
    fn test_query_arg_from_json() {
        let arg = QueryArg::try_from(serde_json::json!([1, "two", null])).unwrap();
        assert_eq!(
            arg,
            QueryArg::List(vec![
                SqlValue::Int(1),
                SqlValue::Text("two".to_string()),
                SqlValue::Null
            ])
        );
        assert_eq!(
            QueryArg::try_from(serde_json::json!(1.5)).unwrap(),
            QueryArg::Value(SqlValue::Float(1.5))
        );
        assert!(QueryArg::try_from(serde_json::json!([[1]])).is_err());
        assert!(QueryArg::try_from(serde_json::json!({"a": 1})).is_err());
    }

    #[test]
    fn test_descriptor_builder() {
        let q = QueryDescriptor::new("SELECT * FROM t WHERE id = :id").arg("id", 5_i64);
        assert_eq!(q.template, "SELECT * FROM t WHERE id = :id");
        assert_eq!(q.args.get("id"), Some(&QueryArg::Value(SqlValue::Int(5))));
    }

    #[test]
    fn test_operation_class_parse() {
        assert_eq!("insert".parse::<OperationClass>().unwrap(), OperationClass::Insert);
        assert_eq!(" Update ".parse::<OperationClass>().unwrap(), OperationClass::Update);
        assert_eq!("DELETE".parse::<OperationClass>().unwrap(), OperationClass::Delete);
        let err = "select".parse::<OperationClass>().unwrap_err();
        assert!(matches!(err, DbError::StatementKindMismatch { .. }));
    }

    #[test]
    fn test_bytes_serialize_as_base64() {
        let json = serde_json::to_string(&SqlValue::Bytes(b"hi".to_vec())).unwrap();
        assert_eq!(json, "\"aGk=\"");
    }

    #[test]
    fn test_json_strings_are_text() {
        // base64-looking input is not decoded into bytes
        assert_eq!(
            SqlValue::try_from(serde_json::json!("aGk=")).unwrap(),
            SqlValue::Text("aGk=".to_string())
        );
    }
}
