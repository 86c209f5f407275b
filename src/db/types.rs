//! Generic records and row materialization.
//!
//! # Architecture
//!
//! Row conversion uses a two-phase approach:
//! 1. `TypeCategory` classifies column types into logical categories
//! 2. Backend-specific decoders extract the value for that category
//!
//! Every backend row type implements [`RecordRow`], and [`collect_records`]
//! drains any stream of such rows into generic [`Record`]s. Null cells are
//! omitted from the record rather than stored.

use crate::error::{DbError, DbResult};
use crate::models::BackendKind;
use crate::models::query::base64_bytes;
use futures_util::{Stream, StreamExt};
use serde::Serialize;
use sqlx::mysql::{MySqlRow, MySqlTypeInfo, MySqlValueRef};
use sqlx::postgres::types::{Oid, PgInterval};
use sqlx::postgres::{PgRow, PgTypeInfo, PgValueFormat, PgValueRef};
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Decode, Row, Type, TypeInfo, ValueRef};
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use tracing::debug;

// =============================================================================
// Generic Values
// =============================================================================

/// A non-null cell value.
///
/// Decimal, date/time, UUID and JSON columns are rendered as `Text`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Text(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    #[serde(with = "base64_bytes")]
    Bytes(Vec<u8>),
}

impl Value {
    /// Integer view of the value. Text holding an integer also converts.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::Bool(b) => Some(i64::from(*b)),
            Value::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            Value::Int(v) => Some(*v as f64),
            Value::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            Value::Int(v) => Some(*v != 0),
            _ => None,
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Text(s) => f.write_str(s),
            Value::Int(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Bool(v) => write!(f, "{}", v),
            Value::Bytes(v) => write!(f, "<{} bytes>", v.len()),
        }
    }
}

/// One row: column name to value. Null columns are absent.
pub type Record = HashMap<String, Value>;

/// Convert a binary payload, keeping it as text when it is valid UTF-8.
pub fn decode_binary_value(bytes: Vec<u8>) -> Value {
    match String::from_utf8(bytes) {
        Ok(s) => Value::Text(s),
        Err(e) => Value::Bytes(e.into_bytes()),
    }
}

// =============================================================================
// Type Classification
// =============================================================================

/// Logical category for database column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCategory {
    Integer,
    Float,
    Decimal,
    Boolean,
    Text,
    Binary,
    Json,
    Uuid,
    Date,
    Time,
    DateTime,
    DateTimeTz,
    Unknown,
}

/// Classify a database type name into a logical category.
pub fn categorize_type(type_name: &str, kind: BackendKind) -> TypeCategory {
    let lower = type_name.to_lowercase();

    // Arrays, ranges and geometric types carry "int" or "text" in their names
    // ("INT4[]", "INTERVAL", "POINT", "INT8RANGE") but decode as neither.
    if lower.ends_with("[]")
        || lower.starts_with('_')
        || lower.contains("range")
        || lower == "interval"
        || lower == "point"
    {
        return TypeCategory::Unknown;
    }

    // Decimal/Numeric - check first as it overlaps with "numeric" in float checks
    if lower.contains("decimal") || lower.contains("numeric") {
        // SQLite's NUMERIC is actually a float
        if kind == BackendKind::Sqlite && lower == "numeric" {
            return TypeCategory::Float;
        }
        return TypeCategory::Decimal;
    }

    if lower.contains("int")
        || lower.contains("serial")
        || lower.contains("tiny")
        || lower == "year"
        || lower == "bit"
    {
        return TypeCategory::Integer;
    }

    if lower == "bool" || lower == "boolean" {
        return TypeCategory::Boolean;
    }

    if lower.contains("float")
        || lower.contains("double")
        || lower == "real"
        || lower == "float4"
        || lower == "float8"
    {
        return TypeCategory::Float;
    }

    if lower == "json" || lower == "jsonb" {
        return TypeCategory::Json;
    }

    if lower == "uuid" {
        return TypeCategory::Uuid;
    }

    if lower.contains("blob") || lower.contains("binary") || lower == "bytea" {
        return TypeCategory::Binary;
    }

    // MySQL TIMESTAMP is stored in UTC
    if lower == "timestamptz" || (kind == BackendKind::MySql && lower == "timestamp") {
        return TypeCategory::DateTimeTz;
    }
    if lower == "timestamp" || lower == "datetime" {
        return TypeCategory::DateTime;
    }
    if lower == "date" {
        return TypeCategory::Date;
    }
    if lower == "time" {
        return TypeCategory::Time;
    }

    if lower.contains("char") || lower.contains("text") || lower == "name" {
        return TypeCategory::Text;
    }

    TypeCategory::Unknown
}

// =============================================================================
// Decimal Type Support
// =============================================================================

/// Wrapper type for raw DECIMAL/NUMERIC values as strings.
/// This preserves the exact database representation.
#[derive(Debug)]
pub struct RawDecimal(pub String);

impl Type<sqlx::MySql> for RawDecimal {
    fn type_info() -> MySqlTypeInfo {
        <String as Type<sqlx::MySql>>::type_info()
    }

    fn compatible(ty: &MySqlTypeInfo) -> bool {
        let name = ty.name().to_lowercase();
        name.contains("decimal") || name.contains("numeric")
    }
}

impl<'r> Decode<'r, sqlx::MySql> for RawDecimal {
    fn decode(value: MySqlValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as Decode<sqlx::MySql>>::decode(value)?;
        Ok(RawDecimal(s.to_string()))
    }
}

impl Type<sqlx::Postgres> for RawDecimal {
    fn type_info() -> PgTypeInfo {
        <String as Type<sqlx::Postgres>>::type_info()
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        let name = ty.name().to_lowercase();
        name.contains("numeric") || name.contains("decimal")
    }
}

impl<'r> Decode<'r, sqlx::Postgres> for RawDecimal {
    fn decode(value: PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        match value.format() {
            PgValueFormat::Text => Ok(RawDecimal(value.as_str()?.to_string())),
            PgValueFormat::Binary => pg_numeric_to_string(value.as_bytes()?).map(RawDecimal),
        }
    }
}

/// Render a binary PostgreSQL NUMERIC (base-10000 digits) as decimal text.
fn pg_numeric_to_string(buf: &[u8]) -> Result<String, sqlx::error::BoxDynError> {
    const SIGN_NEG: u16 = 0x4000;
    const SIGN_NAN: u16 = 0xC000;

    let read_u16 = |at: usize| -> Result<u16, sqlx::error::BoxDynError> {
        buf.get(at..at + 2)
            .map(|b| u16::from_be_bytes([b[0], b[1]]))
            .ok_or_else(|| "truncated NUMERIC value".into())
    };

    let ndigits = read_u16(0)? as usize;
    let weight = read_u16(2)? as i16 as i32;
    let sign = read_u16(4)?;
    let dscale = read_u16(6)? as usize;
    if sign == SIGN_NAN {
        return Ok("NaN".to_string());
    }
    let digits = (0..ndigits)
        .map(|i| read_u16(8 + i * 2))
        .collect::<Result<Vec<_>, _>>()?;

    let mut int_part = String::new();
    for pos in 0..=weight.max(0) {
        if pos > weight {
            break;
        }
        let d = digits.get(pos as usize).copied().unwrap_or(0);
        if int_part.is_empty() {
            int_part.push_str(&d.to_string());
        } else {
            int_part.push_str(&format!("{:04}", d));
        }
    }
    if int_part.is_empty() || weight < 0 {
        int_part = "0".to_string();
    }

    let mut frac_part = String::new();
    if dscale > 0 {
        let first_frac = weight + 1;
        let mut pos = first_frac;
        while frac_part.len() < dscale {
            let d = if pos < 0 {
                0
            } else {
                digits.get(pos as usize).copied().unwrap_or(0)
            };
            frac_part.push_str(&format!("{:04}", d));
            pos += 1;
        }
        frac_part.truncate(dscale);
    }

    let mut out = String::new();
    if sign == SIGN_NEG {
        out.push('-');
    }
    out.push_str(&int_part);
    if !frac_part.is_empty() {
        out.push('.');
        out.push_str(&frac_part);
    }
    Ok(out)
}

// =============================================================================
// Row Abstraction
// =============================================================================

/// A backend row that can be turned into a [`Record`].
pub trait RecordRow {
    /// Column names in result order.
    fn column_names(&self) -> DbResult<Vec<String>>;

    /// Decode one cell. `None` means SQL NULL.
    fn cell(&self, idx: usize) -> DbResult<Option<Value>>;
}

/// Row-count cap applied while materializing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowLimit {
    Unlimited,
    Max(usize),
}

impl RowLimit {
    /// Build from a requested maximum and a limit flag. A non-positive
    /// maximum with limiting enabled caps at one row.
    pub fn new(max_rows: i64, limit: bool) -> Self {
        if !limit {
            return RowLimit::Unlimited;
        }
        RowLimit::Max(usize::try_from(max_rows).ok().filter(|n| *n > 0).unwrap_or(1))
    }

    fn reached(&self, count: usize) -> bool {
        match self {
            RowLimit::Unlimited => false,
            RowLimit::Max(max) => count >= *max,
        }
    }
}

/// Convert one row using column names read once for the whole result.
pub fn materialize_row<R: RecordRow>(row: &R, columns: &[String]) -> DbResult<Record> {
    let mut record = Record::with_capacity(columns.len());
    for (idx, name) in columns.iter().enumerate() {
        if let Some(value) = row.cell(idx)? {
            record.insert(name.clone(), value);
        }
    }
    Ok(record)
}

/// Drain a row stream into records, honoring `limit`.
///
/// Once the cap is reached no further rows are pulled from the stream.
pub async fn collect_records<S, R, E>(rows: S, limit: RowLimit) -> DbResult<Vec<Record>>
where
    S: Stream<Item = Result<R, E>>,
    R: RecordRow,
    E: Into<DbError>,
{
    let mut rows = std::pin::pin!(rows);
    let mut columns: Option<Vec<String>> = None;
    let mut records = Vec::new();

    while !limit.reached(records.len()) {
        let Some(row) = rows.next().await else {
            break;
        };
        let row = row.map_err(Into::into)?;
        if columns.is_none() {
            columns = Some(row.column_names()?);
        }
        let names = columns.as_deref().unwrap_or_default();
        records.push(materialize_row(&row, names)?);
    }

    debug!(rows = records.len(), ?limit, "Materialized result set");
    Ok(records)
}

fn decode_error<R: Row>(row: &R, idx: usize, err: impl std::fmt::Display) -> DbError {
    let column = row
        .columns()
        .get(idx)
        .map(|c| c.name().to_string())
        .unwrap_or_else(|| idx.to_string());
    DbError::row_decode(column, err.to_string())
}

fn sqlx_column_names<R: Row>(row: &R) -> Vec<String> {
    row.columns().iter().map(|c| c.name().to_string()).collect()
}

/// Try each integer width in turn, returning the first that decodes. The
/// error of the last width is the one reported.
macro_rules! decode_int_cascade {
    ($row:expr, $idx:expr, [$($ty:ty),*], $last:ty) => {{
        $(
            if let Ok(v) = $row.try_get::<$ty, _>($idx) {
                return int_value(v);
            }
        )*
        match $row.try_get::<$last, _>($idx) {
            Ok(v) => int_value(v),
            Err(e) => Err(decode_error($row, $idx, e)),
        }
    }};
}

fn int_value<T>(v: T) -> DbResult<Option<Value>>
where
    T: TryInto<i64> + ToString + Copy,
{
    Ok(Some(match v.try_into() {
        Ok(i) => Value::Int(i),
        // unsigned values beyond i64 keep their digits
        Err(_) => Value::Text(v.to_string()),
    }))
}

impl RecordRow for PgRow {
    fn column_names(&self) -> DbResult<Vec<String>> {
        Ok(sqlx_column_names(self))
    }

    fn cell(&self, idx: usize) -> DbResult<Option<Value>> {
        if self.try_get_raw(idx)?.is_null() {
            return Ok(None);
        }
        let type_name = self.column(idx).type_info().name();
        postgres::decode_column(self, idx, categorize_type(type_name, BackendKind::Postgres))
    }
}

impl RecordRow for MySqlRow {
    fn column_names(&self) -> DbResult<Vec<String>> {
        Ok(sqlx_column_names(self))
    }

    fn cell(&self, idx: usize) -> DbResult<Option<Value>> {
        if self.try_get_raw(idx)?.is_null() {
            return Ok(None);
        }
        let type_name = self.column(idx).type_info().name();
        mysql::decode_column(self, idx, categorize_type(type_name, BackendKind::MySql))
    }
}

impl RecordRow for SqliteRow {
    fn column_names(&self) -> DbResult<Vec<String>> {
        Ok(sqlx_column_names(self))
    }

    fn cell(&self, idx: usize) -> DbResult<Option<Value>> {
        let raw = self.try_get_raw(idx)?;
        if raw.is_null() {
            return Ok(None);
        }
        // Storage class of the value, not the declared column type.
        let storage = raw.type_info().name().to_string();
        let declared = self.column(idx).type_info().name().to_lowercase();
        sqlite::decode_column(self, idx, &storage, &declared)
    }
}

// =============================================================================
// Backend-Specific Decoders
// =============================================================================

mod postgres {
    use super::*;

    pub fn decode_column(
        row: &PgRow,
        idx: usize,
        category: TypeCategory,
    ) -> DbResult<Option<Value>> {
        let err = |e: sqlx::Error| decode_error(row, idx, e);
        let value = match category {
            TypeCategory::Integer => return decode_integer(row, idx),
            TypeCategory::Decimal => Value::Text(row.try_get::<RawDecimal, _>(idx).map_err(err)?.0),
            TypeCategory::Boolean => Value::Bool(row.try_get(idx).map_err(err)?),
            TypeCategory::Float => match row.try_get::<f64, _>(idx) {
                Ok(v) => Value::Float(v),
                Err(_) => Value::Float(row.try_get::<f32, _>(idx).map_err(err)? as f64),
            },
            TypeCategory::Binary => decode_binary_value(row.try_get(idx).map_err(err)?),
            TypeCategory::Json => {
                Value::Text(row.try_get::<serde_json::Value, _>(idx).map_err(err)?.to_string())
            }
            TypeCategory::Uuid => {
                Value::Text(row.try_get::<uuid::Uuid, _>(idx).map_err(err)?.to_string())
            }
            TypeCategory::Date => {
                Value::Text(row.try_get::<chrono::NaiveDate, _>(idx).map_err(err)?.to_string())
            }
            TypeCategory::Time => {
                Value::Text(row.try_get::<chrono::NaiveTime, _>(idx).map_err(err)?.to_string())
            }
            TypeCategory::DateTime => Value::Text(
                row.try_get::<chrono::NaiveDateTime, _>(idx)
                    .map_err(err)?
                    .to_string(),
            ),
            TypeCategory::DateTimeTz => Value::Text(
                row.try_get::<chrono::DateTime<chrono::Utc>, _>(idx)
                    .map_err(err)?
                    .to_rfc3339(),
            ),
            TypeCategory::Text | TypeCategory::Unknown => decode_untyped(row, idx)?,
        };
        Ok(Some(value))
    }

    fn decode_integer(row: &PgRow, idx: usize) -> DbResult<Option<Value>> {
        decode_int_cascade!(row, idx, [i64, i32, i16], i8)
    }

    /// Columns without a dedicated category: text first, then the structured
    /// types sqlx understands, then the raw value bytes.
    fn decode_untyped(row: &PgRow, idx: usize) -> DbResult<Value> {
        if let Ok(s) = row.try_get::<String, _>(idx) {
            return Ok(Value::Text(s));
        }
        if let Some(v) = decode_array(row, idx) {
            return Ok(v);
        }
        if let Ok(v) = row.try_get::<PgInterval, _>(idx) {
            return Ok(Value::Text(pg_interval_to_string(&v)));
        }
        if let Ok(v) = row.try_get::<Oid, _>(idx) {
            return Ok(Value::Int(i64::from(v.0)));
        }
        // the single-byte "char" type
        if let Ok(v) = row.try_get::<i8, _>(idx) {
            return Ok(Value::Text(char::from(v as u8).to_string()));
        }

        let raw = row.try_get_raw(idx).map_err(|e| decode_error(row, idx, e))?;
        let is_inet = matches!(raw.type_info().name(), "INET" | "CIDR");
        let bytes = raw.as_bytes().map_err(|e| decode_error(row, idx, e))?;
        if is_inet {
            if let Some(s) = pg_inet_to_string(bytes) {
                return Ok(Value::Text(s));
            }
        }
        // enum labels and extension text types arrive as their UTF-8 label
        Ok(decode_binary_value(bytes.to_vec()))
    }

    /// One-dimensional arrays of common element types, rendered the way
    /// Postgres prints them (`{1,2,NULL}`).
    fn decode_array(row: &PgRow, idx: usize) -> Option<Value> {
        macro_rules! try_array {
            ($($ty:ty => $render:expr),+ $(,)?) => {
                $(
                    if let Ok(items) = row.try_get::<Vec<Option<$ty>>, _>(idx) {
                        let render = $render;
                        return Some(Value::Text(pg_array_literal(
                            items.into_iter().map(|item| item.map(&render)),
                        )));
                    }
                )+
            };
        }

        try_array! {
            i64 => |v: i64| v.to_string(),
            i32 => |v: i32| v.to_string(),
            i16 => |v: i16| v.to_string(),
            f64 => |v: f64| v.to_string(),
            f32 => |v: f32| v.to_string(),
            bool => |v: bool| if v { "t".to_string() } else { "f".to_string() },
            String => |v: String| v,
            uuid::Uuid => |v: uuid::Uuid| v.to_string(),
            chrono::NaiveDate => |v: chrono::NaiveDate| v.to_string(),
            chrono::NaiveDateTime => |v: chrono::NaiveDateTime| v.to_string(),
            chrono::DateTime<chrono::Utc> => |v: chrono::DateTime<chrono::Utc>| v.to_rfc3339(),
        }
        None
    }
}

/// Render array elements as a Postgres array literal, quoting elements that
/// would otherwise be ambiguous.
fn pg_array_literal(items: impl Iterator<Item = Option<String>>) -> String {
    let elements: Vec<String> = items
        .map(|item| match item {
            None => "NULL".to_string(),
            Some(s) => {
                let needs_quotes = s.is_empty()
                    || s.eq_ignore_ascii_case("null")
                    || s.chars()
                        .any(|c| matches!(c, '{' | '}' | ',' | '"' | '\\') || c.is_whitespace());
                if needs_quotes {
                    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
                } else {
                    s
                }
            }
        })
        .collect();
    format!("{{{}}}", elements.join(","))
}

/// Render an interval in the server's default `postgres` output style, e.g.
/// `1 year 2 mons -3 days +04:05:06.5`.
fn pg_interval_to_string(interval: &PgInterval) -> String {
    let mut parts = Vec::new();
    let mut seen_negative = false;

    let fields = [
        (interval.months / 12, "year"),
        (interval.months % 12, "mon"),
        (interval.days, "day"),
    ];
    for (n, unit) in fields {
        if n == 0 {
            continue;
        }
        let prefix = if n > 0 && seen_negative { "+" } else { "" };
        seen_negative |= n < 0;
        let plural = if n == 1 { "" } else { "s" };
        parts.push(format!("{}{} {}{}", prefix, n, unit, plural));
    }

    let micros = interval.microseconds;
    if micros != 0 || parts.is_empty() {
        let sign = if micros < 0 {
            "-"
        } else if seen_negative {
            "+"
        } else {
            ""
        };
        let abs = micros.unsigned_abs();
        let secs = abs / 1_000_000;
        let mut time = format!(
            "{}{:02}:{:02}:{:02}",
            sign,
            secs / 3600,
            (secs / 60) % 60,
            secs % 60
        );
        let frac = abs % 1_000_000;
        if frac != 0 {
            time.push('.');
            time.push_str(format!("{:06}", frac).trim_end_matches('0'));
        }
        parts.push(time);
    }
    parts.join(" ")
}

/// Render a binary INET/CIDR value: family, bits, is_cidr, length, address.
fn pg_inet_to_string(buf: &[u8]) -> Option<String> {
    const PGSQL_AF_INET: u8 = 2;
    const PGSQL_AF_INET6: u8 = 3;

    let [family, bits, is_cidr, len, addr @ ..] = buf else {
        return None;
    };
    let (ip, max_bits): (IpAddr, u8) = match (*family, *len as usize, addr.len()) {
        (PGSQL_AF_INET, 4, 4) => (Ipv4Addr::from(<[u8; 4]>::try_from(addr).ok()?).into(), 32),
        (PGSQL_AF_INET6, 16, 16) => {
            (Ipv6Addr::from(<[u8; 16]>::try_from(addr).ok()?).into(), 128)
        }
        _ => return None,
    };
    Some(if *is_cidr != 0 || *bits != max_bits {
        format!("{}/{}", ip, bits)
    } else {
        ip.to_string()
    })
}

mod mysql {
    use super::*;

    pub fn decode_column(
        row: &MySqlRow,
        idx: usize,
        category: TypeCategory,
    ) -> DbResult<Option<Value>> {
        let err = |e: sqlx::Error| decode_error(row, idx, e);
        let value = match category {
            TypeCategory::Integer => return decode_integer(row, idx),
            TypeCategory::Decimal => Value::Text(row.try_get::<RawDecimal, _>(idx).map_err(err)?.0),
            TypeCategory::Boolean => Value::Bool(row.try_get(idx).map_err(err)?),
            TypeCategory::Float => match row.try_get::<f64, _>(idx) {
                Ok(v) => Value::Float(v),
                Err(_) => Value::Float(row.try_get::<f32, _>(idx).map_err(err)? as f64),
            },
            TypeCategory::Binary => decode_binary_value(row.try_get(idx).map_err(err)?),
            TypeCategory::Json => {
                Value::Text(row.try_get::<serde_json::Value, _>(idx).map_err(err)?.to_string())
            }
            TypeCategory::Date => {
                Value::Text(row.try_get::<chrono::NaiveDate, _>(idx).map_err(err)?.to_string())
            }
            TypeCategory::Time => {
                Value::Text(row.try_get::<chrono::NaiveTime, _>(idx).map_err(err)?.to_string())
            }
            TypeCategory::DateTime => Value::Text(
                row.try_get::<chrono::NaiveDateTime, _>(idx)
                    .map_err(err)?
                    .to_string(),
            ),
            TypeCategory::DateTimeTz => Value::Text(
                row.try_get::<chrono::DateTime<chrono::Utc>, _>(idx)
                    .map_err(err)?
                    .to_rfc3339(),
            ),
            TypeCategory::Uuid | TypeCategory::Text | TypeCategory::Unknown => {
                match row.try_get::<String, _>(idx) {
                    Ok(s) => Value::Text(s),
                    // binary collations report as bytes
                    Err(_) => decode_binary_value(row.try_get(idx).map_err(err)?),
                }
            }
        };
        Ok(Some(value))
    }

    fn decode_integer(row: &MySqlRow, idx: usize) -> DbResult<Option<Value>> {
        decode_int_cascade!(row, idx, [i64, i32, i16, i8, u64, u32, u16], u8)
    }
}

mod sqlite {
    use super::*;

    pub fn decode_column(
        row: &SqliteRow,
        idx: usize,
        storage: &str,
        declared: &str,
    ) -> DbResult<Option<Value>> {
        let err = |e: sqlx::Error| decode_error(row, idx, e);
        let value = match storage {
            "INTEGER" if declared == "boolean" || declared == "bool" => {
                Value::Bool(row.try_get(idx).map_err(err)?)
            }
            "INTEGER" => Value::Int(row.try_get(idx).map_err(err)?),
            "REAL" => Value::Float(row.try_get(idx).map_err(err)?),
            "BLOB" => decode_binary_value(row.try_get(idx).map_err(err)?),
            _ => match row.try_get::<String, _>(idx) {
                Ok(s) => Value::Text(s),
                Err(_) => decode_binary_value(row.try_get_unchecked(idx).map_err(err)?),
            },
        };
        Ok(Some(value))
    }
}
