//! Named-parameter rewriting.
//!
//! Turns a portable template such as
//! `SELECT * FROM t WHERE id IN (:ids) AND owner = :owner` into backend-correct
//! positional SQL plus an ordered parameter list, in two passes:
//!
//! 1. [`expand_named`] replaces each `:name` with `?` (or `?, ?, ...` for list
//!    arguments) and collects the bound values left to right.
//! 2. [`rebind`] replaces each `?` with the dialect's positional marker.
//!
//! Quoted literals, quoted identifiers and comments are copied untouched by
//! both passes. `::` (Postgres casts) and `:=` pass through verbatim.

use crate::db::dialect::{BindStyle, Dialect};
use crate::error::{DbError, DbResult};
use crate::models::{QueryArg, SqlValue};
use std::collections::HashMap;

/// Positional SQL ready for a driver, with its parameters in marker order.
#[derive(Debug, Clone, PartialEq)]
pub struct RewrittenQuery {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

impl RewrittenQuery {
    /// SQL with no parameters, passed through as-is.
    pub fn raw(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }
}

/// How a backslash inside a quoted literal is read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringEscapes {
    /// Only a doubled quote escapes. Postgres `E'...'` literals still honor
    /// backslashes.
    Standard,
    /// `\x` escapes the next byte inside quotes (MySQL's default mode).
    Backslash,
}

/// Expand named placeholders and rebind the result for `dialect`.
pub fn rewrite(
    template: &str,
    args: &HashMap<String, QueryArg>,
    dialect: &Dialect,
) -> DbResult<RewrittenQuery> {
    let (sql, params) = expand_named(template, args, dialect.string_escapes)?;
    let sql = rebind(&sql, dialect.bind_style, params.len(), dialect.string_escapes)?;
    Ok(RewrittenQuery { sql, params })
}

/// Replace every `:name` with `?` markers and collect the bound values.
pub fn expand_named(
    template: &str,
    args: &HashMap<String, QueryArg>,
    escapes: StringEscapes,
) -> DbResult<(String, Vec<SqlValue>)> {
    let bytes = template.as_bytes();
    let mut out = String::with_capacity(template.len());
    let mut params = Vec::new();
    let mut run = 0;
    let mut i = 0;

    while i < bytes.len() {
        if let Some(end) = skip_quoted(bytes, i, escapes) {
            i = end;
            continue;
        }
        if bytes[i] != b':' {
            i += 1;
            continue;
        }
        match bytes.get(i + 1) {
            Some(b':') | Some(b'=') => {
                i += 2;
                continue;
            }
            Some(&c) if is_name_byte(c) => {}
            _ => {
                i += 1;
                continue;
            }
        }

        out.push_str(&template[run..i]);
        let start = i + 1;
        let end = start
            + bytes[start..]
                .iter()
                .take_while(|&&b| is_name_byte(b))
                .count();
        let name = &template[start..end];

        let arg = args.get(name).ok_or_else(|| {
            DbError::malformed_query(format!("Missing argument for placeholder :{}", name))
        })?;
        match arg {
            QueryArg::Value(value) => {
                if is_sole_in_element(&out, &template[end..]) {
                    return Err(DbError::malformed_query(format!(
                        "Placeholder :{} inside IN (...) must be bound to a list",
                        name
                    )));
                }
                out.push('?');
                params.push(value.clone());
            }
            QueryArg::List(values) => {
                if values.is_empty() {
                    return Err(DbError::malformed_query(format!(
                        "List argument :{} is empty",
                        name
                    )));
                }
                out.push_str(&vec!["?"; values.len()].join(", "));
                params.extend(values.iter().cloned());
            }
        }

        i = end;
        run = end;
    }

    out.push_str(&template[run..]);
    Ok((out, params))
}

/// Replace each `?` outside literals with the marker for `style`.
///
/// `expected` is the number of bound parameters; a different marker count is
/// a malformed query.
pub fn rebind(
    sql: &str,
    style: BindStyle,
    expected: usize,
    escapes: StringEscapes,
) -> DbResult<String> {
    let bytes = sql.as_bytes();
    let mut out = String::with_capacity(sql.len() + expected * 2);
    let mut count = 0;
    let mut run = 0;
    let mut i = 0;

    while i < bytes.len() {
        if let Some(end) = skip_quoted(bytes, i, escapes) {
            i = end;
            continue;
        }
        if bytes[i] == b'?' {
            count += 1;
            out.push_str(&sql[run..i]);
            out.push_str(&style.marker(count));
            run = i + 1;
        }
        i += 1;
    }
    out.push_str(&sql[run..]);

    if count != expected {
        return Err(DbError::malformed_query(format!(
            "Statement has {} parameter markers but {} arguments",
            count, expected
        )));
    }
    Ok(out)
}

/// Wrap the `$n` markers listed in `casts` (1-based marker number to type
/// name) as `CAST($n AS type)`. Other markers are left alone.
pub fn cast_markers(sql: &str, casts: &HashMap<usize, String>) -> String {
    let bytes = sql.as_bytes();
    let mut out = String::with_capacity(sql.len() + casts.len() * 16);
    let mut run = 0;
    let mut i = 0;

    while i < bytes.len() {
        if let Some(end) = skip_quoted(bytes, i, StringEscapes::Standard) {
            i = end;
            continue;
        }
        let starts_marker = bytes[i] == b'$' && (i == 0 || !is_word_byte(bytes[i - 1]));
        if !starts_marker {
            i += 1;
            continue;
        }
        let end = i + 1 + bytes[i + 1..].iter().take_while(|b| b.is_ascii_digit()).count();
        let cast = sql[i + 1..end]
            .parse::<usize>()
            .ok()
            .and_then(|n| casts.get(&n));
        if let Some(type_name) = cast {
            out.push_str(&sql[run..i]);
            out.push_str(&format!("CAST({} AS {})", &sql[i..end], type_name));
            run = end;
        }
        i = end;
    }
    out.push_str(&sql[run..]);
    out
}

fn is_name_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'.'
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b >= 0x80
}

/// If a quoted literal, quoted identifier or comment starts at `i`, return the
/// index just past its end.
fn skip_quoted(bytes: &[u8], i: usize, escapes: StringEscapes) -> Option<usize> {
    match bytes[i] {
        quote @ (b'\'' | b'"' | b'`') => {
            let backslash = match escapes {
                StringEscapes::Backslash => quote != b'`',
                StringEscapes::Standard => quote == b'\'' && is_escape_string_prefix(bytes, i),
            };
            let mut j = i + 1;
            while j < bytes.len() {
                if backslash && bytes[j] == b'\\' {
                    j += 2;
                    continue;
                }
                if bytes[j] == quote {
                    // doubled quote escapes itself
                    if bytes.get(j + 1) == Some(&quote) {
                        j += 2;
                        continue;
                    }
                    return Some(j + 1);
                }
                j += 1;
            }
            Some(bytes.len())
        }
        b'-' if bytes.get(i + 1) == Some(&b'-') => Some(
            bytes[i..]
                .iter()
                .position(|&b| b == b'\n')
                .map_or(bytes.len(), |p| i + p + 1),
        ),
        b'/' if bytes.get(i + 1) == Some(&b'*') => Some(
            bytes[i + 2..]
                .windows(2)
                .position(|w| w == b"*/")
                .map_or(bytes.len(), |p| i + 2 + p + 2),
        ),
        _ => None,
    }
}

/// Whether the quote at `i` opens a Postgres `E'...'` escape string.
fn is_escape_string_prefix(bytes: &[u8], i: usize) -> bool {
    i >= 1
        && matches!(bytes[i - 1], b'e' | b'E')
        && (i == 1 || !is_word_byte(bytes[i - 2]))
}

/// Whether a placeholder sits alone inside `IN ( ... )`, given the SQL emitted
/// before it and the template text after it.
fn is_sole_in_element(before: &str, after: &str) -> bool {
    if !after.trim_start().starts_with(')') {
        return false;
    }
    let Some(head) = before.trim_end().strip_suffix('(') else {
        return false;
    };
    let head = head.trim_end().as_bytes();
    let n = head.len();
    n >= 2 && head[n - 2..].eq_ignore_ascii_case(b"in") && (n == 2 || !is_word_byte(head[n - 3]))
}
