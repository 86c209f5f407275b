//! Statement-type validation for write paths.
//!
//! A statement declared as an insert must mention `INSERT`; one declared as an
//! update or delete must mention `UPDATE` or `DELETE`. The check is a keyword
//! search over the uppercased text, so a keyword that only appears inside an
//! identifier or a string literal is still accepted.

use crate::error::{DbError, DbResult};
use crate::models::OperationClass;

/// Keywords accepted for each operation class.
fn accepted_keywords(class: OperationClass) -> &'static [&'static str] {
    match class {
        OperationClass::Insert => &["INSERT"],
        OperationClass::Update | OperationClass::Delete => &["UPDATE", "DELETE"],
    }
}

/// Check that `sql` matches the declared operation class.
pub fn validate_statement_kind(sql: &str, class: OperationClass) -> DbResult<()> {
    let upper = sql.to_uppercase();
    if accepted_keywords(class)
        .iter()
        .any(|keyword| upper.contains(keyword))
    {
        Ok(())
    } else {
        Err(DbError::kind_mismatch(class, sql.trim()))
    }
}

/// Validate every statement of a batch, stopping at the first mismatch.
pub fn validate_batch<S: AsRef<str>>(statements: &[S], class: OperationClass) -> DbResult<()> {
    statements
        .iter()
        .try_for_each(|sql| validate_statement_kind(sql.as_ref(), class))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_accepted_only_for_insert() {
        let sql = "INSERT INTO t(x) VALUES(:x)";
        assert!(validate_statement_kind(sql, OperationClass::Insert).is_ok());
        for class in [OperationClass::Update, OperationClass::Delete] {
            let err = validate_statement_kind(sql, class).unwrap_err();
            assert!(matches!(err, DbError::StatementKindMismatch { .. }));
        }
    }

    #[test]
    fn test_update_and_delete_are_interchangeable() {
        for sql in ["update t set x = 1", "DELETE FROM t WHERE id = :id"] {
            assert!(validate_statement_kind(sql, OperationClass::Update).is_ok());
            assert!(validate_statement_kind(sql, OperationClass::Delete).is_ok());
            assert!(validate_statement_kind(sql, OperationClass::Insert).is_err());
        }
    }

    #[test]
    fn test_select_rejected() {
        assert!(validate_statement_kind("SELECT * FROM t", OperationClass::Insert).is_err());
        assert!(validate_statement_kind("SELECT * FROM t", OperationClass::Update).is_err());
    }

    #[test]
    fn test_keyword_in_identifier_is_accepted() {
        // Known limitation of the keyword search.
        let sql = "SELECT last_update FROM audit";
        assert!(validate_statement_kind(sql, OperationClass::Update).is_ok());
    }

    #[test]
    fn test_batch_stops_at_first_mismatch() {
        let batch = ["INSERT INTO a VALUES (1)", "SELECT 1", "INSERT INTO b VALUES (2)"];
        let err = validate_batch(&batch, OperationClass::Insert).unwrap_err();
        assert!(err.to_string().contains("SELECT 1"));
        assert!(validate_batch(&batch[..1], OperationClass::Insert).is_ok());
    }
}
