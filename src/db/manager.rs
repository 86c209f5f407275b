//! Connection manager.
//!
//! Owns the configuration record, an optional override DSN and at most one open
//! [`DbHandle`]. All state sits behind an async mutex held for the whole
//! operation, so calls on one manager never interleave.
//!
//! Failure policy: any multi-step operation that fails rolls back and closes the
//! connection before reporting the error.

use crate::config::ManagerOptions;
use crate::db::dialect::{ConnectionTarget, Dialect, TABLE_EXISTS_ARG, TABLE_EXISTS_COLUMN};
use crate::db::pool::{DbHandle, DbTransaction, ensure_sqlite_file};
use crate::db::rewrite::{RewrittenQuery, rewrite};
use crate::db::types::{Record, RowLimit};
use crate::db::validator::validate_batch;
use crate::error::{DbError, DbResult};
use crate::models::{BackendKind, ConnectionRecord, OperationClass, QueryArg, QueryDescriptor, SqlValue};
use std::collections::HashMap;
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info, warn};

#[derive(Debug, Default)]
struct ManagerState {
    record: Option<ConnectionRecord>,
    url: Option<String>,
    handle: Option<DbHandle>,
    backup_script: Option<String>,
    queries: HashMap<String, String>,
}

impl ManagerState {
    /// Resolve the connection target. An override URL wins over the record.
    fn target(&self) -> DbResult<ConnectionTarget> {
        match (&self.url, &self.record) {
            (Some(url), record) => {
                ConnectionTarget::from_url(url, record.as_ref().map(|r| r.kind))
            }
            (None, Some(record)) => ConnectionTarget::from_record(record),
            (None, None) => Err(DbError::unsupported_backend("no connection configured")),
        }
    }

    async fn close_handle(&mut self) {
        if let Some(handle) = self.handle.take() {
            let kind = handle.kind();
            handle.close().await;
            info!(backend = %kind, "Connection closed");
        }
    }
}

/// Uniform entry point for executing statements against one configured
/// database.
#[derive(Debug, Default)]
pub struct ConnectionManager {
    options: ManagerOptions,
    state: Mutex<ManagerState>,
}

impl ConnectionManager {
    /// Create a manager for a validated record.
    pub fn new(record: ConnectionRecord) -> DbResult<Self> {
        let record = record.validate()?;
        Ok(Self {
            options: ManagerOptions::default(),
            state: Mutex::new(ManagerState {
                record: Some(record),
                ..ManagerState::default()
            }),
        })
    }

    /// Create a manager that connects through a native DSN. The backend kind
    /// is inferred from the scheme at connect time.
    pub fn from_url(url: impl Into<String>) -> Self {
        Self {
            options: ManagerOptions::default(),
            state: Mutex::new(ManagerState {
                url: non_blank(url.into()),
                ..ManagerState::default()
            }),
        }
    }

    /// Override DSN used instead of the one synthesized from the record.
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.state.get_mut().url = non_blank(url.into());
        self
    }

    pub fn with_options(mut self, options: ManagerOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &ManagerOptions {
        &self.options
    }

    /// Install a new record. Any open connection is closed.
    pub async fn configure(&self, record: ConnectionRecord) -> DbResult<()> {
        let record = record.validate()?;
        let mut state = self.state.lock().await;
        state.close_handle().await;
        info!(record = %record, "Connection record configured");
        state.record = Some(record);
        Ok(())
    }

    /// Set (or with a blank string, clear) the override DSN.
    pub async fn configure_url(&self, url: impl Into<String>) {
        let mut state = self.state.lock().await;
        state.close_handle().await;
        state.url = non_blank(url.into());
    }

    /// Forget the record and override DSN and close the connection.
    pub async fn reset(&self) {
        let mut state = self.state.lock().await;
        state.close_handle().await;
        state.record = None;
        state.url = None;
    }

    /// The resolved `(kind, driver, dsn)` the next connect would use.
    pub async fn connection_target(&self) -> DbResult<ConnectionTarget> {
        self.state.lock().await.target()
    }

    pub async fn is_connected(&self) -> bool {
        self.state.lock().await.handle.is_some()
    }

    /// Open a connection, or reuse the current one if it answers a ping.
    pub async fn connect(&self) -> DbResult<()> {
        let mut state = self.state.lock().await;
        self.ensure_connected(&mut state).await.map(|_| ())
    }

    /// Close the connection. Closing twice is a no-op.
    pub async fn close(&self) {
        self.state.lock().await.close_handle().await;
    }

    async fn ensure_connected<'s>(&self, state: &'s mut ManagerState) -> DbResult<&'s mut DbHandle> {
        let target = state.target()?;

        let healthy = match state.handle.as_mut() {
            Some(handle) => {
                match with_timeout("health check", self.options.connect_timeout(), handle.ping())
                    .await
                {
                    Ok(()) => true,
                    Err(e) => {
                        warn!(error = %e, connection = %target, "Health check failed, reconnecting");
                        false
                    }
                }
            }
            None => false,
        };

        if !healthy {
            state.close_handle().await;
            if target.kind == BackendKind::Sqlite {
                ensure_sqlite_file(&target.dsn).await?;
            }

            let start = Instant::now();
            let mut handle = with_timeout(
                "connect",
                self.options.connect_timeout(),
                DbHandle::open(&target, &self.options),
            )
            .await?;
            let version = handle.server_version().await;
            info!(
                connection = %target,
                version = ?version,
                elapsed_ms = start.elapsed().as_millis() as u64,
                "Connected"
            );
            state.handle = Some(handle);
        }

        state
            .handle
            .as_mut()
            .ok_or_else(|| DbError::internal("connection handle missing after connect"))
    }

    /// Close on failure, or on success unless the caller keeps it open.
    async fn settle<T>(state: &mut ManagerState, result: &DbResult<T>, keep_open: bool) {
        if let Err(e) = result {
            debug!(error = %e, "Operation failed, closing connection");
            state.close_handle().await;
        } else if !keep_open {
            state.close_handle().await;
        }
    }

    /// Rewrite (and when `class` is set, validate) every statement up front.
    fn prepare_batch(
        target: &ConnectionTarget,
        statements: &[QueryDescriptor],
        class: Option<OperationClass>,
    ) -> DbResult<Vec<RewrittenQuery>> {
        if let Some(class) = class {
            let templates: Vec<&str> = statements.iter().map(|d| d.template.as_str()).collect();
            validate_batch(&templates, class)?;
        }
        let dialect = target.dialect();
        statements
            .iter()
            .map(|descriptor| rewrite(&descriptor.template, &descriptor.args, dialect))
            .collect()
    }

    /// Run statements in one transaction. Rolls back on the first error.
    async fn run_batch(&self, handle: &mut DbHandle, queries: &[RewrittenQuery]) -> DbResult<u64> {
        let limit = self.options.statement_timeout();
        let mut tx = with_timeout("begin transaction", limit, handle.begin()).await?;

        let mut total = 0u64;
        for (index, query) in queries.iter().enumerate() {
            match with_timeout("statement execution", limit, tx.execute(query)).await {
                Ok(affected) => total += affected,
                Err(e) => {
                    warn!(statement = index, error = %e, "Statement failed, rolling back");
                    rollback_within(tx, limit).await;
                    return Err(e);
                }
            }
        }

        with_timeout("commit", limit, tx.commit()).await?;
        info!(statements = queries.len(), rows_affected = total, "Transaction committed");
        Ok(total)
    }

    async fn execute_batch(
        &self,
        statements: &[QueryDescriptor],
        class: Option<OperationClass>,
        keep_open: bool,
    ) -> DbResult<u64> {
        if statements.is_empty() {
            return Err(DbError::EmptyBatch);
        }
        let mut state = self.state.lock().await;
        let result: DbResult<u64> = async {
            let queries = Self::prepare_batch(&state.target()?, statements, class)?;
            let handle = self.ensure_connected(&mut state).await?;
            self.run_batch(handle, &queries).await
        }
        .await;
        Self::settle(&mut state, &result, keep_open).await;
        result
    }

    /// Execute statements atomically and return the total affected rows.
    pub async fn execute(&self, statements: &[QueryDescriptor], keep_open: bool) -> DbResult<u64> {
        self.execute_batch(statements, None, keep_open).await
    }

    /// Like [`execute`](Self::execute), but every statement must match `class`.
    /// A mismatch aborts the batch before anything is sent.
    pub async fn execute_validated(
        &self,
        statements: &[QueryDescriptor],
        class: OperationClass,
        keep_open: bool,
    ) -> DbResult<u64> {
        self.execute_batch(statements, Some(class), keep_open).await
    }

    /// Execute a single statement in its own transaction.
    pub async fn execute_one(&self, statement: &QueryDescriptor, keep_open: bool) -> DbResult<u64> {
        self.execute_batch(std::slice::from_ref(statement), None, keep_open)
            .await
    }

    /// Insert batch; the connection is closed afterwards.
    pub async fn insert(&self, statements: &[QueryDescriptor]) -> DbResult<u64> {
        self.execute_validated(statements, OperationClass::Insert, false)
            .await
    }

    /// Update/delete batch. Returns the affected-row total.
    pub async fn update_or_delete(&self, statements: &[QueryDescriptor]) -> DbResult<u64> {
        self.execute_validated(statements, OperationClass::Update, false)
            .await
    }

    /// Run a query and materialize its rows.
    ///
    /// With `limit` set at most `max_rows` records come back (`max_rows <= 0`
    /// counts as 1).
    pub async fn query(
        &self,
        descriptor: &QueryDescriptor,
        max_rows: i64,
        keep_open: bool,
        limit: bool,
    ) -> DbResult<Vec<Record>> {
        let row_limit = RowLimit::new(max_rows, limit);
        let mut state = self.state.lock().await;
        let result: DbResult<Vec<Record>> = async {
            let target = state.target()?;
            let query = rewrite(&descriptor.template, &descriptor.args, target.dialect())?;
            let handle = self.ensure_connected(&mut state).await?;
            let start = Instant::now();
            let records = with_timeout(
                "query execution",
                self.options.statement_timeout(),
                handle.fetch_records(&query, row_limit),
            )
            .await?;
            debug!(
                rows = records.len(),
                elapsed_ms = start.elapsed().as_millis() as u64,
                "Query completed"
            );
            Ok(records)
        }
        .await;
        Self::settle(&mut state, &result, keep_open).await;
        result
    }

    /// Execute SQL with positional parameters in the backend's own marker
    /// style. No rewriting and no validation; same transactional envelope.
    pub async fn exec_raw(
        &self,
        sql: impl Into<String>,
        params: Vec<SqlValue>,
        keep_open: bool,
    ) -> DbResult<u64> {
        let sql = sql.into();
        if sql.trim().is_empty() {
            return Err(DbError::malformed_query("Query is empty"));
        }
        let query = RewrittenQuery { sql, params };

        let mut state = self.state.lock().await;
        let result: DbResult<u64> = async {
            let handle = self.ensure_connected(&mut state).await?;
            self.run_batch(handle, std::slice::from_ref(&query)).await
        }
        .await;
        Self::settle(&mut state, &result, keep_open).await;
        result
    }

    /// `true` when `SELECT 1` returns a row. Errors are logged, not returned.
    pub async fn test_connectivity(&self) -> bool {
        match self.query(&QueryDescriptor::new("SELECT 1"), 1, false, true).await {
            Ok(records) => !records.is_empty(),
            Err(e) => {
                debug!(error = %e, "Connectivity test failed");
                false
            }
        }
    }

    /// Whether `table` exists, using the backend's catalog query.
    pub async fn table_exists(&self, table: &str) -> DbResult<bool> {
        let kind = self.connection_target().await?.kind;
        let lookup = QueryDescriptor::new(Dialect::of(kind).table_exists_query)
            .arg(TABLE_EXISTS_ARG, table);
        let records = self.query(&lookup, 1, false, true).await?;

        let count = records
            .first()
            .and_then(|record| {
                record
                    .iter()
                    .find(|(column, _)| column.eq_ignore_ascii_case(TABLE_EXISTS_COLUMN))
                    .and_then(|(_, value)| value.as_i64())
            })
            .unwrap_or(0);
        debug!(table = %table, count, "Table lookup");
        Ok(count > 0)
    }

    /// Store the bootstrap script run by [`exec_backup`](Self::exec_backup).
    pub async fn set_backup_script(&self, script: impl Into<String>) {
        let script = script.into();
        self.state.lock().await.backup_script = (!script.trim().is_empty()).then_some(script);
    }

    /// Run the bootstrap script verbatim in one transaction. The connection
    /// stays open on success.
    pub async fn exec_backup(&self) -> DbResult<()> {
        let mut state = self.state.lock().await;
        let script = state.backup_script.clone().ok_or(DbError::EmptyScript)?;

        let result: DbResult<()> = async {
            let limit = self.options.statement_timeout();
            let handle = self.ensure_connected(&mut state).await?;
            let mut tx = with_timeout("begin transaction", limit, handle.begin()).await?;
            if let Err(e) =
                with_timeout("backup script", limit, tx.execute_script(&script)).await
            {
                rollback_within(tx, limit).await;
                return Err(e);
            }
            with_timeout("commit", limit, tx.commit()).await?;
            info!(bytes = script.len(), "Backup script applied");
            Ok(())
        }
        .await;
        Self::settle(&mut state, &result, true).await;
        result
    }

    /// Register SQL under a lookup code.
    pub async fn register_query(&self, code: impl Into<String>, sql: impl Into<String>) {
        self.state.lock().await.queries.insert(code.into(), sql.into());
    }

    /// Build a descriptor from a registered query.
    pub async fn prepared(
        &self,
        code: &str,
        args: HashMap<String, QueryArg>,
    ) -> DbResult<QueryDescriptor> {
        let state = self.state.lock().await;
        let template = state
            .queries
            .get(code)
            .ok_or_else(|| DbError::malformed_query(format!("No query registered as '{}'", code)))?;
        Ok(QueryDescriptor::with_args(template.clone(), args))
    }
}

fn non_blank(value: String) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Bound `fut` by `limit`, reporting expiry as [`DbError::Timeout`].
async fn with_timeout<T, F>(operation: &str, limit: Duration, fut: F) -> DbResult<T>
where
    F: Future<Output = DbResult<T>>,
{
    match timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(DbError::timeout(operation, limit.as_secs())),
    }
}

/// Roll back, giving up after `limit`. A rollback that fails or expires is
/// logged; the caller reports the error that triggered it.
async fn rollback_within(tx: DbTransaction<'_>, limit: Duration) {
    if let Err(e) = with_timeout("rollback", limit, tx.rollback()).await {
        warn!(error = %e, "Rollback failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::types::Value;

    fn sqlite_manager(dir: &tempfile::TempDir) -> ConnectionManager {
        let path = dir.path().join("unit.db");
        ConnectionManager::new(ConnectionRecord::sqlite(path.display().to_string())).unwrap()
    }

    #[tokio::test]
    async fn test_unconfigured_manager() {
        let manager = ConnectionManager::default();
        assert!(matches!(
            manager.connect().await.unwrap_err(),
            DbError::UnsupportedBackend { .. }
        ));
        assert!(!manager.test_connectivity().await);
        assert!(!manager.is_connected().await);
    }

    #[tokio::test]
    async fn test_unknown_url_scheme() {
        let manager = ConnectionManager::from_url("oracle://u:p@host/db");
        let err = manager.connection_target().await.unwrap_err();
        assert!(matches!(err, DbError::UnsupportedBackend { .. }));
        assert!(!err.to_string().contains(":p@"));
    }

    #[tokio::test]
    async fn test_url_overrides_record() {
        let record = ConnectionRecord::postgres("db", 5432, "app", "secret", "shop");
        let manager = ConnectionManager::new(record).unwrap();
        assert!(manager.connection_target().await.unwrap().dsn.starts_with("postgres://"));

        manager.configure_url("postgres://other@elsewhere/db").await;
        let target = manager.connection_target().await.unwrap();
        assert_eq!(target.dsn, "postgres://other@elsewhere/db");

        manager.configure_url("  ").await;
        assert!(manager.connection_target().await.unwrap().dsn.contains("shop"));

        manager.reset().await;
        assert!(manager.connection_target().await.is_err());
    }

    #[tokio::test]
    async fn test_configure_rejects_invalid_record() {
        let manager = ConnectionManager::default();
        let err = manager
            .configure(ConnectionRecord::mysql("", 3306, "u", "p", "db"))
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::InvalidConfiguration { .. }));
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let dir = tempfile::tempdir().unwrap();
        let manager = sqlite_manager(&dir);
        assert!(matches!(manager.execute(&[], false).await, Err(DbError::EmptyBatch)));
        assert!(matches!(manager.insert(&[]).await, Err(DbError::EmptyBatch)));
    }

    #[tokio::test]
    async fn test_empty_backup_script() {
        let dir = tempfile::tempdir().unwrap();
        let manager = sqlite_manager(&dir);
        assert!(matches!(manager.exec_backup().await, Err(DbError::EmptyScript)));
        manager.set_backup_script("   ").await;
        assert!(matches!(manager.exec_backup().await, Err(DbError::EmptyScript)));
    }

    #[tokio::test]
    async fn test_empty_raw_sql() {
        let manager = ConnectionManager::default();
        let err = manager.exec_raw(" ", vec![], false).await.unwrap_err();
        assert!(matches!(err, DbError::MalformedQuery { .. }));
    }

    #[tokio::test]
    async fn test_named_queries() {
        let manager = ConnectionManager::default();
        manager
            .register_query("by_id", "SELECT * FROM t WHERE id = :id")
            .await;

        let mut args = HashMap::new();
        args.insert("id".to_string(), QueryArg::from(7));
        let descriptor = manager.prepared("by_id", args).await.unwrap();
        assert_eq!(descriptor.template, "SELECT * FROM t WHERE id = :id");
        assert_eq!(descriptor.args.len(), 1);

        let err = manager.prepared("missing", HashMap::new()).await.unwrap_err();
        assert!(matches!(err, DbError::MalformedQuery { .. }));
    }

    #[tokio::test]
    async fn test_sqlite_keep_open_and_close() {
        let dir = tempfile::tempdir().unwrap();
        let manager = sqlite_manager(&dir);

        manager
            .exec_raw("CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT)", vec![], true)
            .await
            .unwrap();
        assert!(manager.is_connected().await);

        let affected = manager
            .execute_one(
                &QueryDescriptor::new("INSERT INTO t (name) VALUES (:name)").arg("name", "a"),
                false,
            )
            .await
            .unwrap();
        assert_eq!(affected, 1);
        assert!(!manager.is_connected().await);

        let rows = manager
            .query(&QueryDescriptor::new("SELECT name FROM t"), 0, false, false)
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("name"), Some(&Value::Text("a".to_string())));

        manager.close().await;
        manager.close().await;
    }

    #[tokio::test]
    async fn test_failed_query_closes_connection() {
        let dir = tempfile::tempdir().unwrap();
        let manager = sqlite_manager(&dir);
        manager.connect().await.unwrap();
        assert!(manager.is_connected().await);

        let result = manager
            .query(&QueryDescriptor::new("SELECT * FROM missing_table"), 1, true, true)
            .await;
        assert!(result.is_err());
        assert!(!manager.is_connected().await);
    }

    #[tokio::test]
    async fn test_with_timeout_expires() {
        let result: DbResult<()> = with_timeout("sleep", Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(DbError::Timeout { .. })));
    }
}
