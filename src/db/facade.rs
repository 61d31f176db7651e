//! The backend-agnostic CRUD and transaction surface.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use super::connection::{BackendConfig, DriverClass};
use super::diagnostics::{DiagnosticSink, Diagnostics, FailurePolicy, FileSink};
use super::driver::{Connection, ConnectionFactory, NativeFactory, SqlConnection};
use super::error::{DbError, Result};
use super::manager::ConnectionManager;
use super::query::{
    compile, require_conditions, require_data, returns_rows, DocumentQuery, SqlBuilder,
};
use super::transaction::{TransactionGuard, TransactionState};
use super::value::{InsertId, Params, QueryResult, Record, Row, SelectOptions};

/// Collaborators of a [`Database`]
#[derive(Clone)]
pub struct DatabaseOptions {
    pub factory: Arc<dyn ConnectionFactory>,
    pub sink: Arc<dyn DiagnosticSink>,
    pub on_connect_failure: FailurePolicy,
}

impl Default for DatabaseOptions {
    fn default() -> Self {
        Self {
            factory: Arc::new(NativeFactory),
            sink: Arc::new(FileSink::default()),
            on_connect_failure: FailurePolicy::default(),
        }
    }
}

impl DatabaseOptions {
    pub fn factory(mut self, factory: Arc<dyn ConnectionFactory>) -> Self {
        self.factory = factory;
        self
    }

    pub fn sink(mut self, sink: Arc<dyn DiagnosticSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Write failure reports to `path` instead of the default log file
    pub fn log_path(self, path: impl Into<PathBuf>) -> Self {
        self.sink(Arc::new(FileSink::new(path)))
    }

    pub fn on_connect_failure(mut self, policy: FailurePolicy) -> Self {
        self.on_connect_failure = policy;
        self
    }
}

/// One configured backend with at most one live connection.
///
/// The facade is meant for a single task at a time; use one instance per
/// worker rather than sharing it.
pub struct Database {
    manager: ConnectionManager,
    transaction: TransactionGuard,
}

impl Database {
    pub fn new(config: BackendConfig) -> Self {
        Self::with_options(config, DatabaseOptions::default())
    }

    pub fn with_factory(config: BackendConfig, factory: Arc<dyn ConnectionFactory>) -> Self {
        Self::with_options(config, DatabaseOptions::default().factory(factory))
    }

    pub fn with_options(config: BackendConfig, options: DatabaseOptions) -> Self {
        let diagnostics = Diagnostics::new(options.sink, options.on_connect_failure);
        Self {
            manager: ConnectionManager::new(config.normalized(), options.factory, diagnostics),
            transaction: TransactionGuard::default(),
        }
    }

    /// Normalised driver identifier
    pub fn driver(&self) -> &str {
        &self.manager.config().driver
    }

    pub fn config(&self) -> &BackendConfig {
        self.manager.config()
    }

    /// Raw connection, created on first use and cached afterwards
    pub async fn connection(&self) -> Result<Arc<Connection>> {
        self.manager.get("connection").await
    }

    pub fn transaction_state(&self) -> TransactionState {
        self.transaction.state()
    }

    pub fn in_transaction(&self) -> bool {
        self.transaction.state() == TransactionState::InTransaction
    }

    /// Insert one row or document. Returns the generated identifier, or
    /// `None` when the backend does not report one. On PostgreSQL this is the
    /// session's `lastval()`, and always `None` inside a transaction.
    pub async fn insert(&self, table: &str, data: &Record) -> Result<InsertId> {
        self.require_crud("insert")?;
        require_data("insert", table, data)?;
        let conn = self.manager.get("insert").await?;
        match conn.as_ref() {
            Connection::Relational(sql) => {
                let stmt = SqlBuilder::new(sql.dialect()).insert(table, data)?;
                let query = compile(sql.dialect(), &stmt.sql, &stmt.params)?;
                tracing::debug!(sql = %query.sql, "insert");
                sql.execute(&query).await?;
                sql.last_insert_id(self.transaction.state()).await
            }
            Connection::Document(docs) => {
                tracing::debug!(collection = table, "insert_one");
                docs.insert_one(table, data.clone()).await.map(Some)
            }
            Connection::KeyValue(_) => Err(unsupported("insert", DriverClass::KeyValue)),
        }
    }

    /// Rows matching every condition, with projection, ordering and paging
    pub async fn select(
        &self,
        table: &str,
        conditions: &Record,
        options: &SelectOptions,
    ) -> Result<Vec<Row>> {
        self.require_crud("select")?;
        let conn = self.manager.get("select").await?;
        match conn.as_ref() {
            Connection::Relational(sql) => {
                let stmt = SqlBuilder::new(sql.dialect()).select(table, conditions, options);
                let query = compile(sql.dialect(), &stmt.sql, &stmt.params)?;
                tracing::debug!(sql = %query.sql, "select");
                sql.fetch(&query).await
            }
            Connection::Document(docs) => {
                tracing::debug!(collection = table, "find");
                docs.find(table, DocumentQuery::find(conditions, options))
                    .await
            }
            Connection::KeyValue(_) => Err(unsupported("select", DriverClass::KeyValue)),
        }
    }

    /// Update matching rows; returns the affected (or modified) count.
    /// An empty condition mapping is rejected before connecting.
    pub async fn update(&self, table: &str, data: &Record, conditions: &Record) -> Result<u64> {
        self.require_crud("update")?;
        require_conditions("update", table, conditions)?;
        require_data("update", table, data)?;
        let conn = self.manager.get("update").await?;
        match conn.as_ref() {
            Connection::Relational(sql) => {
                let stmt = SqlBuilder::new(sql.dialect()).update(table, data, conditions)?;
                let query = compile(sql.dialect(), &stmt.sql, &stmt.params)?;
                tracing::debug!(sql = %query.sql, "update");
                sql.execute(&query).await
            }
            Connection::Document(docs) => {
                tracing::debug!(collection = table, "update_many");
                docs.update_many(
                    table,
                    DocumentQuery::filter(conditions),
                    DocumentQuery::update(data),
                )
                .await
            }
            Connection::KeyValue(_) => Err(unsupported("update", DriverClass::KeyValue)),
        }
    }

    /// Delete matching rows; returns the deleted count.
    /// An empty condition mapping is rejected before connecting.
    pub async fn delete(&self, table: &str, conditions: &Record) -> Result<u64> {
        self.require_crud("delete")?;
        require_conditions("delete", table, conditions)?;
        let conn = self.manager.get("delete").await?;
        match conn.as_ref() {
            Connection::Relational(sql) => {
                let stmt = SqlBuilder::new(sql.dialect()).delete(table, conditions)?;
                let query = compile(sql.dialect(), &stmt.sql, &stmt.params)?;
                tracing::debug!(sql = %query.sql, "delete");
                sql.execute(&query).await
            }
            Connection::Document(docs) => {
                tracing::debug!(collection = table, "delete_many");
                docs.delete_many(table, DocumentQuery::filter(conditions))
                    .await
            }
            Connection::KeyValue(_) => Err(unsupported("delete", DriverClass::KeyValue)),
        }
    }

    /// Run literal SQL with positional (`?`) or named (`:name`) parameters.
    /// Row-returning statements yield rows, everything else an affected count.
    pub async fn raw_query(&self, sql: &str, params: impl Into<Params>) -> Result<QueryResult> {
        let params = params.into();
        let conn = self.relational("raw_query").await?;
        let native = conn_sql(&conn, "raw_query")?;
        let query = compile(native.dialect(), sql, &params)?;
        tracing::debug!(sql = %query.sql, "raw_query");
        if returns_rows(sql) {
            native.fetch(&query).await.map(QueryResult::Rows)
        } else {
            native.execute(&query).await.map(QueryResult::Affected)
        }
    }

    /// Start a transaction unless one is already open
    pub async fn begin(&mut self) -> Result<()> {
        let conn = self.relational("begin").await?;
        self.transaction.begin(conn_sql(&conn, "begin")?).await?;
        Ok(())
    }

    /// Commit the open transaction; no-op when idle
    pub async fn commit(&mut self) -> Result<()> {
        let conn = self.relational("commit").await?;
        self.transaction.commit(conn_sql(&conn, "commit")?).await?;
        Ok(())
    }

    /// Roll back the open transaction; no-op when idle
    pub async fn rollback(&mut self) -> Result<()> {
        let conn = self.relational("rollback").await?;
        self.transaction.rollback(conn_sql(&conn, "rollback")?).await?;
        Ok(())
    }

    /// Generic CRUD is unavailable on key-value backends
    fn require_crud(&self, operation: &'static str) -> Result<()> {
        match self.manager.driver_class()? {
            DriverClass::KeyValue => Err(unsupported(operation, DriverClass::KeyValue)),
            _ => Ok(()),
        }
    }

    /// Connection for relational-only operations; other classes fail
    /// before any connection is made
    async fn relational(&self, operation: &'static str) -> Result<Arc<Connection>> {
        match self.manager.driver_class()? {
            DriverClass::Relational => self.manager.get(operation).await,
            class => Err(unsupported(operation, class)),
        }
    }
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("driver", &self.driver())
            .field("host", &self.config().host)
            .field("connected", &self.manager.cached().is_some())
            .field("transaction", &self.transaction.state())
            .finish()
    }
}

fn conn_sql<'a>(conn: &'a Connection, operation: &'static str) -> Result<&'a dyn SqlConnection> {
    conn.as_sql()
        .ok_or_else(|| unsupported(operation, conn.class()))
}

fn unsupported(operation: &'static str, class: DriverClass) -> DbError {
    DbError::Capability { operation, class }
}
