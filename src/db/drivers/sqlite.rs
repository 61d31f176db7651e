//! SQLite driver implementation

use async_trait::async_trait;
use rusqlite::types::{Value as SqliteValue, ValueRef};
use rusqlite::params_from_iter;
use serde_json::Value;
use std::any::Any;
use std::path::Path;
use std::sync::{Arc, Mutex};

use super::encode_binary;
use crate::db::connection::{BackendConfig, Dialect};
use crate::db::driver::SqlConnection;
use crate::db::error::{DbError, Result};
use crate::db::query::CompiledQuery;
use crate::db::transaction::TransactionState;
use crate::db::value::{InsertId, Record, Row};

/// SQLite database opened from the configured database name, which is a
/// file path or `:memory:`. Host, port and credentials are ignored.
pub struct SqliteConnection {
    conn: Arc<Mutex<rusqlite::Connection>>,
}

impl SqliteConnection {
    pub async fn connect(config: &BackendConfig) -> Result<Self> {
        let path = if config.database.is_empty() {
            ":memory:".to_string()
        } else {
            config.database.clone()
        };
        if path != ":memory:" {
            // Check if parent directory exists for file paths
            if let Some(parent) = Path::new(&path).parent() {
                if !parent.as_os_str().is_empty() && !parent.exists() {
                    return Err(DbError::Configuration(format!(
                        "Parent directory does not exist: {}",
                        parent.display()
                    )));
                }
            }
        }

        // SQLite is synchronous, so we run it in a blocking task
        let conn = tokio::task::spawn_blocking(move || rusqlite::Connection::open(&path))
            .await
            .map_err(DbError::connection)?
            .map_err(DbError::connection)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Native connection handle
    pub fn handle(&self) -> Arc<Mutex<rusqlite::Connection>> {
        self.conn.clone()
    }

    async fn run<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&rusqlite::Connection) -> rusqlite::Result<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|_| DbError::Execution("SQLite connection lock poisoned".into()))?;
            f(&guard).map_err(DbError::execution)
        })
        .await
        .map_err(DbError::execution)?
    }
}

#[async_trait]
impl SqlConnection for SqliteConnection {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    async fn fetch(&self, query: &CompiledQuery) -> Result<Vec<Row>> {
        let sql = query.sql.clone();
        let values: Vec<SqliteValue> = query.values.iter().map(to_sqlite_value).collect();
        self.run(move |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
            let mut rows = stmt.query(params_from_iter(values))?;
            let mut records = Vec::new();
            while let Some(row) = rows.next()? {
                let mut record = Record::new();
                for (i, name) in names.iter().enumerate() {
                    record.insert(name.clone(), from_sqlite_value(row.get_ref(i)?));
                }
                records.push(record);
            }
            Ok(records)
        })
        .await
    }

    async fn execute(&self, query: &CompiledQuery) -> Result<u64> {
        let sql = query.sql.clone();
        let values: Vec<SqliteValue> = query.values.iter().map(to_sqlite_value).collect();
        self.run(move |conn| conn.execute(&sql, params_from_iter(values)))
            .await
            .map(|changes| changes as u64)
    }

    async fn last_insert_id(&self, _state: TransactionState) -> Result<InsertId> {
        let id = self.run(|conn| Ok(conn.last_insert_rowid())).await?;
        Ok((id != 0).then(|| id.to_string()))
    }

    async fn batch_execute(&self, sql: &str) -> Result<()> {
        let sql = sql.to_string();
        self.run(move |conn| conn.execute_batch(&sql)).await
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn to_sqlite_value(value: &Value) -> SqliteValue {
    match value {
        Value::Null => SqliteValue::Null,
        Value::Bool(b) => SqliteValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqliteValue::Integer(i),
            None => SqliteValue::Real(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => SqliteValue::Text(s.clone()),
        other => SqliteValue::Text(other.to_string()),
    }
}

fn from_sqlite_value(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => Value::from(f),
        ValueRef::Text(text) => Value::String(String::from_utf8_lossy(text).into_owned()),
        ValueRef::Blob(bytes) => encode_binary(bytes),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::query::compile;
    use crate::db::value::Params;
    use serde_json::json;

    async fn memory() -> SqliteConnection {
        let config = BackendConfig::new("", ":memory:", "", "").with_driver("sqlite");
        SqliteConnection::connect(&config).await.unwrap()
    }

    fn plain(sql: &str) -> CompiledQuery {
        CompiledQuery {
            sql: sql.to_string(),
            values: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_native_types_are_preserved() {
        let conn = memory().await;
        conn.batch_execute("CREATE TABLE t (i INTEGER, r REAL, s TEXT, b BLOB, n TEXT)")
            .await
            .unwrap();
        conn.batch_execute("INSERT INTO t VALUES (42, 1.5, 'hi', x'0102', NULL)")
            .await
            .unwrap();

        let rows = conn.fetch(&plain("SELECT * FROM t")).await.unwrap();
        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!(row["i"], json!(42));
        assert_eq!(row["r"], json!(1.5));
        assert_eq!(row["s"], json!("hi"));
        assert_eq!(row["b"], json!("AQI="));
        assert_eq!(row["n"], Value::Null);
    }

    #[tokio::test]
    async fn test_execute_and_last_insert_id() {
        let conn = memory().await;
        conn.batch_execute("CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT)")
            .await
            .unwrap();
        assert_eq!(conn.last_insert_id(TransactionState::Idle).await.unwrap(), None);

        let insert = compile(
            Dialect::Sqlite,
            "INSERT INTO t (name) VALUES (:name)",
            &Params::named([("name", json!("a"))]),
        )
        .unwrap();
        assert_eq!(conn.execute(&insert).await.unwrap(), 1);
        let id = conn.last_insert_id(TransactionState::Idle).await.unwrap();
        assert_eq!(id.as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn test_missing_parent_directory() {
        let config = BackendConfig::new("", "/definitely/not/here/app.db", "", "");
        assert!(matches!(
            SqliteConnection::connect(&config).await,
            Err(DbError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn test_execution_errors_propagate() {
        let conn = memory().await;
        assert!(matches!(
            conn.fetch(&plain("SELECT * FROM missing")).await,
            Err(DbError::Execution(_))
        ));
    }
}
