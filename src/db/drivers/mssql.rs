//! SQL Server driver implementation

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use serde_json::Value;
use std::any::Any;
use tiberius::{Client, ColumnData, Config, FromSql, Query};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};

use super::encode_binary;
use crate::db::connection::{BackendConfig, Dialect, Driver};
use crate::db::driver::SqlConnection;
use crate::db::error::{DbError, Result};
use crate::db::query::CompiledQuery;
use crate::db::transaction::TransactionState;
use crate::db::value::{InsertId, Record, Row};

type SqlServerClient = Client<Compat<TcpStream>>;

pub struct SqlServerConnection {
    client: Mutex<SqlServerClient>,
}

impl SqlServerConnection {
    /// ADO.NET style connection string
    pub fn connection_string(config: &BackendConfig) -> String {
        let port = config.port_for(Driver::SqlServer).unwrap_or(1433);
        let mut parts = vec![format!("server=tcp:{},{}", config.host, port)];
        if !config.database.is_empty() {
            parts.push(format!("database={}", quote(&config.database)));
        }
        if !config.user.is_empty() {
            parts.push(format!("user id={}", quote(&config.user)));
        }
        if !config.password.is_empty() {
            parts.push(format!("password={}", quote(&config.password)));
        }
        parts.push("TrustServerCertificate=true".to_string());
        parts.join(";")
    }

    pub async fn connect(config: &BackendConfig) -> Result<Self> {
        let ado = Self::connection_string(config);
        let tds_config =
            Config::from_ado_string(&ado).map_err(|e| DbError::Configuration(e.to_string()))?;

        let tcp = TcpStream::connect(tds_config.get_addr())
            .await
            .map_err(DbError::connection)?;
        tcp.set_nodelay(true).map_err(DbError::connection)?;

        let client = Client::connect(tds_config, tcp.compat_write())
            .await
            .map_err(DbError::connection)?;

        Ok(Self {
            client: Mutex::new(client),
        })
    }

    /// Native client handle
    pub fn handle(&self) -> &Mutex<SqlServerClient> {
        &self.client
    }
}

/// Quote values containing separators; embedded quotes are doubled
fn quote(value: &str) -> String {
    if value.contains([';', '=', '\'', '"']) || value.trim() != value {
        format!("'{}'", value.replace('\'', "''"))
    } else {
        value.to_string()
    }
}

fn build_query(query: &CompiledQuery) -> Query<'_> {
    let mut native = Query::new(query.sql.as_str());
    for value in &query.values {
        match value {
            Value::Null => native.bind(Option::<String>::None),
            Value::Bool(b) => native.bind(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => native.bind(i),
                None => native.bind(n.as_f64().unwrap_or_default()),
            },
            Value::String(s) => native.bind(s.as_str()),
            other => native.bind(other.to_string()),
        }
    }
    native
}

#[async_trait]
impl SqlConnection for SqlServerConnection {
    fn dialect(&self) -> Dialect {
        Dialect::SqlServer
    }

    async fn fetch(&self, query: &CompiledQuery) -> Result<Vec<Row>> {
        let mut client = self.client.lock().await;
        let rows = build_query(query)
            .query(&mut *client)
            .await
            .map_err(DbError::execution)?
            .into_first_result()
            .await
            .map_err(DbError::execution)?;
        Ok(rows.into_iter().map(row_to_record).collect())
    }

    async fn execute(&self, query: &CompiledQuery) -> Result<u64> {
        let mut client = self.client.lock().await;
        let result = build_query(query)
            .execute(&mut *client)
            .await
            .map_err(DbError::execution)?;
        Ok(result.total())
    }

    /// Session-wide identity; parameterised inserts run in their own scope,
    /// so SCOPE_IDENTITY() would not see them.
    async fn last_insert_id(&self, _state: TransactionState) -> Result<InsertId> {
        let mut client = self.client.lock().await;
        let row = client
            .query("SELECT CAST(@@IDENTITY AS BIGINT) AS id", &[])
            .await
            .map_err(DbError::execution)?
            .into_row()
            .await
            .map_err(DbError::execution)?;
        Ok(row
            .and_then(|r| r.get::<i64, _>(0))
            .map(|id| id.to_string()))
    }

    async fn batch_execute(&self, sql: &str) -> Result<()> {
        let mut client = self.client.lock().await;
        client
            .simple_query(sql)
            .await
            .map_err(DbError::execution)?
            .into_results()
            .await
            .map_err(DbError::execution)?;
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn row_to_record(row: tiberius::Row) -> Record {
    let names: Vec<String> = row.columns().iter().map(|c| c.name().to_string()).collect();
    names
        .into_iter()
        .zip(row)
        .map(|(name, data)| (name, from_column_data(&data)))
        .collect()
}

fn text<T: ToString>(value: Option<T>) -> Value {
    value.map_or(Value::Null, |v| Value::String(v.to_string()))
}

fn from_column_data(data: &ColumnData<'static>) -> Value {
    let value = match data {
        ColumnData::U8(v) => v.map(Value::from),
        ColumnData::I16(v) => v.map(Value::from),
        ColumnData::I32(v) => v.map(Value::from),
        ColumnData::I64(v) => v.map(Value::from),
        ColumnData::F32(v) => v.map(Value::from),
        ColumnData::F64(v) => v.map(Value::from),
        ColumnData::Bit(v) => v.map(Value::from),
        ColumnData::String(v) => v.as_ref().map(|s| Value::String(s.to_string())),
        ColumnData::Guid(v) => Some(text(v.as_ref())),
        ColumnData::Binary(v) => v.as_ref().map(|b| encode_binary(b)),
        ColumnData::Numeric(v) => Some(text(v.as_ref())),
        ColumnData::DateTime(_) | ColumnData::SmallDateTime(_) | ColumnData::DateTime2(_) => {
            Some(text(NaiveDateTime::from_sql(data).ok().flatten()))
        }
        ColumnData::Date(_) => Some(text(NaiveDate::from_sql(data).ok().flatten())),
        ColumnData::Time(_) => Some(text(NaiveTime::from_sql(data).ok().flatten())),
        ColumnData::DateTimeOffset(_) => Some(
            DateTime::<FixedOffset>::from_sql(data)
                .ok()
                .flatten()
                .map_or(Value::Null, |t| Value::String(t.to_rfc3339())),
        ),
        #[allow(unreachable_patterns)]
        _ => None,
    };
    value.unwrap_or(Value::Null)
}
