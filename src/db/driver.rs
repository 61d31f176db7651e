use async_trait::async_trait;
use std::any::Any;
use std::fmt;

use super::connection::{BackendConfig, Dialect, Driver, DriverClass};
use super::error::{DbError, Result};
use super::query::{CompiledQuery, FindSpec};
use super::transaction::TransactionState;
use super::value::{InsertId, Record, Row};

/// Native relational connection speaking one SQL dialect
#[async_trait]
pub trait SqlConnection: Send + Sync {
    fn dialect(&self) -> Dialect;

    /// Run a row-returning statement
    async fn fetch(&self, query: &CompiledQuery) -> Result<Vec<Row>>;

    /// Run a mutating statement and return the affected row count
    async fn execute(&self, query: &CompiledQuery) -> Result<u64>;

    /// Identifier generated by the last insert on this connection.
    /// Backends without the notion return `None`. `state` is the facade's
    /// transaction state, for backends whose lookup can abort a transaction.
    async fn last_insert_id(&self, _state: TransactionState) -> Result<InsertId> {
        Ok(None)
    }

    /// Run parameterless statements, e.g. transaction control
    async fn batch_execute(&self, sql: &str) -> Result<()>;

    fn as_any(&self) -> &dyn Any;
}

/// Native document store client with a selected database
#[async_trait]
pub trait DocumentConnection: Send + Sync {
    /// Insert one document and return its generated identifier as text
    async fn insert_one(&self, collection: &str, document: Record) -> Result<String>;

    async fn find(&self, collection: &str, spec: FindSpec) -> Result<Vec<Row>>;

    /// Returns the number of modified documents
    async fn update_many(&self, collection: &str, filter: Record, update: Record) -> Result<u64>;

    /// Returns the number of deleted documents
    async fn delete_many(&self, collection: &str, filter: Record) -> Result<u64>;

    fn as_any(&self) -> &dyn Any;
}

/// Native key-value connection. Only reachable as a raw handle.
pub trait KeyValueConnection: Send + Sync {
    fn as_any(&self) -> &dyn Any;
}

/// The connection a facade holds, tagged by capability class
pub enum Connection {
    Relational(Box<dyn SqlConnection>),
    Document(Box<dyn DocumentConnection>),
    KeyValue(Box<dyn KeyValueConnection>),
}

impl Connection {
    pub fn class(&self) -> DriverClass {
        match self {
            Connection::Relational(_) => DriverClass::Relational,
            Connection::Document(_) => DriverClass::Document,
            Connection::KeyValue(_) => DriverClass::KeyValue,
        }
    }

    pub fn as_sql(&self) -> Option<&dyn SqlConnection> {
        match self {
            Connection::Relational(conn) => Some(conn.as_ref()),
            _ => None,
        }
    }

    pub fn as_document(&self) -> Option<&dyn DocumentConnection> {
        match self {
            Connection::Document(conn) => Some(conn.as_ref()),
            _ => None,
        }
    }

    /// Reach the concrete driver type, e.g. `RedisConnection`, to use
    /// backend-specific operations directly
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        match self {
            Connection::Relational(conn) => conn.as_any().downcast_ref(),
            Connection::Document(conn) => conn.as_any().downcast_ref(),
            Connection::KeyValue(conn) => conn.as_any().downcast_ref(),
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Connection").field(&self.class()).finish()
    }
}

/// Builds native connections
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    async fn connect(&self, driver: Driver, config: &BackendConfig) -> Result<Connection>;
}

/// Factory backed by the compiled-in native drivers
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeFactory;

#[async_trait]
impl ConnectionFactory for NativeFactory {
    async fn connect(&self, driver: Driver, config: &BackendConfig) -> Result<Connection> {
        create_connection(driver, config).await
    }
}

/// Factory function - creates the right connection type based on driver
#[allow(unused_variables)]
pub async fn create_connection(driver: Driver, config: &BackendConfig) -> Result<Connection> {
    if !driver.is_available() {
        return Err(DbError::DriverNotAvailable(driver.feature_name()));
    }

    match driver {
        #[cfg(feature = "mysql")]
        Driver::MySql => Ok(Connection::Relational(Box::new(
            super::drivers::mysql::MySqlConnection::connect(config).await?,
        ))),

        #[cfg(feature = "postgres")]
        Driver::Postgres => Ok(Connection::Relational(Box::new(
            super::drivers::postgres::PostgresConnection::connect(config).await?,
        ))),

        #[cfg(feature = "sqlite")]
        Driver::Sqlite => Ok(Connection::Relational(Box::new(
            super::drivers::sqlite::SqliteConnection::connect(config).await?,
        ))),

        #[cfg(feature = "mssql")]
        Driver::SqlServer => Ok(Connection::Relational(Box::new(
            super::drivers::mssql::SqlServerConnection::connect(config).await?,
        ))),

        #[cfg(feature = "mongodb")]
        Driver::MongoDb => Ok(Connection::Document(Box::new(
            super::drivers::mongo::MongoConnection::connect(config).await?,
        ))),

        #[cfg(feature = "redis")]
        Driver::Redis => Ok(Connection::KeyValue(Box::new(
            super::drivers::redis_driver::RedisConnection::connect(config).await?,
        ))),

        // Fallback for when feature not compiled
        #[allow(unreachable_patterns)]
        _ => Err(DbError::DriverNotAvailable(driver.feature_name())),
    }
}
