//! Redis driver implementation

use redis::aio::MultiplexedConnection;
use std::any::Any;

use crate::db::connection::{BackendConfig, Driver};
use crate::db::driver::KeyValueConnection;
use crate::db::error::{DbError, Result};

/// Key-value connection. Generic CRUD does not apply; callers use
/// [`RedisConnection::handle`] for native commands.
pub struct RedisConnection {
    conn: MultiplexedConnection,
}

impl RedisConnection {
    pub fn connection_url(config: &BackendConfig) -> String {
        let port = config.port_for(Driver::Redis).unwrap_or(6379);
        format!("redis://{}:{}/", config.host, port)
    }

    pub async fn connect(config: &BackendConfig) -> Result<Self> {
        let client = redis::Client::open(Self::connection_url(config).as_str())
            .map_err(|e| DbError::Configuration(e.to_string()))?;

        let mut conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(DbError::connection)?;

        if !config.password.is_empty() {
            let _: () = redis::cmd("AUTH")
                .arg(&config.password)
                .query_async(&mut conn)
                .await
                .map_err(|e| DbError::Connection(format!("authentication rejected: {}", e)))?;
        }

        Ok(Self { conn })
    }

    /// Native connection handle; clones share the same multiplexed connection
    pub fn handle(&self) -> MultiplexedConnection {
        self.conn.clone()
    }
}

impl KeyValueConnection for RedisConnection {
    fn as_any(&self) -> &dyn Any {
        self
    }
}
