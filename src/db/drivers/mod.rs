//! Database driver implementations
//! Each driver is conditionally compiled based on features

#[cfg(feature = "postgres")]
pub mod postgres;

#[cfg(feature = "mongodb")]
pub mod mongo;

#[cfg(feature = "redis")]
pub mod redis_driver;

#[cfg(feature = "mysql")]
pub mod mysql;

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "mssql")]
pub mod mssql;

/// Encode binary column data for JSON rows
#[allow(dead_code)]
pub(crate) fn encode_binary(bytes: &[u8]) -> serde_json::Value {
    use base64::Engine as _;
    serde_json::Value::String(base64::engine::general_purpose::STANDARD.encode(bytes))
}
