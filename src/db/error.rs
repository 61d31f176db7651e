use thiserror::Error;

use super::connection::DriverClass;

/// Errors that can occur during database operations
#[derive(Error, Debug)]
pub enum DbError {
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Driver not available: {0} (not compiled)")]
    DriverNotAvailable(&'static str),
    #[error("Connection failed: {0}")]
    Connection(String),
    #[error("Operation '{operation}' is not implemented for the {class} driver class; use the raw connection handle instead")]
    Capability {
        operation: &'static str,
        class: DriverClass,
    },
    #[error("Constraint violated: {0}")]
    Constraint(String),
    #[error("Query failed: {0}")]
    Execution(String),
}

impl DbError {
    pub(crate) fn execution(err: impl std::fmt::Display) -> Self {
        DbError::Execution(err.to_string())
    }

    pub(crate) fn connection(err: impl std::fmt::Display) -> Self {
        DbError::Connection(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, DbError>;
