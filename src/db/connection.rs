use serde::{Deserialize, Serialize};
use std::fmt;

use super::error::{DbError, Result};

/// Driver identifier used when the configuration does not name one
pub const DEFAULT_DRIVER: &str = "mysql";

/// Capability class a driver belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DriverClass {
    Relational,
    Document,
    KeyValue,
}

impl DriverClass {
    pub fn name(&self) -> &'static str {
        match self {
            DriverClass::Relational => "relational",
            DriverClass::Document => "document",
            DriverClass::KeyValue => "key-value",
        }
    }
}

impl fmt::Display for DriverClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// SQL dialects understood by the relational path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dialect {
    MySql,
    Postgres,
    Sqlite,
    SqlServer,
}

/// Supported database drivers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Driver {
    MySql,
    Postgres,
    Sqlite,
    SqlServer,
    MongoDb,
    Redis,
}

impl Driver {
    /// Classify a driver identifier. Unknown identifiers are a configuration
    /// error, never a silent default.
    pub fn parse(identifier: &str) -> Result<Self> {
        match normalize_driver(identifier).as_str() {
            "mysql" | "mariadb" => Ok(Driver::MySql),
            "pgsql" | "postgres" | "postgresql" => Ok(Driver::Postgres),
            "sqlite" | "sqlite3" => Ok(Driver::Sqlite),
            "sqlsrv" | "mssql" | "sqlserver" => Ok(Driver::SqlServer),
            "mongodb" | "mongo" => Ok(Driver::MongoDb),
            "redis" => Ok(Driver::Redis),
            other => Err(DbError::Configuration(format!(
                "unsupported database driver '{}'",
                other
            ))),
        }
    }

    pub fn class(&self) -> DriverClass {
        match self {
            Driver::MySql | Driver::Postgres | Driver::Sqlite | Driver::SqlServer => {
                DriverClass::Relational
            }
            Driver::MongoDb => DriverClass::Document,
            Driver::Redis => DriverClass::KeyValue,
        }
    }

    pub fn dialect(&self) -> Option<Dialect> {
        match self {
            Driver::MySql => Some(Dialect::MySql),
            Driver::Postgres => Some(Dialect::Postgres),
            Driver::Sqlite => Some(Dialect::Sqlite),
            Driver::SqlServer => Some(Dialect::SqlServer),
            Driver::MongoDb | Driver::Redis => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Driver::MySql => "MySQL",
            Driver::Postgres => "PostgreSQL",
            Driver::Sqlite => "SQLite",
            Driver::SqlServer => "SQL Server",
            Driver::MongoDb => "MongoDB",
            Driver::Redis => "Redis",
        }
    }

    /// Conventional port; SQLite has none
    pub fn default_port(&self) -> Option<u16> {
        match self {
            Driver::MySql => Some(3306),
            Driver::Postgres => Some(5432),
            Driver::Sqlite => None,
            Driver::SqlServer => Some(1433),
            Driver::MongoDb => Some(27017),
            Driver::Redis => Some(6379),
        }
    }

    /// Cargo feature that compiles this driver in
    pub fn feature_name(&self) -> &'static str {
        match self {
            Driver::MySql => "mysql",
            Driver::Postgres => "postgres",
            Driver::Sqlite => "sqlite",
            Driver::SqlServer => "mssql",
            Driver::MongoDb => "mongodb",
            Driver::Redis => "redis",
        }
    }

    pub fn is_available(&self) -> bool {
        match self {
            Driver::MySql => cfg!(feature = "mysql"),
            Driver::Postgres => cfg!(feature = "postgres"),
            Driver::Sqlite => cfg!(feature = "sqlite"),
            Driver::SqlServer => cfg!(feature = "mssql"),
            Driver::MongoDb => cfg!(feature = "mongodb"),
            Driver::Redis => cfg!(feature = "redis"),
        }
    }
}

/// Trim and lower-case a driver identifier
pub fn normalize_driver(identifier: &str) -> String {
    identifier.trim().to_lowercase()
}

/// Backend configuration. Immutable once handed to a facade.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub host: String,
    pub database: String,
    pub user: String,
    pub password: String,
    pub port: Option<u16>,
    pub driver: String,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            database: String::new(),
            user: String::new(),
            password: String::new(),
            port: None,
            driver: DEFAULT_DRIVER.to_string(),
        }
    }
}

impl BackendConfig {
    pub fn new(
        host: impl Into<String>,
        database: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            database: database.into(),
            user: user.into(),
            password: password.into(),
            ..Self::default()
        }
    }

    pub fn with_driver(mut self, driver: impl Into<String>) -> Self {
        self.driver = driver.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Copy with the driver identifier normalised; an empty identifier
    /// falls back to the default relational dialect.
    pub fn normalized(mut self) -> Self {
        self.driver = normalize_driver(&self.driver);
        if self.driver.is_empty() {
            self.driver = DEFAULT_DRIVER.to_string();
        }
        self
    }

    /// Configured port, or the driver's conventional one
    pub fn port_for(&self, driver: Driver) -> Option<u16> {
        self.port.or_else(|| driver.default_port())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_driver_from_identifier() {
        assert_eq!(Driver::parse("mysql").unwrap(), Driver::MySql);
        assert_eq!(Driver::parse("  PgSQL ").unwrap(), Driver::Postgres);
        assert_eq!(Driver::parse("SQLite3").unwrap(), Driver::Sqlite);
        assert_eq!(Driver::parse("sqlsrv").unwrap(), Driver::SqlServer);
        assert_eq!(Driver::parse("MongoDB").unwrap(), Driver::MongoDb);
        assert_eq!(Driver::parse("redis").unwrap(), Driver::Redis);
    }

    #[test]
    fn test_unknown_driver_is_configuration_error() {
        for id in ["", "oracle", "cassandra", "my sql"] {
            match Driver::parse(id) {
                Err(DbError::Configuration(msg)) => assert!(msg.contains("unsupported")),
                other => panic!("expected configuration error for {:?}, got {:?}", id, other),
            }
        }
    }

    #[test]
    fn test_driver_classes() {
        assert_eq!(Driver::MySql.class(), DriverClass::Relational);
        assert_eq!(Driver::SqlServer.class(), DriverClass::Relational);
        assert_eq!(Driver::MongoDb.class(), DriverClass::Document);
        assert_eq!(Driver::Redis.class(), DriverClass::KeyValue);
        assert_eq!(Driver::Redis.dialect(), None);
        assert_eq!(Driver::Sqlite.dialect(), Some(Dialect::Sqlite));
    }

    #[test]
    fn test_config_normalization() {
        let config = BackendConfig::new("db", "app", "root", "")
            .with_driver("  MongoDB\n")
            .normalized();
        assert_eq!(config.driver, "mongodb");

        let config = BackendConfig::new("db", "app", "root", "")
            .with_driver("   ")
            .normalized();
        assert_eq!(config.driver, DEFAULT_DRIVER);
    }

    #[test]
    fn test_port_defaults() {
        let config = BackendConfig::default();
        assert_eq!(config.port_for(Driver::Postgres), Some(5432));
        assert_eq!(config.port_for(Driver::Sqlite), None);
        assert_eq!(config.with_port(6380).port_for(Driver::Redis), Some(6380));
    }

    #[test]
    fn test_config_deserialize_defaults() {
        let config: BackendConfig =
            serde_json::from_str(r#"{"database": "shop", "user": "app"}"#).unwrap();
        assert_eq!(config.host, "localhost");
        assert_eq!(config.driver, DEFAULT_DRIVER);
        assert_eq!(config.port, None);
        assert_eq!(config.password, "");
    }
}
