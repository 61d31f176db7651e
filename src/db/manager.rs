use std::sync::Arc;
use tokio::sync::OnceCell;

use super::connection::{BackendConfig, Driver, DriverClass};
use super::diagnostics::{Diagnostics, FailureReport};
use super::driver::{Connection, ConnectionFactory};
use super::error::{DbError, Result};

/// Owns the single lazily-created connection of a facade
pub struct ConnectionManager {
    config: BackendConfig,
    factory: Arc<dyn ConnectionFactory>,
    diagnostics: Diagnostics,
    connection: OnceCell<Arc<Connection>>,
}

impl ConnectionManager {
    pub fn new(
        config: BackendConfig,
        factory: Arc<dyn ConnectionFactory>,
        diagnostics: Diagnostics,
    ) -> Self {
        Self {
            config,
            factory,
            diagnostics,
            connection: OnceCell::new(),
        }
    }

    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    /// Classify the configured driver without connecting
    pub fn driver_class(&self) -> Result<DriverClass> {
        Driver::parse(&self.config.driver).map(|driver| driver.class())
    }

    /// The cached connection, if one has been made
    pub fn cached(&self) -> Option<&Arc<Connection>> {
        self.connection.get()
    }

    /// Return the cached connection, creating it on first use.
    /// `operation` names the caller in failure reports.
    pub async fn get(&self, operation: &'static str) -> Result<Arc<Connection>> {
        if let Some(conn) = self.connection.get() {
            return Ok(conn.clone());
        }

        let driver = Driver::parse(&self.config.driver)?;
        let result = self
            .connection
            .get_or_try_init(|| async {
                tracing::debug!(
                    "Creating {} connection to {}",
                    driver.name(),
                    self.config.host
                );
                self.factory
                    .connect(driver, &self.config)
                    .await
                    .map(Arc::new)
            })
            .await;

        match result {
            Ok(conn) => Ok(conn.clone()),
            Err(error @ DbError::Connection(_)) => {
                Err(self.diagnostics.connection_failed(FailureReport {
                    location: concat!(file!(), ":", line!()),
                    driver: &self.config.driver,
                    function: Some(operation),
                    error: &error,
                }))
            }
            Err(error) => Err(error),
        }
    }
}
