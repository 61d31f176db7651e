//! polydb - one CRUD and transaction surface over relational, document and
//! key-value backends.
//!
//! A [`Database`] is built from a [`BackendConfig`]. The configured driver
//! decides the capability class; the connection is made on first use and
//! reused for the lifetime of the facade.
//!
//! ```no_run
//! use polydb::{record, BackendConfig, Database, SelectOptions};
//! use serde_json::json;
//!
//! # async fn run() -> polydb::Result<()> {
//! let db = Database::new(BackendConfig::new("localhost", "shop", "app", "secret"));
//! let id = db.insert("users", &record([("name", json!("ada"))])).await?;
//! let rows = db
//!     .select("users", &record([("name", json!("ada"))]), &SelectOptions::new().limit(1))
//!     .await?;
//! # let _ = (id, rows);
//! # Ok(())
//! # }
//! ```

pub mod db;

pub use db::*;
