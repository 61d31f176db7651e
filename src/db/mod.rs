pub mod connection;
pub mod diagnostics;
pub mod driver;
pub mod drivers;
pub mod error;
pub mod facade;
pub mod manager;
pub mod query;
pub mod transaction;
pub mod value;

pub use connection::{BackendConfig, Dialect, Driver, DriverClass};
pub use diagnostics::{DiagnosticSink, FailurePolicy, FileSink};
pub use driver::{
    Connection, ConnectionFactory, DocumentConnection, KeyValueConnection, NativeFactory,
    SqlConnection,
};
pub use error::{DbError, Result};
pub use facade::{Database, DatabaseOptions};
pub use transaction::TransactionState;
pub use value::{record, InsertId, Params, QueryResult, Record, Row, SelectOptions, Value};
