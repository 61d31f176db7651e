//! Backend-neutral values passed in and out of the facade

use serde::{Deserialize, Serialize};

pub use serde_json::Value;

/// Column (or field) name to value mapping used for writes and conditions
pub type Record = serde_json::Map<String, Value>;

/// A fetched row, keyed by column name
pub type Row = Record;

/// Identifier generated by an insert; `None` when the backend has no
/// notion of a last generated id
pub type InsertId = Option<String>;

/// Result of a raw query
#[derive(Debug, Clone, PartialEq)]
pub enum QueryResult {
    /// Row-returning statement (SELECT, SHOW, DESCRIBE, PRAGMA, WITH, ...)
    Rows(Vec<Row>),
    /// Mutating statement, with the number of affected rows
    Affected(u64),
}

impl QueryResult {
    pub fn rows(&self) -> Option<&[Row]> {
        match self {
            QueryResult::Rows(rows) => Some(rows),
            QueryResult::Affected(_) => None,
        }
    }

    pub fn affected(&self) -> Option<u64> {
        match self {
            QueryResult::Rows(_) => None,
            QueryResult::Affected(count) => Some(*count),
        }
    }
}

/// Parameters for a raw query
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Params {
    #[default]
    None,
    /// Zero-based values for `?` markers
    Positional(Vec<Value>),
    /// Values for `:name` markers; keys may omit the leading `:`
    Named(Record),
}

impl Params {
    pub fn named<K, I>(pairs: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        Params::Named(pairs.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

impl From<Vec<Value>> for Params {
    fn from(values: Vec<Value>) -> Self {
        Params::Positional(values)
    }
}

impl From<Record> for Params {
    fn from(values: Record) -> Self {
        Params::Named(values)
    }
}

/// Projection, ordering and paging for `select`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectOptions {
    /// Columns to return; empty means all
    pub columns: Vec<String>,
    /// Raw ORDER BY text, or `"field DIRECTION"` for documents
    pub order: Option<String>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

impl SelectOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn order(mut self, order: impl Into<String>) -> Self {
        self.order = Some(order.into());
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }
}

/// Build a [`Record`] from key/value pairs
pub fn record<K, I>(pairs: I) -> Record
where
    K: Into<String>,
    I: IntoIterator<Item = (K, Value)>,
{
    pairs.into_iter().map(|(k, v)| (k.into(), v)).collect()
}
