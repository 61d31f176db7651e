//! Translation of backend-neutral CRUD requests into native queries.
//!
//! The relational path emits SQL with `:name` placeholders which
//! [`compile`] then rewrites into the marker syntax of the target dialect.
//! The document path emits filter and update documents as JSON objects and
//! sort keys as an ordered list, converted to BSON by the document driver.

use std::collections::HashSet;

use super::connection::Dialect;
use super::error::{DbError, Result};
use super::value::{Params, Record, SelectOptions, Value};

/// SQL text with named parameters, before dialect compilation
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Params,
}

/// SQL text in the dialect's native marker syntax with values in bind order
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    pub sql: String,
    pub values: Vec<Value>,
}

/// Hands out placeholder names derived from column names, unique per statement
#[derive(Default)]
struct Placeholders {
    used: HashSet<String>,
}

impl Placeholders {
    fn name(&mut self, prefix: &str, column: &str) -> String {
        let sanitized: String = column
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
            .collect();
        let base = format!("{}{}", prefix, sanitized);
        let mut candidate = base.clone();
        let mut n = 2;
        while !self.used.insert(candidate.clone()) {
            candidate = format!("{}_{}", base, n);
            n += 1;
        }
        candidate
    }
}

/// Builds parameterised SQL for one dialect
#[derive(Debug, Clone, Copy)]
pub struct SqlBuilder {
    dialect: Dialect,
}

impl SqlBuilder {
    pub fn new(dialect: Dialect) -> Self {
        Self { dialect }
    }

    pub fn insert(&self, table: &str, data: &Record) -> Result<Statement> {
        require_data("insert", table, data)?;
        let mut names = Placeholders::default();
        let mut params = Record::new();
        let mut columns = Vec::with_capacity(data.len());
        let mut markers = Vec::with_capacity(data.len());
        for (column, value) in data {
            let name = names.name("", column);
            columns.push(column.as_str());
            markers.push(format!(":{}", name));
            params.insert(name, value.clone());
        }
        Ok(Statement {
            sql: format!(
                "INSERT INTO {} ({}) VALUES ({})",
                table,
                columns.join(", "),
                markers.join(", ")
            ),
            params: Params::Named(params),
        })
    }

    pub fn select(&self, table: &str, conditions: &Record, options: &SelectOptions) -> Statement {
        let mut names = Placeholders::default();
        let mut params = Record::new();
        let columns = if options.columns.is_empty() {
            "*".to_string()
        } else {
            options.columns.join(", ")
        };
        let mut sql = format!("SELECT {} FROM {}", columns, table);
        if !conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&where_clause(conditions, &mut names, &mut params));
        }

        // Caller-trusted text, not bound.
        let order = options
            .order
            .as_deref()
            .map(str::trim)
            .filter(|o| !o.is_empty());

        match self.dialect {
            Dialect::SqlServer => {
                if let Some(order) = order {
                    sql.push_str(&format!(" ORDER BY {}", order));
                }
                if let Some(limit) = options.limit {
                    if order.is_none() {
                        sql.push_str(" ORDER BY (SELECT NULL)");
                    }
                    sql.push_str(&format!(
                        " OFFSET {} ROWS FETCH NEXT {} ROWS ONLY",
                        options.offset.unwrap_or(0),
                        limit
                    ));
                }
            }
            _ => {
                if let Some(order) = order {
                    sql.push_str(&format!(" ORDER BY {}", order));
                }
                if let Some(limit) = options.limit {
                    sql.push_str(&format!(" LIMIT {}", limit));
                    if let Some(offset) = options.offset {
                        sql.push_str(&format!(" OFFSET {}", offset));
                    }
                }
            }
        }

        Statement {
            sql,
            params: Params::Named(params),
        }
    }

    pub fn update(&self, table: &str, data: &Record, conditions: &Record) -> Result<Statement> {
        require_conditions("update", table, conditions)?;
        require_data("update", table, data)?;
        let mut names = Placeholders::default();
        let mut params = Record::new();
        let assignments: Vec<String> = data
            .iter()
            .map(|(column, value)| {
                let name = names.name("s_", column);
                params.insert(name.clone(), value.clone());
                format!("{} = :{}", column, name)
            })
            .collect();
        let filter = where_clause(conditions, &mut names, &mut params);
        Ok(Statement {
            sql: format!(
                "UPDATE {} SET {} WHERE {}",
                table,
                assignments.join(", "),
                filter
            ),
            params: Params::Named(params),
        })
    }

    pub fn delete(&self, table: &str, conditions: &Record) -> Result<Statement> {
        require_conditions("delete", table, conditions)?;
        let mut names = Placeholders::default();
        let mut params = Record::new();
        let filter = where_clause(conditions, &mut names, &mut params);
        Ok(Statement {
            sql: format!("DELETE FROM {} WHERE {}", table, filter),
            params: Params::Named(params),
        })
    }

    /// Native statement opening a transaction
    pub fn begin(&self) -> &'static str {
        match self.dialect {
            Dialect::MySql => "START TRANSACTION",
            Dialect::Postgres | Dialect::Sqlite => "BEGIN",
            Dialect::SqlServer => "BEGIN TRANSACTION",
        }
    }

    pub fn commit(&self) -> &'static str {
        match self.dialect {
            Dialect::SqlServer => "COMMIT TRANSACTION",
            _ => "COMMIT",
        }
    }

    pub fn rollback(&self) -> &'static str {
        match self.dialect {
            Dialect::SqlServer => "ROLLBACK TRANSACTION",
            _ => "ROLLBACK",
        }
    }
}

/// Whole-table mutation is never allowed
pub(crate) fn require_conditions(operation: &str, table: &str, conditions: &Record) -> Result<()> {
    if conditions.is_empty() {
        return Err(DbError::Constraint(format!(
            "{} on '{}' requires at least one condition",
            operation, table
        )));
    }
    Ok(())
}

pub(crate) fn require_data(operation: &str, table: &str, data: &Record) -> Result<()> {
    if data.is_empty() {
        return Err(DbError::Constraint(format!(
            "{} on '{}' requires at least one column",
            operation, table
        )));
    }
    Ok(())
}

fn where_clause(conditions: &Record, names: &mut Placeholders, params: &mut Record) -> String {
    conditions
        .iter()
        .map(|(column, value)| {
            let name = names.name("w_", column);
            params.insert(name.clone(), value.clone());
            format!("{} = :{}", column, name)
        })
        .collect::<Vec<_>>()
        .join(" AND ")
}

/// Whether a statement returns rows, judged by its leading keyword
pub fn returns_rows(sql: &str) -> bool {
    let keyword: String = sql
        .trim_start()
        .chars()
        .take_while(|c| c.is_ascii_alphabetic())
        .collect::<String>()
        .to_ascii_lowercase();
    matches!(
        keyword.as_str(),
        "select" | "show" | "describe" | "desc" | "pragma" | "with" | "explain" | "values"
    )
}

fn marker(dialect: Dialect, index: usize) -> String {
    match dialect {
        Dialect::MySql | Dialect::Sqlite => "?".to_string(),
        Dialect::Postgres => format!("${}", index),
        Dialect::SqlServer => format!("@P{}", index),
    }
}

/// Rewrite `:name` or `?` markers into the dialect's native markers and
/// collect the bound values in order. Quoted text and comments are left alone.
pub fn compile(dialect: Dialect, sql: &str, params: &Params) -> Result<CompiledQuery> {
    if let Params::None = params {
        return Ok(CompiledQuery {
            sql: sql.to_string(),
            values: Vec::new(),
        });
    }

    let named: Option<Record> = match params {
        Params::Named(map) => Some(
            map.iter()
                .map(|(k, v)| (k.trim_start_matches(':').to_string(), v.clone()))
                .collect(),
        ),
        _ => None,
    };
    let positional: &[Value] = match params {
        Params::Positional(values) => values,
        _ => &[],
    };

    let chars: Vec<char> = sql.chars().collect();
    let mut out = String::with_capacity(sql.len());
    let mut values = Vec::new();
    let mut used = HashSet::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '\'' | '"' | '`' => {
                let end = skip_quoted(&chars, i, c, dialect == Dialect::MySql);
                out.extend(&chars[i..end]);
                i = end;
            }
            '[' if dialect == Dialect::SqlServer => {
                let end = skip_quoted(&chars, i, ']', false);
                out.extend(&chars[i..end]);
                i = end;
            }
            '-' if chars.get(i + 1) == Some(&'-') => {
                let end = chars[i..]
                    .iter()
                    .position(|&ch| ch == '\n')
                    .map_or(chars.len(), |p| i + p);
                out.extend(&chars[i..end]);
                i = end;
            }
            '/' if chars.get(i + 1) == Some(&'*') => {
                let end = chars[i + 2..]
                    .windows(2)
                    .position(|w| w == ['*', '/'])
                    .map_or(chars.len(), |p| i + 2 + p + 2);
                out.extend(&chars[i..end]);
                i = end;
            }
            ':' if chars.get(i + 1) == Some(&':') => {
                out.push_str("::");
                i += 2;
            }
            ':' if named.is_some()
                && chars
                    .get(i + 1)
                    .is_some_and(|ch| ch.is_ascii_alphabetic() || *ch == '_') =>
            {
                let start = i + 1;
                let end = chars[start..]
                    .iter()
                    .position(|ch| !(ch.is_ascii_alphanumeric() || *ch == '_'))
                    .map_or(chars.len(), |p| start + p);
                let name: String = chars[start..end].iter().collect();
                let value = named
                    .as_ref()
                    .and_then(|map| map.get(&name))
                    .ok_or_else(|| {
                        DbError::Execution(format!("no value bound for parameter :{}", name))
                    })?;
                values.push(value.clone());
                used.insert(name);
                out.push_str(&marker(dialect, values.len()));
                i = end;
            }
            '?' if matches!(params, Params::Positional(_)) => {
                let value = positional.get(values.len()).ok_or_else(|| {
                    DbError::Execution(format!(
                        "no value bound for positional parameter {}",
                        values.len() + 1
                    ))
                })?;
                values.push(value.clone());
                out.push_str(&marker(dialect, values.len()));
                i += 1;
            }
            _ => {
                out.push(c);
                i += 1;
            }
        }
    }

    if let Some(map) = &named {
        if let Some(unused) = map.keys().find(|k| !used.contains(*k)) {
            return Err(DbError::Execution(format!(
                "parameter :{} is not used by the statement",
                unused
            )));
        }
    } else if values.len() != positional.len() {
        return Err(DbError::Execution(format!(
            "statement has {} positional markers but {} values were bound",
            values.len(),
            positional.len()
        )));
    }

    Ok(CompiledQuery { sql: out, values })
}

/// Index just past the closing quote; a doubled quote is an escaped quote
fn skip_quoted(chars: &[char], start: usize, close: char, backslash_escapes: bool) -> usize {
    let mut i = start + 1;
    while i < chars.len() {
        let c = chars[i];
        if backslash_escapes && c == '\\' {
            i += 2;
            continue;
        }
        if c == close {
            if chars.get(i + 1) == Some(&close) && close != ']' {
                i += 2;
                continue;
            }
            return i + 1;
        }
        i += 1;
    }
    chars.len()
}

/// Native find request for a document store
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindSpec {
    pub filter: Record,
    pub projection: Option<Record>,
    /// Sort keys in priority order, 1 ascending and -1 descending
    pub sort: Vec<(String, i32)>,
    pub limit: Option<i64>,
    pub skip: Option<u64>,
}

/// Builds filter, update and find documents
pub struct DocumentQuery;

impl DocumentQuery {
    /// Conditions are used verbatim as the filter document
    pub fn filter(conditions: &Record) -> Record {
        conditions.clone()
    }

    /// Wrap the data in a field-set operator
    pub fn update(data: &Record) -> Record {
        let mut doc = Record::new();
        doc.insert("$set".to_string(), Value::Object(data.clone()));
        doc
    }

    pub fn find(conditions: &Record, options: &SelectOptions) -> FindSpec {
        let projection = if options.columns.is_empty() {
            None
        } else {
            Some(
                options
                    .columns
                    .iter()
                    .map(|c| (c.clone(), Value::from(1)))
                    .collect(),
            )
        };
        FindSpec {
            filter: Self::filter(conditions),
            projection,
            sort: options.order.as_deref().map(Self::sort).unwrap_or_default(),
            limit: options.limit.map(|l| l.min(i64::MAX as u64) as i64),
            skip: options.offset,
        }
    }

    /// Comma-separated `"field [DIRECTION]"` keys: DESC sorts descending,
    /// anything else ascending
    pub fn sort(order: &str) -> Vec<(String, i32)> {
        order
            .split(',')
            .filter_map(|key| {
                let mut parts = key.split_whitespace();
                let field = parts.next()?;
                let direction = match parts.next() {
                    Some(dir) if dir.eq_ignore_ascii_case("desc") => -1,
                    _ => 1,
                };
                Some((field.to_string(), direction))
            })
            .collect()
    }
}
