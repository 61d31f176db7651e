//! PostgreSQL driver implementation

use async_trait::async_trait;
use bytes::BytesMut;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde_json::Value;
use std::any::Any;
use std::error::Error;
use std::net::IpAddr;
use tokio_postgres::error::SqlState;
use tokio_postgres::types::{to_sql_checked, FromSql, IsNull, Kind, ToSql, Type};
use tokio_postgres::{Client, NoTls};
use uuid::Uuid;

use super::encode_binary;
use crate::db::connection::{BackendConfig, Dialect, Driver};
use crate::db::driver::SqlConnection;
use crate::db::error::{DbError, Result};
use crate::db::query::CompiledQuery;
use crate::db::transaction::TransactionState;
use crate::db::value::{InsertId, Record, Row};

type BoxError = Box<dyn Error + Sync + Send>;

pub struct PostgresConnection {
    client: Client,
}

impl PostgresConnection {
    /// libpq key/value connection string
    pub fn connection_string(config: &BackendConfig) -> String {
        let port = config.port_for(Driver::Postgres).unwrap_or(5432);
        let mut parts = vec![
            format!("host={}", quote(&config.host)),
            format!("port={}", port),
        ];
        if !config.database.is_empty() {
            parts.push(format!("dbname={}", quote(&config.database)));
        }
        if !config.user.is_empty() {
            parts.push(format!("user={}", quote(&config.user)));
        }
        if !config.password.is_empty() {
            parts.push(format!("password={}", quote(&config.password)));
        }
        parts.join(" ")
    }

    pub async fn connect(config: &BackendConfig) -> Result<Self> {
        let (client, connection) =
            tokio_postgres::connect(&Self::connection_string(config), NoTls)
                .await
                .map_err(DbError::connection)?;

        // Spawn connection handler (required by tokio-postgres)
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::error!("PostgreSQL connection error: {}", e);
            }
        });

        Ok(Self { client })
    }

    /// Native client handle
    pub fn handle(&self) -> &Client {
        &self.client
    }
}

/// Single-quote a value, escaping quotes and backslashes
fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
}

#[async_trait]
impl SqlConnection for PostgresConnection {
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    async fn fetch(&self, query: &CompiledQuery) -> Result<Vec<Row>> {
        let params = bind_values(&query.values);
        let rows = self
            .client
            .query(query.sql.as_str(), &param_refs(&params))
            .await
            .map_err(DbError::execution)?;
        rows.iter().map(row_to_record).collect()
    }

    async fn execute(&self, query: &CompiledQuery) -> Result<u64> {
        let params = bind_values(&query.values);
        self.client
            .execute(query.sql.as_str(), &param_refs(&params))
            .await
            .map_err(DbError::execution)
    }

    /// `lastval()` of the session. Skipped inside a transaction, where an
    /// undefined lastval would abort it.
    async fn last_insert_id(&self, state: TransactionState) -> Result<InsertId> {
        if state == TransactionState::InTransaction {
            return Ok(None);
        }
        match self.client.query_one("SELECT lastval()", &[]).await {
            Ok(row) => {
                let id: i64 = row.try_get(0).map_err(DbError::execution)?;
                Ok(Some(id.to_string()))
            }
            // lastval is not yet defined in this session
            Err(e) if e.code() == Some(&SqlState::OBJECT_NOT_IN_PREREQUISITE_STATE) => Ok(None),
            Err(e) => Err(DbError::execution(e)),
        }
    }

    async fn batch_execute(&self, sql: &str) -> Result<()> {
        self.client.batch_execute(sql).await.map_err(DbError::execution)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn bind_values(values: &[Value]) -> Vec<PgValue> {
    values.iter().cloned().map(PgValue).collect()
}

fn param_refs(params: &[PgValue]) -> Vec<&(dyn ToSql + Sync)> {
    params.iter().map(|p| p as &(dyn ToSql + Sync)).collect()
}

/// A JSON value encoded according to the parameter type the server inferred.
/// Combinations without an explicit encoding are rejected.
#[derive(Debug)]
struct PgValue(Value);

impl ToSql for PgValue {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> std::result::Result<IsNull, BoxError> {
        match &self.0 {
            Value::Null => Ok(IsNull::Yes),
            Value::Bool(b) => match *ty {
                Type::BOOL => b.to_sql(ty, out),
                Type::JSON | Type::JSONB => self.0.to_sql(ty, out),
                _ => Err(mismatch("boolean", ty)),
            },
            Value::Number(n) => match *ty {
                Type::INT2 => i16::try_from(integer(n)?)?.to_sql(ty, out),
                Type::INT4 => i32::try_from(integer(n)?)?.to_sql(ty, out),
                Type::INT8 => integer(n)?.to_sql(ty, out),
                Type::OID => u32::try_from(integer(n)?)?.to_sql(ty, out),
                Type::FLOAT4 => (float(n)? as f32).to_sql(ty, out),
                Type::FLOAT8 => float(n)?.to_sql(ty, out),
                Type::NUMERIC => {
                    encode_numeric(&number_text(n), out)?;
                    Ok(IsNull::No)
                }
                Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME => {
                    n.to_string().to_sql(ty, out)
                }
                Type::JSON | Type::JSONB => self.0.to_sql(ty, out),
                _ => Err(mismatch("number", ty)),
            },
            Value::String(s) => match *ty {
                Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME | Type::UNKNOWN => {
                    s.as_str().to_sql(ty, out)
                }
                Type::BOOL => s.trim().parse::<bool>()?.to_sql(ty, out),
                Type::INT2 => s.trim().parse::<i16>()?.to_sql(ty, out),
                Type::INT4 => s.trim().parse::<i32>()?.to_sql(ty, out),
                Type::INT8 => s.trim().parse::<i64>()?.to_sql(ty, out),
                Type::FLOAT4 => s.trim().parse::<f32>()?.to_sql(ty, out),
                Type::FLOAT8 => s.trim().parse::<f64>()?.to_sql(ty, out),
                Type::NUMERIC => {
                    encode_numeric(s, out)?;
                    Ok(IsNull::No)
                }
                Type::UUID => Uuid::parse_str(s.trim())?.to_sql(ty, out),
                Type::INET => s.trim().parse::<IpAddr>()?.to_sql(ty, out),
                Type::DATE => NaiveDate::parse_from_str(s, "%Y-%m-%d")?.to_sql(ty, out),
                Type::TIME => NaiveTime::parse_from_str(s, "%H:%M:%S%.f")?.to_sql(ty, out),
                Type::TIMESTAMP => parse_timestamp(s)?.to_sql(ty, out),
                Type::TIMESTAMPTZ => DateTime::<FixedOffset>::parse_from_rfc3339(s)?.to_sql(ty, out),
                Type::JSON | Type::JSONB => self.0.to_sql(ty, out),
                _ => match ty.kind() {
                    Kind::Enum(_) => s.as_str().to_sql(&Type::TEXT, out),
                    _ => Err(mismatch("string", ty)),
                },
            },
            Value::Array(items) => match *ty {
                Type::JSON | Type::JSONB => self.0.to_sql(ty, out),
                _ => match ty.kind() {
                    Kind::Array(_) => items
                        .iter()
                        .cloned()
                        .map(PgValue)
                        .collect::<Vec<_>>()
                        .to_sql(ty, out),
                    _ => Err(mismatch("array", ty)),
                },
            },
            Value::Object(_) => match *ty {
                Type::JSON | Type::JSONB => self.0.to_sql(ty, out),
                _ => Err(mismatch("object", ty)),
            },
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

fn mismatch(kind: &str, ty: &Type) -> BoxError {
    format!("cannot bind a {} to a {} parameter", kind, ty).into()
}

fn integer(n: &serde_json::Number) -> std::result::Result<i64, BoxError> {
    n.as_i64().ok_or_else(|| format!("{} is not a 64-bit integer", n).into())
}

fn float(n: &serde_json::Number) -> std::result::Result<f64, BoxError> {
    n.as_f64().ok_or_else(|| format!("{} is not a float", n).into())
}

/// Plain decimal text of a JSON number, never in exponent form
fn number_text(n: &serde_json::Number) -> String {
    match (n.as_i64(), n.as_u64(), n.as_f64()) {
        (Some(i), _, _) => i.to_string(),
        (_, Some(u), _) => u.to_string(),
        (_, _, Some(f)) => f.to_string(),
        _ => n.to_string(),
    }
}

fn parse_timestamp(s: &str) -> std::result::Result<NaiveDateTime, chrono::ParseError> {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f"))
}

/// Encode decimal text in the binary NUMERIC format: base-10000 digit
/// groups with leading and trailing zero groups stripped
fn encode_numeric(text: &str, out: &mut BytesMut) -> std::result::Result<(), BoxError> {
    let text = text.trim();
    if text.eq_ignore_ascii_case("nan") {
        for word in [0u16, 0, 0xC000, 0] {
            out.extend_from_slice(&word.to_be_bytes());
        }
        return Ok(());
    }
    if text.contains(['e', 'E']) {
        return encode_numeric(&text.parse::<f64>()?.to_string(), out);
    }

    let (negative, unsigned) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text.strip_prefix('+').unwrap_or(text)),
    };
    let (int_part, frac_part) = unsigned.split_once('.').unwrap_or((unsigned, ""));
    let is_digits = |part: &str| part.bytes().all(|b| b.is_ascii_digit());
    if (int_part.is_empty() && frac_part.is_empty()) || !is_digits(int_part) || !is_digits(frac_part)
    {
        return Err(format!("'{}' is not a decimal number", text).into());
    }

    let int_part = int_part.trim_start_matches('0');
    let dscale = u16::try_from(frac_part.len())?;
    let mut digits = "0".repeat((4 - int_part.len() % 4) % 4);
    digits.push_str(int_part);
    let int_groups = digits.len() / 4;
    digits.push_str(frac_part);
    digits.push_str(&"0".repeat((4 - digits.len() % 4) % 4));

    let mut groups: Vec<u16> = digits
        .as_bytes()
        .chunks(4)
        .map(|chunk| chunk.iter().fold(0u16, |acc, d| acc * 10 + u16::from(d - b'0')))
        .collect();
    let mut weight = int_groups as i32 - 1;
    while groups.first() == Some(&0) {
        groups.remove(0);
        weight -= 1;
    }
    while groups.last() == Some(&0) {
        groups.pop();
    }
    if groups.is_empty() {
        weight = 0;
    }

    let sign: u16 = if negative && !groups.is_empty() { 0x4000 } else { 0 };
    let header = [
        u16::try_from(groups.len())?,
        i16::try_from(weight)? as u16,
        sign,
        dscale,
    ];
    for word in header.iter().chain(&groups) {
        out.extend_from_slice(&word.to_be_bytes());
    }
    Ok(())
}

/// A column value decoded into JSON according to its PostgreSQL type.
/// Types without a mapping are an error rather than a silent null.
struct JsonCell(Value);

impl<'a> FromSql<'a> for JsonCell {
    fn from_sql(ty: &Type, raw: &'a [u8]) -> std::result::Result<Self, BoxError> {
        let value = match *ty {
            Type::BOOL => Value::from(bool::from_sql(ty, raw)?),
            Type::INT2 => Value::from(i16::from_sql(ty, raw)?),
            Type::INT4 => Value::from(i32::from_sql(ty, raw)?),
            Type::INT8 => Value::from(i64::from_sql(ty, raw)?),
            Type::OID => Value::from(u32::from_sql(ty, raw)?),
            Type::FLOAT4 => Value::from(f32::from_sql(ty, raw)?),
            Type::FLOAT8 => Value::from(f64::from_sql(ty, raw)?),
            Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME | Type::UNKNOWN => {
                Value::from(<&str as FromSql>::from_sql(ty, raw)?)
            }
            Type::JSON | Type::JSONB => Value::from_sql(ty, raw)?,
            Type::BYTEA => encode_binary(raw),
            Type::DATE => Value::String(NaiveDate::from_sql(ty, raw)?.to_string()),
            Type::TIME => Value::String(NaiveTime::from_sql(ty, raw)?.to_string()),
            Type::TIMESTAMP => Value::String(NaiveDateTime::from_sql(ty, raw)?.to_string()),
            Type::TIMESTAMPTZ => Value::String(DateTime::<Utc>::from_sql(ty, raw)?.to_rfc3339()),
            Type::NUMERIC => Value::String(decode_numeric(raw).ok_or("malformed numeric value")?),
            Type::UUID => Value::String(Uuid::from_sql(ty, raw)?.to_string()),
            Type::INET => Value::String(IpAddr::from_sql(ty, raw)?.to_string()),
            _ => match ty.kind() {
                Kind::Array(_) => Value::Array(
                    Vec::<Option<JsonCell>>::from_sql(ty, raw)?
                        .into_iter()
                        .map(|cell| cell.map_or(Value::Null, |c| c.0))
                        .collect(),
                ),
                Kind::Enum(_) => Value::from(std::str::from_utf8(raw)?),
                Kind::Domain(base) => JsonCell::from_sql(base, raw)?.0,
                _ => {
                    return Err(format!(
                        "no JSON mapping for PostgreSQL type {}; cast the column to text",
                        ty
                    )
                    .into())
                }
            },
        };
        Ok(JsonCell(value))
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }
}

fn row_to_record(row: &tokio_postgres::Row) -> Result<Record> {
    let mut record = Record::new();
    for (i, column) in row.columns().iter().enumerate() {
        let value = row
            .try_get::<_, Option<JsonCell>>(i)
            .map_err(DbError::execution)?
            .map_or(Value::Null, |cell| cell.0);
        record.insert(column.name().to_string(), value);
    }
    Ok(record)
}

/// Decode the binary NUMERIC format into its decimal text form.
/// Precision is kept by returning text rather than a float.
fn decode_numeric(raw: &[u8]) -> Option<String> {
    let word = |at: usize| -> Option<u16> {
        raw.get(at..at + 2).map(|b| u16::from_be_bytes([b[0], b[1]]))
    };
    let ndigits = word(0)? as usize;
    let weight = word(2)? as i16 as i32;
    let sign = word(4)?;
    let dscale = word(6)? as usize;
    let digits: Vec<u16> = (0..ndigits)
        .map(|d| word(8 + d * 2))
        .collect::<Option<_>>()?;

    match sign {
        0xC000 => return Some("NaN".to_string()),
        0xD000 => return Some("Infinity".to_string()),
        0xF000 => return Some("-Infinity".to_string()),
        _ => {}
    }

    let mut text = String::new();
    if sign == 0x4000 {
        text.push('-');
    }

    // Integer part: base-10000 groups at positions 0..=weight
    if weight < 0 {
        text.push('0');
    } else {
        for pos in 0..=weight {
            let group = digits.get(pos as usize).copied().unwrap_or(0);
            if pos == 0 {
                text.push_str(&group.to_string());
            } else {
                text.push_str(&format!("{:04}", group));
            }
        }
    }

    if dscale > 0 {
        let mut fraction = String::new();
        let mut pos = weight + 1;
        while fraction.len() < dscale {
            let group = if pos < 0 {
                0
            } else {
                digits.get(pos as usize).copied().unwrap_or(0)
            };
            fraction.push_str(&format!("{:04}", group));
            pos += 1;
        }
        fraction.truncate(dscale);
        text.push('.');
        text.push_str(&fraction);
    }

    Some(text)
}
