//! Driver-neutral query results.
//!
//! Raw SQL runs over each backend's text protocol (MySQL `COM_QUERY`,
//! Postgres simple query), so every MySQL and Postgres value arrives as the
//! server's own text rendering. Numbers, booleans and JSON are turned back
//! into JSON values by column type. Everything else, including decimals and
//! dates, stays a string exactly as the server printed it. sqlite values are
//! decoded by their storage class.

use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use sqlx::mysql::{MySqlQueryResult, MySqlRow};
use sqlx::postgres::{PgQueryResult, PgRow};
use sqlx::sqlite::{SqliteQueryResult, SqliteRow};
use sqlx::{Column, Row, TypeInfo, ValueRef};

use crate::error::{Result, RouterError};

/// One result row: column name to value, in column order.
pub type Record = serde_json::Map<String, Value>;

/// Outcome of a write: what the primary reported back.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteSummary {
    pub rows_affected: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_insert_id: Option<i64>,
}

impl From<MySqlQueryResult> for WriteSummary {
    fn from(result: MySqlQueryResult) -> Self {
        // 0 means the statement generated no id
        let id = result.last_insert_id();
        Self {
            rows_affected: result.rows_affected(),
            last_insert_id: (id != 0).then(|| i64::try_from(id).unwrap_or(i64::MAX)),
        }
    }
}

impl From<PgQueryResult> for WriteSummary {
    fn from(result: PgQueryResult) -> Self {
        Self {
            rows_affected: result.rows_affected(),
            last_insert_id: None,
        }
    }
}

impl From<SqliteQueryResult> for WriteSummary {
    fn from(result: SqliteQueryResult) -> Self {
        Self {
            rows_affected: result.rows_affected(),
            last_insert_id: Some(result.last_insert_rowid()),
        }
    }
}

pub fn mysql_record(row: &MySqlRow) -> Result<Record> {
    collect(row, |idx, type_name| {
        let bytes: Option<Vec<u8>> = row.try_get_unchecked(idx).map_err(RouterError::Query)?;
        Ok(bytes.map_or(Value::Null, |bytes| mysql_value(type_name, bytes)))
    })
}

pub fn postgres_record(row: &PgRow) -> Result<Record> {
    collect(row, |idx, type_name| {
        let text: Option<String> = row.try_get_unchecked(idx).map_err(RouterError::Query)?;
        Ok(text.map_or(Value::Null, |text| postgres_value(type_name, text)))
    })
}

pub fn sqlite_record(row: &SqliteRow) -> Result<Record> {
    collect(row, |idx, _| {
        let raw = row.try_get_raw(idx).map_err(RouterError::Query)?;
        if raw.is_null() {
            return Ok(Value::Null);
        }
        // storage class of this value, not the declared column type
        let value = match raw.type_info().name() {
            "INTEGER" => Value::from(row.try_get_unchecked::<i64, _>(idx).map_err(RouterError::Query)?),
            "REAL" => float(row.try_get_unchecked::<f64, _>(idx).map_err(RouterError::Query)?),
            "TEXT" => Value::from(row.try_get_unchecked::<String, _>(idx).map_err(RouterError::Query)?),
            _ => Value::from(row.try_get_unchecked::<Vec<u8>, _>(idx).map_err(RouterError::Query)?),
        };
        Ok(value)
    })
}

fn collect<R, F>(row: &R, mut decode: F) -> Result<Record>
where
    R: Row,
    F: FnMut(usize, &str) -> Result<Value>,
{
    let mut record = Record::with_capacity(row.len());
    for (idx, column) in row.columns().iter().enumerate() {
        let value = decode(idx, column.type_info().name())?;
        record.insert(column.name().to_string(), value);
    }
    Ok(record)
}

fn mysql_value(type_name: &str, bytes: Vec<u8>) -> Value {
    match type_name {
        "BINARY" | "VARBINARY" | "TINYBLOB" | "BLOB" | "MEDIUMBLOB" | "LONGBLOB" | "BIT"
        | "GEOMETRY" => Value::from(bytes),
        _ => match String::from_utf8(bytes) {
            Ok(text) => mysql_text(type_name, text),
            Err(e) => Value::from(e.into_bytes()),
        },
    }
}

fn mysql_text(type_name: &str, text: String) -> Value {
    match type_name {
        "BOOLEAN" | "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" | "YEAR" => {
            integer(text)
        }
        name if name.ends_with(" UNSIGNED") => integer(text),
        "FLOAT" | "DOUBLE" => parsed_float(text),
        "JSON" => json(text),
        _ => Value::String(text),
    }
}

fn postgres_value(type_name: &str, text: String) -> Value {
    match type_name {
        "BOOL" => match text.as_str() {
            "t" => Value::Bool(true),
            "f" => Value::Bool(false),
            _ => Value::String(text),
        },
        "INT2" | "INT4" | "INT8" | "OID" => integer(text),
        "FLOAT4" | "FLOAT8" => parsed_float(text),
        "JSON" | "JSONB" => json(text),
        _ => Value::String(text),
    }
}

fn integer(text: String) -> Value {
    if let Ok(n) = text.parse::<i64>() {
        return Value::from(n);
    }
    if let Ok(n) = text.parse::<u64>() {
        return Value::from(n);
    }
    Value::String(text)
}

// NaN and infinities have no JSON number form
fn parsed_float(text: String) -> Value {
    match text.parse::<f64>().ok().and_then(Number::from_f64) {
        Some(n) => Value::Number(n),
        None => Value::String(text),
    }
}

fn float(value: f64) -> Value {
    Number::from_f64(value).map_or_else(|| Value::String(value.to_string()), Value::Number)
}

fn json(text: String) -> Value {
    serde_json::from_str(&text).unwrap_or(Value::String(text))
}
