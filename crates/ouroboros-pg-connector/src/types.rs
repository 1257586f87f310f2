//! Parameter values exchanged with PostgreSQL.
//!
//! `SqlValue` is the single representation for bound parameters and decoded
//! row cells. Binding and decoding go through sqlx; nothing here formats a
//! value into SQL text.

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use serde_json::Value as JsonValue;
use sqlx::encode::IsNull;
use sqlx::error::BoxDynError;
use sqlx::postgres::types::Oid;
use sqlx::postgres::{PgArgumentBuffer, PgArguments, PgRow, PgTypeInfo, PgValueFormat};
use sqlx::{Arguments, Column, Decode, Encode, Postgres, Row as SqlxRow, Type, TypeInfo, ValueRef};
use uuid::Uuid;

use crate::row::Row;
use crate::{ConnectorError, Result};

/// A parameter or result value.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    /// NULL, bound without a type so the server infers it from context
    Null,
    /// BOOLEAN
    Bool(bool),
    /// INTEGER
    Int(i32),
    /// BIGINT
    BigInt(i64),
    /// DOUBLE PRECISION
    Double(f64),
    /// TEXT / VARCHAR
    Text(String),
    /// BYTEA
    Bytes(Vec<u8>),
    /// UUID
    Uuid(Uuid),
    /// DATE
    Date(NaiveDate),
    /// TIMESTAMP
    Timestamp(NaiveDateTime),
    /// TIMESTAMPTZ
    TimestampTz(DateTime<Utc>),
    /// JSON / JSONB
    Json(JsonValue),
    /// NUMERIC
    Decimal(Decimal),
    /// ARRAY
    Array(Vec<SqlValue>),
}

impl SqlValue {
    /// Returns the PostgreSQL type name for this value.
    pub fn pg_type_name(&self) -> &'static str {
        match self {
            SqlValue::Null => "NULL",
            SqlValue::Bool(_) => "BOOLEAN",
            SqlValue::Int(_) => "INTEGER",
            SqlValue::BigInt(_) => "BIGINT",
            SqlValue::Double(_) => "DOUBLE PRECISION",
            SqlValue::Text(_) => "TEXT",
            SqlValue::Bytes(_) => "BYTEA",
            SqlValue::Uuid(_) => "UUID",
            SqlValue::Date(_) => "DATE",
            SqlValue::Timestamp(_) => "TIMESTAMP",
            SqlValue::TimestampTz(_) => "TIMESTAMPTZ",
            SqlValue::Json(_) => "JSONB",
            SqlValue::Decimal(_) => "NUMERIC",
            SqlValue::Array(_) => "ARRAY",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            SqlValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            SqlValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SqlValue::Int(v) => Some(i64::from(*v)),
            SqlValue::BigInt(v) => Some(*v),
            SqlValue::Text(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Converts the value into JSON for handing rows back to the ORM.
    pub fn to_json(&self) -> JsonValue {
        match self {
            SqlValue::Null => JsonValue::Null,
            SqlValue::Bool(v) => JsonValue::Bool(*v),
            SqlValue::Int(v) => JsonValue::from(*v),
            SqlValue::BigInt(v) => JsonValue::from(*v),
            SqlValue::Double(v) => serde_json::Number::from_f64(*v)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            SqlValue::Text(v) => JsonValue::String(v.clone()),
            SqlValue::Bytes(v) => JsonValue::Array(v.iter().map(|b| JsonValue::from(*b)).collect()),
            SqlValue::Uuid(v) => JsonValue::String(v.to_string()),
            SqlValue::Date(v) => JsonValue::String(v.to_string()),
            SqlValue::Timestamp(v) => JsonValue::String(v.to_string()),
            SqlValue::TimestampTz(v) => {
                JsonValue::String(v.to_rfc3339_opts(SecondsFormat::Millis, true))
            }
            SqlValue::Json(v) => v.clone(),
            SqlValue::Decimal(v) => JsonValue::String(v.to_string()),
            SqlValue::Array(values) => JsonValue::Array(values.iter().map(SqlValue::to_json).collect()),
        }
    }

    /// Bind this value to a sqlx argument list.
    ///
    /// # Errors
    ///
    /// Returns error if binding fails (e.g., heterogeneous arrays that cannot
    /// be encoded).
    pub fn bind_to_arguments(&self, arguments: &mut PgArguments) -> Result<()> {
        let bound = match self {
            SqlValue::Null => arguments.add(UntypedNull),
            SqlValue::Bool(v) => arguments.add(*v),
            SqlValue::Int(v) => arguments.add(*v),
            SqlValue::BigInt(v) => arguments.add(*v),
            SqlValue::Double(v) => arguments.add(*v),
            SqlValue::Text(v) => arguments.add(v.clone()),
            SqlValue::Bytes(v) => arguments.add(v.clone()),
            SqlValue::Uuid(v) => arguments.add(*v),
            SqlValue::Date(v) => arguments.add(*v),
            SqlValue::Timestamp(v) => arguments.add(*v),
            SqlValue::TimestampTz(v) => arguments.add(*v),
            SqlValue::Json(v) => arguments.add(v.clone()),
            SqlValue::Decimal(v) => arguments.add(*v),
            SqlValue::Array(values) => bind_array(values, arguments),
        };
        bound.map_err(|e| {
            ConnectorError::Query(format!("Failed to bind {}: {}", self.pg_type_name(), e))
        })
    }
}

/// Binds homogeneous arrays as native PostgreSQL arrays; anything else is sent
/// as a JSON document.
fn bind_array(values: &[SqlValue], arguments: &mut PgArguments) -> std::result::Result<(), BoxDynError> {
    let element = values.iter().find(|v| !v.is_null());
    match element {
        Some(SqlValue::Text(_)) if values.iter().all(|v| matches!(v, SqlValue::Text(_) | SqlValue::Null)) => {
            let items: Vec<Option<String>> = values.iter().map(|v| v.as_str().map(str::to_string)).collect();
            arguments.add(items)
        }
        Some(SqlValue::Int(_) | SqlValue::BigInt(_))
            if values.iter().all(|v| matches!(v, SqlValue::Int(_) | SqlValue::BigInt(_) | SqlValue::Null)) =>
        {
            let items: Vec<Option<i64>> = values.iter().map(SqlValue::as_i64).collect();
            arguments.add(items)
        }
        Some(SqlValue::Double(_)) if values.iter().all(|v| matches!(v, SqlValue::Double(_) | SqlValue::Null)) => {
            let items: Vec<Option<f64>> = values
                .iter()
                .map(|v| match v {
                    SqlValue::Double(d) => Some(*d),
                    _ => None,
                })
                .collect();
            arguments.add(items)
        }
        Some(SqlValue::Bool(_)) if values.iter().all(|v| matches!(v, SqlValue::Bool(_) | SqlValue::Null)) => {
            let items: Vec<Option<bool>> = values.iter().map(SqlValue::as_bool).collect();
            arguments.add(items)
        }
        None if values.is_empty() => arguments.add(Vec::<String>::new()),
        _ => arguments.add(SqlValue::Array(values.to_vec()).to_json()),
    }
}

/// NULL parameter declared with the unspecified type oid, so the server picks
/// the type from the surrounding expression instead of rejecting e.g.
/// `integer = text`.
struct UntypedNull;

impl Type<Postgres> for UntypedNull {
    fn type_info() -> PgTypeInfo {
        PgTypeInfo::with_oid(Oid(0))
    }
}

impl<'q> Encode<'q, Postgres> for UntypedNull {
    fn encode_by_ref(&self, _buf: &mut PgArgumentBuffer) -> std::result::Result<IsNull, BoxDynError> {
        Ok(IsNull::Yes)
    }
}

/// Builds sqlx arguments for an ordered parameter list.
pub fn build_arguments(params: &[SqlValue]) -> Result<PgArguments> {
    let mut arguments = PgArguments::default();
    for value in params {
        value.bind_to_arguments(&mut arguments)?;
    }
    Ok(arguments)
}

fn cell<'r, T>(row: &'r PgRow, idx: usize, column: &str, label: &str) -> Result<Option<T>>
where
    T: Decode<'r, Postgres> + Type<Postgres>,
{
    row.try_get::<Option<T>, _>(idx).map_err(|e| {
        ConnectorError::Deserialization(format!(
            "Failed to extract {} from column '{}': {}",
            label, column, e
        ))
    })
}

/// Reads a cell without a typed decoder. Text-format values are taken as
/// they are; binary ones go through `binary`.
fn raw_cell<F>(row: &PgRow, idx: usize, column: &str, binary: F) -> Result<Option<SqlValue>>
where
    F: FnOnce(&[u8]) -> Option<SqlValue>,
{
    let raw = row.try_get_raw(idx)?;
    if raw.is_null() {
        return Ok(None);
    }
    let undecodable = |e: BoxDynError| {
        ConnectorError::Deserialization(format!("Failed to read column '{}': {}", column, e))
    };
    match raw.format() {
        PgValueFormat::Text => Ok(Some(SqlValue::Text(raw.as_str().map_err(undecodable)?.to_string()))),
        PgValueFormat::Binary => {
            let bytes = raw.as_bytes().map_err(undecodable)?;
            binary(bytes).map(Some).ok_or_else(|| {
                ConnectorError::Deserialization(format!("Unexpected binary value in column '{}'", column))
            })
        }
    }
}

/// Convert a `PgRow` into a [`Row`] of column name -> [`SqlValue`].
///
/// Types without a dedicated mapping are read as text, or as bytes when the
/// binary form is not UTF-8. POINT becomes its `(x,y)` text form.
pub fn decode_row(row: &PgRow) -> Result<Row> {
    let mut out = Row::new();

    for (idx, column) in row.columns().iter().enumerate() {
        let name = column.name();
        let type_name = column.type_info().name();

        let value = match type_name {
            "BOOL" => cell::<bool>(row, idx, name, type_name)?.map(SqlValue::Bool),
            "INT2" => cell::<i16>(row, idx, name, type_name)?.map(|v| SqlValue::Int(i32::from(v))),
            "INT4" => cell::<i32>(row, idx, name, type_name)?.map(SqlValue::Int),
            "INT8" => cell::<i64>(row, idx, name, type_name)?.map(SqlValue::BigInt),
            "FLOAT4" => cell::<f32>(row, idx, name, type_name)?.map(|v| SqlValue::Double(f64::from(v))),
            "FLOAT8" => cell::<f64>(row, idx, name, type_name)?.map(SqlValue::Double),
            "NUMERIC" => cell::<Decimal>(row, idx, name, type_name)?.map(SqlValue::Decimal),
            "TEXT" | "VARCHAR" | "BPCHAR" | "CHAR" | "NAME" => {
                cell::<String>(row, idx, name, type_name)?.map(SqlValue::Text)
            }
            "TEXT[]" | "VARCHAR[]" | "NAME[]" => cell::<Vec<Option<String>>>(row, idx, name, type_name)?
                .map(|items| {
                    SqlValue::Array(
                        items
                            .into_iter()
                            .map(|v| v.map(SqlValue::Text).unwrap_or(SqlValue::Null))
                            .collect(),
                    )
                }),
            "INT4[]" | "INT8[]" => cell::<Vec<Option<i64>>>(row, idx, name, type_name)?.map(|items| {
                SqlValue::Array(
                    items
                        .into_iter()
                        .map(|v| v.map(SqlValue::BigInt).unwrap_or(SqlValue::Null))
                        .collect(),
                )
            }),
            "BYTEA" => cell::<Vec<u8>>(row, idx, name, type_name)?.map(SqlValue::Bytes),
            "UUID" => cell::<Uuid>(row, idx, name, type_name)?.map(SqlValue::Uuid),
            "DATE" => cell::<NaiveDate>(row, idx, name, type_name)?.map(SqlValue::Date),
            "TIMESTAMP" => cell::<NaiveDateTime>(row, idx, name, type_name)?.map(SqlValue::Timestamp),
            "TIMESTAMPTZ" => cell::<DateTime<Utc>>(row, idx, name, type_name)?.map(SqlValue::TimestampTz),
            "JSON" | "JSONB" => cell::<JsonValue>(row, idx, name, type_name)?.map(SqlValue::Json),
            "POINT" => raw_cell(row, idx, name, |bytes| {
                if bytes.len() != 16 {
                    return None;
                }
                let x = f64::from_be_bytes(bytes[0..8].try_into().ok()?);
                let y = f64::from_be_bytes(bytes[8..16].try_into().ok()?);
                Some(SqlValue::Text(format!("({},{})", x, y)))
            })?,
            _ => raw_cell(row, idx, name, |bytes| {
                Some(match std::str::from_utf8(bytes) {
                    Ok(text) => SqlValue::Text(text.to_string()),
                    Err(_) => SqlValue::Bytes(bytes.to_vec()),
                })
            })?,
        };

        out.insert(name, value.unwrap_or(SqlValue::Null));
    }

    Ok(out)
}
