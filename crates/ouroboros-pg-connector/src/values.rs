//! Conversion between caller JSON values and column parameters.

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde_json::Value as JsonValue;

use crate::model::{ModelDefinition, PropertyDefinition};
use crate::typemap::{declared_native_type, PropertyType};
use crate::{ConnectorError, Result, Row, SqlValue};

/// Cast appended to placeholders for columns whose values travel as text.
pub fn placeholder_cast(property: &PropertyDefinition) -> Option<&'static str> {
    if declared_native_type(property) == "POINT" {
        Some("point")
    } else {
        None
    }
}

fn stores_native_json(property: &PropertyDefinition) -> bool {
    matches!(
        declared_native_type(property).as_str(),
        "JSON" | "JSONB"
    )
}

fn stores_native_array(property: &PropertyDefinition) -> bool {
    declared_native_type(property).ends_with("[]")
}

/// Coerces a caller value into the parameter for `property`'s column.
///
/// # Errors
///
/// Returns [`ConnectorError::Validation`] when the value cannot represent the
/// property type (e.g. `"abc"` for a Number).
pub fn to_column_value(property: &PropertyDefinition, value: &JsonValue) -> Result<SqlValue> {
    if value.is_null() {
        return Ok(SqlValue::Null);
    }

    if stores_native_array(property) {
        return match value {
            JsonValue::Array(items) => Ok(SqlValue::Array(items.iter().map(scalar_value).collect())),
            other => Ok(SqlValue::Array(vec![scalar_value(other)])),
        };
    }
    if stores_native_json(property) {
        return Ok(SqlValue::Json(value.clone()));
    }

    match property.property_type() {
        PropertyType::Number => to_number(value),
        PropertyType::Boolean => to_bool(value),
        PropertyType::Date | PropertyType::Timestamp => to_timestamp(value),
        PropertyType::GeoPoint | PropertyType::Point => to_point(value),
        PropertyType::Binary => to_bytes(value),
        PropertyType::Json | PropertyType::Object | PropertyType::Array => {
            Ok(SqlValue::Text(serde_json::to_string(value)?))
        }
        PropertyType::String | PropertyType::Text => Ok(to_text(value)),
    }
}

/// Parameter for a scalar with no column type to go by.
pub fn scalar_value(value: &JsonValue) -> SqlValue {
    match value {
        JsonValue::Null => SqlValue::Null,
        JsonValue::Bool(b) => SqlValue::Bool(*b),
        JsonValue::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::BigInt(i),
            None => SqlValue::Double(n.as_f64().unwrap_or(f64::NAN)),
        },
        JsonValue::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Json(other.clone()),
    }
}

/// Text form of any value, used for JSON path comparisons.
pub fn to_text(value: &JsonValue) -> SqlValue {
    match value {
        JsonValue::Null => SqlValue::Null,
        JsonValue::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

fn to_number(value: &JsonValue) -> Result<SqlValue> {
    match value {
        JsonValue::Number(n) => Ok(match n.as_i64() {
            Some(i) => SqlValue::BigInt(i),
            None => SqlValue::Double(n.as_f64().unwrap_or(f64::NAN)),
        }),
        JsonValue::Bool(b) => Ok(SqlValue::BigInt(i64::from(*b))),
        JsonValue::String(s) => {
            let s = s.trim();
            if let Ok(i) = s.parse::<i64>() {
                Ok(SqlValue::BigInt(i))
            } else if let Ok(f) = s.parse::<f64>() {
                Ok(SqlValue::Double(f))
            } else {
                Err(ConnectorError::Validation(format!("'{}' is not a number", s)))
            }
        }
        other => Err(ConnectorError::Validation(format!("{} is not a number", other))),
    }
}

fn to_bool(value: &JsonValue) -> Result<SqlValue> {
    match value {
        JsonValue::Bool(b) => Ok(SqlValue::Bool(*b)),
        JsonValue::Number(n) => Ok(SqlValue::Bool(n.as_f64().map_or(false, |f| f != 0.0))),
        JsonValue::String(s) => match s.to_ascii_lowercase().as_str() {
            "true" | "t" | "1" | "yes" => Ok(SqlValue::Bool(true)),
            "false" | "f" | "0" | "no" => Ok(SqlValue::Bool(false)),
            _ => Err(ConnectorError::Validation(format!("'{}' is not a boolean", s))),
        },
        other => Err(ConnectorError::Validation(format!("{} is not a boolean", other))),
    }
}

fn to_timestamp(value: &JsonValue) -> Result<SqlValue> {
    match value {
        JsonValue::String(s) => {
            if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
                return Ok(SqlValue::TimestampTz(ts.with_timezone(&Utc)));
            }
            if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
                if let Some(midnight) = date.and_hms_opt(0, 0, 0) {
                    return Ok(SqlValue::TimestampTz(Utc.from_utc_datetime(&midnight)));
                }
            }
            Err(ConnectorError::Validation(format!("'{}' is not a valid date", s)))
        }
        // milliseconds since the epoch
        JsonValue::Number(n) => n
            .as_i64()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
            .map(SqlValue::TimestampTz)
            .ok_or_else(|| ConnectorError::Validation(format!("{} is not a valid timestamp", n))),
        other => Err(ConnectorError::Validation(format!("{} is not a valid date", other))),
    }
}

fn to_point(value: &JsonValue) -> Result<SqlValue> {
    match value {
        JsonValue::Object(obj) => {
            let lat = obj.get("lat").and_then(JsonValue::as_f64);
            let lng = obj.get("lng").and_then(JsonValue::as_f64);
            match (lat, lng) {
                (Some(lat), Some(lng)) => Ok(SqlValue::Text(format!("({},{})", lng, lat))),
                _ => Err(ConnectorError::Validation(format!(
                    "GeoPoint requires numeric lat and lng, got {}",
                    value
                ))),
            }
        }
        JsonValue::String(s) => Ok(SqlValue::Text(s.clone())),
        other => Err(ConnectorError::Validation(format!("{} is not a GeoPoint", other))),
    }
}

fn to_bytes(value: &JsonValue) -> Result<SqlValue> {
    match value {
        JsonValue::String(s) => Ok(SqlValue::Bytes(s.as_bytes().to_vec())),
        JsonValue::Array(items) => items
            .iter()
            .map(|v| {
                v.as_u64()
                    .and_then(|b| u8::try_from(b).ok())
                    .ok_or_else(|| ConnectorError::Validation(format!("{} is not a byte", v)))
            })
            .collect::<Result<Vec<u8>>>()
            .map(SqlValue::Bytes),
        other => Err(ConnectorError::Validation(format!("{} is not binary data", other))),
    }
}

fn from_column_value(property: &PropertyDefinition, value: &SqlValue) -> JsonValue {
    match (property.property_type(), value) {
        (PropertyType::GeoPoint | PropertyType::Point, SqlValue::Text(text)) => {
            parse_point(text).unwrap_or_else(|| JsonValue::String(text.clone()))
        }
        (PropertyType::Json | PropertyType::Object | PropertyType::Array, SqlValue::Text(text)) => {
            serde_json::from_str(text).unwrap_or_else(|_| JsonValue::String(text.clone()))
        }
        (PropertyType::Boolean, SqlValue::Text(text)) => match text.as_str() {
            "t" | "true" => JsonValue::Bool(true),
            "f" | "false" => JsonValue::Bool(false),
            _ => JsonValue::String(text.clone()),
        },
        _ => value.to_json(),
    }
}

/// `(x,y)` to `{"lat": y, "lng": x}`.
fn parse_point(text: &str) -> Option<JsonValue> {
    let inner = text.trim().strip_prefix('(')?.strip_suffix(')')?;
    let (x, y) = inner.split_once(',')?;
    let lng: f64 = x.trim().parse().ok()?;
    let lat: f64 = y.trim().parse().ok()?;
    Some(serde_json::json!({ "lat": lat, "lng": lng }))
}

/// Maps a result row back to a property-keyed JSON object.
///
/// Columns that belong to no live property are dropped.
pub fn from_row(model: &ModelDefinition, row: &Row) -> JsonValue {
    let mut out = serde_json::Map::new();
    for (column, value) in row.iter() {
        if let Some((name, property)) = model.property_for_column(column) {
            out.insert(name.to_string(), from_column_value(property, value));
        }
    }
    JsonValue::Object(out)
}
