//! Mapping between ORM property types and PostgreSQL column types.
//!
//! Native type strings are kept in one canonical spelling (upper case, aliases
//! folded, `VARCHAR(n)` / `NUMERIC(p,s)` arguments attached) so a declared
//! type can be compared with an introspected one by plain string equality.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::model::PropertyDefinition;
use crate::ConnectorError;

/// Length used for string-like columns that do not declare one.
pub const DEFAULT_VARCHAR_LENGTH: u32 = 1024;

/// Abstract property types understood by the ORM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum PropertyType {
    String,
    Text,
    Json,
    Object,
    Array,
    Number,
    Boolean,
    Date,
    Timestamp,
    GeoPoint,
    Point,
    Binary,
}

impl PropertyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PropertyType::String => "String",
            PropertyType::Text => "Text",
            PropertyType::Json => "JSON",
            PropertyType::Object => "Object",
            PropertyType::Array => "Array",
            PropertyType::Number => "Number",
            PropertyType::Boolean => "Boolean",
            PropertyType::Date => "Date",
            PropertyType::Timestamp => "Timestamp",
            PropertyType::GeoPoint => "GeoPoint",
            PropertyType::Point => "Point",
            PropertyType::Binary => "Binary",
        }
    }

    /// Types stored as serialized JSON text unless the column is `json`/`jsonb`.
    pub fn is_structured(&self) -> bool {
        matches!(self, PropertyType::Json | PropertyType::Object | PropertyType::Array)
    }

    pub fn is_geo(&self) -> bool {
        matches!(self, PropertyType::GeoPoint | PropertyType::Point)
    }
}

impl fmt::Display for PropertyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PropertyType {
    type Err = ConnectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "string" => Ok(PropertyType::String),
            "text" => Ok(PropertyType::Text),
            "json" => Ok(PropertyType::Json),
            "object" => Ok(PropertyType::Object),
            "array" => Ok(PropertyType::Array),
            "number" => Ok(PropertyType::Number),
            "boolean" => Ok(PropertyType::Boolean),
            "date" => Ok(PropertyType::Date),
            "timestamp" => Ok(PropertyType::Timestamp),
            "geopoint" => Ok(PropertyType::GeoPoint),
            "point" => Ok(PropertyType::Point),
            "binary" | "buffer" => Ok(PropertyType::Binary),
            _ => Err(ConnectorError::Validation(format!("Unknown property type: {}", s))),
        }
    }
}

impl TryFrom<String> for PropertyType {
    type Error = ConnectorError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PropertyType> for String {
    fn from(value: PropertyType) -> Self {
        value.as_str().to_string()
    }
}

/// Default column type for an abstract type.
pub fn to_native_type(property_type: PropertyType, length: Option<u32>) -> String {
    match property_type {
        PropertyType::String
        | PropertyType::Json
        | PropertyType::Text
        | PropertyType::Object
        | PropertyType::Array => {
            format!("VARCHAR({})", length.unwrap_or(DEFAULT_VARCHAR_LENGTH))
        }
        PropertyType::Number => "INTEGER".to_string(),
        PropertyType::Date | PropertyType::Timestamp => "TIMESTAMP WITH TIME ZONE".to_string(),
        PropertyType::GeoPoint | PropertyType::Point => "POINT".to_string(),
        PropertyType::Boolean => "BOOLEAN".to_string(),
        PropertyType::Binary => "BYTEA".to_string(),
    }
}

/// Abstract type for an introspected column type. Unrecognized types are
/// treated as strings.
pub fn to_abstract_type(native_type: &str) -> PropertyType {
    let upper = native_type.trim().to_ascii_uppercase();
    let base = upper.split('(').next().unwrap_or("").trim();

    if base.ends_with("[]") {
        return PropertyType::Array;
    }
    match base {
        "VARCHAR" | "CHARACTER" | "CHARACTER VARYING" | "TEXT" | "CHAR" | "BPCHAR" => {
            PropertyType::String
        }
        "BYTEA" => PropertyType::Binary,
        "SMALLINT" | "INTEGER" | "INT" | "INT2" | "INT4" | "INT8" | "BIGINT" | "DECIMAL"
        | "NUMERIC" | "REAL" | "FLOAT4" | "FLOAT8" | "DOUBLE" | "DOUBLE PRECISION" | "SMALLSERIAL"
        | "SERIAL" | "BIGSERIAL" => PropertyType::Number,
        "POINT" => PropertyType::GeoPoint,
        "BOOLEAN" | "BOOL" => PropertyType::Boolean,
        b if b == "DATE" || b.starts_with("TIME") => PropertyType::Date,
        _ => PropertyType::String,
    }
}

/// Column type a property declares, in canonical spelling.
///
/// An explicit native type wins over the abstract mapping; a generated
/// identifier becomes `SERIAL`.
pub fn declared_native_type(property: &PropertyDefinition) -> String {
    if property.is_id() && property.is_generated() {
        return "SERIAL".to_string();
    }
    match property.data_type() {
        Some(data_type) => canonical_native_type(
            data_type,
            property.length(),
            property.precision(),
            property.scale(),
        ),
        None => to_native_type(property.property_type(), property.length()),
    }
}

fn fold_alias(base: &str) -> &str {
    match base {
        "INT" | "INT4" | "INTEGER" => "INTEGER",
        "INT2" | "SMALLINT" => "SMALLINT",
        "INT8" | "BIGINT" => "BIGINT",
        "FLOAT4" | "REAL" => "REAL",
        "FLOAT" | "FLOAT8" | "DOUBLE" | "DOUBLE PRECISION" => "DOUBLE PRECISION",
        "BOOL" | "BOOLEAN" => "BOOLEAN",
        "VARCHAR" | "CHARACTER VARYING" => "VARCHAR",
        "CHAR" | "CHARACTER" | "BPCHAR" => "CHAR",
        "DECIMAL" | "NUMERIC" => "NUMERIC",
        "TIMESTAMPTZ" | "TIMESTAMP WITH TIME ZONE" => "TIMESTAMP WITH TIME ZONE",
        "TIMESTAMP" | "TIMESTAMP WITHOUT TIME ZONE" => "TIMESTAMP WITHOUT TIME ZONE",
        "TIMETZ" | "TIME WITH TIME ZONE" => "TIME WITH TIME ZONE",
        "TIME" | "TIME WITHOUT TIME ZONE" => "TIME WITHOUT TIME ZONE",
        "SMALLSERIAL" | "SERIAL2" => "SMALLSERIAL",
        "SERIAL" | "SERIAL4" => "SERIAL",
        "BIGSERIAL" | "SERIAL8" => "BIGSERIAL",
        other => other,
    }
}

/// Canonical spelling of a native type.
///
/// Arguments written inside the type (`varchar(60)`) win over the separate
/// `length` / `precision` / `scale` values.
pub fn canonical_native_type(
    raw: &str,
    length: Option<u32>,
    precision: Option<u32>,
    scale: Option<u32>,
) -> String {
    let upper = raw.trim().to_ascii_uppercase();

    if let Some(element) = upper.strip_suffix("[]") {
        return format!("{}[]", canonical_native_type(element, None, None, None));
    }

    let (base, args) = match upper.find('(') {
        Some(open) => {
            let close = upper.rfind(')').unwrap_or(upper.len());
            let args: String = upper[open + 1..close.max(open + 1)]
                .chars()
                .filter(|c| !c.is_whitespace())
                .collect();
            (upper[..open].trim().to_string(), Some(args))
        }
        None => (upper.clone(), None),
    };
    let base = fold_alias(&base);

    match base {
        "VARCHAR" => match (args, length) {
            (Some(a), _) => format!("VARCHAR({})", a),
            (None, Some(n)) => format!("VARCHAR({})", n),
            (None, None) => "VARCHAR".to_string(),
        },
        "CHAR" => match (args, length) {
            (Some(a), _) => format!("CHAR({})", a),
            (None, Some(n)) => format!("CHAR({})", n),
            (None, None) => "CHAR(1)".to_string(),
        },
        "NUMERIC" => match (args, precision) {
            (Some(a), _) if a.contains(',') => format!("NUMERIC({})", a),
            (Some(a), _) => format!("NUMERIC({},0)", a),
            (None, Some(p)) => format!("NUMERIC({},{})", p, scale.unwrap_or(0)),
            (None, None) => "NUMERIC".to_string(),
        },
        other => other.to_string(),
    }
}

/// Whether a canonical type is one of the serial pseudo-types. Serial
/// columns are always NOT NULL.
pub fn is_serial_type(native_type: &str) -> bool {
    matches!(native_type, "SMALLSERIAL" | "SERIAL" | "BIGSERIAL")
}

/// A canonical declared type as the catalog reports it back: serial
/// pseudo-types become their integer type, and array elements lose their
/// type modifiers (`VARCHAR(30)[]` is stored as `VARCHAR[]`).
pub fn stored_native_type(native_type: &str) -> String {
    if let Some(element) = native_type.strip_suffix("[]") {
        let base = element.split('(').next().unwrap_or(element);
        return format!("{}[]", canonical_native_type(base, None, None, None));
    }
    match native_type {
        "SMALLSERIAL" => "SMALLINT",
        "SERIAL" => "INTEGER",
        "BIGSERIAL" => "BIGINT",
        other => other,
    }
    .to_string()
}

/// Canonical native type of an `information_schema.columns` row.
pub fn catalog_native_type(
    data_type: &str,
    udt_name: &str,
    character_maximum_length: Option<u32>,
    numeric_precision: Option<u32>,
    numeric_scale: Option<u32>,
) -> String {
    match data_type.to_ascii_lowercase().as_str() {
        "array" => {
            let element = udt_name.strip_prefix('_').unwrap_or(udt_name);
            format!("{}[]", canonical_native_type(element, None, None, None))
        }
        "user-defined" => udt_name.to_ascii_uppercase(),
        "numeric" => canonical_native_type("NUMERIC", None, numeric_precision, numeric_scale),
        "character varying" | "character" => {
            canonical_native_type(data_type, character_maximum_length, None, None)
        }
        other => canonical_native_type(other, None, None, None),
    }
}
