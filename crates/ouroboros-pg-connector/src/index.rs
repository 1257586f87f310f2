//! Declared index normalization.
//!
//! Index declarations arrive in several shorthand forms. They are turned into
//! one [`IndexSpec`] as soon as a model is built, so the synchronizer only
//! ever compares canonical values.

use serde::de::{Deserializer, Error as _};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::fmt;

use crate::{ConnectorError, Result};

/// Index method PostgreSQL uses when none is given.
pub const DEFAULT_INDEX_METHOD: &str = "btree";

/// Key direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    pub fn to_sql(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }

    /// Parses `ASC` / `DESC` in any case.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ASC" => Some(SortDirection::Asc),
            "DESC" => Some(SortDirection::Desc),
            _ => None,
        }
    }
}

impl fmt::Display for SortDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_sql())
    }
}

/// One indexed column and its direction.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IndexKey {
    pub column: String,
    pub direction: SortDirection,
}

impl IndexKey {
    pub fn new(column: impl Into<String>, direction: SortDirection) -> Self {
        Self { column: column.into(), direction }
    }

    pub fn asc(column: impl Into<String>) -> Self {
        Self::new(column, SortDirection::Asc)
    }

    pub fn desc(column: impl Into<String>) -> Self {
        Self::new(column, SortDirection::Desc)
    }
}

/// Options shared by property-level and named indexes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IndexOptions {
    pub unique: bool,
    /// Access method (`btree`, `hash`, `gin`, ...).
    pub method: Option<String>,
    /// Free-form kind; `UNIQUE` implies `unique`.
    pub kind: Option<String>,
}

impl IndexOptions {
    pub fn unique() -> Self {
        Self { unique: true, ..Self::default() }
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    /// Effective access method, lower-cased.
    pub fn method_or_default(&self) -> String {
        self.method
            .as_deref()
            .map(|m| m.to_ascii_lowercase())
            .unwrap_or_else(|| DEFAULT_INDEX_METHOD.to_string())
    }

    fn from_object(obj: &serde_json::Map<String, JsonValue>) -> Result<Self> {
        let mut options = IndexOptions::default();
        if let Some(unique) = obj.get("unique") {
            options.unique = unique.as_bool().ok_or_else(|| {
                ConnectorError::InvalidIndex(format!("'unique' must be a boolean, got {}", unique))
            })?;
        }
        for key in ["type", "method", "using"] {
            if let Some(method) = obj.get(key) {
                let method = method.as_str().ok_or_else(|| {
                    ConnectorError::InvalidIndex(format!("'{}' must be a string, got {}", key, method))
                })?;
                options.method = Some(method.to_string());
            }
        }
        if let Some(kind) = obj.get("kind").and_then(JsonValue::as_str) {
            if kind.eq_ignore_ascii_case("unique") {
                options.unique = true;
            }
            options.kind = Some(kind.to_string());
        }
        Ok(options)
    }
}

/// Canonical declared index: ordered keys plus options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSpec {
    pub keys: Vec<IndexKey>,
    pub options: IndexOptions,
}

impl IndexSpec {
    pub fn new(keys: Vec<IndexKey>) -> Self {
        Self { keys, options: IndexOptions::default() }
    }

    pub fn with_options(mut self, options: IndexOptions) -> Self {
        self.options = options;
        self
    }

    /// Normalizes any accepted shorthand:
    ///
    /// - `"a, b DESC"`
    /// - `{"a": 1, "b": -1}`
    /// - `["a", "b DESC"]`
    /// - `{"keys": <any of the above>, "options": {"unique": true, "type": "hash"}}`
    ///   (`columns` is accepted for `keys`; options may also sit at top level)
    ///
    /// # Errors
    ///
    /// Returns [`ConnectorError::InvalidIndex`] for anything else, for
    /// directions other than ±1 / ASC / DESC, and for empty key lists.
    pub fn from_json(value: &JsonValue) -> Result<Self> {
        let spec = match value {
            JsonValue::String(s) => IndexSpec::new(parse_key_list(s)?),
            JsonValue::Array(items) => IndexSpec::new(parse_key_array(items)?),
            JsonValue::Object(obj) => {
                let keys = obj.get("keys").or_else(|| obj.get("columns"));
                match keys {
                    Some(keys) => {
                        let mut options = IndexOptions::from_object(obj)?;
                        if let Some(nested) = obj.get("options") {
                            let nested = nested.as_object().ok_or_else(|| {
                                ConnectorError::InvalidIndex(format!(
                                    "'options' must be an object, got {}",
                                    nested
                                ))
                            })?;
                            let nested = IndexOptions::from_object(nested)?;
                            options.unique |= nested.unique;
                            options.method = nested.method.or(options.method);
                            options.kind = nested.kind.or(options.kind);
                        }
                        IndexSpec::new(parse_keys(keys)?).with_options(options)
                    }
                    None => IndexSpec::new(parse_key_map(obj)?),
                }
            }
            other => {
                return Err(ConnectorError::InvalidIndex(format!(
                    "unsupported index definition {}",
                    other
                )))
            }
        };

        if spec.keys.is_empty() {
            return Err(ConnectorError::InvalidIndex(
                "index declares no keys".to_string(),
            ));
        }
        Ok(spec)
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.keys.iter().map(|k| k.column.as_str())
    }
}

fn parse_keys(value: &JsonValue) -> Result<Vec<IndexKey>> {
    match value {
        JsonValue::String(s) => parse_key_list(s),
        JsonValue::Array(items) => parse_key_array(items),
        JsonValue::Object(obj) => parse_key_map(obj),
        other => Err(ConnectorError::InvalidIndex(format!(
            "unsupported index keys {}",
            other
        ))),
    }
}

/// `"a"`, `"a DESC"`.
fn parse_key_token(token: &str) -> Result<IndexKey> {
    let mut parts = token.split_whitespace();
    let column = parts
        .next()
        .ok_or_else(|| ConnectorError::InvalidIndex(format!("empty key in '{}'", token)))?;
    let direction = match parts.next() {
        None => SortDirection::Asc,
        Some(d) => SortDirection::parse(d).ok_or_else(|| {
            ConnectorError::InvalidIndex(format!("key '{}' has direction {}", column, d))
        })?,
    };
    if parts.next().is_some() {
        return Err(ConnectorError::InvalidIndex(format!("malformed key '{}'", token)));
    }
    Ok(IndexKey::new(column, direction))
}

fn parse_key_list(s: &str) -> Result<Vec<IndexKey>> {
    s.split(',')
        .filter(|t| !t.trim().is_empty())
        .map(parse_key_token)
        .collect()
}

fn parse_key_array(items: &[JsonValue]) -> Result<Vec<IndexKey>> {
    items
        .iter()
        .map(|item| match item {
            JsonValue::String(s) => parse_key_token(s),
            other => Err(ConnectorError::InvalidIndex(format!(
                "index key must be a string, got {}",
                other
            ))),
        })
        .collect()
}

fn parse_key_map(obj: &serde_json::Map<String, JsonValue>) -> Result<Vec<IndexKey>> {
    obj.iter()
        .map(|(column, direction)| {
            let direction = match direction.as_i64() {
                Some(1) => SortDirection::Asc,
                Some(-1) => SortDirection::Desc,
                _ => match direction.as_str().and_then(SortDirection::parse) {
                    Some(d) => d,
                    None => {
                        return Err(ConnectorError::InvalidIndex(format!(
                            "key '{}' has direction {}",
                            column, direction
                        )))
                    }
                },
            };
            Ok(IndexKey::new(column.clone(), direction))
        })
        .collect()
}

/// Parses a property-level `index` annotation: `true`, `false`, or an options
/// object such as `{"unique": true, "type": "hash"}`.
pub fn property_index_from_json(value: &JsonValue) -> Result<Option<IndexOptions>> {
    match value {
        JsonValue::Null | JsonValue::Bool(false) => Ok(None),
        JsonValue::Bool(true) => Ok(Some(IndexOptions::default())),
        JsonValue::Object(obj) => IndexOptions::from_object(obj).map(Some),
        other => Err(ConnectorError::InvalidIndex(format!(
            "unsupported property index annotation {}",
            other
        ))),
    }
}

pub(crate) fn deserialize_property_index<'de, D>(
    deserializer: D,
) -> std::result::Result<Option<IndexOptions>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = JsonValue::deserialize(deserializer)?;
    property_index_from_json(&value).map_err(D::Error::custom)
}
