//! Result rows.
//!
//! A [`Row`] keeps columns in the order the server returned them and offers
//! typed accessors used by the catalog readers.

use serde_json::Value as JsonValue;

use crate::{ConnectorError, Result, SqlValue};

/// Represents a single row from a PostgreSQL query result.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    columns: Vec<(String, SqlValue)>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a row from `(column, value)` pairs.
    pub fn from_pairs<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, SqlValue)>,
        S: Into<String>,
    {
        let mut row = Self::new();
        for (name, value) in pairs {
            row.insert(name, value);
        }
        row
    }

    /// Sets a column, replacing a previous value of the same name.
    pub fn insert(&mut self, name: impl Into<String>, value: SqlValue) {
        let name = name.into();
        match self.columns.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = value,
            None => self.columns.push((name, value)),
        }
    }

    /// Gets a value by column name.
    pub fn get(&self, column: &str) -> Option<&SqlValue> {
        self.columns.iter().find(|(n, _)| n == column).map(|(_, v)| v)
    }

    fn require(&self, column: &str) -> Result<&SqlValue> {
        self.get(column).ok_or_else(|| {
            ConnectorError::Deserialization(format!("Column '{}' not found in result set", column))
        })
    }

    /// Reads a non-null text column.
    pub fn get_str(&self, column: &str) -> Result<&str> {
        match self.require(column)? {
            SqlValue::Text(s) => Ok(s),
            other => Err(ConnectorError::Deserialization(format!(
                "Column '{}' is {}, expected TEXT",
                column,
                other.pg_type_name()
            ))),
        }
    }

    /// Reads a nullable text column.
    pub fn get_opt_str(&self, column: &str) -> Result<Option<&str>> {
        match self.require(column)? {
            SqlValue::Null => Ok(None),
            _ => self.get_str(column).map(Some),
        }
    }

    pub fn get_bool(&self, column: &str) -> Result<bool> {
        match self.require(column)? {
            SqlValue::Bool(b) => Ok(*b),
            other => Err(ConnectorError::Deserialization(format!(
                "Column '{}' is {}, expected BOOLEAN",
                column,
                other.pg_type_name()
            ))),
        }
    }

    /// Reads a nullable integer column of any width.
    pub fn get_opt_i64(&self, column: &str) -> Result<Option<i64>> {
        match self.require(column)? {
            SqlValue::Null => Ok(None),
            SqlValue::Int(v) => Ok(Some(i64::from(*v))),
            SqlValue::BigInt(v) => Ok(Some(*v)),
            other => Err(ConnectorError::Deserialization(format!(
                "Column '{}' is {}, expected an integer",
                column,
                other.pg_type_name()
            ))),
        }
    }

    /// Reads a text array column; NULL elements are skipped.
    pub fn get_str_array(&self, column: &str) -> Result<Vec<String>> {
        match self.require(column)? {
            SqlValue::Null => Ok(Vec::new()),
            SqlValue::Array(items) => Ok(items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()),
            other => Err(ConnectorError::Deserialization(format!(
                "Column '{}' is {}, expected TEXT[]",
                column,
                other.pg_type_name()
            ))),
        }
    }

    /// Reads an integer array column; NULL elements are skipped.
    pub fn get_i64_array(&self, column: &str) -> Result<Vec<i64>> {
        match self.require(column)? {
            SqlValue::Null => Ok(Vec::new()),
            SqlValue::Array(items) => Ok(items.iter().filter_map(SqlValue::as_i64).collect()),
            other => Err(ConnectorError::Deserialization(format!(
                "Column '{}' is {}, expected an integer array",
                column,
                other.pg_type_name()
            ))),
        }
    }

    /// Gets all column names.
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(n, _)| n.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &SqlValue)> {
        self.columns.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Converts row to a JSON object.
    pub fn to_json(&self) -> JsonValue {
        let map = self
            .columns
            .iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect::<serde_json::Map<_, _>>();
        JsonValue::Object(map)
    }
}
