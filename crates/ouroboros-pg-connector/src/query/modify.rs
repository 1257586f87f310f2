//! INSERT, UPDATE and DELETE statements.

use serde_json::{Map, Value as JsonValue};

use super::filter::FilterTree;
use super::fragment::ParameterizedFragment;
use super::where_clause::{build_where, Compiled};
use crate::escape::escape_identifier;
use crate::model::ModelDefinition;
use crate::values::{placeholder_cast, to_column_value};
use crate::{ConnectorError, Result};

fn returning_ids(model: &ModelDefinition) -> String {
    let ids = model.id_columns();
    if ids.is_empty() {
        return String::new();
    }
    let quoted: Vec<String> = ids.iter().map(|c| escape_identifier(c)).collect();
    format!(" RETURNING {}", quoted.join(","))
}

/// `INSERT INTO ... (<cols>) VALUES (...) RETURNING <ids>`.
///
/// Keys naming no live property are ignored, as are missing or null values
/// for generated identifiers. With nothing left the row is inserted with
/// `DEFAULT VALUES`.
pub fn build_insert(model: &ModelDefinition, data: &Map<String, JsonValue>) -> Result<ParameterizedFragment> {
    let mut columns = Vec::new();
    let mut values = ParameterizedFragment::empty();

    for (name, column, property) in model.columns() {
        let Some(value) = data.get(name) else {
            continue;
        };
        if property.is_generated() && value.is_null() {
            continue;
        }
        if !columns.is_empty() {
            values.push_sql(",");
        }
        values.push_param_cast(to_column_value(property, value)?, placeholder_cast(property));
        columns.push(escape_identifier(&column));
    }

    let table = model.qualified_table();
    let returning = returning_ids(model);
    if columns.is_empty() {
        return Ok(ParameterizedFragment::raw(format!(
            "INSERT INTO {} DEFAULT VALUES{}",
            table, returning
        )));
    }

    Ok(ParameterizedFragment::raw(format!(
        "INSERT INTO {} ({}) VALUES (",
        table,
        columns.join(",")
    ))
    .merge(values)
    .merge(ParameterizedFragment::raw(format!("){}", returning))))
}

/// `UPDATE ... SET "a"=$1,... [WHERE]`. Identifier properties are never
/// updated.
///
/// # Errors
///
/// Returns [`ConnectorError::Query`] when `data` sets no updatable property.
pub fn build_update(
    model: &ModelDefinition,
    tree: Option<&FilterTree>,
    data: &Map<String, JsonValue>,
) -> Result<Compiled> {
    let mut assignments = ParameterizedFragment::empty();
    for (name, column, property) in model.columns() {
        if property.is_id() {
            continue;
        }
        let Some(value) = data.get(name) else {
            continue;
        };
        if !assignments.is_empty() {
            assignments.push_sql(",");
        }
        assignments.push_sql(&format!("{}=", escape_identifier(&column)));
        assignments.push_param_cast(to_column_value(property, value)?, placeholder_cast(property));
    }

    if assignments.is_empty() {
        return Err(ConnectorError::Query(format!(
            "Update on {} sets no known property",
            model.name()
        )));
    }

    let condition = build_where(model, tree)?;
    let fragment = ParameterizedFragment::raw(format!("UPDATE {} SET ", model.qualified_table()))
        .merge(assignments)
        .merge(condition.fragment);
    Ok(Compiled { fragment, warnings: condition.warnings })
}

/// `DELETE FROM ... [WHERE]`.
pub fn build_delete(model: &ModelDefinition, tree: Option<&FilterTree>) -> Result<Compiled> {
    let condition = build_where(model, tree)?;
    let fragment = ParameterizedFragment::raw(format!("DELETE FROM {}", model.qualified_table()))
        .merge(condition.fragment);
    Ok(Compiled { fragment, warnings: condition.warnings })
}
