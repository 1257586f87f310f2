//! SELECT and COUNT statements.

use super::filter::{FieldSelection, Filter};
use super::fragment::ParameterizedFragment;
use super::where_clause::{build_where, Compiled};
use crate::escape::escape_identifier;
use crate::model::ModelDefinition;
use crate::settings::IdSortPolicy;
use crate::typemap::PropertyType;
use crate::Result;

/// Quoted column list honoring `fields`. Unknown names are ignored; a
/// selection that leaves nothing falls back to every column.
fn select_columns(model: &ModelDefinition, fields: Option<&FieldSelection>) -> String {
    let keep = |name: &str| match fields {
        None => true,
        Some(FieldSelection::Include(list)) => list.iter().any(|f| f == name),
        Some(FieldSelection::Exclude(list)) => !list.iter().any(|f| f == name),
    };

    let mut columns: Vec<String> = model
        .columns()
        .filter(|(name, _, _)| keep(name))
        .map(|(_, column, _)| escape_identifier(&column))
        .collect();
    if columns.is_empty() {
        columns = model
            .columns()
            .map(|(_, column, _)| escape_identifier(&column))
            .collect();
    }
    columns.join(",")
}

/// Whether a query without explicit order gets `ORDER BY <id>`.
/// The model's setting wins over the connector's.
pub fn sorts_by_id(model: &ModelDefinition, connector_policy: IdSortPolicy) -> bool {
    let ids = model.id_properties();
    if ids.is_empty() {
        return false;
    }
    match model.default_id_sort().unwrap_or(connector_policy) {
        IdSortPolicy::Always => true,
        IdSortPolicy::Never => false,
        IdSortPolicy::NumericIdOnly => ids
            .iter()
            .all(|(_, def)| def.property_type() == PropertyType::Number),
    }
}

/// ` ORDER BY ...`, or empty.
fn build_order(model: &ModelDefinition, filter: &Filter, connector_policy: IdSortPolicy) -> String {
    let explicit: Vec<String> = filter
        .order
        .iter()
        .filter_map(|spec| {
            model
                .column_name(&spec.property)
                .map(|column| format!("{} {}", escape_identifier(&column), spec.direction))
        })
        .collect();

    if !explicit.is_empty() {
        return format!(" ORDER BY {}", explicit.join(","));
    }
    if filter.order.is_empty() && sorts_by_id(model, connector_policy) {
        let ids: Vec<String> = model.id_columns().iter().map(|c| escape_identifier(c)).collect();
        return format!(" ORDER BY {}", ids.join(","));
    }
    String::new()
}

fn build_pagination(filter: &Filter) -> String {
    let mut sql = String::new();
    if let Some(limit) = filter.limit {
        sql.push_str(&format!(" LIMIT {}", limit));
    }
    if let Some(offset) = filter.offset {
        sql.push_str(&format!(" OFFSET {}", offset));
    }
    sql
}

/// `SELECT <cols> FROM "<schema>"."<table>" [WHERE] [ORDER BY] [LIMIT] [OFFSET]`.
pub fn compile_select(
    model: &ModelDefinition,
    filter: &Filter,
    connector_policy: IdSortPolicy,
) -> Result<Compiled> {
    let head = format!(
        "SELECT {} FROM {}",
        select_columns(model, filter.fields.as_ref()),
        model.qualified_table()
    );
    let condition = build_where(model, filter.where_clause.as_ref())?;

    let mut tail = build_order(model, filter, connector_policy);
    tail.push_str(&build_pagination(filter));

    let fragment = ParameterizedFragment::raw(head)
        .merge(condition.fragment)
        .merge(ParameterizedFragment::raw(tail));
    Ok(Compiled { fragment, warnings: condition.warnings })
}

/// `SELECT count(*) AS "cnt" FROM ... [WHERE]`.
pub fn build_count(model: &ModelDefinition, filter: &Filter) -> Result<Compiled> {
    let condition = build_where(model, filter.where_clause.as_ref())?;
    let fragment = ParameterizedFragment::raw(format!(
        "SELECT count(*) AS \"cnt\" FROM {}",
        model.qualified_table()
    ))
    .merge(condition.fragment);
    Ok(Compiled { fragment, warnings: condition.warnings })
}
