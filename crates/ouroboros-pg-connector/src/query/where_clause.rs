//! WHERE clause compilation.
//!
//! Every caller value becomes a `$n` placeholder; only identifiers and JSON
//! path segments are written into the SQL text, both escaped.

use serde_json::Value as JsonValue;
use std::fmt;
use tracing::warn;

use super::filter::{FilterTree, Operator};
use super::fragment::ParameterizedFragment;
use crate::escape::{escape_identifier, escape_literal};
use crate::model::{ModelDefinition, PropertyDefinition};
use crate::typemap::canonical_native_type;
use crate::values::{placeholder_cast, scalar_value, to_column_value, to_text};
use crate::{ConnectorError, Result, SqlValue};

/// Escape clause appended to pattern matches.
const LIKE_ESCAPE: &str = " ESCAPE E'\\\\'";

/// Non-fatal condition found while compiling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileWarning {
    pub property: String,
    pub message: String,
}

impl fmt::Display for CompileWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.property, self.message)
    }
}

/// Compiled SQL plus any warnings raised on the way.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Compiled {
    pub fragment: ParameterizedFragment,
    pub warnings: Vec<CompileWarning>,
}

impl Compiled {
    pub fn sql(&self) -> &str {
        self.fragment.sql()
    }

    pub fn params(&self) -> &[SqlValue] {
        self.fragment.params()
    }
}

/// Where a leaf condition points.
enum Target<'m> {
    Column {
        sql: String,
        property: &'m PropertyDefinition,
    },
    /// `"col"->'a'->>'b'`; compared as text.
    JsonPath { sql: String },
}

impl Target<'_> {
    fn sql(&self) -> &str {
        match self {
            Target::Column { sql, .. } | Target::JsonPath { sql } => sql,
        }
    }

    fn coerce(&self, value: &JsonValue) -> Result<SqlValue> {
        match self {
            Target::Column { property, .. } => to_column_value(property, value),
            Target::JsonPath { .. } => Ok(to_text(value)),
        }
    }

    fn cast(&self) -> Option<&'static str> {
        match self {
            Target::Column { property, .. } => placeholder_cast(property),
            Target::JsonPath { .. } => None,
        }
    }

    fn push_value(&self, fragment: &mut ParameterizedFragment, value: &JsonValue) -> Result<()> {
        fragment.push_param_cast(self.coerce(value)?, self.cast());
        Ok(())
    }
}

/// Resolves a filter key to a column or a JSON path; `None` for keys the
/// model does not know.
fn resolve_target<'m>(model: &'m ModelDefinition, key: &str) -> Option<Target<'m>> {
    if let Some(property) = model.property(key) {
        let column = model.column_name(key)?;
        return Some(Target::Column { sql: escape_identifier(&column), property });
    }

    let mut segments = key.split('.');
    let root = segments.next()?;
    let path: Vec<&str> = segments.collect();
    if path.is_empty() || path.iter().any(|s| s.is_empty()) {
        return None;
    }
    let column = model.column_name(root)?;

    let mut sql = escape_identifier(&column);
    for (i, segment) in path.iter().enumerate() {
        sql.push_str(if i + 1 == path.len() { "->>" } else { "->" });
        sql.push_str(&escape_literal(segment));
    }
    Some(Target::JsonPath { sql })
}

fn as_list(value: &JsonValue) -> Vec<&JsonValue> {
    match value {
        JsonValue::Array(items) => items.iter().collect(),
        other => vec![other],
    }
}

fn comparison(target: &Target<'_>, sql_op: &str, value: &JsonValue) -> Result<ParameterizedFragment> {
    let mut fragment = ParameterizedFragment::raw(format!("{}{}", target.sql(), sql_op));
    target.push_value(&mut fragment, value)?;
    Ok(fragment)
}

fn value_list(
    target: &Target<'_>,
    prefix: &str,
    items: &[&JsonValue],
) -> Result<ParameterizedFragment> {
    let mut fragment = ParameterizedFragment::raw(format!("{}{}(", target.sql(), prefix));
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            fragment.push_sql(",");
        }
        target.push_value(&mut fragment, item)?;
    }
    fragment.push_sql(")");
    Ok(fragment)
}

/// Splits `/pattern/flags` into its parts; other strings are bare patterns.
fn split_regexp(value: &JsonValue) -> Result<(String, String)> {
    match value {
        JsonValue::String(s) => {
            if let Some(body) = s.strip_prefix('/') {
                if let Some(end) = body.rfind('/') {
                    return Ok((body[..end].to_string(), body[end + 1..].to_string()));
                }
            }
            Ok((s.clone(), String::new()))
        }
        JsonValue::Object(obj) => {
            let source = obj.get("source").and_then(JsonValue::as_str).ok_or_else(|| {
                ConnectorError::Query("regexp object requires a 'source' string".to_string())
            })?;
            let flags = obj.get("flags").and_then(JsonValue::as_str).unwrap_or("");
            Ok((source.to_string(), flags.to_string()))
        }
        other => Err(ConnectorError::Query(format!("Invalid regexp {}", other))),
    }
}

fn array_operator(
    property_name: &str,
    target: &Target<'_>,
    sql_op: &str,
    value: &JsonValue,
) -> Result<ParameterizedFragment> {
    let data_type = match target {
        Target::Column { property, .. } => property.data_type(),
        Target::JsonPath { .. } => None,
    }
    .ok_or_else(|| {
        ConnectorError::Query(format!(
            "Array operators on '{}' require an explicit array dataType",
            property_name
        ))
    })?;

    let mut array_type = canonical_native_type(data_type, None, None, None);
    if !array_type.ends_with("[]") {
        array_type.push_str("[]");
    }

    let mut fragment = ParameterizedFragment::raw(format!("{} {} array[", target.sql(), sql_op));
    for (i, item) in as_list(value).into_iter().enumerate() {
        if i > 0 {
            fragment.push_sql(",");
        }
        fragment.push_param(scalar_value(item));
    }
    fragment.push_sql("]::");
    fragment.push_sql(&array_type);
    Ok(fragment)
}

fn compile_leaf(
    property_name: &str,
    target: &Target<'_>,
    operator: Operator,
    value: &JsonValue,
    warnings: &mut Vec<CompileWarning>,
) -> Result<ParameterizedFragment> {
    let column = target.sql();
    match operator {
        Operator::Eq if value.is_null() => Ok(ParameterizedFragment::raw(format!("{} IS NULL", column))),
        Operator::Eq => comparison(target, "=", value),
        Operator::Neq if value.is_null() => {
            Ok(ParameterizedFragment::raw(format!("{} IS NOT NULL", column)))
        }
        Operator::Neq => comparison(target, "!=", value),
        Operator::Gt => comparison(target, ">", value),
        Operator::Gte => comparison(target, ">=", value),
        Operator::Lt => comparison(target, "<", value),
        Operator::Lte => comparison(target, "<=", value),
        Operator::Between => {
            let bounds = as_list(value);
            if bounds.len() != 2 {
                return Err(ConnectorError::Query(format!(
                    "between on '{}' expects exactly two values",
                    property_name
                )));
            }
            let mut fragment = ParameterizedFragment::raw(format!("{} BETWEEN ", column));
            target.push_value(&mut fragment, bounds[0])?;
            fragment.push_sql(" AND ");
            target.push_value(&mut fragment, bounds[1])?;
            Ok(fragment)
        }
        Operator::Inq => {
            let items = as_list(value);
            if items.is_empty() {
                // `IN (NULL)` matches no row; `IN ()` is a syntax error
                let mut fragment = ParameterizedFragment::raw(format!("{} IN (", column));
                fragment.push_param(SqlValue::Null);
                fragment.push_sql(")");
                return Ok(fragment);
            }
            value_list(target, " IN ", &items)
        }
        Operator::Nin => {
            let items = as_list(value);
            if items.is_empty() {
                return Ok(ParameterizedFragment::empty());
            }
            value_list(target, " NOT IN ", &items)
        }
        Operator::Like | Operator::Nlike | Operator::Ilike | Operator::Nilike => {
            let keyword = match operator {
                Operator::Like => " LIKE ",
                Operator::Nlike => " NOT LIKE ",
                Operator::Ilike => " ILIKE ",
                _ => " NOT ILIKE ",
            };
            let mut fragment = ParameterizedFragment::raw(format!("{}{}", column, keyword));
            fragment.push_param(to_text(value));
            fragment.push_sql(LIKE_ESCAPE);
            Ok(fragment)
        }
        Operator::Regexp => {
            let (pattern, flags) = split_regexp(value)?;
            if flags.contains('g') || flags.contains('m') {
                let warning = CompileWarning {
                    property: property_name.to_string(),
                    message: format!(
                        "regexp flags '{}' ignored: PostgreSQL supports only the 'i' flag",
                        flags
                    ),
                };
                warn!(property = %warning.property, flags = %flags, "Unsupported regexp flags");
                warnings.push(warning);
            }
            let sql_op = if flags.contains('i') { " ~* " } else { " ~ " };
            let mut fragment = ParameterizedFragment::raw(format!("{}{}", column, sql_op));
            fragment.push_param(SqlValue::Text(pattern));
            Ok(fragment)
        }
        Operator::Contains => array_operator(property_name, target, "@>", value),
        Operator::ContainedBy => array_operator(property_name, target, "<@", value),
        Operator::ContainsAnyOf => array_operator(property_name, target, "&&", value),
        Operator::Match => {
            let mut fragment = ParameterizedFragment::raw(format!("to_tsvector({}) @@ to_tsquery(", column));
            fragment.push_param(to_text(value));
            fragment.push_sql(")");
            Ok(fragment)
        }
    }
}

fn compile_tree(
    model: &ModelDefinition,
    tree: &FilterTree,
    warnings: &mut Vec<CompileWarning>,
) -> Result<ParameterizedFragment> {
    match tree {
        FilterTree::Leaf { property, operator, value } => match resolve_target(model, property) {
            Some(target) => compile_leaf(property, &target, *operator, value, warnings),
            None => Ok(ParameterizedFragment::empty()),
        },
        FilterTree::All(children) => {
            let parts = children
                .iter()
                .map(|child| compile_tree(model, child, warnings))
                .collect::<Result<Vec<_>>>()?;
            Ok(ParameterizedFragment::join(parts, " AND "))
        }
        FilterTree::And(children) | FilterTree::Or(children) => {
            let separator = if matches!(tree, FilterTree::And(_)) { " AND " } else { " OR " };
            let parts: Vec<_> = children
                .iter()
                .map(|child| compile_tree(model, child, warnings).map(ParameterizedFragment::parenthesize))
                .collect::<Result<Vec<_>>>()?
                .into_iter()
                .filter(|part| !part.is_empty())
                .collect();
            // the whole combinator is one operand of the enclosing AND
            if parts.len() > 1 {
                Ok(ParameterizedFragment::join(parts, separator).parenthesize())
            } else {
                Ok(ParameterizedFragment::join(parts, separator))
            }
        }
    }
}

/// Compiles a where tree into a condition (no `WHERE` keyword).
///
/// Keys naming no live property, and not a dotted path under one, are
/// skipped. An empty result means "no condition".
///
/// # Errors
///
/// Returns [`ConnectorError::Query`] for malformed operator values and
/// [`ConnectorError::Validation`] for values the column type cannot hold.
pub fn compile_where(model: &ModelDefinition, tree: &FilterTree) -> Result<Compiled> {
    let mut warnings = Vec::new();
    let fragment = compile_tree(model, tree, &mut warnings)?;
    Ok(Compiled { fragment, warnings })
}

/// ` WHERE <condition>`, or empty.
pub fn build_where(model: &ModelDefinition, tree: Option<&FilterTree>) -> Result<Compiled> {
    let Some(tree) = tree else {
        return Ok(Compiled::default());
    };
    let compiled = compile_where(model, tree)?;
    if compiled.fragment.is_empty() {
        return Ok(Compiled { fragment: ParameterizedFragment::empty(), warnings: compiled.warnings });
    }
    Ok(Compiled {
        fragment: ParameterizedFragment::raw(" WHERE ").merge(compiled.fragment),
        warnings: compiled.warnings,
    })
}
