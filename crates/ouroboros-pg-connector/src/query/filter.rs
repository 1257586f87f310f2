//! Caller filters parsed into a typed tree.
//!
//! Input follows the ORM's JSON filter shape:
//!
//! ```json
//! {
//!   "where": {"age": {"gt": 21}, "or": [{"name": "a"}, {"name": {"like": "b%"}}]},
//!   "order": ["age DESC", "name"],
//!   "limit": 10,
//!   "skip": 20,
//!   "fields": ["id", "name"]
//! }
//! ```

use serde_json::Value as JsonValue;
use std::fmt;

use crate::index::SortDirection;
use crate::{ConnectorError, Result};

/// Comparison operators accepted in a leaf condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    Between,
    Inq,
    Nin,
    Like,
    Nlike,
    Ilike,
    Nilike,
    Regexp,
    Contains,
    ContainedBy,
    ContainsAnyOf,
    Match,
}

impl Operator {
    pub fn parse(name: &str) -> Option<Self> {
        let op = match name {
            "eq" => Operator::Eq,
            "neq" => Operator::Neq,
            "gt" => Operator::Gt,
            "gte" => Operator::Gte,
            "lt" => Operator::Lt,
            "lte" => Operator::Lte,
            "between" => Operator::Between,
            "inq" => Operator::Inq,
            "nin" => Operator::Nin,
            "like" => Operator::Like,
            "nlike" => Operator::Nlike,
            "ilike" => Operator::Ilike,
            "nilike" => Operator::Nilike,
            "regexp" => Operator::Regexp,
            "contains" => Operator::Contains,
            "containedBy" => Operator::ContainedBy,
            "containsAnyOf" => Operator::ContainsAnyOf,
            "match" => Operator::Match,
            _ => return None,
        };
        Some(op)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Eq => "eq",
            Operator::Neq => "neq",
            Operator::Gt => "gt",
            Operator::Gte => "gte",
            Operator::Lt => "lt",
            Operator::Lte => "lte",
            Operator::Between => "between",
            Operator::Inq => "inq",
            Operator::Nin => "nin",
            Operator::Like => "like",
            Operator::Nlike => "nlike",
            Operator::Ilike => "ilike",
            Operator::Nilike => "nilike",
            Operator::Regexp => "regexp",
            Operator::Contains => "contains",
            Operator::ContainedBy => "containedBy",
            Operator::ContainsAnyOf => "containsAnyOf",
            Operator::Match => "match",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where-clause tree.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterTree {
    /// `property <operator> value`
    Leaf {
        property: String,
        operator: Operator,
        value: JsonValue,
    },
    /// Explicit `and` combinator; each child is parenthesized.
    And(Vec<FilterTree>),
    /// Explicit `or` combinator; each child is parenthesized.
    Or(Vec<FilterTree>),
    /// Sibling keys of one where object, joined with `AND` as they are.
    All(Vec<FilterTree>),
}

impl FilterTree {
    pub fn leaf(property: impl Into<String>, operator: Operator, value: JsonValue) -> Self {
        FilterTree::Leaf { property: property.into(), operator, value }
    }

    pub fn eq(property: impl Into<String>, value: JsonValue) -> Self {
        Self::leaf(property, Operator::Eq, value)
    }

    /// Parses a where object.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectorError::Query`] when `and` / `or` are not arrays or a
    /// where clause is not an object.
    pub fn from_json(value: &JsonValue) -> Result<Self> {
        let obj = match value {
            JsonValue::Object(obj) => obj,
            JsonValue::Null => return Ok(FilterTree::All(Vec::new())),
            other => {
                return Err(ConnectorError::Query(format!(
                    "where clause must be an object, got {}",
                    other
                )))
            }
        };

        let mut children = Vec::with_capacity(obj.len());
        for (key, value) in obj {
            match key.as_str() {
                "and" | "or" => {
                    let branches = value.as_array().ok_or_else(|| {
                        ConnectorError::Query(format!("'{}' expects an array of where objects", key))
                    })?;
                    let branches = branches
                        .iter()
                        .map(FilterTree::from_json)
                        .collect::<Result<Vec<_>>>()?;
                    children.push(if key == "and" {
                        FilterTree::And(branches)
                    } else {
                        FilterTree::Or(branches)
                    });
                }
                property => children.extend(parse_condition(property, value)),
            }
        }

        Ok(if children.len() == 1 {
            children.remove(0)
        } else {
            FilterTree::All(children)
        })
    }

    /// Number of leaves in the tree.
    pub fn leaf_count(&self) -> usize {
        match self {
            FilterTree::Leaf { .. } => 1,
            FilterTree::And(c) | FilterTree::Or(c) | FilterTree::All(c) => {
                c.iter().map(FilterTree::leaf_count).sum()
            }
        }
    }
}

/// `{"gt": 1, "lt": 5}` yields two leaves; any other value is an equality.
fn parse_condition(property: &str, value: &JsonValue) -> Vec<FilterTree> {
    if let JsonValue::Object(obj) = value {
        let ops: Vec<(Operator, &JsonValue)> = obj
            .iter()
            .filter_map(|(k, v)| Operator::parse(k).map(|op| (op, v)))
            .collect();
        if !ops.is_empty() {
            return ops
                .into_iter()
                .map(|(op, v)| FilterTree::leaf(property, op, v.clone()))
                .collect();
        }
    }
    vec![FilterTree::eq(property, value.clone())]
}

/// One ORDER BY entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderSpec {
    pub property: String,
    pub direction: SortDirection,
}

/// Which properties a query returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldSelection {
    Include(Vec<String>),
    Exclude(Vec<String>),
}

/// A full query filter.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    pub where_clause: Option<FilterTree>,
    pub order: Vec<OrderSpec>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    pub fields: Option<FieldSelection>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_where(mut self, tree: FilterTree) -> Self {
        self.where_clause = Some(tree);
        self
    }

    pub fn order_by(mut self, property: impl Into<String>, direction: SortDirection) -> Self {
        self.order.push(OrderSpec { property: property.into(), direction });
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields = Some(FieldSelection::Include(fields.into_iter().map(Into::into).collect()));
        self
    }

    /// Parses the JSON filter shape shown in the module docs.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectorError::Query`] for malformed where clauses, order
    /// directions other than ASC / DESC, and non-numeric limit / offset.
    pub fn from_json(value: &JsonValue) -> Result<Self> {
        let obj = match value {
            JsonValue::Object(obj) => obj,
            JsonValue::Null => return Ok(Filter::default()),
            other => {
                return Err(ConnectorError::Query(format!("filter must be an object, got {}", other)))
            }
        };

        let mut filter = Filter::default();
        if let Some(where_value) = obj.get("where") {
            filter.where_clause = Some(FilterTree::from_json(where_value)?);
        }
        if let Some(order) = obj.get("order") {
            filter.order = parse_order(order)?;
        }
        filter.limit = parse_count(obj.get("limit"), "limit")?;
        filter.offset = match parse_count(obj.get("offset"), "offset")? {
            Some(offset) => Some(offset),
            None => parse_count(obj.get("skip"), "skip")?,
        };
        if let Some(fields) = obj.get("fields") {
            filter.fields = parse_fields(fields)?;
        }
        Ok(filter)
    }
}

fn parse_order_entry(entry: &str) -> Result<Option<OrderSpec>> {
    let mut parts = entry.split_whitespace();
    let Some(property) = parts.next() else {
        return Ok(None);
    };
    let direction = match parts.next() {
        None => SortDirection::Asc,
        Some(d) => SortDirection::parse(d).ok_or_else(|| {
            ConnectorError::Query(format!("Invalid order direction '{}' for {}", d, property))
        })?,
    };
    if let Some(extra) = parts.next() {
        return Err(ConnectorError::Query(format!("Unexpected '{}' in order '{}'", extra, entry)));
    }
    Ok(Some(OrderSpec { property: property.to_string(), direction }))
}

fn parse_order(value: &JsonValue) -> Result<Vec<OrderSpec>> {
    let entries: Vec<&str> = match value {
        JsonValue::String(s) => s.split(',').collect(),
        JsonValue::Array(items) => items
            .iter()
            .map(|v| {
                v.as_str().ok_or_else(|| {
                    ConnectorError::Query(format!("order entries must be strings, got {}", v))
                })
            })
            .collect::<Result<Vec<_>>>()?,
        JsonValue::Null => Vec::new(),
        other => return Err(ConnectorError::Query(format!("Invalid order {}", other))),
    };

    let mut order = Vec::with_capacity(entries.len());
    for entry in entries {
        if let Some(spec) = parse_order_entry(entry)? {
            order.push(spec);
        }
    }
    Ok(order)
}

fn parse_count(value: Option<&JsonValue>, name: &str) -> Result<Option<u64>> {
    match value {
        None | Some(JsonValue::Null) => Ok(None),
        Some(JsonValue::Number(n)) => n
            .as_u64()
            .map(Some)
            .ok_or_else(|| ConnectorError::Query(format!("{} must be a non-negative integer", name))),
        Some(JsonValue::String(s)) => s
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| ConnectorError::Query(format!("{} must be a non-negative integer", name))),
        Some(other) => Err(ConnectorError::Query(format!("Invalid {} {}", name, other))),
    }
}

fn parse_fields(value: &JsonValue) -> Result<Option<FieldSelection>> {
    match value {
        JsonValue::Null => Ok(None),
        JsonValue::String(s) => Ok(Some(FieldSelection::Include(
            s.split(',').map(|f| f.trim().to_string()).filter(|f| !f.is_empty()).collect(),
        ))),
        JsonValue::Array(items) => Ok(Some(FieldSelection::Include(
            items.iter().filter_map(JsonValue::as_str).map(str::to_string).collect(),
        ))),
        JsonValue::Object(obj) => {
            let included: Vec<String> = obj
                .iter()
                .filter(|(_, v)| v.as_bool() == Some(true))
                .map(|(k, _)| k.clone())
                .collect();
            if !included.is_empty() {
                return Ok(Some(FieldSelection::Include(included)));
            }
            Ok(Some(FieldSelection::Exclude(obj.keys().cloned().collect())))
        }
        other => Err(ConnectorError::Query(format!("Invalid fields {}", other))),
    }
}
