//! SQL compilation from ORM filters.
//!
//! # Examples
//!
//! ```
//! use ouroboros_pg_connector::query::{Filter, QueryCompiler};
//! use ouroboros_pg_connector::{IdSortPolicy, ModelDefinition, PropertyDefinition, PropertyType};
//! use serde_json::json;
//!
//! let model = ModelDefinition::new("User")
//!     .with_property("id", PropertyDefinition::new(PropertyType::Number).id())
//!     .with_property("age", PropertyDefinition::new(PropertyType::Number));
//!
//! let filter = Filter::from_json(&json!({"where": {"age": {"gte": 18}}, "limit": 10})).unwrap();
//! let compiled = QueryCompiler::new(IdSortPolicy::Always)
//!     .compile_select(&model, &filter)
//!     .unwrap();
//!
//! assert_eq!(
//!     compiled.sql(),
//!     "SELECT \"id\",\"age\" FROM \"public\".\"user\" WHERE \"age\">=$1 ORDER BY \"id\" LIMIT 10"
//! );
//! assert_eq!(compiled.params().len(), 1);
//! ```

mod filter;
mod fragment;
mod modify;
mod select;
mod where_clause;

#[cfg(test)]
mod tests;

pub use filter::{FieldSelection, Filter, FilterTree, Operator, OrderSpec};
pub use fragment::{adjust_param_indices, count_placeholders, ParameterizedFragment};
pub use modify::{build_delete, build_insert, build_update};
pub use select::{build_count, compile_select, sorts_by_id};
pub use where_clause::{build_where, compile_where, CompileWarning, Compiled};

use serde_json::{Map, Value as JsonValue};

use crate::model::ModelDefinition;
use crate::settings::IdSortPolicy;
use crate::Result;

/// Compiler bound to the connector-wide default sort policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryCompiler {
    default_id_sort: IdSortPolicy,
}

impl QueryCompiler {
    pub fn new(default_id_sort: IdSortPolicy) -> Self {
        Self { default_id_sort }
    }

    pub fn default_id_sort(&self) -> IdSortPolicy {
        self.default_id_sort
    }

    pub fn compile_where(&self, model: &ModelDefinition, tree: &FilterTree) -> Result<Compiled> {
        compile_where(model, tree)
    }

    pub fn compile_select(&self, model: &ModelDefinition, filter: &Filter) -> Result<Compiled> {
        compile_select(model, filter, self.default_id_sort)
    }

    pub fn build_count(&self, model: &ModelDefinition, filter: &Filter) -> Result<Compiled> {
        build_count(model, filter)
    }

    pub fn build_insert(
        &self,
        model: &ModelDefinition,
        data: &Map<String, JsonValue>,
    ) -> Result<ParameterizedFragment> {
        build_insert(model, data)
    }

    pub fn build_update(
        &self,
        model: &ModelDefinition,
        tree: Option<&FilterTree>,
        data: &Map<String, JsonValue>,
    ) -> Result<Compiled> {
        build_update(model, tree, data)
    }

    pub fn build_delete(&self, model: &ModelDefinition, tree: Option<&FilterTree>) -> Result<Compiled> {
        build_delete(model, tree)
    }
}
