//! Declared model shapes and the registry that serves them.
//!
//! Models can be built in code:
//!
//! ```
//! use ouroboros_pg_connector::{ModelDefinition, PropertyDefinition, PropertyType};
//!
//! let model = ModelDefinition::new("Customer")
//!     .with_property("id", PropertyDefinition::new(PropertyType::String).id().with_length(20))
//!     .with_property("email", PropertyDefinition::new(PropertyType::String).required().indexed());
//! assert_eq!(model.table(), "customer");
//! assert_eq!(model.column_name("email").as_deref(), Some("email"));
//! ```
//!
//! or loaded from JSON with [`ModelDefinition::from_json`].

use parking_lot::RwLock;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::escape::qualified_table;
use crate::index::{IndexOptions, IndexSpec};
use crate::settings::{IdSortPolicy, DEFAULT_SCHEMA};
use crate::typemap::PropertyType;
use crate::{ConnectorError, Result};

/// One declared property.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyDefinition {
    #[serde(rename = "type")]
    property_type: PropertyType,
    #[serde(default)]
    id: bool,
    #[serde(default)]
    generated: bool,
    #[serde(default)]
    required: bool,
    #[serde(default)]
    nullable: Option<bool>,
    #[serde(default)]
    length: Option<u32>,
    #[serde(default)]
    precision: Option<u32>,
    #[serde(default)]
    scale: Option<u32>,
    #[serde(default)]
    column_name: Option<String>,
    #[serde(default)]
    data_type: Option<String>,
    /// Raw SQL default expression.
    #[serde(default)]
    db_default: Option<String>,
    #[serde(default, deserialize_with = "crate::index::deserialize_property_index")]
    index: Option<IndexOptions>,
}

impl PropertyDefinition {
    pub fn new(property_type: PropertyType) -> Self {
        Self {
            property_type,
            id: false,
            generated: false,
            required: false,
            nullable: None,
            length: None,
            precision: None,
            scale: None,
            column_name: None,
            data_type: None,
            db_default: None,
            index: None,
        }
    }

    /// Marks the property as (part of) the primary key.
    pub fn id(mut self) -> Self {
        self.id = true;
        self
    }

    /// Value is generated by the database.
    pub fn generated(mut self) -> Self {
        self.generated = true;
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn nullable(mut self, nullable: bool) -> Self {
        self.nullable = Some(nullable);
        self
    }

    pub fn with_length(mut self, length: u32) -> Self {
        self.length = Some(length);
        self
    }

    pub fn with_precision(mut self, precision: u32, scale: u32) -> Self {
        self.precision = Some(precision);
        self.scale = Some(scale);
        self
    }

    pub fn with_column_name(mut self, column: impl Into<String>) -> Self {
        self.column_name = Some(column.into());
        self
    }

    /// Explicit native column type, e.g. `"text[]"` or `"numeric"`.
    pub fn with_data_type(mut self, data_type: impl Into<String>) -> Self {
        self.data_type = Some(data_type.into());
        self
    }

    pub fn with_db_default(mut self, expression: impl Into<String>) -> Self {
        self.db_default = Some(expression.into());
        self
    }

    /// Plain single-column index.
    pub fn indexed(self) -> Self {
        self.with_index(IndexOptions::default())
    }

    pub fn with_index(mut self, options: IndexOptions) -> Self {
        self.index = Some(options);
        self
    }

    pub fn property_type(&self) -> PropertyType {
        self.property_type
    }

    pub fn is_id(&self) -> bool {
        self.id
    }

    pub fn is_generated(&self) -> bool {
        self.generated
    }

    pub fn is_required(&self) -> bool {
        self.required
    }

    /// Column accepts NULL unless the property is an identifier, required,
    /// or explicitly declared `nullable: false`.
    pub fn is_nullable(&self) -> bool {
        !(self.id || self.required || self.nullable == Some(false))
    }

    pub fn length(&self) -> Option<u32> {
        self.length
    }

    pub fn precision(&self) -> Option<u32> {
        self.precision
    }

    pub fn scale(&self) -> Option<u32> {
        self.scale
    }

    pub fn data_type(&self) -> Option<&str> {
        self.data_type.as_deref()
    }

    pub fn db_default(&self) -> Option<&str> {
        self.db_default.as_deref()
    }

    pub fn index(&self) -> Option<&IndexOptions> {
        self.index.as_ref()
    }

    fn from_json(value: &JsonValue) -> Result<Self> {
        match value {
            // "name": "String"
            JsonValue::String(type_name) => Ok(Self::new(type_name.parse()?)),
            other => serde_json::from_value(other.clone()).map_err(|e| {
                ConnectorError::Validation(format!("Invalid property definition: {}", e))
            }),
        }
    }
}

/// Named multi-column index declared at model level.
#[derive(Debug, Clone, PartialEq)]
pub struct NamedIndex {
    pub name: String,
    pub spec: IndexSpec,
}

/// Model-level foreign key: `foreign_key` property of this model references
/// `entity_key` of model `entity`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForeignKeyDefinition {
    pub name: String,
    pub foreign_key: String,
    pub entity: String,
    pub entity_key: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
struct ModelSettings {
    schema: Option<String>,
    table: Option<String>,
    default_id_sort: Option<IdSortPolicy>,
    indexes: Vec<NamedIndex>,
    foreign_keys: Vec<ForeignKeyDefinition>,
}

#[derive(Debug, Clone, PartialEq)]
struct ModelProperty {
    name: String,
    definition: PropertyDefinition,
    deleted: bool,
}

/// Declared shape of one table.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelDefinition {
    name: String,
    properties: Vec<ModelProperty>,
    settings: ModelSettings,
}

impl ModelDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            properties: Vec::new(),
            settings: ModelSettings::default(),
        }
    }

    /// Adds or replaces a property. Replacing revives a removed property.
    pub fn with_property(mut self, name: impl Into<String>, definition: PropertyDefinition) -> Self {
        let name = name.into();
        match self.properties.iter_mut().find(|p| p.name == name) {
            Some(existing) => {
                existing.definition = definition;
                existing.deleted = false;
            }
            None => self.properties.push(ModelProperty { name, definition, deleted: false }),
        }
        self
    }

    /// Removes a property while remembering that it existed.
    pub fn remove_property(mut self, name: &str) -> Self {
        if let Some(p) = self.properties.iter_mut().find(|p| p.name == name) {
            p.deleted = true;
        }
        self
    }

    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.settings.schema = Some(schema.into());
        self
    }

    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.settings.table = Some(table.into());
        self
    }

    pub fn with_default_id_sort(mut self, policy: IdSortPolicy) -> Self {
        self.settings.default_id_sort = Some(policy);
        self
    }

    pub fn with_index(mut self, name: impl Into<String>, spec: IndexSpec) -> Self {
        let name = name.into();
        self.settings.indexes.retain(|i| i.name != name);
        self.settings.indexes.push(NamedIndex { name, spec });
        self
    }

    /// Adds a named index from any accepted shorthand.
    pub fn with_index_json(self, name: impl Into<String>, definition: &JsonValue) -> Result<Self> {
        let spec = IndexSpec::from_json(definition)?;
        Ok(self.with_index(name, spec))
    }

    pub fn with_foreign_key(mut self, foreign_key: ForeignKeyDefinition) -> Self {
        self.settings.foreign_keys.push(foreign_key);
        self
    }

    /// Loads a model from its JSON declaration:
    ///
    /// ```json
    /// {
    ///   "name": "Customer",
    ///   "properties": {"id": {"type": "Number", "id": true, "generated": true}, "name": "String"},
    ///   "settings": {"schema": "sales", "table": "customers", "defaultIdSort": false,
    ///                "indexes": {"name_idx": "name"},
    ///                "foreignKeys": {"fk_x": {"name": "fk_x", "foreignKey": "...", "entity": "...", "entityKey": "..."}}}
    /// }
    /// ```
    pub fn from_json(value: &JsonValue) -> Result<Self> {
        let obj = value
            .as_object()
            .ok_or_else(|| ConnectorError::Validation("Model definition must be an object".to_string()))?;
        let name = obj
            .get("name")
            .and_then(JsonValue::as_str)
            .ok_or_else(|| ConnectorError::Validation("Model definition requires a name".to_string()))?;

        let mut model = ModelDefinition::new(name);

        if let Some(properties) = obj.get("properties") {
            let properties = properties.as_object().ok_or_else(|| {
                ConnectorError::Validation(format!("{}: properties must be an object", name))
            })?;
            for (prop_name, definition) in properties {
                model = model.with_property(prop_name.clone(), PropertyDefinition::from_json(definition)?);
            }
        }

        let Some(settings) = obj.get("settings").and_then(JsonValue::as_object) else {
            return Ok(model);
        };

        if let Some(schema) = settings.get("schema").and_then(JsonValue::as_str) {
            model = model.with_schema(schema);
        }
        if let Some(table) = settings.get("table").and_then(JsonValue::as_str) {
            model = model.with_table(table);
        }
        if let Some(policy) = settings.get("defaultIdSort") {
            model = model.with_default_id_sort(IdSortPolicy::from_json(policy)?);
        }
        if let Some(indexes) = settings.get("indexes").and_then(JsonValue::as_object) {
            for (index_name, definition) in indexes {
                model = model.with_index_json(index_name.clone(), definition)?;
            }
        }
        if let Some(foreign_keys) = settings.get("foreignKeys").and_then(JsonValue::as_object) {
            for (key, definition) in foreign_keys {
                let mut definition = definition.clone();
                if let Some(obj) = definition.as_object_mut() {
                    obj.entry("name").or_insert_with(|| JsonValue::String(key.clone()));
                }
                let fk: ForeignKeyDefinition = serde_json::from_value(definition).map_err(|e| {
                    ConnectorError::Validation(format!("Invalid foreign key {}: {}", key, e))
                })?;
                model = model.with_foreign_key(fk);
            }
        }

        Ok(model)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Explicit table name, or the lowercased model name.
    pub fn table(&self) -> String {
        self.settings
            .table
            .clone()
            .unwrap_or_else(|| self.name.to_lowercase())
    }

    pub fn schema(&self) -> &str {
        self.settings.schema.as_deref().unwrap_or(DEFAULT_SCHEMA)
    }

    pub fn has_schema(&self) -> bool {
        self.settings.schema.is_some()
    }

    /// `"<schema>"."<table>"`
    pub fn qualified_table(&self) -> String {
        qualified_table(self.schema(), &self.table())
    }

    pub fn default_id_sort(&self) -> Option<IdSortPolicy> {
        self.settings.default_id_sort
    }

    pub fn indexes(&self) -> &[NamedIndex] {
        &self.settings.indexes
    }

    pub fn foreign_keys(&self) -> &[ForeignKeyDefinition] {
        &self.settings.foreign_keys
    }

    /// Live properties in declaration order.
    pub fn properties(&self) -> impl Iterator<Item = (&str, &PropertyDefinition)> {
        self.properties
            .iter()
            .filter(|p| !p.deleted)
            .map(|p| (p.name.as_str(), &p.definition))
    }

    /// Looks up a live property.
    pub fn property(&self, name: &str) -> Option<&PropertyDefinition> {
        self.properties
            .iter()
            .find(|p| !p.deleted && p.name == name)
            .map(|p| &p.definition)
    }

    /// True when `name` was declared and later removed.
    pub fn is_removed(&self, name: &str) -> bool {
        self.properties.iter().any(|p| p.deleted && p.name == name)
    }

    /// Column backing a live property: explicit column name or the lowercased
    /// property name.
    pub fn column_name(&self, property: &str) -> Option<String> {
        self.property(property).map(|def| Self::resolve_column(property, def))
    }

    fn resolve_column(property: &str, definition: &PropertyDefinition) -> String {
        definition
            .column_name
            .clone()
            .unwrap_or_else(|| property.to_lowercase())
    }

    /// Reverse lookup from column to live property.
    pub fn property_for_column(&self, column: &str) -> Option<(&str, &PropertyDefinition)> {
        self.properties()
            .find(|(name, def)| Self::resolve_column(name, def) == column)
    }

    /// Live properties with their resolved column names.
    pub fn columns(&self) -> impl Iterator<Item = (&str, String, &PropertyDefinition)> {
        self.properties()
            .map(|(name, def)| (name, Self::resolve_column(name, def), def))
    }

    pub fn id_properties(&self) -> Vec<(&str, &PropertyDefinition)> {
        self.properties().filter(|(_, def)| def.is_id()).collect()
    }

    pub fn id_columns(&self) -> Vec<String> {
        self.columns()
            .filter(|(_, _, def)| def.is_id())
            .map(|(_, column, _)| column)
            .collect()
    }

    pub(crate) fn set_default_schema(&mut self, schema: &str) {
        if self.settings.schema.is_none() {
            self.settings.schema = Some(schema.to_string());
        }
    }
}

/// Source of model definitions.
pub trait ModelRegistry: Send + Sync + 'static {
    fn model(&self, name: &str) -> Option<Arc<ModelDefinition>>;

    /// Names of every registered model, sorted.
    fn model_names(&self) -> Vec<String>;

    fn require(&self, name: &str) -> Result<Arc<ModelDefinition>> {
        self.model(name)
            .ok_or_else(|| ConnectorError::UnknownModel(name.to_string()))
    }
}

/// Thread-safe registry backed by a map.
#[derive(Debug)]
pub struct InMemoryRegistry {
    default_schema: String,
    models: RwLock<BTreeMap<String, Arc<ModelDefinition>>>,
}

impl Default for InMemoryRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_SCHEMA)
    }
}

impl InMemoryRegistry {
    /// Models registered without a schema are placed in `default_schema`.
    pub fn new(default_schema: impl Into<String>) -> Self {
        Self {
            default_schema: default_schema.into(),
            models: RwLock::new(BTreeMap::new()),
        }
    }

    /// Registers or redefines a model.
    pub fn register(&self, mut model: ModelDefinition) -> Arc<ModelDefinition> {
        model.set_default_schema(&self.default_schema);
        let model = Arc::new(model);
        self.models
            .write()
            .insert(model.name().to_string(), Arc::clone(&model));
        model
    }

    pub fn register_json(&self, value: &JsonValue) -> Result<Arc<ModelDefinition>> {
        Ok(self.register(ModelDefinition::from_json(value)?))
    }

    pub fn unregister(&self, name: &str) -> Option<Arc<ModelDefinition>> {
        self.models.write().remove(name)
    }
}

impl ModelRegistry for InMemoryRegistry {
    fn model(&self, name: &str) -> Option<Arc<ModelDefinition>> {
        self.models.read().get(name).cloned()
    }

    fn model_names(&self) -> Vec<String> {
        self.models.read().keys().cloned().collect()
    }
}
