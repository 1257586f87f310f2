//! Schema synchronization.
//!
//! [`plan`] compares a declared model with the table read back from the
//! catalog and decides one [`SyncAction`]. [`SchemaSynchronizer`] applies it
//! as an ordered pipeline:
//!
//! 1. adds and type/nullability changes in one `ALTER TABLE`,
//! 2. column drops in a second `ALTER TABLE`, sent only after 1 succeeded,
//! 3. all index drops and creations as one batch.
//!
//! Running [`SchemaSynchronizer::autoupdate`] twice without changing the model
//! emits no DDL the second time.

use futures::future::join_all;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::escape::{escape_identifier, qualified_table};
use crate::index::{IndexKey, IndexOptions};
use crate::introspect::{get_actual_schema, ActualSchema, IndexDescriptor};
use crate::model::{ModelDefinition, ModelRegistry, PropertyDefinition};
use crate::provider::ConnectionProvider;
use crate::typemap::{declared_native_type, is_serial_type, stored_native_type};
use crate::{ConnectorError, Result};

pub use ouroboros_common::error::DUPLICATE_SCHEMA;

/// One column-level difference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnChange {
    Added {
        column: String,
        data_type: String,
        nullable: bool,
        default: Option<String>,
    },
    TypeChanged {
        column: String,
        from: String,
        to: String,
    },
    NullabilityChanged {
        column: String,
        nullable: bool,
    },
    Dropped {
        column: String,
    },
}

impl ColumnChange {
    pub fn column(&self) -> &str {
        match self {
            ColumnChange::Added { column, .. }
            | ColumnChange::TypeChanged { column, .. }
            | ColumnChange::NullabilityChanged { column, .. }
            | ColumnChange::Dropped { column } => column,
        }
    }

    pub fn is_drop(&self) -> bool {
        matches!(self, ColumnChange::Dropped { .. })
    }

    /// The `ALTER TABLE` clause for this change.
    pub fn to_sql(&self) -> String {
        match self {
            ColumnChange::Added { column, data_type, nullable, default } => format!(
                "ADD COLUMN {}",
                column_definition(column, data_type, *nullable, default.as_deref())
            ),
            ColumnChange::TypeChanged { column, to, .. } => {
                format!("ALTER COLUMN {} TYPE {}", escape_identifier(column), to)
            }
            ColumnChange::NullabilityChanged { column, nullable: true } => {
                format!("ALTER COLUMN {} DROP NOT NULL", escape_identifier(column))
            }
            ColumnChange::NullabilityChanged { column, nullable: false } => {
                format!("ALTER COLUMN {} SET NOT NULL", escape_identifier(column))
            }
            ColumnChange::Dropped { column } => format!("DROP COLUMN {}", escape_identifier(column)),
        }
    }
}

/// An index the model wants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedIndex {
    pub name: String,
    pub options: IndexOptions,
    pub keys: Vec<IndexKey>,
    /// Declared at model level; keys are written with their direction.
    pub named: bool,
}

impl PlannedIndex {
    /// Same method, uniqueness and ordered keys. A different key count is
    /// never identical.
    pub fn matches(&self, actual: &IndexDescriptor) -> bool {
        self.options.method_or_default() == actual.method
            && self.options.unique == actual.unique
            && self.keys == actual.keys
    }

    pub fn to_sql(&self, schema: &str, table: &str) -> String {
        let keys: Vec<String> = self
            .keys
            .iter()
            .map(|key| {
                if self.named {
                    format!("{} {}", escape_identifier(&key.column), key.direction)
                } else {
                    escape_identifier(&key.column)
                }
            })
            .collect();
        let using = match &self.options.method {
            Some(method) => format!(" USING {}", method),
            None => String::new(),
        };
        format!(
            "CREATE {}INDEX {} ON {}{} ({})",
            if self.options.unique { "UNIQUE " } else { "" },
            escape_identifier(&self.name),
            qualified_table(schema, table),
            using,
            keys.join(",")
        )
    }
}

/// One index-level difference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexChange {
    Dropped { name: String },
    Created(PlannedIndex),
}

impl IndexChange {
    pub fn to_sql(&self, schema: &str, table: &str) -> String {
        match self {
            IndexChange::Dropped { name } => {
                format!("DROP INDEX {}", qualified_table(schema, name))
            }
            IndexChange::Created(index) => index.to_sql(schema, table),
        }
    }
}

/// What reconciling one model does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncAction {
    CreateTable,
    AlterTable {
        columns: Vec<ColumnChange>,
        indexes: Vec<IndexChange>,
    },
    NoOp,
}

impl SyncAction {
    pub fn is_noop(&self) -> bool {
        matches!(self, SyncAction::NoOp)
    }
}

fn column_definition(column: &str, data_type: &str, nullable: bool, default: Option<&str>) -> String {
    let mut sql = format!("{} {}", escape_identifier(column), data_type);
    if let Some(expression) = default {
        sql.push_str(" DEFAULT ");
        sql.push_str(expression);
    }
    if !nullable {
        sql.push_str(" NOT NULL");
    }
    sql
}

/// Auto-generated name of a single-column index.
pub fn index_name(table: &str, column: &str) -> String {
    format!("{}_{}_idx", table, column)
}

/// Every index the model declares: property-level ones first, then the
/// named model-level ones with keys resolved to columns.
pub fn declared_indexes(model: &ModelDefinition) -> Vec<PlannedIndex> {
    let table = model.table();
    let mut indexes: Vec<PlannedIndex> = model
        .columns()
        .filter_map(|(_, column, property)| {
            property.index().map(|options| PlannedIndex {
                name: index_name(&table, &column),
                options: options.clone(),
                keys: vec![IndexKey::asc(column)],
                named: false,
            })
        })
        .collect();

    indexes.extend(model.indexes().iter().map(|named| PlannedIndex {
        name: named.name.clone(),
        options: named.spec.options.clone(),
        keys: named
            .spec
            .keys
            .iter()
            .map(|key| {
                let column = model.column_name(&key.column).unwrap_or_else(|| key.column.clone());
                IndexKey::new(column, key.direction)
            })
            .collect(),
        named: true,
    }));
    indexes
}

fn diff_columns(model: &ModelDefinition, actual: &ActualSchema) -> Vec<ColumnChange> {
    let mut changes = Vec::new();

    for (_, column, property) in model.columns() {
        if property.is_id() {
            continue;
        }
        let declared = declared_native_type(property);
        let nullable = column_nullable(property, &declared);
        match actual.column(&column) {
            None => changes.push(ColumnChange::Added {
                column,
                data_type: declared,
                nullable,
                default: property.db_default().map(str::to_string),
            }),
            Some(existing) => {
                if stored_native_type(&existing.data_type.to_ascii_uppercase()) != stored_native_type(&declared) {
                    // ALTER COLUMN ... TYPE does not accept the serial pseudo-types
                    let to = if is_serial_type(&declared) { stored_native_type(&declared) } else { declared };
                    changes.push(ColumnChange::TypeChanged {
                        column: column.clone(),
                        from: existing.data_type.clone(),
                        to,
                    });
                }
                if existing.nullable != nullable {
                    changes.push(ColumnChange::NullabilityChanged { column, nullable });
                }
            }
        }
    }

    let id_columns = model.id_columns();
    for existing in &actual.columns {
        if model.property_for_column(&existing.name).is_none() && !id_columns.contains(&existing.name) {
            changes.push(ColumnChange::Dropped { column: existing.name.clone() });
        }
    }
    changes
}

/// `<table>_<column>_idx` back to `<column>`.
fn inferred_column<'a>(table: &str, index: &'a str) -> Option<&'a str> {
    index
        .strip_prefix(table)?
        .strip_prefix('_')?
        .strip_suffix("_idx")
        .filter(|c| !c.is_empty())
}

fn diff_indexes(
    model: &ModelDefinition,
    actual: &ActualSchema,
    dropped_columns: &HashSet<&str>,
) -> Vec<IndexChange> {
    let table = model.table();
    let declared = declared_indexes(model);
    let mut drops = Vec::new();
    let mut recreate = HashSet::new();

    for existing in &actual.indexes {
        if existing.primary || existing.constraint {
            continue;
        }
        // removed by PostgreSQL together with the column
        if existing.columns().any(|c| dropped_columns.contains(c)) {
            continue;
        }
        match declared.iter().find(|d| d.name == existing.name) {
            Some(wanted) => {
                if !wanted.matches(existing) {
                    drops.push(IndexChange::Dropped { name: existing.name.clone() });
                    recreate.insert(existing.name.as_str());
                }
            }
            None => {
                let claimed = inferred_column(&table, &existing.name).is_some_and(|column| {
                    declared
                        .iter()
                        .any(|d| !d.named && d.keys.len() == 1 && d.keys[0].column == column)
                });
                if !claimed {
                    drops.push(IndexChange::Dropped { name: existing.name.clone() });
                }
            }
        }
    }

    let creates = declared
        .into_iter()
        .filter(|d| actual.index(&d.name).is_none() || recreate.contains(d.name.as_str()))
        .map(IndexChange::Created);

    drops.into_iter().chain(creates).collect()
}

/// Decides how to bring `actual` in line with `model`.
pub fn plan(model: &ModelDefinition, actual: &ActualSchema) -> SyncAction {
    if !actual.table_exists() {
        return SyncAction::CreateTable;
    }

    let columns = diff_columns(model, actual);
    let dropped: HashSet<&str> = columns
        .iter()
        .filter(|c| c.is_drop())
        .map(ColumnChange::column)
        .collect();
    let indexes = diff_indexes(model, actual, &dropped);

    if columns.is_empty() && indexes.is_empty() {
        SyncAction::NoOp
    } else {
        SyncAction::AlterTable { columns, indexes }
    }
}

/// The two `ALTER TABLE` statements for a set of column changes: adds and
/// modifications first, drops second.
pub fn alter_table_statements(
    model: &ModelDefinition,
    changes: &[ColumnChange],
) -> (Option<String>, Option<String>) {
    let table = model.qualified_table();
    let statement = |clauses: Vec<String>| {
        (!clauses.is_empty()).then(|| format!("ALTER TABLE {} {}", table, clauses.join(", ")))
    };

    let (drops, others): (Vec<&ColumnChange>, Vec<&ColumnChange>) =
        changes.iter().partition(|c| c.is_drop());
    (
        statement(others.iter().map(|c| c.to_sql()).collect()),
        statement(drops.iter().map(|c| c.to_sql()).collect()),
    )
}

/// Index statements joined into one batch.
pub fn index_batch(model: &ModelDefinition, changes: &[IndexChange]) -> Option<String> {
    if changes.is_empty() {
        return None;
    }
    let table = model.table();
    let statements: Vec<String> = changes
        .iter()
        .map(|c| c.to_sql(model.schema(), &table))
        .collect();
    Some(statements.join(";\n"))
}

fn column_nullable(property: &PropertyDefinition, declared: &str) -> bool {
    property.is_nullable() && !is_serial_type(declared)
}

fn property_column_sql(column: &str, property: &PropertyDefinition, inline_primary_key: bool) -> String {
    let declared = declared_native_type(property);
    let mut sql = column_definition(
        column,
        &declared,
        column_nullable(property, &declared),
        property.db_default(),
    );
    if inline_primary_key {
        sql.push_str(" PRIMARY KEY");
    }
    sql
}

/// `CREATE TABLE` for `model`, with foreign keys resolved through `registry`.
///
/// # Errors
///
/// Returns [`ConnectorError::UnknownModel`] when a foreign key references a
/// model the registry does not know, and [`ConnectorError::Validation`] when
/// a key names no live property.
pub fn create_table_statement(model: &ModelDefinition, registry: &dyn ModelRegistry) -> Result<String> {
    let ids = model.id_columns();
    let single_id = ids.len() == 1;

    let mut definitions: Vec<String> = model
        .columns()
        .map(|(_, column, property)| property_column_sql(&column, property, single_id && property.is_id()))
        .collect();

    if ids.len() > 1 {
        let quoted: Vec<String> = ids.iter().map(|c| escape_identifier(c)).collect();
        definitions.push(format!("PRIMARY KEY({})", quoted.join(",")));
    }

    for fk in model.foreign_keys() {
        let column = model.column_name(&fk.foreign_key).ok_or_else(|| {
            ConnectorError::Validation(format!(
                "Foreign key {} on {} names unknown property '{}'",
                fk.name,
                model.name(),
                fk.foreign_key
            ))
        })?;
        let entity = registry.require(&fk.entity)?;
        let entity_column = entity.column_name(&fk.entity_key).ok_or_else(|| {
            ConnectorError::Validation(format!(
                "Foreign key {} references unknown property '{}' of {}",
                fk.name,
                fk.entity_key,
                fk.entity
            ))
        })?;
        definitions.push(format!(
            "CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {}({})",
            escape_identifier(&fk.name),
            escape_identifier(&column),
            entity.qualified_table(),
            escape_identifier(&entity_column)
        ));
    }

    Ok(format!(
        "CREATE TABLE {} ({})",
        model.qualified_table(),
        definitions.join(", ")
    ))
}

/// Reconciles declared models with the database through a provider.
pub struct SchemaSynchronizer<P: ConnectionProvider> {
    provider: Arc<P>,
    registry: Arc<dyn ModelRegistry>,
}

impl<P: ConnectionProvider> Clone for SchemaSynchronizer<P> {
    fn clone(&self) -> Self {
        Self {
            provider: Arc::clone(&self.provider),
            registry: Arc::clone(&self.registry),
        }
    }
}

impl<P: ConnectionProvider> SchemaSynchronizer<P> {
    pub fn new(provider: Arc<P>, registry: Arc<dyn ModelRegistry>) -> Self {
        Self { provider, registry }
    }

    pub fn registry(&self) -> &Arc<dyn ModelRegistry> {
        &self.registry
    }

    /// Reads the live table of a model.
    pub async fn actual_schema(&self, model: &ModelDefinition) -> Result<ActualSchema> {
        get_actual_schema(self.provider.as_ref(), model.schema(), &model.table()).await
    }

    /// Decides what [`autoupdate`](Self::autoupdate) would do, without
    /// executing any DDL.
    pub async fn plan(&self, model_name: &str) -> Result<SyncAction> {
        let model = self.registry.require(model_name)?;
        let actual = self.actual_schema(&model).await?;
        Ok(plan(&model, &actual))
    }

    /// Brings the table of `model_name` in line with its declaration and
    /// returns the action taken.
    #[instrument(skip(self))]
    pub async fn autoupdate(&self, model_name: &str) -> Result<SyncAction> {
        let model = self.registry.require(model_name)?;
        let actual = self.actual_schema(&model).await?;
        let action = plan(&model, &actual);
        debug!(action = ?action, "Reconciliation planned");

        match &action {
            SyncAction::NoOp => {}
            SyncAction::CreateTable => self.create_table(&model).await?,
            SyncAction::AlterTable { columns, indexes } => {
                let (changes, drops) = alter_table_statements(&model, columns);
                if let Some(sql) = changes {
                    self.provider.execute(&sql, &[]).await?;
                }
                if let Some(sql) = drops {
                    self.provider.execute(&sql, &[]).await?;
                }
                if let Some(batch) = index_batch(&model, indexes) {
                    self.provider.execute(&batch, &[]).await?;
                }
            }
        }
        Ok(action)
    }

    /// Reconciles every named model, or every registered one when `models`
    /// is empty. Models run concurrently and fail independently.
    pub async fn autoupdate_all(&self, models: &[String]) -> Vec<(String, Result<SyncAction>)> {
        let names = if models.is_empty() {
            self.registry.model_names()
        } else {
            models.to_vec()
        };

        let results = join_all(names.iter().map(|name| self.autoupdate(name))).await;
        names
            .into_iter()
            .zip(results)
            .inspect(|(name, result)| {
                if let Err(e) = result {
                    warn!(model = %name, error = %e, "Reconciliation failed");
                }
            })
            .collect()
    }

    /// True when every named model (or every registered one) reconciles to
    /// [`SyncAction::NoOp`]. Executes no DDL.
    pub async fn is_actual(&self, models: &[String]) -> Result<bool> {
        let names = if models.is_empty() {
            self.registry.model_names()
        } else {
            models.to_vec()
        };
        for name in &names {
            if !self.plan(name).await?.is_noop() {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Drops and recreates the tables of the named models, in order.
    #[instrument(skip(self))]
    pub async fn automigrate(&self, models: &[String]) -> Result<()> {
        let names = if models.is_empty() {
            self.registry.model_names()
        } else {
            models.to_vec()
        };
        for name in &names {
            let model = self.registry.require(name)?;
            self.drop_table(name).await?;
            self.create_table(&model).await?;
        }
        Ok(())
    }

    /// `DROP TABLE IF EXISTS` for a model.
    pub async fn drop_table(&self, model_name: &str) -> Result<()> {
        let model = self.registry.require(model_name)?;
        let sql = format!("DROP TABLE IF EXISTS {}", model.qualified_table());
        debug!(sql = %sql, "Dropping table");
        self.provider.execute(&sql, &[]).await?;
        Ok(())
    }

    async fn create_schema(&self, schema: &str) -> Result<()> {
        let sql = format!("CREATE SCHEMA {}", escape_identifier(schema));
        match self.provider.execute(&sql, &[]).await {
            Ok(_) => Ok(()),
            Err(e) if e.sqlstate() == Some(DUPLICATE_SCHEMA) => {
                debug!(schema = %schema, "Schema already exists");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Creates the schema, the table and every declared index.
    pub async fn create_table(&self, model: &ModelDefinition) -> Result<()> {
        let statement = create_table_statement(model, self.registry.as_ref())?;
        self.create_schema(model.schema()).await?;
        self.provider.execute(&statement, &[]).await?;
        info!(table = %model.qualified_table(), "Created table");

        let indexes: Vec<IndexChange> = declared_indexes(model)
            .into_iter()
            .map(IndexChange::Created)
            .collect();
        if let Some(batch) = index_batch(model, &indexes) {
            self.provider.execute(&batch, &[]).await?;
        }
        Ok(())
    }
}
