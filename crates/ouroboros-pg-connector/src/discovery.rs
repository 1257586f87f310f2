//! Catalog discovery: tables, columns and keys of an existing database.
//!
//! An omitted owner means the connection's `current_schema()`.

use std::sync::Arc;
use tracing::{debug, instrument};

use crate::model::{ModelDefinition, PropertyDefinition};
use crate::provider::ConnectionProvider;
use crate::typemap::{catalog_native_type, to_abstract_type, PropertyType};
use crate::{ConnectorError, Result, Row, SqlValue};

const TABLES_SQL: &str = "SELECT 'table' AS \"type\", table_name::text AS \"name\", \
     table_schema::text AS \"owner\" FROM information_schema.tables \
     WHERE table_type = 'BASE TABLE'";

const VIEWS_SQL: &str = "SELECT 'view' AS \"type\", table_name::text AS \"name\", \
     table_schema::text AS \"owner\" FROM information_schema.views";

const SYSTEM_SCHEMAS: &str = "('pg_catalog', 'information_schema')";

const PROPERTIES_SQL: &str = "SELECT table_schema::text AS \"owner\", table_name::text AS \"table\", \
     column_name::text AS \"column\", data_type::text AS \"type\", udt_name::text AS \"udt\", \
     character_maximum_length::int4 AS \"length\", numeric_precision::int4 AS \"precision\", \
     numeric_scale::int4 AS \"scale\", is_nullable::text AS \"nullable\" \
     FROM information_schema.columns \
     WHERE table_name = $1 AND table_schema = COALESCE($2::text, current_schema()) \
     ORDER BY ordinal_position";

const PRIMARY_KEYS_SQL: &str = "SELECT kc.table_schema::text AS \"owner\", kc.table_name::text AS \"table\", \
     kc.column_name::text AS \"column\", kc.ordinal_position::int4 AS \"keySeq\", \
     kc.constraint_name::text AS \"pkName\" \
     FROM information_schema.key_column_usage kc \
     JOIN information_schema.table_constraints tc \
       ON kc.table_name = tc.table_name AND kc.table_schema = tc.table_schema \
       AND kc.constraint_name = tc.constraint_name \
     WHERE tc.constraint_type = 'PRIMARY KEY' AND kc.table_name = $1 \
       AND kc.table_schema = COALESCE($2::text, current_schema()) \
     ORDER BY kc.ordinal_position";

const FOREIGN_KEYS_SQL: &str = "SELECT ns.nspname::text AS \"fkOwner\", c.conname::text AS \"fkName\", \
     t.relname::text AS \"fkTable\", a.attname::text AS \"fkColumn\", k.seq::int4 AS \"keySeq\", \
     fns.nspname::text AS \"pkOwner\", ft.relname::text AS \"pkTable\", fa.attname::text AS \"pkColumn\", \
     (SELECT pc.conname::text FROM pg_constraint pc \
       WHERE pc.conrelid = c.confrelid AND pc.contype = 'p' LIMIT 1) AS \"pkName\" \
     FROM pg_constraint c \
     JOIN pg_class t ON t.oid = c.conrelid \
     JOIN pg_namespace ns ON ns.oid = t.relnamespace \
     JOIN pg_class ft ON ft.oid = c.confrelid \
     JOIN pg_namespace fns ON fns.oid = ft.relnamespace \
     CROSS JOIN LATERAL unnest(c.conkey, c.confkey) WITH ORDINALITY AS k(attnum, fattnum, seq) \
     JOIN pg_attribute a ON a.attrelid = c.conrelid AND a.attnum = k.attnum \
     JOIN pg_attribute fa ON fa.attrelid = c.confrelid AND fa.attnum = k.fattnum \
     WHERE c.contype = 'f' AND t.relname = $1 AND ns.nspname = COALESCE($2::text, current_schema()) \
     ORDER BY c.conname, k.seq";

/// Table or view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelKind {
    Table,
    View,
}

/// Listing options for [`SchemaDiscovery::discover_model_definitions`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveryOptions {
    /// Only this schema; every non-system schema when `None`.
    pub owner: Option<String>,
    pub views: bool,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

impl DiscoveryOptions {
    pub fn owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    pub fn with_views(mut self) -> Self {
        self.views = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredModel {
    pub kind: ModelKind,
    pub name: String,
    pub owner: String,
}

/// One column of a discovered table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredProperty {
    pub owner: String,
    pub table_name: String,
    pub column_name: String,
    /// Canonical native type.
    pub data_type: String,
    pub data_length: Option<u32>,
    pub data_precision: Option<u32>,
    pub data_scale: Option<u32>,
    pub nullable: bool,
    pub property_type: PropertyType,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrimaryKeyColumn {
    pub owner: String,
    pub table_name: String,
    pub column_name: String,
    pub key_seq: u32,
    pub pk_name: String,
}

/// One column pair of a foreign key constraint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKeyColumn {
    pub fk_owner: String,
    pub fk_name: String,
    pub fk_table_name: String,
    pub fk_column_name: String,
    pub key_seq: u32,
    pub pk_owner: String,
    pub pk_name: Option<String>,
    pub pk_table_name: String,
    pub pk_column_name: String,
}

fn opt_u32(row: &Row, column: &str) -> Result<Option<u32>> {
    row.get_opt_i64(column)?
        .map(|v| {
            u32::try_from(v).map_err(|_| {
                ConnectorError::Deserialization(format!("Column '{}' out of range: {}", column, v))
            })
        })
        .transpose()
}

fn req_u32(row: &Row, column: &str) -> Result<u32> {
    opt_u32(row, column)?
        .ok_or_else(|| ConnectorError::Deserialization(format!("Column '{}' is NULL", column)))
}

fn model_from_row(row: &Row) -> Result<DiscoveredModel> {
    let kind = match row.get_str("type")? {
        "view" => ModelKind::View,
        _ => ModelKind::Table,
    };
    Ok(DiscoveredModel {
        kind,
        name: row.get_str("name")?.to_string(),
        owner: row.get_str("owner")?.to_string(),
    })
}

fn property_from_row(row: &Row) -> Result<DiscoveredProperty> {
    let data_length = opt_u32(row, "length")?;
    let data_precision = opt_u32(row, "precision")?;
    let data_scale = opt_u32(row, "scale")?;
    let data_type = catalog_native_type(
        row.get_str("type")?,
        row.get_opt_str("udt")?.unwrap_or(""),
        data_length,
        data_precision,
        data_scale,
    );
    Ok(DiscoveredProperty {
        owner: row.get_str("owner")?.to_string(),
        table_name: row.get_str("table")?.to_string(),
        column_name: row.get_str("column")?.to_string(),
        property_type: to_abstract_type(&data_type),
        data_type,
        data_length,
        data_precision,
        data_scale,
        nullable: row.get_str("nullable")?.eq_ignore_ascii_case("YES"),
    })
}

fn primary_key_from_row(row: &Row) -> Result<PrimaryKeyColumn> {
    Ok(PrimaryKeyColumn {
        owner: row.get_str("owner")?.to_string(),
        table_name: row.get_str("table")?.to_string(),
        column_name: row.get_str("column")?.to_string(),
        key_seq: req_u32(row, "keySeq")?,
        pk_name: row.get_str("pkName")?.to_string(),
    })
}

fn foreign_key_from_row(row: &Row) -> Result<ForeignKeyColumn> {
    Ok(ForeignKeyColumn {
        fk_owner: row.get_str("fkOwner")?.to_string(),
        fk_name: row.get_str("fkName")?.to_string(),
        fk_table_name: row.get_str("fkTable")?.to_string(),
        fk_column_name: row.get_str("fkColumn")?.to_string(),
        key_seq: req_u32(row, "keySeq")?,
        pk_owner: row.get_str("pkOwner")?.to_string(),
        pk_name: row.get_opt_str("pkName")?.map(str::to_string),
        pk_table_name: row.get_str("pkTable")?.to_string(),
        pk_column_name: row.get_str("pkColumn")?.to_string(),
    })
}

fn table_params(table: &str, owner: Option<&str>) -> [SqlValue; 2] {
    [
        SqlValue::Text(table.to_string()),
        owner.map_or(SqlValue::Null, |o| SqlValue::Text(o.to_string())),
    ]
}

/// Builds the listing query for [`SchemaDiscovery::discover_model_definitions`].
pub fn model_definitions_query(options: &DiscoveryOptions) -> (String, Vec<SqlValue>) {
    let mut params = Vec::new();
    let filter = |column: &str, params: &mut Vec<SqlValue>| match &options.owner {
        Some(owner) => {
            params.push(SqlValue::Text(owner.clone()));
            format!(" AND {} = ${}", column, params.len())
        }
        None => format!(" AND {} NOT IN {}", column, SYSTEM_SCHEMAS),
    };

    let mut sql = format!("{}{}", TABLES_SQL, filter("table_schema", &mut params));
    if options.views {
        // the view query has no WHERE of its own
        let view_filter = filter("table_schema", &mut params);
        sql.push_str(" UNION ALL ");
        sql.push_str(VIEWS_SQL);
        sql.push_str(" WHERE ");
        sql.push_str(view_filter.trim_start_matches(" AND "));
    }
    sql.push_str(" ORDER BY \"owner\", \"name\"");
    if let Some(limit) = options.limit {
        sql.push_str(&format!(" LIMIT {}", limit));
    }
    if let Some(offset) = options.offset {
        sql.push_str(&format!(" OFFSET {}", offset));
    }
    (sql, params)
}

/// Reads existing tables back into descriptions.
pub struct SchemaDiscovery<P: ConnectionProvider> {
    provider: Arc<P>,
}

impl<P: ConnectionProvider> Clone for SchemaDiscovery<P> {
    fn clone(&self) -> Self {
        Self { provider: Arc::clone(&self.provider) }
    }
}

impl<P: ConnectionProvider> SchemaDiscovery<P> {
    pub fn new(provider: Arc<P>) -> Self {
        Self { provider }
    }

    /// Lists tables, and views when asked for.
    #[instrument(skip(self))]
    pub async fn discover_model_definitions(&self, options: &DiscoveryOptions) -> Result<Vec<DiscoveredModel>> {
        let (sql, params) = model_definitions_query(options);
        let output = self.provider.execute(&sql, &params).await?;
        output.rows.iter().map(model_from_row).collect()
    }

    /// Columns of `table` in ordinal order.
    pub async fn discover_model_properties(
        &self,
        table: &str,
        owner: Option<&str>,
    ) -> Result<Vec<DiscoveredProperty>> {
        let output = self
            .provider
            .execute(PROPERTIES_SQL, &table_params(table, owner))
            .await?;
        output.rows.iter().map(property_from_row).collect()
    }

    /// Primary key columns of `table` in key order.
    pub async fn discover_primary_keys(&self, table: &str, owner: Option<&str>) -> Result<Vec<PrimaryKeyColumn>> {
        let output = self
            .provider
            .execute(PRIMARY_KEYS_SQL, &table_params(table, owner))
            .await?;
        output.rows.iter().map(primary_key_from_row).collect()
    }

    /// Foreign key columns declared on `table`.
    pub async fn discover_foreign_keys(&self, table: &str, owner: Option<&str>) -> Result<Vec<ForeignKeyColumn>> {
        let output = self
            .provider
            .execute(FOREIGN_KEYS_SQL, &table_params(table, owner))
            .await?;
        output.rows.iter().map(foreign_key_from_row).collect()
    }

    /// A model definition for an existing table: one property per column,
    /// named after the column, with the primary key columns as ids.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectorError::UnknownModel`] when the table has no columns.
    #[instrument(skip(self))]
    pub async fn discover_schema(&self, table: &str, owner: Option<&str>) -> Result<ModelDefinition> {
        let (properties, keys) = tokio::try_join!(
            self.discover_model_properties(table, owner),
            self.discover_primary_keys(table, owner),
        )?;
        let first = properties
            .first()
            .ok_or_else(|| ConnectorError::UnknownModel(table.to_string()))?;
        debug!(columns = properties.len(), keys = keys.len(), "Discovered table");

        let mut model = ModelDefinition::new(table)
            .with_table(table)
            .with_schema(first.owner.clone());
        for column in &properties {
            let mut definition = PropertyDefinition::new(column.property_type)
                .with_column_name(column.column_name.clone())
                .with_data_type(column.data_type.clone())
                .nullable(column.nullable);
            if let Some(length) = column.data_length {
                definition = definition.with_length(length);
            }
            if let (Some(precision), Some(scale)) = (column.data_precision, column.data_scale) {
                definition = definition.with_precision(precision, scale);
            }
            if keys.iter().any(|k| k.column_name == column.column_name) {
                definition = definition.id();
            }
            model = model.with_property(column.column_name.clone(), definition);
        }
        Ok(model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_definitions_query_all_schemas() {
        let (sql, params) = model_definitions_query(&DiscoveryOptions::default());
        assert!(sql.contains("table_type = 'BASE TABLE' AND table_schema NOT IN ('pg_catalog', 'information_schema')"));
        assert!(!sql.contains("UNION ALL"));
        assert!(sql.ends_with("ORDER BY \"owner\", \"name\""));
        assert!(params.is_empty());
    }

    #[test]
    fn test_model_definitions_query_owner_and_views() {
        let options = DiscoveryOptions { limit: Some(5), ..DiscoveryOptions::default() }
            .owner("sales")
            .with_views();
        let (sql, params) = model_definitions_query(&options);
        assert!(sql.contains("AND table_schema = $1 UNION ALL"));
        assert!(sql.contains("information_schema.views WHERE table_schema = $2"));
        assert!(sql.ends_with("LIMIT 5"));
        assert_eq!(params, vec![SqlValue::Text("sales".into()), SqlValue::Text("sales".into())]);
    }

    #[test]
    fn test_property_from_row() {
        let row = Row::from_pairs([
            ("owner", SqlValue::Text("public".into())),
            ("table", SqlValue::Text("invoice".into())),
            ("column", SqlValue::Text("total".into())),
            ("type", SqlValue::Text("numeric".into())),
            ("udt", SqlValue::Text("numeric".into())),
            ("length", SqlValue::Null),
            ("precision", SqlValue::Int(10)),
            ("scale", SqlValue::Int(2)),
            ("nullable", SqlValue::Text("NO".into())),
        ]);
        let property = property_from_row(&row).unwrap();
        assert_eq!(property.data_type, "NUMERIC(10,2)");
        assert_eq!(property.property_type, PropertyType::Number);
        assert!(!property.nullable);
    }

    #[test]
    fn test_foreign_key_from_row() {
        let row = Row::from_pairs([
            ("fkOwner", SqlValue::Text("public".into())),
            ("fkName", SqlValue::Text("order_customer_fk".into())),
            ("fkTable", SqlValue::Text("order".into())),
            ("fkColumn", SqlValue::Text("customerid".into())),
            ("keySeq", SqlValue::Int(1)),
            ("pkOwner", SqlValue::Text("public".into())),
            ("pkTable", SqlValue::Text("customer".into())),
            ("pkColumn", SqlValue::Text("id".into())),
            ("pkName", SqlValue::Null),
        ]);
        let fk = foreign_key_from_row(&row).unwrap();
        assert_eq!(fk.fk_column_name, "customerid");
        assert_eq!(fk.pk_table_name, "customer");
        assert_eq!(fk.pk_name, None);
        assert_eq!(fk.key_seq, 1);
    }
}
