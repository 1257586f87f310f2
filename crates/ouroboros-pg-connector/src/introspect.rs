//! Live table shape read from the PostgreSQL catalog.

use tracing::{debug, instrument};

use crate::index::{IndexKey, SortDirection};
use crate::provider::ConnectionProvider;
use crate::typemap::catalog_native_type;
use crate::{ConnectorError, Result, Row, SqlValue};

const COLUMNS_SQL: &str = "SELECT column_name::text AS \"column\", data_type::text AS \"type\", \
     udt_name::text AS \"udt\", character_maximum_length::int4 AS \"length\", \
     numeric_precision::int4 AS \"precision\", numeric_scale::int4 AS \"scale\", \
     is_nullable::text AS \"nullable\", column_default::text AS \"default\" \
     FROM information_schema.columns \
     WHERE table_schema = $1 AND table_name = $2 \
     ORDER BY ordinal_position";

// Keys come from the index's own ordinal positions; expression keys have no
// attribute and drop out of both arrays together.
const INDEXES_SQL: &str = "SELECT i.relname::text AS \"name\", am.amname::text AS \"method\", \
     ix.indisprimary AS \"primary\", ix.indisunique AS \"unique\", \
     EXISTS(SELECT 1 FROM pg_constraint c WHERE c.conindid = ix.indexrelid \
       AND c.conrelid = t.oid AND c.contype IN ('p', 'u', 'x')) AS \"constraint\", \
     ARRAY(SELECT a.attname::text FROM generate_subscripts(ix.indkey, 1) AS k \
       JOIN pg_attribute a ON a.attrelid = t.oid AND a.attnum = ix.indkey[k] \
       WHERE k < ix.indnkeyatts ORDER BY k) AS \"keys\", \
     ARRAY(SELECT CASE WHEN (ix.indoption[k]::int4 & 1) = 1 THEN 'DESC' ELSE 'ASC' END \
       FROM generate_subscripts(ix.indkey, 1) AS k \
       JOIN pg_attribute a ON a.attrelid = t.oid AND a.attnum = ix.indkey[k] \
       WHERE k < ix.indnkeyatts ORDER BY k) AS \"directions\" \
     FROM pg_index ix \
     JOIN pg_class t ON t.oid = ix.indrelid \
     JOIN pg_class i ON i.oid = ix.indexrelid \
     JOIN pg_am am ON am.oid = i.relam \
     JOIN pg_namespace n ON n.oid = t.relnamespace \
     WHERE n.nspname = $1 AND t.relname = $2 \
     ORDER BY i.relname";

/// An introspected column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDescriptor {
    pub name: String,
    /// Canonical native type, comparable with
    /// [`declared_native_type`](crate::typemap::declared_native_type).
    pub data_type: String,
    pub length: Option<u32>,
    pub nullable: bool,
    pub default: Option<String>,
}

/// An introspected index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDescriptor {
    pub name: String,
    /// Access method, lowercase (`btree`, `hash`, ...).
    pub method: String,
    pub primary: bool,
    pub unique: bool,
    /// Backs a PRIMARY KEY, UNIQUE or EXCLUDE constraint and cannot be
    /// dropped on its own.
    pub constraint: bool,
    pub keys: Vec<IndexKey>,
}

impl IndexDescriptor {
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.keys.iter().map(|k| k.column.as_str())
    }
}

/// Columns and indexes of one table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActualSchema {
    pub columns: Vec<ColumnDescriptor>,
    pub indexes: Vec<IndexDescriptor>,
}

impl ActualSchema {
    /// A table without columns does not exist.
    pub fn table_exists(&self) -> bool {
        !self.columns.is_empty()
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDescriptor> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn index(&self, name: &str) -> Option<&IndexDescriptor> {
        self.indexes.iter().find(|i| i.name == name)
    }
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

/// Maps an `information_schema.columns` row.
pub fn column_from_row(row: &Row) -> Result<ColumnDescriptor> {
    let length = opt_u32(row, "length")?;
    let data_type = catalog_native_type(
        row.get_str("type")?,
        row.get_opt_str("udt")?.unwrap_or(""),
        length,
        opt_u32(row, "precision")?,
        opt_u32(row, "scale")?,
    );
    Ok(ColumnDescriptor {
        name: row.get_str("column")?.to_string(),
        data_type,
        length,
        nullable: row.get_str("nullable")?.eq_ignore_ascii_case("YES"),
        default: row.get_opt_str("default")?.map(str::to_string),
    })
}

/// Maps a row of the index catalog query.
pub fn index_from_row(row: &Row) -> Result<IndexDescriptor> {
    let columns = row.get_str_array("keys")?;
    let directions = row.get_str_array("directions")?;
    let keys = columns
        .into_iter()
        .enumerate()
        .map(|(i, column)| {
            let direction = directions
                .get(i)
                .and_then(|d| SortDirection::parse(d))
                .unwrap_or_default();
            IndexKey::new(column, direction)
        })
        .collect();

    Ok(IndexDescriptor {
        name: row.get_str("name")?.to_string(),
        method: row.get_str("method")?.to_ascii_lowercase(),
        primary: row.get_bool("primary")?,
        unique: row.get_bool("unique")?,
        constraint: row.get("constraint").and_then(SqlValue::as_bool).unwrap_or(false),
        keys,
    })
}

/// Reads the columns and indexes of `"schema"."table"`.
///
/// Both catalog queries run concurrently; an error from either is returned.
/// An empty column list means the table does not exist.
#[instrument(skip(provider))]
pub async fn get_actual_schema<P>(provider: &P, schema: &str, table: &str) -> Result<ActualSchema>
where
    P: ConnectionProvider + ?Sized,
{
    let params = [SqlValue::Text(schema.to_string()), SqlValue::Text(table.to_string())];
    let (columns, indexes) = tokio::try_join!(
        provider.execute(COLUMNS_SQL, &params),
        provider.execute(INDEXES_SQL, &params),
    )?;

    let actual = ActualSchema {
        columns: columns.rows.iter().map(column_from_row).collect::<Result<_>>()?,
        indexes: indexes.rows.iter().map(index_from_row).collect::<Result<_>>()?,
    };
    debug!(
        columns = actual.columns.len(),
        indexes = actual.indexes.len(),
        "Introspected table"
    );
    Ok(actual)
}
