//! PostgreSQL connector for the ouroboros ORM.
//!
//! The connector turns model definitions and ORM filters into parameterized
//! PostgreSQL statements, keeps tables in line with their models, and runs
//! statements on a sqlx pool or inside explicit transactions.
//!
//! # Architecture
//!
//! ```text
//!   PostgresConnector (connector.rs)
//!     |-- QueryCompiler        query/     filters -> SELECT / COUNT / INSERT / UPDATE / DELETE
//!     |-- SchemaSynchronizer   migration  model vs. introspect -> ALTER TABLE / indexes
//!     |-- SchemaDiscovery      discovery  catalog -> model definitions
//!     |-- TransactionDelegate  transaction
//!     '-- ConnectionProvider   provider   <- PgProvider (sqlx pool), or an in-memory fake
//! ```
//!
//! Everything above the provider is driver-independent: the compiler and the
//! synchronizer only ever see SQL text, [`SqlValue`] parameters and [`Row`]s.
//!
//! # Safety
//!
//! Values are always bound as `$n` parameters. Identifiers are always quoted
//! with [`escape_identifier`]; the only literals ever inlined are JSON path
//! keys and regular expression sources, which go through [`escape_literal`].
//!
//! # Usage
//!
//! ```
//! use ouroboros_pg_connector::{
//!     Filter, IdSortPolicy, ModelDefinition, PropertyDefinition, PropertyType, QueryCompiler,
//! };
//! use serde_json::json;
//!
//! let model = ModelDefinition::new("Customer")
//!     .with_schema("shop")
//!     .with_property("id", PropertyDefinition::new(PropertyType::Number).id())
//!     .with_property("name", PropertyDefinition::new(PropertyType::String));
//!
//! let filter = Filter::from_json(&json!({"where": {"name": {"like": "A%"}}})).unwrap();
//! let compiled = QueryCompiler::new(IdSortPolicy::Never)
//!     .compile_select(&model, &filter)
//!     .unwrap();
//!
//! assert!(compiled.sql().starts_with("SELECT \"id\",\"name\" FROM \"shop\".\"customer\""));
//! assert_eq!(compiled.params().len(), 1);
//! ```
//!
//! Against a live server:
//!
//! ```rust,ignore
//! use ouroboros_pg_connector::{ConnectorSettings, IsolationLevel, PostgresConnector};
//!
//! # async fn example() -> ouroboros_pg_connector::Result<()> {
//! let connector = PostgresConnector::connect(ConnectorSettings::from_env()?).await?;
//! connector.define_json(&serde_json::json!({
//!     "name": "Customer",
//!     "properties": {"id": {"type": "Number", "id": true}, "name": {"type": "String"}}
//! }))?;
//! connector.autoupdate("Customer").await?;
//!
//! let mut tx = connector.begin_transaction(IsolationLevel::Serializable).await?;
//! connector.create("Customer", &serde_json::json!({"id": 1, "name": "Ada"}), Some(&mut tx)).await?;
//! connector.commit(&mut tx).await?;
//! # Ok(())
//! # }
//! ```

/// sqlx pool and the [`PgProvider`] implementation of [`ConnectionProvider`].
pub mod connection;

pub mod connector;

/// Catalog reads that turn existing tables and views into model definitions.
pub mod discovery;

pub mod escape;

/// Index declarations: shorthand forms, keys and options.
pub mod index;

/// Live columns and indexes of one table.
pub mod introspect;

/// Schema planning and the DDL pipeline.
pub mod migration;

/// Model and property definitions plus the model registry.
pub mod model;

pub mod provider;

/// Filter parsing and SQL compilation.
pub mod query;

pub mod row;

/// Connector settings read from JSON or the environment.
pub mod settings;

/// Explicit transactions pinned to one connection.
pub mod transaction;

/// Abstract property types and their PostgreSQL spelling.
pub mod typemap;

pub mod types;

/// Conversion between JSON model data and bound values.
pub mod values;

pub use connection::{PgPooledConnection, PgProvider, PoolConfig};
pub use connector::PostgresConnector;
pub use discovery::{
    DiscoveredModel, DiscoveredProperty, DiscoveryOptions, ForeignKeyColumn, ModelKind,
    PrimaryKeyColumn, SchemaDiscovery,
};
pub use escape::{escape_identifier, escape_literal, qualified_table};
pub use index::{IndexKey, IndexOptions, IndexSpec, SortDirection};
pub use introspect::{get_actual_schema, ActualSchema, ColumnDescriptor, IndexDescriptor};
pub use migration::{ColumnChange, IndexChange, PlannedIndex, SchemaSynchronizer, SyncAction};
pub use model::{
    ForeignKeyDefinition, InMemoryRegistry, ModelDefinition, ModelRegistry, NamedIndex,
    PropertyDefinition,
};
pub use provider::{ConnectionProvider, ProviderConnection, QueryOutput};
pub use query::{
    CompileWarning, Compiled, FieldSelection, Filter, FilterTree, Operator, OrderSpec,
    ParameterizedFragment, QueryCompiler,
};
pub use row::Row;
pub use settings::{ConnectorSettings, IdSortPolicy};
pub use transaction::{
    AccessMode, IsolationLevel, Transaction, TransactionDelegate, TransactionOptions,
};
pub use typemap::PropertyType;
pub use types::SqlValue;

pub use ouroboros_common::{ConnectorError, Result};
