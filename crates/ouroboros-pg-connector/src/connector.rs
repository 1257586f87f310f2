//! The connector facade.
//!
//! [`PostgresConnector`] owns the provider and the model registry and hands
//! them to the compiler, the synchronizer, discovery and the transaction
//! delegate. Every data operation can run on the pool or inside a
//! [`Transaction`].

use serde_json::{Map, Value as JsonValue};
use std::sync::Arc;
use tracing::{debug, info, instrument};

use crate::connection::PgProvider;
use crate::discovery::{
    DiscoveredModel, DiscoveredProperty, DiscoveryOptions, ForeignKeyColumn, PrimaryKeyColumn,
    SchemaDiscovery,
};
use crate::migration::{SchemaSynchronizer, SyncAction};
use crate::model::{InMemoryRegistry, ModelDefinition, ModelRegistry};
use crate::provider::{ConnectionProvider, QueryOutput};
use crate::query::{CompileWarning, Compiled, Filter, FilterTree, ParameterizedFragment, QueryCompiler};
use crate::settings::ConnectorSettings;
use crate::transaction::{Transaction, TransactionDelegate, TransactionOptions};
use crate::values::from_row;
use crate::{ConnectorError, Result, SqlValue};

/// PostgreSQL connector for ORM models.
pub struct PostgresConnector<P: ConnectionProvider = PgProvider> {
    settings: ConnectorSettings,
    provider: Arc<P>,
    registry: Arc<InMemoryRegistry>,
    compiler: QueryCompiler,
    synchronizer: SchemaSynchronizer<P>,
    discovery: SchemaDiscovery<P>,
    transactions: TransactionDelegate<P>,
}

impl<P: ConnectionProvider> std::fmt::Debug for PostgresConnector<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresConnector")
            .field("schema", &self.settings.schema)
            .field("default_id_sort", &self.settings.default_id_sort)
            .field("models", &self.registry.model_names())
            .finish_non_exhaustive()
    }
}

impl PostgresConnector<PgProvider> {
    /// Opens a pool for `settings.url`.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectorError::Connection`] when the URL is empty or
    /// invalid, or the server cannot be reached.
    #[instrument(skip(settings), fields(schema = %settings.schema))]
    pub async fn connect(settings: ConnectorSettings) -> Result<Self> {
        let provider = PgProvider::connect(&settings.url, &settings.pool).await?;
        info!("Connector ready");
        Ok(Self::with_provider(Arc::new(provider), settings))
    }
}

impl<P: ConnectionProvider> PostgresConnector<P> {
    /// Builds a connector over an existing provider.
    pub fn with_provider(provider: Arc<P>, settings: ConnectorSettings) -> Self {
        let registry = Arc::new(InMemoryRegistry::new(settings.schema.clone()));
        let shared: Arc<dyn ModelRegistry> = registry.clone();
        Self {
            compiler: QueryCompiler::new(settings.default_id_sort),
            synchronizer: SchemaSynchronizer::new(Arc::clone(&provider), shared),
            discovery: SchemaDiscovery::new(Arc::clone(&provider)),
            transactions: TransactionDelegate::new(Arc::clone(&provider)),
            settings,
            provider,
            registry,
        }
    }

    pub fn settings(&self) -> &ConnectorSettings {
        &self.settings
    }

    pub fn provider(&self) -> &Arc<P> {
        &self.provider
    }

    pub fn registry(&self) -> &Arc<InMemoryRegistry> {
        &self.registry
    }

    pub fn compiler(&self) -> QueryCompiler {
        self.compiler
    }

    pub fn synchronizer(&self) -> &SchemaSynchronizer<P> {
        &self.synchronizer
    }

    pub fn discovery(&self) -> &SchemaDiscovery<P> {
        &self.discovery
    }

    /// Registers or redefines a model.
    pub fn define(&self, model: ModelDefinition) -> Arc<ModelDefinition> {
        self.registry.register(model)
    }

    /// Registers a model from its JSON definition.
    pub fn define_json(&self, definition: &JsonValue) -> Result<Arc<ModelDefinition>> {
        self.registry.register_json(definition)
    }

    fn model(&self, name: &str) -> Result<Arc<ModelDefinition>> {
        self.registry.require(name)
    }

    pub async fn ping(&self) -> Result<()> {
        self.provider.execute("SELECT 1", &[]).await?;
        Ok(())
    }

    /// Executes raw SQL, inside `tx` when given.
    pub async fn execute(
        &self,
        sql: &str,
        params: &[SqlValue],
        tx: Option<&mut Transaction<P>>,
    ) -> Result<QueryOutput> {
        match tx {
            Some(tx) => self.transactions.execute(tx, sql, params).await,
            None => self.provider.execute(sql, params).await,
        }
    }

    async fn run(&self, fragment: &ParameterizedFragment, tx: Option<&mut Transaction<P>>) -> Result<QueryOutput> {
        self.execute(fragment.sql(), fragment.params(), tx).await
    }

    /// Rows of `model` matching `filter`, as property-keyed JSON objects.
    ///
    /// Compiler warnings are only logged; use [`find_with_warnings`](Self::find_with_warnings)
    /// to receive them.
    pub async fn find(
        &self,
        model: &str,
        filter: &Filter,
        tx: Option<&mut Transaction<P>>,
    ) -> Result<Vec<JsonValue>> {
        let (rows, _) = self.find_with_warnings(model, filter, tx).await?;
        Ok(rows)
    }

    /// Like [`find`](Self::find), also returning what the compiler had to
    /// ignore (regexp `g` / `m` flags).
    #[instrument(skip(self, filter, tx))]
    pub async fn find_with_warnings(
        &self,
        model: &str,
        filter: &Filter,
        tx: Option<&mut Transaction<P>>,
    ) -> Result<(Vec<JsonValue>, Vec<CompileWarning>)> {
        let definition = self.model(model)?;
        let Compiled { fragment, warnings } = self.compiler.compile_select(&definition, filter)?;
        let output = self.run(&fragment, tx).await?;
        debug!(rows = output.rows.len(), warnings = warnings.len(), "Find complete");
        let rows = output.rows.iter().map(|row| from_row(&definition, row)).collect();
        Ok((rows, warnings))
    }

    /// Number of rows matching `tree`.
    pub async fn count(
        &self,
        model: &str,
        tree: Option<&FilterTree>,
        tx: Option<&mut Transaction<P>>,
    ) -> Result<u64> {
        let definition = self.model(model)?;
        let filter = Filter { where_clause: tree.cloned(), ..Filter::default() };
        let Compiled { fragment, .. } = self.compiler.build_count(&definition, &filter)?;
        let output = self.run(&fragment, tx).await?;

        let count = match output.rows.first() {
            Some(row) => row.get_opt_i64("cnt")?.unwrap_or(0),
            None => 0,
        };
        u64::try_from(count)
            .map_err(|_| ConnectorError::Deserialization(format!("Negative count {}", count)))
    }

    /// Inserts one row and returns its identifier properties.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectorError::Validation`] when `data` is not an object.
    #[instrument(skip(self, data, tx))]
    pub async fn create(
        &self,
        model: &str,
        data: &JsonValue,
        tx: Option<&mut Transaction<P>>,
    ) -> Result<JsonValue> {
        let definition = self.model(model)?;
        let fragment = self.compiler.build_insert(&definition, as_object(data)?)?;
        let output = self.run(&fragment, tx).await?;
        Ok(output
            .rows
            .first()
            .map(|row| from_row(&definition, row))
            .unwrap_or_else(|| JsonValue::Object(Map::new())))
    }

    /// Updates every row matching `tree`; returns the affected count.
    pub async fn update_all(
        &self,
        model: &str,
        tree: Option<&FilterTree>,
        data: &JsonValue,
        tx: Option<&mut Transaction<P>>,
    ) -> Result<u64> {
        let definition = self.model(model)?;
        let Compiled { fragment, .. } = self.compiler.build_update(&definition, tree, as_object(data)?)?;
        Ok(self.run(&fragment, tx).await?.rows_affected)
    }

    /// Deletes every row matching `tree`; returns the affected count.
    pub async fn destroy_all(
        &self,
        model: &str,
        tree: Option<&FilterTree>,
        tx: Option<&mut Transaction<P>>,
    ) -> Result<u64> {
        let definition = self.model(model)?;
        let Compiled { fragment, .. } = self.compiler.build_delete(&definition, tree)?;
        Ok(self.run(&fragment, tx).await?.rows_affected)
    }

    pub async fn autoupdate(&self, model: &str) -> Result<SyncAction> {
        self.synchronizer.autoupdate(model).await
    }

    pub async fn autoupdate_all(&self, models: &[String]) -> Vec<(String, Result<SyncAction>)> {
        self.synchronizer.autoupdate_all(models).await
    }

    pub async fn automigrate(&self, models: &[String]) -> Result<()> {
        self.synchronizer.automigrate(models).await
    }

    pub async fn is_actual(&self, models: &[String]) -> Result<bool> {
        self.synchronizer.is_actual(models).await
    }

    pub async fn drop_table(&self, model: &str) -> Result<()> {
        self.synchronizer.drop_table(model).await
    }

    pub async fn discover_model_definitions(&self, options: &DiscoveryOptions) -> Result<Vec<DiscoveredModel>> {
        self.discovery.discover_model_definitions(options).await
    }

    pub async fn discover_model_properties(
        &self,
        table: &str,
        owner: Option<&str>,
    ) -> Result<Vec<DiscoveredProperty>> {
        self.discovery.discover_model_properties(table, owner).await
    }

    pub async fn discover_primary_keys(&self, table: &str, owner: Option<&str>) -> Result<Vec<PrimaryKeyColumn>> {
        self.discovery.discover_primary_keys(table, owner).await
    }

    pub async fn discover_foreign_keys(&self, table: &str, owner: Option<&str>) -> Result<Vec<ForeignKeyColumn>> {
        self.discovery.discover_foreign_keys(table, owner).await
    }

    pub async fn discover_schema(&self, table: &str, owner: Option<&str>) -> Result<ModelDefinition> {
        self.discovery.discover_schema(table, owner).await
    }

    /// Begins a transaction on a dedicated connection.
    pub async fn begin_transaction(&self, options: impl Into<TransactionOptions>) -> Result<Transaction<P>> {
        self.transactions.begin(options).await
    }

    pub async fn commit(&self, tx: &mut Transaction<P>) -> Result<()> {
        self.transactions.commit(tx).await
    }

    pub async fn rollback(&self, tx: &mut Transaction<P>) -> Result<()> {
        self.transactions.rollback(tx).await
    }
}

fn as_object(data: &JsonValue) -> Result<&Map<String, JsonValue>> {
    data.as_object().ok_or_else(|| {
        ConnectorError::Validation(format!("Model data must be an object, got {}", data))
    })
}
