//! In-memory provider shared by the integration tests.
//!
//! The fake serves the two catalog queries from a table map the test fills
//! in, records every other statement, and fails statements on request.

#![allow(dead_code)]

use async_trait::async_trait;
use ouroboros_pg_connector::{
    ConnectionProvider, ConnectorError, ConnectorSettings, IndexKey, PostgresConnector,
    ProviderConnection, QueryOutput, Result, Row, SortDirection, SqlValue,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct FakeTable {
    pub columns: Vec<Row>,
    pub indexes: Vec<Row>,
}

#[derive(Default)]
pub struct FakeState {
    pub tables: Mutex<HashMap<(String, String), FakeTable>>,
    /// Every non-catalog statement, in execution order.
    pub statements: Mutex<Vec<(String, Vec<SqlValue>)>>,
    /// Statements containing the needle fail with the error.
    pub failures: Mutex<Vec<(String, ConnectorError)>>,
    /// Canned results for statements containing the needle.
    pub responses: Mutex<Vec<(String, QueryOutput)>>,
    /// `discard` flag of every release.
    pub released: Mutex<Vec<bool>>,
    pub acquired: Mutex<usize>,
}

impl FakeState {
    fn run(&self, sql: &str, params: &[SqlValue]) -> Result<QueryOutput> {
        if sql.contains("information_schema.columns") && sql.contains("ordinal_position") {
            return Ok(QueryOutput::from_rows(self.catalog(params, |t| t.columns.clone())));
        }
        if sql.contains("FROM pg_index") {
            return Ok(QueryOutput::from_rows(self.catalog(params, |t| t.indexes.clone())));
        }

        self.statements.lock().push((sql.to_string(), params.to_vec()));
        if let Some((_, err)) = self.failures.lock().iter().find(|(needle, _)| sql.contains(needle.as_str())) {
            return Err(err.clone());
        }
        Ok(self
            .responses
            .lock()
            .iter()
            .find(|(needle, _)| sql.contains(needle.as_str()))
            .map(|(_, output)| output.clone())
            .unwrap_or_default())
    }

    fn catalog(&self, params: &[SqlValue], pick: impl Fn(&FakeTable) -> Vec<Row>) -> Vec<Row> {
        let key = match params {
            [SqlValue::Text(schema), SqlValue::Text(table), ..] => (schema.clone(), table.clone()),
            _ => return Vec::new(),
        };
        self.tables.lock().get(&key).map(pick).unwrap_or_default()
    }
}

pub struct FakeConnection {
    state: Arc<FakeState>,
}

#[async_trait]
impl ProviderConnection for FakeConnection {
    async fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<QueryOutput> {
        self.state.run(sql, params)
    }
}

#[derive(Clone, Default)]
pub struct FakeProvider {
    pub state: Arc<FakeState>,
}

impl FakeProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_table(&self, schema: &str, table: &str, contents: FakeTable) {
        self.state
            .tables
            .lock()
            .insert((schema.to_string(), table.to_string()), contents);
    }

    pub fn fail_on(&self, needle: &str, err: ConnectorError) {
        self.state.failures.lock().push((needle.to_string(), err));
    }

    pub fn respond(&self, needle: &str, output: QueryOutput) {
        self.state.responses.lock().push((needle.to_string(), output));
    }

    pub fn statements(&self) -> Vec<String> {
        self.state.statements.lock().iter().map(|(sql, _)| sql.clone()).collect()
    }

    pub fn last_params(&self) -> Vec<SqlValue> {
        self.state
            .statements
            .lock()
            .last()
            .map(|(_, params)| params.clone())
            .unwrap_or_default()
    }

    pub fn clear(&self) {
        self.state.statements.lock().clear();
    }

    pub fn released(&self) -> Vec<bool> {
        self.state.released.lock().clone()
    }
}

#[async_trait]
impl ConnectionProvider for FakeProvider {
    type Connection = FakeConnection;

    async fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<QueryOutput> {
        self.state.run(sql, params)
    }

    async fn acquire(&self) -> Result<FakeConnection> {
        *self.state.acquired.lock() += 1;
        Ok(FakeConnection { state: Arc::clone(&self.state) })
    }

    async fn release(&self, _conn: FakeConnection, discard: bool) -> Result<()> {
        self.state.released.lock().push(discard);
        Ok(())
    }
}

/// Routes connector logs to the test harness; safe to call repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("ouroboros_pg_connector=debug")
        .with_test_writer()
        .try_init();
}

pub fn connector() -> (FakeProvider, PostgresConnector<FakeProvider>) {
    init_tracing();
    let provider = FakeProvider::new();
    let connector = PostgresConnector::with_provider(
        Arc::new(provider.clone()),
        ConnectorSettings::new("postgres://fake/db"),
    );
    (provider, connector)
}

/// A row of the column catalog query.
pub fn column(name: &str, data_type: &str, udt: &str, length: Option<i32>, nullable: bool) -> Row {
    Row::from_pairs([
        ("column", SqlValue::Text(name.into())),
        ("type", SqlValue::Text(data_type.into())),
        ("udt", SqlValue::Text(udt.into())),
        ("length", length.map(SqlValue::Int).unwrap_or(SqlValue::Null)),
        ("precision", SqlValue::Null),
        ("scale", SqlValue::Null),
        ("nullable", SqlValue::Text(if nullable { "YES" } else { "NO" }.into())),
        ("default", SqlValue::Null),
    ])
}

pub fn varchar(name: &str, length: i32, nullable: bool) -> Row {
    column(name, "character varying", "varchar", Some(length), nullable)
}

pub fn integer(name: &str, nullable: bool) -> Row {
    column(name, "integer", "int4", None, nullable)
}

/// A row of the index catalog query.
pub fn index(name: &str, method: &str, primary: bool, unique: bool, keys: &[IndexKey]) -> Row {
    let text = |s: &str| SqlValue::Text(s.to_string());
    Row::from_pairs([
        ("name", text(name)),
        ("method", text(method)),
        ("primary", SqlValue::Bool(primary)),
        ("unique", SqlValue::Bool(unique || primary)),
        ("constraint", SqlValue::Bool(primary)),
        ("keys", SqlValue::Array(keys.iter().map(|k| text(&k.column)).collect())),
        (
            "directions",
            SqlValue::Array(
                keys.iter()
                    .map(|k| text(if k.direction == SortDirection::Desc { "DESC" } else { "ASC" }))
                    .collect(),
            ),
        ),
    ])
}
