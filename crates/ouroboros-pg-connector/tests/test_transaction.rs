//! Transaction handling.
//!
//! The first group runs against the in-memory provider. The `#[ignore]`d
//! group needs a PostgreSQL server:
//!
//! Set DATABASE_URL environment variable to customize connection.
//! Default: postgresql://localhost/test_db
//!
//! Run with: cargo test -p ouroboros-pg-connector --test test_transaction -- --ignored

mod common;

use common::connector;
use ouroboros_pg_connector::{
    ConnectorError, ConnectorSettings, Filter, IsolationLevel, PostgresConnector,
    TransactionOptions,
};
use serde_json::json;
use std::sync::Arc;

fn define_ledger<P: ouroboros_pg_connector::ConnectionProvider>(connector: &PostgresConnector<P>) {
    connector
        .define_json(&json!({
            "name": "LedgerEntry",
            "properties": {
                "id": {"type": "Number", "id": true, "generated": true},
                "note": {"type": "String", "length": 80},
                "amount": "Number"
            },
            "settings": {"table": "tx_ledger_entry"}
        }))
        .unwrap();
}

#[tokio::test]
async fn test_statements_run_on_pinned_connection() {
    let (provider, connector) = connector();
    define_ledger(&connector);

    let mut tx = connector.begin_transaction(IsolationLevel::RepeatableRead).await.unwrap();
    connector
        .create("LedgerEntry", &json!({"note": "opening", "amount": 10}), Some(&mut tx))
        .await
        .unwrap();
    connector.commit(&mut tx).await.unwrap();

    assert_eq!(
        provider.statements(),
        vec![
            "BEGIN TRANSACTION ISOLATION LEVEL REPEATABLE READ".to_string(),
            "INSERT INTO \"public\".\"tx_ledger_entry\" (\"note\",\"amount\") VALUES ($1,$2) RETURNING \"id\""
                .to_string(),
            "COMMIT".to_string(),
        ]
    );
    assert_eq!(*provider.state.acquired.lock(), 1);
    assert_eq!(provider.released(), vec![false]);
    assert!(!tx.is_active());
}

#[tokio::test]
async fn test_failed_begin_yields_no_handle() {
    let (provider, connector) = connector();
    provider.fail_on("BEGIN", ConnectorError::Connection("server closed the connection".into()));

    let err = connector.begin_transaction(IsolationLevel::ReadCommitted).await.unwrap_err();
    assert!(matches!(err, ConnectorError::Connection(_)));
    assert_eq!(provider.released(), vec![true]);
}

#[tokio::test]
async fn test_failed_rollback_still_releases() {
    let (provider, connector) = connector();
    provider.fail_on("ROLLBACK", ConnectorError::database("08006", "connection failure"));

    let mut tx = connector.begin_transaction(IsolationLevel::Serializable).await.unwrap();
    let err = connector.rollback(&mut tx).await.unwrap_err();
    assert_eq!(err.sqlstate(), Some("08006"));
    assert_eq!(provider.released(), vec![true]);

    // the handle is spent
    assert_eq!(
        connector.execute("SELECT 1", &[], Some(&mut tx)).await,
        Err(ConnectorError::ConnectionMissing)
    );
}

#[tokio::test]
async fn test_transaction_from_another_connector_is_rejected() {
    let (provider, connector) = connector();
    let other = PostgresConnector::with_provider(
        Arc::new(provider.clone()),
        ConnectorSettings::new("postgres://fake/db"),
    );

    let mut tx = connector.begin_transaction(IsolationLevel::ReadCommitted).await.unwrap();
    assert_eq!(
        other.execute("SELECT 1", &[], Some(&mut tx)).await,
        Err(ConnectorError::TransactionNotActive)
    );
    assert_eq!(other.rollback(&mut tx).await, Err(ConnectorError::TransactionNotActive));
    assert!(tx.is_active());

    connector.commit(&mut tx).await.unwrap();
    assert_eq!(
        provider.statements(),
        vec!["BEGIN TRANSACTION ISOLATION LEVEL READ COMMITTED".to_string(), "COMMIT".to_string()]
    );
    assert_eq!(provider.released(), vec![false]);
}

#[tokio::test]
async fn test_read_only_options() {
    let (provider, connector) = connector();
    let options = TransactionOptions::new()
        .isolation_level(IsolationLevel::Serializable)
        .read_only()
        .deferrable(true);

    let mut tx = connector.begin_transaction(options).await.unwrap();
    connector.rollback(&mut tx).await.unwrap();
    assert_eq!(
        provider.statements(),
        vec![
            "BEGIN TRANSACTION ISOLATION LEVEL SERIALIZABLE, READ ONLY, DEFERRABLE".to_string(),
            "ROLLBACK".to_string(),
        ]
    );
    assert_eq!(provider.released(), vec![false]);
}

#[tokio::test]
async fn test_dropped_transaction_closes_connection() {
    let (provider, connector) = connector();
    let tx = connector.begin_transaction(IsolationLevel::ReadCommitted).await.unwrap();
    drop(tx);

    // release runs on a spawned task
    for _ in 0..10 {
        if !provider.released().is_empty() {
            break;
        }
        tokio::task::yield_now().await;
    }
    assert_eq!(provider.released(), vec![true]);
}

async fn live_connector() -> PostgresConnector {
    let url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| "postgresql://localhost/test_db".to_string());
    let connector = PostgresConnector::connect(ConnectorSettings::new(url))
        .await
        .expect("Failed to connect to database");
    define_ledger(&connector);
    connector
        .automigrate(&["LedgerEntry".to_string()])
        .await
        .expect("Failed to create ledger table");
    connector
}

#[tokio::test]
#[ignore] // Only run with --ignored flag when database is available
async fn test_live_commit_is_visible() {
    let connector = live_connector().await;

    let mut tx = connector.begin_transaction(IsolationLevel::ReadCommitted).await.unwrap();
    connector
        .create("LedgerEntry", &json!({"note": "commit", "amount": 5}), Some(&mut tx))
        .await
        .unwrap();
    connector.commit(&mut tx).await.unwrap();

    let rows = connector.find("LedgerEntry", &Filter::new(), None).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["note"], json!("commit"));

    connector.drop_table("LedgerEntry").await.unwrap();
}

#[tokio::test]
#[ignore]
async fn test_live_rollback_discards_writes() {
    let connector = live_connector().await;

    let mut tx = connector.begin_transaction(IsolationLevel::Serializable).await.unwrap();
    connector
        .create("LedgerEntry", &json!({"note": "rollback", "amount": 1}), Some(&mut tx))
        .await
        .unwrap();
    let inside = connector.count("LedgerEntry", None, Some(&mut tx)).await.unwrap();
    assert_eq!(inside, 1);
    connector.rollback(&mut tx).await.unwrap();

    assert_eq!(connector.count("LedgerEntry", None, None).await.unwrap(), 0);
    connector.drop_table("LedgerEntry").await.unwrap();
}

#[tokio::test]
#[ignore]
async fn test_live_autoupdate_round_trip() {
    let connector = live_connector().await;
    connector
        .define_json(&json!({
            "name": "LedgerEntry",
            "properties": {
                "id": {"type": "Number", "id": true, "generated": true},
                "note": {"type": "String", "length": 120, "index": true},
                "booked": "Date"
            },
            "settings": {"table": "tx_ledger_entry"}
        }))
        .unwrap();

    assert!(!connector.is_actual(&[]).await.unwrap());
    assert!(!connector.autoupdate("LedgerEntry").await.unwrap().is_noop());
    assert!(connector.autoupdate("LedgerEntry").await.unwrap().is_noop());
    connector.drop_table("LedgerEntry").await.unwrap();
}
