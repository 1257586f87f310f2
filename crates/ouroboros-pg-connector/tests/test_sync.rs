//! Schema synchronization against an in-memory provider.
//!
//! The fake serves catalog queries from tables the test installs and records
//! every DDL statement, so these run without a database.
//!
//! Run with: cargo test -p ouroboros-pg-connector --test test_sync

mod common;

use common::{connector, index, integer, varchar, FakeTable};
use ouroboros_pg_connector::{ColumnChange, ConnectorError, IndexKey, SyncAction};
use serde_json::json;

fn customer_v1() -> serde_json::Value {
    json!({
        "name": "Customer",
        "properties": {
            "id": {"type": "String", "length": 20, "id": true},
            "name": {"type": "String", "length": 40},
            "email": {"type": "String", "length": 40, "required": true,
                      "index": {"unique": false, "type": "hash"}},
            "age": "Number"
        }
    })
}

fn customer_v2() -> serde_json::Value {
    json!({
        "name": "Customer",
        "properties": {
            "id": {"type": "String", "length": 20, "id": true, "index": {"unique": true}},
            "email": {"type": "String", "length": 60, "required": true,
                      "index": {"unique": false, "type": "hash"}},
            "firstName": {"type": "String", "index": true},
            "lastName": "String",
            "age": "Number"
        }
    })
}

/// The table as created from `customer_v1`.
fn customer_v1_table() -> FakeTable {
    FakeTable {
        columns: vec![
            varchar("id", 20, false),
            varchar("name", 40, true),
            varchar("email", 40, false),
            integer("age", true),
        ],
        indexes: vec![
            index("customer_pkey", "btree", true, true, &[IndexKey::asc("id")]),
            index("customer_email_idx", "hash", false, false, &[IndexKey::asc("email")]),
        ],
    }
}

#[tokio::test]
async fn test_first_reconciliation_creates_table() {
    let (provider, connector) = connector();
    connector.define_json(&customer_v1()).unwrap();

    let action = connector.autoupdate("Customer").await.unwrap();
    assert_eq!(action, SyncAction::CreateTable);
    assert_eq!(
        provider.statements(),
        vec![
            "CREATE SCHEMA \"public\"".to_string(),
            "CREATE TABLE \"public\".\"customer\" (\"id\" VARCHAR(20) NOT NULL PRIMARY KEY, \
             \"name\" VARCHAR(40), \"email\" VARCHAR(40) NOT NULL, \"age\" INTEGER)"
                .to_string(),
            "CREATE INDEX \"customer_email_idx\" ON \"public\".\"customer\" USING hash (\"email\")"
                .to_string(),
        ]
    );
}

#[tokio::test]
async fn test_reconciliation_is_idempotent() {
    let (provider, connector) = connector();
    connector.define_json(&customer_v1()).unwrap();
    provider.set_table("public", "customer", customer_v1_table());

    assert_eq!(connector.autoupdate("Customer").await.unwrap(), SyncAction::NoOp);
    assert_eq!(connector.autoupdate("Customer").await.unwrap(), SyncAction::NoOp);
    assert!(provider.statements().is_empty());
    assert!(connector.is_actual(&[]).await.unwrap());
}

#[tokio::test]
async fn test_redeclared_model_alters_table() {
    let (provider, connector) = connector();
    connector.define_json(&customer_v2()).unwrap();
    provider.set_table("public", "customer", customer_v1_table());

    assert!(!connector.is_actual(&["Customer".to_string()]).await.unwrap());
    assert!(provider.statements().is_empty(), "is_actual must not run DDL");

    let action = connector.autoupdate("Customer").await.unwrap();
    let SyncAction::AlterTable { columns, .. } = &action else {
        panic!("expected AlterTable, got {:?}", action);
    };
    assert_eq!(
        columns,
        &vec![
            ColumnChange::TypeChanged {
                column: "email".into(),
                from: "VARCHAR(40)".into(),
                to: "VARCHAR(60)".into(),
            },
            ColumnChange::Added {
                column: "firstname".into(),
                data_type: "VARCHAR(1024)".into(),
                nullable: true,
                default: None,
            },
            ColumnChange::Added {
                column: "lastname".into(),
                data_type: "VARCHAR(1024)".into(),
                nullable: true,
                default: None,
            },
            ColumnChange::Dropped { column: "name".into() },
        ]
    );

    let statements = provider.statements();
    assert_eq!(
        statements,
        vec![
            "ALTER TABLE \"public\".\"customer\" ALTER COLUMN \"email\" TYPE VARCHAR(60), \
             ADD COLUMN \"firstname\" VARCHAR(1024), ADD COLUMN \"lastname\" VARCHAR(1024)"
                .to_string(),
            "ALTER TABLE \"public\".\"customer\" DROP COLUMN \"name\"".to_string(),
            "CREATE UNIQUE INDEX \"customer_id_idx\" ON \"public\".\"customer\" (\"id\");\n\
             CREATE INDEX \"customer_firstname_idx\" ON \"public\".\"customer\" (\"firstname\")"
                .to_string(),
        ]
    );
    // the hash index on email is unchanged
    assert!(statements.iter().all(|s| !s.contains("customer_email_idx")));
}

#[tokio::test]
async fn test_failed_alter_skips_drops_and_indexes() {
    let (provider, connector) = connector();
    connector.define_json(&customer_v2()).unwrap();
    provider.set_table("public", "customer", customer_v1_table());
    provider.fail_on("ADD COLUMN", ConnectorError::database("42501", "permission denied"));

    let err = connector.autoupdate("Customer").await.unwrap_err();
    assert_eq!(err.sqlstate(), Some("42501"));

    let statements = provider.statements();
    assert_eq!(statements.len(), 1);
    assert!(statements.iter().all(|s| !s.contains("DROP COLUMN")));
    assert!(statements.iter().all(|s| !s.contains("CREATE")));
}

#[tokio::test]
async fn test_existing_schema_is_tolerated() {
    let (provider, connector) = connector();
    connector.define_json(&customer_v1()).unwrap();
    provider.fail_on(
        "CREATE SCHEMA",
        ConnectorError::database("42P06", "schema \"public\" already exists"),
    );

    assert_eq!(connector.autoupdate("Customer").await.unwrap(), SyncAction::CreateTable);
    assert!(provider.statements().iter().any(|s| s.starts_with("CREATE TABLE")));
}

#[tokio::test]
async fn test_other_schema_errors_abort_creation() {
    let (provider, connector) = connector();
    connector.define_json(&customer_v1()).unwrap();
    provider.fail_on("CREATE SCHEMA", ConnectorError::database("42501", "permission denied"));

    let err = connector.autoupdate("Customer").await.unwrap_err();
    assert_eq!(err.sqlstate(), Some("42501"));
    assert!(provider.statements().iter().all(|s| !s.starts_with("CREATE TABLE")));
}

#[tokio::test]
async fn test_autoupdate_all_reports_each_model() {
    let (provider, connector) = connector();
    connector.define_json(&customer_v1()).unwrap();
    connector
        .define_json(&json!({
            "name": "Invoice",
            "properties": {"id": {"type": "Number", "id": true, "generated": true}, "total": "Number"}
        }))
        .unwrap();
    provider.set_table("public", "customer", customer_v1_table());
    provider.fail_on("\"public\".\"invoice\"", ConnectorError::database("42501", "permission denied"));

    let results = connector
        .autoupdate_all(&["Customer".to_string(), "Invoice".to_string(), "Ghost".to_string()])
        .await;
    assert_eq!(results.len(), 3);

    assert_eq!(results[0].0, "Customer");
    assert_eq!(results[0].1, Ok(SyncAction::NoOp));
    assert_eq!(results[1].0, "Invoice");
    assert_eq!(results[1].1.as_ref().unwrap_err().sqlstate(), Some("42501"));
    assert_eq!(results[2].1, Err(ConnectorError::UnknownModel("Ghost".into())));
}

#[tokio::test]
async fn test_autoupdate_all_defaults_to_every_model() {
    let (provider, connector) = connector();
    connector.define_json(&customer_v1()).unwrap();
    provider.set_table("public", "customer", customer_v1_table());

    let results = connector.autoupdate_all(&[]).await;
    let names: Vec<&str> = results.iter().map(|(name, _)| name.as_str()).collect();
    assert_eq!(names, vec!["Customer"]);
}

#[tokio::test]
async fn test_automigrate_drops_then_creates() {
    let (provider, connector) = connector();
    connector.define_json(&customer_v1()).unwrap();

    connector.automigrate(&["Customer".to_string()]).await.unwrap();
    let statements = provider.statements();
    assert_eq!(statements[0], "DROP TABLE IF EXISTS \"public\".\"customer\"");
    assert_eq!(statements[1], "CREATE SCHEMA \"public\"");
    assert!(statements[2].starts_with("CREATE TABLE \"public\".\"customer\""));
    assert!(statements[3].starts_with("CREATE INDEX \"customer_email_idx\""));
}

#[tokio::test]
async fn test_unknown_model() {
    let (_provider, connector) = connector();
    assert_eq!(
        connector.autoupdate("Nope").await,
        Err(ConnectorError::UnknownModel("Nope".into()))
    );
    assert!(matches!(connector.drop_table("Nope").await, Err(ConnectorError::UnknownModel(_))));
}

#[tokio::test]
async fn test_foreign_key_in_created_table() {
    let (provider, connector) = connector();
    connector.define_json(&customer_v1()).unwrap();
    connector
        .define_json(&json!({
            "name": "Order",
            "properties": {
                "id": {"type": "Number", "id": true, "generated": true},
                "customerId": {"type": "String", "length": 20}
            },
            "settings": {
                "foreignKeys": {
                    "fk_order_customer": {"foreignKey": "customerId", "entity": "Customer", "entityKey": "id"}
                }
            }
        }))
        .unwrap();

    assert_eq!(connector.autoupdate("Order").await.unwrap(), SyncAction::CreateTable);
    let create = provider
        .statements()
        .into_iter()
        .find(|s| s.starts_with("CREATE TABLE"))
        .unwrap();
    assert_eq!(
        create,
        "CREATE TABLE \"public\".\"order\" (\"id\" SERIAL NOT NULL PRIMARY KEY, \
         \"customerid\" VARCHAR(20), \
         CONSTRAINT \"fk_order_customer\" FOREIGN KEY (\"customerid\") \
         REFERENCES \"public\".\"customer\"(\"id\"))"
    );
}
