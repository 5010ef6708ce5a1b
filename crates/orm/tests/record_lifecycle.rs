mod common;

use async_trait::async_trait;
use common::{Customer, Order, Tag};
use elif_record::testing::MockConnector;
use elif_record::{
    DatabaseValue, EventError, FieldDescriptor, FieldValue, ModelExt, OrmError, Record, RecordObserver, Row,
    SqlType,
};
use indexmap::IndexMap;
use std::sync::Arc;

struct ReadOnly;

#[async_trait]
impl RecordObserver for ReadOnly {
    async fn creating(&self, _record: &mut Record) -> Result<(), EventError> {
        Err(EventError::propagation_stopped("customers are read-only"))
    }
}

struct NoTotals;

#[async_trait]
impl RecordObserver for NoTotals {
    async fn setting_data(
        &self,
        _record: &Record,
        data: &mut IndexMap<String, FieldValue>,
    ) -> Result<(), EventError> {
        data.shift_remove("total");
        Ok(())
    }
}

struct Broken;

#[async_trait]
impl RecordObserver for Broken {
    async fn saving(&self, _record: &mut Record) -> Result<(), EventError> {
        Err(EventError::observer("audit log unavailable"))
    }
}

#[tokio::test]
async fn insert_assigns_key_and_clears_dirty_state() {
    let mock = MockConnector::postgres();
    mock.next_insert_id(41);
    let db = mock.database("");

    let mut customer = Customer::new(&db);
    customer.set("name", "Acme").unwrap();
    assert!(customer.0.is_dirty("name"));

    assert!(customer.save(&db).await.unwrap());

    let inserts = mock.statements_starting_with("INSERT");
    assert_eq!(inserts.len(), 1);
    assert_eq!(
        inserts[0].sql,
        "INSERT INTO customers (name, created_at) VALUES ($1, $2) RETURNING id"
    );
    assert_eq!(inserts[0].params[0], DatabaseValue::from("Acme"));
    assert!(matches!(inserts[0].params[1], DatabaseValue::Timestamp(_)));

    assert_eq!(customer.0.primary_key(), Some(&DatabaseValue::Int64(41)));
    assert!(!customer.0.is_new());
    assert!(customer.0.dirty_fields().is_empty());
    assert!(db.identity_map().contains("Customer", &DatabaseValue::Int64(41)));
}

#[tokio::test]
async fn update_writes_only_changed_columns() {
    common::init_tracing();
    let mock = MockConnector::postgres();
    mock.on_query_once(
        "FROM orders",
        vec![Row::new()
            .with("id", 5i64)
            .with("customer_id", 3i64)
            .with("status", "new")
            .with("total", 10.0)],
    );
    let db = mock.database("");

    let mut order = Order::get_by_id(&db, 5i64).await.unwrap().unwrap();
    order.set("status", "paid").unwrap();
    order.set("total", 10.0).unwrap();
    order.set("customer_id", "3").unwrap();
    assert_eq!(order.0.dirty_fields(), vec!["status"]);

    mock.clear_log();
    assert!(order.save(&db).await.unwrap());

    let updates = mock.statements_starting_with("UPDATE");
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].sql, "UPDATE orders SET status = $1, updated_at = $2 WHERE (id = $3)");
    assert_eq!(updates[0].params[0], DatabaseValue::from("paid"));
    assert!(matches!(updates[0].params[1], DatabaseValue::Timestamp(_)));
    assert_eq!(updates[0].params[2], DatabaseValue::Int64(5));
    assert!(!db.identity_map().contains("Order", &DatabaseValue::Int64(5)));

    // nothing changed since the last save
    assert!(order.save(&db).await.unwrap());
    assert_eq!(mock.statements_starting_with("UPDATE").len(), 1);
}

#[tokio::test]
async fn vetoed_insert_sends_nothing() {
    let mock = MockConnector::postgres();
    let db = mock.database("");
    db.observers().register_for_model::<Customer>(Arc::new(ReadOnly));

    let mut customer = Customer::new(&db);
    customer.set("name", "Acme").unwrap();

    assert!(!customer.save(&db).await.unwrap());
    assert!(mock.statements_starting_with("INSERT").is_empty());
    assert!(customer.0.is_new());
}

#[tokio::test]
async fn failing_observer_aborts_save() {
    let mock = MockConnector::postgres();
    let db = mock.database("");
    db.observers().register_global(Arc::new(Broken));

    let mut customer = Customer::new(&db);
    customer.set("name", "Acme").unwrap();

    assert!(matches!(customer.save(&db).await, Err(OrmError::Observer(_))));
    assert!(mock.statements().is_empty());
}

#[tokio::test]
async fn missing_required_field_fails_validation() {
    let mock = MockConnector::postgres();
    let db = mock.database("");

    let mut customer = Customer::new(&db);
    assert!(!customer.save(&db).await.unwrap());
    assert_eq!(customer.0.errors().field("name"), &["is required".to_string()]);
    assert!(mock.statements().is_empty());

    customer.set("name", "Acme").unwrap();
    assert!(customer.validate(&db).await.unwrap());
    assert!(customer.0.errors().is_empty());
}

#[tokio::test]
async fn delete_removes_row_and_voids_record() {
    let mock = MockConnector::postgres();
    mock.on_query_once(
        "FROM customers",
        vec![Row::new().with("id", 7i64).with("name", "Acme")],
    );
    let db = mock.database("");

    let mut customer = Customer::get_by_id(&db, 7i64).await.unwrap().unwrap();
    assert!(db.identity_map().contains("Customer", &DatabaseValue::Int64(7)));

    assert!(customer.delete(&db).await.unwrap());

    let deletes = mock.statements_starting_with("DELETE");
    assert_eq!(deletes.len(), 1);
    assert_eq!(deletes[0].sql, "DELETE FROM customers WHERE (id = $1)");
    assert_eq!(deletes[0].params, vec![DatabaseValue::Int64(7)]);

    assert!(customer.0.is_voided());
    assert!(matches!(customer.get("name"), Err(OrmError::Voided(_))));
    assert!(matches!(customer.save(&db).await, Err(OrmError::Voided(_))));
    assert!(!db.identity_map().contains("Customer", &DatabaseValue::Int64(7)));
}

#[tokio::test]
async fn deleting_unsaved_record_is_a_no_op() {
    let mock = MockConnector::postgres();
    let db = mock.database("");

    let mut customer = Customer::new(&db);
    assert!(!customer.delete(&db).await.unwrap());
    assert!(!customer.0.is_voided());
    assert!(mock.statements().is_empty());
}

#[tokio::test]
async fn repeated_lookups_hit_the_identity_map() {
    let mock = MockConnector::postgres();
    mock.on_query_once(
        "FROM customers",
        vec![Row::new().with("id", 3i64).with("name", "Acme")],
    );
    let db = mock.database("");

    let first = Customer::get_by_id(&db, 3i64).await.unwrap().unwrap();
    let second = Customer::get_by_id(&db, 3i64).await.unwrap().unwrap();

    assert_eq!(mock.statements().len(), 1);
    assert_eq!(
        mock.sql_log()[0],
        "SELECT customers.* FROM customers WHERE (customers.id = $1) LIMIT 1 OFFSET 0"
    );
    assert_eq!(first.0.value("name"), second.0.value("name"));
    assert_eq!(db.identity_map().metrics().hits, 1);
}

#[tokio::test]
async fn fill_runs_set_data_hooks() {
    let mock = MockConnector::postgres();
    let db = mock.database("");
    db.observers().register_for_model::<Order>(Arc::new(NoTotals));

    let mut order = Order::new(&db);
    let mut data = IndexMap::new();
    data.insert("status".to_string(), FieldValue::from("draft"));
    data.insert("total".to_string(), FieldValue::from(99.5));

    assert!(order.fill(&db, data).await.unwrap());
    assert_eq!(order.0.value("status"), Some(&DatabaseValue::from("draft")));
    assert_eq!(order.0.value("total"), None);
}

#[tokio::test]
async fn current_user_stamps_author_columns() {
    let mock = MockConnector::postgres();
    let db = mock.database("").with_current_user(|| Some(DatabaseValue::Int64(9)));

    let mut customer = Customer::new(&db);
    customer.set("name", "Acme").unwrap();
    assert!(customer.save(&db).await.unwrap());

    // customers declare no created_by column
    let inserts = mock.statements_starting_with("INSERT");
    assert_eq!(inserts[0].params.len(), 2);
}

#[tokio::test]
async fn string_keys_with_asterisks_match_exactly() {
    let mock = MockConnector::postgres();
    mock.on_query_once(
        "FROM tags",
        vec![Row::new().with("code", "a*b").with("label", "old")],
    );
    let db = mock.database("");

    let mut tag = Tag::get_by_id(&db, "a*b").await.unwrap().unwrap();
    tag.set("label", "new").unwrap();
    assert!(tag.save(&db).await.unwrap());
    assert!(tag.delete(&db).await.unwrap());

    let statements = mock.statements();
    assert_eq!(statements.len(), 3);
    assert_eq!(
        statements[0].sql,
        "SELECT tags.* FROM tags WHERE (tags.code = $1) LIMIT 1 OFFSET 0"
    );
    assert_eq!(statements[0].params, vec![DatabaseValue::from("a*b")]);
    assert_eq!(statements[1].sql, "UPDATE tags SET label = $1 WHERE (code = $2)");
    assert_eq!(statements[1].params[1], DatabaseValue::from("a*b"));
    assert_eq!(statements[2].sql, "DELETE FROM tags WHERE (code = $1)");
    assert_eq!(statements[2].params, vec![DatabaseValue::from("a*b")]);
    assert!(statements.iter().all(|statement| !statement.sql.contains("LIKE")));
}

#[tokio::test]
async fn now_sentinel_reaches_the_database() {
    let mock = MockConnector::postgres();
    mock.next_insert_id(5).on_query_once(
        "FROM customers",
        vec![Row::new().with("id", 6i64).with("name", "Globex")],
    );
    let db = mock.database("");

    let mut customer = Customer::new(&db);
    customer.set("name", "Acme").unwrap();
    customer.set("created_at", "NOW()").unwrap();
    assert_eq!(customer.0.value("created_at"), Some(&DatabaseValue::from("NOW()")));
    assert!(customer.save(&db).await.unwrap());

    let insert = mock.statements_starting_with("INSERT").pop().unwrap();
    assert_eq!(
        insert.sql,
        "INSERT INTO customers (name, created_at) VALUES ($1, NOW()) RETURNING id"
    );
    assert_eq!(insert.params, vec![DatabaseValue::from("Acme")]);

    let mut existing = Customer::get_by_id(&db, 6i64).await.unwrap().unwrap();
    existing.set("created_at", FieldValue::raw("NOW()")).unwrap();
    assert!(existing.save(&db).await.unwrap());

    let update = mock.statements_starting_with("UPDATE").pop().unwrap();
    assert_eq!(update.sql, "UPDATE customers SET created_at = NOW() WHERE (id = $1)");
    assert_eq!(update.params, vec![DatabaseValue::Int64(6)]);
}

#[tokio::test]
async fn donor_fields_evict_cached_records() {
    let mock = MockConnector::postgres();
    mock.on_query(
        "FROM customers",
        vec![Row::new().with("id", 3i64).with("name", "Acme").with("vat_id", "DE1")],
    );
    let db = mock.database("");

    let before = Customer::get_by_id(&db, 3i64).await.unwrap().unwrap();
    assert!(!before.0.schema().has_column("vat_id"));

    db.register_extra_field("Customer", "billing", FieldDescriptor::new("vat_id", SqlType::Varchar(32)))
        .unwrap();
    assert!(!db.identity_map().contains("Customer", &DatabaseValue::Int64(3)));

    let after = Customer::get_by_id(&db, 3i64).await.unwrap().unwrap();
    assert!(after.0.schema().has_column("vat_id"));
    assert_eq!(mock.statements().len(), 2);
}
