mod common;

use common::{Customer, Order};
use elif_record::conditions::ConditionParser;
use elif_record::testing::MockConnector;
use elif_record::{Condition, DatabaseValue, ModelExt, QueryBuilder, Row, SqlDialect};
use serde_json::json;

#[test]
fn binding_alignment_matches_placeholders() {
    let sub = QueryBuilder::<()>::table("payments")
        .select("order_id")
        .where_gt("amount", 100);
    let query = QueryBuilder::<()>::table("orders")
        .select_raw("COALESCE(total, ?) AS total", vec![DatabaseValue::Int64(0)])
        .where_eq("status", "paid")
        .where_in("region", vec!["eu", "us"])
        .where_in_sub("id", sub)
        .or_where_between("created_at", "2024-01-01", "2024-12-31")
        .group_by("customer_id")
        .having("count", ">", 2)
        .order_by_raw("FIELD(status, ?)", vec![DatabaseValue::from("paid")]);

    for dialect in [SqlDialect::PostgreSQL, SqlDialect::MySQL, SqlDialect::SQLite] {
        let compiled = query.compile(dialect).unwrap();
        let (positional, params) = compiled.to_positional(dialect).unwrap();
        let (_, placeholders) = dialect.to_positional(&compiled.sql);
        assert_eq!(placeholders, params.len(), "{}", positional);
        assert_eq!(compiled.bindings.flatten(), params);
    }

    let params = query.compile(SqlDialect::PostgreSQL).unwrap().params();
    assert_eq!(
        params,
        vec![
            DatabaseValue::Int64(0),
            DatabaseValue::from("paid"),
            DatabaseValue::from("eu"),
            DatabaseValue::from("us"),
            DatabaseValue::Int32(100),
            DatabaseValue::from("2024-01-01"),
            DatabaseValue::from("2024-12-31"),
            DatabaseValue::Int32(2),
            DatabaseValue::from("paid"),
        ]
    );
}

#[test]
fn condition_round_trip() {
    let conditions = Condition::from_json(&json!([["age", ">=", 18], ["status", "active"]])).unwrap();
    let parsed = ConditionParser::new(SqlDialect::PostgreSQL).parse(&conditions).unwrap();

    assert_eq!(parsed.sql, "(age >= :age1) AND (status = :status1)");
    assert_eq!(
        parsed.params,
        vec![
            ("age1".to_string(), DatabaseValue::Int64(18)),
            ("status1".to_string(), DatabaseValue::from("active")),
        ]
    );
}

#[test]
fn empty_in_lists_never_match() {
    let inside = QueryBuilder::<()>::table("orders").where_in("id", Vec::<i64>::new());
    let outside = QueryBuilder::<()>::table("orders").where_not_in("id", Vec::<i64>::new());

    for query in [inside, outside] {
        let compiled = query.compile(SqlDialect::PostgreSQL).unwrap();
        assert_eq!(compiled.sql, "SELECT * FROM orders WHERE ('0')");
        assert!(compiled.params().is_empty());
    }
}

#[tokio::test]
async fn repeated_all_sends_identical_statements() {
    let mock = MockConnector::postgres();
    mock.on_query("FROM orders", vec![Row::new().with("id", 1i64)]);
    let db = mock.database("");

    let query = db
        .table("orders")
        .where_eq("status", "paid")
        .where_in("region", vec!["eu", "us"]);
    let first = query.all(&db).await.unwrap();
    let second = query.all(&db).await.unwrap();

    assert_eq!(first, second);
    let statements = mock.statements();
    assert_eq!(statements.len(), 2);
    assert_eq!(statements[0], statements[1]);
    assert_eq!(
        statements[0].sql,
        "SELECT * FROM orders WHERE (orders.status = $1) AND (orders.region IN ($2, $3))"
    );
}

#[tokio::test]
async fn paid_orders_resolve_customer_lazily() {
    common::init_tracing();
    let mock = MockConnector::postgres();
    mock.on_query(
        "FROM orders",
        vec![Row::new().with("id", 12i64).with("customer_id", 3i64).with("status", "paid")],
    )
    .on_query("FROM customers", vec![Row::new().with("id", 3i64).with("name", "Acme")]);
    let db = mock.database("");

    let query = Order::find(&db)
        .unwrap()
        .where_condition("status", "=", "paid")
        .order_by("id", "DESC")
        .limit(10);
    let compiled = query.compile(SqlDialect::PostgreSQL).unwrap();
    assert_eq!(
        compiled.sql,
        "SELECT orders.* FROM orders WHERE (orders.status = :status1) ORDER BY id DESC LIMIT 10 OFFSET 0"
    );
    assert_eq!(compiled.params(), vec![DatabaseValue::from("paid")]);

    let mut orders = query.get(&db).await.unwrap();
    assert_eq!(orders.len(), 1);
    let selects = mock.statements_starting_with("SELECT");
    assert_eq!(selects.len(), 1);
    assert_eq!(
        selects[0].sql,
        "SELECT orders.* FROM orders WHERE (orders.status = $1) ORDER BY id DESC LIMIT 10 OFFSET 0"
    );

    let customer: Customer = orders[0].related_one(&db, "customer").await.unwrap().unwrap();
    assert_eq!(customer.0.value("name"), Some(&DatabaseValue::from("Acme")));

    let selects = mock.statements_starting_with("SELECT");
    assert_eq!(selects.len(), 2);
    assert_eq!(
        selects[1].sql,
        "SELECT customers.* FROM customers WHERE (customers.id = $1) LIMIT 1 OFFSET 0"
    );
    assert_eq!(selects[1].params, vec![DatabaseValue::Int64(3)]);

    // resolved once, then served from the record's cache
    let again: Option<Customer> = orders[0].related_one(&db, "customer").await.unwrap();
    assert!(again.is_some());
    assert_eq!(mock.statements().len(), 2);
}

#[tokio::test]
async fn relation_columns_join_on_demand() {
    let mock = MockConnector::postgres();
    let db = mock.database("shop_");

    Order::find(&db)
        .unwrap()
        .where_eq("customer.name", "Acme")
        .all(&db)
        .await
        .unwrap();

    assert_eq!(
        mock.sql_log(),
        vec![
            "SELECT shop_orders.* FROM shop_orders LEFT JOIN shop_customers AS customer \
             ON (customer.id = shop_orders.customer_id) WHERE (customer.name = $1)"
                .to_string()
        ]
    );
}

#[tokio::test]
async fn aggregates_and_existence() {
    let mock = MockConnector::postgres();
    mock.on_query_once("COUNT(*)", vec![Row::new().with("aggregate", 4i64)])
        .on_query_once("SUM(total)", vec![Row::new().with("aggregate", DatabaseValue::Null)])
        .on_query_once("SELECT EXISTS", vec![Row::new().with("aggregate", true)]);
    let db = mock.database("");
    let query = db.table("orders").where_eq("status", "paid").order_by("id", "DESC");

    assert_eq!(query.count(&db, "*").await.unwrap(), 4);
    assert_eq!(query.sum(&db, "total").await.unwrap(), None);
    assert!(query.exists(&db).await.unwrap());

    let log = mock.sql_log();
    assert_eq!(log[0], "SELECT COUNT(*) AS aggregate FROM orders WHERE (orders.status = $1)");
    assert_eq!(
        log[2],
        "SELECT EXISTS (SELECT * FROM orders WHERE (orders.status = $1) ORDER BY id DESC) AS aggregate"
    );
}

#[tokio::test]
async fn indexed_results_and_chunks() {
    let mock = MockConnector::postgres();
    mock.on_query_once(
        "OFFSET 0",
        vec![Row::new().with("code", "eu").with("id", 1i64), Row::new().with("code", "us").with("id", 2i64)],
    )
    .on_query_once("OFFSET 2", vec![Row::new().with("code", "ap").with("id", 3i64)])
    .on_query("FROM regions", vec![Row::new().with("code", "eu"), Row::new().with("code", "us")]);
    let db = mock.database("");

    let mut seen = Vec::new();
    db.table("regions")
        .order_by("id", "ASC")
        .chunk(&db, 2, |rows| {
            seen.push(rows.len());
            Ok(true)
        })
        .await
        .unwrap();
    assert_eq!(seen, vec![2, 1]);

    let indexed = db.table("regions").index_by("code").column_indexed(&db).await.unwrap();
    assert_eq!(indexed.keys().collect::<Vec<_>>(), vec!["eu", "us"]);
}

#[tokio::test]
async fn one_or_fail_reports_not_found() {
    let mock = MockConnector::postgres();
    let db = mock.database("");

    let missing = db.table("orders").where_eq("id", 99).one_or_fail(&db).await;
    assert!(matches!(missing, Err(elif_record::OrmError::NotFound(_))));
    assert_eq!(mock.sql_log(), vec!["SELECT * FROM orders WHERE (orders.id = $1) LIMIT 1 OFFSET 0".to_string()]);
}

#[tokio::test]
async fn counting_a_union_counts_every_branch() {
    let mock = MockConnector::postgres();
    mock.on_query_once("COUNT(*)", vec![Row::new().with("aggregate", 7i64)]);
    let db = mock.database("");

    let query = db
        .table("orders")
        .where_eq("status", "paid")
        .union_all(db.table("archived_orders").where_eq("status", "paid"));
    assert_eq!(query.count(&db, "*").await.unwrap(), 7);

    let statement = &mock.statements()[0];
    assert_eq!(
        statement.sql,
        "SELECT COUNT(*) AS aggregate FROM (SELECT * FROM orders WHERE (orders.status = $1) \
         UNION ALL SELECT * FROM archived_orders WHERE (archived_orders.status = $2)) AS aggregate_source"
    );
    assert_eq!(
        statement.params,
        vec![DatabaseValue::from("paid"), DatabaseValue::from("paid")]
    );
}

#[tokio::test]
async fn aggregates_respect_the_page_window() {
    let mock = MockConnector::postgres();
    mock.on_query_once("MAX(total)", vec![Row::new().with("aggregate", 40.0)]);
    let db = mock.database("");

    let page = db.table("orders").order_by("total", "ASC").for_page(2, 10);
    assert_eq!(page.max(&db, "total").await.unwrap(), Some(DatabaseValue::Float64(40.0)));
    assert_eq!(
        mock.sql_log(),
        vec![
            "SELECT MAX(total) AS aggregate FROM (SELECT * FROM orders ORDER BY total ASC \
             LIMIT 10 OFFSET 10) AS aggregate_source"
                .to_string()
        ]
    );

    let out_of_range = db.table("orders").for_page(i64::MAX, 50).all(&db).await;
    assert!(matches!(out_of_range, Err(elif_record::OrmError::InvalidArgument(_))));
    assert_eq!(mock.statements().len(), 1);
}
