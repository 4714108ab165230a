//! Store tests against a live PostgreSQL.
//!
//! ```bash
//! DATABASE_URL=postgres://l0:L0@localhost:5432/l0_wb cargo test --test postgres_store_test -- --ignored
//! ```

use std::time::{SystemTime, UNIX_EPOCH};

use order_ingest::mock::sample_order;
use order_ingest::model::Order;
use order_ingest::store::{create_pool, OrderStore, PersistOutcome, PgOrderStore};
use secrecy::SecretString;

async fn store() -> PgOrderStore {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let pool = create_pool(&SecretString::from(url), 2, 1)
        .await
        .expect("Failed to connect");
    sqlx::raw_sql(include_str!("../schema/orders.sql"))
        .execute(&pool)
        .await
        .expect("Failed to apply schema");
    PgOrderStore::new(pool)
}

/// An identifier no earlier test run has used.
fn fresh_id(tag: &str) -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    format!("{tag}-{}-{nanos}", std::process::id())
}

fn stamped(order_uid: &str) -> Order {
    let mut order = sample_order(order_uid);
    order.stamp_foreign_keys();
    order
}

async fn row_count(store: &PgOrderStore, table: &str, order_uid: &str) -> i64 {
    let column = if table == "orders" { "order_uid" } else { "order_id" };
    sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table} WHERE {column} = $1"))
        .bind(order_uid)
        .fetch_one(store.pool())
        .await
        .unwrap()
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_persist_then_fetch_returns_the_same_aggregate() {
    let store = store().await;
    let id = fresh_id("roundtrip");
    let order = stamped(&id);

    assert_eq!(store.persist(&order).await.unwrap(), PersistOutcome::Inserted);

    let fetched = store.fetch(&id).await.unwrap().expect("order exists");
    assert_eq!(fetched, order);
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_duplicate_persist_keeps_one_row_set() {
    let store = store().await;
    let id = fresh_id("dup");
    let order = stamped(&id);

    assert_eq!(store.persist(&order).await.unwrap(), PersistOutcome::Inserted);
    assert_eq!(
        store.persist(&order).await.unwrap(),
        PersistOutcome::AlreadyPersisted
    );

    assert_eq!(row_count(&store, "orders", &id).await, 1);
    assert_eq!(row_count(&store, "deliveries", &id).await, 1);
    assert_eq!(row_count(&store, "payments", &id).await, 1);
    assert_eq!(row_count(&store, "order_items", &id).await, 2);
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_reused_transaction_rolls_back_the_whole_aggregate() {
    let store = store().await;
    let first = stamped(&fresh_id("tx-owner"));
    store.persist(&first).await.unwrap();

    let id = fresh_id("tx-reuse");
    let mut clash = sample_order(&id);
    clash.payment.transaction = first.payment.transaction.clone();
    clash.stamp_foreign_keys();

    assert_eq!(
        store.persist(&clash).await.unwrap(),
        PersistOutcome::AlreadyPersisted
    );
    assert_eq!(row_count(&store, "orders", &id).await, 0);
    assert_eq!(row_count(&store, "deliveries", &id).await, 0);
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_other_constraint_failures_are_errors_and_leave_nothing_behind() {
    let store = store().await;
    let id = fresh_id("check");
    let mut order = sample_order(&id);
    order.items[1].price = -1;
    order.stamp_foreign_keys();

    assert!(store.persist(&order).await.is_err());
    assert_eq!(row_count(&store, "orders", &id).await, 0);
    assert_eq!(row_count(&store, "order_items", &id).await, 0);
    assert_eq!(store.fetch(&id).await.unwrap(), None);
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_recent_ids_lists_newest_first() {
    let store = store().await;
    let id = fresh_id("recent");
    let mut order = sample_order(&id);
    order.date_created = chrono::Utc::now() + chrono::Duration::days(365);
    order.stamp_foreign_keys();
    store.persist(&order).await.unwrap();

    let recent = store.recent_ids(1).await.unwrap();
    assert_eq!(recent, vec![id]);
}
