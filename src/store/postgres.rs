//! PostgreSQL implementation of [`OrderStore`].
//!
//! The table layout this module expects is documented in `schema/orders.sql`.
//! Uniqueness on `orders.order_uid` and `payments.transaction` is what makes
//! redelivered messages harmless.

use crate::model::{Delivery, Item, Order, Payment};
use crate::store::{OrderStore, PersistOutcome, StoreError};
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, Row, Transaction};
use std::time::Duration;
use tracing::{debug, instrument};

/// Creates a PostgreSQL connection pool.
///
/// # Errors
///
/// Returns `sqlx::Error` if the first connection cannot be established.
pub async fn create_pool(
    database_url: &SecretString,
    max_connections: u32,
    min_connections: u32,
) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .min_connections(min_connections)
        .acquire_timeout(Duration::from_secs(10))
        .idle_timeout(Duration::from_secs(5 * 60))
        .connect(database_url.expose_secret())
        .await
}

/// Order store backed by a shared `sqlx` connection pool.
///
/// Each call checks out one connection for the length of one transaction.
#[derive(Clone)]
pub struct PgOrderStore {
    pool: PgPool,
}

impl PgOrderStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn is_unique_violation(error: &sqlx::Error) -> bool {
    error
        .as_database_error()
        .is_some_and(|db_err| db_err.is_unique_violation())
}

async fn insert_aggregate(
    tx: &mut Transaction<'_, Postgres>,
    order: &Order,
) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO orders (
            order_uid, track_number, entry, locale, internal_signature,
            customer_id, delivery_service, shardkey, sm_id, date_created, oof_shard
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        "#,
    )
    .bind(&order.order_uid)
    .bind(&order.track_number)
    .bind(&order.entry)
    .bind(&order.locale)
    .bind(&order.internal_signature)
    .bind(&order.customer_id)
    .bind(&order.delivery_service)
    .bind(&order.shard_key)
    .bind(order.sm_id)
    .bind(order.date_created)
    .bind(&order.oof_shard)
    .execute(&mut **tx)
    .await
    .map_err(StoreError::query("insert orders"))?;

    let d = &order.delivery;
    sqlx::query(
        r#"
        INSERT INTO deliveries (order_id, name, phone, zip, city, address, region, email)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(&d.order_id)
    .bind(&d.name)
    .bind(&d.phone)
    .bind(&d.zip)
    .bind(&d.city)
    .bind(&d.address)
    .bind(&d.region)
    .bind(&d.email)
    .execute(&mut **tx)
    .await
    .map_err(StoreError::query("insert deliveries"))?;

    let p = &order.payment;
    sqlx::query(
        r#"
        INSERT INTO payments (
            order_id, transaction, request_id, currency, provider, amount, payment_dt,
            bank, delivery_cost, goods_total, custom_fee
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        "#,
    )
    .bind(&p.order_id)
    .bind(&p.transaction)
    .bind(&p.request_id)
    .bind(&p.currency)
    .bind(&p.provider)
    .bind(p.amount)
    .bind(p.payment_dt)
    .bind(&p.bank)
    .bind(p.delivery_cost)
    .bind(p.goods_total)
    .bind(p.custom_fee)
    .execute(&mut **tx)
    .await
    .map_err(StoreError::query("insert payments"))?;

    for item in &order.items {
        sqlx::query(
            r#"
            INSERT INTO order_items (
                order_id, chrt_id, track_number, price, rid, name, sale, size,
                total_price, nm_id, brand, status
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(&item.order_id)
        .bind(item.chrt_id)
        .bind(&item.track_number)
        .bind(item.price)
        .bind(&item.rid)
        .bind(&item.name)
        .bind(item.sale)
        .bind(&item.size)
        .bind(item.total_price)
        .bind(item.nm_id)
        .bind(&item.brand)
        .bind(item.status)
        .execute(&mut **tx)
        .await
        .map_err(StoreError::query("insert order_items"))?;
    }

    Ok(())
}

fn order_from_row(row: &PgRow) -> Result<Order, sqlx::Error> {
    Ok(Order {
        order_uid: row.try_get("order_uid")?,
        track_number: row.try_get("track_number")?,
        entry: row.try_get("entry")?,
        locale: row.try_get("locale")?,
        internal_signature: row.try_get("internal_signature")?,
        customer_id: row.try_get("customer_id")?,
        delivery_service: row.try_get("delivery_service")?,
        shard_key: row.try_get("shardkey")?,
        sm_id: row.try_get("sm_id")?,
        date_created: row.try_get("date_created")?,
        oof_shard: row.try_get("oof_shard")?,
        ..Default::default()
    })
}

fn delivery_from_row(row: &PgRow) -> Result<Delivery, sqlx::Error> {
    Ok(Delivery {
        order_id: row.try_get("order_id")?,
        name: row.try_get("name")?,
        phone: row.try_get("phone")?,
        zip: row.try_get("zip")?,
        city: row.try_get("city")?,
        address: row.try_get("address")?,
        region: row.try_get("region")?,
        email: row.try_get("email")?,
    })
}

fn payment_from_row(row: &PgRow) -> Result<Payment, sqlx::Error> {
    Ok(Payment {
        order_id: row.try_get("order_id")?,
        transaction: row.try_get("transaction")?,
        request_id: row.try_get("request_id")?,
        currency: row.try_get("currency")?,
        provider: row.try_get("provider")?,
        amount: row.try_get("amount")?,
        payment_dt: row.try_get("payment_dt")?,
        bank: row.try_get("bank")?,
        delivery_cost: row.try_get("delivery_cost")?,
        goods_total: row.try_get("goods_total")?,
        custom_fee: row.try_get("custom_fee")?,
    })
}

fn item_from_row(row: &PgRow) -> Result<Item, sqlx::Error> {
    Ok(Item {
        order_id: row.try_get("order_id")?,
        chrt_id: row.try_get("chrt_id")?,
        track_number: row.try_get("track_number")?,
        price: row.try_get("price")?,
        rid: row.try_get("rid")?,
        name: row.try_get("name")?,
        sale: row.try_get("sale")?,
        size: row.try_get("size")?,
        total_price: row.try_get("total_price")?,
        nm_id: row.try_get("nm_id")?,
        brand: row.try_get("brand")?,
        status: row.try_get("status")?,
    })
}

#[async_trait]
impl OrderStore for PgOrderStore {
    #[instrument(skip(self, order), fields(order_uid = %order.order_uid))]
    async fn persist(&self, order: &Order) -> Result<PersistOutcome, StoreError> {
        let mut tx = self.pool.begin().await?;

        match insert_aggregate(&mut tx, order).await {
            Ok(()) => {}
            Err(StoreError::Query { step, source }) if is_unique_violation(&source) => {
                debug!(step, "Already persisted");
                tx.rollback().await?;
                return Ok(PersistOutcome::AlreadyPersisted);
            }
            // Dropping `tx` rolls the transaction back.
            Err(e) => return Err(e),
        }

        tx.commit().await?;
        debug!(items = order.items.len(), "Committed");
        Ok(PersistOutcome::Inserted)
    }

    #[instrument(skip(self))]
    async fn fetch(&self, order_uid: &str) -> Result<Option<Order>, StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ, READ ONLY")
            .execute(&mut *tx)
            .await
            .map_err(StoreError::query("set transaction"))?;

        let row = sqlx::query(
            r#"
            SELECT order_uid, track_number, entry, locale, internal_signature,
                   customer_id, delivery_service, shardkey, sm_id, date_created, oof_shard
            FROM orders
            WHERE order_uid = $1
            "#,
        )
        .bind(order_uid)
        .fetch_optional(&mut *tx)
        .await
        .map_err(StoreError::query("select orders"))?;

        let Some(row) = row else {
            debug!("Not found");
            return Ok(None);
        };
        let mut order = order_from_row(&row).map_err(StoreError::query("decode orders"))?;

        let delivery = sqlx::query(
            r#"
            SELECT order_id, name, phone, zip, city, address, region, email
            FROM deliveries
            WHERE order_id = $1
            "#,
        )
        .bind(order_uid)
        .fetch_optional(&mut *tx)
        .await
        .map_err(StoreError::query("select deliveries"))?
        .ok_or_else(|| StoreError::DataCorruption(format!("order {order_uid} has no delivery")))?;
        order.delivery =
            delivery_from_row(&delivery).map_err(StoreError::query("decode deliveries"))?;

        let payment = sqlx::query(
            r#"
            SELECT order_id, transaction, request_id, currency, provider, amount, payment_dt,
                   bank, delivery_cost, goods_total, custom_fee
            FROM payments
            WHERE order_id = $1
            "#,
        )
        .bind(order_uid)
        .fetch_optional(&mut *tx)
        .await
        .map_err(StoreError::query("select payments"))?
        .ok_or_else(|| StoreError::DataCorruption(format!("order {order_uid} has no payment")))?;
        order.payment = payment_from_row(&payment).map_err(StoreError::query("decode payments"))?;

        let items = sqlx::query(
            r#"
            SELECT order_id, chrt_id, track_number, price, rid, name, sale, size,
                   total_price, nm_id, brand, status
            FROM order_items
            WHERE order_id = $1
            ORDER BY id
            "#,
        )
        .bind(order_uid)
        .fetch_all(&mut *tx)
        .await
        .map_err(StoreError::query("select order_items"))?;
        order.items = items
            .iter()
            .map(item_from_row)
            .collect::<Result<_, _>>()
            .map_err(StoreError::query("decode order_items"))?;

        tx.commit().await?;
        debug!(items = order.items.len(), "Fetched");
        Ok(Some(order))
    }

    async fn recent_ids(&self, limit: usize) -> Result<Vec<String>, StoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = sqlx::query("SELECT order_uid FROM orders ORDER BY date_created DESC LIMIT $1")
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(StoreError::query("select recent orders"))?;

        rows.iter()
            .map(|row| row.try_get("order_uid"))
            .collect::<Result<_, _>>()
            .map_err(StoreError::query("decode recent orders"))
    }
}
