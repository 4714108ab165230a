//! # In-Memory Broker and Store
//!
//! Test doubles for driving the pipeline without Kafka or PostgreSQL.
//!
//! - [`MemoryBroker`]: a single-partition queue of messages. Records every
//!   acknowledgment and can be told to fail fetches or acks.
//! - [`MemoryStore`]: enforces the same uniqueness contract as the real
//!   schema (order identifier and payment transaction), counts reads and
//!   writes, and supports failure injection and artificial latency.
//!
//! # Example
//! ```ignore
//! let broker = Arc::new(MemoryBroker::new("orders"));
//! let store = Arc::new(MemoryStore::new());
//! let handle = broker.push_order(&sample_order("o1"));
//!
//! // ... run the pipeline ...
//!
//! let acked = broker.wait_for_acks(1, Duration::from_secs(1)).await;
//! assert_eq!(acked, vec![handle]);
//! assert!(store.contains("o1"));
//! ```

use crate::broker::{AckHandle, Broker, BrokerError, Envelope};
use crate::model::{Delivery, Item, Order, Payment};
use crate::store::{OrderStore, PersistOutcome, StoreError};
use async_trait::async_trait;
use chrono::DateTime;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::Notify;

/// Consumes one unit from a failure budget, returning whether it was spent.
fn take_one(budget: &AtomicUsize) -> bool {
    budget
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

async fn pause(millis: &AtomicU64) {
    let millis = millis.load(Ordering::Relaxed);
    if millis > 0 {
        tokio::time::sleep(Duration::from_millis(millis)).await;
    }
}

// =============================================================================
// SAMPLE DATA
// =============================================================================

/// A valid order with two items, keyed by `order_uid`.
///
/// The payment transaction is derived from the identifier, so distinct
/// identifiers never collide on the transaction constraint.
pub fn sample_order(order_uid: &str) -> Order {
    let item = |chrt_id: i64, price: i64| Item {
        chrt_id,
        track_number: "T1".into(),
        price,
        rid: format!("{order_uid}-{chrt_id}"),
        name: "Mascaras".into(),
        sale: 30,
        size: "0".into(),
        total_price: price,
        nm_id: 2389212,
        brand: "Vivienne Sabo".into(),
        status: 202,
        ..Default::default()
    };

    Order {
        order_uid: order_uid.into(),
        track_number: "T1".into(),
        entry: "WBIL".into(),
        delivery: Delivery {
            name: "Test Testov".into(),
            phone: "+9720000000".into(),
            zip: "2639809".into(),
            city: "Kiryat Mozkin".into(),
            address: "Ploshad Mira 15".into(),
            region: "Kraiot".into(),
            email: "test@gmail.com".into(),
            ..Default::default()
        },
        payment: Payment {
            transaction: format!("tx-{order_uid}"),
            currency: "USD".into(),
            provider: "wbpay".into(),
            amount: 100,
            payment_dt: 1637907727,
            bank: "alpha".into(),
            delivery_cost: 0,
            goods_total: 110,
            ..Default::default()
        },
        items: vec![item(9934930, 50), item(9934931, 60)],
        locale: "en".into(),
        customer_id: "c1".into(),
        delivery_service: "meest".into(),
        shard_key: "9".into(),
        sm_id: 99,
        date_created: DateTime::from_timestamp(1637907739, 0).unwrap_or_default(),
        oof_shard: "1".into(),
        ..Default::default()
    }
}

// =============================================================================
// MEMORY BROKER
// =============================================================================

#[derive(Default)]
struct BrokerState {
    pending: VecDeque<Envelope>,
    next_offset: i64,
    acked: Vec<AckHandle>,
}

/// Single-partition in-memory broker.
///
/// Offsets are assigned in push order starting at zero. Nothing is ever
/// redelivered; tests inspect [`acked`](Self::acked) to see what the
/// pipeline acknowledged.
pub struct MemoryBroker {
    topic: String,
    state: Mutex<BrokerState>,
    available: Notify,
    fetch_failures: AtomicUsize,
    ack_failures: AtomicUsize,
}

impl MemoryBroker {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            state: Mutex::new(BrokerState::default()),
            available: Notify::new(),
            fetch_failures: AtomicUsize::new(0),
            ack_failures: AtomicUsize::new(0),
        }
    }

    /// Enqueues a raw payload and returns the handle it will be acked with.
    pub fn push(&self, payload: impl Into<Vec<u8>>) -> AckHandle {
        self.enqueue(None, payload.into())
    }

    /// Enqueues `order` serialized as JSON, keyed by its identifier.
    pub fn push_order(&self, order: &Order) -> AckHandle {
        let payload = serde_json::to_vec(order).expect("orders always serialize");
        self.enqueue(Some(order.order_uid.clone().into_bytes()), payload)
    }

    fn enqueue(&self, key: Option<Vec<u8>>, payload: Vec<u8>) -> AckHandle {
        let mut state = self.state.lock().unwrap();
        let handle = AckHandle::new(self.topic.clone(), 0, state.next_offset);
        state.next_offset += 1;
        state.pending.push_back(Envelope {
            key,
            payload,
            handle: handle.clone(),
        });
        drop(state);

        self.available.notify_one();
        handle
    }

    /// The next `n` fetches fail with [`BrokerError::Unavailable`].
    pub fn fail_fetches(&self, n: usize) {
        self.fetch_failures.store(n, Ordering::SeqCst);
    }

    /// The next `n` acks fail with [`BrokerError::Unavailable`].
    pub fn fail_acks(&self, n: usize) {
        self.ack_failures.store(n, Ordering::SeqCst);
    }

    /// Every handle acknowledged so far, in acknowledgment order.
    pub fn acked(&self) -> Vec<AckHandle> {
        self.state.lock().unwrap().acked.clone()
    }

    /// Messages pushed but not yet fetched.
    pub fn pending(&self) -> usize {
        self.state.lock().unwrap().pending.len()
    }

    /// Waits until at least `n` handles were acknowledged or `timeout`
    /// elapses, then returns what was acknowledged.
    pub async fn wait_for_acks(&self, n: usize, timeout: Duration) -> Vec<AckHandle> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let acked = self.acked();
            if acked.len() >= n || tokio::time::Instant::now() >= deadline {
                return acked;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn fetch(&self) -> Result<Envelope, BrokerError> {
        loop {
            if take_one(&self.fetch_failures) {
                return Err(BrokerError::Unavailable("injected fetch failure".into()));
            }
            if let Some(envelope) = self.state.lock().unwrap().pending.pop_front() {
                return Ok(envelope);
            }
            self.available.notified().await;
        }
    }

    async fn ack(&self, handle: &AckHandle) -> Result<(), BrokerError> {
        if take_one(&self.ack_failures) {
            return Err(BrokerError::Unavailable("injected ack failure".into()));
        }
        self.state.lock().unwrap().acked.push(handle.clone());
        Ok(())
    }
}

// =============================================================================
// MEMORY STORE
// =============================================================================

#[derive(Default)]
struct Tables {
    orders: HashMap<String, (u64, Order)>,
    transactions: HashSet<String>,
    next_seq: u64,
}

/// In-memory order store with the same uniqueness rules as the real schema.
///
/// A persist either writes the whole aggregate or nothing, because all
/// tables live behind one lock.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    reads: AtomicUsize,
    persists: AtomicUsize,
    persist_failures: AtomicUsize,
    fetch_failures: AtomicUsize,
    persist_delay_ms: AtomicU64,
    fetch_delay_ms: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes an order directly, bypassing counters and injected faults.
    pub async fn insert(&self, mut order: Order) {
        order.stamp_foreign_keys();
        let mut tables = self.tables.lock().unwrap();
        tables.transactions.insert(order.payment.transaction.clone());
        let seq = tables.next_seq;
        tables.next_seq += 1;
        tables.orders.insert(order.order_uid.clone(), (seq, order));
    }

    pub fn contains(&self, order_uid: &str) -> bool {
        self.tables.lock().unwrap().orders.contains_key(order_uid)
    }

    pub fn order_count(&self) -> usize {
        self.tables.lock().unwrap().orders.len()
    }

    pub fn item_count(&self) -> usize {
        self.tables
            .lock()
            .unwrap()
            .orders
            .values()
            .map(|(_, order)| order.items.len())
            .sum()
    }

    /// Number of `fetch` calls, including failed ones.
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Number of `persist` calls, including failed and duplicate ones.
    pub fn persists(&self) -> usize {
        self.persists.load(Ordering::SeqCst)
    }

    /// The next `n` persists fail with a pool timeout.
    pub fn fail_persists(&self, n: usize) {
        self.persist_failures.store(n, Ordering::SeqCst);
    }

    /// The next `n` fetches fail with a pool timeout.
    pub fn fail_fetches(&self, n: usize) {
        self.fetch_failures.store(n, Ordering::SeqCst);
    }

    pub fn set_persist_delay(&self, delay: Duration) {
        self.persist_delay_ms
            .store(delay.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn set_fetch_delay(&self, delay: Duration) {
        self.fetch_delay_ms
            .store(delay.as_millis() as u64, Ordering::Relaxed);
    }
}

#[async_trait]
impl OrderStore for MemoryStore {
    async fn persist(&self, order: &Order) -> Result<PersistOutcome, StoreError> {
        self.persists.fetch_add(1, Ordering::SeqCst);
        pause(&self.persist_delay_ms).await;
        if take_one(&self.persist_failures) {
            return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
        }

        let mut tables = self.tables.lock().unwrap();
        if tables.orders.contains_key(&order.order_uid)
            || tables.transactions.contains(&order.payment.transaction)
        {
            return Ok(PersistOutcome::AlreadyPersisted);
        }

        tables.transactions.insert(order.payment.transaction.clone());
        let seq = tables.next_seq;
        tables.next_seq += 1;
        tables
            .orders
            .insert(order.order_uid.clone(), (seq, order.clone()));
        Ok(PersistOutcome::Inserted)
    }

    async fn fetch(&self, order_uid: &str) -> Result<Option<Order>, StoreError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        pause(&self.fetch_delay_ms).await;
        if take_one(&self.fetch_failures) {
            return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
        }

        let tables = self.tables.lock().unwrap();
        Ok(tables.orders.get(order_uid).map(|(_, order)| order.clone()))
    }

    async fn recent_ids(&self, limit: usize) -> Result<Vec<String>, StoreError> {
        let tables = self.tables.lock().unwrap();
        let mut rows: Vec<_> = tables.orders.values().collect();
        rows.sort_by(|(a_seq, a), (b_seq, b)| {
            b.date_created
                .cmp(&a.date_created)
                .then(b_seq.cmp(a_seq))
        });
        Ok(rows
            .into_iter()
            .take(limit)
            .map(|(_, order)| order.order_uid.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::validate;

    #[test]
    fn test_sample_order_is_valid() {
        assert_eq!(validate(&sample_order("o1")), Ok(()));
    }

    #[tokio::test]
    async fn test_store_rejects_duplicate_transaction_under_new_id() {
        let store = MemoryStore::new();
        let mut first = sample_order("o1");
        first.stamp_foreign_keys();
        assert_eq!(store.persist(&first).await.unwrap(), PersistOutcome::Inserted);

        let mut clash = sample_order("o2");
        clash.payment.transaction = first.payment.transaction.clone();
        assert_eq!(
            store.persist(&clash).await.unwrap(),
            PersistOutcome::AlreadyPersisted
        );
        assert_eq!(store.order_count(), 1);
        assert!(!store.contains("o2"));
    }

    #[tokio::test]
    async fn test_broker_assigns_offsets_in_push_order() {
        let broker = MemoryBroker::new("orders");
        let a = broker.push("a");
        let b = broker.push("b");
        assert_eq!((a.offset(), b.offset()), (0, 1));

        broker.fail_fetches(1);
        assert!(broker.fetch().await.is_err());
        assert_eq!(broker.fetch().await.unwrap().handle, a);
        assert_eq!(broker.pending(), 1);
    }
}
