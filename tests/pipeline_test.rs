use std::sync::Arc;
use std::time::Duration;

use order_ingest::lifecycle::{PipelineSettings, PipelineSystem, SystemState};
use order_ingest::mock::{sample_order, MemoryBroker, MemoryStore};
use order_ingest::model::Order;

const WAIT: Duration = Duration::from_secs(2);

fn settings(workers: usize) -> PipelineSettings {
    PipelineSettings {
        workers,
        task_queue_size: 16,
        ack_queue_size: 16,
        persist_timeout: Duration::from_secs(1),
        lookup_timeout: Duration::from_secs(1),
        fetch_retry_backoff: Duration::from_millis(10),
        cache_warmup_limit: 0,
    }
}

async fn start(
    workers: usize,
) -> (
    Arc<MemoryBroker>,
    Arc<MemoryStore>,
    PipelineSystem<MemoryStore>,
) {
    start_with(settings(workers)).await
}

async fn start_with(
    settings: PipelineSettings,
) -> (
    Arc<MemoryBroker>,
    Arc<MemoryStore>,
    PipelineSystem<MemoryStore>,
) {
    let broker = Arc::new(MemoryBroker::new("orders"));
    let store = Arc::new(MemoryStore::new());
    let system = PipelineSystem::start(Arc::clone(&broker), Arc::clone(&store), &settings).await;
    (broker, store, system)
}

/// Polls `condition` until it holds, failing the test after [`WAIT`].
async fn eventually(what: &str, condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + WAIT;
    while !condition() {
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// The order from the end-to-end scenario: two items, payment `tx1`.
fn order_o1() -> Order {
    let mut order = sample_order("o1");
    order.payment.transaction = "tx1".to_string();
    order
}

#[tokio::test]
async fn test_valid_order_is_persisted_acknowledged_and_served() {
    let (broker, store, system) = start(4).await;
    let order = order_o1();

    let handle = broker.push_order(&order);

    assert_eq!(broker.wait_for_acks(1, WAIT).await, vec![handle]);
    assert!(store.contains("o1"));
    assert_eq!(store.order_count(), 1);
    assert_eq!(store.item_count(), 2);

    let mut expected = order;
    expected.stamp_foreign_keys();
    let served = system.cache().get("o1").await.unwrap();
    assert_eq!(served, Some(expected));

    let stats = system.stats();
    assert_eq!(stats.persisted, 1);
    assert_eq!(stats.acked, 1);

    system.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_invalid_order_is_acknowledged_without_persisting() {
    let (broker, store, system) = start(2).await;
    let mut order = sample_order("neg");
    order.payment.amount = -5;

    let handle = broker.push_order(&order);

    assert_eq!(broker.wait_for_acks(1, WAIT).await, vec![handle]);
    assert_eq!(store.persists(), 0);
    assert_eq!(system.cache().get("neg").await.unwrap(), None);
    assert_eq!(system.stats().rejected, 1);

    system.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_malformed_payload_is_acknowledged_immediately_and_pipeline_continues() {
    let (broker, store, system) = start(2).await;

    let garbage = broker.push(&b"{\"order_uid\": \"o1\", oops"[..]);
    let good = broker.push_order(&sample_order("o2"));

    let acked = broker.wait_for_acks(2, WAIT).await;
    assert_eq!(acked, vec![garbage, good]);

    // The garbage never became a worker task.
    assert_eq!(store.persists(), 1);
    assert!(store.contains("o2"));
    let stats = system.stats();
    assert_eq!(stats.malformed, 1);
    assert_eq!(stats.rejected, 0);

    system.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_redelivered_order_is_stored_once_and_acknowledged_twice() {
    let (broker, store, system) = start(4).await;
    let order = sample_order("dup");

    let first = broker.push_order(&order);
    let second = broker.push_order(&order);

    let mut acked = broker.wait_for_acks(2, WAIT).await;
    acked.sort_by_key(|handle| handle.offset());
    assert_eq!(acked, vec![first, second]);

    assert_eq!(store.order_count(), 1);
    assert_eq!(store.item_count(), 2);
    let stats = system.stats();
    assert_eq!(stats.persisted, 1);
    assert_eq!(stats.duplicates, 1);

    system.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_persist_failure_leaves_message_unacknowledged() {
    let (broker, store, system) = start(1).await;
    store.fail_persists(1);

    let _lost = broker.push_order(&sample_order("o1"));
    let kept = broker.push_order(&sample_order("o2"));

    // One worker: o1 has failed by the time o2 is acknowledged.
    assert_eq!(broker.wait_for_acks(1, WAIT).await, vec![kept]);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(broker.acked().len(), 1);

    assert!(!store.contains("o1"));
    assert!(store.contains("o2"));
    assert_eq!(system.stats().failed, 1);

    system.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_persist_timeout_leaves_message_unacknowledged() {
    let mut settings = settings(1);
    settings.persist_timeout = Duration::from_millis(20);
    let (broker, store, system) = start_with(settings).await;
    store.set_persist_delay(Duration::from_millis(200));

    broker.push_order(&sample_order("slow"));

    eventually("timeout", || system.stats().failed == 1).await;
    assert!(broker.acked().is_empty());

    system.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_fetch_errors_are_retried() {
    let (broker, store, system) = start(1).await;
    broker.fail_fetches(3);

    let handle = broker.push_order(&sample_order("o1"));

    assert_eq!(broker.wait_for_acks(1, WAIT).await, vec![handle]);
    assert!(store.contains("o1"));

    system.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_drains_every_queued_task() {
    let (broker, store, system) = start(2).await;
    store.set_persist_delay(Duration::from_millis(30));
    let state = system.state_watch();

    for i in 0..10 {
        broker.push_order(&sample_order(&format!("drain-{i}")));
    }
    // Everything has left the broker and sits in the task queue or a worker.
    eventually("fetch", || broker.pending() == 0).await;

    system.shutdown().await.unwrap();

    assert_eq!(store.order_count(), 10);
    assert_eq!(broker.acked().len(), 10);
    assert_eq!(*state.borrow(), SystemState::Stopped);
}

#[tokio::test]
async fn test_every_persisted_order_is_acknowledged_when_cancelled_under_backpressure() {
    let mut settings = settings(1);
    settings.task_queue_size = 1;
    settings.ack_queue_size = 1;
    let (broker, store, system) = start_with(settings).await;
    store.set_persist_delay(Duration::from_millis(40));

    for i in 0..6 {
        broker.push_order(&sample_order(&format!("bp-{i}")));
    }
    eventually("first persist", || store.persists() >= 1).await;

    system.shutdown().await.unwrap();

    // Work that reached a worker finished; the rest stayed with the broker.
    let persisted = store.order_count();
    assert!(persisted >= 1);
    assert!(persisted < 6);
    assert_eq!(broker.acked().len(), persisted);
}

#[tokio::test]
async fn test_state_moves_from_running_to_stopped() {
    let (_broker, _store, system) = start(1).await;
    assert_eq!(system.state(), SystemState::Running);

    let state = system.state_watch();
    system.shutdown().await.unwrap();
    assert_eq!(*state.borrow(), SystemState::Stopped);
}

#[tokio::test]
async fn test_warm_up_preloads_recent_orders() {
    let broker = Arc::new(MemoryBroker::new("orders"));
    let store = Arc::new(MemoryStore::new());
    for id in ["a", "b", "c"] {
        store.insert(sample_order(id)).await;
    }

    let mut settings = settings(1);
    settings.cache_warmup_limit = 2;
    let system = PipelineSystem::start(broker, Arc::clone(&store), &settings).await;

    assert_eq!(system.cache().len().await, 2);
    let reads = store.reads();
    system.cache().get("c").await.unwrap().unwrap();
    assert_eq!(store.reads(), reads, "warmed entry served from memory");

    system.shutdown().await.unwrap();
}
