//! Bounded multi-producer / multi-consumer queue.
//!
//! Built on a `tokio::sync::mpsc` channel whose receiver is shared behind an
//! async mutex, so any number of workers can pull from the same queue.
//!
//! - `send` waits while the queue is full. This is the backpressure path and
//!   must never be replaced by dropping or overwriting items.
//! - `recv` waits while the queue is empty and returns `None` once the queue
//!   is closed *and* drained.
//! - The queue closes when every [`QueueSender`] is dropped, or explicitly via
//!   [`QueueReceiver::close`]. Items already queued are still delivered.
//!
//! A consumer parked in `recv` holds the receiver mutex, so explicit closing
//! goes through a shared [`CancellationToken`] that the parked consumer also
//! waits on. `close` never queues behind a parked consumer.

use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

/// Returned by [`QueueSender::send`] once the queue no longer accepts items.
/// Carries the rejected item back to the caller.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("queue closed")]
pub struct QueueClosed<T>(pub T);

/// Creates a queue holding at most `capacity` items.
///
/// # Panics
///
/// Panics if `capacity` is zero. Configuration rejects zero capacities before
/// a queue is ever built.
pub fn bounded<T>(capacity: usize) -> (QueueSender<T>, QueueReceiver<T>) {
    let (sender, receiver) = mpsc::channel(capacity);
    let closed = CancellationToken::new();
    (
        QueueSender {
            sender,
            closed: closed.clone(),
        },
        QueueReceiver {
            receiver: Arc::new(Mutex::new(receiver)),
            closed,
        },
    )
}

/// Producer half. Cheap to clone; the queue stays open while any clone lives.
pub struct QueueSender<T> {
    sender: mpsc::Sender<T>,
    closed: CancellationToken,
}

impl<T> Clone for QueueSender<T> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            closed: self.closed.clone(),
        }
    }
}

impl<T> QueueSender<T> {
    /// Pushes an item, waiting for free capacity.
    pub async fn send(&self, item: T) -> Result<(), QueueClosed<T>> {
        if self.closed.is_cancelled() {
            return Err(QueueClosed(item));
        }
        self.sender
            .send(item)
            .await
            .map_err(|mpsc::error::SendError(item)| QueueClosed(item))
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled() || self.sender.is_closed()
    }
}

/// Consumer half. Clones share the same underlying queue.
pub struct QueueReceiver<T> {
    receiver: Arc<Mutex<mpsc::Receiver<T>>>,
    closed: CancellationToken,
}

impl<T> Clone for QueueReceiver<T> {
    fn clone(&self) -> Self {
        Self {
            receiver: Arc::clone(&self.receiver),
            closed: self.closed.clone(),
        }
    }
}

impl<T> QueueReceiver<T> {
    /// Pops the next item, waiting while the queue is empty.
    ///
    /// Returns `None` once the queue is closed and fully drained.
    pub async fn recv(&self) -> Option<T> {
        let mut receiver = self.receiver.lock().await;
        tokio::select! {
            biased;
            item = receiver.recv() => return item,
            _ = self.closed.cancelled() => {}
        }
        // A closed channel hands out what is buffered, then `None`.
        receiver.close();
        receiver.recv().await
    }

    /// Stops accepting new items. Queued items remain available to `recv`.
    ///
    /// Wakes a consumer parked on an empty queue; it returns `None`.
    pub async fn close(&self) {
        self.closed.cancel();
        // Any holder of the lock has been woken by the token and releases it
        // without waiting on the channel again.
        self.receiver.lock().await.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_full_queue_blocks_sender_until_dequeued() {
        let (tx, rx) = bounded::<u32>(1);
        tx.send(1).await.unwrap();

        // Second push cannot complete while the single slot is taken.
        let blocked = timeout(Duration::from_millis(50), tx.send(2)).await;
        assert!(blocked.is_err(), "send should block on a full queue");

        let pending = tokio::spawn({
            let tx = tx.clone();
            async move { tx.send(2).await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!pending.is_finished());

        assert_eq!(rx.recv().await, Some(1));
        pending.await.unwrap().unwrap();
        assert_eq!(rx.recv().await, Some(2));
    }

    #[tokio::test]
    async fn test_closed_queue_rejects_new_items_but_drains_old_ones() {
        let (tx, rx) = bounded::<&str>(4);
        tx.send("a").await.unwrap();
        tx.send("b").await.unwrap();

        rx.close().await;

        assert_eq!(tx.send("c").await, Err(QueueClosed("c")));
        assert!(tx.is_closed());
        assert_eq!(rx.recv().await, Some("a"));
        assert_eq!(rx.recv().await, Some("b"));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_close_wakes_a_consumer_parked_on_an_empty_queue() {
        let (tx, rx) = bounded::<u32>(4);

        let parked = tokio::spawn({
            let rx = rx.clone();
            async move { rx.recv().await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!parked.is_finished());

        timeout(Duration::from_millis(500), rx.close())
            .await
            .expect("close must not wait for the parked consumer");

        let received = timeout(Duration::from_millis(500), parked)
            .await
            .expect("parked consumer wakes up")
            .unwrap();
        assert_eq!(received, None);
        assert!(tx.is_closed());
        assert_eq!(tx.send(7).await, Err(QueueClosed(7)));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_close_wakes_a_sender_blocked_on_a_full_queue() {
        let (tx, rx) = bounded::<u32>(1);
        tx.send(1).await.unwrap();

        let blocked = tokio::spawn({
            let tx = tx.clone();
            async move { tx.send(2).await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        rx.close().await;

        let sent = timeout(Duration::from_millis(500), blocked)
            .await
            .expect("blocked sender is released")
            .unwrap();
        assert_eq!(sent, Err(QueueClosed(2)));
        assert_eq!(rx.recv().await, Some(1));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_dropping_all_senders_ends_every_consumer() {
        let (tx, rx) = bounded::<u32>(8);
        for i in 0..6 {
            tx.send(i).await.unwrap();
        }
        drop(tx);

        let consumers: Vec<_> = (0..3)
            .map(|_| {
                let rx = rx.clone();
                tokio::spawn(async move {
                    let mut seen = Vec::new();
                    while let Some(i) = rx.recv().await {
                        seen.push(i);
                    }
                    seen
                })
            })
            .collect();

        let mut all = Vec::new();
        for consumer in consumers {
            all.extend(consumer.await.unwrap());
        }
        all.sort_unstable();
        assert_eq!(all, vec![0, 1, 2, 3, 4, 5]);
    }
}
