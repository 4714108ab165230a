use crate::broker::{AckHandle, Broker};
use crate::pipeline::{PipelineStats, QueueReceiver};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// The single writer of acknowledgments.
///
/// Reports handles to the broker in the order workers completed them. A
/// failed acknowledgment is logged and skipped; the message will simply be
/// delivered again.
pub struct Committer<B: Broker> {
    broker: Arc<B>,
    acks: QueueReceiver<AckHandle>,
    stats: Arc<PipelineStats>,
}

impl<B: Broker> Committer<B> {
    pub fn new(broker: Arc<B>, acks: QueueReceiver<AckHandle>, stats: Arc<PipelineStats>) -> Self {
        Self {
            broker,
            acks,
            stats,
        }
    }

    /// Runs until the ack queue is closed and drained.
    pub async fn run(self) {
        info!("Committer started");

        while let Some(handle) = self.acks.recv().await {
            match self.broker.ack(&handle).await {
                Ok(()) => {
                    self.stats.record_acked();
                    debug!(%handle, "Acknowledged");
                }
                Err(e) => {
                    self.stats.record_ack_failure();
                    warn!(%handle, error = %e, "Acknowledge failed");
                }
            }
        }

        let stats = self.stats.snapshot();
        info!(
            acked = stats.acked,
            ack_failures = stats.ack_failures,
            "Committer stopped"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MemoryBroker;
    use crate::pipeline::bounded;

    #[tokio::test]
    async fn test_acks_in_completion_order_and_survives_failures() {
        let broker = Arc::new(MemoryBroker::new("orders"));
        let first = broker.push("{}");
        let second = broker.push("{}");
        let third = broker.push("{}");
        broker.fail_acks(1);

        let stats = Arc::new(PipelineStats::default());
        let (tx, rx) = bounded(4);
        let committer = tokio::spawn(
            Committer::new(Arc::clone(&broker), rx, Arc::clone(&stats)).run(),
        );

        // `first` fails, then the rest land out of fetch order.
        tx.send(first).await.unwrap();
        tx.send(third.clone()).await.unwrap();
        tx.send(second.clone()).await.unwrap();
        drop(tx);
        committer.await.unwrap();

        assert_eq!(broker.acked(), vec![third, second]);
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.acked, 2);
        assert_eq!(snapshot.ack_failures, 1);
    }
}
