//! The single reader against the broker.

use crate::broker::{AckHandle, Broker, Envelope};
use crate::pipeline::{PipelineStats, QueueSender, Task};
use serde::de::IgnoredAny;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Pulls messages from the broker and feeds the task queue.
///
/// Payloads that are not JSON at all go straight to the ack queue and never
/// reach a worker. Broker errors are logged and retried after a pause; the
/// fetcher only exits on cancellation or when a queue it feeds is closed.
pub struct Fetcher<B: Broker> {
    broker: Arc<B>,
    tasks: QueueSender<Task>,
    acks: QueueSender<AckHandle>,
    stats: Arc<PipelineStats>,
    cancel: CancellationToken,
    retry_backoff: Duration,
}

impl<B: Broker> Fetcher<B> {
    pub fn new(
        broker: Arc<B>,
        tasks: QueueSender<Task>,
        acks: QueueSender<AckHandle>,
        stats: Arc<PipelineStats>,
        cancel: CancellationToken,
        retry_backoff: Duration,
    ) -> Self {
        Self {
            broker,
            tasks,
            acks,
            stats,
            cancel,
            retry_backoff,
        }
    }

    /// Runs until cancelled. Dropping `self` on return closes the fetcher's
    /// side of both queues.
    pub async fn run(self) {
        info!("Fetcher started");

        loop {
            let fetched = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                fetched = self.broker.fetch() => fetched,
            };

            match fetched {
                Ok(envelope) => {
                    if self.dispatch(envelope).await.is_break() {
                        break;
                    }
                }
                Err(e) => {
                    warn!(error = %e, backoff = ?self.retry_backoff, "Broker fetch failed, retrying");
                    tokio::select! {
                        _ = self.cancel.cancelled() => break,
                        _ = tokio::time::sleep(self.retry_backoff) => {}
                    }
                }
            }
        }

        let stats = self.stats.snapshot();
        info!(
            fetched = stats.fetched,
            malformed = stats.malformed,
            "Fetcher stopped"
        );
    }

    async fn dispatch(&self, envelope: Envelope) -> ControlFlow<()> {
        self.stats.record_fetched();

        if serde_json::from_slice::<IgnoredAny>(&envelope.payload).is_err() {
            self.stats.record_malformed();
            warn!(handle = %envelope.handle, bytes = envelope.payload.len(), "Malformed payload, acknowledging");
            if self.acks.send(envelope.handle).await.is_err() {
                warn!("Ack queue closed");
                return ControlFlow::Break(());
            }
            return ControlFlow::Continue(());
        }

        let handle = envelope.handle.clone();
        tokio::select! {
            biased;
            sent = self.tasks.send(Task::from(envelope)) => {
                if sent.is_err() {
                    warn!(%handle, "Task queue closed");
                    return ControlFlow::Break(());
                }
                debug!(%handle, "Task queued");
                ControlFlow::Continue(())
            }
            // Unacknowledged, so the broker delivers it again after restart.
            _ = self.cancel.cancelled() => {
                debug!(%handle, "Cancelled while waiting for queue space");
                ControlFlow::Break(())
            }
        }
    }
}
