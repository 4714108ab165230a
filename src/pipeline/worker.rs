//! # Worker
//!
//! Each worker loops over the shared task queue:
//!
//! 1. decode the payload into an [`Order`]
//! 2. [`validate`] it
//! 3. stamp the child foreign keys from the order identifier
//! 4. persist it, bounded by the per-task timeout
//! 5. hand the message's ack handle to the committer
//!
//! Step 5 only happens when the outcome is final: persisted, already
//! persisted, or a payload that no redelivery can fix. Persistence failures
//! and timeouts are logged and the task is dropped unacknowledged.
//!
//! A worker never observes cancellation. It exits once the task queue is
//! closed and empty, so every task it dequeued runs to completion.

use crate::broker::AckHandle;
use crate::model::{validate, Order};
use crate::pipeline::{PipelineStats, ProcessError, QueueReceiver, QueueSender, Task};
use crate::store::{OrderStore, PersistOutcome};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, info_span, warn, Instrument};

pub struct Worker<S: OrderStore> {
    id: usize,
    store: Arc<S>,
    tasks: QueueReceiver<Task>,
    acks: QueueSender<AckHandle>,
    stats: Arc<PipelineStats>,
    persist_timeout: Duration,
}

impl<S: OrderStore> Worker<S> {
    pub fn new(
        id: usize,
        store: Arc<S>,
        tasks: QueueReceiver<Task>,
        acks: QueueSender<AckHandle>,
        stats: Arc<PipelineStats>,
        persist_timeout: Duration,
    ) -> Self {
        Self {
            id,
            store,
            tasks,
            acks,
            stats,
            persist_timeout,
        }
    }

    /// Drains the task queue. Returns once it is closed and empty.
    pub async fn run(self) {
        let span = info_span!("worker", id = self.id);
        async move {
            info!("Worker started");
            let mut handled = 0u64;

            while let Some(task) = self.tasks.recv().await {
                let span = info_span!("task", handle = %task.handle, key = %task.key_lossy());
                self.handle(task).instrument(span).await;
                handled += 1;
            }

            info!(handled, "Worker stopped");
        }
        .instrument(span)
        .await
    }

    /// Decodes, validates and persists one payload.
    pub async fn process(&self, payload: &[u8]) -> Result<PersistOutcome, ProcessError> {
        let mut order = Order::from_slice(payload)?;
        validate(&order)?;
        order.stamp_foreign_keys();

        tokio::time::timeout(self.persist_timeout, self.store.persist(&order))
            .await
            .map_err(|_| ProcessError::Timeout(self.persist_timeout))?
            .map_err(ProcessError::from)
    }

    async fn handle(&self, task: Task) {
        match self.process(&task.payload).await {
            Ok(PersistOutcome::Inserted) => {
                self.stats.record_persisted();
                debug!("Persisted");
            }
            Ok(PersistOutcome::AlreadyPersisted) => {
                self.stats.record_duplicate();
                info!("Already persisted, acknowledging duplicate");
            }
            Err(e) if e.is_terminal() => {
                self.stats.record_rejected();
                warn!(error = %e, "Dropping message");
            }
            Err(e) => {
                self.stats.record_failed();
                error!(error = %e, "Persist failed, leaving message for redelivery");
                return;
            }
        }

        if self.acks.send(task.handle).await.is_err() {
            error!("Ack queue closed before the task was acknowledged");
        }
    }
}
