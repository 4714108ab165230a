use std::fmt::{self, Display};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::api::{self, ApiState};
use crate::broker::Broker;
use crate::cache::{OrderCache, OrderLookup};
use crate::pipeline::{
    bounded, Committer, Fetcher, PipelineStats, StatsSnapshot, Worker,
};
use crate::store::OrderStore;

/// Sizing and timing knobs for one pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineSettings {
    pub workers: usize,
    pub task_queue_size: usize,
    pub ack_queue_size: usize,
    pub persist_timeout: Duration,
    /// Bound on the store read behind one cache miss.
    pub lookup_timeout: Duration,
    pub fetch_retry_backoff: Duration,
    /// Orders preloaded into the cache at startup. Zero keeps the cache lazy.
    pub cache_warmup_limit: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            workers: 4,
            task_queue_size: 100,
            ack_queue_size: 100,
            persist_timeout: Duration::from_secs(5),
            lookup_timeout: Duration::from_secs(5),
            fetch_retry_backoff: Duration::from_secs(1),
            cache_warmup_limit: 0,
        }
    }
}

/// Where the supervisor is in its one-way lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SystemState {
    Running,
    Draining,
    Stopped,
}

impl Display for SystemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Running => "running",
            Self::Draining => "draining",
            Self::Stopped => "stopped",
        })
    }
}

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("{task} task failed: {source}")]
    TaskFailed {
        task: String,
        #[source]
        source: JoinError,
    },

    #[error("lookup API I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// The supervisor for one ingestion pipeline.
///
/// `PipelineSystem` is responsible for:
/// - **Startup order**: cache, queues, workers, fetcher, committer, then
///   (optionally) the lookup API
/// - **Wiring**: handing each stage exactly the queue ends it needs
/// - **Drain**: stopping intake and letting every queued message finish
///
/// # Shutdown Process
///
/// The system itself holds no queue senders. Each queue closes when the last
/// stage feeding it exits:
///
/// 1. Cancel the fetcher. It stops reading and drops its senders, which
///    closes the task queue.
/// 2. Workers drain the task queue and exit. Every dequeued task finishes,
///    including its persistence call.
/// 3. With the fetcher and all workers gone the ack queue closes; the
///    committer drains it and exits.
/// 4. Cancel the shared token, which stops the lookup API. Cache misses
///    still waiting on the store fail at once, so open requests finish.
///
/// # Example
///
/// ```ignore
/// let system = PipelineSystem::start(broker, store, &settings).await;
/// system.serve_api(TcpListener::bind(addr).await?)?;
///
/// // ... wait for a termination signal ...
///
/// system.shutdown().await?;
/// ```
pub struct PipelineSystem<S: OrderStore> {
    cache: Arc<OrderCache<S>>,
    stats: Arc<PipelineStats>,
    state: watch::Sender<SystemState>,

    /// Shared cancellation; firing it stops everything still listening.
    shutdown: CancellationToken,
    /// Child of `shutdown` that stops only the fetcher.
    stop_fetching: CancellationToken,

    fetcher: JoinHandle<()>,
    workers: Vec<JoinHandle<()>>,
    committer: JoinHandle<()>,
    api: Option<JoinHandle<()>>,
}

impl<S: OrderStore> PipelineSystem<S> {
    /// Builds and starts every pipeline stage.
    ///
    /// A failed cache warm-up is logged and otherwise ignored; the cache
    /// falls back to lazy loading.
    pub async fn start<B: Broker>(
        broker: Arc<B>,
        store: Arc<S>,
        settings: &PipelineSettings,
    ) -> Self {
        info!(
            workers = settings.workers,
            task_queue_size = settings.task_queue_size,
            ack_queue_size = settings.ack_queue_size,
            persist_timeout = ?settings.persist_timeout,
            lookup_timeout = ?settings.lookup_timeout,
            "Starting pipeline"
        );

        let shutdown = CancellationToken::new();
        let stop_fetching = shutdown.child_token();

        // 1. Cache over the store
        let cache = Arc::new(OrderCache::new(
            Arc::clone(&store),
            settings.lookup_timeout,
            shutdown.clone(),
        ));
        if let Err(e) = cache.warm_up(settings.cache_warmup_limit).await {
            warn!(error = %e, "Cache warm-up failed, continuing with an empty cache");
        }

        // 2. Queues
        let stats = Arc::new(PipelineStats::default());
        let (task_tx, task_rx) = bounded(settings.task_queue_size);
        let (ack_tx, ack_rx) = bounded(settings.ack_queue_size);

        // 3. Workers
        let workers = (0..settings.workers)
            .map(|id| {
                let worker = Worker::new(
                    id,
                    Arc::clone(&store),
                    task_rx.clone(),
                    ack_tx.clone(),
                    Arc::clone(&stats),
                    settings.persist_timeout,
                );
                tokio::spawn(worker.run())
            })
            .collect();
        drop(task_rx);

        // 4. Fetcher takes the last task sender and an ack sender
        let fetcher = Fetcher::new(
            Arc::clone(&broker),
            task_tx,
            ack_tx,
            Arc::clone(&stats),
            stop_fetching.clone(),
            settings.fetch_retry_backoff,
        );
        let fetcher = tokio::spawn(fetcher.run());

        // 5. Committer
        let committer = tokio::spawn(Committer::new(broker, ack_rx, Arc::clone(&stats)).run());

        let (state, _) = watch::channel(SystemState::Running);
        info!("Pipeline running");

        Self {
            cache,
            stats,
            state,
            shutdown,
            stop_fetching,
            fetcher,
            workers,
            committer,
            api: None,
        }
    }

    /// Serves the lookup API on `listener` until shutdown completes.
    ///
    /// Returns the bound address.
    pub fn serve_api(&mut self, listener: TcpListener) -> Result<SocketAddr, LifecycleError> {
        let addr = listener.local_addr()?;
        let lookup: Arc<dyn OrderLookup> = self.cache.clone();
        let router = api::router(ApiState::new(lookup, self.state.subscribe()));
        let shutdown = self.shutdown.clone();

        self.api = Some(tokio::spawn(async move {
            let served = axum::serve(listener, router)
                .with_graceful_shutdown(shutdown.cancelled_owned())
                .await;
            if let Err(e) = served {
                error!(error = %e, "Lookup API failed");
            }
        }));

        info!(%addr, "Lookup API listening");
        Ok(addr)
    }

    pub fn state(&self) -> SystemState {
        *self.state.borrow()
    }

    /// Subscribes to state transitions.
    pub fn state_watch(&self) -> watch::Receiver<SystemState> {
        self.state.subscribe()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn cache(&self) -> &Arc<OrderCache<S>> {
        &self.cache
    }

    /// Drains the pipeline and waits for every task to exit.
    ///
    /// # Returns
    ///
    /// - `Ok(())` if every stage exited cleanly
    /// - `Err(LifecycleError::TaskFailed)` for the first stage that panicked;
    ///   the remaining stages are still awaited
    pub async fn shutdown(self) -> Result<(), LifecycleError> {
        info!("Shutting down pipeline...");
        self.state.send_replace(SystemState::Draining);

        let mut first_failure = None;
        let mut record = |task: String, joined: Result<(), JoinError>| {
            if let Err(source) = joined {
                error!(%task, error = %source, "Pipeline task failed");
                first_failure.get_or_insert(LifecycleError::TaskFailed { task, source });
            }
        };

        // =====================================================================
        // Step 1: Stop intake; the task queue closes when the fetcher exits
        // =====================================================================
        self.stop_fetching.cancel();
        record("fetcher".into(), self.fetcher.await);

        // =====================================================================
        // Step 2: Workers finish everything already queued
        // =====================================================================
        for (id, worker) in self.workers.into_iter().enumerate() {
            record(format!("worker {id}"), worker.await);
        }

        // =====================================================================
        // Step 3: No producers remain; the committer drains the ack queue
        // =====================================================================
        record("committer".into(), self.committer.await);

        // =====================================================================
        // Step 4: Cancel everything else
        // =====================================================================
        self.shutdown.cancel();
        if let Some(api) = self.api {
            record("lookup API".into(), api.await);
        }

        self.state.send_replace(SystemState::Stopped);

        let stats = self.stats.snapshot();
        info!(
            fetched = stats.fetched,
            persisted = stats.persisted,
            duplicates = stats.duplicates,
            rejected = stats.rejected,
            malformed = stats.malformed,
            failed = stats.failed,
            acked = stats.acked,
            ack_failures = stats.ack_failures,
            "Pipeline shutdown complete."
        );

        match first_failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
