//! # Read-Through Order Cache
//!
//! Process-wide map from `order_uid` to a fully assembled [`Order`].
//!
//! On a miss the cache reads the order from its [`OrderStore`] and memoizes
//! the result before returning it. Entries are never evicted or updated once
//! set; the map grows with the number of distinct identifiers found.
//!
//! Concurrent lookups for the same missing identifier may each read the store.
//! The first memoized value wins and every caller returns that value, so all
//! of them converge on one answer.
//!
//! "Not found" is never memoized: an order that arrives later must become
//! visible on the next lookup.
//!
//! A store read on a miss is bounded by a timeout and abandoned as soon as the
//! cache's cancellation token fires, so a slow database cannot hold a request
//! (and with it the server's graceful shutdown) open indefinitely.

use crate::model::Order;
use crate::store::{OrderStore, StoreError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Read side used by the lookup API.
#[async_trait]
pub trait OrderLookup: Send + Sync + 'static {
    /// `Ok(None)` means no such order. `Err` means the lookup itself failed.
    async fn lookup(&self, order_uid: &str) -> Result<Option<Order>, StoreError>;
}

pub struct OrderCache<S: OrderStore> {
    store: Arc<S>,
    entries: RwLock<HashMap<String, Order>>,
    read_timeout: Duration,
    cancel: CancellationToken,
}

impl<S: OrderStore> OrderCache<S> {
    /// `read_timeout` bounds each store read on a miss; `cancel` abandons
    /// reads still in flight.
    pub fn new(store: Arc<S>, read_timeout: Duration, cancel: CancellationToken) -> Self {
        Self {
            store,
            entries: RwLock::new(HashMap::new()),
            read_timeout,
            cancel,
        }
    }

    /// Returns the order, reading through to the store on a miss.
    pub async fn get(&self, order_uid: &str) -> Result<Option<Order>, StoreError> {
        if let Some(order) = self.entries.read().await.get(order_uid) {
            debug!(order_uid, "Cache hit");
            return Ok(Some(order.clone()));
        }

        debug!(order_uid, "Cache miss");
        let fetched = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(StoreError::Cancelled),
            fetched = tokio::time::timeout(self.read_timeout, self.store.fetch(order_uid)) => fetched,
        };
        let fetched = fetched.map_err(|_| StoreError::Timeout(self.read_timeout))?;
        let Some(order) = fetched? else {
            return Ok(None);
        };

        let mut entries = self.entries.write().await;
        let cached = entries.entry(order_uid.to_owned()).or_insert(order);
        Ok(Some(cached.clone()))
    }

    /// Preloads the `limit` most recently created orders.
    ///
    /// Individual read failures are logged and skipped; the lazy path will
    /// retry those identifiers on demand. Returns the number of orders loaded.
    pub async fn warm_up(&self, limit: usize) -> Result<usize, StoreError> {
        if limit == 0 {
            return Ok(0);
        }

        let ids = self.store.recent_ids(limit).await?;
        let mut loaded = 0;
        for order_uid in &ids {
            match self.get(order_uid).await {
                Ok(Some(_)) => loaded += 1,
                Ok(None) => {}
                Err(e) => warn!(%order_uid, error = %e, "Skipping order during cache warm-up"),
            }
        }

        info!(requested = limit, loaded, "Cache warmed up");
        Ok(loaded)
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl<S: OrderStore> OrderLookup for OrderCache<S> {
    async fn lookup(&self, order_uid: &str) -> Result<Option<Order>, StoreError> {
        self.get(order_uid).await
    }
}
