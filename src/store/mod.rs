//! The persistence gateway: durable, all-or-nothing writes of an order
//! aggregate and consistent point reads of it.
//!
//! # Deduplication
//!
//! "Already processed" is decided by the store's own uniqueness constraints
//! (`orders.order_uid` and `payments.transaction`). A redelivered message hits
//! one of those constraints, the whole transaction rolls back, and
//! [`OrderStore::persist`] reports [`PersistOutcome::AlreadyPersisted`]. The
//! caller treats that exactly like a fresh insert and acknowledges the message.
//!
//! # Implementations
//!
//! - [`PgOrderStore`]: PostgreSQL via `sqlx` (production).
//! - [`MemoryStore`](crate::mock::MemoryStore): in-memory, for tests.

pub mod error;
pub mod postgres;

pub use error::StoreError;
pub use postgres::{create_pool, PgOrderStore};

use crate::model::Order;
use async_trait::async_trait;

/// Result of a successful [`OrderStore::persist`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistOutcome {
    /// The aggregate was written by this call.
    Inserted,
    /// A uniqueness constraint showed the aggregate was written earlier.
    AlreadyPersisted,
}

/// Durable storage for order aggregates.
#[async_trait]
pub trait OrderStore: Send + Sync + 'static {
    /// Writes the order, its delivery, its payment and all of its items in one
    /// transaction. Child foreign keys must already be stamped.
    ///
    /// Nothing is visible to readers unless every row was written.
    async fn persist(&self, order: &Order) -> Result<PersistOutcome, StoreError>;

    /// Reads one order with all of its children from a single snapshot.
    ///
    /// Returns `Ok(None)` when no order has this identifier.
    async fn fetch(&self, order_uid: &str) -> Result<Option<Order>, StoreError>;

    /// Identifiers of the most recently created orders, newest first.
    async fn recent_ids(&self, limit: usize) -> Result<Vec<String>, StoreError>;
}
