//! Error types for the persistence gateway.

use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by an [`OrderStore`](crate::store::OrderStore).
///
/// Every variant is retryable from the pipeline's point of view: the message
/// stays unacknowledged and the broker redelivers it. Duplicate writes are not
/// errors and never show up here.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A statement inside the write or read transaction failed.
    #[error("{step}: {source}")]
    Query {
        step: &'static str,
        #[source]
        source: sqlx::Error,
    },

    /// Pool checkout, `BEGIN` or `COMMIT` failed.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A row could not be mapped back onto the model.
    #[error("data corruption: {0}")]
    DataCorruption(String),

    /// The read did not finish within the configured bound.
    #[error("store read timed out after {0:?}")]
    Timeout(Duration),

    /// The read was abandoned because the system is shutting down.
    #[error("store read cancelled")]
    Cancelled,
}

impl StoreError {
    pub(crate) fn query(step: &'static str) -> impl FnOnce(sqlx::Error) -> Self {
        move |source| Self::Query { step, source }
    }
}
