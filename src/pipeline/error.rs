use crate::model::ValidationError;
use crate::store::StoreError;
use std::time::Duration;
use thiserror::Error;

/// Why a worker could not complete a task.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("payload does not decode into an order: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("order failed validation: {0}")]
    Invalid(#[from] ValidationError),

    #[error("persist failed: {0}")]
    Persist(#[from] StoreError),

    #[error("persist timed out after {0:?}")]
    Timeout(Duration),
}

impl ProcessError {
    /// Whether redelivery could never fix this message.
    ///
    /// Terminal failures are acknowledged and dropped. Everything else is
    /// left unacknowledged so the broker delivers the message again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Decode(_) | Self::Invalid(_))
    }
}
