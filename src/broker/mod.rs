//! The message source the pipeline consumes from.
//!
//! A [`Broker`] hands out [`Envelope`]s one at a time and later accepts the
//! envelope's [`AckHandle`] back to mark the message as consumed. Delivery is
//! at-least-once: anything not acknowledged may be delivered again.
//!
//! # Implementations
//!
//! - [`KafkaBroker`]: Kafka consumer group via `rdkafka` (production).
//! - [`MemoryBroker`](crate::mock::MemoryBroker): in-memory, for tests.

pub mod kafka;

pub use kafka::{KafkaBroker, KafkaSettings};

use async_trait::async_trait;
use std::fmt::{self, Display};
use thiserror::Error;

/// Opaque reference back to one broker message, used only to acknowledge it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AckHandle {
    topic: String,
    partition: i32,
    offset: i64,
}

impl AckHandle {
    pub fn new(topic: impl Into<String>, partition: i32, offset: i64) -> Self {
        Self {
            topic: topic.into(),
            partition,
            offset,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn partition(&self) -> i32 {
        self.partition
    }

    pub fn offset(&self) -> i64 {
        self.offset
    }
}

impl Display for AckHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]@{}", self.topic, self.partition, self.offset)
    }
}

/// One raw message as pulled from the broker.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub key: Option<Vec<u8>>,
    pub payload: Vec<u8>,
    pub handle: AckHandle,
}

/// Errors raised by a [`Broker`].
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),

    #[error("broker unavailable: {0}")]
    Unavailable(String),
}

/// A source of at-least-once delivered messages.
#[async_trait]
pub trait Broker: Send + Sync + 'static {
    /// Waits for the next message.
    ///
    /// Callers race this against their own cancellation; implementations do
    /// not need to observe shutdown themselves.
    async fn fetch(&self) -> Result<Envelope, BrokerError>;

    /// Marks the message behind `handle` as consumed.
    async fn ack(&self, handle: &AckHandle) -> Result<(), BrokerError>;
}
