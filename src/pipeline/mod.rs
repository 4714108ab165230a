//! # Ingestion Pipeline
//!
//! ```text
//!   Broker ──fetch──▶ Fetcher ──▶ [task queue] ──▶ Worker × N ──▶ [ack queue] ──▶ Committer ──ack──▶ Broker
//!                        │                                                ▲
//!                        └──────────── malformed payloads ────────────────┘
//! ```
//!
//! Both queues are bounded. A full task queue stalls the [`Fetcher`]; a full
//! ack queue stalls the [`Worker`]s and, transitively, the fetcher.
//!
//! The [`Committer`] is the only component that acknowledges messages. A
//! message is acknowledged when it was persisted, was already persisted, or can
//! never succeed (not JSON, wrong shape, fails validation). Persistence
//! failures and timeouts are left unacknowledged for the broker to redeliver.
//!
//! Offsets are acknowledged in completion order, not fetch order. On brokers
//! that track one offset per partition, acknowledging a later message also
//! covers earlier ones still in flight on that partition.

pub mod committer;
pub mod error;
pub mod fetcher;
pub mod queue;
pub mod stats;
pub mod worker;

pub use committer::Committer;
pub use error::ProcessError;
pub use fetcher::Fetcher;
pub use queue::{bounded, QueueClosed, QueueReceiver, QueueSender};
pub use stats::{PipelineStats, StatsSnapshot};
pub use worker::Worker;

use std::borrow::Cow;

use crate::broker::{AckHandle, Envelope};

/// One fetched message on its way to a worker.
#[derive(Debug, Clone)]
pub struct Task {
    pub key: Option<Vec<u8>>,
    pub payload: Vec<u8>,
    pub handle: AckHandle,
}

impl From<Envelope> for Task {
    fn from(envelope: Envelope) -> Self {
        Self {
            key: envelope.key,
            payload: envelope.payload,
            handle: envelope.handle,
        }
    }
}

impl Task {
    /// The message key for log fields; empty when the message had none.
    pub fn key_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(self.key.as_deref().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(key: Option<&[u8]>) -> Task {
        Task {
            key: key.map(<[u8]>::to_vec),
            payload: b"{}".to_vec(),
            handle: AckHandle::new("orders", 0, 3),
        }
    }

    #[test]
    fn test_key_lossy_renders_any_key_bytes() {
        assert_eq!(task(Some(&b"o1"[..])).key_lossy(), "o1");
        assert_eq!(task(None).key_lossy(), "");
        assert_eq!(task(Some(&[0x6f, 0xff][..])).key_lossy(), "o\u{fffd}");
    }
}
