//! Kafka consumer-group adapter.
//!
//! Auto-commit is disabled; offsets move only when the committer acknowledges
//! a message. Kafka tracks one offset per partition, so acknowledging offset
//! `n` implicitly covers every earlier message on that partition. Acks arrive
//! in completion order, so a late ack for an older offset is skipped instead of
//! rewinding the group's position.

use crate::broker::{AckHandle, Broker, BrokerError, Envelope};
use async_trait::async_trait;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::{ClientConfig, Message, Offset, TopicPartitionList};
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Connection parameters for the ingest topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KafkaSettings {
    pub brokers: Vec<String>,
    pub topic: String,
    pub group_id: String,
}

pub struct KafkaBroker {
    consumer: StreamConsumer,
    /// Next offset already committed, per (topic, partition).
    committed: Mutex<HashMap<(String, i32), i64>>,
}

impl KafkaBroker {
    /// Creates a consumer and subscribes it to the configured topic.
    ///
    /// # Errors
    ///
    /// Returns `BrokerError::Kafka` if the client cannot be created or the
    /// subscription is rejected.
    pub fn connect(settings: &KafkaSettings) -> Result<Self, BrokerError> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", settings.brokers.join(","))
            .set("group.id", &settings.group_id)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            .create()?;
        consumer.subscribe(&[settings.topic.as_str()])?;

        info!(
            topic = %settings.topic,
            group_id = %settings.group_id,
            brokers = %settings.brokers.join(","),
            "Kafka consumer subscribed"
        );

        Ok(Self {
            consumer,
            committed: Mutex::new(HashMap::new()),
        })
    }
}

#[async_trait]
impl Broker for KafkaBroker {
    async fn fetch(&self) -> Result<Envelope, BrokerError> {
        let message = self.consumer.recv().await?;
        Ok(Envelope {
            key: message.key().map(<[u8]>::to_vec),
            payload: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
            handle: AckHandle::new(message.topic(), message.partition(), message.offset()),
        })
    }

    async fn ack(&self, handle: &AckHandle) -> Result<(), BrokerError> {
        let next = handle.offset() + 1;
        let key = (handle.topic().to_owned(), handle.partition());

        let mut committed = self.committed.lock().await;
        if committed.get(&key).is_some_and(|&current| current >= next) {
            debug!(%handle, "Offset already covered, skipping commit");
            return Ok(());
        }

        let mut partitions = TopicPartitionList::new();
        partitions.add_partition_offset(handle.topic(), handle.partition(), Offset::Offset(next))?;
        self.consumer.commit(&partitions, CommitMode::Async)?;
        committed.insert(key, next);
        Ok(())
    }
}
