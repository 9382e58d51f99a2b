//! Kafka event bus.
//!
//! Producers key every record so Kafka's partitioner keeps one payment's
//! events on one partition. Consumers run with auto-commit disabled and
//! commit explicitly from `ack`.

use crate::domain::ports::{Delivery, EventBus, PartitionClaim};
use crate::error::{PaymentError, Result};
use async_trait::async_trait;
use rdkafka::ClientConfig;
use rdkafka::Offset;
use rdkafka::TopicPartitionList;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::Message as KafkaMessage;
use rdkafka::producer::{FutureProducer, FutureRecord};
use std::time::Duration;
use tracing::{debug, info};

const SEND_TIMEOUT: Duration = Duration::from_secs(5);

pub struct KafkaEventBus {
    producer: FutureProducer,
    bootstrap_servers: String,
}

impl KafkaEventBus {
    pub fn new(bootstrap_servers: impl Into<String>) -> Result<Self> {
        let bootstrap_servers = bootstrap_servers.into();
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &bootstrap_servers)
            .set("message.timeout.ms", "5000")
            .set("acks", "all")
            .set("enable.idempotence", "true")
            .create()
            .map_err(|e| PaymentError::BusError(format!("Failed to create Kafka producer: {}", e)))?;

        info!(bootstrap_servers = %bootstrap_servers, "Connected to Kafka");

        Ok(Self {
            producer,
            bootstrap_servers,
        })
    }

    fn consumer_config(&self, group_id: &str) -> ClientConfig {
        let mut config = ClientConfig::new();
        config.set("bootstrap.servers", &self.bootstrap_servers);
        config.set("group.id", group_id);
        config.set("enable.auto.commit", "false");
        config.set("auto.offset.reset", "earliest");
        config
    }
}

#[async_trait]
impl EventBus for KafkaEventBus {
    async fn publish(&self, topic: &str, key: &str, payload: Vec<u8>) -> Result<()> {
        let record = FutureRecord::to(topic).key(key).payload(&payload);

        let (partition, offset) = self
            .producer
            .send(record, SEND_TIMEOUT)
            .await
            .map_err(|(e, _)| PaymentError::BusError(format!("Failed to publish: {}", e)))?;

        debug!(topic = %topic, key = %key, partition, offset, "Published to Kafka");
        Ok(())
    }

    /// Kafka assigns partitions to group members itself, so a subscription
    /// yields a single claim covering every partition assigned to this member.
    async fn subscribe(
        &self,
        topics: &[String],
        group_id: &str,
    ) -> Result<Vec<Box<dyn PartitionClaim>>> {
        let consumer: StreamConsumer = self.consumer_config(group_id).create().map_err(|e| {
            PaymentError::BusError(format!("Failed to create Kafka consumer: {}", e))
        })?;

        let topic_refs: Vec<&str> = topics.iter().map(String::as_str).collect();
        consumer
            .subscribe(&topic_refs)
            .map_err(|e| PaymentError::BusError(format!("Failed to subscribe: {}", e)))?;

        info!(topics = ?topics, group_id = %group_id, "Subscribed to Kafka topics");

        Ok(vec![Box::new(KafkaClaim {
            consumer,
            topic: topics.join(","),
        })])
    }
}

struct KafkaClaim {
    consumer: StreamConsumer,
    topic: String,
}

#[async_trait]
impl PartitionClaim for KafkaClaim {
    fn topic(&self) -> &str {
        &self.topic
    }

    /// `-1`: the claim spans the member's whole assignment.
    fn partition(&self) -> i32 {
        -1
    }

    async fn next_delivery(&mut self) -> Result<Option<Delivery>> {
        let message = self
            .consumer
            .recv()
            .await
            .map_err(|e| PaymentError::BusError(format!("Kafka consumer error: {}", e)))?;

        Ok(Some(Delivery {
            topic: message.topic().to_string(),
            partition: message.partition(),
            offset: message.offset(),
            key: message
                .key()
                .map(|k| String::from_utf8_lossy(k).into_owned()),
            payload: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
        }))
    }

    /// Commits synchronously so an acknowledged message is never redelivered
    /// after the claim is dropped.
    async fn ack(&mut self, delivery: &Delivery) -> Result<()> {
        let mut offsets = TopicPartitionList::new();
        offsets
            .add_partition_offset(
                &delivery.topic,
                delivery.partition,
                Offset::Offset(delivery.offset + 1),
            )
            .map_err(|e| PaymentError::BusError(format!("Invalid commit offset: {}", e)))?;
        self.consumer
            .commit(&offsets, CommitMode::Sync)
            .map_err(|e| PaymentError::BusError(format!("Failed to commit offset: {}", e)))
    }
}
