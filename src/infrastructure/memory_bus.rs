//! In-process partitioned event bus.
//!
//! Mirrors the broker semantics the pipeline relies on: per-key partitioning,
//! ordered per-partition logs, consumer-group offsets that only advance on
//! ack, and redelivery of unacknowledged messages to the next subscription.

use crate::domain::ports::{Delivery, EventBus, PartitionClaim};
use crate::error::{PaymentError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};
use tracing::debug;

#[derive(Default)]
struct BusState {
    /// topic -> partition -> log
    topics: HashMap<String, Vec<Vec<Delivery>>>,
    /// (group, topic, partition) -> next offset to deliver
    committed: HashMap<(String, String, i32), i64>,
    closed: bool,
}

impl BusState {
    fn partitions_mut(&mut self, topic: &str, count: usize) -> &mut Vec<Vec<Delivery>> {
        self.topics
            .entry(topic.to_string())
            .or_insert_with(|| vec![Vec::new(); count])
    }
}

#[derive(Clone)]
pub struct InMemoryEventBus {
    state: Arc<Mutex<BusState>>,
    notify: Arc<Notify>,
    partitions: usize,
}

impl Default for InMemoryEventBus {
    fn default() -> Self {
        Self::new(4)
    }
}

impl InMemoryEventBus {
    pub fn new(partitions: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(BusState::default())),
            notify: Arc::new(Notify::new()),
            partitions: partitions.max(1),
        }
    }

    pub fn partition_for(&self, key: &str) -> i32 {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() % self.partitions as u64) as i32
    }

    /// Every message published to `topic`, partition by partition.
    pub async fn messages(&self, topic: &str) -> Vec<Delivery> {
        let state = self.state.lock().await;
        state
            .topics
            .get(topic)
            .map(|partitions| partitions.iter().flatten().cloned().collect())
            .unwrap_or_default()
    }

    /// Messages on `topic` not yet acknowledged by `group_id`.
    pub async fn lag(&self, group_id: &str, topic: &str) -> i64 {
        let state = self.state.lock().await;
        let Some(partitions) = state.topics.get(topic) else {
            return 0;
        };
        partitions
            .iter()
            .enumerate()
            .map(|(partition, log)| {
                let key = (group_id.to_string(), topic.to_string(), partition as i32);
                let committed = state.committed.get(&key).copied().unwrap_or(0);
                log.len() as i64 - committed
            })
            .sum()
    }

    /// Stops all claims; pending `next_delivery` calls return `None`.
    pub async fn close(&self) {
        self.state.lock().await.closed = true;
        self.notify.notify_waiters();
    }
}

#[async_trait]
impl EventBus for InMemoryEventBus {
    async fn publish(&self, topic: &str, key: &str, payload: Vec<u8>) -> Result<()> {
        let partition = self.partition_for(key);
        let offset = {
            let mut state = self.state.lock().await;
            if state.closed {
                return Err(PaymentError::BusError("bus is closed".to_string()));
            }
            let log = &mut state.partitions_mut(topic, self.partitions)[partition as usize];
            let offset = log.len() as i64;
            log.push(Delivery {
                topic: topic.to_string(),
                partition,
                offset,
                key: Some(key.to_string()),
                payload,
            });
            offset
        };
        debug!(topic, partition, offset, key, "Published message");
        self.notify.notify_waiters();
        Ok(())
    }

    async fn subscribe(
        &self,
        topics: &[String],
        group_id: &str,
    ) -> Result<Vec<Box<dyn PartitionClaim>>> {
        let mut state = self.state.lock().await;
        let mut claims: Vec<Box<dyn PartitionClaim>> = Vec::new();
        for topic in topics {
            let count = state.partitions_mut(topic, self.partitions).len();
            for partition in 0..count as i32 {
                let key = (group_id.to_string(), topic.clone(), partition);
                let next_offset = state.committed.get(&key).copied().unwrap_or(0);
                claims.push(Box::new(MemoryPartitionClaim {
                    state: self.state.clone(),
                    notify: self.notify.clone(),
                    group_id: group_id.to_string(),
                    topic: topic.clone(),
                    partition,
                    next_offset,
                }));
            }
        }
        Ok(claims)
    }
}

struct MemoryPartitionClaim {
    state: Arc<Mutex<BusState>>,
    notify: Arc<Notify>,
    group_id: String,
    topic: String,
    partition: i32,
    next_offset: i64,
}

#[async_trait]
impl PartitionClaim for MemoryPartitionClaim {
    fn topic(&self) -> &str {
        &self.topic
    }

    fn partition(&self) -> i32 {
        self.partition
    }

    async fn next_delivery(&mut self) -> Result<Option<Delivery>> {
        let notify = self.notify.clone();
        loop {
            // Register before checking so a publish in between is not missed.
            let notified = notify.notified();
            {
                let state = self.state.lock().await;
                if state.closed {
                    return Ok(None);
                }
                let next = state
                    .topics
                    .get(&self.topic)
                    .and_then(|partitions| partitions.get(self.partition as usize))
                    .and_then(|log| log.get(self.next_offset as usize))
                    .cloned();
                if let Some(delivery) = next {
                    self.next_offset += 1;
                    return Ok(Some(delivery));
                }
            }
            notified.await;
        }
    }

    async fn ack(&mut self, delivery: &Delivery) -> Result<()> {
        let mut state = self.state.lock().await;
        let key = (
            self.group_id.clone(),
            delivery.topic.clone(),
            delivery.partition,
        );
        let committed = state.committed.entry(key).or_insert(0);
        *committed = (*committed).max(delivery.offset + 1);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn topics(name: &str) -> Vec<String> {
        vec![name.to_string()]
    }

    async fn drain(claims: &mut [Box<dyn PartitionClaim>], ack: bool) -> Vec<Delivery> {
        let mut out = Vec::new();
        for claim in claims.iter_mut() {
            while let Ok(Some(delivery)) =
                tokio::time::timeout(Duration::from_millis(20), claim.next_delivery())
                    .await
                    .unwrap_or(Ok(None))
            {
                if ack {
                    claim.ack(&delivery).await.unwrap();
                }
                out.push(delivery);
            }
        }
        out
    }

    #[tokio::test]
    async fn test_same_key_same_partition_in_order() {
        let bus = InMemoryEventBus::new(4);
        for i in 0..5 {
            bus.publish("t", "pay-1", vec![i]).await.unwrap();
        }
        let messages = bus.messages("t").await;
        assert_eq!(messages.len(), 5);
        assert!(messages.iter().all(|m| m.partition == bus.partition_for("pay-1")));
        let payloads: Vec<u8> = messages.iter().map(|m| m.payload[0]).collect();
        assert_eq!(payloads, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_unacked_messages_are_redelivered() {
        let bus = InMemoryEventBus::new(2);
        bus.publish("t", "a", b"1".to_vec()).await.unwrap();
        bus.publish("t", "b", b"2".to_vec()).await.unwrap();

        let mut claims = bus.subscribe(&topics("t"), "g").await.unwrap();
        assert_eq!(drain(&mut claims, false).await.len(), 2);
        assert_eq!(bus.lag("g", "t").await, 2);

        let mut claims = bus.subscribe(&topics("t"), "g").await.unwrap();
        assert_eq!(drain(&mut claims, true).await.len(), 2);
        assert_eq!(bus.lag("g", "t").await, 0);

        let mut claims = bus.subscribe(&topics("t"), "g").await.unwrap();
        assert!(drain(&mut claims, true).await.is_empty());
    }

    #[tokio::test]
    async fn test_groups_have_independent_offsets() {
        let bus = InMemoryEventBus::new(1);
        bus.publish("t", "a", b"1".to_vec()).await.unwrap();

        let mut first = bus.subscribe(&topics("t"), "g1").await.unwrap();
        drain(&mut first, true).await;

        assert_eq!(bus.lag("g1", "t").await, 0);
        assert_eq!(bus.lag("g2", "t").await, 1);
    }

    #[tokio::test]
    async fn test_waiting_claim_wakes_on_publish_and_close() {
        let bus = InMemoryEventBus::new(1);
        let mut claims = bus.subscribe(&topics("t"), "g").await.unwrap();
        let mut claim = claims.pop().unwrap();

        let publisher = bus.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            publisher.publish("t", "k", b"x".to_vec()).await.unwrap();
        });
        let delivery = claim.next_delivery().await.unwrap().unwrap();
        assert_eq!(delivery.payload, b"x".to_vec());

        bus.close().await;
        assert!(claim.next_delivery().await.unwrap().is_none());
        assert!(bus.publish("t", "k", vec![]).await.is_err());
    }
}
