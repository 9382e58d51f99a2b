use crate::config::TopicConfig;
use crate::domain::event::{EventType, PaymentEvent};
use crate::domain::payment::Payment;
use crate::domain::ports::EventBusRef;
use crate::error::Result;
use tracing::{debug, error};

/// Serializes lifecycle events and routes them to their topic.
///
/// Publishing is best-effort: by the time an event is emitted the payment's
/// state change is already durable, so failures are logged and dropped.
#[derive(Clone)]
pub struct EventPublisher {
    bus: EventBusRef,
    topics: TopicConfig,
}

impl EventPublisher {
    pub fn new(bus: EventBusRef, topics: TopicConfig) -> Self {
        Self { bus, topics }
    }

    pub fn topic_for(&self, event_type: EventType) -> &str {
        match event_type {
            EventType::PaymentSuccess => &self.topics.success,
            EventType::PaymentFailed => &self.topics.failed,
            EventType::PaymentRefunded => &self.topics.refunded,
            _ => &self.topics.events,
        }
    }

    /// Publishes `event_type` for `payment`, keyed by payment id.
    ///
    /// Never fails; see [`EventPublisher::try_publish`] for the fallible form.
    pub async fn publish(&self, event_type: EventType, payment: &Payment) {
        if let Err(e) = self.try_publish(event_type, payment).await {
            error!(
                event_type = %event_type,
                topic = self.topic_for(event_type),
                payment_id = %payment.payment_id,
                order_id = %payment.order_id,
                error = %e,
                "Failed to publish payment event"
            );
        }
    }

    pub async fn try_publish(&self, event_type: EventType, payment: &Payment) -> Result<()> {
        let event = PaymentEvent::new(event_type, payment);
        let payload = serde_json::to_vec(&event)?;
        let topic = self.topic_for(event_type);

        self.bus
            .publish(topic, &payment.payment_id, payload)
            .await?;

        debug!(
            event_type = %event_type,
            topic,
            payment_id = %payment.payment_id,
            "Published payment event"
        );
        Ok(())
    }
}
