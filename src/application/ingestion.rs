//! Order ingestion.
//!
//! Consumes `order.created` messages and materializes exactly one pending
//! payment per order. Delivery is at-least-once, so every message is checked
//! against the store before anything is written, and a message is only
//! acknowledged once its payment is durable (or it was found to be a poison
//! message that can never succeed).

use super::publisher::EventPublisher;
use crate::config::{CheckoutConfig, ConsumerConfig};
use crate::domain::event::EventType;
use crate::domain::order::Order;
use crate::domain::payment::Payment;
use crate::domain::ports::{Delivery, EventBusRef, OrderHookRef, PartitionClaim, PaymentStoreRef};
use crate::error::{PaymentError, Result};
use std::ops::AddAssign;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// A message that was skipped because it could not be decoded into an order.
#[derive(Debug)]
pub struct IngestionError {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub error: PaymentError,
}

/// What happened to one ingested order.
#[derive(Debug, Clone, PartialEq)]
pub enum Disposition {
    Created(Payment),
    /// A payment for the order already existed.
    Duplicate,
    Skipped,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IngestionStats {
    pub created: u64,
    pub duplicates: u64,
    pub skipped: u64,
}

impl IngestionStats {
    fn record(&mut self, disposition: &Disposition) {
        match disposition {
            Disposition::Created(_) => self.created += 1,
            Disposition::Duplicate => self.duplicates += 1,
            Disposition::Skipped => self.skipped += 1,
        }
    }
}

impl AddAssign for IngestionStats {
    fn add_assign(&mut self, other: Self) {
        self.created += other.created;
        self.duplicates += other.duplicates;
        self.skipped += other.skipped;
    }
}

#[derive(Clone)]
pub struct OrderIngestionConsumer {
    bus: EventBusRef,
    store: PaymentStoreRef,
    publisher: EventPublisher,
    hook: Option<OrderHookRef>,
    topic: String,
    checkout: CheckoutConfig,
    consumer: ConsumerConfig,
    errors: Option<mpsc::Sender<IngestionError>>,
}

impl OrderIngestionConsumer {
    pub fn new(
        bus: EventBusRef,
        store: PaymentStoreRef,
        publisher: EventPublisher,
        topic: impl Into<String>,
        checkout: CheckoutConfig,
        consumer: ConsumerConfig,
    ) -> Self {
        Self {
            bus,
            store,
            publisher,
            hook: None,
            topic: topic.into(),
            checkout,
            consumer,
            errors: None,
        }
    }

    /// Runs `hook` after each newly materialized payment.
    pub fn with_hook(mut self, hook: OrderHookRef) -> Self {
        self.hook = Some(hook);
        self
    }

    /// Reports skipped messages on `errors`. Reports are dropped when the
    /// channel is full so a slow reader never stalls a partition.
    pub fn with_error_channel(mut self, errors: mpsc::Sender<IngestionError>) -> Self {
        self.errors = Some(errors);
        self
    }

    /// Consumes until `shutdown` turns true (or its sender is dropped) or the
    /// bus closes. One task runs per partition claim.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> Result<IngestionStats> {
        let claims = self
            .bus
            .subscribe(std::slice::from_ref(&self.topic), &self.consumer.group_id)
            .await?;

        info!(
            topic = %self.topic,
            group_id = %self.consumer.group_id,
            claims = claims.len(),
            "Order ingestion started"
        );

        let mut tasks = JoinSet::new();
        for claim in claims {
            let worker = self.clone();
            let shutdown = shutdown.clone();
            tasks.spawn(async move { worker.consume_claim(claim, shutdown).await });
        }

        let mut stats = IngestionStats::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(claim_stats) => stats += claim_stats,
                Err(e) => error!(error = %e, "Partition consumer task failed"),
            }
        }

        info!(
            created = stats.created,
            duplicates = stats.duplicates,
            skipped = stats.skipped,
            "Order ingestion stopped"
        );
        Ok(stats)
    }

    async fn consume_claim(
        &self,
        mut claim: Box<dyn PartitionClaim>,
        mut shutdown: watch::Receiver<bool>,
    ) -> IngestionStats {
        let mut stats = IngestionStats::default();
        let partition = claim.partition();

        loop {
            if *shutdown.borrow() {
                break;
            }

            let next = tokio::select! {
                biased;
                _ = stopped(&mut shutdown) => break,
                next = claim.next_delivery() => next,
            };

            let delivery = match next {
                Ok(Some(delivery)) => delivery,
                Ok(None) => break,
                Err(e) => {
                    warn!(topic = %self.topic, partition, error = %e, "Failed to fetch order message");
                    tokio::select! {
                        biased;
                        _ = stopped(&mut shutdown) => break,
                        _ = tokio::time::sleep(self.consumer.retry_delay()) => continue,
                    }
                }
            };

            // Shutdown before the payment is durable: leave the message
            // unacknowledged so it is redelivered.
            let Some(disposition) = self.process_until_persisted(&delivery, &mut shutdown).await
            else {
                break;
            };
            stats.record(&disposition);

            if let Err(e) = claim.ack(&delivery).await {
                error!(
                    topic = %delivery.topic,
                    partition = delivery.partition,
                    offset = delivery.offset,
                    error = %e,
                    "Failed to acknowledge order message"
                );
            }
        }

        debug!(topic = %self.topic, partition, "Partition consumer stopped");
        stats
    }

    async fn process_until_persisted(
        &self,
        delivery: &Delivery,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Option<Disposition> {
        loop {
            match self.handle_delivery(delivery).await {
                Ok(disposition) => return Some(disposition),
                Err(e) => {
                    warn!(
                        topic = %delivery.topic,
                        partition = delivery.partition,
                        offset = delivery.offset,
                        error = %e,
                        "Failed to persist payment for order, retrying"
                    );
                    tokio::select! {
                        biased;
                        _ = stopped(shutdown) => return None,
                        _ = tokio::time::sleep(self.consumer.retry_delay()) => {}
                    }
                }
            }
        }
    }

    async fn handle_delivery(&self, delivery: &Delivery) -> Result<Disposition> {
        let order = match Order::from_slice(&delivery.payload) {
            Ok(order) => order,
            Err(e) => {
                warn!(
                    topic = %delivery.topic,
                    partition = delivery.partition,
                    offset = delivery.offset,
                    error = %e,
                    "Skipping malformed order message"
                );
                self.report(delivery, e);
                return Ok(Disposition::Skipped);
            }
        };
        self.ingest_order(order).await
    }

    /// Materializes the payment for `order` unless one already exists.
    ///
    /// Errors are storage failures; the caller should retry.
    pub async fn ingest_order(&self, order: Order) -> Result<Disposition> {
        if self
            .store
            .get_payment_by_order_id(&order.order_id)
            .await?
            .is_some()
        {
            debug!(order_id = %order.order_id, "Duplicate order delivery");
            return Ok(Disposition::Duplicate);
        }

        self.store.save_order(order.clone()).await?;

        let mut payment = Payment::new(
            Uuid::new_v4().to_string(),
            order.order_id.clone(),
            order.price,
        );
        payment.url = Some(self.checkout.url_for(&order.order_id));

        // Lost a race with a concurrent delivery of the same order.
        if !self.store.save_payment(payment.clone()).await? {
            debug!(order_id = %order.order_id, "Payment already created concurrently");
            return Ok(Disposition::Duplicate);
        }

        info!(
            payment_id = %payment.payment_id,
            order_id = %payment.order_id,
            price = %payment.price,
            "Payment created"
        );

        self.publisher
            .publish(EventType::PaymentCreated, &payment)
            .await;

        if let Some(hook) = &self.hook
            && let Err(e) = hook.on_order(&order).await
        {
            warn!(order_id = %order.order_id, error = %e, "Order hook failed");
        }

        Ok(Disposition::Created(payment))
    }

    fn report(&self, delivery: &Delivery, error: PaymentError) {
        let Some(errors) = &self.errors else {
            return;
        };
        let report = IngestionError {
            topic: delivery.topic.clone(),
            partition: delivery.partition,
            offset: delivery.offset,
            error,
        };
        if errors.try_send(report).is_err() {
            warn!(offset = delivery.offset, "Ingestion error channel full or closed");
        }
    }
}

/// Resolves once shutdown is signalled or its sender is gone.
async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}
