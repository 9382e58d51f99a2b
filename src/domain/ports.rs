use super::order::Order;
use super::payment::Payment;
use super::settlement::{ChargeReceipt, ChargeRequest, RefundReceipt};
use crate::error::{Result, SettlementError};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;

/// Durable storage for payments and the orders that produced them.
#[async_trait]
pub trait PaymentStore: Send + Sync {
    /// Inserts `payment` unless a payment for the same order already exists.
    ///
    /// Returns `false` without writing when the order is already paid for;
    /// this is the linearization point for idempotent ingestion.
    async fn save_payment(&self, payment: Payment) -> Result<bool>;
    async fn get_payment(&self, payment_id: &str) -> Result<Option<Payment>>;
    /// Overwrites an existing payment. Fails with `PaymentNotFound` if absent.
    async fn update_payment(&self, payment: Payment) -> Result<()>;
    async fn get_payment_by_order_id(&self, order_id: &str) -> Result<Option<Payment>>;
    async fn list_payments(&self) -> Result<Vec<Payment>>;
    async fn save_order(&self, order: Order) -> Result<()>;
    async fn get_order(&self, order_id: &str) -> Result<Option<Order>>;
}

/// A TTL'd compare-and-set key-value store.
#[async_trait]
pub trait DistributedLock: Send + Sync {
    /// Atomically stores `value` under `key` if no live entry exists.
    async fn try_set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool>;
    async fn get(&self, key: &str) -> Result<Option<String>>;
    /// Removes `key` only if its current value equals `owner_token`.
    async fn delete_if_owner(&self, key: &str, owner_token: &str) -> Result<bool>;
}

/// One message handed out by a partition claim.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<String>,
    pub payload: Vec<u8>,
}

/// The messages of a single topic partition assigned to one consumer-group
/// member, delivered in offset order.
#[async_trait]
pub trait PartitionClaim: Send {
    fn topic(&self) -> &str;
    fn partition(&self) -> i32;
    /// Waits for the next message. `None` once the bus is closed.
    async fn next_delivery(&mut self) -> Result<Option<Delivery>>;
    /// Commits the group's position past `delivery`.
    async fn ack(&mut self, delivery: &Delivery) -> Result<()>;
}

/// A partitioned, per-key ordered publish/subscribe transport.
#[async_trait]
pub trait EventBus: Send + Sync {
    async fn publish(&self, topic: &str, key: &str, payload: Vec<u8>) -> Result<()>;
    async fn subscribe(
        &self,
        topics: &[String],
        group_id: &str,
    ) -> Result<Vec<Box<dyn PartitionClaim>>>;
}

/// The external charge/refund capability.
#[async_trait]
pub trait SettlementProvider: Send + Sync {
    async fn charge(
        &self,
        request: &ChargeRequest,
    ) -> std::result::Result<ChargeReceipt, SettlementError>;
    async fn refund(
        &self,
        transaction_id: &str,
        amount: Option<Decimal>,
    ) -> std::result::Result<RefundReceipt, SettlementError>;
}

/// Out-of-band delivery of one-time codes (email, SMS, ...).
#[async_trait]
pub trait CodeDelivery: Send + Sync {
    async fn deliver(&self, destination: &str, code: &str) -> Result<()>;
}

/// Post-processing invoked after an order's payment has been materialized.
#[async_trait]
pub trait OrderHook: Send + Sync {
    async fn on_order(&self, order: &Order) -> Result<()>;
}

pub type PaymentStoreRef = Arc<dyn PaymentStore>;
pub type DistributedLockRef = Arc<dyn DistributedLock>;
pub type EventBusRef = Arc<dyn EventBus>;
pub type SettlementProviderRef = Arc<dyn SettlementProvider>;
pub type CodeDeliveryRef = Arc<dyn CodeDelivery>;
pub type OrderHookRef = Arc<dyn OrderHook>;
