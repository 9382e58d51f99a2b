#![allow(dead_code)]

use async_trait::async_trait;
use payment_gateway::application::gateway::{Adapters, Gateway};
use payment_gateway::config::GatewayConfig;
use payment_gateway::domain::ports::{EventBus, PartitionClaim, PaymentStore, SettlementProvider};
use payment_gateway::domain::settlement::{ChargeReceipt, ChargeRequest, RefundReceipt};
use payment_gateway::error::{PaymentError, Result, SettlementError};
use payment_gateway::infrastructure::in_memory::InMemoryPaymentStore;
use payment_gateway::infrastructure::memory_bus::InMemoryEventBus;
use payment_gateway::infrastructure::simulated::SimulatedSettlementProvider;
use rust_decimal::Decimal;
use std::fs::File;
use std::io::{Error, Write};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

pub struct Harness {
    pub gateway: Gateway,
    pub bus: InMemoryEventBus,
    pub store: Arc<InMemoryPaymentStore>,
    pub config: GatewayConfig,
}

/// A gateway wired entirely to in-memory adapters.
pub fn harness() -> Harness {
    harness_with(|_, _| {})
}

/// Like [`harness`], letting the caller swap adapters before wiring. The
/// in-memory store is passed along so wrappers can delegate to it.
pub fn harness_with(customize: impl FnOnce(&mut Adapters, &InMemoryPaymentStore)) -> Harness {
    let config = GatewayConfig::default();
    let (mut adapters, bus) = Adapters::in_memory(&config);
    let store = Arc::new(InMemoryPaymentStore::new());
    adapters.store = store.clone();
    customize(&mut adapters, &store);
    Harness {
        gateway: Gateway::new(&config, adapters),
        bus,
        store,
        config,
    }
}

/// Same as [`harness`], but every publish fails.
pub fn harness_with_down_bus() -> (Harness, Arc<DownBus>) {
    let down = Arc::new(DownBus::default());
    let bus = down.clone();
    let harness = harness_with(move |adapters, _| adapters.bus = bus);
    (harness, down)
}

pub fn order_json(order_id: &str, price: &str) -> String {
    format!(
        r#"{{"orderID":"{}","userID":"user-1","sessionID":"sess-1","seatIDs":["A1"],"status":"created","price":{},"createdAt":"2024-05-01T10:00:00Z"}}"#,
        order_id, price
    )
}

pub async fn publish_order(bus: &InMemoryEventBus, order_id: &str, price: &str) {
    bus.publish("order.created", order_id, order_json(order_id, price).into_bytes())
        .await
        .unwrap();
}

/// Waits until the consumer group has acknowledged everything on the order topic.
pub async fn drained(bus: &InMemoryEventBus) {
    while bus.lag("payment-gateway", "order.created").await > 0 {
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
    }
}

/// Inserts a pending payment for `order_id` directly into the store.
pub async fn seed_pending(store: &InMemoryPaymentStore, payment_id: &str, order_id: &str, price: rust_decimal::Decimal) {
    let payment = payment_gateway::domain::payment::Payment::new(
        payment_id.to_string(),
        order_id.to_string(),
        price,
    );
    assert!(store.save_payment(payment).await.unwrap());
}

/// An event bus whose broker is always unreachable.
#[derive(Default)]
pub struct DownBus {
    pub attempts: AtomicUsize,
}

impl DownBus {
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EventBus for DownBus {
    async fn publish(&self, _topic: &str, _key: &str, _payload: Vec<u8>) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(PaymentError::BusError("broker unavailable".to_string()))
    }

    async fn subscribe(
        &self,
        _topics: &[String],
        _group_id: &str,
    ) -> Result<Vec<Box<dyn PartitionClaim>>> {
        Ok(Vec::new())
    }
}

/// A simulated provider that takes `delay` per call and records what it was
/// asked to charge.
pub struct SlowProvider {
    inner: SimulatedSettlementProvider,
    delay: Duration,
    pub charges: AtomicUsize,
    pub refunds: AtomicUsize,
}

impl SlowProvider {
    pub fn new(delay: Duration) -> Self {
        Self {
            inner: SimulatedSettlementProvider::new(),
            delay,
            charges: AtomicUsize::new(0),
            refunds: AtomicUsize::new(0),
        }
    }

    pub fn charges(&self) -> usize {
        self.charges.load(Ordering::SeqCst)
    }

    pub fn refunds(&self) -> usize {
        self.refunds.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SettlementProvider for SlowProvider {
    async fn charge(
        &self,
        request: &ChargeRequest,
    ) -> std::result::Result<ChargeReceipt, SettlementError> {
        self.charges.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.inner.charge(request).await
    }

    async fn refund(
        &self,
        transaction_id: &str,
        amount: Option<Decimal>,
    ) -> std::result::Result<RefundReceipt, SettlementError> {
        self.refunds.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.inner.refund(transaction_id, amount).await
    }
}

pub fn generate_orders(path: &Path, rows: usize) -> std::result::Result<(), Error> {
    let mut file = File::create(path)?;
    for i in 1..=rows {
        writeln!(file, "{}", order_json(&format!("ord-{}", i), "10.00"))?;
    }
    file.flush()?;
    Ok(())
}
