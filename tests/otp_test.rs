mod common;

use async_trait::async_trait;
use common::{harness, harness_with, harness_with_down_bus, seed_pending};
use payment_gateway::domain::event::{EventType, PaymentEvent};
use payment_gateway::domain::order::Order;
use payment_gateway::domain::payment::{Payment, PaymentStatus};
use payment_gateway::domain::ports::PaymentStore;
use payment_gateway::error::{ErrorKind, PaymentError, Result};
use payment_gateway::infrastructure::in_memory::InMemoryPaymentStore;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_matching_code_confirms_payment_once() {
    let h = harness();
    seed_pending(&h.store, "pay-1", "ord-1", dec!(99.99)).await;
    let service = &h.gateway.service;

    let code = service
        .request_confirmation("ord-1", "buyer@example.com")
        .await
        .unwrap();
    assert_eq!(code.len(), 6);

    assert!(service.confirm_payment("ord-1", &code).await.unwrap());
    let payment = service.get_payment_by_order_id("ord-1").await.unwrap();
    assert_eq!(payment.status, PaymentStatus::Success);

    // Single-shot: the lock was consumed by the first verification.
    assert!(!service.confirm_payment("ord-1", &code).await.unwrap());
    assert_eq!(
        service.get_payment("pay-1").await.unwrap().status,
        PaymentStatus::Success
    );

    let events = h.bus.messages("payment-events").await;
    let types: Vec<EventType> = events
        .iter()
        .map(|m| serde_json::from_slice::<PaymentEvent>(&m.payload).unwrap().event_type)
        .collect();
    assert_eq!(types, vec![EventType::OtpSuccess, EventType::OtpFailed]);
}

#[tokio::test]
async fn test_wrong_code_fails_payment_and_releases_lock() {
    let h = harness();
    seed_pending(&h.store, "pay-1", "ord-1", dec!(10)).await;
    let service = &h.gateway.service;

    let code = service.request_confirmation("ord-1", "").await.unwrap();
    let wrong = if code == "000000" { "000001" } else { "000000" };

    assert!(!service.confirm_payment("ord-1", wrong).await.unwrap());
    let payment = service.get_payment("pay-1").await.unwrap();
    assert_eq!(payment.status, PaymentStatus::Failed);
    assert_eq!(
        payment.error_message.as_deref(),
        Some("confirmation code mismatch")
    );

    // Released, so the real code no longer works either.
    assert!(!service.confirm_payment("ord-1", &code).await.unwrap());
}

#[tokio::test]
async fn test_concurrent_issue_allows_exactly_one() {
    let h = harness();
    seed_pending(&h.store, "pay-1", "ord-1", dec!(10)).await;

    let attempts = (0..16).map(|_| {
        let service = h.gateway.service.clone();
        tokio::spawn(async move { service.request_confirmation("ord-1", "buyer").await })
    });
    let results = futures::future::join_all(attempts).await;

    let mut issued = 0;
    for result in results {
        match result.unwrap() {
            Ok(_) => issued += 1,
            Err(e) => {
                assert!(matches!(e, PaymentError::AlreadyLocked(_)));
                assert_eq!(e.kind(), ErrorKind::Conflict);
            }
        }
    }
    assert_eq!(issued, 1);
}

#[tokio::test(start_paused = true)]
async fn test_expired_code_allows_reissue_and_fails_verification() {
    let h = harness();
    seed_pending(&h.store, "pay-1", "ord-1", dec!(10)).await;
    let service = &h.gateway.service;

    service.request_confirmation("ord-1", "buyer").await.unwrap();
    assert!(matches!(
        service.request_confirmation("ord-1", "buyer").await,
        Err(PaymentError::AlreadyLocked(_))
    ));

    tokio::time::advance(h.config.otp.ttl() + Duration::from_secs(1)).await;

    // The TTL released the first issuance without any explicit cleanup.
    let second = service.request_confirmation("ord-1", "buyer").await.unwrap();
    tokio::time::advance(h.config.otp.ttl() + Duration::from_secs(1)).await;

    assert!(!service.confirm_payment("ord-1", &second).await.unwrap());
    let payment = service.get_payment("pay-1").await.unwrap();
    assert_eq!(payment.status, PaymentStatus::Failed);
    assert_eq!(
        payment.error_message.as_deref(),
        Some("confirmation code expired or never issued")
    );
}

#[tokio::test]
async fn test_verify_unknown_order_fails_closed() {
    let h = harness();
    assert!(!h.gateway.service.confirm_payment("ord-404", "123456").await.unwrap());
    assert!(h.bus.messages("payment-events").await.is_empty());
}

#[tokio::test]
async fn test_issue_requires_pending_payment() {
    let h = harness();
    let service = &h.gateway.service;

    let missing = service.request_confirmation("ord-404", "buyer").await.unwrap_err();
    assert_eq!(missing.kind(), ErrorKind::NotFound);

    seed_pending(&h.store, "pay-1", "ord-1", dec!(10)).await;
    let mut payment = h.store.get_payment("pay-1").await.unwrap().unwrap();
    payment.transition_to(PaymentStatus::Success).unwrap();
    h.store.update_payment(payment).await.unwrap();

    let settled = service.request_confirmation("ord-1", "buyer").await.unwrap_err();
    assert!(matches!(settled, PaymentError::InvalidTransition { .. }));
}

#[tokio::test]
async fn test_confirmation_survives_event_bus_outage() {
    let (h, down) = harness_with_down_bus();
    seed_pending(&h.store, "pay-1", "ord-1", dec!(10)).await;
    let service = &h.gateway.service;

    let code = service.request_confirmation("ord-1", "buyer").await.unwrap();
    assert!(service.confirm_payment("ord-1", &code).await.unwrap());

    assert_eq!(down.attempts(), 1);
    assert_eq!(
        service.get_payment("pay-1").await.unwrap().status,
        PaymentStatus::Success
    );
}

/// Delays order lookups so concurrent confirmations overlap.
struct SlowLookupStore {
    inner: InMemoryPaymentStore,
    delay: Duration,
}

#[async_trait]
impl PaymentStore for SlowLookupStore {
    async fn save_payment(&self, payment: Payment) -> Result<bool> {
        self.inner.save_payment(payment).await
    }
    async fn get_payment(&self, payment_id: &str) -> Result<Option<Payment>> {
        self.inner.get_payment(payment_id).await
    }
    async fn update_payment(&self, payment: Payment) -> Result<()> {
        self.inner.update_payment(payment).await
    }
    async fn get_payment_by_order_id(&self, order_id: &str) -> Result<Option<Payment>> {
        tokio::time::sleep(self.delay).await;
        self.inner.get_payment_by_order_id(order_id).await
    }
    async fn list_payments(&self) -> Result<Vec<Payment>> {
        self.inner.list_payments().await
    }
    async fn save_order(&self, order: Order) -> Result<()> {
        self.inner.save_order(order).await
    }
    async fn get_order(&self, order_id: &str) -> Result<Option<Order>> {
        self.inner.get_order(order_id).await
    }
}

#[tokio::test]
async fn test_concurrent_confirmations_consume_code_once() {
    let h = harness_with(|adapters, store| {
        adapters.store = Arc::new(SlowLookupStore {
            inner: store.clone(),
            delay: Duration::from_millis(10),
        });
    });
    seed_pending(&h.store, "pay-1", "ord-1", dec!(10)).await;
    let service = &h.gateway.service;

    let code = service.request_confirmation("ord-1", "buyer").await.unwrap();
    let (a, b) = tokio::join!(
        service.confirm_payment("ord-1", &code),
        service.confirm_payment("ord-1", &code),
    );
    let (a, b) = (a.unwrap(), b.unwrap());
    assert!(a ^ b, "exactly one confirmation may succeed: {} {}", a, b);

    assert_eq!(
        service.get_payment("pay-1").await.unwrap().status,
        PaymentStatus::Success
    );
    let events = h.bus.messages("payment-events").await;
    let successes = events
        .iter()
        .map(|m| serde_json::from_slice::<PaymentEvent>(&m.payload).unwrap().event_type)
        .filter(|t| *t == EventType::OtpSuccess)
        .count();
    assert_eq!(successes, 1);
}
