use crate::domain::order::Order;
use crate::domain::payment::Payment;
use crate::domain::ports::{DistributedLock, PaymentStore};
use crate::error::{PaymentError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;

#[derive(Default)]
struct PaymentTables {
    payments: HashMap<String, Payment>,
    /// order_id -> payment_id
    by_order: HashMap<String, String>,
    orders: HashMap<String, Order>,
}

/// A thread-safe in-memory store for payments and orders.
///
/// All tables sit behind one `RwLock` so the order-uniqueness check and the
/// insert happen atomically.
#[derive(Default, Clone)]
pub struct InMemoryPaymentStore {
    tables: Arc<RwLock<PaymentTables>>,
}

impl InMemoryPaymentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PaymentStore for InMemoryPaymentStore {
    async fn save_payment(&self, payment: Payment) -> Result<bool> {
        let mut tables = self.tables.write().await;
        if tables.by_order.contains_key(&payment.order_id) {
            return Ok(false);
        }
        if tables.payments.contains_key(&payment.payment_id) {
            return Err(PaymentError::ValidationError(format!(
                "Payment id {} already in use",
                payment.payment_id
            )));
        }
        tables
            .by_order
            .insert(payment.order_id.clone(), payment.payment_id.clone());
        tables.payments.insert(payment.payment_id.clone(), payment);
        Ok(true)
    }

    async fn get_payment(&self, payment_id: &str) -> Result<Option<Payment>> {
        let tables = self.tables.read().await;
        Ok(tables.payments.get(payment_id).cloned())
    }

    async fn update_payment(&self, payment: Payment) -> Result<()> {
        let mut tables = self.tables.write().await;
        match tables.payments.get_mut(&payment.payment_id) {
            Some(existing) => {
                *existing = payment;
                Ok(())
            }
            None => Err(PaymentError::PaymentNotFound(payment.payment_id)),
        }
    }

    async fn get_payment_by_order_id(&self, order_id: &str) -> Result<Option<Payment>> {
        let tables = self.tables.read().await;
        Ok(tables
            .by_order
            .get(order_id)
            .and_then(|payment_id| tables.payments.get(payment_id))
            .cloned())
    }

    async fn list_payments(&self) -> Result<Vec<Payment>> {
        let tables = self.tables.read().await;
        let mut payments: Vec<Payment> = tables.payments.values().cloned().collect();
        payments.sort_by(|a, b| {
            a.created_date
                .cmp(&b.created_date)
                .then_with(|| a.order_id.cmp(&b.order_id))
        });
        Ok(payments)
    }

    async fn save_order(&self, order: Order) -> Result<()> {
        let mut tables = self.tables.write().await;
        tables.orders.insert(order.order_id.clone(), order);
        Ok(())
    }

    async fn get_order(&self, order_id: &str) -> Result<Option<Order>> {
        let tables = self.tables.read().await;
        Ok(tables.orders.get(order_id).cloned())
    }
}

/// In-memory TTL'd compare-and-set store.
///
/// Expiry is measured on tokio's clock, so paused-time tests can advance past
/// a TTL without sleeping.
#[derive(Default, Clone)]
pub struct InMemoryDistributedLock {
    entries: Arc<Mutex<HashMap<String, (String, Instant)>>>,
}

impl InMemoryDistributedLock {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DistributedLock for InMemoryDistributedLock {
    async fn try_set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        if let Some((_, expires_at)) = entries.get(key)
            && *expires_at > now
        {
            return Ok(false);
        }
        entries.insert(key.to_string(), (value.to_string(), now + ttl));
        Ok(true)
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        let value = entries
            .get(key)
            .filter(|(_, expires_at)| *expires_at > now)
            .map(|(value, _)| value.clone());
        if value.is_none() {
            entries.remove(key);
        }
        Ok(value)
    }

    async fn delete_if_owner(&self, key: &str, owner_token: &str) -> Result<bool> {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        let owned = entries
            .get(key)
            .is_some_and(|(value, expires_at)| *expires_at > now && value == owner_token);
        if owned {
            entries.remove(key);
        }
        Ok(owned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn payment(payment_id: &str, order_id: &str) -> Payment {
        Payment::new(payment_id.into(), order_id.into(), dec!(10.00))
    }

    #[tokio::test]
    async fn test_in_memory_payment_store() {
        let store = InMemoryPaymentStore::new();
        let p = payment("pay-1", "ord-1");

        assert!(store.save_payment(p.clone()).await.unwrap());
        assert_eq!(store.get_payment("pay-1").await.unwrap(), Some(p.clone()));
        assert_eq!(store.get_payment_by_order_id("ord-1").await.unwrap(), Some(p));
        assert!(store.get_payment("pay-2").await.unwrap().is_none());
        assert!(store.get_payment_by_order_id("ord-2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_payment_is_insert_if_absent_per_order() {
        let store = InMemoryPaymentStore::new();
        assert!(store.save_payment(payment("pay-1", "ord-1")).await.unwrap());
        assert!(!store.save_payment(payment("pay-2", "ord-1")).await.unwrap());

        let all = store.list_payments().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].payment_id, "pay-1");
    }

    #[tokio::test]
    async fn test_update_requires_existing_payment() {
        let store = InMemoryPaymentStore::new();
        let result = store.update_payment(payment("pay-9", "ord-9")).await;
        assert!(matches!(result, Err(PaymentError::PaymentNotFound(_))));
    }

    #[tokio::test]
    async fn test_lock_set_if_absent() {
        let lock = InMemoryDistributedLock::new();
        let ttl = Duration::from_secs(60);

        assert!(lock.try_set_if_absent("k", "a", ttl).await.unwrap());
        assert!(!lock.try_set_if_absent("k", "b", ttl).await.unwrap());
        assert_eq!(lock.get("k").await.unwrap().as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn test_lock_delete_only_by_owner() {
        let lock = InMemoryDistributedLock::new();
        lock.try_set_if_absent("k", "a", Duration::from_secs(60))
            .await
            .unwrap();

        assert!(!lock.delete_if_owner("k", "b").await.unwrap());
        assert!(lock.get("k").await.unwrap().is_some());
        assert!(lock.delete_if_owner("k", "a").await.unwrap());
        assert!(lock.get("k").await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_lock_expires_after_ttl() {
        let lock = InMemoryDistributedLock::new();
        let ttl = Duration::from_secs(300);
        assert!(lock.try_set_if_absent("k", "a", ttl).await.unwrap());

        tokio::time::advance(Duration::from_secs(301)).await;

        assert!(lock.get("k").await.unwrap().is_none());
        assert!(lock.try_set_if_absent("k", "b", ttl).await.unwrap());
        assert_eq!(lock.get("k").await.unwrap().as_deref(), Some("b"));
    }
}
