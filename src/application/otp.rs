//! One-time-code confirmation of pending payments.
//!
//! Each order holds at most one outstanding code at a time, stored in the
//! lock store under `{prefix}:{order_id}` as `"{nonce}:{code}"`. The nonce
//! makes every issuance distinguishable, so a verification only ever consumes
//! the lock it actually observed.

use super::publisher::EventPublisher;
use crate::config::OtpConfig;
use crate::domain::event::EventType;
use crate::domain::payment::PaymentStatus;
use crate::domain::ports::{CodeDeliveryRef, DistributedLockRef, PaymentStoreRef};
use crate::error::{PaymentError, Result};
use rand::Rng;
use rand::rngs::OsRng;
use tracing::{info, warn};
use uuid::Uuid;

const CODE_SPACE: u32 = 1_000_000;

/// Draws a uniformly distributed six-digit code from the OS CSPRNG.
pub fn generate_code() -> String {
    format!("{:06}", OsRng.gen_range(0..CODE_SPACE))
}

#[derive(Clone)]
pub struct OtpCoordinator {
    store: PaymentStoreRef,
    lock: DistributedLockRef,
    publisher: EventPublisher,
    delivery: CodeDeliveryRef,
    config: OtpConfig,
}

impl OtpCoordinator {
    pub fn new(
        store: PaymentStoreRef,
        lock: DistributedLockRef,
        publisher: EventPublisher,
        delivery: CodeDeliveryRef,
        config: OtpConfig,
    ) -> Self {
        Self {
            store,
            lock,
            publisher,
            delivery,
            config,
        }
    }

    fn lock_key(&self, order_id: &str) -> String {
        format!("{}:{}", self.config.key_prefix, order_id)
    }

    fn verify_guard_key(&self, order_id: &str) -> String {
        format!("{}:verifying:{}", self.config.key_prefix, order_id)
    }

    /// Issues a fresh code for `order_id` and sends it to `destination`.
    ///
    /// Fails with `AlreadyLocked` while a previous code is outstanding. The
    /// code is returned so synchronous callers can hand it to their own
    /// channel; delivery failures are logged and do not undo the issuance.
    pub async fn issue_and_lock(&self, order_id: &str, destination: &str) -> Result<String> {
        let payment = self
            .store
            .get_payment_by_order_id(order_id)
            .await?
            .ok_or_else(|| PaymentError::OrderNotFound(order_id.to_string()))?;
        if payment.status != PaymentStatus::Pending {
            return Err(PaymentError::InvalidTransition {
                from: payment.status,
                to: PaymentStatus::Success,
            });
        }

        let code = generate_code();
        let value = format!("{}:{}", Uuid::new_v4(), code);

        if !self
            .lock
            .try_set_if_absent(&self.lock_key(order_id), &value, self.config.ttl())
            .await?
        {
            return Err(PaymentError::AlreadyLocked(order_id.to_string()));
        }

        info!(
            order_id = %order_id,
            payment_id = %payment.payment_id,
            ttl_secs = self.config.ttl_secs,
            "Confirmation code issued"
        );

        if let Err(e) = self.delivery.deliver(destination, &code).await {
            warn!(order_id = %order_id, error = %e, "Failed to deliver confirmation code");
        }

        Ok(code)
    }

    /// The code currently locked for `order_id`, if any.
    pub async fn locked_code(&self, order_id: &str) -> Result<Option<String>> {
        let value = self.lock.get(&self.lock_key(order_id)).await?;
        Ok(value.and_then(|v| code_of(&v).map(str::to_string)))
    }

    /// Checks `candidate` against the outstanding code for `order_id`.
    ///
    /// Single-shot: the observed lock is consumed before the payment is
    /// touched, and only the caller whose release succeeds may move the
    /// payment. Concurrent verifications of the same order return `false`
    /// without side effects.
    pub async fn verify(&self, order_id: &str, candidate: &str) -> Result<bool> {
        let guard_key = self.verify_guard_key(order_id);
        let guard = Uuid::new_v4().to_string();
        if !self
            .lock
            .try_set_if_absent(&guard_key, &guard, self.config.ttl())
            .await?
        {
            warn!(order_id = %order_id, "Concurrent confirmation rejected");
            return Ok(false);
        }

        let verified = self.consume_and_settle(order_id, candidate).await;

        if let Err(e) = self.lock.delete_if_owner(&guard_key, &guard).await {
            warn!(order_id = %order_id, error = %e, "Failed to release confirmation guard");
        }
        verified
    }

    async fn consume_and_settle(&self, order_id: &str, candidate: &str) -> Result<bool> {
        let key = self.lock_key(order_id);
        let observed = match self.lock.get(&key).await {
            Ok(value) => value,
            Err(e) => {
                warn!(order_id = %order_id, error = %e, "Failed to read confirmation lock");
                None
            }
        };

        if let Some(owner) = observed.as_deref() {
            match self.lock.delete_if_owner(&key, owner).await {
                Ok(true) => {}
                Ok(false) => {
                    warn!(order_id = %order_id, "Confirmation code already consumed");
                    return Ok(false);
                }
                Err(e) => {
                    warn!(order_id = %order_id, error = %e, "Failed to consume confirmation code");
                    return Ok(false);
                }
            }
        }

        let Some(mut payment) = self.store.get_payment_by_order_id(order_id).await? else {
            warn!(order_id = %order_id, "Confirmation for unknown order");
            return Ok(false);
        };

        let matched = observed
            .as_deref()
            .and_then(code_of)
            .is_some_and(|code| code == candidate);

        if matched && payment.status == PaymentStatus::Pending {
            payment.transition_to(PaymentStatus::Success)?;
            self.store.update_payment(payment.clone()).await?;

            info!(order_id = %order_id, payment_id = %payment.payment_id, "Payment confirmed");
            self.publisher.publish(EventType::OtpSuccess, &payment).await;
            return Ok(true);
        }

        let reason = match observed {
            None => "confirmation code expired or never issued",
            Some(_) if !matched => "confirmation code mismatch",
            Some(_) => "payment no longer pending",
        };

        if payment.status == PaymentStatus::Pending {
            payment.fail(reason)?;
            self.store.update_payment(payment.clone()).await?;
        }

        info!(order_id = %order_id, payment_id = %payment.payment_id, reason, "Confirmation failed");
        self.publisher.publish(EventType::OtpFailed, &payment).await;
        Ok(false)
    }
}

fn code_of(value: &str) -> Option<&str> {
    value.rsplit_once(':').map(|(_, code)| code)
}
