use super::otp::OtpCoordinator;
use super::publisher::EventPublisher;
use super::settlement::{SettlementExecutor, SettlementHandle, SettlementPool};
use crate::config::{CheckoutConfig, SettlementConfig};
use crate::domain::event::EventType;
use crate::domain::payment::{Payment, PaymentStatus};
use crate::domain::ports::{DistributedLockRef, PaymentStoreRef};
use crate::domain::settlement::{SettlementOutcome, SettlementRequest};
use crate::error::{ErrorKind, PaymentError, Result};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::future::Future;
use tracing::{error, info, warn};
use uuid::Uuid;

/// A create-or-update request for a payment. Absent fields are left alone.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProcessPaymentRequest {
    pub order_id: String,
    #[serde(default)]
    pub payment_id: Option<String>,
    #[serde(default)]
    pub status: Option<PaymentStatus>,
    #[serde(default)]
    pub price: Option<Decimal>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub transaction_id: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
}

impl ProcessPaymentRequest {
    fn apply_to(&self, payment: &mut Payment) -> Result<()> {
        if let Some(price) = self.price {
            if price < Decimal::ZERO {
                return Err(PaymentError::ValidationError(format!(
                    "Invalid payment price: {}",
                    price
                )));
            }
            payment.price = price;
        }
        if let Some(status) = self.status
            && status != payment.status
        {
            payment.transition_to(status)?;
        }
        if let Some(url) = &self.url {
            payment.url = Some(url.clone());
        }
        if let Some(transaction_id) = &self.transaction_id {
            payment.transaction_id = Some(transaction_id.clone());
        }
        if let Some(error_message) = &self.error_message {
            payment.error_message = Some(error_message.clone());
        }
        payment.touch();
        Ok(())
    }
}

/// Entry point for callers outside the pipeline.
///
/// Cheap to clone; clones share the store, the publisher and the settlement
/// worker pool.
///
/// Charges and refunds hold a per-payment entry in the lock store while the
/// provider is called, so at most one of each runs for a payment at a time.
#[derive(Clone)]
pub struct PaymentService {
    store: PaymentStoreRef,
    lock: DistributedLockRef,
    publisher: EventPublisher,
    otp: OtpCoordinator,
    executor: SettlementExecutor,
    pool: SettlementPool,
    checkout: CheckoutConfig,
    settlement: SettlementConfig,
}

impl PaymentService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: PaymentStoreRef,
        lock: DistributedLockRef,
        publisher: EventPublisher,
        otp: OtpCoordinator,
        executor: SettlementExecutor,
        pool: SettlementPool,
        checkout: CheckoutConfig,
        settlement: SettlementConfig,
    ) -> Self {
        Self {
            store,
            lock,
            publisher,
            otp,
            executor,
            pool,
            checkout,
            settlement,
        }
    }

    /// Creates or partially updates the payment identified by `request`.
    ///
    /// Safe to repeat: the same request converges on the same state. Status
    /// changes follow the payment lifecycle, re-sending the current status is
    /// a no-op.
    pub async fn process_payment(&self, request: ProcessPaymentRequest) -> Result<Payment> {
        if request.order_id.trim().is_empty() {
            return Err(PaymentError::ValidationError(
                "order_id is required".to_string(),
            ));
        }

        let existing = match &request.payment_id {
            Some(payment_id) => self.store.get_payment(payment_id).await?,
            None => None,
        };
        let existing = match existing {
            Some(payment) => Some(payment),
            None => self.store.get_payment_by_order_id(&request.order_id).await?,
        };

        let payment = match existing {
            Some(mut payment) => {
                request.apply_to(&mut payment)?;
                self.store.update_payment(payment.clone()).await?;
                payment
            }
            None => self.create_payment(&request).await?,
        };

        match payment.status {
            PaymentStatus::Success => {
                self.publisher
                    .publish(EventType::PaymentSuccess, &payment)
                    .await
            }
            PaymentStatus::Failed => {
                self.publisher
                    .publish(EventType::PaymentFailed, &payment)
                    .await
            }
            _ => {}
        }

        Ok(payment)
    }

    async fn create_payment(&self, request: &ProcessPaymentRequest) -> Result<Payment> {
        let payment_id = request
            .payment_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let mut payment = Payment::new(payment_id, request.order_id.clone(), Decimal::ZERO);
        payment.url = Some(self.checkout.url_for(&request.order_id));
        request.apply_to(&mut payment)?;

        if self.store.save_payment(payment.clone()).await? {
            info!(
                payment_id = %payment.payment_id,
                order_id = %payment.order_id,
                status = %payment.status,
                "Payment created"
            );
            return Ok(payment);
        }

        // Another writer created the order's payment in the meantime.
        let mut current = self
            .store
            .get_payment_by_order_id(&request.order_id)
            .await?
            .ok_or_else(|| PaymentError::PaymentNotFound(request.order_id.clone()))?;
        request.apply_to(&mut current)?;
        self.store.update_payment(current.clone()).await?;
        Ok(current)
    }

    pub async fn get_payment(&self, payment_id: &str) -> Result<Payment> {
        self.store
            .get_payment(payment_id)
            .await?
            .ok_or_else(|| PaymentError::PaymentNotFound(payment_id.to_string()))
    }

    pub async fn get_payment_by_order_id(&self, order_id: &str) -> Result<Payment> {
        self.store
            .get_payment_by_order_id(order_id)
            .await?
            .ok_or_else(|| PaymentError::PaymentNotFound(order_id.to_string()))
    }

    pub async fn list_payments(&self) -> Result<Vec<Payment>> {
        self.store.list_payments().await
    }

    /// Refunds a successful payment in full or in part.
    ///
    /// Payments settled through the provider are refunded there first; the
    /// status is re-checked right before the transition so a concurrent
    /// change is never overwritten.
    pub async fn refund_payment(
        &self,
        payment_id: &str,
        amount: Option<Decimal>,
        reason: &str,
    ) -> Result<Payment> {
        self.exclusive("refund", payment_id, self.refund_locked(payment_id, amount, reason))
            .await
    }

    async fn refund_locked(
        &self,
        payment_id: &str,
        amount: Option<Decimal>,
        reason: &str,
    ) -> Result<Payment> {
        let payment = self.get_payment(payment_id).await?;
        ensure_refundable(&payment)?;
        let amount = payment.refund_amount(amount)?;

        let refund_id = match payment.transaction_id.as_deref() {
            Some(id) if !id.is_empty() => Some(
                self.executor
                    .refund(&payment, Some(amount))
                    .await?
                    .refund_id,
            ),
            _ => None,
        };

        let mut current = self.get_payment(payment_id).await?;
        if let Err(e) = ensure_refundable(&current) {
            if let Some(refund_id) = &refund_id {
                error!(
                    payment_id,
                    refund_id = %refund_id,
                    status = %current.status,
                    "Provider refund issued but payment changed concurrently"
                );
            }
            return Err(e);
        }
        current.transition_to(PaymentStatus::Refunded)?;
        if refund_id.is_some() {
            current.refund_id = refund_id;
        }
        self.store.update_payment(current.clone()).await?;

        info!(payment_id, amount = %amount, reason, "Payment refunded");
        self.publisher
            .publish(EventType::PaymentRefunded, &current)
            .await;
        Ok(current)
    }

    /// Issues a confirmation code for the order's pending payment.
    pub async fn request_confirmation(&self, order_id: &str, destination: &str) -> Result<String> {
        self.otp.issue_and_lock(order_id, destination).await
    }

    /// Consumes the outstanding confirmation code for `order_id`.
    pub async fn confirm_payment(&self, order_id: &str, code: &str) -> Result<bool> {
        self.otp.verify(order_id, code).await
    }

    /// Settles a pending payment inline and records the outcome.
    ///
    /// The request must name the payment's order and its full price; a
    /// mismatch is rejected before the provider is called and leaves the
    /// payment untouched. Declines and invalid payment details mark the
    /// payment `failed`; provider failures are returned and leave it
    /// `pending` for a retry. A second settlement of the same payment while
    /// one is running fails with `OperationInProgress`.
    pub async fn settle(&self, request: SettlementRequest) -> Result<Payment> {
        let payment_id = request.payment_id.clone();
        self.exclusive("settlement", &payment_id, self.settle_locked(request))
            .await
    }

    async fn settle_locked(&self, request: SettlementRequest) -> Result<Payment> {
        let payment = self.get_payment(&request.payment_id).await?;
        if payment.status != PaymentStatus::Pending {
            return Err(PaymentError::InvalidTransition {
                from: payment.status,
                to: PaymentStatus::Success,
            });
        }
        if request.order_id != payment.order_id {
            return Err(PaymentError::ValidationError(format!(
                "Settlement for order {} does not match payment {} of order {}",
                request.order_id, payment.payment_id, payment.order_id
            )));
        }
        if request.amount != payment.price {
            return Err(PaymentError::ValidationError(format!(
                "Settlement amount {} does not match payment {} price {}",
                request.amount, payment.payment_id, payment.price
            )));
        }
        let request = request.with_default_currency(&self.settlement.currency);

        match self.executor.settle(&request).await {
            Ok(outcome) => self.record_outcome(outcome).await,
            Err(e) if e.kind() == ErrorKind::Validation => {
                warn!(payment_id = %request.payment_id, error = %e, "Settlement request rejected");
                self.process_payment(ProcessPaymentRequest {
                    order_id: payment.order_id.clone(),
                    payment_id: Some(payment.payment_id.clone()),
                    status: Some(PaymentStatus::Failed),
                    error_message: Some(e.to_string()),
                    ..Default::default()
                })
                .await?;
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Queues [`PaymentService::settle`] on the settlement pool.
    ///
    /// The settlement completes even if the returned handle is dropped.
    pub async fn submit_settlement(
        &self,
        request: SettlementRequest,
    ) -> Result<SettlementHandle<Payment>> {
        let service = self.clone();
        self.pool
            .submit(async move { service.settle(request).await })
            .await
    }

    async fn record_outcome(&self, outcome: SettlementOutcome) -> Result<Payment> {
        let current = self.get_payment(&outcome.payment_id).await?;
        if current.status != PaymentStatus::Pending {
            return match outcome.transaction_id {
                Some(transaction_id) => {
                    error!(
                        payment_id = %outcome.payment_id,
                        transaction_id = %transaction_id,
                        status = %current.status,
                        "Charge completed but payment settled elsewhere"
                    );
                    Err(PaymentError::UnrecordedCharge {
                        payment_id: outcome.payment_id,
                        transaction_id,
                        status: current.status,
                    })
                }
                None => {
                    warn!(
                        payment_id = %outcome.payment_id,
                        status = %current.status,
                        "Payment settled elsewhere, keeping current state"
                    );
                    Ok(current)
                }
            };
        }

        let status = (outcome.status != PaymentStatus::Pending).then_some(outcome.status);
        self.process_payment(ProcessPaymentRequest {
            order_id: current.order_id.clone(),
            payment_id: Some(current.payment_id.clone()),
            status,
            url: outcome.receipt_url,
            transaction_id: outcome.transaction_id,
            error_message: outcome.decline_reason,
            ..Default::default()
        })
        .await
    }

    /// Runs `work` while holding `{operation}-lock:{payment_id}`.
    async fn exclusive<T>(
        &self,
        operation: &'static str,
        payment_id: &str,
        work: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        let key = format!("{}-lock:{}", operation, payment_id);
        let owner = Uuid::new_v4().to_string();
        if !self
            .lock
            .try_set_if_absent(&key, &owner, self.settlement.lock_ttl())
            .await?
        {
            return Err(PaymentError::OperationInProgress {
                operation,
                payment_id: payment_id.to_string(),
            });
        }

        let result = work.await;

        if let Err(e) = self.lock.delete_if_owner(&key, &owner).await {
            warn!(key = %key, error = %e, "Failed to release payment lock");
        }
        result
    }
}

fn ensure_refundable(payment: &Payment) -> Result<()> {
    if payment.status != PaymentStatus::Success {
        return Err(PaymentError::PaymentNotRefundable {
            payment_id: payment.payment_id.clone(),
            status: payment.status,
        });
    }
    Ok(())
}
