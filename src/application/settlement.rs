use crate::domain::payment::{Payment, PaymentStatus};
use crate::domain::ports::SettlementProviderRef;
use crate::domain::settlement::{
    ChargeRequest, ChargeStatus, RefundReceipt, SettlementOutcome, SettlementRequest,
};
use crate::error::{PaymentError, Result, SettlementError};
use futures::FutureExt;
use futures::future::BoxFuture;
use rust_decimal::Decimal;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc, oneshot};
use tracing::{debug, error, info, warn};

/// Runs charges and refunds against the settlement provider and expresses
/// the provider's answer in payment terms.
#[derive(Clone)]
pub struct SettlementExecutor {
    provider: SettlementProviderRef,
}

impl SettlementExecutor {
    pub fn new(provider: SettlementProviderRef) -> Self {
        Self { provider }
    }

    /// Charges the payer for `request`.
    ///
    /// A decline is a normal outcome with status `failed`. Validation
    /// failures are returned before any provider call, and provider failures
    /// are returned as `SettlementError::Provider`.
    pub async fn settle(&self, request: &SettlementRequest) -> Result<SettlementOutcome> {
        let method = request.validate()?;
        let charge = ChargeRequest::from_request(request, method);

        match self.provider.charge(&charge).await {
            Ok(receipt) => {
                let decline_reason = match receipt.status {
                    ChargeStatus::Declined => receipt
                        .decline_reason
                        .or_else(|| Some("declined".to_string())),
                    _ => receipt.decline_reason,
                };
                debug!(
                    payment_id = %request.payment_id,
                    transaction_id = %receipt.transaction_id,
                    status = ?receipt.status,
                    "Charge completed"
                );
                Ok(SettlementOutcome {
                    payment_id: request.payment_id.clone(),
                    order_id: request.order_id.clone(),
                    status: receipt.status.payment_status(),
                    transaction_id: Some(receipt.transaction_id),
                    receipt_url: receipt.receipt_url,
                    decline_reason,
                })
            }
            Err(SettlementError::Declined { reason }) => {
                info!(payment_id = %request.payment_id, reason = %reason, "Charge declined");
                Ok(SettlementOutcome {
                    payment_id: request.payment_id.clone(),
                    order_id: request.order_id.clone(),
                    status: PaymentStatus::Failed,
                    transaction_id: None,
                    receipt_url: None,
                    decline_reason: Some(reason),
                })
            }
            Err(e) => {
                error!(payment_id = %request.payment_id, error = %e, "Settlement provider failed");
                Err(e.into())
            }
        }
    }

    /// Refunds `amount` (or the full price) of a settled payment.
    pub async fn refund(&self, payment: &Payment, amount: Option<Decimal>) -> Result<RefundReceipt> {
        let transaction_id = payment
            .transaction_id
            .as_deref()
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| SettlementError::MissingTransaction(payment.payment_id.clone()))?;
        let amount = payment.refund_amount(amount)?;

        let receipt = self.provider.refund(transaction_id, Some(amount)).await?;
        info!(
            payment_id = %payment.payment_id,
            transaction_id,
            refund_id = %receipt.refund_id,
            amount = %amount,
            "Refund issued"
        );
        Ok(receipt)
    }
}

type Job = BoxFuture<'static, ()>;

/// A bounded pool of settlement workers.
///
/// Jobs run to completion even if their [`SettlementHandle`] is dropped, so a
/// caller going away never strands a payment half way through a transition.
#[derive(Clone)]
pub struct SettlementPool {
    jobs: mpsc::Sender<Job>,
}

impl SettlementPool {
    /// Spawns `workers` tasks on the current runtime.
    pub fn new(workers: usize, queue_capacity: usize) -> Self {
        let (jobs, rx) = mpsc::channel::<Job>(queue_capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));

        for worker in 0..workers.max(1) {
            let rx = rx.clone();
            tokio::spawn(async move {
                loop {
                    let job = rx.lock().await.recv().await;
                    let Some(job) = job else {
                        break;
                    };
                    if AssertUnwindSafe(job).catch_unwind().await.is_err() {
                        error!(worker, "Settlement job panicked");
                    }
                }
                debug!(worker, "Settlement worker stopped");
            });
        }

        Self { jobs }
    }

    /// Queues `job`, waiting for room when the queue is full.
    pub async fn submit<F, T>(&self, job: F) -> Result<SettlementHandle<T>>
    where
        F: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job = async move {
            if tx.send(job.await).is_err() {
                debug!("Settlement result discarded, handle dropped");
            }
        }
        .boxed();

        self.jobs
            .send(job)
            .await
            .map_err(|_| PaymentError::internal("settlement pool is shut down"))?;
        Ok(SettlementHandle { rx })
    }
}

/// The pending result of a submitted settlement.
pub struct SettlementHandle<T> {
    rx: oneshot::Receiver<Result<T>>,
}

impl<T> SettlementHandle<T> {
    pub async fn wait(self) -> Result<T> {
        self.rx
            .await
            .map_err(|_| PaymentError::internal("settlement job did not complete"))?
    }

    /// Non-blocking poll. `None` while the job is still running.
    pub fn try_result(&mut self) -> Option<Result<T>> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => {
                warn!("Settlement job ended without a result");
                Some(Err(PaymentError::internal("settlement job did not complete")))
            }
        }
    }
}
