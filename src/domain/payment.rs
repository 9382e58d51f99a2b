use crate::error::PaymentError;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    #[default]
    Pending,
    Success,
    Failed,
    Refunded,
    Cancelled,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Success => "success",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Refunded => "refunded",
            PaymentStatus::Cancelled => "cancelled",
        }
    }

    /// Whether the payment lifecycle may move from `self` to `next`.
    pub fn can_transition_to(&self, next: PaymentStatus) -> bool {
        matches!(
            (self, next),
            (PaymentStatus::Pending, PaymentStatus::Success)
                | (PaymentStatus::Pending, PaymentStatus::Failed)
                | (PaymentStatus::Pending, PaymentStatus::Cancelled)
                | (PaymentStatus::Success, PaymentStatus::Refunded)
        )
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The payment record materialized for one order.
///
/// Payments are never deleted. Terminal states are kept for audit.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Payment {
    pub payment_id: String,
    pub order_id: String,
    pub status: PaymentStatus,
    pub price: Decimal,
    pub created_date: DateTime<Utc>,
    pub updated_date: DateTime<Utc>,
    /// Checkout link, or the provider receipt once settled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refund_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl Payment {
    pub fn new(payment_id: String, order_id: String, price: Decimal) -> Self {
        let now = Utc::now();
        Self {
            payment_id,
            order_id,
            status: PaymentStatus::Pending,
            price,
            created_date: now,
            updated_date: now,
            url: None,
            transaction_id: None,
            refund_id: None,
            error_message: None,
        }
    }

    /// Moves the payment to `next`, rejecting transitions the lifecycle forbids.
    pub fn transition_to(&mut self, next: PaymentStatus) -> Result<(), PaymentError> {
        if !self.status.can_transition_to(next) {
            return Err(PaymentError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.touch();
        Ok(())
    }

    /// Marks the payment failed, recording why.
    pub fn fail(&mut self, reason: impl Into<String>) -> Result<(), PaymentError> {
        self.transition_to(PaymentStatus::Failed)?;
        self.error_message = Some(reason.into());
        Ok(())
    }

    /// Validates an optional partial refund amount against the charged price
    /// and returns the amount to refund. Settlement always charges the full
    /// price, so `price` is the amount the payer was charged.
    pub fn refund_amount(&self, requested: Option<Decimal>) -> Result<Decimal, PaymentError> {
        match requested {
            None => Ok(self.price),
            Some(amount) if amount > Decimal::ZERO && amount <= self.price => Ok(amount),
            Some(amount) => Err(PaymentError::InvalidRefundAmount {
                amount,
                price: self.price,
            }),
        }
    }

    pub fn touch(&mut self) {
        self.updated_date = Utc::now();
    }
}
