use super::payment::PaymentStatus;
use crate::error::PaymentError;
use chrono::{Datelike, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct CardDetails {
    pub number: String,
    pub exp_month: u32,
    pub exp_year: i32,
    pub cvc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl CardDetails {
    /// Rejects card details no provider would accept.
    pub fn validate(&self) -> Result<(), PaymentError> {
        let digits = self.number.chars().filter(|c| !c.is_whitespace()).count();
        if !(13..=19).contains(&digits) || !self.number.chars().all(|c| c.is_ascii_digit() || c == ' ') {
            return Err(PaymentError::ValidationError(
                "Invalid card number".to_string(),
            ));
        }
        if !(1..=12).contains(&self.exp_month) {
            return Err(PaymentError::ValidationError(
                "Invalid card expiry month".to_string(),
            ));
        }
        let now = Utc::now();
        if self.exp_year < now.year() || (self.exp_year == now.year() && self.exp_month < now.month())
        {
            return Err(PaymentError::ValidationError("Card expired".to_string()));
        }
        Ok(())
    }

    pub fn last4(&self) -> &str {
        let len = self.number.len();
        &self.number[len.saturating_sub(4)..]
    }
}

/// How the payer's instrument is supplied to the provider.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    /// A reusable token or provider payment-method identifier.
    Token(String),
    Card(CardDetails),
}

/// A request to settle a pending payment.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct SettlementRequest {
    pub payment_id: String,
    pub order_id: String,
    pub amount: Decimal,
    #[serde(default)]
    pub currency: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub card: Option<CardDetails>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl SettlementRequest {
    /// Fills in `currency` when the caller left it blank.
    pub fn with_default_currency(mut self, currency: &str) -> Self {
        if self.currency.trim().is_empty() {
            self.currency = currency.to_string();
        }
        self
    }

    /// Checks the request before any provider call and resolves the payment
    /// method to charge.
    pub fn validate(&self) -> Result<PaymentMethod, PaymentError> {
        if self.amount <= Decimal::ZERO {
            return Err(PaymentError::ValidationError(format!(
                "Invalid payment amount: {}",
                self.amount
            )));
        }
        if self.order_id.trim().is_empty() {
            return Err(PaymentError::ValidationError(
                "order_id is required".to_string(),
            ));
        }
        match (&self.token, &self.card) {
            (Some(token), _) if !token.trim().is_empty() => Ok(PaymentMethod::Token(token.clone())),
            (_, Some(card)) => {
                card.validate()?;
                Ok(PaymentMethod::Card(card.clone()))
            }
            _ => Err(PaymentError::ValidationError(
                "Either token or card must be provided".to_string(),
            )),
        }
    }
}

/// What the settlement provider is asked to charge.
#[derive(Debug, Clone, PartialEq)]
pub struct ChargeRequest {
    pub amount: Decimal,
    pub currency: String,
    pub method: PaymentMethod,
    pub description: Option<String>,
    pub metadata: HashMap<String, String>,
}

impl ChargeRequest {
    pub fn from_request(request: &SettlementRequest, method: PaymentMethod) -> Self {
        let mut metadata = request.metadata.clone();
        metadata.insert("payment_id".to_string(), request.payment_id.clone());
        metadata.insert("order_id".to_string(), request.order_id.clone());
        Self {
            amount: request.amount,
            currency: request.currency.clone(),
            method,
            description: request.description.clone(),
            metadata,
        }
    }
}

/// Provider-side status of a charge.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "snake_case")]
pub enum ChargeStatus {
    Succeeded,
    Processing,
    RequiresAction,
    Canceled,
    Declined,
}

impl ChargeStatus {
    /// Maps the provider status onto the payment lifecycle. Anything that still
    /// needs the payer or the provider stays `pending`.
    pub fn payment_status(&self) -> PaymentStatus {
        match self {
            ChargeStatus::Succeeded => PaymentStatus::Success,
            ChargeStatus::Processing | ChargeStatus::RequiresAction => PaymentStatus::Pending,
            ChargeStatus::Canceled => PaymentStatus::Cancelled,
            ChargeStatus::Declined => PaymentStatus::Failed,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChargeReceipt {
    pub status: ChargeStatus,
    pub transaction_id: String,
    pub receipt_url: Option<String>,
    pub decline_reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RefundReceipt {
    pub refund_id: String,
}

/// Result of a settlement attempt, already expressed in payment terms.
#[derive(Debug, Clone, PartialEq)]
pub struct SettlementOutcome {
    pub payment_id: String,
    pub order_id: String,
    pub status: PaymentStatus,
    /// Absent when the provider declined before creating a charge.
    pub transaction_id: Option<String>,
    pub receipt_url: Option<String>,
    pub decline_reason: Option<String>,
}
