use crate::domain::ports::{CodeDelivery, SettlementProvider};
use crate::domain::settlement::{
    ChargeReceipt, ChargeRequest, ChargeStatus, PaymentMethod, RefundReceipt,
};
use crate::error::{Result, SettlementError};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

/// Card numbers the simulator always declines.
pub const DECLINED_CARDS: [&str; 2] = ["4000000000000002", "4000000000000010"];
/// Token that leaves the charge waiting on the payer.
pub const TOKEN_REQUIRES_ACTION: &str = "tok_requires_action";
/// Token that makes the provider itself fail.
pub const TOKEN_PROVIDER_DOWN: &str = "tok_provider_down";

const RECEIPT_BASE_URL: &str = "https://pay.simulated.test/receipts";

/// A deterministic stand-in for an external card processor.
///
/// Charges succeed unless the instrument matches one of the test rules above.
/// Successful charges are remembered so refunds can be checked against the
/// captured amount.
#[derive(Default, Clone)]
pub struct SimulatedSettlementProvider {
    charges: Arc<Mutex<HashMap<String, ChargeRecord>>>,
}

#[derive(Debug, Clone)]
struct ChargeRecord {
    amount: Decimal,
    refunded: Decimal,
}

impl SimulatedSettlementProvider {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SettlementProvider for SimulatedSettlementProvider {
    async fn charge(
        &self,
        request: &ChargeRequest,
    ) -> std::result::Result<ChargeReceipt, SettlementError> {
        let transaction_id = format!("txn_{}", Uuid::new_v4().simple());

        let status = match &request.method {
            PaymentMethod::Token(token) if token == TOKEN_PROVIDER_DOWN => {
                return Err(SettlementError::provider(
                    "charge",
                    "settlement provider unavailable",
                ));
            }
            PaymentMethod::Token(token) if token == TOKEN_REQUIRES_ACTION => {
                ChargeStatus::RequiresAction
            }
            PaymentMethod::Card(card)
                if DECLINED_CARDS.contains(&card.number.replace(' ', "").as_str()) =>
            {
                info!(last4 = card.last4(), "Simulated card decline");
                return Err(SettlementError::Declined {
                    reason: "card_declined".to_string(),
                });
            }
            _ => ChargeStatus::Succeeded,
        };

        if status == ChargeStatus::Succeeded {
            self.charges.lock().await.insert(
                transaction_id.clone(),
                ChargeRecord {
                    amount: request.amount,
                    refunded: Decimal::ZERO,
                },
            );
        }

        Ok(ChargeReceipt {
            status,
            receipt_url: Some(format!("{}/{}", RECEIPT_BASE_URL, transaction_id)),
            transaction_id,
            decline_reason: None,
        })
    }

    async fn refund(
        &self,
        transaction_id: &str,
        amount: Option<Decimal>,
    ) -> std::result::Result<RefundReceipt, SettlementError> {
        let mut charges = self.charges.lock().await;
        let record = charges.get_mut(transaction_id).ok_or_else(|| {
            SettlementError::provider("refund", format!("no such charge: {}", transaction_id))
        })?;

        let remaining = record.amount - record.refunded;
        let requested = amount.unwrap_or(remaining);
        if requested <= Decimal::ZERO || requested > remaining {
            return Err(SettlementError::provider(
                "refund",
                format!(
                    "refund of {} exceeds refundable balance {}",
                    requested, remaining
                ),
            ));
        }
        record.refunded += requested;

        Ok(RefundReceipt {
            refund_id: format!("re_{}", Uuid::new_v4().simple()),
        })
    }
}

/// Code delivery that only logs the destination.
///
/// The code itself is never written to the log.
#[derive(Debug, Default, Clone)]
pub struct LoggingCodeDelivery;

#[async_trait]
impl CodeDelivery for LoggingCodeDelivery {
    async fn deliver(&self, destination: &str, code: &str) -> Result<()> {
        if destination.is_empty() {
            warn!("No destination for confirmation code");
            return Ok(());
        }
        info!(destination, digits = code.len(), "Confirmation code dispatched");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::settlement::CardDetails;
    use chrono::{Datelike, Utc};
    use rust_decimal_macros::dec;

    fn charge(method: PaymentMethod) -> ChargeRequest {
        ChargeRequest {
            amount: dec!(40.00),
            currency: "usd".into(),
            method,
            description: None,
            metadata: HashMap::new(),
        }
    }

    fn card(number: &str) -> PaymentMethod {
        PaymentMethod::Card(CardDetails {
            number: number.into(),
            exp_month: 1,
            exp_year: Utc::now().year() + 1,
            cvc: "123".into(),
            name: None,
        })
    }

    #[tokio::test]
    async fn test_successful_charge_and_refund() {
        let provider = SimulatedSettlementProvider::new();
        let receipt = provider
            .charge(&charge(PaymentMethod::Token("pm_card_visa".into())))
            .await
            .unwrap();
        assert_eq!(receipt.status, ChargeStatus::Succeeded);
        assert!(receipt.transaction_id.starts_with("txn_"));

        let partial = provider
            .refund(&receipt.transaction_id, Some(dec!(15.00)))
            .await
            .unwrap();
        assert!(partial.refund_id.starts_with("re_"));

        // Only 25.00 left.
        assert!(
            provider
                .refund(&receipt.transaction_id, Some(dec!(30.00)))
                .await
                .is_err()
        );
        assert!(provider.refund(&receipt.transaction_id, None).await.is_ok());
    }

    #[tokio::test]
    async fn test_test_card_rules() {
        let provider = SimulatedSettlementProvider::new();

        let declined = provider.charge(&charge(card("4000000000000002"))).await;
        assert!(matches!(declined, Err(SettlementError::Declined { .. })));

        let approved = provider.charge(&charge(card("4242424242424242"))).await;
        assert_eq!(approved.unwrap().status, ChargeStatus::Succeeded);

        let action = provider
            .charge(&charge(PaymentMethod::Token(TOKEN_REQUIRES_ACTION.into())))
            .await
            .unwrap();
        assert_eq!(action.status, ChargeStatus::RequiresAction);

        let down = provider
            .charge(&charge(PaymentMethod::Token(TOKEN_PROVIDER_DOWN.into())))
            .await
            .unwrap_err();
        assert!(!down.is_decline());
    }

    #[tokio::test]
    async fn test_refund_unknown_transaction() {
        let provider = SimulatedSettlementProvider::new();
        assert!(provider.refund("txn_missing", None).await.is_err());
    }
}
