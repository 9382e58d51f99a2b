use crate::error::PaymentError;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A purchase intent owned by the upstream ordering system.
///
/// Field names follow the upstream `order.created` wire format.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Order {
    #[serde(rename = "orderID")]
    pub order_id: String,
    #[serde(rename = "userID", default)]
    pub user_id: String,
    #[serde(rename = "sessionID", default)]
    pub session_id: String,
    #[serde(rename = "seatIDs", default)]
    pub seat_ids: Vec<String>,
    #[serde(default)]
    pub status: String,
    pub price: Decimal,
    #[serde(rename = "createdAt", default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl Order {
    /// Decodes an `order.created` payload, rejecting orders that cannot back a
    /// payment.
    pub fn from_slice(payload: &[u8]) -> Result<Self, PaymentError> {
        let order: Order = serde_json::from_slice(payload)?;
        order.validate()?;
        Ok(order)
    }

    pub fn validate(&self) -> Result<(), PaymentError> {
        if self.order_id.trim().is_empty() {
            return Err(PaymentError::ValidationError(
                "Order is missing orderID".to_string(),
            ));
        }
        if self.price < Decimal::ZERO {
            return Err(PaymentError::ValidationError(format!(
                "Order {} has negative price {}",
                self.order_id, self.price
            )));
        }
        Ok(())
    }
}
