use super::payment::Payment;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle event types republished for downstream consumers.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Hash)]
pub enum EventType {
    #[serde(rename = "payment.created")]
    PaymentCreated,
    #[serde(rename = "payment.success")]
    PaymentSuccess,
    #[serde(rename = "payment.failed")]
    PaymentFailed,
    #[serde(rename = "payment.refunded")]
    PaymentRefunded,
    #[serde(rename = "otp.success")]
    OtpSuccess,
    #[serde(rename = "otp.failed")]
    OtpFailed,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::PaymentCreated => "payment.created",
            EventType::PaymentSuccess => "payment.success",
            EventType::PaymentFailed => "payment.failed",
            EventType::PaymentRefunded => "payment.refunded",
            EventType::OtpSuccess => "otp.success",
            EventType::OtpFailed => "otp.failed",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct PaymentEvent {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub payment_id: String,
    pub order_id: String,
    pub payment: Payment,
    pub timestamp: DateTime<Utc>,
}

impl PaymentEvent {
    pub fn new(event_type: EventType, payment: &Payment) -> Self {
        Self {
            event_type,
            payment_id: payment.payment_id.clone(),
            order_id: payment.order_id.clone(),
            payment: payment.clone(),
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_event_wire_format() {
        let payment = Payment::new("pay-1".into(), "ord-1".into(), dec!(12.50));
        let event = PaymentEvent::new(EventType::OtpSuccess, &payment);

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "otp.success");
        assert_eq!(value["payment_id"], "pay-1");
        assert_eq!(value["order_id"], "ord-1");
        assert_eq!(value["payment"]["status"], "pending");
        assert!(value["timestamp"].as_str().unwrap().contains('T'));
    }
}
