use crate::domain::payment::PaymentStatus;
use rust_decimal::Decimal;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, PaymentError>;

/// Coarse classification of a [`PaymentError`], used by callers that need to
/// map failures onto transport-level responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed input. Never retried.
    Validation,
    /// Unknown payment or order.
    NotFound,
    /// The entity exists but is in the wrong state for the request.
    Conflict,
    /// Lock store, event bus or storage unavailable.
    Infrastructure,
    /// Settlement provider failure or decline.
    Provider,
}

#[derive(Error, Debug)]
pub enum PaymentError {
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Payment not found: {0}")]
    PaymentNotFound(String),
    #[error("Order not found: {0}")]
    OrderNotFound(String),
    #[error("Payment {payment_id} not refundable in status {status}")]
    PaymentNotRefundable {
        payment_id: String,
        status: PaymentStatus,
    },
    #[error("Invalid refund amount {amount} for payment of {price}")]
    InvalidRefundAmount { amount: Decimal, price: Decimal },
    #[error("Invalid status transition from {from} to {to}")]
    InvalidTransition {
        from: PaymentStatus,
        to: PaymentStatus,
    },
    #[error("Confirmation already in progress for order {0}")]
    AlreadyLocked(String),
    #[error("A {operation} is already in progress for payment {payment_id}")]
    OperationInProgress {
        operation: &'static str,
        payment_id: String,
    },
    #[error("Charge {transaction_id} for payment {payment_id} was not recorded, payment is {status}")]
    UnrecordedCharge {
        payment_id: String,
        transaction_id: String,
        status: PaymentStatus,
    },
    #[error("Lock store error: {0}")]
    LockError(String),
    #[error("Event bus error: {0}")]
    BusError(String),
    #[error("Settlement error: {0}")]
    SettlementError(#[from] SettlementError),
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Configuration error: {0}")]
    ConfigError(#[from] config::ConfigError),
    #[error("Internal error: {0}")]
    InternalError(Box<dyn std::error::Error + Send + Sync>),
}

impl PaymentError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PaymentError::ValidationError(_)
            | PaymentError::InvalidRefundAmount { .. }
            | PaymentError::SerializationError(_)
            | PaymentError::CsvError(_) => ErrorKind::Validation,
            PaymentError::PaymentNotFound(_) | PaymentError::OrderNotFound(_) => {
                ErrorKind::NotFound
            }
            PaymentError::PaymentNotRefundable { .. }
            | PaymentError::InvalidTransition { .. }
            | PaymentError::AlreadyLocked(_)
            | PaymentError::OperationInProgress { .. }
            | PaymentError::UnrecordedCharge { .. } => ErrorKind::Conflict,
            PaymentError::SettlementError(SettlementError::MissingTransaction(_)) => {
                ErrorKind::Conflict
            }
            PaymentError::SettlementError(_) => ErrorKind::Provider,
            PaymentError::LockError(_)
            | PaymentError::BusError(_)
            | PaymentError::IoError(_)
            | PaymentError::ConfigError(_)
            | PaymentError::InternalError(_) => ErrorKind::Infrastructure,
        }
    }

    pub(crate) fn internal(message: impl Into<String>) -> Self {
        PaymentError::InternalError(Box::new(std::io::Error::other(message.into())))
    }
}

/// Failures of the external settlement step.
///
/// `Declined` is a legitimate terminal outcome for the payment, everything
/// else is infrastructure and leaves the payment retryable.
#[derive(Error, Debug)]
pub enum SettlementError {
    #[error("charge declined: {reason}")]
    Declined { reason: String },
    #[error("settlement provider failed during {operation}: {source}")]
    Provider {
        operation: &'static str,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("payment {0} has no settlement transaction to refund")]
    MissingTransaction(String),
}

impl SettlementError {
    pub fn provider<E>(operation: &'static str, source: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        SettlementError::Provider {
            operation,
            source: source.into(),
        }
    }

    pub fn is_decline(&self) -> bool {
        matches!(self, SettlementError::Declined { .. })
    }
}

#[cfg(feature = "storage-rocksdb")]
impl From<rocksdb::Error> for PaymentError {
    fn from(err: rocksdb::Error) -> Self {
        PaymentError::InternalError(Box::new(err))
    }
}

#[cfg(feature = "lock-redis")]
impl From<redis::RedisError> for PaymentError {
    fn from(err: redis::RedisError) -> Self {
        PaymentError::LockError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            PaymentError::PaymentNotFound("p".into()).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            PaymentError::InvalidRefundAmount {
                amount: dec!(60),
                price: dec!(50)
            }
            .kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            PaymentError::AlreadyLocked("ord-1".into()).kind(),
            ErrorKind::Conflict
        );
        assert_eq!(
            PaymentError::OperationInProgress {
                operation: "settlement",
                payment_id: "pay-1".into()
            }
            .kind(),
            ErrorKind::Conflict
        );
        assert_eq!(
            PaymentError::LockError("down".into()).kind(),
            ErrorKind::Infrastructure
        );
    }

    #[test]
    fn test_settlement_error_kinds() {
        let declined = PaymentError::from(SettlementError::Declined {
            reason: "insufficient funds".into(),
        });
        assert_eq!(declined.kind(), ErrorKind::Provider);

        let missing = PaymentError::from(SettlementError::MissingTransaction("pay-1".into()));
        assert_eq!(missing.kind(), ErrorKind::Conflict);

        let provider = SettlementError::provider("charge", "connection reset");
        assert!(!provider.is_decline());
        assert!(provider.to_string().contains("connection reset"));
    }
}
