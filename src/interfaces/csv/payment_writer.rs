use crate::domain::payment::Payment;
use crate::error::Result;
use serde::Serialize;
use std::io::Write;

#[derive(Serialize)]
struct PaymentRow<'a> {
    payment_id: &'a str,
    order_id: &'a str,
    status: &'a str,
    price: String,
    transaction_id: &'a str,
    url: &'a str,
    created_date: String,
    updated_date: String,
}

impl<'a> From<&'a Payment> for PaymentRow<'a> {
    fn from(payment: &'a Payment) -> Self {
        Self {
            payment_id: &payment.payment_id,
            order_id: &payment.order_id,
            status: payment.status.as_str(),
            price: payment.price.normalize().to_string(),
            transaction_id: payment.transaction_id.as_deref().unwrap_or_default(),
            url: payment.url.as_deref().unwrap_or_default(),
            created_date: payment.created_date.to_rfc3339(),
            updated_date: payment.updated_date.to_rfc3339(),
        }
    }
}

/// Writes a payment report as CSV.
pub struct PaymentWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> PaymentWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    pub fn write_payments<'a, I>(&mut self, payments: I) -> Result<()>
    where
        I: IntoIterator<Item = &'a Payment>,
    {
        for payment in payments {
            self.writer.serialize(PaymentRow::from(payment))?;
        }
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::payment::PaymentStatus;
    use rust_decimal_macros::dec;

    #[test]
    fn test_writes_header_and_rows() {
        let mut paid = Payment::new("pay-1".into(), "ord-1".into(), dec!(99.990));
        paid.transition_to(PaymentStatus::Success).unwrap();
        paid.transaction_id = Some("txn_1".into());
        let pending = Payment::new("pay-2".into(), "ord-2".into(), dec!(5));

        let mut out = Vec::new();
        PaymentWriter::new(&mut out)
            .write_payments([&paid, &pending])
            .unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(
            lines[0],
            "payment_id,order_id,status,price,transaction_id,url,created_date,updated_date"
        );
        assert!(lines[1].starts_with("pay-1,ord-1,success,99.99,txn_1,,"));
        assert!(lines[2].starts_with("pay-2,ord-2,pending,5,,,"));
    }
}
