use crate::domain::order::Order;
use crate::domain::payment::Payment;
use crate::domain::ports::PaymentStore;
use crate::error::{PaymentError, Result};
use async_trait::async_trait;
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, DB, IteratorMode, Options, WriteBatch};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Column Family for payment records, keyed by payment id.
pub const CF_PAYMENTS: &str = "payments";
/// Column Family for ingested orders, keyed by order id.
pub const CF_ORDERS: &str = "orders";
/// Column Family mapping order id to payment id.
pub const CF_PAYMENTS_BY_ORDER: &str = "payments_by_order";

/// A persistent payment store backed by RocksDB.
///
/// Payments, orders and the order index live in separate Column Families.
/// Inserts take a process-wide write guard so the order-uniqueness check and
/// the batch write are atomic with respect to other writers of this handle.
///
/// `Clone` shares the underlying `Arc<DB>`.
#[derive(Clone)]
pub struct RocksDbPaymentStore {
    db: Arc<DB>,
    write_guard: Arc<Mutex<()>>,
}

impl RocksDbPaymentStore {
    /// Opens or creates a RocksDB instance at `path`, creating missing
    /// column families.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cfs = [CF_PAYMENTS, CF_ORDERS, CF_PAYMENTS_BY_ORDER]
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()));

        let db = DB::open_cf_descriptors(&opts, path, cfs)?;

        Ok(Self {
            db: Arc::new(db),
            write_guard: Arc::new(Mutex::new(())),
        })
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| PaymentError::internal(format!("{} column family not found", name)))
    }

    fn read_payment(&self, payment_id: &str) -> Result<Option<Payment>> {
        let cf = self.cf(CF_PAYMENTS)?;
        match self.db.get_pinned_cf(cf, payment_id.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl PaymentStore for RocksDbPaymentStore {
    async fn save_payment(&self, payment: Payment) -> Result<bool> {
        let _guard = self.write_guard.lock().await;
        let by_order = self.cf(CF_PAYMENTS_BY_ORDER)?;
        let payments = self.cf(CF_PAYMENTS)?;

        if self
            .db
            .get_pinned_cf(by_order, payment.order_id.as_bytes())?
            .is_some()
        {
            return Ok(false);
        }
        if self
            .db
            .get_pinned_cf(payments, payment.payment_id.as_bytes())?
            .is_some()
        {
            return Err(PaymentError::ValidationError(format!(
                "Payment id {} already in use",
                payment.payment_id
            )));
        }

        let mut batch = WriteBatch::default();
        batch.put_cf(
            by_order,
            payment.order_id.as_bytes(),
            payment.payment_id.as_bytes(),
        );
        batch.put_cf(
            payments,
            payment.payment_id.as_bytes(),
            serde_json::to_vec(&payment)?,
        );
        self.db.write(batch)?;
        Ok(true)
    }

    async fn get_payment(&self, payment_id: &str) -> Result<Option<Payment>> {
        self.read_payment(payment_id)
    }

    async fn update_payment(&self, payment: Payment) -> Result<()> {
        let _guard = self.write_guard.lock().await;
        if self.read_payment(&payment.payment_id)?.is_none() {
            return Err(PaymentError::PaymentNotFound(payment.payment_id));
        }
        let cf = self.cf(CF_PAYMENTS)?;
        self.db.put_cf(
            cf,
            payment.payment_id.as_bytes(),
            serde_json::to_vec(&payment)?,
        )?;
        Ok(())
    }

    async fn get_payment_by_order_id(&self, order_id: &str) -> Result<Option<Payment>> {
        let cf = self.cf(CF_PAYMENTS_BY_ORDER)?;
        let Some(payment_id) = self.db.get_cf(cf, order_id.as_bytes())? else {
            return Ok(None);
        };
        let payment_id = String::from_utf8(payment_id)
            .map_err(|e| PaymentError::internal(format!("Corrupt order index: {}", e)))?;
        self.read_payment(&payment_id)
    }

    async fn list_payments(&self) -> Result<Vec<Payment>> {
        let cf = self.cf(CF_PAYMENTS)?;
        let mut payments = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_key, value) = item?;
            payments.push(serde_json::from_slice::<Payment>(&value)?);
        }
        payments.sort_by(|a, b| {
            a.created_date
                .cmp(&b.created_date)
                .then_with(|| a.order_id.cmp(&b.order_id))
        });
        Ok(payments)
    }

    async fn save_order(&self, order: Order) -> Result<()> {
        let cf = self.cf(CF_ORDERS)?;
        self.db
            .put_cf(cf, order.order_id.as_bytes(), serde_json::to_vec(&order)?)?;
        Ok(())
    }

    async fn get_order(&self, order_id: &str) -> Result<Option<Order>> {
        let cf = self.cf(CF_ORDERS)?;
        match self.db.get_pinned_cf(cf, order_id.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }
}
