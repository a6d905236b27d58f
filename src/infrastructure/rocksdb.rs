use crate::domain::ledger::{Escrow, Payment, Payout, PayoutEntry};
use crate::domain::order::{Order, OrderStatus};
use crate::domain::ports::{LedgerStore, OrderMutation, OrderStore};
use crate::error::{PaymentError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, DB, Direction, IteratorMode, Options};
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Column Family for order aggregates, keyed by order id.
pub const CF_ORDERS: &str = "orders";
/// Column Family for ledger rows, keyed by order id then payment id.
pub const CF_PAYMENTS: &str = "payments";
/// Column Family for escrows, keyed by order id.
pub const CF_ESCROWS: &str = "escrows";
/// Column Family for payouts, keyed by provider id then settlement period.
pub const CF_PAYOUTS: &str = "payouts";

/// A persistent store implementation using RocksDB.
///
/// A RocksDB directory is owned by a single process, so conditional order
/// updates and payout upserts are serialized through `write_gate`; the read,
/// the check and the write happen while it is held.
///
/// This struct is thread-safe (`Clone` shares the underlying `Arc<DB>`).
#[derive(Clone)]
pub struct RocksDBStore {
    db: Arc<DB>,
    write_gate: Arc<Mutex<()>>,
}

impl RocksDBStore {
    /// Opens or creates a RocksDB instance at the specified path.
    ///
    /// Ensures that every column family the service uses exists.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let families = [CF_ORDERS, CF_PAYMENTS, CF_ESCROWS, CF_PAYOUTS]
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect::<Vec<_>>();

        let db = DB::open_cf_descriptors(&opts, path, families)?;

        Ok(Self {
            db: Arc::new(db),
            write_gate: Arc::new(Mutex::new(())),
        })
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db.cf_handle(name).ok_or_else(|| {
            PaymentError::StorageError(format!("{} column family not found", name))
        })
    }

    fn read_order(&self, id: Uuid) -> Result<Option<Order>> {
        let cf = self.cf(CF_ORDERS)?;
        match self.db.get_cf(cf, id.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn write_order(&self, order: &Order) -> Result<()> {
        let cf = self.cf(CF_ORDERS)?;
        self.db
            .put_cf(cf, order.id.as_bytes(), serde_json::to_vec(order)?)?;
        Ok(())
    }

    /// Decodes every value whose key starts with `prefix`.
    fn scan_prefix<T: DeserializeOwned>(&self, family: &str, prefix: &[u8]) -> Result<Vec<T>> {
        let cf = self.cf(family)?;
        let mut rows = Vec::new();
        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(prefix, Direction::Forward));
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(prefix) {
                break;
            }
            rows.push(serde_json::from_slice(&value)?);
        }
        Ok(rows)
    }
}

fn payout_key(provider_id: &str, period: &str) -> Vec<u8> {
    let mut key = payout_prefix(provider_id);
    key.extend_from_slice(period.as_bytes());
    key
}

fn payout_prefix(provider_id: &str) -> Vec<u8> {
    let mut key = provider_id.as_bytes().to_vec();
    key.push(0);
    key
}

#[async_trait]
impl OrderStore for RocksDBStore {
    async fn insert(&self, order: Order) -> Result<()> {
        let _gate = self.write_gate.lock().await;
        if self.read_order(order.id)?.is_some() {
            return Err(PaymentError::ValidationError(format!(
                "order {} already exists",
                order.id
            )));
        }
        self.write_order(&order)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Order>> {
        self.read_order(id)
    }

    async fn due_for_capture(&self, now: DateTime<Utc>) -> Result<Vec<Order>> {
        let mut due: Vec<Order> = self
            .scan_prefix::<Order>(CF_ORDERS, &[])?
            .into_iter()
            .filter(|order| order.is_due_for_capture(now))
            .collect();
        due.sort_by_key(|order| (order.scheduled_capture_at, order.created_at));
        Ok(due)
    }

    async fn stranded_captures(&self, claimed_before: DateTime<Utc>) -> Result<Vec<Order>> {
        Ok(self
            .scan_prefix::<Order>(CF_ORDERS, &[])?
            .into_iter()
            .filter(|order| order.is_stranded_capture(claimed_before))
            .collect())
    }

    async fn update_if(
        &self,
        id: Uuid,
        expected: OrderStatus,
        mutation: OrderMutation,
    ) -> Result<Option<Order>> {
        let _gate = self.write_gate.lock().await;
        let mut order = self
            .read_order(id)?
            .ok_or_else(|| PaymentError::NotFoundError(format!("order {}", id)))?;
        if order.status != expected {
            return Ok(None);
        }
        mutation(&mut order);
        self.write_order(&order)?;
        Ok(Some(order))
    }
}

#[async_trait]
impl LedgerStore for RocksDBStore {
    async fn append_payment(&self, payment: Payment) -> Result<()> {
        let cf = self.cf(CF_PAYMENTS)?;
        let mut key = payment.order_id.as_bytes().to_vec();
        key.extend_from_slice(payment.id.as_bytes());
        self.db.put_cf(cf, key, serde_json::to_vec(&payment)?)?;
        Ok(())
    }

    async fn payments_for(&self, order_id: Uuid) -> Result<Vec<Payment>> {
        let mut payments: Vec<Payment> = self.scan_prefix(CF_PAYMENTS, order_id.as_bytes())?;
        payments.sort_by_key(|p| p.created_at);
        Ok(payments)
    }

    async fn get_escrow(&self, order_id: Uuid) -> Result<Option<Escrow>> {
        let cf = self.cf(CF_ESCROWS)?;
        match self.db.get_cf(cf, order_id.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn put_escrow(&self, escrow: Escrow) -> Result<()> {
        let cf = self.cf(CF_ESCROWS)?;
        self.db
            .put_cf(cf, escrow.order_id.as_bytes(), serde_json::to_vec(&escrow)?)?;
        Ok(())
    }

    async fn record_payout(&self, entry: PayoutEntry) -> Result<Payout> {
        let _gate = self.write_gate.lock().await;
        let mut payout = self
            .payout_for(&entry.provider_id, &entry.period)
            .await?
            .unwrap_or_else(|| Payout::open(&entry.provider_id, &entry.period, entry.settled_at));
        if payout.add(&entry) {
            let cf = self.cf(CF_PAYOUTS)?;
            self.db.put_cf(
                cf,
                payout_key(&payout.provider_id, &payout.period),
                serde_json::to_vec(&payout)?,
            )?;
        }
        Ok(payout)
    }

    async fn payout_for(&self, provider_id: &str, period: &str) -> Result<Option<Payout>> {
        let cf = self.cf(CF_PAYOUTS)?;
        match self.db.get_cf(cf, payout_key(provider_id, period))? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn payouts_for(&self, provider_id: &str) -> Result<Vec<Payout>> {
        self.scan_prefix(CF_PAYOUTS, &payout_prefix(provider_id))
    }
}
