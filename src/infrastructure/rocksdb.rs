use super::in_memory::Versioned;
use crate::domain::account::Account;
use crate::domain::card::Card;
use crate::domain::hold::Hold;
use crate::domain::idempotency::IdempotencyRecord;
use crate::domain::ids::{AccountId, BatchId, CardId, HoldId, PaymentId};
use crate::domain::payment::Payment;
use crate::domain::ports::{
    AccountStore, CardStore, HoldStore, IdempotencyStore, PaymentStore, Stores,
};
use crate::error::{PaymentError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, DB, IteratorMode, Options};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

pub const CF_ACCOUNTS: &str = "accounts";
pub const CF_CARDS: &str = "cards";
pub const CF_HOLDS: &str = "holds";
pub const CF_PAYMENTS: &str = "payments";
pub const CF_IDEMPOTENCY: &str = "idempotency";

const COLUMN_FAMILIES: [&str; 5] = [CF_ACCOUNTS, CF_CARDS, CF_HOLDS, CF_PAYMENTS, CF_IDEMPOTENCY];

/// A persistent store implementation using RocksDB.
///
/// Every entity lives in its own column family as JSON. Read-check-write
/// sequences (insert-if-absent, version compare-and-swap) run under a single
/// writer mutex so they stay atomic across tasks sharing this handle.
///
/// `Clone` shares the underlying `Arc<DB>`.
#[derive(Clone)]
pub struct RocksDBStore {
    db: Arc<DB>,
    writer: Arc<Mutex<()>>,
}

impl RocksDBStore {
    /// Opens or creates a database at `path`, creating missing column families.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let descriptors = COLUMN_FAMILIES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()))
            .collect::<Vec<_>>();
        let db = DB::open_cf_descriptors(&opts, path, descriptors)?;

        Ok(Self {
            db: Arc::new(db),
            writer: Arc::new(Mutex::new(())),
        })
    }

    /// All five ports backed by this database.
    pub fn stores(&self) -> Stores {
        Stores {
            accounts: Arc::new(self.clone()),
            cards: Arc::new(self.clone()),
            holds: Arc::new(self.clone()),
            payments: Arc::new(self.clone()),
            idempotency: Arc::new(self.clone()),
        }
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| PaymentError::internal(format!("{name} column family not found")))
    }

    fn read<V: DeserializeOwned>(&self, name: &str, key: &[u8]) -> Result<Option<V>> {
        match self.db.get_pinned_cf(self.cf(name)?, key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn write<V: Serialize>(&self, name: &str, key: &[u8], value: &V) -> Result<()> {
        let bytes = serde_json::to_vec(value)?;
        self.db.put_cf(self.cf(name)?, key, bytes)?;
        Ok(())
    }

    fn scan<V: DeserializeOwned>(&self, name: &str) -> Result<Vec<V>> {
        let mut rows = Vec::new();
        for item in self.db.iterator_cf(self.cf(name)?, IteratorMode::Start) {
            let (_key, value) = item?;
            rows.push(serde_json::from_slice(&value)?);
        }
        Ok(rows)
    }

    async fn insert_new<V: Serialize>(&self, name: &str, key: &[u8], label: String, value: &V) -> Result<()> {
        let _writer = self.writer.lock().await;
        if self.db.get_pinned_cf(self.cf(name)?, key)?.is_some() {
            return Err(PaymentError::ValidationError(format!("{label} already exists")));
        }
        self.write(name, key, value)
    }

    async fn compare_and_swap<V>(&self, name: &str, key: &[u8], label: String, mut value: V) -> Result<bool>
    where
        V: Versioned + Serialize + DeserializeOwned,
    {
        let _writer = self.writer.lock().await;
        let Some(current) = self.read::<V>(name, key)? else {
            return Err(PaymentError::NotFound(label));
        };
        if current.version() != value.version() {
            return Ok(false);
        }
        value.bump();
        self.write(name, key, &value)?;
        Ok(true)
    }
}

#[async_trait]
impl AccountStore for RocksDBStore {
    async fn insert(&self, account: Account) -> Result<()> {
        let key = account.id.0.to_be_bytes();
        self.insert_new(CF_ACCOUNTS, &key, format!("account {}", account.id), &account)
            .await
    }

    async fn get(&self, id: AccountId) -> Result<Option<Account>> {
        self.read(CF_ACCOUNTS, &id.0.to_be_bytes())
    }

    async fn update(&self, account: Account) -> Result<bool> {
        let key = account.id.0.to_be_bytes();
        self.compare_and_swap(CF_ACCOUNTS, &key, format!("account {}", account.id), account)
            .await
    }

    /// Big-endian keys keep the scan in account order.
    async fn get_all(&self) -> Result<Vec<Account>> {
        self.scan(CF_ACCOUNTS)
    }
}

#[async_trait]
impl CardStore for RocksDBStore {
    async fn insert(&self, card: Card) -> Result<()> {
        let key = card.id.0.to_be_bytes();
        self.insert_new(CF_CARDS, &key, format!("card {}", card.id), &card)
            .await
    }

    async fn get(&self, id: CardId) -> Result<Option<Card>> {
        self.read(CF_CARDS, &id.0.to_be_bytes())
    }

    async fn update(&self, card: Card) -> Result<bool> {
        let key = card.id.0.to_be_bytes();
        self.compare_and_swap(CF_CARDS, &key, format!("card {}", card.id), card)
            .await
    }

    async fn by_account(&self, account: AccountId) -> Result<Vec<Card>> {
        let cards: Vec<Card> = self.scan(CF_CARDS)?;
        Ok(cards.into_iter().filter(|card| card.account == account).collect())
    }
}

#[async_trait]
impl HoldStore for RocksDBStore {
    async fn insert(&self, hold: Hold) -> Result<()> {
        self.insert_new(CF_HOLDS, hold.id.0.as_bytes(), format!("hold {}", hold.id), &hold)
            .await
    }

    async fn get(&self, id: HoldId) -> Result<Option<Hold>> {
        self.read(CF_HOLDS, id.0.as_bytes())
    }

    async fn put(&self, hold: Hold) -> Result<()> {
        let _writer = self.writer.lock().await;
        self.write(CF_HOLDS, hold.id.0.as_bytes(), &hold)
    }

    async fn expired(&self, now: DateTime<Utc>) -> Result<Vec<Hold>> {
        let holds: Vec<Hold> = self.scan(CF_HOLDS)?;
        Ok(holds.into_iter().filter(|hold| hold.is_expired(now)).collect())
    }
}

#[async_trait]
impl PaymentStore for RocksDBStore {
    async fn insert(&self, payment: Payment) -> Result<()> {
        self.insert_new(
            CF_PAYMENTS,
            payment.id.0.as_bytes(),
            format!("payment {}", payment.id),
            &payment,
        )
        .await
    }

    async fn get(&self, id: PaymentId) -> Result<Option<Payment>> {
        self.read(CF_PAYMENTS, id.0.as_bytes())
    }

    async fn update(&self, payment: Payment) -> Result<bool> {
        let key = *payment.id.0.as_bytes();
        self.compare_and_swap(CF_PAYMENTS, &key, format!("payment {}", payment.id), payment)
            .await
    }

    async fn by_batch(&self, batch: BatchId) -> Result<Vec<Payment>> {
        let payments: Vec<Payment> = self.scan(CF_PAYMENTS)?;
        let mut items: Vec<Payment> = payments
            .into_iter()
            .filter(|payment| payment.batch_id == Some(batch) && payment.reversal_of.is_none())
            .collect();
        items.sort_by_key(|payment| payment.created_at);
        Ok(items)
    }
}

#[async_trait]
impl IdempotencyStore for RocksDBStore {
    async fn get(&self, key: &str) -> Result<Option<IdempotencyRecord>> {
        self.read(CF_IDEMPOTENCY, key.as_bytes())
    }

    async fn put(&self, record: IdempotencyRecord) -> Result<()> {
        let _writer = self.writer.lock().await;
        self.write(CF_IDEMPOTENCY, record.key.as_bytes(), &record)
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let _writer = self.writer.lock().await;
        let records: Vec<IdempotencyRecord> = self.scan(CF_IDEMPOTENCY)?;
        let cf = self.cf(CF_IDEMPOTENCY)?;
        let mut purged = 0;
        for record in records.iter().filter(|record| record.is_expired(now)) {
            self.db.delete_cf(cf, record.key.as_bytes())?;
            purged += 1;
        }
        Ok(purged)
    }
}
