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
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fmt::Display;
use std::hash::Hash;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Records carrying an optimistic concurrency counter.
pub(crate) trait Versioned: Clone {
    fn version(&self) -> u64;
    fn bump(&mut self);
}

macro_rules! versioned {
    ($($ty:ty),*) => {
        $(impl Versioned for $ty {
            fn version(&self) -> u64 {
                self.version
            }

            fn bump(&mut self) {
                self.version += 1;
            }
        })*
    };
}

versioned!(Account, Card, Payment);

/// A shared map with insert-if-absent and compare-and-swap writes.
struct Table<K, V> {
    rows: Arc<RwLock<HashMap<K, V>>>,
}

impl<K, V> Default for Table<K, V> {
    fn default() -> Self {
        Self {
            rows: Arc::default(),
        }
    }
}

impl<K, V> Clone for Table<K, V> {
    fn clone(&self) -> Self {
        Self {
            rows: Arc::clone(&self.rows),
        }
    }
}

impl<K: Eq + Hash + Display, V: Clone> Table<K, V> {
    async fn insert(&self, key: K, value: V) -> Result<()> {
        let mut rows = self.rows.write().await;
        match rows.entry(key) {
            Entry::Occupied(entry) => Err(PaymentError::ValidationError(format!(
                "{} already exists",
                entry.key()
            ))),
            Entry::Vacant(entry) => {
                entry.insert(value);
                Ok(())
            }
        }
    }

    async fn get(&self, key: &K) -> Option<V> {
        self.rows.read().await.get(key).cloned()
    }

    async fn put(&self, key: K, value: V) {
        self.rows.write().await.insert(key, value);
    }

    async fn filter(&self, predicate: impl Fn(&V) -> bool) -> Vec<V> {
        let rows = self.rows.read().await;
        rows.values().filter(|row| predicate(row)).cloned().collect()
    }
}

impl<K: Eq + Hash + Display, V: Versioned> Table<K, V> {
    async fn compare_and_swap(&self, key: K, mut value: V) -> Result<bool> {
        let mut rows = self.rows.write().await;
        let Some(current) = rows.get_mut(&key) else {
            return Err(PaymentError::NotFound(key.to_string()));
        };
        if current.version() != value.version() {
            return Ok(false);
        }
        value.bump();
        *current = value;
        Ok(true)
    }
}

/// A thread-safe in-memory store for accounts.
///
/// Ideal for testing or single-process deployments where persistence is not required.
#[derive(Default, Clone)]
pub struct InMemoryAccountStore {
    accounts: Table<AccountId, Account>,
}

impl InMemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AccountStore for InMemoryAccountStore {
    async fn insert(&self, account: Account) -> Result<()> {
        self.accounts.insert(account.id, account).await
    }

    async fn get(&self, id: AccountId) -> Result<Option<Account>> {
        Ok(self.accounts.get(&id).await)
    }

    async fn update(&self, account: Account) -> Result<bool> {
        self.accounts.compare_and_swap(account.id, account).await
    }

    async fn get_all(&self) -> Result<Vec<Account>> {
        let mut accounts = self.accounts.filter(|_| true).await;
        accounts.sort_by_key(|account| account.id);
        Ok(accounts)
    }
}

#[derive(Default, Clone)]
pub struct InMemoryCardStore {
    cards: Table<CardId, Card>,
}

impl InMemoryCardStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CardStore for InMemoryCardStore {
    async fn insert(&self, card: Card) -> Result<()> {
        self.cards.insert(card.id, card).await
    }

    async fn get(&self, id: CardId) -> Result<Option<Card>> {
        Ok(self.cards.get(&id).await)
    }

    async fn update(&self, card: Card) -> Result<bool> {
        self.cards.compare_and_swap(card.id, card).await
    }

    async fn by_account(&self, account: AccountId) -> Result<Vec<Card>> {
        let mut cards = self.cards.filter(|card| card.account == account).await;
        cards.sort_by_key(|card| card.id);
        Ok(cards)
    }
}

#[derive(Default, Clone)]
pub struct InMemoryHoldStore {
    holds: Table<HoldId, Hold>,
}

impl InMemoryHoldStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HoldStore for InMemoryHoldStore {
    async fn insert(&self, hold: Hold) -> Result<()> {
        self.holds.insert(hold.id, hold).await
    }

    async fn get(&self, id: HoldId) -> Result<Option<Hold>> {
        Ok(self.holds.get(&id).await)
    }

    async fn put(&self, hold: Hold) -> Result<()> {
        self.holds.put(hold.id, hold).await;
        Ok(())
    }

    async fn expired(&self, now: DateTime<Utc>) -> Result<Vec<Hold>> {
        Ok(self.holds.filter(|hold| hold.is_expired(now)).await)
    }
}

#[derive(Default, Clone)]
pub struct InMemoryPaymentStore {
    payments: Table<PaymentId, Payment>,
}

impl InMemoryPaymentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PaymentStore for InMemoryPaymentStore {
    async fn insert(&self, payment: Payment) -> Result<()> {
        self.payments.insert(payment.id, payment).await
    }

    async fn get(&self, id: PaymentId) -> Result<Option<Payment>> {
        Ok(self.payments.get(&id).await)
    }

    async fn update(&self, payment: Payment) -> Result<bool> {
        self.payments.compare_and_swap(payment.id, payment).await
    }

    async fn by_batch(&self, batch: BatchId) -> Result<Vec<Payment>> {
        let mut items = self
            .payments
            .filter(|payment| payment.batch_id == Some(batch) && payment.reversal_of.is_none())
            .await;
        items.sort_by_key(|payment| payment.created_at);
        Ok(items)
    }
}

#[derive(Default, Clone)]
pub struct InMemoryIdempotencyStore {
    records: Arc<RwLock<HashMap<String, IdempotencyRecord>>>,
}

impl InMemoryIdempotencyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IdempotencyStore for InMemoryIdempotencyStore {
    async fn get(&self, key: &str) -> Result<Option<IdempotencyRecord>> {
        Ok(self.records.read().await.get(key).cloned())
    }

    async fn put(&self, record: IdempotencyRecord) -> Result<()> {
        self.records.write().await.insert(record.key.clone(), record);
        Ok(())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|_, record| !record.is_expired(now));
        Ok(before - records.len())
    }
}

impl Stores {
    /// A complete set of fresh in-memory stores.
    pub fn in_memory() -> Self {
        Self {
            accounts: Arc::new(InMemoryAccountStore::new()),
            cards: Arc::new(InMemoryCardStore::new()),
            holds: Arc::new(InMemoryHoldStore::new()),
            payments: Arc::new(InMemoryPaymentStore::new()),
            idempotency: Arc::new(InMemoryIdempotencyStore::new()),
        }
    }
}
