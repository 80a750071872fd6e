use super::account::Account;
use super::card::Card;
use super::events::{ClearingResponse, PaymentEvent};
use super::hold::Hold;
use super::idempotency::IdempotencyRecord;
use super::ids::{AccountId, BatchId, CardId, HoldId, PaymentId};
use super::payment::Payment;
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

// Versioned stores share one write contract: `insert` refuses existing keys,
// `update` writes only when the stored version equals the record's version,
// bumping it by one, and reports `false` on a version conflict.

#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn insert(&self, account: Account) -> Result<()>;
    async fn get(&self, id: AccountId) -> Result<Option<Account>>;
    async fn update(&self, account: Account) -> Result<bool>;
    async fn get_all(&self) -> Result<Vec<Account>>;
}

#[async_trait]
pub trait CardStore: Send + Sync {
    async fn insert(&self, card: Card) -> Result<()>;
    async fn get(&self, id: CardId) -> Result<Option<Card>>;
    async fn update(&self, card: Card) -> Result<bool>;
    async fn by_account(&self, account: AccountId) -> Result<Vec<Card>>;
}

#[async_trait]
pub trait HoldStore: Send + Sync {
    async fn insert(&self, hold: Hold) -> Result<()>;
    async fn get(&self, id: HoldId) -> Result<Option<Hold>>;
    /// Overwrites a hold. Holds are only written under their account's lock.
    async fn put(&self, hold: Hold) -> Result<()>;
    /// Active holds whose expiry is at or before `now`.
    async fn expired(&self, now: DateTime<Utc>) -> Result<Vec<Hold>>;
}

#[async_trait]
pub trait PaymentStore: Send + Sync {
    async fn insert(&self, payment: Payment) -> Result<()>;
    async fn get(&self, id: PaymentId) -> Result<Option<Payment>>;
    async fn update(&self, payment: Payment) -> Result<bool>;
    async fn by_batch(&self, batch: BatchId) -> Result<Vec<Payment>>;
}

#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<IdempotencyRecord>>;
    async fn put(&self, record: IdempotencyRecord) -> Result<()>;
    /// Drops records expired at `now`, returning how many were removed.
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize>;
}

/// Settlement network for payment instruments.
#[async_trait]
pub trait ClearingGateway: Send + Sync {
    async fn submit(&self, payment: &Payment) -> Result<ClearingResponse>;
}

/// Source of the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Fire-and-forget delivery of payment events.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: PaymentEvent) -> Result<()>;
}

pub type AccountStoreRef = Arc<dyn AccountStore>;
pub type CardStoreRef = Arc<dyn CardStore>;
pub type HoldStoreRef = Arc<dyn HoldStore>;
pub type PaymentStoreRef = Arc<dyn PaymentStore>;
pub type IdempotencyStoreRef = Arc<dyn IdempotencyStore>;
pub type ClearingGatewayRef = Arc<dyn ClearingGateway>;
pub type EventSinkRef = Arc<dyn EventSink>;
pub type ClockRef = Arc<dyn Clock>;

/// The full set of persistence ports the core runs on.
#[derive(Clone)]
pub struct Stores {
    pub accounts: AccountStoreRef,
    pub cards: CardStoreRef,
    pub holds: HoldStoreRef,
    pub payments: PaymentStoreRef,
    pub idempotency: IdempotencyStoreRef,
}
