use super::ledger::AccountLedger;
use super::locks::KeyedLocks;
use crate::domain::account::Account;
use crate::domain::card::Card;
use crate::domain::hold::Hold;
use crate::domain::ids::{AccountId, CardId, HoldId};
use crate::domain::ports::{AccountStoreRef, CardStoreRef, ClockRef, HoldStoreRef, Stores};
use crate::error::{PaymentError, Result};
use std::future::Future;
use std::pin::Pin;

/// Future returned by closures run under an account lock.
pub type LedgerFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Serializes every balance mutation per account.
///
/// Requests against different accounts proceed in parallel; requests against
/// the same account queue on that account's lock. Writes inside the lock are
/// still version-checked against the store and retried up to `max_retries`
/// times, so a second process sharing the store cannot be silently overwritten.
pub struct LedgerCoordinator {
    pub(crate) accounts: AccountStoreRef,
    pub(crate) cards: CardStoreRef,
    pub(crate) holds: HoldStoreRef,
    pub(crate) clock: ClockRef,
    pub(crate) max_retries: u32,
    locks: KeyedLocks<AccountId>,
}

impl LedgerCoordinator {
    pub fn new(stores: &Stores, clock: ClockRef, max_retries: u32) -> Self {
        Self {
            accounts: stores.accounts.clone(),
            cards: stores.cards.clone(),
            holds: stores.holds.clone(),
            clock,
            max_retries: max_retries.max(1),
            locks: KeyedLocks::new(),
        }
    }

    /// Runs `f` with exclusive access to `account`'s balance.
    ///
    /// This is the only way to obtain an [`AccountLedger`], and therefore the
    /// only path through which reserve, capture, release and credit execute.
    pub async fn with_account_lock<T, F>(&self, account: AccountId, f: F) -> Result<T>
    where
        F: for<'l> FnOnce(&'l mut AccountLedger<'_>) -> LedgerFuture<'l, T> + Send,
    {
        let mut ledger = self.lock(account).await?;
        f(&mut ledger).await
    }

    pub(crate) async fn lock(&self, account: AccountId) -> Result<AccountLedger<'_>> {
        let guard = self.locks.acquire(&account).await;
        if self.accounts.get(account).await?.is_none() {
            return Err(PaymentError::NotFound(format!("account {account}")));
        }
        Ok(AccountLedger::new(self, account, guard))
    }

    pub async fn open_account(&self, account: Account) -> Result<()> {
        tracing::info!(account = %account.id, currency = %account.currency, "opening account");
        self.accounts.insert(account).await
    }

    pub async fn issue_card(&self, card: Card) -> Result<()> {
        // Cards live under their account's lock, so issuing one takes it too.
        let _ledger = self.lock(card.account).await?;
        tracing::info!(card = %card.id, account = %card.account, "issuing card");
        self.cards.insert(card).await
    }

    pub async fn account(&self, id: AccountId) -> Result<Account> {
        self.accounts
            .get(id)
            .await?
            .ok_or_else(|| PaymentError::NotFound(format!("account {id}")))
    }

    pub async fn card(&self, id: CardId) -> Result<Card> {
        self.cards
            .get(id)
            .await?
            .ok_or_else(|| PaymentError::NotFound(format!("card {id}")))
    }

    pub async fn hold(&self, id: HoldId) -> Result<Hold> {
        self.holds
            .get(id)
            .await?
            .ok_or_else(|| PaymentError::NotFound(format!("hold {id}")))
    }

    pub async fn accounts(&self) -> Result<Vec<Account>> {
        self.accounts.get_all().await
    }

    /// Drops idle per-account locks.
    pub fn prune_locks(&self) -> usize {
        self.locks.prune()
    }
}
