use super::coordinator::LedgerCoordinator;
use crate::domain::account::Account;
use crate::domain::card::Card;
use crate::domain::hold::{Hold, HoldReason, HoldState};
use crate::domain::ids::{AccountId, CardId, HoldId, PaymentId};
use crate::domain::money::Amount;
use crate::error::{PaymentError, Result};
use chrono::{DateTime, Duration, Utc};
use tokio::sync::OwnedMutexGuard;

/// What a reservation is for.
#[derive(Debug, Clone, Copy)]
pub struct Reservation {
    pub amount: Amount,
    pub reason: HoldReason,
    /// Card whose limit the reservation counts against.
    pub card: Option<CardId>,
    pub payment: Option<PaymentId>,
    pub ttl: Duration,
}

/// Balance operations on one account, valid only while its lock is held.
///
/// Obtained through [`LedgerCoordinator::with_account_lock`].
/// Every operation either fully applies or leaves the ledger untouched.
pub struct AccountLedger<'c> {
    coordinator: &'c LedgerCoordinator,
    account: AccountId,
    _guard: OwnedMutexGuard<()>,
}

impl<'c> AccountLedger<'c> {
    pub(crate) fn new(
        coordinator: &'c LedgerCoordinator,
        account: AccountId,
        guard: OwnedMutexGuard<()>,
    ) -> Self {
        Self {
            coordinator,
            account,
            _guard: guard,
        }
    }

    pub fn account_id(&self) -> AccountId {
        self.account
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.coordinator.clock.now()
    }

    pub async fn account(&self) -> Result<Account> {
        self.coordinator.account(self.account).await
    }

    /// Reads a card owned by the locked account.
    pub async fn card(&self, id: CardId) -> Result<Card> {
        let card = self.coordinator.card(id).await?;
        if card.account != self.account {
            return Err(PaymentError::NotFound(format!(
                "card {id} on account {}",
                self.account
            )));
        }
        Ok(card)
    }

    /// Reads a hold placed on the locked account.
    pub async fn hold(&self, id: HoldId) -> Result<Hold> {
        let hold = self.coordinator.hold(id).await?;
        if hold.account != self.account {
            return Err(PaymentError::NotFound(format!(
                "hold {id} on account {}",
                self.account
            )));
        }
        Ok(hold)
    }

    /// Reserves funds, producing an active hold.
    ///
    /// Fails with `AccountBlocked`/`CardBlocked`, `LimitExceeded` or
    /// `InsufficientFunds` without touching any balance.
    pub async fn reserve(&mut self, reservation: Reservation) -> Result<Hold> {
        let amount = reservation.amount;
        if let Some(card_id) = reservation.card {
            self.card(card_id).await?.check_spend(amount)?;
        }

        self.update_account(|account| account.reserve(amount)).await?;

        if let Some(card_id) = reservation.card {
            if let Err(err) = self.update_card(card_id, |card| card.record_spend(amount)).await {
                self.undo(|account| account.release(amount)).await;
                return Err(err);
            }
        }

        let mut hold = Hold::new(
            self.account,
            amount,
            reservation.reason,
            self.now(),
            reservation.ttl,
        );
        hold.card = reservation.card;
        hold.payment = reservation.payment;

        if let Err(err) = self.coordinator.holds.insert(hold.clone()).await {
            if let Some(card_id) = reservation.card {
                let restored = self
                    .update_card(card_id, |card| {
                        card.restore_spend(amount);
                        Ok(())
                    })
                    .await;
                if let Err(err) = restored {
                    tracing::error!(card = %card_id, "failed to roll back card spend: {err}");
                }
            }
            self.undo(|account| account.release(amount)).await;
            return Err(err);
        }

        tracing::debug!(account = %self.account, hold = %hold.id, amount = %amount, "funds reserved");
        Ok(hold)
    }

    /// Converts an active hold into a permanent debit.
    ///
    /// A hold that ran past its expiry is released instead and the capture
    /// fails with `HoldExpired`.
    pub async fn capture(&mut self, id: HoldId) -> Result<Hold> {
        let mut hold = self.hold(id).await?;
        let now = self.now();
        self.ensure_active(&hold)?;
        if hold.is_expired(now) {
            self.release_funds(&mut hold, now).await?;
            return Err(PaymentError::HoldExpired(id.to_string()));
        }

        let amount = hold.amount;
        self.update_account(|account| account.capture(amount)).await?;
        hold.close(HoldState::Captured, now);
        self.coordinator.holds.put(hold.clone()).await?;
        tracing::debug!(account = %self.account, hold = %id, amount = %amount, "hold captured");
        Ok(hold)
    }

    /// Returns a held amount to the available balance without debiting.
    pub async fn release(&mut self, id: HoldId) -> Result<Hold> {
        let mut hold = self.hold(id).await?;
        self.ensure_active(&hold)?;
        let now = self.now();
        self.release_funds(&mut hold, now).await?;
        Ok(hold)
    }

    /// Releases `id` if it is still active and past its expiry.
    pub async fn expire(&mut self, id: HoldId) -> Result<Option<Hold>> {
        let mut hold = self.hold(id).await?;
        let now = self.now();
        if !hold.is_expired(now) {
            return Ok(None);
        }
        self.release_funds(&mut hold, now).await?;
        tracing::info!(account = %self.account, hold = %id, "expired hold released");
        Ok(Some(hold))
    }

    /// Adds funds to the account.
    pub async fn credit(&mut self, amount: Amount) -> Result<Account> {
        let account = self.update_account(|account| account.credit(amount)).await?;
        tracing::debug!(account = %self.account, amount = %amount, "account credited");
        Ok(account)
    }

    /// Applies `change` to the account with a version-checked write.
    ///
    /// Business errors from `change` are returned as-is; version conflicts
    /// are retried and surface as `Contention` once retries run out.
    pub async fn update_account<F>(&mut self, change: F) -> Result<Account>
    where
        F: Fn(&mut Account) -> Result<()> + Send,
    {
        for attempt in 1..=self.coordinator.max_retries {
            let mut account = self.account().await?;
            change(&mut account)?;
            if self.coordinator.accounts.update(account.clone()).await? {
                account.version += 1;
                return Ok(account);
            }
            tracing::warn!(account = %self.account, attempt, "account version conflict, retrying");
        }
        Err(PaymentError::Contention(format!("account {}", self.account)))
    }

    /// Applies `change` to one of the account's cards with a version-checked write.
    pub async fn update_card<F>(&mut self, id: CardId, change: F) -> Result<Card>
    where
        F: Fn(&mut Card) -> Result<()> + Send,
    {
        for attempt in 1..=self.coordinator.max_retries {
            let mut card = self.card(id).await?;
            change(&mut card)?;
            if self.coordinator.cards.update(card.clone()).await? {
                card.version += 1;
                return Ok(card);
            }
            tracing::warn!(card = %id, attempt, "card version conflict, retrying");
        }
        Err(PaymentError::Contention(format!("card {id}")))
    }

    fn ensure_active(&self, hold: &Hold) -> Result<()> {
        match hold.state {
            HoldState::Active => Ok(()),
            HoldState::Released if hold.lapsed() => {
                Err(PaymentError::HoldExpired(hold.id.to_string()))
            }
            state => Err(PaymentError::InvalidTransition(format!(
                "hold {} is {state:?}",
                hold.id
            ))),
        }
    }

    /// Hands the hold's funds and card spend back, then marks it released.
    async fn release_funds(&mut self, hold: &mut Hold, now: DateTime<Utc>) -> Result<()> {
        let amount = hold.amount;
        self.update_account(|account| account.release(amount)).await?;
        if let Some(card_id) = hold.card {
            self.update_card(card_id, |card| {
                card.restore_spend(amount);
                Ok(())
            })
            .await?;
        }
        hold.close(HoldState::Released, now);
        self.coordinator.holds.put(hold.clone()).await
    }

    async fn undo<F>(&mut self, change: F)
    where
        F: Fn(&mut Account) -> Result<()> + Send,
    {
        if let Err(err) = self.update_account(change).await {
            tracing::error!(account = %self.account, "failed to roll back reservation: {err}");
        }
    }
}
