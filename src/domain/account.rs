use super::ids::AccountId;
use super::money::{Amount, Balance, Currency};
use crate::error::PaymentError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    Active,
    Blocked,
}

/// Balance record of a single account.
///
/// Tracks spendable funds, funds reserved by active holds and the total
/// balance (available + held). `version` is bumped by the store on every
/// successful conditional write.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
pub struct Account {
    /// The identifier supplied by the identity collaborator.
    pub id: AccountId,
    pub currency: Currency,
    /// Funds that may still be reserved or spent.
    pub available: Balance,
    /// Funds reserved by active holds.
    pub held: Balance,
    /// Total funds (available + held).
    pub total: Balance,
    pub status: AccountStatus,
    /// Optimistic concurrency counter.
    pub version: u64,
}

impl Account {
    pub fn new(id: AccountId, currency: Currency) -> Self {
        Self {
            id,
            currency,
            available: Balance::ZERO,
            held: Balance::ZERO,
            total: Balance::ZERO,
            status: AccountStatus::Active,
            version: 0,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == AccountStatus::Active
    }

    /// Adds funds to the available and total balances.
    pub fn credit(&mut self, amount: Amount) -> Result<(), PaymentError> {
        let available = self.available.checked_add(amount);
        let total = self.total.checked_add(amount);
        match (available, total) {
            (Some(available), Some(total)) => {
                self.available = available;
                self.total = total;
                Ok(())
            }
            _ => Err(PaymentError::ValidationError(format!(
                "Credit of {amount} overflows account {}",
                self.id
            ))),
        }
    }

    /// Moves funds from available to held.
    ///
    /// Leaves the account untouched when the reservation is refused.
    pub fn reserve(&mut self, amount: Amount) -> Result<(), PaymentError> {
        if !self.is_active() {
            return Err(PaymentError::AccountBlocked(self.id.to_string()));
        }
        if self.available < Balance::from(amount) {
            return Err(PaymentError::InsufficientFunds {
                account: self.id.to_string(),
            });
        }
        self.available -= amount.into();
        self.held += amount.into();
        Ok(())
    }

    /// Turns held funds into a permanent debit.
    pub fn capture(&mut self, amount: Amount) -> Result<(), PaymentError> {
        if self.held < Balance::from(amount) {
            return Err(PaymentError::internal(format!(
                "Held funds mismatch on account {}",
                self.id
            )));
        }
        self.held -= amount.into();
        self.total -= amount.into();
        Ok(())
    }

    /// Returns held funds to the available balance.
    pub fn release(&mut self, amount: Amount) -> Result<(), PaymentError> {
        if self.held < Balance::from(amount) {
            return Err(PaymentError::internal(format!(
                "Held funds mismatch on account {}",
                self.id
            )));
        }
        self.held -= amount.into();
        self.available += amount.into();
        Ok(())
    }
}
