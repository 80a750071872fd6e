use super::ids::{AccountId, CardId};
use super::money::{Amount, Balance};
use crate::error::PaymentError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum CardStatus {
    Active,
    Blocked,
}

/// A payment card drawing on its owning account.
///
/// `spent` is the cumulative amount authorized in the current period and
/// never exceeds `limit` after a successful authorization.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
pub struct Card {
    pub id: CardId,
    pub account: AccountId,
    pub limit: Balance,
    pub spent: Balance,
    pub status: CardStatus,
    pub version: u64,
}

impl Card {
    pub fn new(id: CardId, account: AccountId, limit: Amount) -> Self {
        Self {
            id,
            account,
            limit: limit.into(),
            spent: Balance::ZERO,
            status: CardStatus::Active,
            version: 0,
        }
    }

    /// Checks whether `amount` may be authorized on this card.
    pub fn check_spend(&self, amount: Amount) -> Result<(), PaymentError> {
        if self.status == CardStatus::Blocked {
            return Err(PaymentError::CardBlocked(self.id.to_string()));
        }
        match self.spent.checked_add(amount) {
            Some(projected) if projected <= self.limit => Ok(()),
            _ => Err(PaymentError::LimitExceeded {
                card: self.id.to_string(),
            }),
        }
    }

    pub fn record_spend(&mut self, amount: Amount) -> Result<(), PaymentError> {
        self.check_spend(amount)?;
        self.spent += amount.into();
        Ok(())
    }

    /// Gives back spend reserved by an authorization that never settled.
    pub fn restore_spend(&mut self, amount: Amount) {
        self.spent = (self.spent - amount.into()).max(Balance::ZERO);
    }

    pub fn remaining(&self) -> Balance {
        (self.limit - self.spent).max(Balance::ZERO)
    }
}
